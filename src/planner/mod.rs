pub mod basic;
pub mod heuristic;
pub mod update;

use std::{fmt::Display, str::FromStr, sync::Arc};

use log::debug;

use crate::{
    error::DbResult,
    parser::{
        CreateIndexData, CreateTableData, CreateViewData, DeleteData, InsertData, ModifyData,
        Parser, QueryData, SQLStatement,
    },
    plan::Plan,
    transaction::Transaction,
};

pub use basic::BasicQueryPlanner;
pub use heuristic::HeuristicQueryPlanner;
pub use update::{BasicUpdatePlanner, IndexUpdatePlanner};

/// Turns a parsed query into a plan
pub trait QueryPlanner: Send + Sync {
    fn create_plan(&self, data: &QueryData, tx: &Arc<Transaction>) -> DbResult<Arc<dyn Plan>>;
}

/// Executes parsed update statements, each returning the number of rows it touched
pub trait UpdatePlanner: Send + Sync {
    fn execute_insert(&self, data: &InsertData, tx: &Arc<Transaction>) -> DbResult<usize>;
    fn execute_delete(&self, data: &DeleteData, tx: &Arc<Transaction>) -> DbResult<usize>;
    fn execute_modify(&self, data: &ModifyData, tx: &Arc<Transaction>) -> DbResult<usize>;
    fn execute_create_table(&self, data: &CreateTableData, tx: &Arc<Transaction>)
        -> DbResult<usize>;
    fn execute_create_view(&self, data: &CreateViewData, tx: &Arc<Transaction>)
        -> DbResult<usize>;
    fn execute_create_index(&self, data: &CreateIndexData, tx: &Arc<Transaction>)
        -> DbResult<usize>;
}

/// Which pair of planners a database uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlannerKind {
    /// Greedy join ordering that uses indexes; updates maintain indexes
    #[default]
    Heuristic,
    /// Tables joined in the order listed
    ///
    /// Updates ignore indexes, so an index created on a table goes stale as soon as that
    /// table is modified through this planner.
    Basic,
}

impl Display for PlannerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlannerKind::Heuristic => write!(f, "heuristic"),
            PlannerKind::Basic => write!(f, "basic"),
        }
    }
}

impl FromStr for PlannerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "heuristic" => Ok(PlannerKind::Heuristic),
            "basic" => Ok(PlannerKind::Basic),
            other => Err(format!("unknown planner {other}")),
        }
    }
}

/// The entry point for SQL: parses a statement and hands it to the right planner
pub struct Planner {
    query_planner: Box<dyn QueryPlanner>,
    update_planner: Box<dyn UpdatePlanner>,
}

impl Planner {
    pub fn new(
        query_planner: Box<dyn QueryPlanner>,
        update_planner: Box<dyn UpdatePlanner>,
    ) -> Self {
        Self {
            query_planner,
            update_planner,
        }
    }

    pub fn create_query_plan(
        &self,
        sql: &str,
        tx: &Arc<Transaction>,
    ) -> DbResult<Arc<dyn Plan>> {
        let data = Parser::new(sql)?.parse_query()?;
        let plan = self.query_planner.create_plan(&data, tx)?;
        debug!(
            "planned '{data}': {} blocks, {} records",
            plan.blocks_accessed(),
            plan.records_output()
        );
        Ok(plan)
    }

    pub fn execute_update(&self, sql: &str, tx: &Arc<Transaction>) -> DbResult<usize> {
        let statement = Parser::new(sql)?.parse_update_command()?;
        match statement {
            SQLStatement::InsertData(data) => self.update_planner.execute_insert(&data, tx),
            SQLStatement::DeleteData(data) => self.update_planner.execute_delete(&data, tx),
            SQLStatement::ModifyData(data) => self.update_planner.execute_modify(&data, tx),
            SQLStatement::CreateTableData(data) => {
                self.update_planner.execute_create_table(&data, tx)
            }
            SQLStatement::CreateViewData(data) => {
                self.update_planner.execute_create_view(&data, tx)
            }
            SQLStatement::CreateIndexData(data) => {
                self.update_planner.execute_create_index(&data, tx)
            }
        }
    }
}
