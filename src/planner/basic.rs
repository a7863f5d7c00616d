use std::sync::Arc;

use crate::{
    error::{DbError, DbResult},
    materialize::MergeJoinPlan,
    metadata::MetadataManager,
    parser::{Parser, QueryData},
    plan::{Plan, ProductPlan, ProjectPlan, SelectPlan, TablePlan},
    planner::QueryPlanner,
    transaction::Transaction,
};

/// Joins the tables in the order the query lists them, then selects and projects
///
/// Adjacent inputs related by a natural-join term are sort-merge joined, any other pair
/// is a plain product.
pub struct BasicQueryPlanner {
    metadata: Arc<MetadataManager>,
}

impl BasicQueryPlanner {
    pub fn new(metadata: Arc<MetadataManager>) -> Self {
        Self { metadata }
    }
}

impl QueryPlanner for BasicQueryPlanner {
    fn create_plan(&self, data: &QueryData, tx: &Arc<Transaction>) -> DbResult<Arc<dyn Plan>> {
        let mut plans: Vec<Arc<dyn Plan>> = Vec::with_capacity(data.tables.len());
        for table_name in &data.tables {
            match self.metadata.get_view_def(table_name, tx)? {
                Some(view_def) => {
                    let view_data = Parser::new(&view_def)?.parse_query()?;
                    plans.push(self.create_plan(&view_data, tx)?);
                }
                None => plans.push(Arc::new(TablePlan::new(
                    Arc::clone(tx),
                    table_name,
                    &self.metadata,
                )?)),
            }
        }

        let mut plans = plans.into_iter();
        let mut plan = plans
            .next()
            .ok_or_else(|| DbError::Schema("a query needs at least one table".to_string()))?;
        for next in plans {
            let join_field = data
                .predicate
                .natural_join_field(plan.schema(), next.schema());
            let joined: Arc<dyn Plan> = match join_field {
                Some(field) => Arc::new(MergeJoinPlan::new(
                    Arc::clone(tx),
                    plan,
                    next,
                    &field,
                    &field,
                )),
                None => Arc::new(ProductPlan::new(plan, next)),
            };
            plan = joined;
        }

        if !data.predicate.is_empty() {
            plan = Arc::new(SelectPlan::new(plan, data.predicate.clone()));
        }
        Ok(Arc::new(ProjectPlan::new(plan, &data.fields)?))
    }
}
