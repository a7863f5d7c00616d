use std::sync::Arc;

use crate::{
    error::DbResult,
    metadata::{MetadataManager, StatInfo},
    query::{Predicate, ProductScan, ProjectScan, Scan, SelectScan},
    record::{Layout, Schema, TableScan},
    transaction::Transaction,
};

/// A node of a query plan: a factory for its scan plus the estimates used to compare plans
///
/// The estimates only need to be consistent with each other, they are never used to
/// size anything.
pub trait Plan {
    fn open(&self) -> DbResult<Box<dyn Scan>>;
    fn blocks_accessed(&self) -> usize;
    fn records_output(&self) -> usize;
    fn distinct_values(&self, field_name: &str) -> usize;
    fn schema(&self) -> &Schema;
}

/// Reads every record of a stored table
pub struct TablePlan {
    tx: Arc<Transaction>,
    table_name: String,
    layout: Layout,
    stat_info: StatInfo,
}

impl TablePlan {
    pub fn new(
        tx: Arc<Transaction>,
        table_name: &str,
        metadata_manager: &MetadataManager,
    ) -> DbResult<Self> {
        let layout = metadata_manager.get_layout(table_name, &tx)?;
        let stat_info = metadata_manager.get_stat_info(table_name, &layout, &tx)?;
        Ok(Self {
            tx,
            table_name: table_name.to_string(),
            layout,
            stat_info,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn open_table_scan(&self) -> DbResult<TableScan> {
        TableScan::new(Arc::clone(&self.tx), &self.table_name, self.layout.clone())
    }
}

impl Plan for TablePlan {
    fn open(&self) -> DbResult<Box<dyn Scan>> {
        Ok(Box::new(self.open_table_scan()?))
    }

    fn blocks_accessed(&self) -> usize {
        self.stat_info.blocks_accessed()
    }

    fn records_output(&self) -> usize {
        self.stat_info.records_output()
    }

    fn distinct_values(&self, field_name: &str) -> usize {
        self.stat_info.distinct_values(field_name)
    }

    fn schema(&self) -> &Schema {
        self.layout.schema()
    }
}

pub struct SelectPlan {
    plan: Arc<dyn Plan>,
    predicate: Predicate,
}

impl SelectPlan {
    pub fn new(plan: Arc<dyn Plan>, predicate: Predicate) -> Self {
        Self { plan, predicate }
    }
}

impl Plan for SelectPlan {
    fn open(&self) -> DbResult<Box<dyn Scan>> {
        let scan = self.plan.open()?;
        Ok(Box::new(SelectScan::new(scan, self.predicate.clone())))
    }

    fn blocks_accessed(&self) -> usize {
        self.plan.blocks_accessed()
    }

    fn records_output(&self) -> usize {
        let factor = self.predicate.reduction_factor(self.plan.as_ref()).max(1);
        self.plan.records_output() / factor
    }

    fn distinct_values(&self, field_name: &str) -> usize {
        if self.predicate.equates_with_constant(field_name).is_some() {
            return 1;
        }
        match self.predicate.equates_with_field(field_name) {
            Some(other) if other != field_name => self
                .plan
                .distinct_values(field_name)
                .min(self.plan.distinct_values(other)),
            _ => self.plan.distinct_values(field_name),
        }
    }

    fn schema(&self) -> &Schema {
        self.plan.schema()
    }
}

pub struct ProjectPlan {
    plan: Arc<dyn Plan>,
    schema: Schema,
}

impl ProjectPlan {
    pub fn new(plan: Arc<dyn Plan>, fields: &[String]) -> DbResult<Self> {
        let mut schema = Schema::new();
        for field in fields {
            schema.add(field, plan.schema())?;
        }
        Ok(Self { plan, schema })
    }
}

impl Plan for ProjectPlan {
    fn open(&self) -> DbResult<Box<dyn Scan>> {
        let scan = self.plan.open()?;
        Ok(Box::new(ProjectScan::new(
            scan,
            self.schema.fields().to_vec(),
        )))
    }

    fn blocks_accessed(&self) -> usize {
        self.plan.blocks_accessed()
    }

    fn records_output(&self) -> usize {
        self.plan.records_output()
    }

    fn distinct_values(&self, field_name: &str) -> usize {
        self.plan.distinct_values(field_name)
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

pub struct ProductPlan {
    left: Arc<dyn Plan>,
    right: Arc<dyn Plan>,
    schema: Schema,
}

impl ProductPlan {
    pub fn new(left: Arc<dyn Plan>, right: Arc<dyn Plan>) -> Self {
        let mut schema = left.schema().clone();
        schema.add_all(right.schema());
        Self {
            left,
            right,
            schema,
        }
    }
}

impl Plan for ProductPlan {
    fn open(&self) -> DbResult<Box<dyn Scan>> {
        let left = self.left.open()?;
        let right = self.right.open()?;
        Ok(Box::new(ProductScan::new(left, right)?))
    }

    fn blocks_accessed(&self) -> usize {
        self.left.blocks_accessed().saturating_add(
            self.left
                .records_output()
                .saturating_mul(self.right.blocks_accessed()),
        )
    }

    fn records_output(&self) -> usize {
        self.left
            .records_output()
            .saturating_mul(self.right.records_output())
    }

    fn distinct_values(&self, field_name: &str) -> usize {
        if self.left.schema().has_field(field_name) {
            self.left.distinct_values(field_name)
        } else {
            self.right.distinct_values(field_name)
        }
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}
