use std::sync::Arc;

use crate::{
    error::DbResult,
    materialize::{copy_record, TempTable},
    plan::Plan,
    query::Scan,
    record::{Layout, Schema},
    transaction::Transaction,
};

/// Saves the output of its child into a temp table so it can be re-read cheaply
pub struct MaterializePlan {
    tx: Arc<Transaction>,
    plan: Arc<dyn Plan>,
}

impl MaterializePlan {
    pub fn new(tx: Arc<Transaction>, plan: Arc<dyn Plan>) -> Self {
        Self { tx, plan }
    }

    /// Run the child to completion and copy every row into a new temp table
    pub fn materialize(&self) -> DbResult<TempTable> {
        let schema = self.plan.schema();
        let temp = TempTable::new(Arc::clone(&self.tx), schema.clone());
        let mut src = self.plan.open()?;
        let mut dest = temp.open()?;
        while src.next()? {
            copy_record(src.as_ref(), &mut dest, schema)?;
        }
        src.close();
        dest.close();
        Ok(temp)
    }
}

impl Plan for MaterializePlan {
    fn open(&self) -> DbResult<Box<dyn Scan>> {
        let temp = self.materialize()?;
        Ok(Box::new(temp.open()?))
    }

    /// Only the cost of reading the temp table back; writing it is paid once up front
    fn blocks_accessed(&self) -> usize {
        let layout = Layout::new(self.plan.schema().clone());
        let records_per_block = (self.tx.block_size() / layout.slot_size()).max(1);
        self.plan.records_output().div_ceil(records_per_block)
    }

    fn records_output(&self) -> usize {
        self.plan.records_output()
    }

    fn distinct_values(&self, field_name: &str) -> usize {
        self.plan.distinct_values(field_name)
    }

    fn schema(&self) -> &Schema {
        self.plan.schema()
    }
}
