use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use crate::{
    error::DbResult,
    record::{Layout, Schema, TableScan},
    transaction::Transaction,
};

static NEXT_TABLE_NUM: AtomicUsize = AtomicUsize::new(0);

/// A table with a process-unique `temp<N>` name, never entered in the catalog
///
/// Files named `temp*` are deleted when a database is opened.
#[derive(Clone)]
pub struct TempTable {
    tx: Arc<Transaction>,
    table_name: String,
    layout: Layout,
}

impl TempTable {
    pub fn new(tx: Arc<Transaction>, schema: Schema) -> Self {
        let table_name = format!("temp{}", NEXT_TABLE_NUM.fetch_add(1, Ordering::SeqCst) + 1);
        Self {
            tx,
            table_name,
            layout: Layout::new(schema),
        }
    }

    pub fn open(&self) -> DbResult<TableScan> {
        TableScan::new(Arc::clone(&self.tx), &self.table_name, self.layout.clone())
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }
}
