use std::sync::Arc;

use crate::{
    error::{DbError, DbResult},
    metadata::table_manager::{check_name, TableManager, MAX_NAME},
    query::{Scan, UpdateScan},
    record::{Schema, TableScan},
    transaction::Transaction,
};

/// Longest view definition the catalog can hold
pub const MAX_VIEW_DEF: usize = 100;

pub const VIEW_CATALOG: &str = "view_catalog";

/// Stores view definitions as query text in `view_catalog(viewname, viewdef)`
pub struct ViewManager {
    table_manager: Arc<TableManager>,
}

impl ViewManager {
    pub fn new(
        is_new: bool,
        table_manager: Arc<TableManager>,
        tx: &Arc<Transaction>,
    ) -> DbResult<Self> {
        if is_new {
            let mut schema = Schema::new();
            schema.add_string_field("viewname", MAX_NAME);
            schema.add_string_field("viewdef", MAX_VIEW_DEF);
            table_manager.create_table(VIEW_CATALOG, &schema, tx)?;
        }
        Ok(Self { table_manager })
    }

    pub fn create_view(
        &self,
        view_name: &str,
        view_def: &str,
        tx: &Arc<Transaction>,
    ) -> DbResult<()> {
        check_name("view", view_name)?;
        if view_def.len() > MAX_VIEW_DEF {
            return Err(DbError::Schema(format!(
                "definition of view {view_name} is longer than {MAX_VIEW_DEF} bytes"
            )));
        }
        if self.get_view_def(view_name, tx)?.is_some() {
            return Err(DbError::DuplicateName(format!("view {view_name}")));
        }
        let mut scan = self.open_catalog(tx)?;
        scan.insert()?;
        scan.set_string("viewname", view_name)?;
        scan.set_string("viewdef", view_def)?;
        scan.close();
        Ok(())
    }

    /// The stored query text of a view, or `None` when no view has that name
    pub fn get_view_def(
        &self,
        view_name: &str,
        tx: &Arc<Transaction>,
    ) -> DbResult<Option<String>> {
        let mut scan = self.open_catalog(tx)?;
        let mut view_def = None;
        while scan.next()? {
            if scan.get_string("viewname")? == view_name {
                view_def = Some(scan.get_string("viewdef")?);
                break;
            }
        }
        scan.close();
        Ok(view_def)
    }

    fn open_catalog(&self, tx: &Arc<Transaction>) -> DbResult<TableScan> {
        let layout = self.table_manager.get_layout(VIEW_CATALOG, tx)?;
        TableScan::new(Arc::clone(tx), VIEW_CATALOG, layout)
    }
}
