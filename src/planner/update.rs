use std::sync::Arc;

use log::warn;

use crate::{
    error::{DbError, DbResult},
    metadata::MetadataManager,
    parser::{
        CreateIndexData, CreateTableData, CreateViewData, DeleteData, InsertData, ModifyData,
    },
    plan::{Plan, SelectPlan, TablePlan},
    planner::UpdatePlanner,
    query::{Constant, Predicate, Scan, UpdateScan},
    record::{FieldType, Layout, TableScan},
    transaction::Transaction,
};

/// Check an insert against the table layout before any row is written
fn check_insert(data: &InsertData, layout: &Layout) -> DbResult<()> {
    if data.fields.len() != data.values.len() {
        return Err(DbError::Schema(format!(
            "insert into {} names {} fields but gives {} values",
            data.table_name,
            data.fields.len(),
            data.values.len()
        )));
    }
    for (field, value) in data.fields.iter().zip(&data.values) {
        let info = layout.schema().info(field)?;
        match (info.field_type, value) {
            (FieldType::Integer, Constant::Int(_)) => {}
            (FieldType::Varchar, Constant::Str(s)) if s.len() <= info.length => {}
            (FieldType::Varchar, Constant::Str(s)) => {
                return Err(DbError::TypeMismatch(format!(
                    "'{s}' is longer than {field} VARCHAR({})",
                    info.length
                )))
            }
            (field_type, value) => {
                return Err(DbError::TypeMismatch(format!(
                    "{value} cannot be stored in {field} ({field_type:?})"
                )))
            }
        }
    }
    Ok(())
}

/// Check that the modified field belongs to the table, even when no row matches
fn check_modify(
    metadata: &MetadataManager,
    data: &ModifyData,
    tx: &Arc<Transaction>,
) -> DbResult<()> {
    let layout = metadata.get_layout(&data.table_name, tx)?;
    if !layout.schema().has_field(&data.field_name) {
        return Err(DbError::FieldNotFound(format!(
            "{}.{}",
            data.table_name, data.field_name
        )));
    }
    Ok(())
}

/// The rows of a table that satisfy `predicate`, opened for update
fn open_matching(
    metadata: &MetadataManager,
    table_name: &str,
    predicate: &Predicate,
    tx: &Arc<Transaction>,
) -> DbResult<Box<dyn Scan>> {
    let table = Arc::new(TablePlan::new(Arc::clone(tx), table_name, metadata)?);
    SelectPlan::new(table, predicate.clone()).open()
}

fn updatable(scan: &mut Box<dyn Scan>) -> DbResult<&mut dyn UpdateScan> {
    scan.as_update().ok_or(DbError::NotUpdatable)
}

fn create_table(
    metadata: &MetadataManager,
    data: &CreateTableData,
    tx: &Arc<Transaction>,
) -> DbResult<usize> {
    metadata.create_table(&data.table_name, &data.schema, tx)?;
    Ok(0)
}

fn create_view(
    metadata: &MetadataManager,
    data: &CreateViewData,
    tx: &Arc<Transaction>,
) -> DbResult<usize> {
    metadata.create_view(&data.view_name, &data.view_def(), tx)?;
    Ok(0)
}

fn create_index(
    metadata: &MetadataManager,
    data: &CreateIndexData,
    tx: &Arc<Transaction>,
) -> DbResult<usize> {
    metadata.create_index(&data.index_name, &data.table_name, &data.field_name, tx)?;
    Ok(0)
}

/// Executes updates against the tables alone
///
/// Indexes on the touched table are not maintained and go stale.
pub struct BasicUpdatePlanner {
    metadata: Arc<MetadataManager>,
}

impl BasicUpdatePlanner {
    pub fn new(metadata: Arc<MetadataManager>) -> Self {
        Self { metadata }
    }

    fn warn_if_indexed(&self, table_name: &str, tx: &Arc<Transaction>) -> DbResult<()> {
        let indexes = self.metadata.get_index_info(table_name, tx)?;
        if !indexes.is_empty() {
            warn!(
                "basic planner leaves {} index(es) on {table_name} stale",
                indexes.len()
            );
        }
        Ok(())
    }
}

impl UpdatePlanner for BasicUpdatePlanner {
    fn execute_insert(&self, data: &InsertData, tx: &Arc<Transaction>) -> DbResult<usize> {
        let layout = self.metadata.get_layout(&data.table_name, tx)?;
        check_insert(data, &layout)?;
        self.warn_if_indexed(&data.table_name, tx)?;
        let mut scan = TableScan::new(Arc::clone(tx), &data.table_name, layout)?;
        scan.insert()?;
        for (field, value) in data.fields.iter().zip(&data.values) {
            scan.set_value(field, value)?;
        }
        scan.close();
        Ok(1)
    }

    fn execute_delete(&self, data: &DeleteData, tx: &Arc<Transaction>) -> DbResult<usize> {
        self.warn_if_indexed(&data.table_name, tx)?;
        let mut scan = open_matching(&self.metadata, &data.table_name, &data.predicate, tx)?;
        let mut count = 0;
        while scan.next()? {
            updatable(&mut scan)?.delete()?;
            count += 1;
        }
        scan.close();
        Ok(count)
    }

    fn execute_modify(&self, data: &ModifyData, tx: &Arc<Transaction>) -> DbResult<usize> {
        check_modify(&self.metadata, data, tx)?;
        self.warn_if_indexed(&data.table_name, tx)?;
        let mut scan = open_matching(&self.metadata, &data.table_name, &data.predicate, tx)?;
        let mut count = 0;
        while scan.next()? {
            let value = data.new_value.evaluate(scan.as_ref())?;
            updatable(&mut scan)?.set_value(&data.field_name, &value)?;
            count += 1;
        }
        scan.close();
        Ok(count)
    }

    fn execute_create_table(
        &self,
        data: &CreateTableData,
        tx: &Arc<Transaction>,
    ) -> DbResult<usize> {
        create_table(&self.metadata, data, tx)
    }

    fn execute_create_view(
        &self,
        data: &CreateViewData,
        tx: &Arc<Transaction>,
    ) -> DbResult<usize> {
        create_view(&self.metadata, data, tx)
    }

    fn execute_create_index(
        &self,
        data: &CreateIndexData,
        tx: &Arc<Transaction>,
    ) -> DbResult<usize> {
        create_index(&self.metadata, data, tx)
    }
}

/// Executes updates and keeps every index of the touched table in step
pub struct IndexUpdatePlanner {
    metadata: Arc<MetadataManager>,
}

impl IndexUpdatePlanner {
    pub fn new(metadata: Arc<MetadataManager>) -> Self {
        Self { metadata }
    }
}

impl UpdatePlanner for IndexUpdatePlanner {
    fn execute_insert(&self, data: &InsertData, tx: &Arc<Transaction>) -> DbResult<usize> {
        let layout = self.metadata.get_layout(&data.table_name, tx)?;
        check_insert(data, &layout)?;
        let indexes = self.metadata.get_index_info(&data.table_name, tx)?;
        let mut scan = TableScan::new(Arc::clone(tx), &data.table_name, layout)?;
        scan.insert()?;
        let rid = scan.get_rid()?;
        for (field, value) in data.fields.iter().zip(&data.values) {
            scan.set_value(field, value)?;
            if let Some(index_info) = indexes.get(field) {
                let mut index = index_info.open()?;
                index.insert(value, rid)?;
                index.close();
            }
        }
        scan.close();
        Ok(1)
    }

    fn execute_delete(&self, data: &DeleteData, tx: &Arc<Transaction>) -> DbResult<usize> {
        let indexes = self.metadata.get_index_info(&data.table_name, tx)?;
        let mut scan = open_matching(&self.metadata, &data.table_name, &data.predicate, tx)?;
        let mut count = 0;
        while scan.next()? {
            let rid = updatable(&mut scan)?.get_rid()?;
            for (field, index_info) in &indexes {
                let value = scan.get_value(field)?;
                let mut index = index_info.open()?;
                index.delete(&value, rid)?;
                index.close();
            }
            updatable(&mut scan)?.delete()?;
            count += 1;
        }
        scan.close();
        Ok(count)
    }

    fn execute_modify(&self, data: &ModifyData, tx: &Arc<Transaction>) -> DbResult<usize> {
        check_modify(&self.metadata, data, tx)?;
        let index_info = self
            .metadata
            .get_index_info(&data.table_name, tx)?
            .remove(&data.field_name);
        let mut scan = open_matching(&self.metadata, &data.table_name, &data.predicate, tx)?;
        let mut count = 0;
        while scan.next()? {
            let new_value = data.new_value.evaluate(scan.as_ref())?;
            let old_value = scan.get_value(&data.field_name)?;
            let update_scan = updatable(&mut scan)?;
            update_scan.set_value(&data.field_name, &new_value)?;
            if let Some(index_info) = &index_info {
                let rid = update_scan.get_rid()?;
                let mut index = index_info.open()?;
                index.delete(&old_value, rid)?;
                index.insert(&new_value, rid)?;
                index.close();
            }
            count += 1;
        }
        scan.close();
        Ok(count)
    }

    fn execute_create_table(
        &self,
        data: &CreateTableData,
        tx: &Arc<Transaction>,
    ) -> DbResult<usize> {
        create_table(&self.metadata, data, tx)
    }

    fn execute_create_view(
        &self,
        data: &CreateViewData,
        tx: &Arc<Transaction>,
    ) -> DbResult<usize> {
        create_view(&self.metadata, data, tx)
    }

    fn execute_create_index(
        &self,
        data: &CreateIndexData,
        tx: &Arc<Transaction>,
    ) -> DbResult<usize> {
        create_index(&self.metadata, data, tx)
    }
}
