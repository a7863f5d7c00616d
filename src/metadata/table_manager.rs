use std::{collections::HashMap, sync::Arc};

use crate::{
    error::{DbError, DbResult},
    query::{Scan, UpdateScan},
    record::{FieldType, Layout, Schema, TableScan},
    transaction::Transaction,
};

/// Longest table, view, index or field name the catalogs can hold
pub const MAX_NAME: usize = 16;

/// Bytes of a log block a SET_STRING record needs besides the old string itself: the
/// block boundary, the record length, the opcode, tx, file name, block and offset
pub const LOG_RECORD_OVERHEAD: usize = 64;

/// Longest VARCHAR whose undo record still fits in one log block
pub fn max_varchar_length(block_size: usize) -> usize {
    block_size.saturating_sub(LOG_RECORD_OVERHEAD)
}

pub const TABLE_CATALOG: &str = "table_catalog";
pub const FIELD_CATALOG: &str = "field_catalog";

/// Reject names the catalogs cannot store
pub(crate) fn check_name(kind: &str, name: &str) -> DbResult<()> {
    if name.is_empty() || name.len() > MAX_NAME {
        return Err(DbError::Schema(format!(
            "{kind} name '{name}' must be 1 to {MAX_NAME} bytes"
        )));
    }
    Ok(())
}

/// Stores table schemas in two catalog tables
///
/// `table_catalog(tblname, slotsize)` has one row per table and
/// `field_catalog(tblname, fldname, type, length, offset)` one row per field, in
/// declaration order. Both catalogs describe themselves.
pub struct TableManager {
    table_catalog_layout: Layout,
    field_catalog_layout: Layout,
}

impl TableManager {
    pub fn new(is_new: bool, tx: &Arc<Transaction>) -> DbResult<Self> {
        let mut table_catalog_schema = Schema::new();
        table_catalog_schema.add_string_field("tblname", MAX_NAME);
        table_catalog_schema.add_int_field("slotsize");

        let mut field_catalog_schema = Schema::new();
        field_catalog_schema.add_string_field("tblname", MAX_NAME);
        field_catalog_schema.add_string_field("fldname", MAX_NAME);
        field_catalog_schema.add_int_field("type");
        field_catalog_schema.add_int_field("length");
        field_catalog_schema.add_int_field("offset");

        let manager = Self {
            table_catalog_layout: Layout::new(table_catalog_schema.clone()),
            field_catalog_layout: Layout::new(field_catalog_schema.clone()),
        };
        if is_new {
            manager.create_table(TABLE_CATALOG, &table_catalog_schema, tx)?;
            manager.create_table(FIELD_CATALOG, &field_catalog_schema, tx)?;
        }
        Ok(manager)
    }

    pub fn create_table(
        &self,
        table_name: &str,
        schema: &Schema,
        tx: &Arc<Transaction>,
    ) -> DbResult<()> {
        check_name("table", table_name)?;
        if schema.fields().is_empty() {
            return Err(DbError::Schema(format!("table {table_name} has no fields")));
        }
        for field in schema.fields() {
            check_name("field", field)?;
        }
        if self.table_exists(table_name, tx)? {
            return Err(DbError::DuplicateName(format!("table {table_name}")));
        }
        let max_length = max_varchar_length(tx.block_size());
        for field in schema.fields() {
            let info = schema.info(field)?;
            if info.field_type == FieldType::Varchar && info.length > max_length {
                return Err(DbError::Schema(format!(
                    "{table_name}.{field} VARCHAR({}) is longer than the {max_length} bytes \
                     a {} byte block allows",
                    info.length,
                    tx.block_size()
                )));
            }
        }
        let layout = Layout::new(schema.clone());
        if layout.slot_size() > tx.block_size() {
            return Err(DbError::Schema(format!(
                "a {table_name} record needs {} bytes but a block holds {}",
                layout.slot_size(),
                tx.block_size()
            )));
        }

        let mut table_catalog = self.open_table_catalog(tx)?;
        table_catalog.insert()?;
        table_catalog.set_string("tblname", table_name)?;
        table_catalog.set_int("slotsize", layout.slot_size() as i32)?;
        table_catalog.close();

        let mut field_catalog = self.open_field_catalog(tx)?;
        for field in schema.fields() {
            let info = schema.info(field)?;
            field_catalog.insert()?;
            field_catalog.set_string("tblname", table_name)?;
            field_catalog.set_string("fldname", field)?;
            field_catalog.set_int("type", info.field_type as i32)?;
            field_catalog.set_int("length", info.length as i32)?;
            field_catalog.set_int("offset", layout.offset(field)? as i32)?;
        }
        field_catalog.close();
        Ok(())
    }

    pub fn table_exists(&self, table_name: &str, tx: &Arc<Transaction>) -> DbResult<bool> {
        Ok(self.slot_size(table_name, tx)?.is_some())
    }

    /// Rebuild a table's layout from its catalog rows
    pub fn get_layout(&self, table_name: &str, tx: &Arc<Transaction>) -> DbResult<Layout> {
        let slot_size = self
            .slot_size(table_name, tx)?
            .ok_or_else(|| DbError::TableNotFound(table_name.to_string()))?;

        let mut schema = Schema::new();
        let mut offsets = HashMap::new();
        let mut field_catalog = self.open_field_catalog(tx)?;
        while field_catalog.next()? {
            if field_catalog.get_string("tblname")? != table_name {
                continue;
            }
            let field = field_catalog.get_string("fldname")?;
            let field_type = FieldType::try_from(field_catalog.get_int("type")?)?;
            let length = field_catalog.get_int("length")? as usize;
            let offset = field_catalog.get_int("offset")? as usize;
            schema.add_field(&field, field_type, length);
            offsets.insert(field, offset);
        }
        field_catalog.close();
        Ok(Layout::from_parts(schema, offsets, slot_size))
    }

    /// Every table in the catalog, the catalogs themselves included, in creation order
    pub fn table_names(&self, tx: &Arc<Transaction>) -> DbResult<Vec<String>> {
        let mut names = vec![];
        let mut table_catalog = self.open_table_catalog(tx)?;
        while table_catalog.next()? {
            names.push(table_catalog.get_string("tblname")?);
        }
        table_catalog.close();
        Ok(names)
    }

    fn slot_size(&self, table_name: &str, tx: &Arc<Transaction>) -> DbResult<Option<usize>> {
        let mut table_catalog = self.open_table_catalog(tx)?;
        let mut found = None;
        while table_catalog.next()? {
            if table_catalog.get_string("tblname")? == table_name {
                found = Some(table_catalog.get_int("slotsize")? as usize);
                break;
            }
        }
        table_catalog.close();
        Ok(found)
    }

    fn open_table_catalog(&self, tx: &Arc<Transaction>) -> DbResult<TableScan> {
        TableScan::new(Arc::clone(tx), TABLE_CATALOG, self.table_catalog_layout.clone())
    }

    fn open_field_catalog(&self, tx: &Arc<Transaction>) -> DbResult<TableScan> {
        TableScan::new(Arc::clone(tx), FIELD_CATALOG, self.field_catalog_layout.clone())
    }
}

#[cfg(test)]
mod table_manager_tests {
    use crate::{
        error::DbError,
        metadata::table_manager::{
            max_varchar_length, TableManager, FIELD_CATALOG, TABLE_CATALOG,
        },
        record::{FieldType, Layout, Schema},
        test_utils::TestStorage,
    };

    #[test]
    fn test_create_table_and_get_layout() {
        let storage = TestStorage::new(400, 8);
        let tx = storage.new_tx();
        let manager = TableManager::new(true, &tx).unwrap();

        let mut schema = Schema::new();
        schema.add_int_field("a");
        schema.add_string_field("b", 9);
        manager.create_table("mytable", &schema, &tx).unwrap();

        let layout = manager.get_layout("mytable", &tx).unwrap();
        assert_eq!(layout, Layout::new(schema));
        assert_eq!(layout.slot_size(), 21);
        assert_eq!(layout.offset("b").unwrap(), 8);
        assert_eq!(layout.schema().field_type("b").unwrap(), FieldType::Varchar);
        assert_eq!(layout.schema().length("b").unwrap(), 9);

        let catalog = manager.get_layout(FIELD_CATALOG, &tx).unwrap();
        assert_eq!(
            catalog.schema().fields(),
            ["tblname", "fldname", "type", "length", "offset"]
        );
        assert_eq!(
            manager.table_names(&tx).unwrap(),
            [TABLE_CATALOG, FIELD_CATALOG, "mytable"]
        );
        tx.commit().unwrap();
    }

    #[test]
    fn test_catalog_errors() {
        let storage = TestStorage::new(400, 8);
        let tx = storage.new_tx();
        let manager = TableManager::new(true, &tx).unwrap();
        let mut schema = Schema::new();
        schema.add_int_field("a");
        manager.create_table("t", &schema, &tx).unwrap();

        assert!(matches!(
            manager.create_table("t", &schema, &tx),
            Err(DbError::DuplicateName(_))
        ));
        assert!(matches!(
            manager.create_table("a_name_that_is_too_long", &schema, &tx),
            Err(DbError::Schema(_))
        ));
        assert!(matches!(
            manager.create_table("empty", &Schema::new(), &tx),
            Err(DbError::Schema(_))
        ));
        assert!(matches!(
            manager.get_layout("missing", &tx),
            Err(DbError::TableNotFound(_))
        ));
        tx.commit().unwrap();
    }

    #[test]
    fn test_records_must_fit_a_block() {
        let storage = TestStorage::new(400, 8);
        let tx = storage.new_tx();
        let manager = TableManager::new(true, &tx).unwrap();
        assert_eq!(max_varchar_length(400), 336);

        let mut too_long = Schema::new();
        too_long.add_string_field("s", 400);
        assert!(matches!(
            manager.create_table("w", &too_long, &tx),
            Err(DbError::Schema(_))
        ));

        //  every field fits alone, the record does not
        let mut too_wide = Schema::new();
        for field in ["a", "b", "c"] {
            too_wide.add_string_field(field, 200);
        }
        assert!(matches!(
            manager.create_table("wide", &too_wide, &tx),
            Err(DbError::Schema(_))
        ));
        assert!(!manager.table_exists("w", &tx).unwrap());
        assert!(!manager.table_exists("wide", &tx).unwrap());

        let mut widest = Schema::new();
        widest.add_string_field("s", 336);
        manager.create_table("widest", &widest, &tx).unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn test_catalog_survives_reopen() {
        let storage = TestStorage::new(400, 8);
        let tx = storage.new_tx();
        let manager = TableManager::new(true, &tx).unwrap();
        let mut schema = Schema::new();
        schema.add_string_field("name", 10);
        manager.create_table("people", &schema, &tx).unwrap();
        tx.commit().unwrap();

        let tx = storage.new_tx();
        let manager = TableManager::new(false, &tx).unwrap();
        assert!(manager.table_exists("people", &tx).unwrap());
        assert_eq!(manager.get_layout("people", &tx).unwrap().slot_size(), 18);
        tx.commit().unwrap();
    }
}
