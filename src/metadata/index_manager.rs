use std::{collections::HashMap, sync::Arc};

use log::info;

use crate::{
    error::{DbError, DbResult},
    index::{entry_layout, BTreeIndex, HashIndex, Index, IndexKind},
    metadata::{
        table_manager::{check_name, MAX_NAME},
        StatInfo, StatManager, TableManager,
    },
    query::{Scan, UpdateScan},
    record::{Layout, Schema, TableScan},
    transaction::Transaction,
};

pub const INDEX_CATALOG: &str = "index_catalog";

/// What the planner needs to know about one index: how to open it and what using it costs
#[derive(Clone)]
pub struct IndexInfo {
    index_name: String,
    field_name: String,
    tx: Arc<Transaction>,
    index_layout: Layout,
    stat_info: StatInfo,
    kind: IndexKind,
}

impl IndexInfo {
    pub fn new(
        index_name: &str,
        field_name: &str,
        table_schema: &Schema,
        tx: Arc<Transaction>,
        stat_info: StatInfo,
        kind: IndexKind,
    ) -> DbResult<Self> {
        let info = table_schema.info(field_name)?;
        Ok(Self {
            index_name: index_name.to_string(),
            field_name: field_name.to_string(),
            tx,
            index_layout: entry_layout(info.field_type, info.length),
            stat_info,
            kind,
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn open(&self) -> DbResult<Box<dyn Index>> {
        let tx = Arc::clone(&self.tx);
        let layout = self.index_layout.clone();
        let index: Box<dyn Index> = match self.kind {
            IndexKind::BTree => Box::new(BTreeIndex::new(tx, &self.index_name, layout)?),
            IndexKind::Hash => Box::new(HashIndex::new(tx, &self.index_name, layout)),
        };
        Ok(index)
    }

    /// Blocks read by one lookup, estimated from the size of the indexed table
    pub fn blocks_accessed(&self) -> usize {
        let records_per_block = (self.tx.block_size() / self.index_layout.slot_size()).max(1);
        let num_blocks = self.stat_info.records_output() / records_per_block;
        match self.kind {
            IndexKind::BTree => BTreeIndex::search_cost(num_blocks, records_per_block),
            IndexKind::Hash => HashIndex::search_cost(num_blocks, records_per_block),
        }
    }

    /// Rows per lookup: the table size divided by the number of distinct keys
    pub fn records_output(&self) -> usize {
        self.stat_info.records_output() / self.stat_info.distinct_values(&self.field_name).max(1)
    }

    pub fn distinct_values(&self, field_name: &str) -> usize {
        if self.field_name == field_name {
            1
        } else {
            self.stat_info.distinct_values(&self.field_name)
        }
    }
}

/// Records indexes in `index_catalog(indexname, tablename, fieldname)` and builds them
pub struct IndexManager {
    table_manager: Arc<TableManager>,
    stat_manager: Arc<StatManager>,
    kind: IndexKind,
}

impl IndexManager {
    pub fn new(
        is_new: bool,
        table_manager: Arc<TableManager>,
        stat_manager: Arc<StatManager>,
        kind: IndexKind,
        tx: &Arc<Transaction>,
    ) -> DbResult<Self> {
        if is_new {
            let mut schema = Schema::new();
            schema.add_string_field("indexname", MAX_NAME);
            schema.add_string_field("tablename", MAX_NAME);
            schema.add_string_field("fieldname", MAX_NAME);
            table_manager.create_table(INDEX_CATALOG, &schema, tx)?;
        }
        Ok(Self {
            table_manager,
            stat_manager,
            kind,
        })
    }

    /// Enter the index in the catalog and fill it from the rows already in the table
    pub fn create_index(
        &self,
        index_name: &str,
        table_name: &str,
        field_name: &str,
        tx: &Arc<Transaction>,
    ) -> DbResult<()> {
        check_name("index", index_name)?;
        if !self.catalog_rows(tx, |name, _| name == index_name)?.is_empty() {
            return Err(DbError::DuplicateName(format!("index {index_name}")));
        }
        let layout = self.table_manager.get_layout(table_name, tx)?;
        if !layout.schema().has_field(field_name) {
            return Err(DbError::FieldNotFound(format!("{table_name}.{field_name}")));
        }
        let info = layout.schema().info(field_name)?;
        let leaf_layout = entry_layout(info.field_type, info.length);
        if self.kind == IndexKind::BTree && !BTreeIndex::fits_block(&leaf_layout, tx.block_size()) {
            return Err(DbError::Schema(format!(
                "{table_name}.{field_name} is too wide for a btree index on {} byte blocks",
                tx.block_size()
            )));
        }

        let mut catalog = self.open_catalog(tx)?;
        catalog.insert()?;
        catalog.set_string("indexname", index_name)?;
        catalog.set_string("tablename", table_name)?;
        catalog.set_string("fieldname", field_name)?;
        catalog.close();

        let index_info = self.index_info(index_name, table_name, field_name, &layout, tx)?;
        let mut index = index_info.open()?;
        let mut scan = TableScan::new(Arc::clone(tx), table_name, layout)?;
        let mut entries = 0;
        while scan.next()? {
            let rid = scan.get_rid()?;
            index.insert(&scan.get_value(field_name)?, rid)?;
            entries += 1;
        }
        scan.close();
        index.close();
        info!(
            "created {} index {index_name} on {table_name}({field_name}) with {entries} entries",
            self.kind
        );
        Ok(())
    }

    /// The indexes of a table, keyed by indexed field
    pub fn get_index_info(
        &self,
        table_name: &str,
        tx: &Arc<Transaction>,
    ) -> DbResult<HashMap<String, IndexInfo>> {
        let entries = self.catalog_rows(tx, |_, table| table == table_name)?;
        if entries.is_empty() {
            return Ok(HashMap::new());
        }
        let layout = self.table_manager.get_layout(table_name, tx)?;
        entries
            .into_iter()
            .map(|(index_name, _, field_name)| {
                let index_info =
                    self.index_info(&index_name, table_name, &field_name, &layout, tx)?;
                Ok((field_name, index_info))
            })
            .collect()
    }

    pub fn get_index_by_name(
        &self,
        index_name: &str,
        tx: &Arc<Transaction>,
    ) -> DbResult<IndexInfo> {
        let (_, table_name, field_name) = self
            .catalog_rows(tx, |name, _| name == index_name)?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::IndexNotFound(index_name.to_string()))?;
        let layout = self.table_manager.get_layout(&table_name, tx)?;
        self.index_info(index_name, &table_name, &field_name, &layout, tx)
    }

    fn index_info(
        &self,
        index_name: &str,
        table_name: &str,
        field_name: &str,
        layout: &Layout,
        tx: &Arc<Transaction>,
    ) -> DbResult<IndexInfo> {
        let stat_info = self.stat_manager.get_stat_info(table_name, layout, tx)?;
        IndexInfo::new(
            index_name,
            field_name,
            layout.schema(),
            Arc::clone(tx),
            stat_info,
            self.kind,
        )
    }

    /// The `(index, table, field)` catalog rows accepted by `keep`, given index and table name
    fn catalog_rows(
        &self,
        tx: &Arc<Transaction>,
        keep: impl Fn(&str, &str) -> bool,
    ) -> DbResult<Vec<(String, String, String)>> {
        let mut catalog = self.open_catalog(tx)?;
        let mut rows = vec![];
        while catalog.next()? {
            let index_name = catalog.get_string("indexname")?;
            let table_name = catalog.get_string("tablename")?;
            if keep(&index_name, &table_name) {
                rows.push((index_name, table_name, catalog.get_string("fieldname")?));
            }
        }
        catalog.close();
        Ok(rows)
    }

    fn open_catalog(&self, tx: &Arc<Transaction>) -> DbResult<TableScan> {
        let layout = self.table_manager.get_layout(INDEX_CATALOG, tx)?;
        TableScan::new(Arc::clone(tx), INDEX_CATALOG, layout)
    }
}
