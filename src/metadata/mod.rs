pub mod index_manager;
pub mod stat_manager;
pub mod table_manager;
pub mod view_manager;

use std::{collections::HashMap, sync::Arc};

use crate::{
    error::{DbError, DbResult},
    index::IndexKind,
    record::{Layout, Schema},
    transaction::Transaction,
};

pub use index_manager::{IndexInfo, IndexManager};
pub use stat_manager::{StatInfo, StatManager};
pub use table_manager::TableManager;
pub use view_manager::ViewManager;

/// The catalogs of one database behind a single interface
///
/// Tables and views share one namespace.
pub struct MetadataManager {
    table_manager: Arc<TableManager>,
    view_manager: ViewManager,
    stat_manager: Arc<StatManager>,
    index_manager: IndexManager,
}

impl MetadataManager {
    pub fn new(is_new: bool, tx: &Arc<Transaction>, index_kind: IndexKind) -> DbResult<Self> {
        let table_manager = Arc::new(TableManager::new(is_new, tx)?);
        let view_manager = ViewManager::new(is_new, Arc::clone(&table_manager), tx)?;
        let stat_manager = Arc::new(StatManager::new(Arc::clone(&table_manager)));
        let index_manager = IndexManager::new(
            is_new,
            Arc::clone(&table_manager),
            Arc::clone(&stat_manager),
            index_kind,
            tx,
        )?;
        Ok(Self {
            table_manager,
            view_manager,
            stat_manager,
            index_manager,
        })
    }

    pub fn create_table(
        &self,
        table_name: &str,
        schema: &Schema,
        tx: &Arc<Transaction>,
    ) -> DbResult<()> {
        if self.view_manager.get_view_def(table_name, tx)?.is_some() {
            return Err(DbError::DuplicateName(format!("view {table_name}")));
        }
        self.table_manager.create_table(table_name, schema, tx)
    }

    pub fn get_layout(&self, table_name: &str, tx: &Arc<Transaction>) -> DbResult<Layout> {
        self.table_manager.get_layout(table_name, tx)
    }

    /// Tables created by users, without the catalogs
    pub fn table_names(&self, tx: &Arc<Transaction>) -> DbResult<Vec<String>> {
        let catalogs = [
            table_manager::TABLE_CATALOG,
            table_manager::FIELD_CATALOG,
            view_manager::VIEW_CATALOG,
            index_manager::INDEX_CATALOG,
        ];
        Ok(self
            .table_manager
            .table_names(tx)?
            .into_iter()
            .filter(|name| !catalogs.contains(&name.as_str()))
            .collect())
    }

    pub fn create_view(
        &self,
        view_name: &str,
        view_def: &str,
        tx: &Arc<Transaction>,
    ) -> DbResult<()> {
        if self.table_manager.table_exists(view_name, tx)? {
            return Err(DbError::DuplicateName(format!("table {view_name}")));
        }
        self.view_manager.create_view(view_name, view_def, tx)
    }

    pub fn get_view_def(
        &self,
        view_name: &str,
        tx: &Arc<Transaction>,
    ) -> DbResult<Option<String>> {
        self.view_manager.get_view_def(view_name, tx)
    }

    pub fn create_index(
        &self,
        index_name: &str,
        table_name: &str,
        field_name: &str,
        tx: &Arc<Transaction>,
    ) -> DbResult<()> {
        self.index_manager
            .create_index(index_name, table_name, field_name, tx)
    }

    pub fn get_index_info(
        &self,
        table_name: &str,
        tx: &Arc<Transaction>,
    ) -> DbResult<HashMap<String, IndexInfo>> {
        self.index_manager.get_index_info(table_name, tx)
    }

    pub fn get_index_by_name(
        &self,
        index_name: &str,
        tx: &Arc<Transaction>,
    ) -> DbResult<IndexInfo> {
        self.index_manager.get_index_by_name(index_name, tx)
    }

    pub fn get_stat_info(
        &self,
        table_name: &str,
        layout: &Layout,
        tx: &Arc<Transaction>,
    ) -> DbResult<StatInfo> {
        self.stat_manager.get_stat_info(table_name, layout, tx)
    }

    pub fn refresh_statistics(&self, tx: &Arc<Transaction>) -> DbResult<()> {
        self.stat_manager.refresh_statistics(tx)
    }
}
