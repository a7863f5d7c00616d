pub mod buffer_manager;
pub mod concurrency;
pub mod error;
pub mod file_manager;
pub mod index;
pub mod log_manager;
pub mod materialize;
pub mod metadata;
pub mod multibuffer;
pub mod page;
pub mod parser;
pub mod plan;
pub mod planner;
pub mod query;
pub mod record;
pub mod recovery;
pub mod transaction;

#[cfg(test)]
mod test_utils;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use log::info;
use parking_lot::Mutex;

use crate::{
    buffer_manager::BufferManager,
    concurrency::LockTable,
    file_manager::FileManager,
    log_manager::LogManager,
    metadata::MetadataManager,
    planner::{
        BasicQueryPlanner, BasicUpdatePlanner, HeuristicQueryPlanner, IndexUpdatePlanner,
        Planner,
    },
    recovery::LogRecord,
    transaction::Transaction,
};

pub use error::{DbError, DbResult};
pub use index::IndexKind;
pub use parser::ParserError;
pub use plan::Plan;
pub use planner::PlannerKind;
pub use query::{Constant, Scan, UpdateScan};
pub use record::{FieldType, Layout, Rid, Schema, TableScan};

/// How a database is opened
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub directory: PathBuf,
    pub block_size: usize,
    pub buffer_size: usize,
    pub buffer_max_wait: Duration,
    pub lock_max_wait: Duration,
    pub index_kind: IndexKind,
    pub planner_kind: PlannerKind,
    pub sync_writes: bool,
}

impl DbConfig {
    pub const BLOCK_SIZE: usize = 400;
    pub const BUFFER_SIZE: usize = 8;

    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            block_size: Self::BLOCK_SIZE,
            buffer_size: Self::BUFFER_SIZE,
            buffer_max_wait: BufferManager::MAX_TIME,
            lock_max_wait: LockTable::MAX_TIME,
            index_kind: IndexKind::default(),
            planner_kind: PlannerKind::default(),
            sync_writes: false,
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_buffer_max_wait(mut self, max_wait: Duration) -> Self {
        self.buffer_max_wait = max_wait;
        self
    }

    pub fn with_lock_max_wait(mut self, max_wait: Duration) -> Self {
        self.lock_max_wait = max_wait;
        self
    }

    pub fn with_index_kind(mut self, index_kind: IndexKind) -> Self {
        self.index_kind = index_kind;
        self
    }

    pub fn with_planner_kind(mut self, planner_kind: PlannerKind) -> Self {
        self.planner_kind = planner_kind;
        self
    }

    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }
}

/// The database struct
///
/// Owns the storage layers, the lock table and the catalogs of one directory. Work is
/// done through transactions from [`KeiPyDB::new_tx`] and SQL through [`KeiPyDB::planner`].
pub struct KeiPyDB {
    file_manager: Arc<FileManager>,
    log_manager: Arc<Mutex<LogManager>>,
    buffer_manager: Arc<BufferManager>,
    lock_table: Arc<LockTable>,
    metadata_manager: Arc<MetadataManager>,
    planner: Planner,
    config: DbConfig,
}

impl KeiPyDB {
    const LOG_FILE: &'static str = "keipydb.log";

    pub fn new(
        directory: impl AsRef<Path>,
        block_size: usize,
        buffer_size: usize,
    ) -> DbResult<Self> {
        Self::with_config(
            DbConfig::new(directory)
                .with_block_size(block_size)
                .with_buffer_size(buffer_size),
        )
    }

    /// Open the database in `config.directory`, creating it if needed
    ///
    /// A new directory gets fresh catalogs; an existing one is recovered first.
    pub fn with_config(config: DbConfig) -> DbResult<Self> {
        let file_manager = Arc::new(FileManager::with_sync(
            &config.directory,
            config.block_size,
            config.sync_writes,
        )?);
        let log_manager = Arc::new(Mutex::new(LogManager::new(
            Arc::clone(&file_manager),
            Self::LOG_FILE,
        )?));
        let buffer_manager = Arc::new(BufferManager::with_max_wait(
            Arc::clone(&file_manager),
            Arc::clone(&log_manager),
            config.buffer_size,
            config.buffer_max_wait,
        ));
        let lock_table = Arc::new(LockTable::new(config.lock_max_wait));

        let is_new = file_manager.is_new();
        let tx = Arc::new(Transaction::new(
            Arc::clone(&file_manager),
            Arc::clone(&log_manager),
            Arc::clone(&buffer_manager),
            Arc::clone(&lock_table),
        )?);
        if is_new {
            info!("creating new database in {:?}", config.directory);
        } else {
            info!("recovering existing database in {:?}", config.directory);
            tx.recover()?;
        }
        let metadata_manager = Arc::new(MetadataManager::new(is_new, &tx, config.index_kind)?);
        tx.commit()?;

        let planner = match config.planner_kind {
            PlannerKind::Heuristic => Planner::new(
                Box::new(HeuristicQueryPlanner::new(Arc::clone(&metadata_manager))),
                Box::new(IndexUpdatePlanner::new(Arc::clone(&metadata_manager))),
            ),
            PlannerKind::Basic => Planner::new(
                Box::new(BasicQueryPlanner::new(Arc::clone(&metadata_manager))),
                Box::new(BasicUpdatePlanner::new(Arc::clone(&metadata_manager))),
            ),
        };
        info!(
            "opened {:?} with {} byte blocks, {} buffers, {} indexes, {} planner",
            config.directory,
            config.block_size,
            config.buffer_size,
            config.index_kind,
            config.planner_kind
        );
        Ok(Self {
            file_manager,
            log_manager,
            buffer_manager,
            lock_table,
            metadata_manager,
            planner,
            config,
        })
    }

    pub fn new_tx(&self) -> DbResult<Arc<Transaction>> {
        Ok(Arc::new(Transaction::new(
            Arc::clone(&self.file_manager),
            Arc::clone(&self.log_manager),
            Arc::clone(&self.buffer_manager),
            Arc::clone(&self.lock_table),
        )?))
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    pub fn metadata_manager(&self) -> &Arc<MetadataManager> {
        &self.metadata_manager
    }

    pub fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.buffer_manager
    }

    pub fn file_manager(&self) -> &Arc<FileManager> {
        &self.file_manager
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Write a quiescent checkpoint
    /// Must only be called while no transaction is running; recovery never reads past it
    pub fn checkpoint(&self) -> DbResult<()> {
        self.buffer_manager.flush_all_buffers()?;
        let lsn = LogRecord::Checkpoint.write_log_record(&self.log_manager)?;
        self.log_manager.lock().flush(lsn)?;
        info!("checkpoint written at lsn {lsn}");
        Ok(())
    }
}
