use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use tempfile::TempDir;

use crate::{
    buffer_manager::BufferManager,
    concurrency::LockTable,
    file_manager::FileManager,
    log_manager::LogManager,
    transaction::Transaction,
    DbConfig, KeiPyDB,
};

static FILE_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// A file name no other test in this process uses
pub fn generate_filename() -> String {
    format!("testfile{}", FILE_COUNTER.fetch_add(1, Ordering::SeqCst))
}

/// The storage layers without any catalogs, for tests below the record manager
pub struct TestStorage {
    pub dir: TempDir,
    pub file_manager: Arc<FileManager>,
    pub log_manager: Arc<Mutex<LogManager>>,
    pub buffer_manager: Arc<BufferManager>,
    pub lock_table: Arc<LockTable>,
}

impl TestStorage {
    pub fn new(block_size: usize, num_buffers: usize) -> Self {
        Self::with_lock_wait(block_size, num_buffers, LockTable::MAX_TIME)
    }

    pub fn with_lock_wait(block_size: usize, num_buffers: usize, lock_wait: Duration) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let file_manager = Arc::new(FileManager::new(dir.path(), block_size).unwrap());
        let log_manager = Arc::new(Mutex::new(
            LogManager::new(Arc::clone(&file_manager), "test.log").unwrap(),
        ));
        let buffer_manager = Arc::new(BufferManager::with_max_wait(
            Arc::clone(&file_manager),
            Arc::clone(&log_manager),
            num_buffers,
            Duration::from_secs(5),
        ));
        Self {
            dir,
            file_manager,
            log_manager,
            buffer_manager,
            lock_table: Arc::new(LockTable::new(lock_wait)),
        }
    }

    pub fn new_tx(&self) -> Arc<Transaction> {
        Arc::new(
            Transaction::new(
                Arc::clone(&self.file_manager),
                Arc::clone(&self.log_manager),
                Arc::clone(&self.buffer_manager),
                Arc::clone(&self.lock_table),
            )
            .unwrap(),
        )
    }
}

impl KeiPyDB {
    /// A fresh database in its own temporary directory, dropped together with the directory
    pub fn new_for_test(block_size: usize, num_buffers: usize) -> (Self, TempDir) {
        Self::new_for_test_with(|config| {
            config
                .with_block_size(block_size)
                .with_buffer_size(num_buffers)
        })
    }

    pub fn new_for_test_with(configure: impl FnOnce(DbConfig) -> DbConfig) -> (Self, TempDir) {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let config = configure(DbConfig::new(dir.path().join("db")));
        let db = KeiPyDB::with_config(config).unwrap();
        (db, dir)
    }
}
