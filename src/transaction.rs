use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use log::debug;
use parking_lot::Mutex;

use crate::{
    buffer_manager::{Buffer, BufferManager},
    concurrency::{ConcurrencyManager, LockTable},
    error::{DbError, DbResult},
    file_manager::{BlockId, FileManager},
    log_manager::LogManager,
    recovery::{RecoveryManager, TransactionOperations},
};

pub type TxId = usize;

/// Hands out transaction ids in a monotonically increasing fashion, shared by the whole process
static NEXT_TX_ID: AtomicUsize = AtomicUsize::new(1);

fn next_tx_id() -> TxId {
    NEXT_TX_ID.fetch_add(1, Ordering::SeqCst)
}

/// Wrapper for the value contained in the hash map of the [`BufferList`]
struct HashMapValue {
    buffer: Arc<Mutex<Buffer>>,
    count: usize,
}

/// A wrapper to maintain the list of [`Buffer`] being used by the [`Transaction`]
/// Each block remembers how many times this transaction pinned it
struct BufferList {
    buffers: Mutex<HashMap<BlockId, HashMapValue>>,
    buffer_manager: Arc<BufferManager>,
}

impl BufferList {
    fn new(buffer_manager: Arc<BufferManager>) -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            buffer_manager,
        }
    }

    /// Get the buffer associated with the provided block_id
    fn get_buffer(&self, block_id: &BlockId) -> Option<Arc<Mutex<Buffer>>> {
        self.buffers
            .lock()
            .get(block_id)
            .map(|v| Arc::clone(&v.buffer))
    }

    /// Pin the buffer associated with the provided [`BlockId`]
    fn pin(&self, block_id: &BlockId) -> DbResult<()> {
        let mut buffers = self.buffers.lock();
        if let Some(v) = buffers.get_mut(block_id) {
            let buffer = self.buffer_manager.pin(block_id)?;
            debug_assert!(Arc::ptr_eq(&buffer, &v.buffer));
            v.count += 1;
            return Ok(());
        }
        let buffer = self.buffer_manager.pin(block_id)?;
        buffers.insert(block_id.clone(), HashMapValue { buffer, count: 1 });
        Ok(())
    }

    /// Unpin one pin of the buffer associated with the provided [`BlockId`]
    /// Blocks this list does not track are ignored
    fn unpin(&self, block_id: &BlockId) {
        let mut buffers = self.buffers.lock();
        let Some(v) = buffers.get_mut(block_id) else {
            return;
        };
        self.buffer_manager.unpin(&v.buffer);
        v.count -= 1;
        if v.count == 0 {
            buffers.remove(block_id);
        }
    }

    /// Unpin every pin held through this [`BufferList`]
    fn unpin_all(&self) {
        let mut buffers = self.buffers.lock();
        for v in buffers.values() {
            for _ in 0..v.count {
                self.buffer_manager.unpin(&v.buffer);
            }
        }
        buffers.clear();
    }

    fn pin_count(&self, block_id: &BlockId) -> usize {
        self.buffers.lock().get(block_id).map_or(0, |v| v.count)
    }
}

/// A unit of work against the database
///
/// Every read takes a shared lock and every write an exclusive one; both are held until
/// [`Transaction::commit`] or [`Transaction::rollback`]. Writes are logged with their
/// before-image unless the caller asks otherwise.
pub struct Transaction {
    file_manager: Arc<FileManager>,
    buffer_manager: Arc<BufferManager>,
    recovery_manager: RecoveryManager,
    concurrency_manager: ConcurrencyManager,
    buffer_list: BufferList,
    tx_id: TxId,
}

impl Transaction {
    pub fn new(
        file_manager: Arc<FileManager>,
        log_manager: Arc<Mutex<LogManager>>,
        buffer_manager: Arc<BufferManager>,
        lock_table: Arc<LockTable>,
    ) -> DbResult<Self> {
        let tx_id = next_tx_id();
        let recovery_manager =
            RecoveryManager::new(tx_id, log_manager, Arc::clone(&buffer_manager))?;
        debug!("transaction {tx_id} started");
        Ok(Self {
            file_manager,
            recovery_manager,
            concurrency_manager: ConcurrencyManager::new(lock_table),
            buffer_list: BufferList::new(Arc::clone(&buffer_manager)),
            buffer_manager,
            tx_id,
        })
    }

    pub fn tx_id(&self) -> TxId {
        self.tx_id
    }

    /// Commit this transaction
    /// This will write all data associated with this transaction out to disk and append a commit record to the WAL
    /// It will release all locks that are currently held by this transaction and unpin its buffers
    pub fn commit(&self) -> DbResult<()> {
        self.recovery_manager.commit()?;
        self.concurrency_manager.release();
        self.buffer_list.unpin_all();
        debug!("transaction {} committed", self.tx_id);
        Ok(())
    }

    /// Rollback this transaction
    /// This will undo all operations performed by this transaction and append a rollback record to the WAL
    pub fn rollback(&self) -> DbResult<()> {
        self.recovery_manager.rollback(self)?;
        self.concurrency_manager.release();
        self.buffer_list.unpin_all();
        debug!("transaction {} rolled back", self.tx_id);
        Ok(())
    }

    /// Recover the database on start-up or after a crash
    pub fn recover(&self) -> DbResult<()> {
        self.recovery_manager.recover(self)?;
        self.concurrency_manager.release();
        self.buffer_list.unpin_all();
        Ok(())
    }

    /// Pin this [`BlockId`] to be used in this transaction
    pub fn pin(&self, block_id: &BlockId) -> DbResult<()> {
        self.buffer_list.pin(block_id)
    }

    /// Unpin this [`BlockId`] since it is no longer needed by this transaction
    pub fn unpin(&self, block_id: &BlockId) {
        self.buffer_list.unpin(block_id);
    }

    fn pinned_buffer(&self, block_id: &BlockId) -> DbResult<Arc<Mutex<Buffer>>> {
        self.buffer_list
            .get_buffer(block_id)
            .ok_or_else(|| DbError::NotPinned(block_id.clone()))
    }

    /// Get an integer value in a [`Buffer`] associated with this transaction
    pub fn get_int(&self, block_id: &BlockId, offset: usize) -> DbResult<i32> {
        self.concurrency_manager.slock(block_id)?;
        let buffer = self.pinned_buffer(block_id)?;
        let guard = buffer.lock();
        Ok(guard.contents().get_int(offset))
    }

    /// Get a string value in a [`Buffer`] associated with this transaction
    pub fn get_string(&self, block_id: &BlockId, offset: usize) -> DbResult<String> {
        self.concurrency_manager.slock(block_id)?;
        let buffer = self.pinned_buffer(block_id)?;
        let guard = buffer.lock();
        Ok(guard.contents().get_string(offset))
    }

    /// Set an integer value in a [`Buffer`] associated with this transaction
    pub fn set_int(&self, block_id: &BlockId, offset: usize, value: i32, log: bool) -> DbResult<()> {
        self.concurrency_manager.xlock(block_id)?;
        let buffer = self.pinned_buffer(block_id)?;
        let mut guard = buffer.lock();
        let lsn = if log {
            Some(self.recovery_manager.set_int(&guard, offset)?)
        } else {
            None
        };
        guard.contents_mut().set_int(offset, value);
        guard.set_modified(self.tx_id, lsn);
        Ok(())
    }

    /// Set a string value in a [`Buffer`] associated with this transaction
    pub fn set_string(
        &self,
        block_id: &BlockId,
        offset: usize,
        value: &str,
        log: bool,
    ) -> DbResult<()> {
        self.concurrency_manager.xlock(block_id)?;
        let buffer = self.pinned_buffer(block_id)?;
        let mut guard = buffer.lock();
        let lsn = if log {
            Some(self.recovery_manager.set_string(&guard, offset)?)
        } else {
            None
        };
        guard.contents_mut().set_string(offset, value);
        guard.set_modified(self.tx_id, lsn);
        Ok(())
    }

    /// Get the available buffers for this transaction
    pub fn available_buffers(&self) -> usize {
        self.buffer_manager.available()
    }

    /// Get the size of this file in blocks
    /// The shared lock on the end-of-file sentinel keeps concurrent appends out
    pub fn size(&self, file_name: &str) -> DbResult<usize> {
        self.concurrency_manager
            .slock(&BlockId::end_of_file(file_name))?;
        self.file_manager.length(file_name)
    }

    /// Append a block to the file
    pub fn append(&self, file_name: &str) -> DbResult<BlockId> {
        self.concurrency_manager
            .xlock(&BlockId::end_of_file(file_name))?;
        self.file_manager.append(file_name)
    }

    pub fn block_size(&self) -> usize {
        self.file_manager.block_size()
    }
}

impl TransactionOperations for Transaction {
    fn pin(&self, block_id: &BlockId) -> DbResult<()> {
        Transaction::pin(self, block_id)
    }

    fn unpin(&self, block_id: &BlockId) {
        Transaction::unpin(self, block_id);
    }

    fn set_int(&self, block_id: &BlockId, offset: usize, val: i32, log: bool) -> DbResult<()> {
        Transaction::set_int(self, block_id, offset, val, log)
    }

    fn set_string(&self, block_id: &BlockId, offset: usize, val: &str, log: bool) -> DbResult<()> {
        Transaction::set_string(self, block_id, offset, val, log)
    }
}

#[cfg(test)]
mod transaction_tests {
    use std::{sync::Arc, thread::JoinHandle, time::Duration};

    use crate::{
        error::DbError,
        file_manager::BlockId,
        test_utils::{generate_filename, TestStorage},
    };

    #[test]
    fn test_transaction_single_threaded() {
        let storage = TestStorage::new(512, 3);
        let block_id = BlockId::new(generate_filename(), 1);

        //  Start a transaction t1 that will set an int and a string
        let t1 = storage.new_tx();
        t1.pin(&block_id).unwrap();
        t1.set_int(&block_id, 80, 1, false).unwrap();
        t1.set_string(&block_id, 40, "one", false).unwrap();
        t1.commit().unwrap();

        //  t2 sees the committed values of t1 and logs its own changes
        let t2 = storage.new_tx();
        t2.pin(&block_id).unwrap();
        assert_eq!(t2.get_int(&block_id, 80).unwrap(), 1);
        assert_eq!(t2.get_string(&block_id, 40).unwrap(), "one");
        t2.set_int(&block_id, 80, 2, true).unwrap();
        t2.set_string(&block_id, 40, "two", true).unwrap();
        t2.commit().unwrap();

        //  t3 changes the values again but rolls back
        let t3 = storage.new_tx();
        t3.pin(&block_id).unwrap();
        assert_eq!(t3.get_int(&block_id, 80).unwrap(), 2);
        assert_eq!(t3.get_string(&block_id, 40).unwrap(), "two");
        t3.set_int(&block_id, 80, 3, true).unwrap();
        t3.set_string(&block_id, 40, "three", true).unwrap();
        t3.rollback().unwrap();

        //  t4 should see the result of t2 since t3 rolled back
        let t4 = storage.new_tx();
        t4.pin(&block_id).unwrap();
        assert_eq!(t4.get_int(&block_id, 80).unwrap(), 2);
        assert_eq!(t4.get_string(&block_id, 40).unwrap(), "two");
        t4.commit().unwrap();

        assert_eq!(storage.buffer_manager.available(), 3);
    }

    #[test]
    fn test_unpinned_access_fails() {
        let storage = TestStorage::new(400, 3);
        let tx = storage.new_tx();
        let block_id = BlockId::new(generate_filename(), 0);
        assert!(matches!(
            tx.get_int(&block_id, 0),
            Err(DbError::NotPinned(_))
        ));
        //  unpinning something never pinned is harmless
        tx.unpin(&block_id);
        tx.commit().unwrap();
    }

    #[test]
    fn test_commit_unpins_every_pin() {
        let storage = TestStorage::new(400, 4);
        let tx = storage.new_tx();
        let block_id = BlockId::new(generate_filename(), 0);
        tx.pin(&block_id).unwrap();
        tx.pin(&block_id).unwrap();
        assert_eq!(tx.buffer_list.pin_count(&block_id), 2);
        assert_eq!(storage.buffer_manager.available(), 3);
        tx.unpin(&block_id);
        assert_eq!(storage.buffer_manager.available(), 3);
        tx.pin(&block_id).unwrap();
        tx.commit().unwrap();
        assert_eq!(storage.buffer_manager.available(), 4);
        assert_eq!(tx.buffer_list.pin_count(&block_id), 0);
    }

    #[test]
    fn test_size_and_append() {
        let storage = TestStorage::new(400, 3);
        let filename = generate_filename();
        let tx = storage.new_tx();
        assert_eq!(tx.size(&filename).unwrap(), 0);
        let block = tx.append(&filename).unwrap();
        assert_eq!(block.block_num, 0);
        assert_eq!(tx.size(&filename).unwrap(), 1);
        tx.commit().unwrap();
    }

    #[test]
    fn test_writer_blocks_reader_until_commit() {
        let storage = TestStorage::with_lock_wait(400, 4, Duration::from_millis(50));
        let block_id = BlockId::new(generate_filename(), 0);

        let writer = storage.new_tx();
        writer.pin(&block_id).unwrap();
        writer.set_int(&block_id, 0, 9, true).unwrap();

        let reader = storage.new_tx();
        reader.pin(&block_id).unwrap();
        assert!(matches!(
            reader.get_int(&block_id, 0),
            Err(DbError::LockAbort(_))
        ));
        reader.rollback().unwrap();

        writer.commit().unwrap();
        let reader = storage.new_tx();
        reader.pin(&block_id).unwrap();
        assert_eq!(reader.get_int(&block_id, 0).unwrap(), 9);
        reader.commit().unwrap();
    }

    #[test]
    fn test_transaction_multi_threaded_multiple_readers_single_writer() {
        let storage = Arc::new(TestStorage::new(512, 10));
        let block_id = BlockId::new(generate_filename(), 1);

        let reader_threads = 10;
        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        for _ in 0..reader_threads {
            let storage = Arc::clone(&storage);
            let bid = block_id.clone();
            handles.push(std::thread::spawn(move || {
                let txn = storage.new_tx();
                txn.pin(&bid).unwrap();
                txn.get_int(&bid, 80).unwrap();
                txn.get_string(&bid, 40).unwrap();
                txn.commit().unwrap();
            }));
        }

        let txn = storage.new_tx();
        txn.pin(&block_id).unwrap();
        txn.set_int(&block_id, 80, 1, false).unwrap();
        txn.set_string(&block_id, 40, "Hello", false).unwrap();
        txn.commit().unwrap();

        handles
            .into_iter()
            .for_each(|handle| handle.join().unwrap());

        let txn = storage.new_tx();
        txn.pin(&block_id).unwrap();
        assert_eq!(txn.get_int(&block_id, 80).unwrap(), 1);
        assert_eq!(txn.get_string(&block_id, 40).unwrap(), "Hello");
        txn.commit().unwrap();
    }
}
