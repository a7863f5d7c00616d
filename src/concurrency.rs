use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::{
    error::{DbError, DbResult},
    file_manager::BlockId,
};

const EXCLUSIVE: i32 = -1;

/// Shared by every transaction of a database to keep track of block locks
///
/// Each entry is either a positive count of shared holders or `-1` for a single
/// exclusive holder. Waiters give up after `max_wait`, which is the only deadlock
/// handling there is.
#[derive(Debug)]
pub struct LockTable {
    locks: Mutex<HashMap<BlockId, i32>>,
    cond_var: Condvar,
    max_wait: Duration,
}

impl LockTable {
    pub const MAX_TIME: Duration = Duration::from_secs(10);

    pub fn new(max_wait: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            cond_var: Condvar::new(),
            max_wait,
        }
    }

    /// Acquire a shared lock on a [`BlockId`], waiting while someone holds it exclusively
    pub fn lock_shared(&self, block_id: &BlockId) -> DbResult<()> {
        let deadline = Instant::now() + self.max_wait;
        let mut locks = self.locks.lock();
        while locks.get(block_id) == Some(&EXCLUSIVE) {
            if Instant::now() >= deadline {
                warn!("lock abort: shared lock on {block_id} timed out");
                return Err(DbError::LockAbort(block_id.clone()));
            }
            debug!("waiting for a shared lock on {block_id}");
            self.cond_var.wait_until(&mut locks, deadline);
        }
        *locks.entry(block_id.clone()).or_insert(0) += 1;
        Ok(())
    }

    /// Upgrade the caller's shared lock on a [`BlockId`] to an exclusive one
    ///
    /// The caller must already hold a shared lock, so the wait lasts while anyone else
    /// holds one too.
    pub fn lock_exclusive(&self, block_id: &BlockId) -> DbResult<()> {
        let deadline = Instant::now() + self.max_wait;
        let mut locks = self.locks.lock();
        while Self::has_other_locks(&locks, block_id) {
            if Instant::now() >= deadline {
                warn!("lock abort: exclusive lock on {block_id} timed out");
                return Err(DbError::LockAbort(block_id.clone()));
            }
            debug!("waiting for an exclusive lock on {block_id}");
            self.cond_var.wait_until(&mut locks, deadline);
        }
        locks.insert(block_id.clone(), EXCLUSIVE);
        Ok(())
    }

    /// Release one hold on the block
    ///
    /// Waiters are woken on every release since a pending upgrade only needs the
    /// share count to drop to one.
    pub fn unlock(&self, block_id: &BlockId) {
        let mut locks = self.locks.lock();
        match locks.get_mut(block_id) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                locks.remove(block_id);
            }
            None => return,
        }
        self.cond_var.notify_all();
    }

    fn has_other_locks(locks: &HashMap<BlockId, i32>, block_id: &BlockId) -> bool {
        match locks.get(block_id) {
            Some(&count) => count == EXCLUSIVE || count > 1,
            None => false,
        }
    }

    #[cfg(test)]
    fn state(&self, block_id: &BlockId) -> Option<i32> {
        self.locks.lock().get(block_id).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    Shared,
    Exclusive,
}

/// The per-transaction view of the [`LockTable`]: which blocks it holds and in which mode
#[derive(Debug)]
pub struct ConcurrencyManager {
    lock_table: Arc<LockTable>,
    locks: Mutex<HashMap<BlockId, LockType>>,
}

impl ConcurrencyManager {
    pub fn new(lock_table: Arc<LockTable>) -> Self {
        Self {
            lock_table,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a shared lock on a [`BlockId`] for the associated [`Transaction`](crate::transaction::Transaction)
    pub fn slock(&self, block_id: &BlockId) -> DbResult<()> {
        let mut locks = self.locks.lock();
        if locks.contains_key(block_id) {
            return Ok(());
        }
        self.lock_table.lock_shared(block_id)?;
        locks.insert(block_id.clone(), LockType::Shared);
        Ok(())
    }

    /// Acquire an exclusive lock on a [`BlockId`]
    /// If no lock is held yet, a [`LockType::Shared`] is taken first and then upgraded
    pub fn xlock(&self, block_id: &BlockId) -> DbResult<()> {
        let mut locks = self.locks.lock();
        match locks.get(block_id) {
            Some(LockType::Exclusive) => return Ok(()),
            Some(LockType::Shared) => {}
            None => {
                self.lock_table.lock_shared(block_id)?;
                locks.insert(block_id.clone(), LockType::Shared);
            }
        }
        self.lock_table.lock_exclusive(block_id)?;
        locks.insert(block_id.clone(), LockType::Exclusive);
        Ok(())
    }

    /// Release all locks held by the transaction
    pub fn release(&self) {
        let mut locks = self.locks.lock();
        for block in locks.keys() {
            self.lock_table.unlock(block);
        }
        locks.clear();
    }

    pub fn lock_type(&self, block_id: &BlockId) -> Option<LockType> {
        self.locks.lock().get(block_id).copied()
    }
}

#[cfg(test)]
mod lock_table_tests {
    use std::{sync::Arc, thread, time::Duration};

    use crate::{
        concurrency::{ConcurrencyManager, LockTable, LockType},
        error::DbError,
        file_manager::BlockId,
        test_utils::generate_filename,
    };

    #[test]
    fn test_basic_shared_lock() {
        let lock_table = LockTable::new(LockTable::MAX_TIME);
        let block_id = BlockId::new(generate_filename(), 1);

        lock_table.lock_shared(&block_id).unwrap();
        lock_table.lock_shared(&block_id).unwrap();
        assert_eq!(lock_table.state(&block_id), Some(2));

        lock_table.unlock(&block_id);
        assert_eq!(lock_table.state(&block_id), Some(1));
        lock_table.unlock(&block_id);
        assert_eq!(lock_table.state(&block_id), None);
    }

    #[test]
    fn test_exclusive_blocks_shared() {
        let lock_table = Arc::new(LockTable::new(Duration::from_millis(20)));
        let block_id = BlockId::new(generate_filename(), 1);

        lock_table.lock_shared(&block_id).unwrap();
        lock_table.lock_exclusive(&block_id).unwrap();
        assert_eq!(lock_table.state(&block_id), Some(-1));

        let lt = Arc::clone(&lock_table);
        let bid = block_id.clone();
        let result = thread::spawn(move || lt.lock_shared(&bid)).join().unwrap();
        assert!(matches!(result, Err(DbError::LockAbort(_))));

        lock_table.unlock(&block_id);
        lock_table.lock_shared(&block_id).unwrap();
    }

    #[test]
    fn test_upgrade_waits_for_other_sharers() {
        let lock_table = Arc::new(LockTable::new(Duration::from_secs(5)));
        let block_id = BlockId::new(generate_filename(), 1);
        let (tx, rx) = std::sync::mpsc::channel::<&'static str>();

        //  two sharers
        lock_table.lock_shared(&block_id).unwrap();
        lock_table.lock_shared(&block_id).unwrap();

        let lt = Arc::clone(&lock_table);
        let bid = block_id.clone();
        let upgrader = thread::spawn(move || {
            tx.send("acquiring").unwrap();
            lt.lock_exclusive(&bid).unwrap();
            tx.send("acquired").unwrap();
        });

        assert_eq!(rx.recv().unwrap(), "acquiring");
        thread::sleep(Duration::from_millis(20));
        assert!(rx.try_recv().is_err());

        //  the other sharer leaves and the upgrade goes through
        lock_table.unlock(&block_id);
        assert_eq!(rx.recv().unwrap(), "acquired");
        upgrader.join().unwrap();
        assert_eq!(lock_table.state(&block_id), Some(-1));
    }

    #[test]
    fn test_lone_holder_upgrades_immediately() {
        let lock_table = LockTable::new(Duration::from_millis(10));
        let block_id = BlockId::new(generate_filename(), 0);
        lock_table.lock_shared(&block_id).unwrap();
        lock_table.lock_exclusive(&block_id).unwrap();
    }

    #[test]
    fn test_concurrency_manager_release_only_own_locks() {
        let lock_table = Arc::new(LockTable::new(Duration::from_millis(20)));
        let a = BlockId::new(generate_filename(), 0);
        let b = BlockId::new(generate_filename(), 0);

        let cm_1 = ConcurrencyManager::new(Arc::clone(&lock_table));
        let cm_2 = ConcurrencyManager::new(Arc::clone(&lock_table));
        cm_1.slock(&a).unwrap();
        cm_1.slock(&a).unwrap();
        cm_2.slock(&a).unwrap();
        cm_1.xlock(&b).unwrap();
        assert_eq!(cm_1.lock_type(&b), Some(LockType::Exclusive));
        assert_eq!(lock_table.state(&a), Some(2));

        //  b is exclusive to cm_1
        assert!(matches!(cm_2.slock(&b), Err(DbError::LockAbort(_))));

        cm_1.release();
        assert_eq!(lock_table.state(&a), Some(1));
        assert_eq!(lock_table.state(&b), None);
        assert_eq!(cm_1.lock_type(&a), None);
        cm_2.xlock(&a).unwrap();
        cm_2.release();
        assert_eq!(lock_table.state(&a), None);
    }
}
