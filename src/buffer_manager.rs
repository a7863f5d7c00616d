use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::{
    error::{DbError, DbResult},
    file_manager::{BlockId, FileManager},
    log_manager::{LogManager, Lsn},
    page::Page,
    transaction::TxId,
};

/// A frame of the buffer pool: one page plus the block it currently holds
#[derive(Debug)]
pub struct Buffer {
    file_manager: Arc<FileManager>,
    log_manager: Arc<Mutex<LogManager>>,
    contents: Page,
    block_id: Option<BlockId>,
    pins: usize,
    txn: Option<TxId>,
    lsn: Option<Lsn>,
}

impl Buffer {
    fn new(file_manager: Arc<FileManager>, log_manager: Arc<Mutex<LogManager>>) -> Self {
        let size = file_manager.block_size();
        Self {
            file_manager,
            log_manager,
            contents: Page::new(size),
            block_id: None,
            pins: 0,
            txn: None,
            lsn: None,
        }
    }

    pub fn contents(&self) -> &Page {
        &self.contents
    }

    pub fn contents_mut(&mut self) -> &mut Page {
        &mut self.contents
    }

    pub fn block_id(&self) -> Option<&BlockId> {
        self.block_id.as_ref()
    }

    /// The transaction that last modified this frame, if the frame is dirty
    pub fn modifying_tx(&self) -> Option<TxId> {
        self.txn
    }

    pub fn lsn(&self) -> Option<Lsn> {
        self.lsn
    }

    /// Mark that this buffer has been modified and set associated metadata for the modifying transaction
    /// An unlogged write passes `None` and keeps the LSN of the last logged one
    pub fn set_modified(&mut self, txn_num: TxId, lsn: Option<Lsn>) {
        self.txn = Some(txn_num);
        if let Some(lsn) = lsn {
            self.lsn = Some(lsn);
        }
    }

    /// Check whether the buffer is pinned in memory
    pub fn is_pinned(&self) -> bool {
        self.pins > 0
    }

    /// Modify this buffer to hold the contents of a different block
    /// This requires flushing the existing page contents, if any, to disk if dirty
    fn assign_to_block(&mut self, block_id: &BlockId) -> DbResult<()> {
        self.flush()?;
        self.block_id = None;
        self.file_manager.read(block_id, &mut self.contents)?;
        self.block_id = Some(block_id.clone());
        self.pins = 0;
        Ok(())
    }

    /// Write the current buffer contents to disk if dirty
    /// The log is forced up to this frame's LSN before the page goes out
    fn flush(&mut self) -> DbResult<()> {
        if self.txn.is_none() {
            return Ok(());
        }
        if let Some(lsn) = self.lsn {
            self.log_manager.lock().flush(lsn)?;
        }
        if let Some(block_id) = &self.block_id {
            self.file_manager.write(block_id, &self.contents)?;
        }
        self.txn = None;
        Ok(())
    }

    fn pin(&mut self) {
        self.pins += 1;
    }

    fn unpin(&mut self) {
        debug_assert!(self.pins > 0);
        self.pins = self.pins.saturating_sub(1);
    }
}

/// The buffer pool
///
/// `num_available` doubles as the pool mutex: every pin, unpin and flush runs while it
/// is held, and waiters for a free frame sleep on `cond`.
#[derive(Debug)]
pub struct BufferManager {
    buffer_pool: Vec<Arc<Mutex<Buffer>>>,
    num_available: Mutex<usize>,
    cond: Condvar,
    max_wait: Duration,
}

impl BufferManager {
    pub const MAX_TIME: Duration = Duration::from_secs(100);

    pub fn new(
        file_manager: Arc<FileManager>,
        log_manager: Arc<Mutex<LogManager>>,
        num_buffers: usize,
    ) -> Self {
        Self::with_max_wait(file_manager, log_manager, num_buffers, Self::MAX_TIME)
    }

    pub fn with_max_wait(
        file_manager: Arc<FileManager>,
        log_manager: Arc<Mutex<LogManager>>,
        num_buffers: usize,
        max_wait: Duration,
    ) -> Self {
        let buffer_pool = (0..num_buffers)
            .map(|_| {
                Arc::new(Mutex::new(Buffer::new(
                    Arc::clone(&file_manager),
                    Arc::clone(&log_manager),
                )))
            })
            .collect();
        Self {
            buffer_pool,
            num_available: Mutex::new(num_buffers),
            cond: Condvar::new(),
            max_wait,
        }
    }

    /// Returns the number of unpinned buffers, that is buffers with no pages pinned to them
    pub fn available(&self) -> usize {
        *self.num_available.lock()
    }

    /// Flushes the dirty buffers modified by this specific transaction
    pub fn flush_all(&self, txn_num: TxId) -> DbResult<()> {
        let _pool = self.num_available.lock();
        for buffer in &self.buffer_pool {
            let mut buffer = buffer.lock();
            if buffer.txn == Some(txn_num) {
                buffer.flush()?;
            }
        }
        Ok(())
    }

    /// Flushes every dirty buffer regardless of which transaction modified it
    pub fn flush_all_buffers(&self) -> DbResult<()> {
        let _pool = self.num_available.lock();
        for buffer in &self.buffer_pool {
            buffer.lock().flush()?;
        }
        Ok(())
    }

    /// Pin the buffer associated with the provided block_id
    /// It depends on [`BufferManager::try_to_pin`] to get a buffer back
    /// Once the buffer has been retrieved, it will handle metadata operations
    pub fn pin(&self, block_id: &BlockId) -> DbResult<Arc<Mutex<Buffer>>> {
        let deadline = Instant::now() + self.max_wait;
        let mut num_available = self.num_available.lock();
        loop {
            if let Some(buffer) = self.try_to_pin(block_id)? {
                {
                    let mut buffer_guard = buffer.lock();
                    if !buffer_guard.is_pinned() {
                        *num_available -= 1;
                    }
                    buffer_guard.pin();
                }
                return Ok(buffer);
            }
            if Instant::now() >= deadline {
                warn!("buffer abort: no unpinned frame for {block_id}");
                return Err(DbError::BufferAbort(block_id.clone()));
            }
            debug!("waiting for a free buffer to pin {block_id}");
            self.cond.wait_until(&mut num_available, deadline);
        }
    }

    /// Find a buffer to pin this block to
    /// First check to see if there is an existing buffer for this block
    /// If not, try to find an unpinned buffer and evict whatever it holds
    fn try_to_pin(&self, block_id: &BlockId) -> DbResult<Option<Arc<Mutex<Buffer>>>> {
        if let Some(buffer) = self.find_existing_buffer(block_id) {
            return Ok(Some(buffer));
        }
        match self.choose_unpinned_buffer() {
            Some(buffer) => {
                {
                    let mut buffer_guard = buffer.lock();
                    if let Some(old) = &buffer_guard.block_id {
                        debug!("evicting {old} to make room for {block_id}");
                    }
                    buffer_guard.assign_to_block(block_id)?;
                }
                Ok(Some(buffer))
            }
            None => Ok(None),
        }
    }

    /// Decrement the pin count for the provided buffer
    /// If all of the pins have been removed, managed metadata & notify waiting threads
    pub fn unpin(&self, buffer: &Arc<Mutex<Buffer>>) {
        let mut num_available = self.num_available.lock();
        let mut buffer_guard = buffer.lock();
        buffer_guard.unpin();
        if !buffer_guard.is_pinned() {
            *num_available += 1;
            self.cond.notify_all();
        }
    }

    /// Look for a buffer associated with this specific [`BlockId`]
    fn find_existing_buffer(&self, block_id: &BlockId) -> Option<Arc<Mutex<Buffer>>> {
        self.buffer_pool
            .iter()
            .find(|buffer| buffer.lock().block_id.as_ref() == Some(block_id))
            .map(Arc::clone)
    }

    /// Try to find an unpinned buffer and return pointer to that, if present
    fn choose_unpinned_buffer(&self) -> Option<Arc<Mutex<Buffer>>> {
        self.buffer_pool
            .iter()
            .find(|buffer| !buffer.lock().is_pinned())
            .map(Arc::clone)
    }

    #[cfg(test)]
    fn unpinned_frames(&self) -> usize {
        self.buffer_pool
            .iter()
            .filter(|buffer| !buffer.lock().is_pinned())
            .count()
    }
}
