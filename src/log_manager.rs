use std::sync::Arc;

use crate::{
    error::{DbError, DbResult},
    file_manager::{BlockId, FileManager},
    page::Page,
};

/// Log sequence number handed out by [`LogManager::append`]
pub type Lsn = usize;

/// Walks the log newest-first: backwards through each block, then down one block
pub struct LogIterator {
    file_manager: Arc<FileManager>,
    current_block: BlockId,
    page: Page,
    current_pos: usize,
}

impl LogIterator {
    fn new(file_manager: Arc<FileManager>, current_block: BlockId) -> DbResult<Self> {
        let page = Page::new(file_manager.block_size());
        let mut iter = Self {
            file_manager,
            current_block,
            page,
            current_pos: 0,
        };
        iter.move_to_block()?;
        Ok(iter)
    }

    fn move_to_block(&mut self) -> DbResult<()> {
        self.file_manager.read(&self.current_block, &mut self.page)?;
        self.current_pos = self.page.get_int(0) as usize;
        Ok(())
    }

    fn next_record(&mut self) -> DbResult<Option<Vec<u8>>> {
        while self.current_pos >= self.file_manager.block_size() {
            if self.current_block.block_num == 0 {
                return Ok(None); //  no more blocks
            }
            self.current_block = BlockId::new(
                self.current_block.filename.clone(),
                self.current_block.block_num - 1,
            );
            self.move_to_block()?;
        }
        let record = self.page.get_bytes(self.current_pos);
        self.current_pos += Page::INT_BYTES + record.len();
        Ok(Some(record))
    }
}

impl Iterator for LogIterator {
    type Item = DbResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Append-only log, packed from the end of each block towards its start
///
/// The first four bytes of every log block hold the boundary: the offset of the most
/// recently written record. Free space is everything between the header and the boundary.
#[derive(Debug)]
pub struct LogManager {
    file_manager: Arc<FileManager>,
    log_file: String,
    log_page: Page,
    current_block: BlockId,
    latest_lsn: Lsn,
    last_saved_lsn: Lsn,
}

impl LogManager {
    pub fn new(file_manager: Arc<FileManager>, log_file: &str) -> DbResult<Self> {
        let mut log_page = Page::new(file_manager.block_size());
        let log_size = file_manager.length(log_file)?;
        let current_block = if log_size == 0 {
            LogManager::append_new_block(&file_manager, log_file, &mut log_page)?
        } else {
            let block = BlockId::new(log_file.to_string(), log_size - 1);
            file_manager.read(&block, &mut log_page)?;
            block
        };
        Ok(Self {
            file_manager,
            log_file: log_file.to_string(),
            log_page,
            current_block,
            latest_lsn: 0,
            last_saved_lsn: 0,
        })
    }

    /// Determine if this LSN has been flushed to disk, and flush it if it hasn't
    pub fn flush(&mut self, lsn: Lsn) -> DbResult<()> {
        if lsn >= self.last_saved_lsn {
            self.flush_to_disk()?;
        }
        Ok(())
    }

    pub fn last_saved_lsn(&self) -> Lsn {
        self.last_saved_lsn
    }

    pub fn latest_lsn(&self) -> Lsn {
        self.latest_lsn
    }

    /// Write the bytes from log_page to disk for the current_block
    /// Update the last_saved_lsn before returning
    fn flush_to_disk(&mut self) -> DbResult<()> {
        self.file_manager.write(&self.current_block, &self.log_page)?;
        self.last_saved_lsn = self.latest_lsn;
        Ok(())
    }

    /// Write the log_record to the log page, moving to a fresh block if it doesn't fit
    pub fn append(&mut self, log_record: &[u8]) -> DbResult<Lsn> {
        let mut boundary = self.log_page.get_int(0) as usize;
        let bytes_needed = log_record.len() + Page::INT_BYTES;
        let block_size = self.file_manager.block_size();
        if bytes_needed + Page::INT_BYTES > block_size {
            return Err(DbError::InvalidLogRecord(format!(
                "a {} byte record does not fit in a {block_size} byte log block",
                log_record.len()
            )));
        }
        if boundary.saturating_sub(bytes_needed) < Page::INT_BYTES {
            self.flush_to_disk()?;
            self.current_block = LogManager::append_new_block(
                &self.file_manager,
                &self.log_file,
                &mut self.log_page,
            )?;
            boundary = self.log_page.get_int(0) as usize;
        }

        let record_pos = boundary - bytes_needed;
        self.log_page.set_bytes(record_pos, log_record);
        self.log_page.set_int(0, record_pos as i32);
        self.latest_lsn += 1;
        Ok(self.latest_lsn)
    }

    /// Append a new block to the log file
    /// This involves initializing a new block, writing a boundary pointer to it and writing the block to disk
    fn append_new_block(
        file_manager: &Arc<FileManager>,
        log_file: &str,
        log_page: &mut Page,
    ) -> DbResult<BlockId> {
        let block_id = file_manager.append(log_file)?;
        *log_page = Page::new(file_manager.block_size());
        log_page.set_int(0, file_manager.block_size() as i32);
        file_manager.write(&block_id, log_page)?;
        Ok(block_id)
    }

    pub fn iterator(&mut self) -> DbResult<LogIterator> {
        self.flush_to_disk()?;
        LogIterator::new(
            Arc::clone(&self.file_manager),
            BlockId::new(self.log_file.clone(), self.current_block.block_num),
        )
    }
}
