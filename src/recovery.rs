use std::{collections::HashSet, fmt::Display, sync::Arc};

use log::info;
use parking_lot::Mutex;

use crate::{
    buffer_manager::{Buffer, BufferManager},
    error::{DbError, DbResult},
    file_manager::BlockId,
    log_manager::{LogManager, Lsn},
    page::Page,
    transaction::TxId,
};

/// What the recovery manager needs from its transaction to undo a logged change
///
/// The [`RecoveryManager`] is owned by the [`Transaction`](crate::transaction::Transaction),
/// so rather than storing a back-reference the transaction hands itself in through this
/// trait whenever rollback or recovery runs.
pub trait TransactionOperations {
    fn pin(&self, block_id: &BlockId) -> DbResult<()>;
    fn unpin(&self, block_id: &BlockId);
    fn set_int(&self, block_id: &BlockId, offset: usize, val: i32, log: bool) -> DbResult<()>;
    fn set_string(&self, block_id: &BlockId, offset: usize, val: &str, log: bool)
        -> DbResult<()>;
}

/// The container for all the different types of log records that are written to the WAL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Checkpoint,
    Start(TxId),
    Commit(TxId),
    Rollback(TxId),
    SetInt {
        txnum: TxId,
        block_id: BlockId,
        offset: usize,
        old_val: i32,
    },
    SetString {
        txnum: TxId,
        block_id: BlockId,
        offset: usize,
        old_val: String,
    },
}

impl Display for LogRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogRecord::Checkpoint => write!(f, "<CHECKPOINT>"),
            LogRecord::Start(txnum) => write!(f, "<START {txnum}>"),
            LogRecord::Commit(txnum) => write!(f, "<COMMIT {txnum}>"),
            LogRecord::Rollback(txnum) => write!(f, "<ROLLBACK {txnum}>"),
            LogRecord::SetInt {
                txnum,
                block_id,
                offset,
                old_val,
            } => write!(f, "<SETINT {txnum} {block_id} {offset} {old_val}>"),
            LogRecord::SetString {
                txnum,
                block_id,
                offset,
                old_val,
            } => write!(f, "<SETSTRING {txnum} {block_id} {offset} {old_val}>"),
        }
    }
}

impl TryFrom<&[u8]> for LogRecord {
    type Error = DbError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() < Page::INT_BYTES {
            return Err(DbError::InvalidLogRecord(format!(
                "record of {} bytes has no opcode",
                value.len()
            )));
        }
        let page = Page::from_bytes(value.to_vec());
        let mut pos = 0;
        let discriminant = page.get_int(pos);
        pos += Page::INT_BYTES;

        let record = match discriminant {
            Self::CHECKPOINT => LogRecord::Checkpoint,
            Self::START => LogRecord::Start(page.get_int(pos) as TxId),
            Self::COMMIT => LogRecord::Commit(page.get_int(pos) as TxId),
            Self::ROLLBACK => LogRecord::Rollback(page.get_int(pos) as TxId),
            Self::SET_INT | Self::SET_STRING => {
                let txnum = page.get_int(pos) as TxId;
                pos += Page::INT_BYTES;
                let filename = page.get_string(pos);
                pos += Page::max_length(filename.len());
                let block_num = page.get_int(pos) as usize;
                pos += Page::INT_BYTES;
                let offset = page.get_int(pos) as usize;
                pos += Page::INT_BYTES;
                let block_id = BlockId::new(filename, block_num);
                if discriminant == Self::SET_INT {
                    LogRecord::SetInt {
                        txnum,
                        block_id,
                        offset,
                        old_val: page.get_int(pos),
                    }
                } else {
                    LogRecord::SetString {
                        txnum,
                        block_id,
                        offset,
                        old_val: page.get_string(pos),
                    }
                }
            }
            other => {
                return Err(DbError::InvalidLogRecord(format!("unknown opcode {other}")));
            }
        };
        Ok(record)
    }
}

impl LogRecord {
    pub const CHECKPOINT: i32 = 0;
    pub const START: i32 = 1;
    pub const COMMIT: i32 = 2;
    pub const ROLLBACK: i32 = 3;
    pub const SET_INT: i32 = 4;
    pub const SET_STRING: i32 = 5;

    fn calculate_size(&self) -> usize {
        let base_size = Page::INT_BYTES;
        match self {
            LogRecord::Checkpoint => base_size,
            LogRecord::Start(_) | LogRecord::Commit(_) | LogRecord::Rollback(_) => {
                base_size + Page::INT_BYTES
            }
            LogRecord::SetInt { block_id, .. } => {
                base_size
                    + Page::INT_BYTES
                    + Page::max_length(block_id.filename.len())
                    + 3 * Page::INT_BYTES
            }
            LogRecord::SetString {
                block_id, old_val, ..
            } => {
                base_size
                    + Page::INT_BYTES
                    + Page::max_length(block_id.filename.len())
                    + 2 * Page::INT_BYTES
                    + Page::max_length(old_val.len())
            }
        }
    }

    /// Get the opcode written in front of the record
    pub fn discriminant(&self) -> i32 {
        match self {
            LogRecord::Checkpoint => Self::CHECKPOINT,
            LogRecord::Start(_) => Self::START,
            LogRecord::Commit(_) => Self::COMMIT,
            LogRecord::Rollback(_) => Self::ROLLBACK,
            LogRecord::SetInt { .. } => Self::SET_INT,
            LogRecord::SetString { .. } => Self::SET_STRING,
        }
    }

    /// Get the transaction number associated with this log record
    pub fn tx_num(&self) -> Option<TxId> {
        match self {
            LogRecord::Checkpoint => None,
            LogRecord::Start(txnum)
            | LogRecord::Commit(txnum)
            | LogRecord::Rollback(txnum)
            | LogRecord::SetInt { txnum, .. }
            | LogRecord::SetString { txnum, .. } => Some(*txnum),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut page = Page::new(self.calculate_size());
        let mut pos = 0;
        page.set_int(pos, self.discriminant());
        pos += Page::INT_BYTES;
        match self {
            LogRecord::Checkpoint => {}
            LogRecord::Start(txnum) | LogRecord::Commit(txnum) | LogRecord::Rollback(txnum) => {
                page.set_int(pos, *txnum as i32);
            }
            LogRecord::SetInt {
                txnum,
                block_id,
                offset,
                ..
            }
            | LogRecord::SetString {
                txnum,
                block_id,
                offset,
                ..
            } => {
                page.set_int(pos, *txnum as i32);
                pos += Page::INT_BYTES;
                page.set_string(pos, &block_id.filename);
                pos += Page::max_length(block_id.filename.len());
                page.set_int(pos, block_id.block_num as i32);
                pos += Page::INT_BYTES;
                page.set_int(pos, *offset as i32);
                pos += Page::INT_BYTES;
                match self {
                    LogRecord::SetInt { old_val, .. } => page.set_int(pos, *old_val),
                    LogRecord::SetString { old_val, .. } => page.set_string(pos, old_val),
                    _ => {}
                }
            }
        }
        page.contents
    }

    /// Undo the operation performed by this log record
    /// Only the two update records carry a before-image, everything else is a no-op
    pub fn undo(&self, tx: &dyn TransactionOperations) -> DbResult<()> {
        match self {
            LogRecord::SetInt {
                block_id,
                offset,
                old_val,
                ..
            } => {
                tx.pin(block_id)?;
                let result = tx.set_int(block_id, *offset, *old_val, false);
                tx.unpin(block_id);
                result
            }
            LogRecord::SetString {
                block_id,
                offset,
                old_val,
                ..
            } => {
                tx.pin(block_id)?;
                let result = tx.set_string(block_id, *offset, old_val, false);
                tx.unpin(block_id);
                result
            }
            _ => Ok(()),
        }
    }

    /// Serialize the log record to bytes and write it to the log file
    pub fn write_log_record(&self, log_manager: &Mutex<LogManager>) -> DbResult<Lsn> {
        log_manager.lock().append(&self.to_bytes())
    }
}

/// The container for the recovery manager - a [`Transaction`](crate::transaction::Transaction)
/// uses a unique instance of this to manage writing records to WAL and handling recovery & rollback
#[derive(Debug)]
pub struct RecoveryManager {
    tx_num: TxId,
    log_manager: Arc<Mutex<LogManager>>,
    buffer_manager: Arc<BufferManager>,
}

impl RecoveryManager {
    /// Creating the manager logs the start of its transaction
    pub fn new(
        tx_num: TxId,
        log_manager: Arc<Mutex<LogManager>>,
        buffer_manager: Arc<BufferManager>,
    ) -> DbResult<Self> {
        LogRecord::Start(tx_num).write_log_record(&log_manager)?;
        Ok(Self {
            tx_num,
            log_manager,
            buffer_manager,
        })
    }

    /// Commit the transaction
    /// Its dirty buffers go to disk first, then the commit record is written and forced
    pub fn commit(&self) -> DbResult<()> {
        self.buffer_manager.flush_all(self.tx_num)?;
        let lsn = LogRecord::Commit(self.tx_num).write_log_record(&self.log_manager)?;
        self.log_manager.lock().flush(lsn)
    }

    /// Rollback the transaction associated with this [`RecoveryManager`] instance
    /// Iterate over the WAL records newest-first and undo every change made by this transaction
    /// until its start record, then flush and write a forced [`LogRecord::Rollback`]
    pub fn rollback(&self, tx: &dyn TransactionOperations) -> DbResult<()> {
        self.do_rollback(tx)?;
        self.buffer_manager.flush_all(self.tx_num)?;
        let lsn = LogRecord::Rollback(self.tx_num).write_log_record(&self.log_manager)?;
        self.log_manager.lock().flush(lsn)
    }

    /// Recover the database up to the last [`LogRecord::Checkpoint`]
    /// Undo every change of a transaction that neither committed nor rolled back, then
    /// commit the recovery itself and write a quiescent checkpoint
    pub fn recover(&self, tx: &dyn TransactionOperations) -> DbResult<()> {
        let undone = self.do_recover(tx)?;
        info!("recovery undid {undone} uncommitted updates");
        self.buffer_manager.flush_all(self.tx_num)?;
        LogRecord::Commit(self.tx_num).write_log_record(&self.log_manager)?;
        let lsn = LogRecord::Checkpoint.write_log_record(&self.log_manager)?;
        self.log_manager.lock().flush(lsn)
    }

    fn do_rollback(&self, tx: &dyn TransactionOperations) -> DbResult<()> {
        let log_iter = self.log_manager.lock().iterator()?;
        for bytes in log_iter {
            let record = LogRecord::try_from(bytes?.as_slice())?;
            if record.tx_num() != Some(self.tx_num) {
                continue;
            }
            if let LogRecord::Start(_) = record {
                return Ok(());
            }
            record.undo(tx)?;
        }
        Ok(())
    }

    fn do_recover(&self, tx: &dyn TransactionOperations) -> DbResult<usize> {
        let log_iter = self.log_manager.lock().iterator()?;
        let mut finished_txns: HashSet<TxId> = HashSet::new();
        let mut undone = 0;
        for bytes in log_iter {
            let record = LogRecord::try_from(bytes?.as_slice())?;
            match &record {
                LogRecord::Checkpoint => break,
                LogRecord::Commit(txnum) | LogRecord::Rollback(txnum) => {
                    finished_txns.insert(*txnum);
                }
                LogRecord::SetInt { txnum, .. } | LogRecord::SetString { txnum, .. } => {
                    if !finished_txns.contains(txnum) {
                        record.undo(tx)?;
                        undone += 1;
                    }
                }
                LogRecord::Start(_) => {}
            }
        }
        Ok(undone)
    }

    /// Write the [`LogRecord`] holding the current integer at `offset` of the [`Buffer`]
    pub fn set_int(&self, buffer: &Buffer, offset: usize) -> DbResult<Lsn> {
        let block_id = Self::block_of(buffer)?;
        let record = LogRecord::SetInt {
            txnum: self.tx_num,
            block_id,
            offset,
            old_val: buffer.contents().get_int(offset),
        };
        record.write_log_record(&self.log_manager)
    }

    /// Write the [`LogRecord`] holding the current string at `offset` of the [`Buffer`]
    pub fn set_string(&self, buffer: &Buffer, offset: usize) -> DbResult<Lsn> {
        let block_id = Self::block_of(buffer)?;
        let record = LogRecord::SetString {
            txnum: self.tx_num,
            block_id,
            offset,
            old_val: buffer.contents().get_string(offset),
        };
        record.write_log_record(&self.log_manager)
    }

    fn block_of(buffer: &Buffer) -> DbResult<BlockId> {
        buffer
            .block_id()
            .cloned()
            .ok_or_else(|| DbError::InvalidLogRecord("update on an unassigned buffer".to_string()))
    }
}
