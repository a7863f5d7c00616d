use std::sync::Arc;

use crate::{
    error::{DbError, DbResult},
    index::{Index, BLOCK_FIELD, DATA_FIELD, ID_FIELD},
    query::{Constant, Scan, UpdateScan},
    record::{Layout, Rid, TableScan},
    transaction::Transaction,
};

/// A static hash index: a fixed number of buckets, each one a heap table `<index><N>`
pub struct HashIndex {
    tx: Arc<Transaction>,
    index_name: String,
    layout: Layout,
    search_key: Option<Constant>,
    scan: Option<TableScan>,
}

impl HashIndex {
    /// Changing this re-routes every existing entry, so it is part of the file format
    pub const NUM_BUCKETS: usize = 100;

    pub fn new(tx: Arc<Transaction>, index_name: &str, layout: Layout) -> Self {
        Self {
            tx,
            index_name: index_name.to_string(),
            layout,
            search_key: None,
            scan: None,
        }
    }

    /// Every search reads one whole bucket
    pub fn search_cost(num_blocks: usize, _records_per_block: usize) -> usize {
        num_blocks / Self::NUM_BUCKETS
    }

    /// FNV-1a over the value's bytes. Stable across runs and platforms
    fn bucket(key: &Constant) -> usize {
        const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;
        let bytes = match key {
            Constant::Int(v) => v.to_be_bytes().to_vec(),
            Constant::Str(s) => s.as_bytes().to_vec(),
        };
        let hash = bytes.iter().fold(OFFSET_BASIS, |hash, byte| {
            (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
        });
        (hash % Self::NUM_BUCKETS as u64) as usize
    }

    fn scan(&mut self) -> DbResult<&mut TableScan> {
        self.scan.as_mut().ok_or(DbError::NoCurrentRecord)
    }
}

impl Index for HashIndex {
    fn before_first(&mut self, search_key: &Constant) -> DbResult<()> {
        self.close();
        let bucket_table = format!("{}{}", self.index_name, Self::bucket(search_key));
        self.scan = Some(TableScan::new(
            Arc::clone(&self.tx),
            &bucket_table,
            self.layout.clone(),
        )?);
        self.search_key = Some(search_key.clone());
        Ok(())
    }

    fn next(&mut self) -> DbResult<bool> {
        let (Some(scan), Some(search_key)) = (self.scan.as_mut(), self.search_key.as_ref()) else {
            return Ok(false);
        };
        while scan.next()? {
            if scan.get_value(DATA_FIELD)? == *search_key {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn get_data_rid(&self) -> DbResult<Rid> {
        let scan = self.scan.as_ref().ok_or(DbError::NoCurrentRecord)?;
        let block_num = scan.get_int(BLOCK_FIELD)?;
        let slot = scan.get_int(ID_FIELD)?;
        Ok(Rid::new(block_num as usize, slot as usize))
    }

    fn insert(&mut self, data_val: &Constant, data_rid: Rid) -> DbResult<()> {
        self.before_first(data_val)?;
        let scan = self.scan()?;
        scan.insert()?;
        scan.set_int(BLOCK_FIELD, data_rid.block_num as i32)?;
        scan.set_int(ID_FIELD, data_rid.slot as i32)?;
        scan.set_value(DATA_FIELD, data_val)
    }

    fn delete(&mut self, data_val: &Constant, data_rid: Rid) -> DbResult<()> {
        self.before_first(data_val)?;
        while self.next()? {
            if self.get_data_rid()? == data_rid {
                return self.scan()?.delete();
            }
        }
        Err(DbError::RecordNotFound {
            index: self.index_name.clone(),
            value: data_val.to_string(),
            rid: data_rid.to_string(),
        })
    }

    fn close(&mut self) {
        if let Some(mut scan) = self.scan.take() {
            scan.close();
        }
    }
}

impl Drop for HashIndex {
    fn drop(&mut self) {
        self.close();
    }
}
