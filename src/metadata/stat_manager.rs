use std::{collections::HashMap, sync::Arc};

use log::debug;
use parking_lot::Mutex;

use crate::{
    error::DbResult,
    metadata::TableManager,
    query::{Scan, UpdateScan},
    record::{Layout, TableScan},
    transaction::Transaction,
};

/// Number of lookups after which every cached statistic is recomputed
const REFRESH_AFTER_CALLS: usize = 100;

/// Size estimates of one table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatInfo {
    num_blocks: usize,
    num_records: usize,
}

impl StatInfo {
    pub fn new(num_blocks: usize, num_records: usize) -> Self {
        Self {
            num_blocks,
            num_records,
        }
    }

    pub fn blocks_accessed(&self) -> usize {
        self.num_blocks
    }

    pub fn records_output(&self) -> usize {
        self.num_records
    }

    /// A guess: statistics are not kept per field
    pub fn distinct_values(&self, _field_name: &str) -> usize {
        1 + self.num_records / 3
    }
}

#[derive(Debug, Default)]
struct StatCache {
    table_stats: HashMap<String, StatInfo>,
    num_calls: usize,
}

/// Caches table statistics, computing them by a full scan on first use
///
/// Estimates go stale as tables change; the whole cache is rebuilt every
/// `REFRESH_AFTER_CALLS` lookups.
pub struct StatManager {
    table_manager: Arc<TableManager>,
    cache: Mutex<StatCache>,
}

impl StatManager {
    pub fn new(table_manager: Arc<TableManager>) -> Self {
        Self {
            table_manager,
            cache: Mutex::new(StatCache::default()),
        }
    }

    pub fn get_stat_info(
        &self,
        table_name: &str,
        layout: &Layout,
        tx: &Arc<Transaction>,
    ) -> DbResult<StatInfo> {
        let mut cache = self.cache.lock();
        cache.num_calls += 1;
        if cache.num_calls > REFRESH_AFTER_CALLS {
            self.refresh(&mut cache, tx)?;
        }
        if let Some(stat_info) = cache.table_stats.get(table_name) {
            return Ok(*stat_info);
        }
        let stat_info = Self::calc_table_stats(table_name, layout, tx)?;
        cache.table_stats.insert(table_name.to_string(), stat_info);
        Ok(stat_info)
    }

    /// Recompute the statistics of every table in the catalog
    pub fn refresh_statistics(&self, tx: &Arc<Transaction>) -> DbResult<()> {
        let mut cache = self.cache.lock();
        self.refresh(&mut cache, tx)
    }

    fn refresh(&self, cache: &mut StatCache, tx: &Arc<Transaction>) -> DbResult<()> {
        cache.table_stats.clear();
        cache.num_calls = 0;
        for table_name in self.table_manager.table_names(tx)? {
            let layout = self.table_manager.get_layout(&table_name, tx)?;
            let stat_info = Self::calc_table_stats(&table_name, &layout, tx)?;
            cache.table_stats.insert(table_name, stat_info);
        }
        debug!("refreshed statistics of {} tables", cache.table_stats.len());
        Ok(())
    }

    fn calc_table_stats(
        table_name: &str,
        layout: &Layout,
        tx: &Arc<Transaction>,
    ) -> DbResult<StatInfo> {
        let mut num_records = 0;
        let mut num_blocks = 0;
        let mut scan = TableScan::new(Arc::clone(tx), table_name, layout.clone())?;
        while scan.next()? {
            num_records += 1;
            num_blocks = scan.get_rid()?.block_num + 1;
        }
        scan.close();
        Ok(StatInfo::new(num_blocks, num_records))
    }
}
