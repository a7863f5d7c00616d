use std::sync::Arc;

use crate::{
    error::{DbError, DbResult},
    file_manager::BlockId,
    query::{Constant, Scan},
    record::{FieldType, Layout, RecordPage},
    transaction::Transaction,
};

/// Reads the records of blocks `start..=end` of a file, all of them pinned at once
pub struct ChunkScan {
    pages: Vec<RecordPage>,
    layout: Layout,
    start: usize,
    end: usize,
    current_block: usize,
    current_slot: Option<usize>,
}

impl ChunkScan {
    pub fn new(
        tx: Arc<Transaction>,
        file_name: &str,
        layout: Layout,
        start: usize,
        end: usize,
    ) -> DbResult<Self> {
        let pages = (start..=end)
            .map(|block_num| {
                RecordPage::new(
                    Arc::clone(&tx),
                    BlockId::new(file_name.to_string(), block_num),
                    layout.clone(),
                )
            })
            .collect::<DbResult<Vec<_>>>()?;
        Ok(Self {
            pages,
            layout,
            start,
            end,
            current_block: start,
            current_slot: None,
        })
    }

    fn page(&self) -> &RecordPage {
        &self.pages[self.current_block - self.start]
    }

    fn slot(&self) -> DbResult<usize> {
        self.current_slot.ok_or(DbError::NoCurrentRecord)
    }
}

impl Scan for ChunkScan {
    fn before_first(&mut self) -> DbResult<()> {
        self.current_block = self.start;
        self.current_slot = None;
        Ok(())
    }

    fn next(&mut self) -> DbResult<bool> {
        loop {
            self.current_slot = self.page().next_after(self.current_slot)?;
            if self.current_slot.is_some() {
                return Ok(true);
            }
            if self.current_block == self.end {
                return Ok(false);
            }
            self.current_block += 1;
        }
    }

    fn get_int(&self, field_name: &str) -> DbResult<i32> {
        self.page().get_int(self.slot()?, field_name)
    }

    fn get_string(&self, field_name: &str) -> DbResult<String> {
        self.page().get_string(self.slot()?, field_name)
    }

    fn get_value(&self, field_name: &str) -> DbResult<Constant> {
        match self.layout.schema().field_type(field_name)? {
            FieldType::Integer => Ok(Constant::Int(self.get_int(field_name)?)),
            FieldType::Varchar => Ok(Constant::Str(self.get_string(field_name)?)),
        }
    }

    fn has_field(&self, field_name: &str) -> bool {
        self.layout.schema().has_field(field_name)
    }

    fn close(&mut self) {
        for page in self.pages.iter_mut() {
            page.unpin();
        }
    }
}

#[cfg(test)]
mod chunk_scan_tests {
    use std::sync::Arc;

    use crate::{
        multibuffer::ChunkScan,
        query::{Scan, UpdateScan},
        record::{Layout, Schema, TableScan},
        test_utils::{generate_filename, TestStorage},
    };

    #[test]
    fn test_chunk_reads_only_its_blocks() {
        let storage = TestStorage::new(400, 8);
        let tx = storage.new_tx();
        let mut schema = Schema::new();
        schema.add_int_field("n");
        schema.add_string_field("pad", 40);
        //  48 byte slots, 8 records per block
        let layout = Layout::new(schema);
        let table = generate_filename();
        let mut scan = TableScan::new(Arc::clone(&tx), &table, layout.clone()).unwrap();
        for n in 0..40 {
            scan.insert().unwrap();
            scan.set_int("n", n).unwrap();
        }
        scan.close();
        assert_eq!(tx.size(&format!("{table}.tbl")).unwrap(), 5);

        let available = storage.buffer_manager.available();
        let mut chunk =
            ChunkScan::new(Arc::clone(&tx), &format!("{table}.tbl"), layout, 1, 3).unwrap();
        assert_eq!(storage.buffer_manager.available(), available - 3);
        let mut values = vec![];
        while chunk.next().unwrap() {
            values.push(chunk.get_int("n").unwrap());
        }
        assert_eq!(values, (8..32).collect::<Vec<_>>());

        chunk.before_first().unwrap();
        assert!(chunk.next().unwrap());
        assert_eq!(chunk.get_value("n").unwrap().as_int().unwrap(), 8);
        chunk.close();
        assert_eq!(storage.buffer_manager.available(), available);
        tx.commit().unwrap();
    }
}
