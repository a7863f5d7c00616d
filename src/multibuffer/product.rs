use std::sync::Arc;

use log::debug;

use crate::{
    error::{DbError, DbResult},
    materialize::MaterializePlan,
    multibuffer::{best_factor, ChunkScan},
    plan::Plan,
    query::{Constant, ProductScan, Scan},
    record::{Layout, Schema},
    transaction::Transaction,
};

/// Cross product that reads the materialized right input in chunks of as many blocks
/// as the buffer pool can spare, scanning the left input once per chunk
pub struct MultiBufferProductPlan {
    tx: Arc<Transaction>,
    left: Arc<dyn Plan>,
    right: Arc<dyn Plan>,
    available: usize,
    schema: Schema,
}

impl MultiBufferProductPlan {
    pub fn new(tx: Arc<Transaction>, left: Arc<dyn Plan>, right: Arc<dyn Plan>) -> Self {
        let mut schema = Schema::new();
        schema.add_all(left.schema());
        schema.add_all(right.schema());
        let available = tx.available_buffers();
        Self {
            tx,
            left,
            right,
            available,
            schema,
        }
    }
}

impl Plan for MultiBufferProductPlan {
    fn open(&self) -> DbResult<Box<dyn Scan>> {
        let left = self.left.open()?;
        let temp = MaterializePlan::new(Arc::clone(&self.tx), Arc::clone(&self.right))
            .materialize()?;
        let file_name = format!("{}.tbl", temp.table_name());
        Ok(Box::new(MultiBufferProductScan::new(
            Arc::clone(&self.tx),
            left,
            &file_name,
            temp.layout().clone(),
        )?))
    }

    fn blocks_accessed(&self) -> usize {
        let materialized =
            MaterializePlan::new(Arc::clone(&self.tx), Arc::clone(&self.right)).blocks_accessed();
        let chunks = materialized.div_ceil(self.available.max(1));
        self.left.blocks_accessed() + materialized + chunks
    }

    fn records_output(&self) -> usize {
        self.left
            .records_output()
            .saturating_mul(self.right.records_output())
    }

    fn distinct_values(&self, field_name: &str) -> usize {
        if self.left.schema().has_field(field_name) {
            self.left.distinct_values(field_name)
        } else {
            self.right.distinct_values(field_name)
        }
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

pub struct MultiBufferProductScan {
    tx: Arc<Transaction>,
    file_name: String,
    layout: Layout,
    left: Option<Box<dyn Scan>>,
    product: Option<ProductScan>,
    chunk_size: usize,
    next_block: usize,
    file_size: usize,
}

impl MultiBufferProductScan {
    pub fn new(
        tx: Arc<Transaction>,
        left: Box<dyn Scan>,
        file_name: &str,
        layout: Layout,
    ) -> DbResult<Self> {
        let file_size = tx.size(file_name)?;
        let chunk_size = best_factor(tx.available_buffers(), file_size);
        debug!("multibuffer product over {file_name}: {file_size} blocks, chunks of {chunk_size}");
        let mut scan = Self {
            tx,
            file_name: file_name.to_string(),
            layout,
            left: Some(left),
            product: None,
            chunk_size,
            next_block: 0,
            file_size,
        };
        scan.before_first()?;
        Ok(scan)
    }

    /// Pair the left input with the next chunk of the right input
    fn use_next_chunk(&mut self) -> DbResult<bool> {
        if let Some(product) = self.product.take() {
            let (left, mut chunk) = product.into_parts();
            chunk.close();
            self.left = Some(left);
        }
        if self.next_block >= self.file_size {
            return Ok(false);
        }
        let end = (self.next_block + self.chunk_size - 1).min(self.file_size - 1);
        let chunk = ChunkScan::new(
            Arc::clone(&self.tx),
            &self.file_name,
            self.layout.clone(),
            self.next_block,
            end,
        )?;
        let left = self.left.take().ok_or(DbError::NoCurrentRecord)?;
        self.product = Some(ProductScan::new(left, Box::new(chunk))?);
        self.next_block = end + 1;
        Ok(true)
    }

    fn product(&self) -> DbResult<&ProductScan> {
        self.product.as_ref().ok_or(DbError::NoCurrentRecord)
    }
}

impl Scan for MultiBufferProductScan {
    fn before_first(&mut self) -> DbResult<()> {
        self.next_block = 0;
        self.use_next_chunk()?;
        Ok(())
    }

    fn next(&mut self) -> DbResult<bool> {
        loop {
            let has_row = match self.product.as_mut() {
                Some(product) => product.next()?,
                None => false,
            };
            if has_row {
                return Ok(true);
            }
            if !self.use_next_chunk()? {
                return Ok(false);
            }
        }
    }

    fn get_int(&self, field_name: &str) -> DbResult<i32> {
        self.product()?.get_int(field_name)
    }

    fn get_string(&self, field_name: &str) -> DbResult<String> {
        self.product()?.get_string(field_name)
    }

    fn get_value(&self, field_name: &str) -> DbResult<Constant> {
        self.product()?.get_value(field_name)
    }

    fn has_field(&self, field_name: &str) -> bool {
        if self.layout.schema().has_field(field_name) {
            return true;
        }
        match (&self.left, &self.product) {
            (Some(left), _) => left.has_field(field_name),
            (None, Some(product)) => product.has_field(field_name),
            (None, None) => false,
        }
    }

    fn close(&mut self) {
        if let Some(product) = self.product.as_mut() {
            product.close();
        }
        if let Some(left) = self.left.as_mut() {
            left.close();
        }
    }
}
