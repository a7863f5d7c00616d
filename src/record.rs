use std::{collections::HashMap, fmt::Display, sync::Arc};

use crate::{
    error::{DbError, DbResult},
    file_manager::BlockId,
    page::Page,
    query::{Constant, Scan, UpdateScan},
    transaction::Transaction,
};

/// The type tag of a field. The discriminants are the codes stored in `field_catalog`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Integer = 4,
    Varchar = 12,
}

impl TryFrom<i32> for FieldType {
    type Error = DbError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(FieldType::Integer),
            12 => Ok(FieldType::Varchar),
            other => Err(DbError::Schema(format!("unknown field type code {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    pub field_type: FieldType,
    pub length: usize,
}

/// The ordered list of fields of a table, each with its type and declared length
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<String>,
    info: HashMap<String, FieldInfo>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field. Adding a name twice keeps its first position and type
    pub fn add_field(&mut self, field_name: &str, field_type: FieldType, length: usize) {
        if self.info.contains_key(field_name) {
            return;
        }
        self.fields.push(field_name.to_string());
        self.info
            .insert(field_name.to_string(), FieldInfo { field_type, length });
    }

    pub fn add_int_field(&mut self, field_name: &str) {
        self.add_field(field_name, FieldType::Integer, 0);
    }

    /// Add a `VARCHAR(length)` field, where length counts bytes
    pub fn add_string_field(&mut self, field_name: &str, length: usize) {
        self.add_field(field_name, FieldType::Varchar, length);
    }

    /// Copy one field's definition from another schema
    pub fn add(&mut self, field_name: &str, other: &Schema) -> DbResult<()> {
        let info = other.info(field_name)?;
        self.add_field(field_name, info.field_type, info.length);
        Ok(())
    }

    pub fn add_all(&mut self, other: &Schema) {
        for field in &other.fields {
            let info = other.info[field];
            self.add_field(field, info.field_type, info.length);
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn has_field(&self, field_name: &str) -> bool {
        self.info.contains_key(field_name)
    }

    pub fn info(&self, field_name: &str) -> DbResult<FieldInfo> {
        self.info
            .get(field_name)
            .copied()
            .ok_or_else(|| DbError::FieldNotFound(field_name.to_string()))
    }

    pub fn field_type(&self, field_name: &str) -> DbResult<FieldType> {
        Ok(self.info(field_name)?.field_type)
    }

    pub fn length(&self, field_name: &str) -> DbResult<usize> {
        Ok(self.info(field_name)?.length)
    }
}

/// Where each field of a schema lives inside a record slot
///
/// Offsets start after the four byte slot flag. Integers take four bytes and a
/// `VARCHAR(n)` field takes `4 + n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    schema: Schema,
    offsets: HashMap<String, usize>,
    slot_size: usize,
}

impl Layout {
    pub fn new(schema: Schema) -> Self {
        let mut offsets = HashMap::new();
        let mut pos = Page::INT_BYTES;
        for field in schema.fields() {
            offsets.insert(field.clone(), pos);
            let info = schema.info[field];
            pos += Self::length_in_bytes(info);
        }
        Self {
            schema,
            offsets,
            slot_size: pos,
        }
    }

    /// A layout read back from the catalog
    pub fn from_parts(schema: Schema, offsets: HashMap<String, usize>, slot_size: usize) -> Self {
        Self {
            schema,
            offsets,
            slot_size,
        }
    }

    fn length_in_bytes(info: FieldInfo) -> usize {
        match info.field_type {
            FieldType::Integer => Page::INT_BYTES,
            FieldType::Varchar => Page::max_length(info.length),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn offset(&self, field_name: &str) -> DbResult<usize> {
        self.offsets
            .get(field_name)
            .copied()
            .ok_or_else(|| DbError::FieldNotFound(field_name.to_string()))
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }
}

/// The identifier of a record within its table: block number and slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub block_num: usize,
    pub slot: usize,
}

impl Rid {
    pub fn new(block_num: usize, slot: usize) -> Self {
        Self { block_num, slot }
    }
}

impl Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.block_num, self.slot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotFlag {
    Empty = 0,
    Used = 1,
}

/// A block of a table seen as an array of fixed-size slots
///
/// The block stays pinned for the lifetime of the record page.
pub struct RecordPage {
    tx: Arc<Transaction>,
    block_id: BlockId,
    layout: Layout,
    pinned: bool,
}

impl RecordPage {
    pub fn new(tx: Arc<Transaction>, block_id: BlockId, layout: Layout) -> DbResult<Self> {
        tx.pin(&block_id)?;
        Ok(Self {
            tx,
            block_id,
            layout,
            pinned: true,
        })
    }

    pub fn block(&self) -> &BlockId {
        &self.block_id
    }

    /// Release the pin early. Dropping the page does the same
    pub fn unpin(&mut self) {
        if self.pinned {
            self.tx.unpin(&self.block_id);
            self.pinned = false;
        }
    }

    fn offset(&self, slot: usize) -> usize {
        slot * self.layout.slot_size()
    }

    fn is_valid_slot(&self, slot: usize) -> bool {
        self.offset(slot + 1) <= self.tx.block_size()
    }

    fn field_position(&self, slot: usize, field_name: &str, expected: FieldType) -> DbResult<usize> {
        let field_type = self.layout.schema().field_type(field_name)?;
        if field_type != expected {
            return Err(DbError::TypeMismatch(format!(
                "field {field_name} is {field_type:?}, not {expected:?}"
            )));
        }
        Ok(self.offset(slot) + self.layout.offset(field_name)?)
    }

    pub fn get_int(&self, slot: usize, field_name: &str) -> DbResult<i32> {
        let pos = self.field_position(slot, field_name, FieldType::Integer)?;
        self.tx.get_int(&self.block_id, pos)
    }

    pub fn get_string(&self, slot: usize, field_name: &str) -> DbResult<String> {
        let pos = self.field_position(slot, field_name, FieldType::Varchar)?;
        self.tx.get_string(&self.block_id, pos)
    }

    pub fn set_int(&self, slot: usize, field_name: &str, value: i32) -> DbResult<()> {
        let pos = self.field_position(slot, field_name, FieldType::Integer)?;
        self.tx.set_int(&self.block_id, pos, value, true)
    }

    pub fn set_string(&self, slot: usize, field_name: &str, value: &str) -> DbResult<()> {
        let pos = self.field_position(slot, field_name, FieldType::Varchar)?;
        let length = self.layout.schema().length(field_name)?;
        if value.len() > length {
            return Err(DbError::TypeMismatch(format!(
                "value of {} bytes does not fit {field_name} VARCHAR({length})",
                value.len()
            )));
        }
        self.tx.set_string(&self.block_id, pos, value, true)
    }

    pub fn delete(&self, slot: usize) -> DbResult<()> {
        self.set_flag(slot, SlotFlag::Empty)
    }

    /// Mark every slot empty and give every field its zero value, all unlogged
    pub fn format(&self) -> DbResult<()> {
        let mut slot = 0;
        while self.is_valid_slot(slot) {
            let slot_offset = self.offset(slot);
            self.tx
                .set_int(&self.block_id, slot_offset, SlotFlag::Empty as i32, false)?;
            for field in self.layout.schema().fields() {
                let pos = slot_offset + self.layout.offset(field)?;
                match self.layout.schema().field_type(field)? {
                    FieldType::Integer => self.tx.set_int(&self.block_id, pos, 0, false)?,
                    FieldType::Varchar => self.tx.set_string(&self.block_id, pos, "", false)?,
                }
            }
            slot += 1;
        }
        Ok(())
    }

    /// The first used slot after `slot`, or after the start when `slot` is `None`
    pub fn next_after(&self, slot: Option<usize>) -> DbResult<Option<usize>> {
        self.search_after(slot, SlotFlag::Used)
    }

    /// Claim the first empty slot after `slot` and mark it used
    pub fn insert_after(&self, slot: Option<usize>) -> DbResult<Option<usize>> {
        let found = self.search_after(slot, SlotFlag::Empty)?;
        if let Some(new_slot) = found {
            self.set_flag(new_slot, SlotFlag::Used)?;
        }
        Ok(found)
    }

    fn set_flag(&self, slot: usize, flag: SlotFlag) -> DbResult<()> {
        self.tx
            .set_int(&self.block_id, self.offset(slot), flag as i32, true)
    }

    fn search_after(&self, slot: Option<usize>, flag: SlotFlag) -> DbResult<Option<usize>> {
        let mut slot = slot.map_or(0, |s| s + 1);
        while self.is_valid_slot(slot) {
            if self.tx.get_int(&self.block_id, self.offset(slot))? == flag as i32 {
                return Ok(Some(slot));
            }
            slot += 1;
        }
        Ok(None)
    }
}

impl Drop for RecordPage {
    fn drop(&mut self) {
        self.unpin();
    }
}

/// Iterates the records of a heap file `<table>.tbl`, block by block
pub struct TableScan {
    tx: Arc<Transaction>,
    layout: Layout,
    record_page: RecordPage,
    file_name: String,
    current_slot: Option<usize>,
}

impl TableScan {
    pub fn new(tx: Arc<Transaction>, table_name: &str, layout: Layout) -> DbResult<Self> {
        let file_name = format!("{table_name}.tbl");
        let record_page = if tx.size(&file_name)? == 0 {
            let block_id = tx.append(&file_name)?;
            let page = RecordPage::new(Arc::clone(&tx), block_id, layout.clone())?;
            page.format()?;
            page
        } else {
            RecordPage::new(
                Arc::clone(&tx),
                BlockId::new(file_name.clone(), 0),
                layout.clone(),
            )?
        };
        Ok(Self {
            tx,
            layout,
            record_page,
            file_name,
            current_slot: None,
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    fn move_to_block(&mut self, block_num: usize) -> DbResult<()> {
        self.record_page.unpin();
        self.record_page = RecordPage::new(
            Arc::clone(&self.tx),
            BlockId::new(self.file_name.clone(), block_num),
            self.layout.clone(),
        )?;
        self.current_slot = None;
        Ok(())
    }

    fn move_to_new_block(&mut self) -> DbResult<()> {
        self.record_page.unpin();
        let block_id = self.tx.append(&self.file_name)?;
        self.record_page = RecordPage::new(Arc::clone(&self.tx), block_id, self.layout.clone())?;
        self.record_page.format()?;
        self.current_slot = None;
        Ok(())
    }

    fn at_last_block(&self) -> DbResult<bool> {
        Ok(self.record_page.block().block_num + 1 >= self.tx.size(&self.file_name)?)
    }

    fn slot(&self) -> DbResult<usize> {
        self.current_slot.ok_or(DbError::NoCurrentRecord)
    }
}

impl Scan for TableScan {
    fn before_first(&mut self) -> DbResult<()> {
        self.move_to_block(0)
    }

    fn next(&mut self) -> DbResult<bool> {
        loop {
            if let Some(slot) = self.record_page.next_after(self.current_slot)? {
                self.current_slot = Some(slot);
                return Ok(true);
            }
            if self.at_last_block()? {
                return Ok(false);
            }
            let next_block = self.record_page.block().block_num + 1;
            self.move_to_block(next_block)?;
        }
    }

    fn get_int(&self, field_name: &str) -> DbResult<i32> {
        self.record_page.get_int(self.slot()?, field_name)
    }

    fn get_string(&self, field_name: &str) -> DbResult<String> {
        self.record_page.get_string(self.slot()?, field_name)
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
        self.record_page.unpin();
    }

    fn as_update(&mut self) -> Option<&mut dyn UpdateScan> {
        Some(self)
    }
}

impl UpdateScan for TableScan {
    fn set_int(&mut self, field_name: &str, value: i32) -> DbResult<()> {
        self.record_page.set_int(self.slot()?, field_name, value)
    }

    fn set_string(&mut self, field_name: &str, value: &str) -> DbResult<()> {
        self.record_page.set_string(self.slot()?, field_name, value)
    }

    fn set_value(&mut self, field_name: &str, value: &Constant) -> DbResult<()> {
        match value {
            Constant::Int(v) => self.set_int(field_name, *v),
            Constant::Str(v) => self.set_string(field_name, v),
        }
    }

    /// Move to the next free slot, growing the file when every block is full
    fn insert(&mut self) -> DbResult<()> {
        let mut fresh_block = false;
        loop {
            if let Some(slot) = self.record_page.insert_after(self.current_slot)? {
                self.current_slot = Some(slot);
                return Ok(());
            }
            if fresh_block {
                return Err(DbError::Schema(format!(
                    "a {} byte record does not fit in a {} byte block",
                    self.layout.slot_size(),
                    self.tx.block_size()
                )));
            }
            if self.at_last_block()? {
                self.move_to_new_block()?;
                fresh_block = true;
            } else {
                let next_block = self.record_page.block().block_num + 1;
                self.move_to_block(next_block)?;
            }
        }
    }

    fn delete(&mut self) -> DbResult<()> {
        self.record_page.delete(self.slot()?)
    }

    fn get_rid(&mut self) -> DbResult<Rid> {
        Ok(Rid::new(self.record_page.block().block_num, self.slot()?))
    }

    fn move_to_rid(&mut self, rid: Rid) -> DbResult<()> {
        self.move_to_block(rid.block_num)?;
        self.current_slot = Some(rid.slot);
        Ok(())
    }
}
