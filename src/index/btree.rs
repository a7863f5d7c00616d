use std::{fmt::Display, sync::Arc};

use log::debug;

use crate::{
    error::{DbError, DbResult},
    file_manager::BlockId,
    index::{Index, BLOCK_FIELD, DATA_FIELD, ID_FIELD},
    query::Constant,
    record::{FieldType, Layout, Rid, Schema},
    transaction::Transaction,
};

/// A B+-tree index stored in two files: `<index>leaf` holds the entries in key order,
/// `<index>dir` holds the directory whose root is always block 0
pub struct BTreeIndex {
    tx: Arc<Transaction>,
    index_name: String,
    dir_layout: Layout,
    leaf_layout: Layout,
    leaf_file: String,
    leaf: Option<BTreeLeaf>,
    root_block: BlockId,
}

impl BTreeIndex {
    pub fn new(tx: Arc<Transaction>, index_name: &str, leaf_layout: Layout) -> DbResult<Self> {
        //  the leaf file starts as a single empty leaf
        let leaf_file = format!("{index_name}leaf");
        if tx.size(&leaf_file)? == 0 {
            let block_id = tx.append(&leaf_file)?;
            let page = BTreePage::new(Arc::clone(&tx), block_id, leaf_layout.clone())?;
            page.format(BTreePage::NO_OVERFLOW)?;
        }

        //  the directory starts as a level-0 root whose single entry covers every key
        let dir_file = format!("{index_name}dir");
        let mut dir_schema = Schema::new();
        dir_schema.add(BLOCK_FIELD, leaf_layout.schema())?;
        dir_schema.add(DATA_FIELD, leaf_layout.schema())?;
        let dir_layout = Layout::new(dir_schema);
        let root_block = BlockId::new(dir_file.clone(), 0);
        if tx.size(&dir_file)? == 0 {
            tx.append(&dir_file)?;
            let root = BTreePage::new(Arc::clone(&tx), root_block.clone(), dir_layout.clone())?;
            root.format(0)?;
            let min_value = match leaf_layout.schema().field_type(DATA_FIELD)? {
                FieldType::Integer => Constant::Int(i32::MIN),
                FieldType::Varchar => Constant::Str(String::new()),
            };
            root.insert_dir(0, &min_value, 0)?;
        }

        Ok(Self {
            tx,
            index_name: index_name.to_string(),
            dir_layout,
            leaf_layout,
            leaf_file,
            leaf: None,
            root_block,
        })
    }

    /// Whether a `block_size` page holds enough `leaf_layout` records to be split
    pub fn fits_block(leaf_layout: &Layout, block_size: usize) -> bool {
        BTreePage::HEADER_BYTES + 3 * leaf_layout.slot_size() < block_size
    }

    /// Blocks read by one search: one per directory level plus the leaf
    pub fn search_cost(num_blocks: usize, records_per_block: usize) -> usize {
        if num_blocks < 2 || records_per_block < 2 {
            return 1;
        }
        1 + num_blocks.ilog(records_per_block) as usize
    }

    fn root(&self) -> DbResult<BTreeDir> {
        BTreeDir::new(
            Arc::clone(&self.tx),
            self.root_block.clone(),
            self.dir_layout.clone(),
        )
    }

    fn not_found(&self, data_val: &Constant, data_rid: Rid) -> DbError {
        DbError::RecordNotFound {
            index: self.index_name.clone(),
            value: data_val.to_string(),
            rid: data_rid.to_string(),
        }
    }
}

impl Index for BTreeIndex {
    fn before_first(&mut self, search_key: &Constant) -> DbResult<()> {
        self.close();
        let leaf_block_num = self.root()?.search(search_key)?;
        let leaf_block = BlockId::new(self.leaf_file.clone(), leaf_block_num);
        self.leaf = Some(BTreeLeaf::new(
            Arc::clone(&self.tx),
            leaf_block,
            self.leaf_layout.clone(),
            search_key.clone(),
        )?);
        Ok(())
    }

    fn next(&mut self) -> DbResult<bool> {
        match self.leaf.as_mut() {
            Some(leaf) => leaf.next(),
            None => Ok(false),
        }
    }

    fn get_data_rid(&self) -> DbResult<Rid> {
        self.leaf
            .as_ref()
            .ok_or(DbError::NoCurrentRecord)?
            .get_data_rid()
    }

    fn insert(&mut self, data_val: &Constant, data_rid: Rid) -> DbResult<()> {
        debug!("inserting {data_val} -> {data_rid} into index {}", self.index_name);
        self.before_first(data_val)?;
        let split = match self.leaf.as_mut() {
            Some(leaf) => leaf.insert(data_rid)?,
            None => None,
        };
        self.close();
        let Some(entry) = split else {
            return Ok(());
        };
        debug!("insert into {} split a leaf", self.index_name);
        let root = self.root()?;
        if let Some(root_entry) = root.insert(entry)? {
            debug!("insert into {} split the root", self.index_name);
            root.make_new_root(root_entry)?;
        }
        Ok(())
    }

    fn delete(&mut self, data_val: &Constant, data_rid: Rid) -> DbResult<()> {
        self.before_first(data_val)?;
        let deleted = match self.leaf.as_mut() {
            Some(leaf) => leaf.delete(data_rid)?,
            None => false,
        };
        self.close();
        if deleted {
            Ok(())
        } else {
            Err(self.not_found(data_val, data_rid))
        }
    }

    fn close(&mut self) {
        self.leaf = None;
    }
}

/// The entry a split hands to the parent: the first key of the new block and its number
#[derive(Debug, Clone, PartialEq, Eq)]
struct DirEntry {
    data_val: Constant,
    block_num: usize,
}

/// A directory node. Its flag is its level; level 0 nodes point at leaves
struct BTreeDir {
    tx: Arc<Transaction>,
    layout: Layout,
    contents: BTreePage,
}

impl BTreeDir {
    fn new(tx: Arc<Transaction>, block_id: BlockId, layout: Layout) -> DbResult<Self> {
        let contents = BTreePage::new(Arc::clone(&tx), block_id, layout.clone())?;
        Ok(Self {
            tx,
            layout,
            contents,
        })
    }

    /// Walk down from this node to the leaf block that may hold `search_key`
    fn search(&mut self, search_key: &Constant) -> DbResult<usize> {
        let mut child_block = self.find_child_block(search_key)?;
        while self.contents.get_flag()? > 0 {
            self.contents =
                BTreePage::new(Arc::clone(&self.tx), child_block, self.layout.clone())?;
            child_block = self.find_child_block(search_key)?;
        }
        Ok(child_block.block_num)
    }

    /// Grow the tree by one level. The old root's entries move to a new block so the root
    /// stays at block 0, then the root gets one entry for each half
    fn make_new_root(&self, entry: DirEntry) -> DbResult<()> {
        let first_value = self.contents.get_data_value(0)?;
        let level = self.contents.get_flag()?;
        let new_block = self.contents.split(0, level)?;
        self.insert_entry(DirEntry {
            data_val: first_value,
            block_num: new_block.block_num,
        })?;
        self.insert_entry(entry)?;
        self.contents.set_flag(level + 1)
    }

    /// Insert `entry` at the right level below this node, returning the entry for this
    /// node's own split if there was one
    fn insert(&self, entry: DirEntry) -> DbResult<Option<DirEntry>> {
        if self.contents.get_flag()? == 0 {
            return self.insert_entry(entry);
        }
        let child_block = self.find_child_block(&entry.data_val)?;
        let child = BTreeDir::new(Arc::clone(&self.tx), child_block, self.layout.clone())?;
        match child.insert(entry)? {
            Some(child_entry) => self.insert_entry(child_entry),
            None => Ok(None),
        }
    }

    fn insert_entry(&self, entry: DirEntry) -> DbResult<Option<DirEntry>> {
        let slot = self
            .contents
            .find_slot_before(&entry.data_val)?
            .map_or(0, |slot| slot + 1);
        self.contents
            .insert_dir(slot, &entry.data_val, entry.block_num)?;
        if !self.contents.is_full()? {
            return Ok(None);
        }
        let level = self.contents.get_flag()?;
        let split_point = self.contents.get_number_of_recs()? / 2;
        let split_value = self.contents.get_data_value(split_point)?;
        let new_block = self.contents.split(split_point, level)?;
        Ok(Some(DirEntry {
            data_val: split_value,
            block_num: new_block.block_num,
        }))
    }

    /// The child whose key range holds `search_key`. An entry equal to the key wins over
    /// the one before it
    fn find_child_block(&self, search_key: &Constant) -> DbResult<BlockId> {
        let num_recs = self.contents.get_number_of_recs()?;
        let slot = match self.contents.find_slot_before(search_key)? {
            Some(slot)
                if slot + 1 < num_recs
                    && self.contents.get_data_value(slot + 1)? == *search_key =>
            {
                slot + 1
            }
            Some(slot) => slot,
            None => 0,
        };
        let block_num = self.contents.get_child_block_num(slot)?;
        Ok(BlockId::new(
            self.contents.block_id().filename.clone(),
            block_num,
        ))
    }
}

/// A cursor over the leaf entries equal to one search key
///
/// A leaf whose flag is a block number has an overflow chain holding more entries
/// equal to its first key.
struct BTreeLeaf {
    tx: Arc<Transaction>,
    layout: Layout,
    search_key: Constant,
    contents: BTreePage,
    current_slot: Option<usize>,
}

impl BTreeLeaf {
    fn new(
        tx: Arc<Transaction>,
        block_id: BlockId,
        layout: Layout,
        search_key: Constant,
    ) -> DbResult<Self> {
        let contents = BTreePage::new(Arc::clone(&tx), block_id, layout.clone())?;
        let current_slot = contents.find_slot_before(&search_key)?;
        Ok(Self {
            tx,
            layout,
            search_key,
            contents,
            current_slot,
        })
    }

    fn next(&mut self) -> DbResult<bool> {
        loop {
            let slot = self.current_slot.map_or(0, |slot| slot + 1);
            self.current_slot = Some(slot);
            if slot < self.contents.get_number_of_recs()?
                && self.contents.get_data_value(slot)? == self.search_key
            {
                return Ok(true);
            }
            if !self.try_overflow()? {
                return Ok(false);
            }
        }
    }

    /// Remove the entry for `rid`. Returns whether it was found
    fn delete(&mut self, rid: Rid) -> DbResult<bool> {
        while self.next()? {
            if self.get_data_rid()? == rid {
                if let Some(slot) = self.current_slot {
                    self.contents.delete(slot)?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Insert an entry for the search key right after `current_slot`, returning the
    /// entry for the parent if the leaf split
    fn insert(&mut self, rid: Rid) -> DbResult<Option<DirEntry>> {
        //  A leaf with an overflow chain must keep its first key. A smaller key moves
        //  the whole page, chain included, to a new block and starts over here
        let flag = self.contents.get_flag()?;
        if flag >= 0 && self.contents.get_data_value(0)? > self.search_key {
            debug!("{} is below the overflowing key of {}", self.search_key, self.contents);
            let first_value = self.contents.get_data_value(0)?;
            let new_block = self.contents.split(0, flag)?;
            self.current_slot = Some(0);
            self.contents.set_flag(BTreePage::NO_OVERFLOW)?;
            self.contents.insert_leaf(0, &self.search_key, rid)?;
            return Ok(Some(DirEntry {
                data_val: first_value,
                block_num: new_block.block_num,
            }));
        }

        let slot = self.current_slot.map_or(0, |slot| slot + 1);
        self.current_slot = Some(slot);
        self.contents.insert_leaf(slot, &self.search_key, rid)?;
        if !self.contents.is_full()? {
            return Ok(None);
        }

        debug!("splitting full leaf {}", self.contents);
        let num_recs = self.contents.get_number_of_recs()?;
        let first_key = self.contents.get_data_value(0)?;
        let last_key = self.contents.get_data_value(num_recs - 1)?;
        if first_key == last_key {
            //  every entry has the same key: keep the first, chain the rest
            let new_block = self.contents.split(1, flag)?;
            self.contents.set_flag(new_block.block_num as i32)?;
            return Ok(None);
        }

        //  equal keys never straddle the split
        let mut split_point = num_recs / 2;
        let mut split_key = self.contents.get_data_value(split_point)?;
        if split_key == first_key {
            while self.contents.get_data_value(split_point)? == split_key {
                split_point += 1;
            }
            split_key = self.contents.get_data_value(split_point)?;
        } else {
            while self.contents.get_data_value(split_point - 1)? == split_key {
                split_point -= 1;
            }
        }
        let new_block = self.contents.split(split_point, BTreePage::NO_OVERFLOW)?;
        Ok(Some(DirEntry {
            data_val: split_key,
            block_num: new_block.block_num,
        }))
    }

    /// Move to the overflow block if this page chains more entries for the search key
    fn try_overflow(&mut self) -> DbResult<bool> {
        let flag = self.contents.get_flag()?;
        if flag < 0 || self.contents.get_data_value(0)? != self.search_key {
            return Ok(false);
        }
        let overflow_block = BlockId::new(self.contents.block_id().filename.clone(), flag as usize);
        self.contents = BTreePage::new(Arc::clone(&self.tx), overflow_block, self.layout.clone())?;
        self.current_slot = None;
        Ok(true)
    }

    fn get_data_rid(&self) -> DbResult<Rid> {
        let slot = self.current_slot.ok_or(DbError::NoCurrentRecord)?;
        self.contents.get_rid(slot)
    }
}

/// The general format of a B-tree page
/// +--------------------+----------------------+----------------------+
/// | flag (4 bytes)     | record count (4B)    | record slots [...]   |
/// +--------------------+----------------------+----------------------+
///     ^ offset 0            ^ offset 4              ^ offset 8
///
/// Records are kept sorted by `dataval`. A leaf record is `block, id, dataval`;
/// a directory record is `block, dataval` where `block` is the child.
struct BTreePage {
    tx: Arc<Transaction>,
    block_id: BlockId,
    layout: Layout,
    pinned: bool,
}

impl BTreePage {
    const INT_BYTES: usize = 4;
    const HEADER_BYTES: usize = 2 * Self::INT_BYTES;
    const NO_OVERFLOW: i32 = -1;

    fn new(tx: Arc<Transaction>, block_id: BlockId, layout: Layout) -> DbResult<Self> {
        tx.pin(&block_id)?;
        Ok(Self {
            tx,
            block_id,
            layout,
            pinned: true,
        })
    }

    fn block_id(&self) -> &BlockId {
        &self.block_id
    }

    /// The last slot holding a key smaller than `search_key`, `None` if there is none
    fn find_slot_before(&self, search_key: &Constant) -> DbResult<Option<usize>> {
        let num_recs = self.get_number_of_recs()?;
        let mut slot = 0;
        while slot < num_recs && self.get_data_value(slot)? < *search_key {
            slot += 1;
        }
        Ok(slot.checked_sub(1))
    }

    fn is_full(&self) -> DbResult<bool> {
        let num_recs = self.get_number_of_recs()?;
        Ok(self.slot_pos(num_recs + 1) >= self.tx.block_size())
    }

    /// Move the records from `slot` onwards into a new block with the given flag
    fn split(&self, slot: usize, flag: i32) -> DbResult<BlockId> {
        debug!("splitting {} at slot {slot}", self.block_id);
        let new_block = self.tx.append(&self.block_id.filename)?;
        let new_page = BTreePage::new(Arc::clone(&self.tx), new_block.clone(), self.layout.clone())?;
        new_page.format(flag)?;

        let mut dest_slot = 0;
        while slot < self.get_number_of_recs()? {
            new_page.insert(dest_slot)?;
            for field in self.layout.schema().fields() {
                new_page.set_value(dest_slot, field, &self.get_value(slot, field)?)?;
            }
            self.delete(slot)?;
            dest_slot += 1;
        }
        Ok(new_block)
    }

    /// Write the header and give every slot its zero values, all unlogged
    fn format(&self, flag: i32) -> DbResult<()> {
        self.tx.set_int(&self.block_id, 0, flag, false)?;
        self.tx
            .set_int(&self.block_id, Self::INT_BYTES, 0, false)?;
        let slot_size = self.layout.slot_size();
        let mut pos = 2 * Self::INT_BYTES;
        while pos + slot_size <= self.tx.block_size() {
            for field in self.layout.schema().fields() {
                let field_pos = pos + self.layout.offset(field)?;
                match self.layout.schema().field_type(field)? {
                    FieldType::Integer => self.tx.set_int(&self.block_id, field_pos, 0, false)?,
                    FieldType::Varchar => {
                        self.tx.set_string(&self.block_id, field_pos, "", false)?
                    }
                }
            }
            pos += slot_size;
        }
        Ok(())
    }

    fn get_flag(&self) -> DbResult<i32> {
        self.tx.get_int(&self.block_id, 0)
    }

    fn set_flag(&self, flag: i32) -> DbResult<()> {
        self.tx.set_int(&self.block_id, 0, flag, true)
    }

    fn get_data_value(&self, slot: usize) -> DbResult<Constant> {
        self.get_value(slot, DATA_FIELD)
    }

    fn get_child_block_num(&self, slot: usize) -> DbResult<usize> {
        Ok(self.get_int(slot, BLOCK_FIELD)? as usize)
    }

    fn get_rid(&self, slot: usize) -> DbResult<Rid> {
        let block_num = self.get_int(slot, BLOCK_FIELD)?;
        let id = self.get_int(slot, ID_FIELD)?;
        Ok(Rid::new(block_num as usize, id as usize))
    }

    fn insert_dir(&self, slot: usize, value: &Constant, block_num: usize) -> DbResult<()> {
        self.insert(slot)?;
        self.set_value(slot, DATA_FIELD, value)?;
        self.set_int(slot, BLOCK_FIELD, block_num as i32)
    }

    fn insert_leaf(&self, slot: usize, value: &Constant, rid: Rid) -> DbResult<()> {
        self.insert(slot)?;
        self.set_value(slot, DATA_FIELD, value)?;
        self.set_int(slot, BLOCK_FIELD, rid.block_num as i32)?;
        self.set_int(slot, ID_FIELD, rid.slot as i32)
    }

    /// Open a gap at `slot` by shifting the later records right
    fn insert(&self, slot: usize) -> DbResult<()> {
        let num_recs = self.get_number_of_recs()?;
        for i in (slot..num_recs).rev() {
            self.copy_record(i, i + 1)?;
        }
        self.set_number_of_recs(num_recs + 1)
    }

    /// Close the gap at `slot` by shifting the later records left
    fn delete(&self, slot: usize) -> DbResult<()> {
        let num_recs = self.get_number_of_recs()?;
        for i in slot + 1..num_recs {
            self.copy_record(i, i - 1)?;
        }
        self.set_number_of_recs(num_recs - 1)
    }

    fn copy_record(&self, from: usize, to: usize) -> DbResult<()> {
        for field in self.layout.schema().fields() {
            self.set_value(to, field, &self.get_value(from, field)?)?;
        }
        Ok(())
    }

    fn get_number_of_recs(&self) -> DbResult<usize> {
        Ok(self.tx.get_int(&self.block_id, Self::INT_BYTES)? as usize)
    }

    fn set_number_of_recs(&self, num_recs: usize) -> DbResult<()> {
        self.tx
            .set_int(&self.block_id, Self::INT_BYTES, num_recs as i32, true)
    }

    fn get_int(&self, slot: usize, field_name: &str) -> DbResult<i32> {
        self.tx
            .get_int(&self.block_id, self.field_position(slot, field_name)?)
    }

    fn set_int(&self, slot: usize, field_name: &str, value: i32) -> DbResult<()> {
        self.tx
            .set_int(&self.block_id, self.field_position(slot, field_name)?, value, true)
    }

    fn get_value(&self, slot: usize, field_name: &str) -> DbResult<Constant> {
        let pos = self.field_position(slot, field_name)?;
        match self.layout.schema().field_type(field_name)? {
            FieldType::Integer => Ok(Constant::Int(self.tx.get_int(&self.block_id, pos)?)),
            FieldType::Varchar => Ok(Constant::Str(self.tx.get_string(&self.block_id, pos)?)),
        }
    }

    fn set_value(&self, slot: usize, field_name: &str, value: &Constant) -> DbResult<()> {
        let pos = self.field_position(slot, field_name)?;
        match (self.layout.schema().field_type(field_name)?, value) {
            (FieldType::Integer, Constant::Int(v)) => {
                self.tx.set_int(&self.block_id, pos, *v, true)
            }
            (FieldType::Varchar, Constant::Str(v)) => {
                self.tx.set_string(&self.block_id, pos, v, true)
            }
            (expected, _) => Err(DbError::TypeMismatch(format!(
                "{field_name} is {expected:?}, got {value}"
            ))),
        }
    }

    fn field_position(&self, slot: usize, field_name: &str) -> DbResult<usize> {
        Ok(self.slot_pos(slot) + self.layout.offset(field_name)?)
    }

    fn slot_pos(&self, slot: usize) -> usize {
        Self::HEADER_BYTES + slot * self.layout.slot_size()
    }
}

impl Drop for BTreePage {
    fn drop(&mut self) {
        if self.pinned {
            self.tx.unpin(&self.block_id);
            self.pinned = false;
        }
    }
}

impl Display for BTreePage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.block_id)?;
        let (Ok(flag), Ok(num_recs)) = (self.get_flag(), self.get_number_of_recs()) else {
            return write!(f, " <unreadable>");
        };
        write!(f, " flag={flag} [")?;
        for slot in 0..num_recs {
            if slot > 0 {
                write!(f, ", ")?;
            }
            match self.get_data_value(slot) {
                Ok(value) => write!(f, "{value}")?,
                Err(_) => write!(f, "?")?,
            }
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod btree_index_tests {
    use super::*;
    use crate::{
        index::entry_layout,
        test_utils::{generate_filename, TestStorage},
    };

    fn setup_index(tx: &Arc<Transaction>) -> BTreeIndex {
        BTreeIndex::new(
            Arc::clone(tx),
            &generate_filename(),
            entry_layout(FieldType::Integer, 0),
        )
        .unwrap()
    }

    fn search(index: &mut BTreeIndex, key: &Constant) -> Vec<Rid> {
        index.before_first(key).unwrap();
        let mut rids = vec![];
        while index.next().unwrap() {
            rids.push(index.get_data_rid().unwrap());
        }
        index.close();
        rids
    }

    #[test]
    fn test_btree_index_construction() {
        let storage = TestStorage::new(400, 8);
        let tx = storage.new_tx();
        let index = setup_index(&tx);

        let root = index.root().unwrap();
        assert_eq!(root.contents.get_number_of_recs().unwrap(), 1);
        assert_eq!(root.contents.get_flag().unwrap(), 0);
        assert_eq!(
            root.contents.get_data_value(0).unwrap(),
            Constant::Int(i32::MIN)
        );
        assert_eq!(tx.size(&index.leaf_file).unwrap(), 1);
    }

    #[test]
    fn test_simple_insert_and_search() {
        let storage = TestStorage::new(400, 8);
        let tx = storage.new_tx();
        let mut index = setup_index(&tx);

        index.insert(&Constant::Int(10), Rid::new(1, 1)).unwrap();
        index.insert(&Constant::Int(20), Rid::new(1, 2)).unwrap();
        index.insert(&Constant::Int(30), Rid::new(1, 3)).unwrap();

        assert_eq!(search(&mut index, &Constant::Int(20)), vec![Rid::new(1, 2)]);
        assert_eq!(search(&mut index, &Constant::Int(10)), vec![Rid::new(1, 1)]);
        assert!(search(&mut index, &Constant::Int(15)).is_empty());
        assert_eq!(storage.buffer_manager.available(), 8);
        tx.commit().unwrap();
    }

    #[test]
    fn test_duplicate_keys() {
        let storage = TestStorage::new(400, 8);
        let tx = storage.new_tx();
        let mut index = setup_index(&tx);

        for slot in 1..=3 {
            index.insert(&Constant::Int(10), Rid::new(1, slot)).unwrap();
        }
        let mut found = search(&mut index, &Constant::Int(10));
        found.sort();
        assert_eq!(found, vec![Rid::new(1, 1), Rid::new(1, 2), Rid::new(1, 3)]);
    }

    #[test]
    fn test_delete() {
        let storage = TestStorage::new(400, 8);
        let tx = storage.new_tx();
        let mut index = setup_index(&tx);

        index.insert(&Constant::Int(10), Rid::new(1, 1)).unwrap();
        index.delete(&Constant::Int(10), Rid::new(1, 1)).unwrap();
        assert!(search(&mut index, &Constant::Int(10)).is_empty());

        index.insert(&Constant::Int(20), Rid::new(1, 1)).unwrap();
        index.insert(&Constant::Int(20), Rid::new(1, 2)).unwrap();
        index.delete(&Constant::Int(20), Rid::new(1, 1)).unwrap();
        assert_eq!(search(&mut index, &Constant::Int(20)), vec![Rid::new(1, 2)]);

        assert!(matches!(
            index.delete(&Constant::Int(20), Rid::new(7, 7)),
            Err(DbError::RecordNotFound { .. })
        ));
    }

    #[test]
    fn test_btree_split() {
        //  small blocks: five entries per leaf, seven per directory node
        let storage = TestStorage::new(100, 8);
        let tx = storage.new_tx();
        let mut index = setup_index(&tx);

        //  insert out of order so splits happen on both sides
        for i in 0..200 {
            let key = (i * 37) % 200;
            index.insert(&Constant::Int(key), Rid::new(2, key as usize)).unwrap();
        }
        assert!(index.root().unwrap().contents.get_flag().unwrap() > 0);

        for key in 0..200 {
            assert_eq!(
                search(&mut index, &Constant::Int(key)),
                vec![Rid::new(2, key as usize)],
                "key {key}"
            );
        }
        assert_eq!(storage.buffer_manager.available(), 8);
        tx.commit().unwrap();
    }

    #[test]
    fn test_overflow_chain() {
        let storage = TestStorage::new(100, 8);
        let tx = storage.new_tx();
        let mut index = setup_index(&tx);

        for slot in 0..23 {
            index.insert(&Constant::Int(7), Rid::new(0, slot)).unwrap();
        }
        //  a smaller and a larger key after the chain exists
        index.insert(&Constant::Int(3), Rid::new(1, 0)).unwrap();
        index.insert(&Constant::Int(9), Rid::new(1, 1)).unwrap();

        let mut found = search(&mut index, &Constant::Int(7));
        found.sort();
        let expected: Vec<Rid> = (0..23).map(|slot| Rid::new(0, slot)).collect();
        assert_eq!(found, expected);
        assert_eq!(search(&mut index, &Constant::Int(3)), vec![Rid::new(1, 0)]);
        assert_eq!(search(&mut index, &Constant::Int(9)), vec![Rid::new(1, 1)]);

        index.delete(&Constant::Int(7), Rid::new(0, 22)).unwrap();
        assert_eq!(search(&mut index, &Constant::Int(7)).len(), 22);
    }

    #[test]
    fn test_string_keys() {
        let storage = TestStorage::new(400, 8);
        let tx = storage.new_tx();
        let mut index = BTreeIndex::new(
            Arc::clone(&tx),
            &generate_filename(),
            entry_layout(FieldType::Varchar, 8),
        )
        .unwrap();

        let names = ["pear", "apple", "fig", "kiwi", "date", "lime"];
        for (slot, name) in names.iter().enumerate() {
            index.insert(&Constant::from(*name), Rid::new(0, slot)).unwrap();
        }
        assert_eq!(search(&mut index, &Constant::from("fig")), vec![Rid::new(0, 2)]);
        assert_eq!(search(&mut index, &Constant::from("pear")), vec![Rid::new(0, 0)]);
        assert!(search(&mut index, &Constant::from("plum")).is_empty());
    }

    #[test]
    fn test_search_cost() {
        assert_eq!(BTreeIndex::search_cost(0, 20), 1);
        assert_eq!(BTreeIndex::search_cost(19, 20), 1);
        assert_eq!(BTreeIndex::search_cost(400, 20), 3);
    }
}

#[cfg(test)]
mod btree_page_tests {
    use super::*;
    use crate::{
        index::entry_layout,
        test_utils::{generate_filename, TestStorage},
    };

    fn setup_page(tx: &Arc<Transaction>, flag: i32) -> BTreePage {
        let block = tx.append(&generate_filename()).unwrap();
        let page =
            BTreePage::new(Arc::clone(tx), block, entry_layout(FieldType::Integer, 0)).unwrap();
        page.format(flag).unwrap();
        page
    }

    #[test]
    fn test_btree_page_format() {
        let storage = TestStorage::new(400, 8);
        let tx = storage.new_tx();
        let page = setup_page(&tx, BTreePage::NO_OVERFLOW);
        assert_eq!(page.get_flag().unwrap(), BTreePage::NO_OVERFLOW);
        assert_eq!(page.get_number_of_recs().unwrap(), 0);
        assert_eq!(page.find_slot_before(&Constant::Int(1)).unwrap(), None);
    }

    #[test]
    fn test_leaf_insert_and_delete() {
        let storage = TestStorage::new(400, 8);
        let tx = storage.new_tx();
        let page = setup_page(&tx, BTreePage::NO_OVERFLOW);

        page.insert_leaf(0, &Constant::Int(20), Rid::new(1, 2)).unwrap();
        page.insert_leaf(0, &Constant::Int(10), Rid::new(1, 1)).unwrap();
        assert_eq!(page.get_number_of_recs().unwrap(), 2);
        assert_eq!(page.get_data_value(0).unwrap(), Constant::Int(10));
        assert_eq!(page.get_rid(1).unwrap(), Rid::new(1, 2));

        page.delete(0).unwrap();
        assert_eq!(page.get_number_of_recs().unwrap(), 1);
        assert_eq!(page.get_data_value(0).unwrap(), Constant::Int(20));
    }

    #[test]
    fn test_page_split() {
        let storage = TestStorage::new(400, 8);
        let tx = storage.new_tx();
        let page = setup_page(&tx, BTreePage::NO_OVERFLOW);

        let mut slot = 0;
        while !page.is_full().unwrap() {
            page.insert_leaf(slot, &Constant::Int(slot as i32), Rid::new(1, slot))
                .unwrap();
            slot += 1;
        }
        //  (400 - 8) / 16 slots fit, the page reports full one before that
        assert_eq!(slot, 24);

        let split_point = slot / 2;
        let new_block = page.split(split_point, BTreePage::NO_OVERFLOW).unwrap();
        assert_eq!(page.get_number_of_recs().unwrap(), split_point);

        let new_page = BTreePage::new(Arc::clone(&tx), new_block, page.layout.clone()).unwrap();
        assert_eq!(new_page.get_number_of_recs().unwrap(), slot - split_point);
        assert_eq!(
            new_page.get_data_value(0).unwrap(),
            Constant::Int(split_point as i32)
        );
        assert_eq!(new_page.get_flag().unwrap(), BTreePage::NO_OVERFLOW);
    }

    #[test]
    fn test_type_safety() {
        let storage = TestStorage::new(400, 8);
        let tx = storage.new_tx();
        let page = setup_page(&tx, BTreePage::NO_OVERFLOW);
        assert!(matches!(
            page.set_value(0, DATA_FIELD, &Constant::from("wrong type")),
            Err(DbError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_find_slot_before() {
        let storage = TestStorage::new(400, 8);
        let tx = storage.new_tx();
        let page = setup_page(&tx, BTreePage::NO_OVERFLOW);
        for (slot, key) in [10, 20, 30].into_iter().enumerate() {
            page.insert_leaf(slot, &Constant::Int(key), Rid::new(1, slot))
                .unwrap();
        }
        assert_eq!(page.find_slot_before(&Constant::Int(5)).unwrap(), None);
        assert_eq!(page.find_slot_before(&Constant::Int(15)).unwrap(), Some(0));
        assert_eq!(page.find_slot_before(&Constant::Int(20)).unwrap(), Some(0));
        assert_eq!(page.find_slot_before(&Constant::Int(25)).unwrap(), Some(1));
        assert_eq!(page.find_slot_before(&Constant::Int(99)).unwrap(), Some(2));
    }
}
