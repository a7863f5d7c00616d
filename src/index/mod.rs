pub mod btree;
pub mod hash;
pub mod index_plan;
pub mod index_scan;

use std::{fmt::Display, str::FromStr};

use crate::{
    error::DbResult,
    query::Constant,
    record::{FieldType, Layout, Rid, Schema},
};

pub use btree::BTreeIndex;
pub use hash::HashIndex;
pub use index_plan::{IndexJoinPlan, IndexSelectPlan};
pub use index_scan::{IndexJoinScan, IndexSelectScan};

/// Field holding the block number of the indexed record (or of a child node in a B-tree directory)
pub const BLOCK_FIELD: &str = "block";
/// Field holding the slot of the indexed record
pub const ID_FIELD: &str = "id";
/// Field holding the indexed value
pub const DATA_FIELD: &str = "dataval";

/// A map from values of one field to the rids of the records holding them
///
/// `before_first` positions the index before the first entry for a key, `next` moves
/// to the following entry with that key.
pub trait Index {
    fn before_first(&mut self, search_key: &Constant) -> DbResult<()>;
    fn next(&mut self) -> DbResult<bool>;
    fn get_data_rid(&self) -> DbResult<Rid>;
    fn insert(&mut self, data_val: &Constant, data_rid: Rid) -> DbResult<()>;
    fn delete(&mut self, data_val: &Constant, data_rid: Rid) -> DbResult<()>;
    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IndexKind {
    #[default]
    BTree,
    Hash,
}

impl Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexKind::BTree => write!(f, "btree"),
            IndexKind::Hash => write!(f, "hash"),
        }
    }
}

impl FromStr for IndexKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "btree" => Ok(IndexKind::BTree),
            "hash" => Ok(IndexKind::Hash),
            other => Err(format!("unknown index kind {other}")),
        }
    }
}

/// The record layout of an index entry whose key has the given type
pub fn entry_layout(field_type: FieldType, length: usize) -> Layout {
    let mut schema = Schema::new();
    schema.add_int_field(BLOCK_FIELD);
    schema.add_int_field(ID_FIELD);
    schema.add_field(DATA_FIELD, field_type, length);
    Layout::new(schema)
}
