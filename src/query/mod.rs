pub mod constant;
pub mod predicate;
pub mod scans;

use crate::{error::DbResult, record::Rid};

pub use constant::Constant;
pub use predicate::{Expression, Operator, Predicate, Term};
pub use scans::{ProductScan, ProjectScan, SelectScan};

/// The capability set shared by every iterator in a query tree
///
/// A scan starts positioned before its first row. After `next` returns `false` the
/// position is undefined until `before_first` is called again.
pub trait Scan {
    fn before_first(&mut self) -> DbResult<()>;
    fn next(&mut self) -> DbResult<bool>;
    fn get_int(&self, field_name: &str) -> DbResult<i32>;
    fn get_string(&self, field_name: &str) -> DbResult<String>;
    fn get_value(&self, field_name: &str) -> DbResult<Constant>;
    fn has_field(&self, field_name: &str) -> bool;
    fn close(&mut self);

    /// The writable view of this scan, if the scan can modify the rows it yields
    fn as_update(&mut self) -> Option<&mut dyn UpdateScan> {
        None
    }
}

/// Scans whose rows map one-to-one onto stored records
pub trait UpdateScan: Scan {
    fn set_int(&mut self, field_name: &str, value: i32) -> DbResult<()>;
    fn set_string(&mut self, field_name: &str, value: &str) -> DbResult<()>;
    fn set_value(&mut self, field_name: &str, value: &Constant) -> DbResult<()>;
    fn insert(&mut self) -> DbResult<()>;
    fn delete(&mut self) -> DbResult<()>;
    fn get_rid(&mut self) -> DbResult<Rid>;
    fn move_to_rid(&mut self, rid: Rid) -> DbResult<()>;
}
