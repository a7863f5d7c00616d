pub mod aggregation;
pub mod group_by;
pub mod materialize_plan;
pub mod merge_join;
pub mod sort;
pub mod temp;

use crate::{
    error::DbResult,
    query::{Scan, UpdateScan},
    record::Schema,
};

pub use aggregation::{AggregateKind, AggregationFn};
pub use group_by::{GroupByPlan, GroupByScan};
pub use materialize_plan::MaterializePlan;
pub use merge_join::{MergeJoinPlan, MergeJoinScan};
pub use sort::{RecordComparator, SortPlan, SortScan};
pub use temp::TempTable;

/// Append the current row of `src` to `dest`, one field of `schema` at a time
fn copy_record(src: &dyn Scan, dest: &mut dyn UpdateScan, schema: &Schema) -> DbResult<()> {
    dest.insert()?;
    for field in schema.fields() {
        dest.set_value(field, &src.get_value(field)?)?;
    }
    Ok(())
}
