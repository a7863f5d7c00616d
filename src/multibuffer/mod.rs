pub mod buffer_needs;
pub mod chunk_scan;
pub mod product;

pub use buffer_needs::best_factor;
pub use chunk_scan::ChunkScan;
pub use product::{MultiBufferProductPlan, MultiBufferProductScan};
