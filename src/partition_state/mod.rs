// Inner modules
mod cache;
mod state;

// Exports
pub use cache::{PartitionStateCache, SharedPartitionStateCache};
pub use state::{PartitionState, NO_OFFSET};
