// Inner modules
mod coordinator;
mod listener;

// Exports
pub use coordinator::RebalanceCoordinator;
pub use listener::{ReadPosition, RebalanceListener};
