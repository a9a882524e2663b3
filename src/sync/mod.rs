//! Keeps cached data current from timers, push messages and user actions.

mod coordinator;
pub mod tasks;

pub use coordinator::SyncCoordinator;
