//! Lock infrastructure - Distributed lock over the shared store

mod distributed;

pub use distributed::DistributedLock;
