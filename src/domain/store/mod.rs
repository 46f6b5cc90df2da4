//! Store domain - the coordination store contract

mod keys;
mod repository;

pub use keys::KeySpace;
pub use repository::{KeyValueStore, PayloadStream};

#[cfg(test)]
pub use repository::MockKeyValueStore;
