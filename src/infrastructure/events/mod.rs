//! Event infrastructure - Invalidation events across processes

mod listener;

pub use listener::InvalidationListener;
