//! Infrastructure services

mod coordination_service;

pub use coordination_service::{CoordinationService, ExclusiveWriteConfig, WarmReport};
