//! Persistent caches

pub mod active_set;
