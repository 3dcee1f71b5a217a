//! Reconciliation of speculative and authoritative deployment records

pub mod matcher;
pub mod store;
