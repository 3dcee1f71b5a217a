//! Deploy Console Library
//!
//! Real-time deployment status reconciliation for the deploy console.

pub mod app;
pub mod cache;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod notify;
pub mod push;
pub mod reconcile;
pub mod server;
pub mod storage;
pub mod sync;
pub mod trigger;
pub mod utils;
pub mod workers;
