//! Local HTTP API for the console UI

pub mod handlers;
pub mod serve;
pub mod state;
