//! Wire models for the deployment backend and its push channel.

pub mod models;
