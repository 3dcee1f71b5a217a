//! Push channel: broker subscription delivering deployment status changes

pub mod client;
pub mod fsm;
pub mod message;
pub mod topics;
pub mod transport;
