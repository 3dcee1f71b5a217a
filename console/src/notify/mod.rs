//! User-facing deployment alerts

pub mod emitter;
