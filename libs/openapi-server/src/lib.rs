//! Models served to the render layer by the deploy console.

pub mod models;
