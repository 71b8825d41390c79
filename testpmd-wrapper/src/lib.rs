//! Pieces of the testpmd wrapper binary that tests drive directly.

pub mod api;
pub mod devices;
