//! End-to-end procedures built from the engine: expanding a tomogram round by round, and turning
//! its cached rounds into a final catalog.

pub mod catalog;
pub mod expand;
