//! Readers and writers for the plain-text particle formats.
//!
//! - [`catalog`] - The three line-aligned files (coordinates, motive list, rotation axes) used
//!   both for per-round caches and for the final catalog.
//! - [`seeds`] - Seed lists supplied by the user to bootstrap an expansion.

pub mod catalog;
pub mod seeds;
