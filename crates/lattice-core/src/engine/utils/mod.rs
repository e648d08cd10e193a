//! Utility functions for the engine module.
//!
//! Spatial clustering shared by seed reduction, deduplication and patch formation.

pub mod cluster;
