//! # Core Module
//!
//! Fundamental building blocks shared by the expansion engine and the catalog pipeline.
//!
//! - **Particle Representation** ([`models`]) - Poses, particle records and patches
//! - **File I/O** ([`io`]) - Coordinate / motive-list / rotation-axis catalogs and seed lists
//! - **Geometry** ([`utils`]) - Euler ZXZ rotations and local-frame offsets
//!
//! Everything here is free of side effects except the explicit readers and writers in [`io`].

pub mod io;
pub mod models;
pub mod utils;
