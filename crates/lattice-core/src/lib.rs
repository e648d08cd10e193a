//! # latticepick Core Library
//!
//! Discovery and refinement of particles arranged on a repeating lattice inside a
//! tomographic density map, starting from a handful of picked seeds and a single reference.
//!
//! ## Architectural Philosophy
//!
//! The library keeps the same three-layer split used throughout the project:
//!
//! - **[`core`]: The Foundation.** Stateless data models (`ParticleRecord`, `Patch`),
//!   Euler-angle geometry and the line-aligned catalog file format.
//!
//! - **[`engine`]: The Logic Core.** Search configuration, the `Aligner` capability,
//!   a single expansion round, the on-disk round cache, and the clustering tasks used for
//!   seed reduction, deduplication and patch formation.
//!
//! - **[`workflows`]: The Public API.** Drives the round loop for one tomogram and turns the
//!   cached rounds into a final, patch-labeled catalog.

pub mod core;
pub mod engine;
pub mod workflows;
