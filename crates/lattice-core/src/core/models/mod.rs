//! Data models for picked particles.
//!
//! A [`particle::ParticleRecord`] is produced every time the engine accepts a candidate and is
//! never mutated afterwards. Records are grouped into [`patch::Patch`]es at the end of the
//! pipeline.

pub mod particle;
pub mod patch;
