//! Post-processing tasks built on the clustering primitive.
//!
//! - [`seed_reduction`] - Bounds the number of seeds entering round 0
//! - [`dedup`] - Collapses particles found more than once onto one representative per site
//! - [`patches`] - Groups deduplicated sites into contiguous, size-filtered patches

pub mod dedup;
pub mod patches;
pub mod seed_reduction;

use crate::core::models::particle::ParticleRecord;
use std::cmp::Ordering;

/// Orders particles so the preferred representative of a site comes first: highest CCC,
/// then earliest round, then lowest id.
pub(crate) fn representative_order(a: &ParticleRecord, b: &ParticleRecord) -> Ordering {
    b.ccc
        .total_cmp(&a.ccc)
        .then(a.source_round.cmp(&b.source_round))
        .then(a.particle_id.cmp(&b.particle_id))
}

pub(crate) fn pick_representative<'a>(
    particles: &'a [ParticleRecord],
    members: &[usize],
) -> Option<&'a ParticleRecord> {
    members
        .iter()
        .map(|&i| &particles[i])
        .min_by(|a, b| representative_order(a, b))
}
