use crate::core::models::particle::ParticleRecord;
use crate::core::models::patch::Patch;
use crate::engine::config::PATCH_CUTOFF_FACTOR;
use crate::engine::utils::cluster::single_linkage;
use tracing::{debug, instrument};

/// Groups deduplicated particles into contiguous patches.
///
/// Connectivity uses `1.5 * repeat_unit_pixels`, looser than the dedup radius. Groups with
/// fewer than `min_patch_size` members are dropped entirely. Surviving patches are numbered
/// from 1 in clustering order.
#[instrument(skip_all, name = "patch_formation_task")]
pub fn form_patches(
    deduped_particles: &[ParticleRecord],
    repeat_unit_pixels: f64,
    min_patch_size: usize,
) -> Vec<Patch> {
    let cutoff = repeat_unit_pixels * PATCH_CUTOFF_FACTOR;
    let points: Vec<[f64; 3]> = deduped_particles
        .iter()
        .map(ParticleRecord::coords)
        .collect();
    let clusters = single_linkage(&points, cutoff);
    let candidate_count = clusters.len();

    let patches: Vec<Patch> = clusters
        .into_iter()
        .filter(|members| members.len() >= min_patch_size)
        .zip(1u32..)
        .map(|(members, patch_id)| {
            Patch::new(
                patch_id,
                members
                    .into_iter()
                    .map(|i| deduped_particles[i].clone())
                    .collect(),
            )
        })
        .collect();

    debug!(
        candidates = candidate_count,
        kept = patches.len(),
        min_patch_size,
        "Patch formation complete."
    );
    patches
}
