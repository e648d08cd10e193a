use super::pick_representative;
use crate::core::models::particle::ParticleRecord;
use crate::engine::utils::cluster::single_linkage_max_clusters;
use tracing::info;

/// Reduces `seeds` to at most `max_seed_count` representatives by clustering positions.
///
/// Seeds already within the limit are returned unchanged.
pub fn reduce_seeds(seeds: &[ParticleRecord], max_seed_count: usize) -> Vec<ParticleRecord> {
    if seeds.len() <= max_seed_count {
        return seeds.to_vec();
    }

    let points: Vec<[f64; 3]> = seeds.iter().map(ParticleRecord::coords).collect();
    let reduced: Vec<ParticleRecord> = single_linkage_max_clusters(&points, max_seed_count)
        .iter()
        .filter_map(|members| pick_representative(seeds, members))
        .cloned()
        .collect();

    info!(
        seeds = seeds.len(),
        kept = reduced.len(),
        max_seed_count,
        "Pre-clustered seeds before the first round."
    );
    reduced
}
