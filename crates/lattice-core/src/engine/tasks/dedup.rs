use super::pick_representative;
use crate::core::models::particle::ParticleRecord;
use crate::engine::config::DEDUP_CUTOFF_FACTOR;
use crate::engine::utils::cluster::single_linkage;
use tracing::{debug, instrument};

/// Keeps one particle per lattice site.
///
/// Particles closer than `0.8 * repeat_unit_pixels` (through any chain of such neighbours) are
/// treated as the same site, found redundantly from different rounds or offsets. Each site is
/// represented by its best-scoring member. The result is sorted by `(particle_id,
/// source_round)`.
#[instrument(skip_all, name = "dedup_task")]
pub fn dedup(all_particles: &[ParticleRecord], repeat_unit_pixels: f64) -> Vec<ParticleRecord> {
    let cutoff = repeat_unit_pixels * DEDUP_CUTOFF_FACTOR;
    let points: Vec<[f64; 3]> = all_particles.iter().map(ParticleRecord::coords).collect();
    let clusters = single_linkage(&points, cutoff);

    let mut kept: Vec<ParticleRecord> = clusters
        .iter()
        .filter_map(|members| pick_representative(all_particles, members))
        .cloned()
        .collect();
    kept.sort_by(|a, b| {
        a.particle_id
            .cmp(&b.particle_id)
            .then(a.source_round.cmp(&b.source_round))
    });

    debug!(
        input = all_particles.len(),
        sites = kept.len(),
        cutoff,
        "Deduplication complete."
    );
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::particle::EulerZxz;
    use nalgebra::Point3;

    fn particle(x: f64, y: f64, z: f64, ccc: f64, round: u32, id: u32) -> ParticleRecord {
        ParticleRecord {
            position: Point3::new(x, y, z),
            orientation: EulerZxz::default(),
            ccc,
            wedge_weight: 1.0,
            source_round: round,
            particle_id: id,
        }
    }

    #[test]
    fn nearby_particles_collapse_to_one() {
        let particles = vec![
            particle(100.0, 100.0, 100.0, 0.4, 1, 1),
            particle(102.0, 100.0, 100.0, 0.6, 2, 1),
        ];
        let kept = dedup(&particles, 120.0);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].ccc, 0.6);
        assert_eq!(kept[0].source_round, 2);
    }

    #[test]
    fn distinct_sites_are_all_kept() {
        let particles = vec![
            particle(0.0, 0.0, 0.0, 0.5, 1, 1),
            particle(120.0, 0.0, 0.0, 0.5, 1, 2),
            particle(0.0, 120.0, 0.0, 0.5, 1, 3),
        ];
        assert_eq!(dedup(&particles, 120.0).len(), 3);
    }

    #[test]
    fn equal_scores_prefer_earlier_round_then_lower_id() {
        let particles = vec![
            particle(0.0, 0.0, 0.0, 0.7, 3, 1),
            particle(1.0, 0.0, 0.0, 0.7, 1, 9),
            particle(2.0, 0.0, 0.0, 0.7, 1, 4),
        ];
        let kept = dedup(&particles, 120.0);
        assert_eq!(kept.len(), 1);
        assert_eq!((kept[0].source_round, kept[0].particle_id), (1, 4));
    }

    #[test]
    fn output_is_sorted_by_particle_id() {
        let particles = vec![
            particle(0.0, 0.0, 0.0, 0.5, 1, 5),
            particle(500.0, 0.0, 0.0, 0.5, 1, 2),
            particle(1000.0, 0.0, 0.0, 0.5, 2, 2),
        ];
        let ids: Vec<_> = dedup(&particles, 120.0)
            .iter()
            .map(|p| (p.particle_id, p.source_round))
            .collect();
        assert_eq!(ids, vec![(2, 1), (2, 2), (5, 1)]);
    }

    #[test]
    fn dedup_is_idempotent_and_never_grows() {
        let particles: Vec<_> = (0..30)
            .map(|i| {
                let site = (i / 3) as f64;
                let jitter = (i % 3) as f64 * 7.0;
                particle(
                    site * 120.0 + jitter,
                    (i % 2) as f64 * 3.0,
                    0.0,
                    0.3 + (i % 7) as f64 * 0.05,
                    (i % 4) as u32,
                    i as u32 + 1,
                )
            })
            .collect();

        let once = dedup(&particles, 120.0);
        let twice = dedup(&once, 120.0);
        assert!(once.len() <= particles.len());
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(dedup(&[], 120.0).is_empty());
    }
}
