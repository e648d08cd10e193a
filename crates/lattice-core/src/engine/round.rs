use super::aligner::{
    AlignedPose, Aligner, AlignerError, AlignmentRequest, CandidateOutcome, VolumeRef,
};
use super::cache::RoundManifest;
use super::config::{NEIGHBOR_TOLERANCE_FACTOR, SearchConfig};
use super::progress::{Progress, ProgressReporter};
use crate::core::models::particle::{ParticleRecord, Pose};
use kiddo::SquaredEuclidean;
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use tracing::{debug, info, instrument, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// One iteration of the expansion loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Round {
    pub index: usize,
    pub input_particles: Vec<ParticleRecord>,
    pub output_particles: Vec<ParticleRecord>,
    pub accepted_count: usize,
    pub is_first_round: bool,
}

impl Round {
    pub fn manifest(&self) -> RoundManifest {
        RoundManifest {
            index: self.index,
            is_first_round: self.is_first_round,
            input_count: self.input_particles.len(),
            accepted_count: self.accepted_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundOutcome {
    pub output_particles: Vec<ParticleRecord>,
    pub accepted_count: usize,
    /// Candidates skipped because they sat on an already known site.
    pub skipped_count: usize,
    /// Candidates aligned but failing the score or drift test.
    pub rejected_count: usize,
    /// Candidates the aligner could not score, including timeouts.
    pub failed_count: usize,
}

/// Everything a round needs besides its input particles.
pub struct ExpansionRound<'a, A: Aligner + ?Sized> {
    pub tomogram: &'a str,
    pub index: usize,
    pub config: &'a SearchConfig,
    pub aligner: &'a A,
    pub reference: &'a VolumeRef,
    pub mask: Option<&'a VolumeRef>,
    pub reporter: &'a ProgressReporter<'a>,
}

impl<'a, A: Aligner + ?Sized> ExpansionRound<'a, A> {
    /// Proposes one neighbour per offset for every input particle, aligns the proposals and
    /// keeps those that score at least `ccc_threshold` without drifting half a repeat unit
    /// away from where they were proposed.
    ///
    /// `known_particles` are every particle accepted so far (seeds included); proposals that
    /// land on one of them are not sent to the aligner. Neither slice is modified.
    #[instrument(
        skip_all,
        name = "expansion_round",
        fields(tomogram = self.tomogram, round = self.index)
    )]
    pub fn run(
        &self,
        input_particles: &[ParticleRecord],
        known_particles: &[ParticleRecord],
        is_first_round: bool,
    ) -> Result<RoundOutcome, AlignerError> {
        let tolerance = self.config.repeat_unit_pixels() * NEIGHBOR_TOLERANCE_FACTOR;
        let (candidates, skipped_count) =
            generate_candidates(input_particles, known_particles, self.config, tolerance);

        info!(
            inputs = input_particles.len(),
            candidates = candidates.len(),
            skipped = skipped_count,
            is_first_round,
            "Generated neighbour candidates."
        );

        let outcomes = self.align_candidates(&candidates, is_first_round)?;

        let mut output_particles = Vec::new();
        let mut rejected_count = 0;
        let mut failed_count = 0;
        for (candidate, outcome) in candidates.iter().zip(outcomes) {
            match outcome {
                Ok(aligned) if self.accepts(candidate, &aligned, tolerance) => {
                    output_particles.push(ParticleRecord {
                        position: aligned.pose.position,
                        orientation: aligned.pose.orientation,
                        ccc: aligned.ccc,
                        wedge_weight: aligned.wedge_weight,
                        source_round: self.index as u32,
                        particle_id: output_particles.len() as u32 + 1,
                    });
                }
                Ok(_) => rejected_count += 1,
                Err(failure) => {
                    debug!(error = %failure, "Candidate dropped.");
                    failed_count += 1;
                }
            }
        }

        if failed_count > 0 {
            warn!(
                failed = failed_count,
                "Some candidates could not be aligned and were dropped."
            );
        }

        let accepted_count = output_particles.len();
        info!(
            accepted = accepted_count,
            rejected = rejected_count,
            failed = failed_count,
            "Round finished."
        );

        Ok(RoundOutcome {
            output_particles,
            accepted_count,
            skipped_count,
            rejected_count,
            failed_count,
        })
    }

    fn accepts(&self, intended: &Pose, aligned: &AlignedPose, tolerance: f64) -> bool {
        let drift = (aligned.pose.position - intended.position).norm();
        aligned.ccc >= self.config.ccc_threshold && drift < tolerance
    }

    fn align_candidates(
        &self,
        candidates: &[Pose],
        is_first_round: bool,
    ) -> Result<Vec<CandidateOutcome>, AlignerError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let batches: Vec<&[Pose]> = candidates.chunks(self.config.batch_size).collect();
        self.reporter.report(Progress::TaskStart {
            total_steps: batches.len() as u64,
        });

        #[cfg(not(feature = "parallel"))]
        let iterator = batches.iter();

        #[cfg(feature = "parallel")]
        let iterator = batches.par_iter();

        let results: Vec<Result<Vec<CandidateOutcome>, AlignerError>> = iterator
            .map(|batch| {
                let result = self.align_batch(batch, is_first_round);
                self.reporter.report(Progress::TaskIncrement);
                result
            })
            .collect();

        self.reporter.report(Progress::TaskFinish);

        let mut outcomes = Vec::with_capacity(candidates.len());
        for result in results {
            outcomes.extend(result?);
        }
        Ok(outcomes)
    }

    fn align_batch(
        &self,
        batch: &[Pose],
        is_first_round: bool,
    ) -> Result<Vec<CandidateOutcome>, AlignerError> {
        let request = AlignmentRequest {
            tomogram: self.tomogram,
            round_index: self.index,
            candidates: batch,
            reference: self.reference,
            mask: self.mask,
            window: self.config.window_for(is_first_round),
            box_size: &self.config.box_size,
            refine_reference: self.config.refine_reference,
            timeout: self.config.aligner_timeout,
        };
        let outcomes = self.aligner.align(&request)?;
        if outcomes.len() != batch.len() {
            return Err(AlignerError::ResultCountMismatch {
                expected: batch.len(),
                returned: outcomes.len(),
            });
        }
        Ok(outcomes)
    }
}

fn generate_candidates(
    input_particles: &[ParticleRecord],
    known_particles: &[ParticleRecord],
    config: &SearchConfig,
    tolerance: f64,
) -> (Vec<Pose>, usize) {
    let known_points: Vec<[f64; 3]> = known_particles.iter().map(ParticleRecord::coords).collect();
    let known_tree: Option<ImmutableKdTree<f64, u64, 3, 32>> =
        (!known_points.is_empty()).then(|| ImmutableKdTree::new_from_slice(&known_points));
    let tolerance_sq = tolerance * tolerance;

    let mut candidates = Vec::with_capacity(input_particles.len() * config.neighbor_offsets.len());
    let mut skipped = 0;
    for particle in input_particles {
        let pose = particle.pose();
        for offset in &config.neighbor_offsets {
            let intended = pose.neighbor(offset);
            let query = [intended.position.x, intended.position.y, intended.position.z];
            let on_known_site = known_tree.as_ref().is_some_and(|tree| {
                tree.nearest_one::<SquaredEuclidean>(&query).distance < tolerance_sq
            });
            if on_known_site {
                skipped += 1;
            } else {
                candidates.push(intended);
            }
        }
    }
    (candidates, skipped)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::models::particle::EulerZxz;
    use crate::engine::aligner::CandidateFailure;
    use crate::engine::config::tests::lattice_builder;
    use nalgebra::{Point3, Vector3};
    use std::sync::Mutex;

    /// Returns each candidate unchanged with a fixed score.
    pub(crate) struct EchoAligner {
        pub ccc: f64,
        pub shift: Vector3<f64>,
        pub requests: Mutex<Vec<(usize, Vector3<f64>, usize)>>,
    }

    impl EchoAligner {
        pub(crate) fn new(ccc: f64) -> Self {
            Self {
                ccc,
                shift: Vector3::zeros(),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl Aligner for EchoAligner {
        fn align(
            &self,
            request: &AlignmentRequest<'_>,
        ) -> Result<Vec<CandidateOutcome>, AlignerError> {
            self.requests.lock().unwrap().push((
                request.round_index,
                request.window.angular_range,
                request.candidates.len(),
            ));
            Ok(request
                .candidates
                .iter()
                .map(|pose| {
                    Ok(AlignedPose {
                        ccc: self.ccc,
                        pose: Pose::new(pose.position + self.shift, pose.orientation),
                        wedge_weight: 1.0,
                    })
                })
                .collect())
        }
    }

    struct FlakyAligner;

    impl Aligner for FlakyAligner {
        fn align(
            &self,
            request: &AlignmentRequest<'_>,
        ) -> Result<Vec<CandidateOutcome>, AlignerError> {
            Ok(request
                .candidates
                .iter()
                .enumerate()
                .map(|(i, pose)| {
                    if i % 2 == 0 {
                        Err(CandidateFailure::TimedOut)
                    } else {
                        Ok(AlignedPose {
                            ccc: 0.9,
                            pose: *pose,
                            wedge_weight: 1.0,
                        })
                    }
                })
                .collect())
        }
    }

    struct DownAligner;

    impl Aligner for DownAligner {
        fn align(&self, _: &AlignmentRequest<'_>) -> Result<Vec<CandidateOutcome>, AlignerError> {
            Err(AlignerError::Unreachable("connection refused".to_string()))
        }
    }

    struct ShortAligner;

    impl Aligner for ShortAligner {
        fn align(&self, _: &AlignmentRequest<'_>) -> Result<Vec<CandidateOutcome>, AlignerError> {
            Ok(Vec::new())
        }
    }

    pub(crate) fn spaced_seeds(count: usize) -> Vec<ParticleRecord> {
        (0..count)
            .map(|i| {
                ParticleRecord::seed(
                    i as u32 + 1,
                    Pose::new(
                        Point3::new(0.0, i as f64 * 1000.0, 0.0),
                        EulerZxz::new((i * 15) as f64, 0.0, 0.0),
                    ),
                )
            })
            .collect()
    }

    fn round<'a, A: Aligner>(
        config: &'a SearchConfig,
        aligner: &'a A,
        reference: &'a VolumeRef,
        reporter: &'a ProgressReporter<'a>,
    ) -> ExpansionRound<'a, A> {
        ExpansionRound {
            tomogram: "tomo",
            index: 0,
            config,
            aligner,
            reference,
            mask: None,
            reporter,
        }
    }

    #[test]
    fn each_seed_yields_one_neighbour_offset_in_its_local_frame() {
        let config = lattice_builder().build().unwrap();
        let aligner = EchoAligner::new(0.5);
        let reference = VolumeRef::new("ref.mrc");
        let reporter = ProgressReporter::new();
        let seeds = spaced_seeds(10);

        let outcome = round(&config, &aligner, &reference, &reporter)
            .run(&seeds, &seeds, true)
            .unwrap();

        assert_eq!(outcome.accepted_count, 10);
        assert_eq!(outcome.output_particles.len(), 10);
        for (seed, found) in seeds.iter().zip(&outcome.output_particles) {
            let expected =
                seed.position + seed.orientation.to_rotation() * Vector3::new(120.0, 0.0, 0.0);
            assert!((found.position - expected).norm() < 1e-9);
            assert!(found.ccc >= config.ccc_threshold);
            assert_eq!(found.source_round, 0);
        }
        let ids: Vec<_> = outcome.output_particles.iter().map(|p| p.particle_id).collect();
        assert_eq!(ids, (1..=10).collect::<Vec<u32>>());
    }

    #[test]
    fn low_scores_are_rejected() {
        let config = lattice_builder().ccc_threshold(0.6).build().unwrap();
        let aligner = EchoAligner::new(0.5);
        let reference = VolumeRef::new("ref.mrc");
        let reporter = ProgressReporter::new();
        let seeds = spaced_seeds(3);

        let outcome = round(&config, &aligner, &reference, &reporter)
            .run(&seeds, &seeds, true)
            .unwrap();

        assert_eq!(outcome.accepted_count, 0);
        assert_eq!(outcome.rejected_count, 3);
    }

    #[test]
    fn candidates_drifting_half_a_repeat_unit_are_rejected() {
        let config = lattice_builder().build().unwrap();
        let mut aligner = EchoAligner::new(0.9);
        aligner.shift = Vector3::new(0.0, 60.0, 0.0);
        let reference = VolumeRef::new("ref.mrc");
        let reporter = ProgressReporter::new();
        let seeds = spaced_seeds(2);

        let outcome = round(&config, &aligner, &reference, &reporter)
            .run(&seeds, &seeds, true)
            .unwrap();

        assert_eq!(outcome.accepted_count, 0);
        assert_eq!(outcome.rejected_count, 2);
    }

    #[test]
    fn candidates_on_known_sites_are_not_sent_to_the_aligner() {
        let config = lattice_builder()
            .neighbor_offsets(vec![Vector3::new(120.0, 0.0, 0.0), Vector3::new(-120.0, 0.0, 0.0)])
            .build()
            .unwrap();
        let aligner = EchoAligner::new(0.9);
        let reference = VolumeRef::new("ref.mrc");
        let reporter = ProgressReporter::new();
        let input = vec![ParticleRecord::seed(
            1,
            Pose::new(Point3::new(120.0, 0.0, 0.0), EulerZxz::default()),
        )];
        let mut known = input.clone();
        known.push(ParticleRecord::seed(
            2,
            Pose::new(Point3::new(5.0, 0.0, 0.0), EulerZxz::default()),
        ));

        let outcome = round(&config, &aligner, &reference, &reporter)
            .run(&input, &known, false)
            .unwrap();

        assert_eq!(outcome.skipped_count, 1);
        assert_eq!(outcome.accepted_count, 1);
        let found = outcome.output_particles[0].position;
        assert!((found - Point3::new(240.0, 0.0, 0.0)).norm() < 1e-9);
        let requests = aligner.requests.lock().unwrap();
        assert_eq!(requests.iter().map(|r| r.2).sum::<usize>(), 1);
    }

    #[test]
    fn later_rounds_use_the_narrow_search_window() {
        let config = lattice_builder().build().unwrap();
        let aligner = EchoAligner::new(0.9);
        let reference = VolumeRef::new("ref.mrc");
        let reporter = ProgressReporter::new();
        let seeds = spaced_seeds(1);

        round(&config, &aligner, &reference, &reporter)
            .run(&seeds, &seeds, false)
            .unwrap();

        let requests = aligner.requests.lock().unwrap();
        assert_eq!(requests[0].1, config.later_rounds.angular_range);
    }

    #[test]
    fn candidates_are_batched_by_batch_size() {
        let config = lattice_builder().batch_size(4).build().unwrap();
        let aligner = EchoAligner::new(0.9);
        let reference = VolumeRef::new("ref.mrc");
        let reporter = ProgressReporter::new();
        let seeds = spaced_seeds(10);

        let outcome = round(&config, &aligner, &reference, &reporter)
            .run(&seeds, &seeds, true)
            .unwrap();

        assert_eq!(outcome.accepted_count, 10);
        let mut sizes: Vec<_> = aligner.requests.lock().unwrap().iter().map(|r| r.2).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![2, 4, 4]);
    }

    #[test]
    fn per_candidate_failures_are_dropped_without_failing_the_round() {
        let config = lattice_builder().build().unwrap();
        let reference = VolumeRef::new("ref.mrc");
        let reporter = ProgressReporter::new();
        let seeds = spaced_seeds(4);

        let outcome = round(&config, &FlakyAligner, &reference, &reporter)
            .run(&seeds, &seeds, true)
            .unwrap();

        assert_eq!(outcome.failed_count, 2);
        assert_eq!(outcome.accepted_count, 2);
    }

    #[test]
    fn unreachable_aligner_fails_the_round() {
        let config = lattice_builder().build().unwrap();
        let reference = VolumeRef::new("ref.mrc");
        let reporter = ProgressReporter::new();
        let seeds = spaced_seeds(2);

        let result = round(&config, &DownAligner, &reference, &reporter).run(&seeds, &seeds, true);
        assert!(matches!(result, Err(AlignerError::Unreachable(_))));
    }

    #[test]
    fn short_result_list_is_a_protocol_error() {
        let config = lattice_builder().build().unwrap();
        let reference = VolumeRef::new("ref.mrc");
        let reporter = ProgressReporter::new();
        let seeds = spaced_seeds(2);

        let result = round(&config, &ShortAligner, &reference, &reporter).run(&seeds, &seeds, true);
        assert!(matches!(
            result,
            Err(AlignerError::ResultCountMismatch {
                expected: 2,
                returned: 0
            })
        ));
    }

    #[test]
    fn run_does_not_modify_its_inputs() {
        let config = lattice_builder().build().unwrap();
        let aligner = EchoAligner::new(0.9);
        let reference = VolumeRef::new("ref.mrc");
        let reporter = ProgressReporter::new();
        let seeds = spaced_seeds(3);
        let before = seeds.clone();

        round(&config, &aligner, &reference, &reporter)
            .run(&seeds, &seeds, true)
            .unwrap();
        assert_eq!(seeds, before);
    }
}
