use crate::core::models::particle::ParticleRecord;
use crate::engine::aligner::{Aligner, VolumeRef};
use crate::engine::cache::RoundCache;
use crate::engine::config::SearchConfig;
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::round::{ExpansionRound, Round};
use crate::engine::state::{EngineState, StopReason};
use crate::engine::tasks::seed_reduction::reduce_seeds;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, instrument};

/// The inputs for expanding one tomogram.
#[derive(Debug, Clone)]
pub struct TomogramJob {
    pub name: String,
    pub seeds: Vec<ParticleRecord>,
    pub reference: VolumeRef,
    pub mask: Option<VolumeRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundSummary {
    pub index: usize,
    pub input_count: usize,
    pub accepted_count: usize,
    pub skipped_count: usize,
    pub rejected_count: usize,
    pub failed_count: usize,
}

#[derive(Debug, Clone)]
pub struct ExpansionReport {
    pub tomogram: String,
    /// Rounds loaded from the cache instead of being recomputed.
    pub resumed_rounds: usize,
    /// Rounds run by this invocation, including a final low-yield round that was not kept.
    pub rounds: Vec<RoundSummary>,
    /// Rounds whose output is in the cache, resumed ones included.
    pub rounds_completed: usize,
    pub stop_reason: StopReason,
    /// Every completed round's output, tagged with its source round.
    pub particles: Vec<ParticleRecord>,
}

/// Drives expansion rounds for one tomogram at a time.
pub struct ExpansionEngine<'a, A: Aligner + ?Sized> {
    config: &'a SearchConfig,
    aligner: &'a A,
    cache: &'a RoundCache,
    reporter: &'a ProgressReporter<'a>,
    cancel: Option<&'a AtomicBool>,
}

impl<'a, A: Aligner + ?Sized> ExpansionEngine<'a, A> {
    pub fn new(
        config: &'a SearchConfig,
        aligner: &'a A,
        cache: &'a RoundCache,
        reporter: &'a ProgressReporter<'a>,
    ) -> Self {
        Self {
            config,
            aligner,
            cache,
            reporter,
            cancel: None,
        }
    }

    /// Stops the engine once `flag` is set. A round that is running when the flag is raised
    /// finishes but is not published.
    pub fn with_cancellation(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    #[instrument(skip_all, name = "expansion_workflow", fields(tomogram = %job.name))]
    pub fn run(&self, job: &TomogramJob) -> Result<ExpansionReport, EngineError> {
        let tomogram = job.name.as_str();
        let mut state = EngineState::Init;
        self.reporter.report(Progress::PhaseStart {
            name: "Preparing Expansion".into(),
        });

        if job.seeds.is_empty() {
            return Err(EngineError::NoSeeds {
                tomogram: tomogram.to_string(),
            });
        }

        let resumed = self
            .cache
            .resume(tomogram)
            .map_err(|source| EngineError::Cache {
                tomogram: tomogram.to_string(),
                round: 0,
                source,
            })?;
        let resumed_rounds = resumed.len();

        let mut known: Vec<ParticleRecord> = job.seeds.clone();
        let mut particles: Vec<ParticleRecord> = Vec::new();
        for round in &resumed {
            known.extend(round.particles.iter().cloned());
            particles.extend(round.particles.iter().cloned());
        }

        let mut input = match resumed.last() {
            Some(last) => {
                info!(
                    resumed_rounds,
                    particles = particles.len(),
                    "Resuming from cached rounds."
                );
                last.particles.clone()
            }
            None => reduce_seeds(&job.seeds, self.config.max_seed_count),
        };
        self.reporter.report(Progress::PhaseFinish);

        let mut next_index = resumed_rounds;
        let mut rounds = Vec::new();

        let stop_reason = loop {
            if next_index >= self.config.max_rounds {
                break StopReason::MaxRounds;
            }
            if self.is_cancelled() {
                break StopReason::Cancelled;
            }

            transition(&mut state, EngineState::RoundRunning { index: next_index });
            self.reporter.report(Progress::PhaseStart {
                name: format!("Expansion round {}", next_index).into(),
            });

            let is_first_round = next_index == 0;
            let round = ExpansionRound {
                tomogram,
                index: next_index,
                config: self.config,
                aligner: self.aligner,
                reference: &job.reference,
                mask: job.mask.as_ref(),
                reporter: self.reporter,
            };
            let outcome = round
                .run(&input, &known, is_first_round)
                .map_err(|source| EngineError::RoundFailed {
                    tomogram: tomogram.to_string(),
                    round: next_index,
                    source,
                })?;

            if self.is_cancelled() {
                info!(
                    round = next_index,
                    "Cancelled while the round was running; its output is discarded."
                );
                self.reporter.report(Progress::PhaseFinish);
                break StopReason::Cancelled;
            }

            self.reporter.report(Progress::RoundFinished {
                index: next_index,
                accepted: outcome.accepted_count,
            });
            self.reporter.report(Progress::PhaseFinish);
            rounds.push(RoundSummary {
                index: next_index,
                input_count: input.len(),
                accepted_count: outcome.accepted_count,
                skipped_count: outcome.skipped_count,
                rejected_count: outcome.rejected_count,
                failed_count: outcome.failed_count,
            });

            if outcome.accepted_count <= self.config.min_accept_count {
                break StopReason::LowYield {
                    round: next_index,
                    accepted: outcome.accepted_count,
                };
            }

            let completed = Round {
                index: next_index,
                input_particles: input,
                output_particles: outcome.output_particles,
                accepted_count: outcome.accepted_count,
                is_first_round,
            };
            self.cache
                .publish(tomogram, &completed.manifest(), &completed.output_particles)
                .map_err(|source| EngineError::Cache {
                    tomogram: tomogram.to_string(),
                    round: next_index,
                    source,
                })?;

            known.extend(completed.output_particles.iter().cloned());
            particles.extend(completed.output_particles.iter().cloned());
            input = completed.output_particles;
            next_index += 1;
            transition(&mut state, EngineState::Continue { next_index });
        };

        transition(&mut state, EngineState::Stopped(stop_reason));
        info!(
            reason = %stop_reason,
            rounds_completed = next_index,
            particles = particles.len(),
            "Expansion stopped."
        );

        Ok(ExpansionReport {
            tomogram: tomogram.to_string(),
            resumed_rounds,
            rounds,
            rounds_completed: next_index,
            stop_reason,
            particles,
        })
    }
}

fn transition(state: &mut EngineState, next: EngineState) {
    debug!(from = ?*state, to = ?next, "Engine state transition.");
    *state = next;
}
