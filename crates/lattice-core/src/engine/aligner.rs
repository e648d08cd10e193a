//! The alignment capability consumed by the expansion engine.
//!
//! Scoring a candidate pose against the reference (rotational and translational search,
//! cross-correlation) happens outside this crate. The engine only needs the narrow contract
//! below: one outcome per candidate, in the order the candidates were given.

use super::config::SearchWindow;
use crate::core::models::particle::Pose;
use nalgebra::Vector3;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Handle to a density volume the aligner can read (reference or mask).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRef {
    pub path: PathBuf,
}

impl VolumeRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone)]
pub struct AlignmentRequest<'a> {
    pub tomogram: &'a str,
    pub round_index: usize,
    pub candidates: &'a [Pose],
    pub reference: &'a VolumeRef,
    pub mask: Option<&'a VolumeRef>,
    pub window: &'a SearchWindow,
    pub box_size: &'a Vector3<f64>,
    /// Whether the aligner should substitute the previous round's average for the reference.
    pub refine_reference: bool,
    pub timeout: Option<Duration>,
}

/// A refined pose with its score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignedPose {
    pub ccc: f64,
    pub pose: Pose,
    pub wedge_weight: f64,
}

/// Why a single candidate produced no result. Never fatal to a round.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CandidateFailure {
    #[error("alignment timed out")]
    TimedOut,
    #[error("alignment failed: {0}")]
    Failed(String),
}

pub type CandidateOutcome = Result<AlignedPose, CandidateFailure>;

/// Errors that make the whole round unusable.
#[derive(Debug, Error)]
pub enum AlignerError {
    #[error("Aligner is unreachable: {0}")]
    Unreachable(String),

    #[error("Reference volume '{path}' is unreadable: {reason}", path = path.display())]
    Reference { path: PathBuf, reason: String },

    #[error("Aligner returned {returned} result(s) for {expected} candidate(s)")]
    ResultCountMismatch { expected: usize, returned: usize },

    #[error("Aligner I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait Aligner: Sync {
    /// Refines every candidate in `request.candidates`.
    ///
    /// Must return exactly one outcome per candidate, in order. Problems with individual
    /// candidates belong in the outcome; an `Err` aborts the round.
    fn align(&self, request: &AlignmentRequest<'_>) -> Result<Vec<CandidateOutcome>, AlignerError>;
}
