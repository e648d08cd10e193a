use nalgebra::Vector3;
use std::time::Duration;
use thiserror::Error;

/// Fraction of a repeat unit within which a candidate is considered to sit on a known site,
/// and within which the aligner may move a candidate before it is rejected as drifted.
pub const NEIGHBOR_TOLERANCE_FACTOR: f64 = 0.5;
/// Fraction of a repeat unit under which two particles are the same lattice site.
pub const DEDUP_CUTOFF_FACTOR: f64 = 0.8;
/// Fraction of a repeat unit under which two sites belong to the same patch.
pub const PATCH_CUTOFF_FACTOR: f64 = 1.5;

pub const DEFAULT_MIN_PATCH_SIZE: usize = 3;
pub const DEFAULT_BATCH_SIZE: usize = 64;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid value for '{parameter}': {reason}")]
    InvalidValue {
        parameter: &'static str,
        reason: String,
    },
}

/// Angular and translational search window handed to the aligner for one round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchWindow {
    pub angular_range: Vector3<f64>,
    pub angular_step: Vector3<f64>,
    pub translation_range: Vector3<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    /// Wide search used for round 0, where seed orientations are only roughly known.
    pub first_round: SearchWindow,
    /// Narrower local refinement used from round 1 onwards.
    pub later_rounds: SearchWindow,
    /// Neighbor offsets in the particle's local frame (the transition list).
    pub neighbor_offsets: Vec<Vector3<f64>>,
    pub box_size: Vector3<f64>,
    /// Lattice spacing in physical units (Å).
    pub repeating_unit_distance: f64,
    /// Pixel size in Å per voxel.
    pub pixel_size: f64,
    pub ccc_threshold: f64,
    pub min_accept_count: usize,
    pub max_rounds: usize,
    pub refine_reference: bool,
    pub max_seed_count: usize,
    pub min_patch_size: usize,
    pub batch_size: usize,
    pub aligner_timeout: Option<Duration>,
}

impl SearchConfig {
    /// Lattice spacing in voxels; every distance cutoff is a multiple of this.
    #[inline]
    pub fn repeat_unit_pixels(&self) -> f64 {
        self.repeating_unit_distance / self.pixel_size
    }

    #[inline]
    pub fn window_for(&self, is_first_round: bool) -> &SearchWindow {
        if is_first_round {
            &self.first_round
        } else {
            &self.later_rounds
        }
    }
}

#[derive(Default, Clone)]
pub struct SearchConfigBuilder {
    angular_range_round0: Option<Vector3<f64>>,
    angular_step_round0: Option<Vector3<f64>>,
    angular_range_later: Option<Vector3<f64>>,
    angular_step_later: Option<Vector3<f64>>,
    translation_range_round0: Option<Vector3<f64>>,
    translation_range_later: Option<Vector3<f64>>,
    neighbor_offsets: Option<Vec<Vector3<f64>>>,
    box_size: Option<Vector3<f64>>,
    repeating_unit_distance: Option<f64>,
    pixel_size: Option<f64>,
    ccc_threshold: Option<f64>,
    min_accept_count: Option<usize>,
    max_rounds: Option<usize>,
    refine_reference: Option<bool>,
    max_seed_count: Option<usize>,
    min_patch_size: Option<usize>,
    batch_size: Option<usize>,
    aligner_timeout: Option<Duration>,
}

impl SearchConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn angular_range_round0(mut self, range: Vector3<f64>) -> Self {
        self.angular_range_round0 = Some(range);
        self
    }
    pub fn angular_step_round0(mut self, step: Vector3<f64>) -> Self {
        self.angular_step_round0 = Some(step);
        self
    }
    pub fn angular_range_later(mut self, range: Vector3<f64>) -> Self {
        self.angular_range_later = Some(range);
        self
    }
    pub fn angular_step_later(mut self, step: Vector3<f64>) -> Self {
        self.angular_step_later = Some(step);
        self
    }
    pub fn translation_range_round0(mut self, range: Vector3<f64>) -> Self {
        self.translation_range_round0 = Some(range);
        self
    }
    pub fn translation_range_later(mut self, range: Vector3<f64>) -> Self {
        self.translation_range_later = Some(range);
        self
    }
    pub fn neighbor_offsets(mut self, offsets: Vec<Vector3<f64>>) -> Self {
        self.neighbor_offsets = Some(offsets);
        self
    }
    pub fn box_size(mut self, size: Vector3<f64>) -> Self {
        self.box_size = Some(size);
        self
    }
    pub fn repeating_unit_distance(mut self, distance: f64) -> Self {
        self.repeating_unit_distance = Some(distance);
        self
    }
    pub fn pixel_size(mut self, apix: f64) -> Self {
        self.pixel_size = Some(apix);
        self
    }
    pub fn ccc_threshold(mut self, threshold: f64) -> Self {
        self.ccc_threshold = Some(threshold);
        self
    }
    pub fn min_accept_count(mut self, count: usize) -> Self {
        self.min_accept_count = Some(count);
        self
    }
    pub fn max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = Some(rounds);
        self
    }
    pub fn refine_reference(mut self, refine: bool) -> Self {
        self.refine_reference = Some(refine);
        self
    }
    pub fn max_seed_count(mut self, count: usize) -> Self {
        self.max_seed_count = Some(count);
        self
    }
    pub fn min_patch_size(mut self, size: usize) -> Self {
        self.min_patch_size = Some(size);
        self
    }
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }
    pub fn aligner_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.aligner_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<SearchConfig, ConfigError> {
        let first_round = SearchWindow {
            angular_range: self
                .angular_range_round0
                .ok_or(ConfigError::MissingParameter("angular_range_round0"))?,
            angular_step: self
                .angular_step_round0
                .ok_or(ConfigError::MissingParameter("angular_step_round0"))?,
            translation_range: self
                .translation_range_round0
                .ok_or(ConfigError::MissingParameter("translation_range_round0"))?,
        };
        let later_rounds = SearchWindow {
            angular_range: self
                .angular_range_later
                .ok_or(ConfigError::MissingParameter("angular_range_later"))?,
            angular_step: self
                .angular_step_later
                .ok_or(ConfigError::MissingParameter("angular_step_later"))?,
            translation_range: self
                .translation_range_later
                .ok_or(ConfigError::MissingParameter("translation_range_later"))?,
        };

        let config = SearchConfig {
            first_round,
            later_rounds,
            neighbor_offsets: self
                .neighbor_offsets
                .ok_or(ConfigError::MissingParameter("neighbor_offsets"))?,
            box_size: self
                .box_size
                .ok_or(ConfigError::MissingParameter("box_size"))?,
            repeating_unit_distance: self
                .repeating_unit_distance
                .ok_or(ConfigError::MissingParameter("repeating_unit_distance"))?,
            pixel_size: self
                .pixel_size
                .ok_or(ConfigError::MissingParameter("pixel_size"))?,
            ccc_threshold: self
                .ccc_threshold
                .ok_or(ConfigError::MissingParameter("ccc_threshold"))?,
            min_accept_count: self
                .min_accept_count
                .ok_or(ConfigError::MissingParameter("min_accept_count"))?,
            max_rounds: self
                .max_rounds
                .ok_or(ConfigError::MissingParameter("max_rounds"))?,
            refine_reference: self.refine_reference.unwrap_or(false),
            max_seed_count: self
                .max_seed_count
                .ok_or(ConfigError::MissingParameter("max_seed_count"))?,
            min_patch_size: self.min_patch_size.unwrap_or(DEFAULT_MIN_PATCH_SIZE),
            batch_size: self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            aligner_timeout: self.aligner_timeout,
        };
        validate(&config)?;
        Ok(config)
    }
}

fn invalid(parameter: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        parameter,
        reason: reason.into(),
    }
}

fn require_finite_non_negative(
    parameter: &'static str,
    v: &Vector3<f64>,
) -> Result<(), ConfigError> {
    if v.iter().all(|c| c.is_finite() && *c >= 0.0) {
        Ok(())
    } else {
        Err(invalid(
            parameter,
            format!("expected non-negative components, got {:?}", v.as_slice()),
        ))
    }
}

fn require_positive(parameter: &'static str, v: f64) -> Result<(), ConfigError> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(invalid(parameter, format!("expected a positive number, got {}", v)))
    }
}

fn validate(config: &SearchConfig) -> Result<(), ConfigError> {
    let windows = [
        (
            &config.first_round,
            "angular_range_round0",
            "angular_step_round0",
            "translation_range_round0",
        ),
        (
            &config.later_rounds,
            "angular_range_later",
            "angular_step_later",
            "translation_range_later",
        ),
    ];
    for (window, range, step, translation) in windows {
        require_finite_non_negative(range, &window.angular_range)?;
        require_finite_non_negative(translation, &window.translation_range)?;
        require_finite_non_negative(step, &window.angular_step)?;
        let searches_without_step = window
            .angular_range
            .iter()
            .zip(window.angular_step.iter())
            .any(|(r, s)| *r > 0.0 && *s <= 0.0);
        if searches_without_step {
            return Err(invalid(step, "a non-zero angular range needs a positive step"));
        }
    }

    if config.neighbor_offsets.is_empty() {
        return Err(invalid("neighbor_offsets", "at least one offset is required"));
    }
    if let Some(bad) = config
        .neighbor_offsets
        .iter()
        .find(|o| !o.iter().all(|c| c.is_finite()) || o.norm() == 0.0)
    {
        return Err(invalid(
            "neighbor_offsets",
            format!("offsets must be finite and non-zero, got {:?}", bad.as_slice()),
        ));
    }

    if !config.box_size.iter().all(|c| c.is_finite() && *c > 0.0) {
        return Err(invalid("box_size", "all dimensions must be positive"));
    }
    require_positive("repeating_unit_distance", config.repeating_unit_distance)?;
    require_positive("pixel_size", config.pixel_size)?;
    if !config.ccc_threshold.is_finite() {
        return Err(invalid("ccc_threshold", "must be a finite number"));
    }
    if config.max_rounds == 0 {
        return Err(invalid("max_rounds", "must be at least 1"));
    }
    if config.max_seed_count == 0 {
        return Err(invalid("max_seed_count", "must be at least 1"));
    }
    if config.min_patch_size == 0 {
        return Err(invalid("min_patch_size", "must be at least 1"));
    }
    if config.batch_size == 0 {
        return Err(invalid("batch_size", "must be at least 1"));
    }
    if config.aligner_timeout.is_some_and(|t| t.is_zero()) {
        return Err(invalid("aligner_timeout", "must be longer than zero"));
    }
    Ok(())
}
