//! Runs an external subtomogram-alignment program once per candidate batch.
//!
//! For every batch a scratch directory is created holding the candidates as a catalog
//! (`coordinates.txt`, `motive_list.csv`, `rotation_axes.txt`). The configured program is started
//! with `{placeholder}` arguments filled in and must write a CSV with the header
//! `index,ccc,x,y,z,phi,theta,psi[,wedge_weight]`, one row per candidate it scored. `index` is
//! the candidate's 1-based line in the motive list.
//!
//! Placeholders: `{input_dir}`, `{motive_list}`, `{coordinates}`, `{output}`, `{reference}`,
//! `{mask}`, `{tomogram}`, `{round}`, `{box_size}`, `{angular_range}`, `{angular_step}`,
//! `{translation_range}`, `{refine_reference}`.

use crate::config::models::AlignerCommand;
use latticepick::core::io::catalog::{self, CatalogEntry, CatalogPaths};
use latticepick::core::models::particle::{EulerZxz, ParticleRecord, Pose};
use latticepick::engine::aligner::{
    AlignedPose, Aligner, AlignerError, AlignmentRequest, CandidateFailure, CandidateOutcome,
};
use nalgebra::{Point3, Vector3};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const RESULTS_FILE: &str = "results.csv";
const LOG_FILE: &str = "aligner.log";
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Deserialize)]
struct ResultRow {
    index: usize,
    ccc: f64,
    x: f64,
    y: f64,
    z: f64,
    phi: f64,
    theta: f64,
    psi: f64,
    #[serde(default = "default_wedge_weight")]
    wedge_weight: f64,
}

fn default_wedge_weight() -> f64 {
    1.0
}

enum RunOutcome {
    Exited(ExitStatus),
    TimedOut,
}

pub struct ExternalAligner {
    command: AlignerCommand,
}

impl ExternalAligner {
    pub fn new(command: AlignerCommand) -> Self {
        Self { command }
    }

    fn scratch_dir(
        &self,
        request: &AlignmentRequest<'_>,
    ) -> Result<tempfile::TempDir, AlignerError> {
        let mut builder = tempfile::Builder::new();
        let prefix = format!("{}_round{:03}_", request.tomogram, request.round_index);
        builder.prefix(&prefix);
        let dir = match &self.command.scratch_dir {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    fn arguments(&self, request: &AlignmentRequest<'_>, scratch: &Path) -> Vec<String> {
        let inputs = CatalogPaths::in_dir(scratch);
        let window = request.window;
        let placeholders: [(&str, String); 13] = [
            ("{input_dir}", scratch.display().to_string()),
            ("{motive_list}", inputs.motive_list.display().to_string()),
            ("{coordinates}", inputs.coordinates.display().to_string()),
            ("{output}", scratch.join(RESULTS_FILE).display().to_string()),
            ("{reference}", request.reference.path().display().to_string()),
            (
                "{mask}",
                request
                    .mask
                    .map(|m| m.path().display().to_string())
                    .unwrap_or_default(),
            ),
            ("{tomogram}", request.tomogram.to_string()),
            ("{round}", request.round_index.to_string()),
            ("{box_size}", triplet(request.box_size)),
            ("{angular_range}", triplet(&window.angular_range)),
            ("{angular_step}", triplet(&window.angular_step)),
            ("{translation_range}", triplet(&window.translation_range)),
            ("{refine_reference}", request.refine_reference.to_string()),
        ];
        self.command
            .args
            .iter()
            .map(|arg| {
                placeholders
                    .iter()
                    .fold(arg.clone(), |acc, (key, value)| acc.replace(key, value))
            })
            .collect()
    }

    fn run_program(
        &self,
        args: &[String],
        scratch: &Path,
        timeout: Option<Duration>,
    ) -> Result<RunOutcome, AlignerError> {
        let log = File::create(scratch.join(LOG_FILE))?;
        let mut command = Command::new(&self.command.program);
        command
            .args(args)
            .current_dir(scratch)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log));
        // Keeps a terminal interrupt aimed at latticepick from reaching the aligner.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut child = command
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => AlignerError::Unreachable(
                    format!("cannot start '{}': {}", self.command.program.display(), e),
                ),
                _ => AlignerError::Io(e),
            })?;

        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(RunOutcome::Exited(status));
            }
            if timeout.is_some_and(|limit| started.elapsed() >= limit) {
                child.kill()?;
                child.wait()?;
                return Ok(RunOutcome::TimedOut);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Aligner for ExternalAligner {
    fn align(&self, request: &AlignmentRequest<'_>) -> Result<Vec<CandidateOutcome>, AlignerError> {
        let count = request.candidates.len();
        if !request.reference.path().is_file() {
            return Err(AlignerError::Reference {
                path: request.reference.path().to_path_buf(),
                reason: "file not found".to_string(),
            });
        }

        let scratch = self.scratch_dir(request)?;
        let entries: Vec<CatalogEntry> = request
            .candidates
            .iter()
            .zip(1u32..)
            .map(|(pose, particle_id)| {
                CatalogEntry::unpatched(ParticleRecord {
                    position: pose.position,
                    orientation: pose.orientation,
                    ccc: 0.0,
                    wedge_weight: 1.0,
                    source_round: request.round_index as u32,
                    particle_id,
                })
            })
            .collect();
        catalog::write_catalog(&CatalogPaths::in_dir(scratch.path()), &entries)
            .map_err(|e| AlignerError::Io(std::io::Error::other(e.to_string())))?;

        let args = self.arguments(request, scratch.path());
        debug!(
            program = %self.command.program.display(),
            candidates = count,
            scratch = %scratch.path().display(),
            "Starting external aligner."
        );

        let status = match self.run_program(&args, scratch.path(), request.timeout)? {
            RunOutcome::TimedOut => {
                warn!(candidates = count, "External aligner timed out; batch dropped.");
                return Ok(vec![Err(CandidateFailure::TimedOut); count]);
            }
            RunOutcome::Exited(status) => status,
        };

        if !status.success() {
            let reason = format!(
                "aligner exited with {}{}",
                status,
                last_log_line(&scratch.path().join(LOG_FILE))
                    .map(|line| format!(": {}", line))
                    .unwrap_or_default()
            );
            warn!(candidates = count, %reason, "External aligner failed; batch dropped.");
            return Ok(vec![Err(CandidateFailure::Failed(reason)); count]);
        }

        let results_path = scratch.path().join(RESULTS_FILE);
        let rows = match read_results(&results_path) {
            Ok(rows) => rows,
            Err(e) => {
                let reason = format!("unreadable results '{}': {}", results_path.display(), e);
                warn!(candidates = count, %reason, "External aligner produced no usable output.");
                return Ok(vec![Err(CandidateFailure::Failed(reason)); count]);
            }
        };

        Ok((1..=count)
            .map(|index| match rows.get(&index) {
                Some(row) if row.ccc.is_finite() => Ok(AlignedPose {
                    ccc: row.ccc,
                    pose: Pose::new(
                        Point3::new(row.x, row.y, row.z),
                        EulerZxz::new(row.phi, row.theta, row.psi),
                    ),
                    wedge_weight: row.wedge_weight,
                }),
                Some(_) => Err(CandidateFailure::Failed("non-finite score".to_string())),
                None => Err(CandidateFailure::Failed("no result reported".to_string())),
            })
            .collect())
    }
}

fn triplet(v: &Vector3<f64>) -> String {
    format!("{},{},{}", v.x, v.y, v.z)
}

fn read_results(path: &Path) -> Result<HashMap<usize, ResultRow>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    reader
        .deserialize::<ResultRow>()
        .map(|row| row.map(|r| (r.index, r)))
        .collect()
}

fn last_log_line(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()?
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim().to_string())
}
