//! Per-tomogram, append-only cache of completed rounds.
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/<tomogram>/round_000/{coordinates.txt, motive_list.csv, rotation_axes.txt, round.toml}
//! <root>/<tomogram>/round_001/...
//! ```
//!
//! A round directory is staged under a hidden temporary name and renamed into place only
//! once every file has been written, so a visible `round_NNN` directory is either complete or
//! was damaged after the fact.

use crate::core::io::catalog::{self, CatalogEntry, CatalogError, CatalogPaths};
use crate::core::models::particle::ParticleRecord;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const MANIFEST_FILE: &str = "round.toml";
const ROUND_DIR_PREFIX: &str = "round_";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error for '{path}': {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid round manifest '{path}': {reason}", path = path.display())]
    Manifest { path: PathBuf, reason: String },

    #[error("Round directory '{path}' is incomplete: {reason}", path = path.display())]
    Incomplete { path: PathBuf, reason: String },

    #[error("Round directory '{path}' is already published", path = path.display())]
    AlreadyPublished { path: PathBuf },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Metadata written beside a round's particles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RoundManifest {
    pub index: usize,
    pub is_first_round: bool,
    pub input_count: usize,
    pub accepted_count: usize,
}

/// A round read back from the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRound {
    pub manifest: RoundManifest,
    pub particles: Vec<ParticleRecord>,
}

#[derive(Debug, Clone)]
pub struct RoundCache {
    root: PathBuf,
}

impl RoundCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn tomogram_dir(&self, tomogram: &str) -> PathBuf {
        self.root.join(tomogram)
    }

    pub fn round_dir(&self, tomogram: &str, index: usize) -> PathBuf {
        self.tomogram_dir(tomogram)
            .join(format!("{}{:03}", ROUND_DIR_PREFIX, index))
    }

    /// Atomically publishes a completed round. Published rounds are never overwritten; a
    /// damaged one has to be discarded by [`RoundCache::resume`] first.
    pub fn publish(
        &self,
        tomogram: &str,
        manifest: &RoundManifest,
        particles: &[ParticleRecord],
    ) -> Result<PathBuf, CacheError> {
        let final_dir = self.round_dir(tomogram, manifest.index);
        if final_dir.exists() {
            return Err(CacheError::AlreadyPublished { path: final_dir });
        }
        let tomogram_dir = self.tomogram_dir(tomogram);
        fs::create_dir_all(&tomogram_dir).map_err(io_error(&tomogram_dir))?;

        let staging = tempfile::Builder::new()
            .prefix(&format!(".{}{:03}.", ROUND_DIR_PREFIX, manifest.index))
            .tempdir_in(&tomogram_dir)
            .map_err(io_error(&tomogram_dir))?;

        let entries: Vec<CatalogEntry> = particles
            .iter()
            .cloned()
            .map(CatalogEntry::unpatched)
            .collect();
        catalog::write_catalog(&CatalogPaths::in_dir(staging.path()), &entries)?;

        let manifest_path = staging.path().join(MANIFEST_FILE);
        let manifest_text = toml::to_string(manifest).map_err(|e| CacheError::Manifest {
            path: manifest_path.clone(),
            reason: e.to_string(),
        })?;
        fs::write(&manifest_path, manifest_text).map_err(io_error(&manifest_path))?;

        let staged = staging.keep();
        if let Err(source) = fs::rename(&staged, &final_dir) {
            let _ = fs::remove_dir_all(&staged);
            return Err(CacheError::Io {
                path: final_dir,
                source,
            });
        }
        debug!(path = %final_dir.display(), "Published round cache.");
        Ok(final_dir)
    }

    /// Reads one round, failing on any missing file, unreadable manifest or misaligned
    /// catalog.
    pub fn load_round(&self, tomogram: &str, index: usize) -> Result<CachedRound, CacheError> {
        let dir = self.round_dir(tomogram, index);
        let manifest_path = dir.join(MANIFEST_FILE);
        let paths = CatalogPaths::in_dir(&dir);
        if !manifest_path.is_file() || !paths.all_exist() {
            return Err(CacheError::Incomplete {
                path: dir,
                reason: "expected output files are missing".to_string(),
            });
        }

        let text = fs::read_to_string(&manifest_path).map_err(io_error(&manifest_path))?;
        let manifest: RoundManifest = toml::from_str(&text).map_err(|e| CacheError::Manifest {
            path: manifest_path.clone(),
            reason: e.to_string(),
        })?;
        if manifest.index != index {
            return Err(CacheError::Manifest {
                path: manifest_path,
                reason: format!("records round {} but lives in round {}", manifest.index, index),
            });
        }

        let particles: Vec<ParticleRecord> = catalog::read_catalog(&paths)?
            .into_iter()
            .map(|entry| entry.particle)
            .collect();
        if particles.len() != manifest.accepted_count {
            return Err(CacheError::Incomplete {
                path: dir,
                reason: format!(
                    "manifest lists {} particle(s), files hold {}",
                    manifest.accepted_count,
                    particles.len()
                ),
            });
        }
        Ok(CachedRound {
            manifest,
            particles,
        })
    }

    /// Indices of every visible round directory, ascending.
    pub fn round_indices(&self, tomogram: &str) -> Result<Vec<usize>, CacheError> {
        let dir = self.tomogram_dir(tomogram);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut indices = Vec::new();
        for entry in fs::read_dir(&dir).map_err(io_error(&dir))? {
            let entry = entry.map_err(io_error(&dir))?;
            let name = entry.file_name();
            let index = name
                .to_str()
                .and_then(|n| n.strip_prefix(ROUND_DIR_PREFIX))
                .and_then(|n| n.parse::<usize>().ok());
            if let Some(index) = index {
                if entry.path().is_dir() {
                    indices.push(index);
                }
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    /// Loads the unbroken run of valid rounds starting at round 0.
    ///
    /// The first missing or damaged round ends the run; it and every later round directory
    /// are discarded so they get recomputed from the last good output.
    pub fn resume(&self, tomogram: &str) -> Result<Vec<CachedRound>, CacheError> {
        self.remove_abandoned_staging(tomogram)?;
        let indices = self.round_indices(tomogram)?;
        let mut valid = Vec::new();
        let mut discard_from = None;

        for (expected, &index) in indices.iter().enumerate() {
            if index != expected {
                discard_from = Some(expected);
                break;
            }
            match self.load_round(tomogram, index) {
                Ok(round) => valid.push(round),
                Err(e) => {
                    warn!(
                        tomogram,
                        round = index,
                        error = %e,
                        "Discarding incomplete round cache."
                    );
                    discard_from = Some(index);
                    break;
                }
            }
        }

        if let Some(first_bad) = discard_from {
            for &index in indices.iter().filter(|&&i| i >= first_bad) {
                let dir = self.round_dir(tomogram, index);
                fs::remove_dir_all(&dir).map_err(io_error(&dir))?;
            }
        }
        Ok(valid)
    }

    /// Deletes staging directories left behind by a run that died mid-publish.
    fn remove_abandoned_staging(&self, tomogram: &str) -> Result<(), CacheError> {
        let dir = self.tomogram_dir(tomogram);
        if !dir.is_dir() {
            return Ok(());
        }
        let staging_prefix = format!(".{}", ROUND_DIR_PREFIX);
        for entry in fs::read_dir(&dir).map_err(io_error(&dir))? {
            let path = entry.map_err(io_error(&dir))?.path();
            let abandoned = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(&staging_prefix));
            if abandoned && path.is_dir() {
                debug!(path = %path.display(), "Removing abandoned staging directory.");
                fs::remove_dir_all(&path).map_err(io_error(&path))?;
            }
        }
        Ok(())
    }

    /// Removes every cached round of `tomogram`.
    pub fn clear(&self, tomogram: &str) -> Result<(), CacheError> {
        let dir = self.tomogram_dir(tomogram);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(io_error(&dir))?;
        }
        Ok(())
    }
}
