use crate::error::{CliError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileLatticeConfig {
    #[serde(rename = "repeating-unit-distance")]
    pub repeating_unit_distance: Option<f64>,
    #[serde(rename = "pixel-size")]
    pub pixel_size: Option<f64>,
    #[serde(rename = "neighbor-offsets")]
    pub neighbor_offsets: Option<Vec<[f64; 3]>>,
    #[serde(rename = "box-size")]
    pub box_size: Option<[f64; 3]>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileSearchWindow {
    #[serde(rename = "angular-range")]
    pub angular_range: Option<[f64; 3]>,
    #[serde(rename = "angular-step")]
    pub angular_step: Option<[f64; 3]>,
    #[serde(rename = "translation-range")]
    pub translation_range: Option<[f64; 3]>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileSearchConfig {
    #[serde(rename = "first-round")]
    pub first_round: Option<FileSearchWindow>,
    #[serde(rename = "later-rounds")]
    pub later_rounds: Option<FileSearchWindow>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileExpansionConfig {
    #[serde(rename = "ccc-threshold")]
    pub ccc_threshold: Option<f64>,
    #[serde(rename = "min-accept-count")]
    pub min_accept_count: Option<usize>,
    #[serde(rename = "max-rounds")]
    pub max_rounds: Option<usize>,
    #[serde(rename = "refine-reference")]
    pub refine_reference: Option<bool>,
    #[serde(rename = "max-seed-count")]
    pub max_seed_count: Option<usize>,
    #[serde(rename = "batch-size")]
    pub batch_size: Option<usize>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileCatalogConfig {
    #[serde(rename = "min-patch-size")]
    pub min_patch_size: Option<usize>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileAlignerConfig {
    pub program: Option<PathBuf>,
    pub args: Option<Vec<String>>,
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: Option<u64>,
    #[serde(rename = "scratch-dir")]
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub lattice: Option<FileLatticeConfig>,
    pub search: Option<FileSearchConfig>,
    pub expansion: Option<FileExpansionConfig>,
    pub catalog: Option<FileCatalogConfig>,
    pub aligner: Option<FileAlignerConfig>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
