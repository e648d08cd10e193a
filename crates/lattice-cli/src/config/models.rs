use latticepick::engine::config::SearchConfig;
use std::path::PathBuf;
use std::time::Duration;

/// How to invoke the external subtomogram aligner.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignerCommand {
    pub program: PathBuf,
    /// Arguments with `{placeholder}` fields substituted per batch.
    pub args: Vec<String>,
    pub timeout: Duration,
    /// Where per-batch scratch directories are created; the system temp dir if unset.
    pub scratch_dir: Option<PathBuf>,
}

pub struct AppConfig {
    pub search: SearchConfig,
    /// `None` when the config file has no `[aligner]` program (enough for `catalog`).
    pub aligner: Option<AlignerCommand>,
}
