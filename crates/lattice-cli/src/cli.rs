use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "Tony Kan, Ted Yu, William A. Goddard III, Victor Wai Tak Kam",
    version,
    about = "latticepick - Lattice-guided particle picking for cryo-electron tomograms: grow a particle set from a few seeds, then emit a deduplicated, patch-labeled catalog.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads used to align candidate batches in parallel.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Expand a tomogram's seeds into a lattice of particles, one cached round at a time.
    Expand(ExpandArgs),
    /// Aggregate, deduplicate and patch the cached rounds of a tomogram into a catalog.
    Catalog(CatalogArgs),
    /// Delete the cached rounds of a tomogram.
    Clean(CleanArgs),
}

/// Arguments for the `expand` subcommand.
#[derive(Args, Debug)]
pub struct ExpandArgs {
    // --- Core Arguments ---
    /// Path to the main configuration file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub config: PathBuf,

    /// Seed list in CSV format with an `x,y,z[,phi,theta,psi]` header.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub seeds: PathBuf,

    /// Reference volume handed to the aligner.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub reference: PathBuf,

    /// Optional alignment mask handed to the aligner.
    #[arg(short, long, value_name = "PATH")]
    pub mask: Option<PathBuf>,

    /// Directory holding the per-tomogram round cache.
    #[arg(short, long, required = true, value_name = "DIR")]
    pub work_dir: PathBuf,

    /// Name of the tomogram; used as the cache subdirectory.
    #[arg(short, long, required = true, value_name = "NAME")]
    pub tomogram: String,

    /// Discard any cached rounds and start again from the seeds.
    #[arg(long)]
    pub fresh: bool,

    // --- Expansion Overrides ---
    /// Override the maximum number of rounds from the config file.
    #[arg(long, value_name = "INT")]
    pub max_rounds: Option<usize>,

    /// Override the cross-correlation acceptance threshold from the config file.
    #[arg(long, value_name = "FLOAT")]
    pub ccc_threshold: Option<f64>,

    /// Override the maximum number of seeds used to start round 0.
    #[arg(long, value_name = "INT")]
    pub max_seed_count: Option<usize>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S expansion.max-rounds=5
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `catalog` subcommand.
#[derive(Args, Debug)]
pub struct CatalogArgs {
    /// Path to the main configuration file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub config: PathBuf,

    /// Directory holding the per-tomogram round cache.
    #[arg(short, long, required = true, value_name = "DIR")]
    pub work_dir: PathBuf,

    /// Name of the tomogram to catalog.
    #[arg(short, long, required = true, value_name = "NAME")]
    pub tomogram: String,

    /// Output prefix; writes `<PREFIX>_coordinates.txt`, `<PREFIX>_motive_list.csv` and
    /// `<PREFIX>_rotation_axes.txt`.
    #[arg(short, long, required = true, value_name = "PREFIX")]
    pub output: PathBuf,

    /// Override the minimum patch size from the config file.
    #[arg(long, value_name = "INT")]
    pub min_patch_size: Option<usize>,

    /// Set a specific configuration value, overriding the config file.
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `clean` subcommand.
#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Directory holding the per-tomogram round cache.
    #[arg(short, long, required = true, value_name = "DIR")]
    pub work_dir: PathBuf,

    /// Name of the tomogram whose rounds should be removed.
    #[arg(short, long, required = true, value_name = "NAME")]
    pub tomogram: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_parses_required_and_override_arguments() {
        let cli = Cli::parse_from([
            "latticepick",
            "-vv",
            "expand",
            "-c",
            "config.toml",
            "-s",
            "seeds.csv",
            "-r",
            "ref.mrc",
            "-w",
            "work",
            "-t",
            "tomo1",
            "--max-rounds",
            "4",
            "-S",
            "expansion.batch-size=8",
        ]);

        assert_eq!(cli.verbose, 2);
        let Commands::Expand(args) = cli.command else {
            panic!("Expected 'expand' subcommand");
        };
        assert_eq!(args.tomogram, "tomo1");
        assert_eq!(args.max_rounds, Some(4));
        assert!(args.mask.is_none());
        assert!(!args.fresh);
        assert_eq!(args.set_values, vec!["expansion.batch-size=8".to_string()]);
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from([
            "latticepick",
            "-q",
            "-v",
            "clean",
            "-w",
            "work",
            "-t",
            "tomo1",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn catalog_requires_output_prefix() {
        let result = Cli::try_parse_from([
            "latticepick",
            "catalog",
            "-c",
            "config.toml",
            "-w",
            "work",
            "-t",
            "tomo1",
        ]);
        assert!(result.is_err());
    }
}
