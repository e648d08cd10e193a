use super::defaults::DefaultsConfig;
use super::file::{FileConfig, FileSearchWindow};
use super::models::{AlignerCommand, AppConfig};
use crate::cli::{CatalogArgs, ExpandArgs};
use crate::error::{CliError, Result};
use latticepick::engine::config::SearchConfigBuilder;
use nalgebra::Vector3;
use std::str::FromStr;
use std::time::Duration;

/// Values given directly on the command line; these win over the file and `-S`.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub max_rounds: Option<usize>,
    pub ccc_threshold: Option<f64>,
    pub max_seed_count: Option<usize>,
    pub min_patch_size: Option<usize>,
    pub set_values: Vec<String>,
}

impl From<&ExpandArgs> for CliOverrides {
    fn from(args: &ExpandArgs) -> Self {
        Self {
            max_rounds: args.max_rounds,
            ccc_threshold: args.ccc_threshold,
            max_seed_count: args.max_seed_count,
            min_patch_size: None,
            set_values: args.set_values.clone(),
        }
    }
}

impl From<&CatalogArgs> for CliOverrides {
    fn from(args: &CatalogArgs) -> Self {
        Self {
            min_patch_size: args.min_patch_size,
            set_values: args.set_values.clone(),
            ..Default::default()
        }
    }
}

pub fn build_expand_config(args: &ExpandArgs) -> Result<AppConfig> {
    let file_config = FileConfig::from_file(&args.config)?;
    let app = merge_config(file_config, &CliOverrides::from(args))?;
    if app.aligner.is_none() {
        return Err(CliError::Config(
            "`aligner.program` is required to run an expansion.".to_string(),
        ));
    }
    Ok(app)
}

pub fn build_catalog_config(args: &CatalogArgs) -> Result<AppConfig> {
    let file_config = FileConfig::from_file(&args.config)?;
    merge_config(file_config, &CliOverrides::from(args))
}

pub fn merge_config(file_config: FileConfig, overrides: &CliOverrides) -> Result<AppConfig> {
    let defaults = DefaultsConfig::default();
    let mut file_config = apply_set_values(file_config, &overrides.set_values)?;

    let lattice = file_config.lattice.take().unwrap_or_default();
    let search = file_config.search.take().unwrap_or_default();
    let expansion = file_config.expansion.take().unwrap_or_default();
    let catalog = file_config.catalog.take().unwrap_or_default();
    let aligner_file = file_config.aligner.take().unwrap_or_default();

    let first = search.first_round.unwrap_or_default();
    let later = search.later_rounds.unwrap_or_default();
    let window = |file: &FileSearchWindow, range: [f64; 3], step: [f64; 3], translation: [f64; 3]| {
        (
            vector(file.angular_range.unwrap_or(range)),
            vector(file.angular_step.unwrap_or(step)),
            vector(file.translation_range.unwrap_or(translation)),
        )
    };
    let (range0, step0, translation0) = window(
        &first,
        defaults.angular_range_round0,
        defaults.angular_step_round0,
        defaults.translation_range_round0,
    );
    let (range_later, step_later, translation_later) = window(
        &later,
        defaults.angular_range_later,
        defaults.angular_step_later,
        defaults.translation_range_later,
    );

    let aligner = aligner_file.program.map(|program| AlignerCommand {
        program,
        args: aligner_file.args.unwrap_or_default(),
        timeout: Duration::from_secs(aligner_file.timeout_secs.unwrap_or(defaults.timeout_secs)),
        scratch_dir: aligner_file.scratch_dir,
    });

    let mut builder = SearchConfigBuilder::new()
        .angular_range_round0(range0)
        .angular_step_round0(step0)
        .translation_range_round0(translation0)
        .angular_range_later(range_later)
        .angular_step_later(step_later)
        .translation_range_later(translation_later)
        .pixel_size(lattice.pixel_size.unwrap_or(defaults.pixel_size))
        .min_accept_count(expansion.min_accept_count.unwrap_or(defaults.min_accept_count))
        .max_rounds(
            overrides
                .max_rounds
                .or(expansion.max_rounds)
                .unwrap_or(defaults.max_rounds),
        )
        .refine_reference(expansion.refine_reference.unwrap_or(defaults.refine_reference))
        .max_seed_count(
            overrides
                .max_seed_count
                .or(expansion.max_seed_count)
                .unwrap_or(defaults.max_seed_count),
        )
        .batch_size(expansion.batch_size.unwrap_or(defaults.batch_size))
        .min_patch_size(
            overrides
                .min_patch_size
                .or(catalog.min_patch_size)
                .unwrap_or(defaults.min_patch_size),
        )
        .aligner_timeout(aligner.as_ref().map(|a| a.timeout));

    if let Some(distance) = lattice.repeating_unit_distance {
        builder = builder.repeating_unit_distance(distance);
    }
    if let Some(offsets) = lattice.neighbor_offsets {
        builder = builder.neighbor_offsets(offsets.into_iter().map(vector).collect());
    }
    if let Some(size) = lattice.box_size {
        builder = builder.box_size(vector(size));
    }
    if let Some(threshold) = overrides.ccc_threshold.or(expansion.ccc_threshold) {
        builder = builder.ccc_threshold(threshold);
    }

    let search = builder
        .build()
        .map_err(|e| CliError::Config(e.to_string()))?;

    Ok(AppConfig { search, aligner })
}

fn vector(v: [f64; 3]) -> Vector3<f64> {
    Vector3::new(v[0], v[1], v[2])
}

fn parse_value<T: FromStr>(key: &str, value: &str, kind: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CliError::Config(format!("Invalid {} value for {}: {}", kind, key, value)))
}

fn apply_set_values(mut config: FileConfig, set_values: &[String]) -> Result<FileConfig> {
    for kv_pair in set_values {
        let Some((key, value_str)) = kv_pair.split_once('=') else {
            return Err(CliError::Config(format!(
                "Invalid --set format: '{}'. Expected KEY=VALUE.",
                kv_pair
            )));
        };

        match key {
            "lattice.repeating-unit-distance" => {
                config
                    .lattice
                    .get_or_insert_with(Default::default)
                    .repeating_unit_distance = Some(parse_value(key, value_str, "float")?);
            }
            "lattice.pixel-size" => {
                config.lattice.get_or_insert_with(Default::default).pixel_size =
                    Some(parse_value(key, value_str, "float")?);
            }
            "expansion.ccc-threshold" => {
                config
                    .expansion
                    .get_or_insert_with(Default::default)
                    .ccc_threshold = Some(parse_value(key, value_str, "float")?);
            }
            "expansion.min-accept-count" => {
                config
                    .expansion
                    .get_or_insert_with(Default::default)
                    .min_accept_count = Some(parse_value(key, value_str, "integer")?);
            }
            "expansion.max-rounds" => {
                config.expansion.get_or_insert_with(Default::default).max_rounds =
                    Some(parse_value(key, value_str, "integer")?);
            }
            "expansion.refine-reference" => {
                config
                    .expansion
                    .get_or_insert_with(Default::default)
                    .refine_reference = Some(parse_value(key, value_str, "boolean")?);
            }
            "expansion.max-seed-count" => {
                config
                    .expansion
                    .get_or_insert_with(Default::default)
                    .max_seed_count = Some(parse_value(key, value_str, "integer")?);
            }
            "expansion.batch-size" => {
                config.expansion.get_or_insert_with(Default::default).batch_size =
                    Some(parse_value(key, value_str, "integer")?);
            }
            "catalog.min-patch-size" => {
                config
                    .catalog
                    .get_or_insert_with(Default::default)
                    .min_patch_size = Some(parse_value(key, value_str, "integer")?);
            }
            "aligner.program" => {
                config.aligner.get_or_insert_with(Default::default).program =
                    Some(value_str.into());
            }
            "aligner.timeout-secs" => {
                config.aligner.get_or_insert_with(Default::default).timeout_secs =
                    Some(parse_value(key, value_str, "integer")?);
            }
            "aligner.scratch-dir" => {
                config.aligner.get_or_insert_with(Default::default).scratch_dir =
                    Some(value_str.into());
            }
            _ => {
                return Err(CliError::Config(format!(
                    "Unsupported configuration key for --set: '{}'",
                    key
                )));
            }
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    const MINIMAL: &str = r#"
        [lattice]
        repeating-unit-distance = 120.0
        neighbor-offsets = [[120.0, 0.0, 0.0]]
        box-size = [64, 64, 64]

        [expansion]
        ccc-threshold = 0.3

        [aligner]
        program = "/usr/bin/true"
        "#;

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("config.toml");
        fs::write(&path, content).unwrap();
        path
    }

    fn expand_args(config: &Path, extra: &[&str]) -> ExpandArgs {
        let mut argv = vec![
            "latticepick",
            "expand",
            "-c",
            config.to_str().unwrap(),
            "-s",
            "seeds.csv",
            "-r",
            "ref.mrc",
            "-w",
            "work",
            "-t",
            "tomo",
        ];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Commands::Expand(args) => args,
            _ => panic!("Expected 'expand' subcommand"),
        }
    }

    #[test]
    fn minimal_file_is_completed_from_defaults() {
        let dir = tempdir().unwrap();
        let path = write_config(dir.path(), MINIMAL);

        let app = build_expand_config(&expand_args(&path, &[])).unwrap();
        let defaults = DefaultsConfig::default();

        assert_eq!(app.search.repeat_unit_pixels(), 120.0);
        assert_eq!(app.search.max_rounds, defaults.max_rounds);
        assert_eq!(app.search.batch_size, defaults.batch_size);
        assert_eq!(app.search.min_patch_size, defaults.min_patch_size);
        assert_eq!(
            app.search.first_round.angular_range,
            vector(defaults.angular_range_round0)
        );
        assert_eq!(
            app.search.aligner_timeout,
            Some(Duration::from_secs(defaults.timeout_secs))
        );
        let aligner = app.aligner.unwrap();
        assert_eq!(aligner.program, PathBuf::from("/usr/bin/true"));
        assert!(aligner.args.is_empty());
    }

    #[test]
    fn cli_flags_override_set_values_and_file() {
        let dir = tempdir().unwrap();
        let content = MINIMAL
            .replace("ccc-threshold = 0.3", "ccc-threshold = 0.3\nmax-rounds = 7")
            .replace("[aligner]", "[aligner]\ntimeout-secs = 60");
        let path = write_config(dir.path(), &content);

        let args = expand_args(
            &path,
            &[
                "--max-rounds",
                "3",
                "-S",
                "expansion.max-rounds=5",
                "-S",
                "expansion.batch-size=8",
            ],
        );
        let app = build_expand_config(&args).unwrap();

        assert_eq!(app.search.max_rounds, 3);
        assert_eq!(app.search.batch_size, 8);
        assert_eq!(app.search.aligner_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn set_values_override_file_values() {
        let file = FileConfig::from_toml(MINIMAL).unwrap();
        let overrides = CliOverrides {
            set_values: vec![
                "expansion.ccc-threshold=0.45".to_string(),
                "lattice.pixel-size=2.0".to_string(),
                "catalog.min-patch-size=6".to_string(),
                "expansion.refine-reference=true".to_string(),
            ],
            ..Default::default()
        };

        let app = merge_config(file, &overrides).unwrap();

        assert!((app.search.ccc_threshold - 0.45).abs() < 1e-12);
        assert_eq!(app.search.repeat_unit_pixels(), 60.0);
        assert_eq!(app.search.min_patch_size, 6);
        assert!(app.search.refine_reference);
    }

    #[test]
    fn unsupported_or_malformed_set_values_are_rejected() {
        for bad in ["expansion.unknown=1", "expansion.max-rounds", "expansion.max-rounds=many"] {
            let overrides = CliOverrides {
                set_values: vec![bad.to_string()],
                ..Default::default()
            };
            let result = merge_config(FileConfig::from_toml(MINIMAL).unwrap(), &overrides);
            assert!(matches!(result, Err(CliError::Config(_))), "accepted '{}'", bad);
        }
    }

    #[test]
    fn missing_required_value_is_a_config_error() {
        let content = MINIMAL.replace("ccc-threshold = 0.3", "");
        let file = FileConfig::from_toml(&content).unwrap();
        let result = merge_config(file, &CliOverrides::default());
        match result {
            Err(CliError::Config(msg)) => assert!(msg.contains("ccc_threshold")),
            other => panic!("expected config error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn expansion_requires_an_aligner_program() {
        let dir = tempdir().unwrap();
        let content = MINIMAL.replace("program = \"/usr/bin/true\"", "");
        let path = write_config(dir.path(), &content);

        let result = build_expand_config(&expand_args(&path, &[]));
        assert!(matches!(result, Err(CliError::Config(_))));
    }

    #[test]
    fn catalog_config_does_not_need_an_aligner() {
        let content = MINIMAL.replace("program = \"/usr/bin/true\"", "");
        let file = FileConfig::from_toml(&content).unwrap();
        let overrides = CliOverrides {
            min_patch_size: Some(4),
            ..Default::default()
        };
        let app = merge_config(file, &overrides).unwrap();
        assert!(app.aligner.is_none());
        assert_eq!(app.search.aligner_timeout, None);
        assert_eq!(app.search.min_patch_size, 4);
    }
}
