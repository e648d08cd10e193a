use crate::aligner::ExternalAligner;
use crate::cli::ExpandArgs;
use crate::config::builder::build_expand_config;
use crate::error::{CliError, Result};
use crate::utils::progress::CliProgressHandler;
use latticepick::{
    core::io::seeds::read_seeds,
    engine::{
        aligner::VolumeRef, cache::RoundCache, progress::ProgressReporter, state::StopReason,
    },
    workflows::expand::{ExpansionEngine, TomogramJob},
};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::{info, warn};

pub async fn run(args: ExpandArgs, cancel: Arc<AtomicBool>) -> Result<()> {
    info!("Building expansion configuration...");
    let app_config = build_expand_config(&args)?;
    let aligner_command = app_config
        .aligner
        .ok_or_else(|| CliError::Config("`aligner.program` is required.".to_string()))?;

    info!("Loading seeds from {:?}", &args.seeds);
    let seeds = read_seeds(&args.seeds)?;
    info!(count = seeds.len(), "Seeds loaded.");

    if !args.reference.is_file() {
        return Err(CliError::Argument(format!(
            "Reference volume does not exist: {}",
            args.reference.display()
        )));
    }

    let cache = RoundCache::new(&args.work_dir);
    if args.fresh {
        info!(tomogram = %args.tomogram, "Discarding cached rounds (--fresh).");
        cache.clear(&args.tomogram)?;
    }

    let job = TomogramJob {
        name: args.tomogram.clone(),
        seeds,
        reference: VolumeRef::new(&args.reference),
        mask: args.mask.as_ref().map(VolumeRef::new),
    };
    let aligner = ExternalAligner::new(aligner_command);

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!("Starting lattice expansion of '{}'...", job.name);
    info!("Invoking the core expansion workflow...");

    let report = tokio::task::block_in_place(|| {
        ExpansionEngine::new(&app_config.search, &aligner, &cache, &reporter)
            .with_cancellation(&cancel)
            .run(&job)
    })?;

    if report.resumed_rounds > 0 {
        println!(
            "Resumed {} cached round(s) without re-running them.",
            report.resumed_rounds
        );
    }
    match report.stop_reason {
        StopReason::Cancelled => {
            warn!("Expansion cancelled; completed rounds remain cached.");
            println!(
                "Expansion cancelled after {} round(s); rerun the same command to resume.",
                report.rounds_completed
            );
        }
        reason => {
            println!(
                "✓ Expansion stopped ({}) after {} round(s) with {} particle(s) in {}",
                reason,
                report.rounds_completed,
                report.particles.len(),
                cache.tomogram_dir(&report.tomogram).display()
            );
        }
    }

    Ok(())
}
