use crate::cli::CatalogArgs;
use crate::config::builder::build_catalog_config;
use crate::error::Result;
use crate::utils::progress::CliProgressHandler;
use latticepick::{
    core::io::catalog::CatalogPaths,
    engine::{cache::RoundCache, progress::ProgressReporter},
    workflows,
};
use tracing::{info, warn};

pub async fn run(args: CatalogArgs) -> Result<()> {
    let app_config = build_catalog_config(&args)?;
    let cache = RoundCache::new(&args.work_dir);
    let output = CatalogPaths::with_prefix(&args.output);

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    info!("Invoking the core catalog workflow...");
    let summary = tokio::task::block_in_place(|| {
        workflows::catalog::run(&cache, &args.tomogram, &app_config.search, &output, &reporter)
    })?;

    if summary.emitted == 0 {
        warn!("Catalog is empty: no patch reached the minimum size.");
        println!("Warning: the catalog for '{}' is empty.", args.tomogram);
    }
    println!(
        "✓ '{}': {} aggregated -> {} unique site(s) -> {} patch(es) -> {} written",
        args.tomogram, summary.aggregated, summary.deduplicated, summary.patches, summary.emitted
    );
    println!("  {}", output.coordinates.display());
    println!("  {}", output.motive_list.display());
    println!("  {}", output.rotation_axes.display());

    Ok(())
}
