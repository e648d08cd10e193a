use crate::cli::CleanArgs;
use crate::error::Result;
use latticepick::engine::cache::RoundCache;
use tracing::info;

pub async fn run(args: CleanArgs) -> Result<()> {
    let cache = RoundCache::new(&args.work_dir);
    let rounds = cache.round_indices(&args.tomogram)?;
    cache.clear(&args.tomogram)?;
    info!(tomogram = %args.tomogram, rounds = rounds.len(), "Round cache cleared.");
    println!(
        "Removed {} cached round(s) for '{}'.",
        rounds.len(),
        args.tomogram
    );
    Ok(())
}
