use crate::core::io::catalog::{self, CatalogEntry, CatalogPaths};
use crate::core::models::particle::ParticleRecord;
use crate::core::models::patch::Patch;
use crate::engine::cache::RoundCache;
use crate::engine::config::SearchConfig;
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::tasks::dedup::dedup;
use crate::engine::tasks::patches::form_patches;
use std::fs;
use tracing::{info, instrument, warn};

/// Particle counts at each stage of the catalog pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CatalogSummary {
    pub aggregated: usize,
    pub deduplicated: usize,
    pub patches: usize,
    /// Particles belonging to a surviving patch.
    pub patched: usize,
    /// Particles written after the final score filter.
    pub emitted: usize,
}

/// Collects the accepted particles of every cached round of `tomogram`, in round order.
///
/// Seeds are not part of the result. Any round that cannot be read fails the aggregation.
pub fn aggregate(cache: &RoundCache, tomogram: &str) -> Result<Vec<ParticleRecord>, EngineError> {
    let indices = cache
        .round_indices(tomogram)
        .map_err(|source| EngineError::Aggregation {
            tomogram: tomogram.to_string(),
            round: 0,
            source,
        })?;

    let mut particles = Vec::new();
    for index in indices {
        let round = cache
            .load_round(tomogram, index)
            .map_err(|source| EngineError::Aggregation {
                tomogram: tomogram.to_string(),
                round: index,
                source,
            })?;
        particles.extend(round.particles);
    }
    Ok(particles)
}

/// Catalog entries for every patch member scoring at least `ccc_threshold`, renumbered
/// `1..=N` in patch order, then member order.
pub fn catalog_entries(patches: &[Patch], ccc_threshold: f64) -> Vec<CatalogEntry> {
    patches
        .iter()
        .flat_map(|patch| {
            patch
                .members
                .iter()
                .filter(move |p| p.ccc >= ccc_threshold)
                .map(move |p| (patch.patch_id, p))
        })
        .zip(1u32..)
        .map(|((patch_id, particle), particle_id)| CatalogEntry {
            particle: ParticleRecord {
                particle_id,
                ..particle.clone()
            },
            patch_id: Some(patch_id),
        })
        .collect()
}

/// Aggregates, deduplicates and patches the cached rounds of `tomogram`, then writes the
/// resulting catalog to `output`.
#[instrument(skip_all, name = "catalog_workflow", fields(tomogram = tomogram))]
pub fn run(
    cache: &RoundCache,
    tomogram: &str,
    config: &SearchConfig,
    output: &CatalogPaths,
    reporter: &ProgressReporter,
) -> Result<CatalogSummary, EngineError> {
    let repeat_unit_pixels = config.repeat_unit_pixels();

    reporter.report(Progress::PhaseStart {
        name: "Aggregating Rounds".into(),
    });
    let aggregated = aggregate(cache, tomogram)?;
    reporter.report(Progress::PhaseFinish);
    if aggregated.is_empty() {
        warn!("No cached rounds hold any particles; the catalog will be empty.");
    }

    reporter.report(Progress::PhaseStart {
        name: "Deduplicating".into(),
    });
    let deduped = dedup(&aggregated, repeat_unit_pixels);
    reporter.report(Progress::PhaseFinish);

    reporter.report(Progress::PhaseStart {
        name: "Forming Patches".into(),
    });
    let patches = form_patches(&deduped, repeat_unit_pixels, config.min_patch_size);
    reporter.report(Progress::PhaseFinish);

    reporter.report(Progress::PhaseStart {
        name: "Writing Catalog".into(),
    });
    let entries = catalog_entries(&patches, config.ccc_threshold);
    let write_error = |source| EngineError::CatalogWrite {
        tomogram: tomogram.to_string(),
        source,
    };
    for path in [&output.coordinates, &output.motive_list, &output.rotation_axes] {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| {
                write_error(catalog::CatalogError::Io {
                    path: parent.to_path_buf(),
                    source,
                })
            })?;
        }
    }
    catalog::write_catalog(output, &entries).map_err(write_error)?;
    reporter.report(Progress::PhaseFinish);

    let summary = CatalogSummary {
        aggregated: aggregated.len(),
        deduplicated: deduped.len(),
        patches: patches.len(),
        patched: patches.iter().map(Patch::len).sum(),
        emitted: entries.len(),
    };
    info!(
        aggregated = summary.aggregated,
        deduplicated = summary.deduplicated,
        patches = summary.patches,
        emitted = summary.emitted,
        "Catalog written."
    );
    Ok(summary)
}
