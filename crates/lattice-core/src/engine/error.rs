use super::aligner::AlignerError;
use super::cache::CacheError;
use crate::core::io::catalog::CatalogError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Tomogram '{tomogram}' has no seed particles")]
    NoSeeds { tomogram: String },

    #[error("Tomogram '{tomogram}', round {round}: {source}")]
    RoundFailed {
        tomogram: String,
        round: usize,
        #[source]
        source: AlignerError,
    },

    #[error("Tomogram '{tomogram}', round {round}: cache error: {source}")]
    Cache {
        tomogram: String,
        round: usize,
        #[source]
        source: CacheError,
    },

    #[error("Tomogram '{tomogram}': failed to aggregate round {round}: {source}")]
    Aggregation {
        tomogram: String,
        round: usize,
        #[source]
        source: CacheError,
    },

    #[error("Tomogram '{tomogram}': failed to write catalog: {source}")]
    CatalogWrite {
        tomogram: String,
        #[source]
        source: CatalogError,
    },
}
