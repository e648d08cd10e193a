//! # Engine Module
//!
//! The stateful core of lattice expansion: everything needed to grow a particle set from a
//! handful of seeds, one neighbour search at a time.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Typed, validated search parameters
//! - **Alignment** ([`aligner`]) - The capability the engine consumes to score candidate poses
//! - **Rounds** ([`round`]) - Candidate generation, batched alignment and acceptance for one round
//! - **Round Cache** ([`cache`]) - Atomic, resumable per-round persistence
//! - **State** ([`state`]) - Engine state machine and stop reasons
//! - **Progress Monitoring** ([`progress`]) - Injected event reporting
//! - **Error Handling** ([`error`]) - Engine error taxonomy
//! - **Tasks** ([`tasks`]) - Seed reduction, deduplication and patch formation

pub mod aligner;
pub mod cache;
pub mod config;
pub mod error;
pub mod progress;
pub mod round;
pub mod state;
pub mod tasks;
pub(crate) mod utils;
