//! Layered configuration for the CLI: built-in defaults, then the TOML file, then `-S` set
//! values, then dedicated command-line flags.

pub mod builder;
pub mod defaults;
pub mod file;
pub mod models;
