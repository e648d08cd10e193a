use crate::core::models::particle::{EulerZxz, ParticleRecord, Pose};
use nalgebra::Point3;
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Failed to read seed list '{path}': {source}", path = path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Seed list '{path}' contains no seeds", path = path.display())]
    Empty { path: PathBuf },
}

#[derive(Debug, Deserialize)]
struct SeedRow {
    x: f64,
    y: f64,
    z: f64,
    #[serde(default)]
    phi: f64,
    #[serde(default)]
    theta: f64,
    #[serde(default)]
    psi: f64,
}

/// Reads a seed list with an `x,y,z[,phi,theta,psi]` header.
///
/// Seeds are numbered from 1 in file order.
pub fn read_seeds(path: &Path) -> Result<Vec<ParticleRecord>, SeedError> {
    let file = std::fs::File::open(path).map_err(|e| SeedError::Csv {
        path: path.to_path_buf(),
        source: e.into(),
    })?;
    let seeds = parse_seeds(file).map_err(|source| SeedError::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    if seeds.is_empty() {
        return Err(SeedError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(seeds)
}

fn parse_seeds(reader: impl Read) -> Result<Vec<ParticleRecord>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    reader
        .deserialize::<SeedRow>()
        .enumerate()
        .map(|(i, row)| {
            row.map(|r| {
                ParticleRecord::seed(
                    i as u32 + 1,
                    Pose::new(
                        Point3::new(r.x, r.y, r.z),
                        EulerZxz::new(r.phi, r.theta, r.psi),
                    ),
                )
            })
        })
        .collect()
}
