use crate::core::models::particle::{EulerZxz, ParticleRecord};
use crate::core::utils::geometry::rotation_axis;
use nalgebra::{Point3, Vector3};
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const COORDINATES_FILE: &str = "coordinates.txt";
pub const MOTIVE_LIST_FILE: &str = "motive_list.csv";
pub const ROTATION_AXES_FILE: &str = "rotation_axes.txt";

const MOTL_COLUMNS: usize = 21;
const MOTL_HEADER: [&str; MOTL_COLUMNS] = [
    "CCC",
    "reserved",
    "reserved",
    "pIndex",
    "wedgeWT",
    "NA",
    "NA",
    "NA",
    "NA",
    "NA",
    "xOffset",
    "yOffset",
    "zOffset",
    "NA",
    "NA",
    "reserved",
    "EulerZ(1)",
    "EulerZ(3)",
    "EulerX(2)",
    "reserved",
    "provenance",
];

const COL_CCC: usize = 0;
const COL_INDEX: usize = 3;
const COL_WEDGE: usize = 4;
const COL_X_OFFSET: usize = 10;
const COL_Y_OFFSET: usize = 11;
const COL_Z_OFFSET: usize = 12;
const COL_PHI: usize = 16;
const COL_PSI: usize = 17;
const COL_THETA: usize = 18;
const COL_PROVENANCE: usize = 20;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("I/O error for '{path}': {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error in '{path}': {source}", path = path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Parse error in '{path}' on line {line}: {message}", path = path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error(
        "Catalog files are not line-aligned: {coordinates} coordinate line(s), {motive_list} motive-list record(s), {rotation_axes} rotation-axis line(s)"
    )]
    LineCountMismatch {
        coordinates: usize,
        motive_list: usize,
        rotation_axes: usize,
    },

    #[error("Motive-list record {line} carries particle index {found}")]
    IndexMismatch { line: usize, found: usize },
}

/// Where the particle came from: the round that accepted it, and its patch once one is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provenance {
    pub source_round: u32,
    pub patch_id: Option<u32>,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch_id {
            Some(patch) => write!(f, "round{}/patch{}", self.source_round, patch),
            None => write!(f, "round{}", self.source_round),
        }
    }
}

impl FromStr for Provenance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (round_part, patch_part) = match s.split_once('/') {
            Some((round, patch)) => (round, Some(patch)),
            None => (s, None),
        };
        let source_round = round_part
            .strip_prefix("round")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| format!("invalid provenance '{}'", s))?;
        let patch_id = match patch_part {
            Some(p) => Some(
                p.strip_prefix("patch")
                    .and_then(|n| n.parse().ok())
                    .ok_or_else(|| format!("invalid provenance '{}'", s))?,
            ),
            None => None,
        };
        Ok(Self {
            source_round,
            patch_id,
        })
    }
}

/// One line of a catalog: the particle plus the patch it was assigned to, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub particle: ParticleRecord,
    pub patch_id: Option<u32>,
}

impl CatalogEntry {
    pub fn unpatched(particle: ParticleRecord) -> Self {
        Self {
            particle,
            patch_id: None,
        }
    }
}

/// Locations of the three line-aligned files that make up one catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPaths {
    pub coordinates: PathBuf,
    pub motive_list: PathBuf,
    pub rotation_axes: PathBuf,
}

impl CatalogPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            coordinates: dir.join(COORDINATES_FILE),
            motive_list: dir.join(MOTIVE_LIST_FILE),
            rotation_axes: dir.join(ROTATION_AXES_FILE),
        }
    }

    /// Sibling files sharing `prefix`, e.g. `out/tomo1` gives `out/tomo1_coordinates.txt`.
    pub fn with_prefix(prefix: &Path) -> Self {
        let base = prefix.as_os_str().to_string_lossy();
        Self {
            coordinates: PathBuf::from(format!("{}_{}", base, COORDINATES_FILE)),
            motive_list: PathBuf::from(format!("{}_{}", base, MOTIVE_LIST_FILE)),
            rotation_axes: PathBuf::from(format!("{}_{}", base, ROTATION_AXES_FILE)),
        }
    }

    pub fn all_exist(&self) -> bool {
        self.coordinates.is_file() && self.motive_list.is_file() && self.rotation_axes.is_file()
    }
}

/// Writes `entries` as a catalog. Particle indices are assigned from line positions, so the
/// `pIndex` column of record `i` is always `i`.
pub fn write_catalog(paths: &CatalogPaths, entries: &[CatalogEntry]) -> Result<(), CatalogError> {
    write_coordinates(&paths.coordinates, entries)?;
    write_motive_list(&paths.motive_list, entries)?;
    write_rotation_axes(&paths.rotation_axes, entries)?;
    Ok(())
}

/// Reads a catalog back, refusing files whose line counts or particle indices disagree.
///
/// The returned particles take their `particle_id` from the motive-list index and their
/// `source_round` from the provenance column.
pub fn read_catalog(paths: &CatalogPaths) -> Result<Vec<CatalogEntry>, CatalogError> {
    let coordinates = read_coordinates(&paths.coordinates)?;
    let records = read_motive_list(&paths.motive_list)?;
    let axes = read_rotation_axes(&paths.rotation_axes)?;

    if coordinates.len() != records.len() || records.len() != axes.len() {
        return Err(CatalogError::LineCountMismatch {
            coordinates: coordinates.len(),
            motive_list: records.len(),
            rotation_axes: axes.len(),
        });
    }

    coordinates
        .into_iter()
        .zip(records)
        .enumerate()
        .map(|(i, (coords, record))| {
            if record.index != i + 1 {
                return Err(CatalogError::IndexMismatch {
                    line: i + 1,
                    found: record.index,
                });
            }
            let position = Point3::new(
                coords[0] as f64 + record.offset.x,
                coords[1] as f64 + record.offset.y,
                coords[2] as f64 + record.offset.z,
            );
            Ok(CatalogEntry {
                particle: ParticleRecord {
                    position,
                    orientation: record.orientation,
                    ccc: record.ccc,
                    wedge_weight: record.wedge_weight,
                    source_round: record.provenance.source_round,
                    particle_id: record.index as u32,
                },
                patch_id: record.provenance.patch_id,
            })
        })
        .collect()
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> CatalogError + '_ {
    move |source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn rounded(position: &Point3<f64>) -> [i64; 3] {
    [
        position.x.round() as i64,
        position.y.round() as i64,
        position.z.round() as i64,
    ]
}

fn write_coordinates(path: &Path, entries: &[CatalogEntry]) -> Result<(), CatalogError> {
    let file = File::create(path).map_err(io_error(path))?;
    let mut writer = BufWriter::new(file);
    for entry in entries {
        let [x, y, z] = rounded(&entry.particle.position);
        writeln!(writer, "{} {} {}", x, y, z).map_err(io_error(path))?;
    }
    writer.flush().map_err(io_error(path))
}

fn write_motive_list(path: &Path, entries: &[CatalogEntry]) -> Result<(), CatalogError> {
    let csv_error = |source| CatalogError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(csv_error)?;
    writer.write_record(MOTL_HEADER).map_err(csv_error)?;

    for (i, entry) in entries.iter().enumerate() {
        let particle = &entry.particle;
        let [x, y, z] = rounded(&particle.position);
        let mut fields = vec!["0".to_string(); MOTL_COLUMNS];
        fields[COL_CCC] = particle.ccc.to_string();
        fields[COL_INDEX] = (i + 1).to_string();
        fields[COL_WEDGE] = particle.wedge_weight.to_string();
        fields[COL_X_OFFSET] = (particle.position.x - x as f64).to_string();
        fields[COL_Y_OFFSET] = (particle.position.y - y as f64).to_string();
        fields[COL_Z_OFFSET] = (particle.position.z - z as f64).to_string();
        fields[COL_PHI] = particle.orientation.phi.to_string();
        fields[COL_PSI] = particle.orientation.psi.to_string();
        fields[COL_THETA] = particle.orientation.theta.to_string();
        fields[COL_PROVENANCE] = Provenance {
            source_round: particle.source_round,
            patch_id: entry.patch_id,
        }
        .to_string();
        writer.write_record(&fields).map_err(csv_error)?;
    }
    writer.flush().map_err(io_error(path))
}

fn write_rotation_axes(path: &Path, entries: &[CatalogEntry]) -> Result<(), CatalogError> {
    let file = File::create(path).map_err(io_error(path))?;
    let mut writer = BufWriter::new(file);
    for entry in entries {
        let axis = rotation_axis(&entry.particle.orientation);
        writeln!(writer, "{:.6} {:.6} {:.6}", axis.x, axis.y, axis.z).map_err(io_error(path))?;
    }
    writer.flush().map_err(io_error(path))
}

fn read_lines(path: &Path) -> Result<Vec<(usize, String)>, CatalogError> {
    let file = File::open(path).map_err(io_error(path))?;
    let mut lines = Vec::new();
    for (line_num, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(io_error(path))?;
        if !line.trim().is_empty() {
            lines.push((line_num + 1, line));
        }
    }
    Ok(lines)
}

fn parse_triplet<T: FromStr>(
    path: &Path,
    line_num: usize,
    line: &str,
) -> Result<[T; 3], CatalogError> {
    let parse_error = |message: String| CatalogError::Parse {
        path: path.to_path_buf(),
        line: line_num,
        message,
    };
    let values: Vec<T> = line
        .split_whitespace()
        .map(|token| {
            token
                .parse()
                .map_err(|_| parse_error(format!("invalid number '{}'", token)))
        })
        .collect::<Result<_, _>>()?;
    <[T; 3]>::try_from(values)
        .map_err(|v| parse_error(format!("expected 3 values, found {}", v.len())))
}

fn read_coordinates(path: &Path) -> Result<Vec<[i64; 3]>, CatalogError> {
    read_lines(path)?
        .into_iter()
        .map(|(line_num, line)| parse_triplet(path, line_num, &line))
        .collect()
}

fn read_rotation_axes(path: &Path) -> Result<Vec<Vector3<f64>>, CatalogError> {
    read_lines(path)?
        .into_iter()
        .map(|(line_num, line)| {
            parse_triplet::<f64>(path, line_num, &line).map(|[x, y, z]| Vector3::new(x, y, z))
        })
        .collect()
}

struct MotlRecord {
    ccc: f64,
    index: usize,
    wedge_weight: f64,
    offset: Vector3<f64>,
    orientation: EulerZxz,
    provenance: Provenance,
}

fn read_motive_list(path: &Path) -> Result<Vec<MotlRecord>, CatalogError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CatalogError::Csv {
            path: path.to_path_buf(),
            source,
        })?;

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|source| CatalogError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let line = record.position().map_or(0, |p| p.line() as usize);
        let parse_error = |message: String| CatalogError::Parse {
            path: path.to_path_buf(),
            line,
            message,
        };
        if record.len() != MOTL_COLUMNS {
            return Err(parse_error(format!(
                "expected {} columns, found {}",
                MOTL_COLUMNS,
                record.len()
            )));
        }
        let number = |col: usize| -> Result<f64, CatalogError> {
            record[col].parse::<f64>().map_err(|_| {
                parse_error(format!(
                    "invalid number '{}' in column {}",
                    &record[col],
                    col + 1
                ))
            })
        };
        let index = number(COL_INDEX)?;
        if index < 1.0 || index.fract() != 0.0 {
            return Err(parse_error(format!("invalid particle index '{}'", &record[COL_INDEX])));
        }
        records.push(MotlRecord {
            ccc: number(COL_CCC)?,
            index: index as usize,
            wedge_weight: number(COL_WEDGE)?,
            offset: Vector3::new(
                number(COL_X_OFFSET)?,
                number(COL_Y_OFFSET)?,
                number(COL_Z_OFFSET)?,
            ),
            orientation: EulerZxz::new(number(COL_PHI)?, number(COL_THETA)?, number(COL_PSI)?),
            provenance: record[COL_PROVENANCE].parse().map_err(parse_error)?,
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn particle(x: f64, y: f64, z: f64, ccc: f64, round: u32) -> ParticleRecord {
        ParticleRecord {
            position: Point3::new(x, y, z),
            orientation: EulerZxz::new(10.0, 20.0, 30.0),
            ccc,
            wedge_weight: 0.75,
            source_round: round,
            particle_id: 99,
        }
    }

    fn line_count(path: &Path) -> usize {
        fs::read_to_string(path).unwrap().lines().count()
    }

    #[test]
    fn written_files_are_line_aligned_and_indexed_by_position() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CatalogPaths::in_dir(dir.path());
        let entries: Vec<_> = (0..4)
            .map(|i| CatalogEntry {
                particle: particle(i as f64 * 10.0, 5.4, -3.6, 0.5, 2),
                patch_id: Some(1),
            })
            .collect();

        write_catalog(&paths, &entries).unwrap();

        assert_eq!(line_count(&paths.coordinates), 4);
        assert_eq!(line_count(&paths.motive_list), 5);
        assert_eq!(line_count(&paths.rotation_axes), 4);

        let motl = fs::read_to_string(&paths.motive_list).unwrap();
        for (i, line) in motl.lines().skip(1).enumerate() {
            let index: usize = line.split(',').nth(3).unwrap().parse().unwrap();
            assert_eq!(index, i + 1);
            assert!(line.ends_with("round2/patch1"));
        }
    }

    #[test]
    fn coordinates_are_rounded_and_offsets_restore_position() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CatalogPaths::in_dir(dir.path());
        let entries = vec![CatalogEntry::unpatched(particle(100.4, 99.6, 50.5, 0.8, 3))];

        write_catalog(&paths, &entries).unwrap();
        let coords = fs::read_to_string(&paths.coordinates).unwrap();
        assert_eq!(coords.trim(), "100 100 51");

        let read = read_catalog(&paths).unwrap();
        assert_eq!(read.len(), 1);
        let p = &read[0].particle;
        assert!((p.position - Point3::new(100.4, 99.6, 50.5)).norm() < 1e-9);
        assert_eq!(p.orientation, EulerZxz::new(10.0, 20.0, 30.0));
        assert_eq!(p.source_round, 3);
        assert_eq!(p.particle_id, 1);
        assert_eq!(read[0].patch_id, None);
    }

    #[test]
    fn mismatched_line_counts_are_rejected_rather_than_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CatalogPaths::in_dir(dir.path());
        let entries: Vec<_> = (0..3)
            .map(|i| CatalogEntry::unpatched(particle(i as f64, 0.0, 0.0, 0.5, 1)))
            .collect();
        write_catalog(&paths, &entries).unwrap();
        fs::write(&paths.rotation_axes, "0 0 1\n0 0 1\n").unwrap();

        let result = read_catalog(&paths);
        assert!(matches!(
            result,
            Err(CatalogError::LineCountMismatch {
                coordinates: 3,
                motive_list: 3,
                rotation_axes: 2
            })
        ));
    }

    #[test]
    fn out_of_sequence_particle_index_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CatalogPaths::in_dir(dir.path());
        let entries = vec![
            CatalogEntry::unpatched(particle(1.0, 0.0, 0.0, 0.5, 1)),
            CatalogEntry::unpatched(particle(2.0, 0.0, 0.0, 0.5, 1)),
        ];
        write_catalog(&paths, &entries).unwrap();
        let motl = fs::read_to_string(&paths.motive_list).unwrap();
        let mut lines: Vec<String> = motl.lines().map(String::from).collect();
        lines[2] = lines[2].replacen(",2,", ",7,", 1);
        fs::write(&paths.motive_list, lines.join("\n") + "\n").unwrap();

        let result = read_catalog(&paths);
        assert!(matches!(
            result,
            Err(CatalogError::IndexMismatch { line: 2, found: 7 })
        ));
    }

    #[test]
    fn provenance_round_trips_through_text() {
        let tagged: Provenance = "round4/patch12".parse().unwrap();
        assert_eq!(tagged.source_round, 4);
        assert_eq!(tagged.patch_id, Some(12));
        assert_eq!(tagged.to_string(), "round4/patch12");

        let untagged: Provenance = "round0".parse().unwrap();
        assert_eq!(untagged.patch_id, None);
        assert!("patch3".parse::<Provenance>().is_err());
    }

    #[test]
    fn prefixed_paths_share_the_prefix() {
        let paths = CatalogPaths::with_prefix(Path::new("out/tomo1"));
        assert_eq!(paths.coordinates, PathBuf::from("out/tomo1_coordinates.txt"));
        assert_eq!(paths.motive_list, PathBuf::from("out/tomo1_motive_list.csv"));
        assert_eq!(paths.rotation_axes, PathBuf::from("out/tomo1_rotation_axes.txt"));
    }
}
