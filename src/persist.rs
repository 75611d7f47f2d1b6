// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Curve files.
//!
//! One `temperature,speed` pair of integers per line, no header. A file
//! that is missing, malformed or describes an invalid curve is replaced by
//! the default curve when loaded through [`load_curve_or_default`].

use crate::curve::{self, ControlPoint, Curve, CurveError};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("no curve file at {}", .0.display())]
    Missing(PathBuf),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed curve row: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid curve: {0}")]
    Invalid(#[from] CurveError),
}

/// Parse a curve from CSV rows. The curve must pass validation.
pub fn read_curve<R: io::Read>(reader: R) -> Result<Curve, PersistError> {
    let mut rows = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut points = Vec::new();
    for row in rows.deserialize::<(i64, i64)>() {
        points.push(ControlPoint::from(row?));
    }

    let curve = Curve::new(points);
    curve.validate()?;
    Ok(curve)
}

/// Write a curve as CSV rows.
pub fn write_curve<W: io::Write>(writer: W, curve: &Curve) -> Result<(), PersistError> {
    let mut rows = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    for point in curve.points() {
        rows.serialize((point.temperature(), point.speed()))?;
    }
    rows.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Load a curve file.
pub fn load_curve(path: &Path) -> Result<Curve, PersistError> {
    let file = File::open(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            PersistError::Missing(path.to_path_buf())
        } else {
            PersistError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    let curve = read_curve(file)?;
    log::info!("Loaded {}-point curve from {}", curve.len(), path.display());
    Ok(curve)
}

/// Load a curve file, falling back to the default curve on any failure.
/// The error, if any, is returned alongside so it can be shown to the user.
pub fn load_curve_or_default(path: &Path) -> (Curve, Option<PersistError>) {
    match load_curve(path) {
        Ok(curve) => (curve, None),
        Err(e) => {
            log::warn!("{e}; falling back to the default curve");
            (curve::default_curve(), Some(e))
        }
    }
}

/// Save a curve file, creating parent directories if needed.
pub fn save_curve(path: &Path, curve: &Curve) -> Result<(), PersistError> {
    let io_err = |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let file = File::create(path).map_err(io_err)?;
    write_curve(file, curve)?;
    log::info!("Saved curve to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_curve() {
        let curve = read_curve("0,20\n 50 , 40\n\n100,100\n".as_bytes()).unwrap();
        assert_eq!(curve, Curve::from_pairs(&[(0, 20), (50, 40), (100, 100)]));
    }

    #[test]
    fn test_read_clamps_values() {
        let curve = read_curve("-5,0\n120,140\n".as_bytes()).unwrap();
        assert_eq!(curve, Curve::from_pairs(&[(0, 0), (100, 100)]));
    }

    #[test]
    fn test_malformed_row() {
        let err = read_curve("0,20\n50,fast\n".as_bytes()).unwrap_err();
        assert!(matches!(err, PersistError::Csv(_)));
    }

    #[test]
    fn test_unordered_file_is_invalid() {
        let err = read_curve("50,20\n10,40\n".as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            PersistError::Invalid(CurveError::NonIncreasingTemperature { .. })
        ));
    }

    #[test]
    fn test_write_format() {
        let mut out = Vec::new();
        write_curve(&mut out, &Curve::from_pairs(&[(0, 10), (100, 100)])).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "0,10\n100,100\n");
    }

    #[test]
    fn test_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let (curve, err) = load_curve_or_default(&dir.path().join("nope.csv"));
        assert_eq!(curve, curve::default_curve());
        assert!(matches!(err, Some(PersistError::Missing(_))));
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.csv");
        fs::write(&path, "0,10\ngarbage\n").unwrap();
        let (curve, err) = load_curve_or_default(&path);
        assert_eq!(curve, curve::default_curve());
        assert!(err.is_some());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles/quiet.csv");
        let curve = Curve::from_pairs(&[(20, 0), (60, 35), (90, 100)]);
        save_curve(&path, &curve).unwrap();
        assert_eq!(load_curve(&path).unwrap(), curve);
    }
}
