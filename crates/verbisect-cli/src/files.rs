//! Loading environments, snapshot sequences and version indexes from disk.
//!
//! Environment files ending in `.json` hold a JSON object
//! (`{"numpy": "1.26"}`); anything else is read as requirement lines
//! (`numpy==1.26`).

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use verbisect_core::{Environment, EnvironmentError, Snapshot, StaticRepository};

/// Errors from reading input files.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{}: invalid JSON: {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{}: {source}", .path.display())]
    Environment {
        path: PathBuf,
        source: EnvironmentError,
    },

    #[error("no snapshots given")]
    EmptySequence,
}

fn read(path: &Path) -> Result<String, InputError> {
    fs::read_to_string(path).map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("json"))
}

fn json_error(path: &Path) -> impl FnOnce(serde_json::Error) -> InputError + '_ {
    move |source| InputError::Json {
        path: path.to_path_buf(),
        source,
    }
}

/// Load one environment file.
pub fn load_environment(path: &Path) -> Result<Environment, InputError> {
    let text = read(path)?;
    if is_json(path) {
        serde_json::from_str(&text).map_err(json_error(path))
    } else {
        Environment::parse_requirements(&text).map_err(|source| InputError::Environment {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Load an ordered snapshot sequence.
///
/// Each path is one snapshot, except that a single `.json` file holding an
/// array is the whole sequence.
pub fn load_sequence(paths: &[PathBuf]) -> Result<Vec<Snapshot>, InputError> {
    if let [path] = paths {
        if is_json(path) {
            let value: serde_json::Value =
                serde_json::from_str(&read(path)?).map_err(json_error(path))?;
            return if value.is_array() {
                let sequence: Vec<Snapshot> =
                    serde_json::from_value(value).map_err(json_error(path))?;
                if sequence.is_empty() {
                    Err(InputError::EmptySequence)
                } else {
                    Ok(sequence)
                }
            } else {
                Ok(vec![serde_json::from_value(value).map_err(json_error(path))?])
            };
        }
    }

    if paths.is_empty() {
        return Err(InputError::EmptySequence);
    }
    paths.iter().map(|path| load_environment(path)).collect()
}

/// Load a JSON version index (`{"numpy": ["1.25", "1.26", "2.0"]}`).
pub fn load_repository(path: &Path) -> Result<StaticRepository, InputError> {
    StaticRepository::from_json(&read(path)?).map_err(json_error(path))
}
