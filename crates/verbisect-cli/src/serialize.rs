//! Saving and loading bisection reports.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;
use verbisect_core::BisectionResult;

/// Errors that can occur during serialization.
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Save a result as pretty JSON.
pub fn save_result(result: &BisectionResult, path: &Path) -> Result<(), SerializeError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, result)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Load a result saved by [`save_result`].
pub fn load_result(path: &Path) -> Result<BisectionResult, SerializeError> {
    let reader = BufReader::new(File::open(path)?);
    let result = serde_json::from_reader(reader)?;
    Ok(result)
}

/// Render a result as pretty JSON.
pub fn result_to_json(result: &BisectionResult) -> Result<String, SerializeError> {
    Ok(serde_json::to_string_pretty(result)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use verbisect_core::{Outcome, Phase, ProbeRecord, Snapshot, Verdict, Version};

    fn sample() -> BisectionResult {
        BisectionResult {
            outcome: Outcome::FoundIndex { index: 3 },
            oracle_calls: 1,
            log: vec![ProbeRecord {
                seq: 0,
                phase: Phase::Sequence,
                axis: None,
                index: Some(3),
                snapshot: Snapshot::from_pairs([("numpy", Version::parse("2.0").unwrap())]),
                verdict: Verdict::Fail,
                elapsed_ms: 840,
            }],
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");

        save_result(&sample(), &path).unwrap();
        let loaded = load_result(&path).unwrap();
        assert_eq!(loaded, sample());
    }

    #[test]
    fn test_json_shape() {
        let json = result_to_json(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["outcome"]["kind"], "found_index");
        assert_eq!(value["log"][0]["verdict"], "fail");
        assert_eq!(value["log"][0]["snapshot"]["numpy"], "2.0");
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(load_result(&path), Err(SerializeError::Json(_))));
        assert!(matches!(
            load_result(&dir.path().join("missing.json")),
            Err(SerializeError::Io(_))
        ));
    }
}
