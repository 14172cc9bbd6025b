//! Advisory bridge backed by canned responses on disk.
//!
//! Each symbol's response lives in `<base>/<SYMBOL>.txt` in the `KEY: value`
//! format the advisory parser accepts. A missing or malformed file makes the
//! opinion unavailable for that symbol, which degrades fusion to technical only.

use crate::domain::error::EngineError;
use crate::domain::fusion::{AdvisoryOpinion, parse_advisory};
use crate::ports::advisory_port::AdvisoryPort;
use std::fs;
use std::path::PathBuf;

pub struct FileAdvisoryAdapter {
    base_path: PathBuf,
}

impl FileAdvisoryAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }
}

impl AdvisoryPort for FileAdvisoryAdapter {
    fn opinion(&self, symbol: &str, _prompt: &str) -> Result<AdvisoryOpinion, EngineError> {
        let path = self.base_path.join(format!("{symbol}.txt"));
        let text = fs::read_to_string(&path).map_err(|e| EngineError::AdvisoryUnavailable {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;
        Ok(parse_advisory(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fusion::{Action, Sentiment};
    use tempfile::TempDir;

    #[test]
    fn reads_and_parses_response() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("BHP.txt"),
            "SENTIMENT: bearish\nCONFIDENCE: 65\nACTION: SELL\nREASONING: iron ore weakness\n",
        )
        .unwrap();
        let adapter = FileAdvisoryAdapter::new(dir.path().to_path_buf());
        let opinion = adapter.opinion("BHP", "ignored").unwrap();
        assert_eq!(opinion.sentiment, Sentiment::Bearish);
        assert_eq!(opinion.action, Action::Sell);
        assert_eq!(opinion.confidence, 65.0);
    }

    #[test]
    fn missing_file_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let adapter = FileAdvisoryAdapter::new(dir.path().to_path_buf());
        let err = adapter.opinion("XYZ", "").unwrap_err();
        assert!(matches!(err, EngineError::AdvisoryUnavailable { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn malformed_response_is_unavailable() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("CBA.txt"), "I think it goes up").unwrap();
        let adapter = FileAdvisoryAdapter::new(dir.path().to_path_buf());
        let err = adapter.opinion("CBA", "").unwrap_err();
        assert!(matches!(err, EngineError::AdvisoryUnavailable { .. }));
    }
}
