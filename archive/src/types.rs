use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Result of a completed download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOutcome {
    /// Where the file was written
    pub path: PathBuf,
    /// Number of bytes written
    pub bytes: u64,
    /// File name announced by the server, if any
    pub file_name: Option<String>,
}

impl DownloadOutcome {
    /// The name to use when guessing the archive format: the announced file
    /// name when there is one, otherwise the destination path.
    pub fn format_hint(&self) -> String {
        self.file_name
            .clone()
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hint_prefers_file_name() {
        let outcome = DownloadOutcome {
            path: PathBuf::from("/tmp/archive.download"),
            bytes: 10,
            file_name: Some("n8n_data.tar.gz".to_string()),
        };
        assert_eq!(outcome.format_hint(), "n8n_data.tar.gz");
    }

    #[test]
    fn test_format_hint_falls_back_to_path() {
        let outcome = DownloadOutcome {
            path: PathBuf::from("/tmp/archive.zip"),
            bytes: 10,
            file_name: None,
        };
        assert_eq!(outcome.format_hint(), "/tmp/archive.zip");
    }

    #[test]
    fn test_serialization() {
        let outcome = DownloadOutcome {
            path: PathBuf::from("/tmp/archive.zip"),
            bytes: 42,
            file_name: None,
        };
        let json = serde_json::to_string(&outcome).unwrap();
        let parsed: DownloadOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, outcome);
    }
}
