use crate::file_id::FileId;
use crate::types::DownloadOutcome;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("No sharing link or file id was given")]
    EmptyInput,

    #[error("Not a recognized sharing link: {url}")]
    UnrecognizedUrl { url: String },

    #[error("Invalid file id '{id}': only letters, digits, '-' and '_' are allowed")]
    InvalidFileId { id: String },

    #[error("Download of {id} returned HTTP {status}")]
    HttpStatus { id: String, status: u16 },

    #[error(
        "Download of {id} needs confirmation but no token was found. \
         The file may be private or over its download quota."
    )]
    ConfirmationMissing { id: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Somewhere a data archive can be fetched from
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Download the file identified by `id` to `dest`
    async fn fetch(&self, id: &FileId, dest: &Path) -> ArchiveResult<DownloadOutcome>;

    fn source_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct MockSource;

    #[async_trait]
    impl ArchiveSource for MockSource {
        async fn fetch(&self, id: &FileId, dest: &Path) -> ArchiveResult<DownloadOutcome> {
            tokio::fs::write(dest, id.as_str()).await?;
            Ok(DownloadOutcome {
                path: dest.to_path_buf(),
                bytes: id.as_str().len() as u64,
                file_name: None,
            })
        }

        fn source_name(&self) -> &'static str {
            "mock"
        }
    }

    #[tokio::test]
    async fn test_mock_source() {
        let dir = tempfile::TempDir::new().unwrap();
        let dest: PathBuf = dir.path().join("archive.bin");
        let id = FileId::parse("abc_123-XYZ").unwrap();

        let source: Box<dyn ArchiveSource> = Box::new(MockSource);
        let outcome = source.fetch(&id, &dest).await.unwrap();

        assert_eq!(outcome.bytes, 11);
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "abc_123-XYZ");
        assert_eq!(source.source_name(), "mock");
    }

    #[test]
    fn test_error_display() {
        let error = ArchiveError::HttpStatus {
            id: "abc".to_string(),
            status: 404,
        };
        assert_eq!(error.to_string(), "Download of abc returned HTTP 404");

        let error = ArchiveError::ConfirmationMissing {
            id: "abc".to_string(),
        };
        assert!(error.to_string().contains("private"));
    }
}
