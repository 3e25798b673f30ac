//! Configuration file rendering for flowdeploy
//!
//! This crate produces the two files a deployment directory needs before the
//! service can be started: the environment file consumed by the container and
//! the compose manifest describing the service itself.

pub mod compose;
pub mod env_file;

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use compose::{
    ComposeManifest, ComposeService, CONTAINER_DATA_PATH, CONTAINER_PORT, SERVICE_NAME,
};
pub use env_file::EnvFile;

/// Errors related to rendering and writing configuration files
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("Malformed line {line} in environment file: {content}")]
    MalformedLine { line: usize, content: String },
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ManifestResult<T> = Result<T, ManifestError>;

/// Everything the rendered files need to know about the deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Container image reference
    pub image: String,
    /// Name given to the running container
    pub container_name: String,
    /// Host port published for the service
    pub port: u16,
    /// Data directory, relative to the deployment directory
    pub data_dir: String,
    /// IANA timezone name
    pub timezone: String,
    /// Public hostname the tunnel serves
    pub domain: String,
    /// Optional fixed encryption key for stored credentials
    pub encryption_key: Option<String>,
}

impl Default for ServiceSpec {
    fn default() -> Self {
        Self {
            image: "docker.n8n.io/n8nio/n8n:latest".to_string(),
            container_name: "n8n".to_string(),
            port: CONTAINER_PORT,
            data_dir: "n8n_data".to_string(),
            timezone: "UTC".to_string(),
            domain: String::new(),
            encryption_key: None,
        }
    }
}

/// Write `contents` next to `path` and rename it into place so readers never
/// observe a half-written file.
pub fn write_atomically(path: &Path, contents: &str) -> ManifestResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, contents).map_err(|source| ManifestError::Write {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| ManifestError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Restrict a file to its owner. No-op on non-unix targets.
pub fn restrict_permissions(path: &Path) -> ManifestResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_service_spec_default() {
        let spec = ServiceSpec::default();
        assert_eq!(spec.container_name, "n8n");
        assert_eq!(spec.port, 5678);
        assert_eq!(spec.data_dir, "n8n_data");
        assert!(spec.encryption_key.is_none());
    }

    #[test]
    fn test_write_atomically_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");

        write_atomically(&path, "A=1\n").unwrap();
        write_atomically(&path, "A=2\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "A=2\n");
        assert!(!dir.path().join(".env.tmp").exists());
    }

    #[test]
    fn test_write_atomically_missing_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("file.yml");
        let result = write_atomically(&path, "x");
        assert!(matches!(result, Err(ManifestError::Write { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_restrict_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "A=1\n").unwrap();
        restrict_permissions(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
