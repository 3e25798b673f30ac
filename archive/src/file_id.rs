//! Pulling a storage file key out of whatever the user pasted.
//!
//! Accepted shapes:
//!
//! - `https://drive.google.com/file/d/<ID>/view?usp=sharing`
//! - `https://docs.google.com/document/d/<ID>/edit`
//! - `https://drive.google.com/drive/folders/<ID>`
//! - `https://drive.google.com/open?id=<ID>` and `/uc?id=<ID>&export=download`
//! - `https://drive.usercontent.google.com/download?id=<ID>`
//! - any of the above without the scheme, e.g. `drive.google.com/file/d/<ID>/view`
//! - a bare `<ID>`

use crate::provider::{ArchiveError, ArchiveResult};
use std::fmt;
use url::Url;

const KNOWN_HOSTS: &[&str] = &[
    "drive.google.com",
    "docs.google.com",
    "drive.usercontent.google.com",
];

/// A validated Google Drive file key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileId(String);

impl FileId {
    pub fn parse(input: &str) -> ArchiveResult<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ArchiveError::EmptyInput);
        }

        let candidate = if looks_like_url(input) {
            id_from_url(input)?
        } else {
            input.to_string()
        };

        Self::validate(&candidate)?;
        Ok(Self(candidate))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> ArchiveResult<()> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(())
        } else {
            Err(ArchiveError::InvalidFileId { id: id.to_string() })
        }
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for FileId {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn looks_like_url(input: &str) -> bool {
    let lower = input.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return true;
    }
    // Links copied from a browser address bar sometimes lack the scheme
    KNOWN_HOSTS
        .iter()
        .any(|host| lower.starts_with(&format!("{}/", host)))
}

fn id_from_url(input: &str) -> ArchiveResult<String> {
    let unrecognized = || ArchiveError::UnrecognizedUrl {
        url: input.to_string(),
    };

    let lower = input.to_ascii_lowercase();
    let url = if lower.starts_with("http://") || lower.starts_with("https://") {
        Url::parse(input)
    } else {
        Url::parse(&format!("https://{}", input))
    }
    .map_err(|_| unrecognized())?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(unrecognized());
    }
    let host = url.host_str().ok_or_else(unrecognized)?;
    if !KNOWN_HOSTS.contains(&host) {
        return Err(unrecognized());
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    for marker in ["d", "folders"] {
        if let Some(pos) = segments.iter().position(|seg| *seg == marker) {
            if let Some(id) = segments.get(pos + 1) {
                return Ok((*id).to_string());
            }
        }
    }

    url.query_pairs()
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.into_owned())
        .ok_or_else(unrecognized)
}
