use crate::config::DriveConfig;
use crate::file_id::FileId;
use crate::provider::{ArchiveError, ArchiveResult, ArchiveSource};
use crate::types::DownloadOutcome;
use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::{Response, Url};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Downloads shared files from Google Drive, including the large-file
/// confirmation round trip.
pub struct GoogleDriveSource {
    http_client: reqwest::Client,
    config: DriveConfig,
}

/// What the "can't scan this file for viruses" page asks us to send back
#[derive(Debug, Clone, PartialEq, Eq)]
struct Confirmation {
    action: Option<String>,
    fields: Vec<(String, String)>,
}

impl Confirmation {
    fn from_page(html: &str) -> Option<Self> {
        static FORM_ACTION: OnceLock<Regex> = OnceLock::new();
        static INPUT: OnceLock<Regex> = OnceLock::new();
        static INPUT_NAME: OnceLock<Regex> = OnceLock::new();
        static INPUT_VALUE: OnceLock<Regex> = OnceLock::new();
        static CONFIRM_LINK: OnceLock<Regex> = OnceLock::new();

        let form_action = FORM_ACTION
            .get_or_init(|| Regex::new(r#"<form[^>]*\baction="([^"]+)""#).expect("valid regex"));
        let input = INPUT.get_or_init(|| Regex::new(r#"<input[^>]*>"#).expect("valid regex"));
        let input_name =
            INPUT_NAME.get_or_init(|| Regex::new(r#"\bname="([^"]*)""#).expect("valid regex"));
        let input_value =
            INPUT_VALUE.get_or_init(|| Regex::new(r#"\bvalue="([^"]*)""#).expect("valid regex"));
        let confirm_link = CONFIRM_LINK
            .get_or_init(|| Regex::new(r"confirm=([0-9A-Za-z_-]+)").expect("valid regex"));

        let action = form_action
            .captures(html)
            .map(|c| decode_entities(&c[1]));

        let mut fields: Vec<(String, String)> = input
            .find_iter(html)
            .filter_map(|tag| {
                let tag = tag.as_str();
                let name = input_name.captures(tag)?;
                let value = input_value.captures(tag)?;
                Some((decode_entities(&name[1]), decode_entities(&value[1])))
            })
            .filter(|(name, _)| !name.is_empty())
            .collect();

        if !fields.iter().any(|(name, _)| name == "confirm") {
            let token = confirm_link.captures(html)?;
            fields.push(("confirm".to_string(), token[1].to_string()));
        }

        Some(Self { action, fields })
    }
}

impl GoogleDriveSource {
    pub fn new(config: DriveConfig) -> ArchiveResult<Self> {
        config
            .validate()
            .map_err(|message| ArchiveError::InvalidConfig { message })?;

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .cookie_store(true)
            .build()
            .map_err(|e| ArchiveError::InvalidConfig {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            http_client,
            config,
        })
    }

    pub fn with_default_config() -> ArchiveResult<Self> {
        Self::new(DriveConfig::default())
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    async fn request_file(&self, id: &FileId) -> ArchiveResult<Response> {
        let url = format!("{}/uc", self.config.base_url.trim_end_matches('/'));
        debug!("Requesting {} for {}", url, id);

        let response = self
            .http_client
            .get(&url)
            .query(&[("export", "download"), ("id", id.as_str())])
            .send()
            .await?;
        check_status(id, &response)?;

        if !is_html(response.headers()) {
            return Ok(response);
        }

        let page_url = response.url().clone();
        let page = response.text().await?;
        let confirmation =
            Confirmation::from_page(&page).ok_or_else(|| ArchiveError::ConfirmationMissing {
                id: id.to_string(),
            })?;

        let action = self.confirmation_target(&page_url, confirmation.action.as_deref());
        let mut query = confirmation.fields;
        for (key, value) in [("id", id.as_str()), ("export", "download")] {
            if !query.iter().any(|(k, _)| k == key) {
                query.push((key.to_string(), value.to_string()));
            }
        }

        info!("Large file, confirming download of {}", id);
        let response = self.http_client.get(action).query(&query).send().await?;
        check_status(id, &response)?;

        if is_html(response.headers()) {
            return Err(ArchiveError::ConfirmationMissing { id: id.to_string() });
        }
        Ok(response)
    }

    fn confirmation_target(&self, page_url: &Url, action: Option<&str>) -> String {
        match action {
            Some(action) => page_url
                .join(action)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| action.to_string()),
            None => format!(
                "{}/download",
                self.config.usercontent_url.trim_end_matches('/')
            ),
        }
    }
}

#[async_trait]
impl ArchiveSource for GoogleDriveSource {
    async fn fetch(&self, id: &FileId, dest: &Path) -> ArchiveResult<DownloadOutcome> {
        let response = self.request_file(id).await?;
        let file_name = attachment_file_name(response.headers());

        let partial = partial_path(dest);
        let bytes = match write_body(response, &partial).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    debug!("Could not remove {}: {}", partial.display(), cleanup);
                }
                return Err(e);
            }
        };

        tokio::fs::rename(&partial, dest).await?;
        info!("Downloaded {} ({} bytes) to {}", id, bytes, dest.display());

        Ok(DownloadOutcome {
            path: dest.to_path_buf(),
            bytes,
            file_name,
        })
    }

    fn source_name(&self) -> &'static str {
        "google-drive"
    }
}

async fn write_body(response: Response, path: &Path) -> ArchiveResult<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut bytes = 0u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        bytes += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(bytes)
}

fn check_status(id: &FileId, response: &Response) -> ArchiveResult<()> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(ArchiveError::HttpStatus {
            id: id.to_string(),
            status: status.as_u16(),
        })
    }
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().starts_with("text/html"))
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut partial = dest.as_os_str().to_owned();
    partial.push(".part");
    PathBuf::from(partial)
}

/// The plain `filename=` parameter of a `Content-Disposition` header,
/// reduced to its final path component.
fn attachment_file_name(headers: &HeaderMap) -> Option<String> {
    static FILENAME: OnceLock<Regex> = OnceLock::new();
    let filename = FILENAME
        .get_or_init(|| Regex::new(r#"(?i)\bfilename="?([^";]+)"?"#).expect("valid regex"));

    let header = headers.get(CONTENT_DISPOSITION)?.to_str().ok()?;
    let raw = filename.captures(header)?.get(1)?.as_str().trim();
    Path::new(raw)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
}

fn decode_entities(value: &str) -> String {
    value
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}
