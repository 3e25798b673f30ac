//! Deployment settings, read from `flowdeploy.toml` with environment overrides.
//!
//! ```toml
//! [service]
//! image = "docker.n8n.io/n8nio/n8n:latest"
//! port = 5678
//! timezone = "Europe/Berlin"
//!
//! [tunnel]
//! domain = "flows.example.ngrok.app"
//!
//! [archive]
//! url = "https://drive.google.com/file/d/<ID>/view?usp=sharing"
//! ```

use manifest::ServiceSpec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "flowdeploy.toml";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid setting {key}: {message}")]
    Invalid { key: String, message: String },
}

pub type SettingsResult<T> = Result<T, SettingsError>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub service: ServiceSettings,
    pub tunnel: TunnelSettings,
    pub archive: ArchiveSettings,
    pub files: FileSettings,
    pub packages: PackageSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub image: String,
    pub container_name: String,
    pub port: u16,
    pub data_dir: String,
    pub timezone: String,
    pub encryption_key: Option<String>,
    pub health_timeout_secs: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        let spec = ServiceSpec::default();
        Self {
            image: spec.image,
            container_name: spec.container_name,
            port: spec.port,
            data_dir: spec.data_dir,
            timezone: spec.timezone,
            encryption_key: None,
            health_timeout_secs: 120,
        }
    }
}

impl ServiceSettings {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn health_url(&self) -> String {
        format!("http://127.0.0.1:{}/healthz", self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelSettings {
    /// Static hostname reserved with the tunnel provider
    pub domain: String,
    pub authtoken: Option<String>,
    /// Tunnel agent executable, looked up on `PATH` unless it contains a `/`
    pub binary: String,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            domain: String::new(),
            authtoken: None,
            binary: "ngrok".to_string(),
        }
    }
}

impl TunnelSettings {
    /// The domain without scheme or trailing slash, as pasted values often
    /// carry both.
    pub fn hostname(&self) -> String {
        let domain = self.domain.trim();
        let domain = domain
            .strip_prefix("https://")
            .or_else(|| domain.strip_prefix("http://"))
            .unwrap_or(domain);
        domain.trim_end_matches('/').to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    /// Sharing link or bare file id of the data archive
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    pub env_file: String,
    pub compose_file: String,
    pub state_dir: String,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            env_file: ".env".to_string(),
            compose_file: "docker-compose.yml".to_string(),
            state_dir: ".flowdeploy".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageSettings {
    pub install: Vec<String>,
}

impl Default for PackageSettings {
    fn default() -> Self {
        Self {
            install: ["docker.io", "docker-compose-v2", "tar", "unzip", "curl"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl Settings {
    /// Read settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> SettingsResult<Self> {
        if !path.exists() {
            tracing::debug!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&contents).map_err(|source| SettingsError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Apply overrides from the process environment
    pub fn apply_process_env(&mut self) -> SettingsResult<()> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> SettingsResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(domain) = lookup("FLOWDEPLOY_DOMAIN") {
            self.tunnel.domain = domain;
        }
        if let Some(token) = lookup("NGROK_AUTHTOKEN") {
            self.tunnel.authtoken = Some(token);
        }
        if let Some(url) = lookup("FLOWDEPLOY_ARCHIVE_URL") {
            self.archive.url = Some(url);
        }
        if let Some(port) = lookup("FLOWDEPLOY_PORT") {
            self.service.port = port.trim().parse().map_err(|_| SettingsError::Invalid {
                key: "FLOWDEPLOY_PORT".to_string(),
                message: format!("'{}' is not a port number", port),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> SettingsResult<()> {
        let invalid = |key: &str, message: &str| {
            Err(SettingsError::Invalid {
                key: key.to_string(),
                message: message.to_string(),
            })
        };

        if self.service.image.trim().is_empty() {
            return invalid("service.image", "must not be empty");
        }
        if self.service.container_name.trim().is_empty() {
            return invalid("service.container_name", "must not be empty");
        }
        if self.service.port == 0 {
            return invalid("service.port", "must be greater than 0");
        }
        if self.service.data_dir.trim().is_empty() {
            return invalid("service.data_dir", "must not be empty");
        }
        if self.service.timezone.trim().is_empty() {
            return invalid("service.timezone", "must not be empty");
        }
        if self.service.health_timeout_secs == 0 {
            return invalid("service.health_timeout_secs", "must be greater than 0");
        }
        if self.tunnel.binary.trim().is_empty() {
            return invalid("tunnel.binary", "must not be empty");
        }
        for (key, value) in [
            ("files.env_file", &self.files.env_file),
            ("files.compose_file", &self.files.compose_file),
            ("files.state_dir", &self.files.state_dir),
        ] {
            if value.trim().is_empty() {
                return invalid(key, "must not be empty");
            }
        }

        Ok(())
    }

    /// Commands that publish the service need a tunnel hostname
    pub fn require_domain(&self) -> SettingsResult<String> {
        let hostname = self.tunnel.hostname();
        if hostname.is_empty() {
            return Err(SettingsError::Invalid {
                key: "tunnel.domain".to_string(),
                message: "not configured; set it in the settings file or FLOWDEPLOY_DOMAIN"
                    .to_string(),
            });
        }
        if hostname.contains('/') || hostname.chars().any(char::is_whitespace) {
            return Err(SettingsError::Invalid {
                key: "tunnel.domain".to_string(),
                message: format!("'{}' is not a bare hostname", hostname),
            });
        }
        Ok(hostname)
    }

    pub fn service_spec(&self) -> SettingsResult<ServiceSpec> {
        Ok(ServiceSpec {
            image: self.service.image.clone(),
            container_name: self.service.container_name.clone(),
            port: self.service.port,
            data_dir: self.service.data_dir.clone(),
            timezone: self.service.timezone.clone(),
            domain: self.require_domain()?,
            encryption_key: self.service.encryption_key.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.service.port, 5678);
        assert_eq!(settings.service.container_name, "n8n");
        assert_eq!(settings.tunnel.binary, "ngrok");
        assert_eq!(settings.files.env_file, ".env");
        assert_eq!(settings.files.compose_file, "docker-compose.yml");
        assert!(settings.packages.install.contains(&"docker.io".to_string()));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = Settings::from_toml(
            r#"
            [service]
            port = 8080
            timezone = "Europe/Berlin"

            [tunnel]
            domain = "flows.example.ngrok.app"
            "#,
        )
        .unwrap();

        assert_eq!(settings.service.port, 8080);
        assert_eq!(settings.service.timezone, "Europe/Berlin");
        assert_eq!(settings.service.image, "docker.n8n.io/n8nio/n8n:latest");
        assert_eq!(settings.tunnel.binary, "ngrok");
        assert_eq!(settings.require_domain().unwrap(), "flows.example.ngrok.app");
    }

    #[test]
    fn test_unknown_types_rejected() {
        assert!(Settings::from_toml("[service]\nport = \"eighty\"\n").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[
                ("FLOWDEPLOY_DOMAIN", "env.example.ngrok.app"),
                ("NGROK_AUTHTOKEN", "tok_123"),
                ("FLOWDEPLOY_ARCHIVE_URL", "https://drive.google.com/open?id=abc"),
                ("FLOWDEPLOY_PORT", "9000"),
            ]))
            .unwrap();

        assert_eq!(settings.tunnel.domain, "env.example.ngrok.app");
        assert_eq!(settings.tunnel.authtoken.as_deref(), Some("tok_123"));
        assert_eq!(
            settings.archive.url.as_deref(),
            Some("https://drive.google.com/open?id=abc")
        );
        assert_eq!(settings.service.port, 9000);
    }

    #[test]
    fn test_blank_env_values_ignored() {
        let mut settings = Settings::default();
        settings.tunnel.domain = "file.example".to_string();
        settings
            .apply_env(env(&[("FLOWDEPLOY_DOMAIN", "  ")]))
            .unwrap();
        assert_eq!(settings.tunnel.domain, "file.example");
    }

    #[test]
    fn test_bad_port_override() {
        let mut settings = Settings::default();
        let result = settings.apply_env(env(&[("FLOWDEPLOY_PORT", "99999")]));
        assert!(matches!(result, Err(SettingsError::Invalid { .. })));
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings::default();
        settings.service.port = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.files.compose_file = " ".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.service.health_timeout_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_hostname_normalization() {
        let mut tunnel = TunnelSettings::default();
        tunnel.domain = " https://flows.example.ngrok.app/ ".to_string();
        assert_eq!(tunnel.hostname(), "flows.example.ngrok.app");
    }

    #[test]
    fn test_require_domain() {
        let settings = Settings::default();
        assert!(settings.require_domain().is_err());

        let mut settings = Settings::default();
        settings.tunnel.domain = "example.com/path".to_string();
        assert!(settings.require_domain().is_err());
    }

    #[test]
    fn test_service_spec() {
        let mut settings = Settings::default();
        settings.tunnel.domain = "http://flows.example.ngrok.app".to_string();
        settings.service.encryption_key = Some("k".to_string());

        let spec = settings.service_spec().unwrap();
        assert_eq!(spec.domain, "flows.example.ngrok.app");
        assert_eq!(spec.encryption_key.as_deref(), Some("k"));
        assert_eq!(spec.port, 5678);
    }

    #[test]
    fn test_health_url() {
        let settings = Settings::default();
        assert_eq!(settings.service.health_url(), "http://127.0.0.1:5678/healthz");
        assert_eq!(settings.service.health_timeout(), Duration::from_secs(120));
    }
}
