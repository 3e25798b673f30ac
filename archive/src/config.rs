use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    pub base_url: String,
    pub usercontent_url: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            base_url: "https://drive.google.com".to_string(),
            usercontent_url: "https://drive.usercontent.google.com".to_string(),
            timeout: Duration::from_secs(30 * 60),
            user_agent: concat!("flowdeploy/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl DriveConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_usercontent_url(mut self, usercontent_url: impl Into<String>) -> Self {
        self.usercontent_url = usercontent_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, url) in [
            ("Base URL", &self.base_url),
            ("Usercontent URL", &self.usercontent_url),
        ] {
            if url.is_empty() {
                return Err(format!("{} cannot be empty", name));
            }
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(format!("{} must start with http:// or https://", name));
            }
        }

        if self.timeout.is_zero() {
            return Err("Timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}
