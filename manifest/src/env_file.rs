//! The `.env` file handed to the service container.

use crate::{ManifestError, ManifestResult, ServiceSpec, CONTAINER_PORT};
use std::fmt::Write as _;

const HEADER: &str = "# Generated by flowdeploy. Local edits are overwritten on the next start.";

/// Ordered `KEY=VALUE` pairs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    entries: Vec<(String, String)>,
}

impl EnvFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the fixed key set for a deployment
    pub fn from_spec(spec: &ServiceSpec) -> ManifestResult<Self> {
        if spec.domain.trim().is_empty() {
            return Err(ManifestError::InvalidValue {
                key: "N8N_HOST".to_string(),
                reason: "tunnel domain is not configured".to_string(),
            });
        }

        let mut env = Self::new();
        env.set("N8N_HOST", &spec.domain)?;
        // The container always listens on its own port; the host side is
        // mapped in the compose manifest.
        env.set("N8N_PORT", CONTAINER_PORT.to_string())?;
        env.set("N8N_PROTOCOL", "https")?;
        env.set("WEBHOOK_URL", format!("https://{}/", spec.domain))?;
        env.set("GENERIC_TIMEZONE", &spec.timezone)?;
        env.set("TZ", &spec.timezone)?;
        env.set("N8N_ENFORCE_SETTINGS_FILE_PERMISSIONS", "true")?;
        env.set("N8N_RUNNERS_ENABLED", "true")?;
        if let Some(key) = &spec.encryption_key {
            env.set("N8N_ENCRYPTION_KEY", key)?;
        }
        Ok(env)
    }

    /// Insert or replace a key, keeping the original position on replace
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> ManifestResult<()> {
        let value = value.into();
        validate_key(key)?;
        if value.contains('\n') || value.contains('\r') {
            return Err(ManifestError::InvalidValue {
                key: key.to_string(),
                reason: "value must not contain line breaks".to_string(),
            });
        }

        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::with_capacity(64 * (self.entries.len() + 1));
        out.push_str(HEADER);
        out.push('\n');
        for (key, value) in &self.entries {
            let _ = writeln!(out, "{}={}", key, quote(value));
        }
        out
    }

    /// Read a file in the format produced by [`EnvFile::render`]
    pub fn parse(contents: &str) -> ManifestResult<Self> {
        let mut env = Self::new();

        for (idx, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ManifestError::MalformedLine {
                    line: idx + 1,
                    content: raw.to_string(),
                });
            };
            let key = key.trim();
            if validate_key(key).is_err() {
                return Err(ManifestError::MalformedLine {
                    line: idx + 1,
                    content: raw.to_string(),
                });
            }
            env.set(key, unquote(value.trim()))?;
        }

        Ok(env)
    }
}

fn validate_key(key: &str) -> ManifestResult<()> {
    let valid = !key.is_empty()
        && !key.starts_with(|c: char| c.is_ascii_digit())
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ManifestError::InvalidValue {
            key: key.to_string(),
            reason: "keys may only contain ASCII letters, digits and underscores".to_string(),
        })
    }
}

fn needs_quoting(value: &str) -> bool {
    value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '#' | '"' | '\'' | '$' | '\\' | '`'))
}

// Single quotes are taken literally by compose, so they are preferred. Values
// that contain a single quote fall back to double quotes, where compose
// interpolates variables and `$` has to be written as `$$`.
fn quote(value: &str) -> String {
    if !needs_quoting(value) {
        return value.to_string();
    }
    if !value.contains('\'') {
        return format!("'{}'", value);
    }
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('$', "$$");
    format!("\"{}\"", escaped)
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        return value[1..value.len() - 1].to_string();
    }
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        let inner = &value[1..value.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some(next) => out.push(next),
                    None => out.push('\\'),
                }
            } else if c == '$' && chars.as_str().starts_with('$') {
                chars.next();
                out.push('$');
            } else {
                out.push(c);
            }
        }
        return out;
    }
    value.to_string()
}
