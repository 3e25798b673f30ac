//! The deployment verbs: setup, start, stop, logs and status.
//!
//! Each verb is a straight sequence of steps that stops at the first failure.
//! Nothing is retried and nothing already done is rolled back.

use crate::container::{self, ComposeProject, ComposeRuntime, ContainerError};
use crate::packages::{self, PackageError, Provisioner};
use crate::settings::{Settings, SettingsError};
use crate::tunnel::{Tunnel, TunnelError};
use crate::unpack::{self, ArchiveFormat, UnpackError};
use archive::{ArchiveError, ArchiveSource, FileId};
use manifest::{ComposeManifest, EnvFile, ManifestError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

const DOWNLOAD_NAME: &str = "archive.download";

#[derive(Error, Debug)]
pub enum DeployError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    Unpack(#[from] UnpackError),

    #[error("Archive download failed: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Failed to write configuration: {0}")]
    Manifest(#[from] ManifestError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DeployResult<T> = Result<T, DeployError>;

#[derive(Debug, Clone, Default)]
pub struct SetupOptions {
    /// Sharing link that takes precedence over the configured one
    pub archive_url: Option<String>,
    pub skip_packages: bool,
    pub skip_archive: bool,
    /// Download even when the data directory already has content
    pub force: bool,
    /// Leave data directory ownership alone
    pub skip_chown: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveStep {
    Skipped,
    NotConfigured,
    DataPresent,
    Restored { id: String, bytes: u64, entries: usize },
}

#[derive(Debug, Clone)]
pub struct SetupReport {
    pub installed_packages: Vec<String>,
    pub archive: ArchiveStep,
    pub files: RenderedFiles,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFiles {
    pub env_file: PathBuf,
    pub compose_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct StartReport {
    pub runtime: ComposeRuntime,
    pub tunnel_pid: u32,
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub services: Option<String>,
    pub tunnel_pid: Option<u32>,
    pub public_url: Option<String>,
}

/// A deployment directory and the settings that describe it
#[derive(Debug, Clone)]
pub struct Deployment {
    settings: Settings,
    dir: PathBuf,
}

impl Deployment {
    pub fn new(settings: Settings, dir: impl Into<PathBuf>) -> DeployResult<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            dir: dir.into(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn env_path(&self) -> PathBuf {
        self.dir.join(&self.settings.files.env_file)
    }

    pub fn compose_path(&self) -> PathBuf {
        self.dir.join(&self.settings.files.compose_file)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.dir.join(&self.settings.files.state_dir)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dir.join(&self.settings.service.data_dir)
    }

    fn tunnel(&self, domain: String) -> Tunnel {
        Tunnel::new(
            self.settings.tunnel.binary.clone(),
            domain,
            self.settings.service.port,
            self.state_dir(),
        )
    }

    fn compose(&self, runtime: ComposeRuntime) -> ComposeProject {
        ComposeProject::new(runtime, &self.dir, &self.settings.files.compose_file)
    }

    fn detected_compose(&self) -> DeployResult<ComposeProject> {
        let runtime = container::detect_runtime();
        if !runtime.is_available() {
            return Err(ContainerError::NoRuntimeAvailable.into());
        }
        info!("Using {}", runtime);
        Ok(self.compose(runtime))
    }

    /// Write the environment file and the compose manifest
    pub fn render_files(&self) -> DeployResult<RenderedFiles> {
        let spec = self.settings.service_spec()?;
        std::fs::create_dir_all(&self.dir)?;

        let env_path = self.env_path();
        let env = EnvFile::from_spec(&spec)?;
        manifest::write_atomically(&env_path, &env.render())?;
        manifest::restrict_permissions(&env_path)?;

        let compose_path = self.compose_path();
        let compose = ComposeManifest::for_service(&spec, &self.settings.files.env_file);
        manifest::write_atomically(&compose_path, &compose.to_yaml()?)?;

        info!(
            "Wrote {} and {}",
            env_path.display(),
            compose_path.display()
        );
        Ok(RenderedFiles {
            env_file: env_path,
            compose_file: compose_path,
        })
    }

    /// Install packages, restore the data archive and write configuration
    pub async fn setup(
        &self,
        options: &SetupOptions,
        source: &dyn ArchiveSource,
    ) -> DeployResult<SetupReport> {
        // Fail on a missing domain before doing anything slow.
        self.settings.require_domain()?;

        let installed_packages = if options.skip_packages {
            Vec::new()
        } else {
            let wanted = &self.settings.packages.install;
            let provisioner = Provisioner::detect(wanted)?;
            provisioner.provision(wanted)?
        };

        let archive = if options.skip_archive {
            ArchiveStep::Skipped
        } else {
            self.restore_archive(options, source).await?
        };

        std::fs::create_dir_all(self.data_dir())?;
        let files = self.render_files()?;

        Ok(SetupReport {
            installed_packages,
            archive,
            files,
        })
    }

    async fn restore_archive(
        &self,
        options: &SetupOptions,
        source: &dyn ArchiveSource,
    ) -> DeployResult<ArchiveStep> {
        let Some(link) = options
            .archive_url
            .as_deref()
            .or(self.settings.archive.url.as_deref())
        else {
            warn!("No archive configured, the service starts with an empty data directory");
            return Ok(ArchiveStep::NotConfigured);
        };

        let data_dir = self.data_dir();
        if !options.force && has_content(&data_dir)? {
            info!(
                "{} already has content, skipping download (use --force to replace it)",
                data_dir.display()
            );
            return Ok(ArchiveStep::DataPresent);
        }

        let id = FileId::parse(link)?;
        let state_dir = self.state_dir();
        std::fs::create_dir_all(&state_dir)?;
        let download = state_dir.join(DOWNLOAD_NAME);

        println!("📥 Downloading archive {} from {}", id, source.source_name());
        let outcome = source.fetch(&id, &download).await?;

        let unpacked = ArchiveFormat::detect(&outcome.format_hint(), &outcome.path)
            .and_then(|format| unpack::unpack(&outcome.path, format, &data_dir));
        std::fs::remove_file(&outcome.path)?;
        let entries = unpacked?;

        if !options.skip_chown {
            if let Err(e) = unpack::fix_ownership(&data_dir, !packages::is_root()) {
                warn!("Could not hand {} to the service user: {}", data_dir.display(), e);
            }
        }

        Ok(ArchiveStep::Restored {
            id: id.to_string(),
            bytes: outcome.bytes,
            entries,
        })
    }

    /// Bring the service up and publish it through the tunnel
    pub async fn start(&self) -> DeployResult<StartReport> {
        let domain = self.settings.require_domain()?;
        self.render_files()?;

        let compose = self.detected_compose()?;
        println!("🚀 Starting {}", self.settings.service.container_name);
        compose.up()?;

        println!("⏳ Waiting for the service to become healthy...");
        container::wait_for_health(
            &self.settings.service.health_url(),
            self.settings.service.health_timeout(),
        )
        .await?;

        let tunnel = self.tunnel(domain);
        if let Some(token) = &self.settings.tunnel.authtoken {
            tunnel.configure_authtoken(token)?;
        }
        let tunnel_pid = tunnel.start().await?;

        Ok(StartReport {
            runtime: compose.runtime(),
            tunnel_pid,
            public_url: tunnel.public_url(),
        })
    }

    /// Stop the tunnel agent, then the service
    pub fn stop(&self) -> DeployResult<()> {
        let tunnel = self.tunnel(self.settings.tunnel.hostname());
        if !tunnel.stop()? {
            info!("No tunnel agent was running");
        }

        let compose = self.detected_compose()?;
        compose.down()?;
        Ok(())
    }

    pub fn logs(&self, follow: bool, tail: Option<usize>) -> DeployResult<()> {
        self.detected_compose()?.logs(follow, tail)?;
        Ok(())
    }

    pub fn status(&self) -> DeployResult<StatusReport> {
        let runtime = container::detect_runtime();
        let services = if runtime.is_available() && self.compose_path().exists() {
            Some(self.compose(runtime).ps()?)
        } else {
            None
        };

        let hostname = self.settings.tunnel.hostname();
        let tunnel = self.tunnel(hostname.clone());
        let tunnel_pid = tunnel.running_pid()?;
        let public_url = (!hostname.is_empty() && tunnel_pid.is_some()).then(|| tunnel.public_url());

        Ok(StatusReport {
            services,
            tunnel_pid,
            public_url,
        })
    }
}

fn has_content(dir: &Path) -> std::io::Result<bool> {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.tunnel.domain = "flows.example.ngrok.app".to_string();
        settings
    }

    #[test]
    fn test_new_rejects_invalid_settings() {
        let mut settings = settings();
        settings.service.port = 0;
        assert!(matches!(
            Deployment::new(settings, "."),
            Err(DeployError::Settings(_))
        ));
    }

    #[test]
    fn test_paths() {
        let deployment = Deployment::new(settings(), "/srv/flows").unwrap();
        assert_eq!(deployment.env_path(), PathBuf::from("/srv/flows/.env"));
        assert_eq!(
            deployment.compose_path(),
            PathBuf::from("/srv/flows/docker-compose.yml")
        );
        assert_eq!(deployment.data_dir(), PathBuf::from("/srv/flows/n8n_data"));
        assert_eq!(deployment.state_dir(), PathBuf::from("/srv/flows/.flowdeploy"));
    }

    #[test]
    fn test_render_files() {
        let dir = TempDir::new().unwrap();
        let deployment = Deployment::new(settings(), dir.path()).unwrap();

        let files = deployment.render_files().unwrap();

        let env = EnvFile::parse(&std::fs::read_to_string(&files.env_file).unwrap()).unwrap();
        assert_eq!(env.get("N8N_HOST"), Some("flows.example.ngrok.app"));

        let compose =
            ComposeManifest::from_yaml(&std::fs::read_to_string(&files.compose_file).unwrap())
                .unwrap();
        assert_eq!(compose.service().unwrap().env_file, vec![".env"]);
    }

    #[test]
    fn test_render_files_requires_domain() {
        let dir = TempDir::new().unwrap();
        let deployment = Deployment::new(Settings::default(), dir.path()).unwrap();
        assert!(matches!(
            deployment.render_files(),
            Err(DeployError::Settings(SettingsError::Invalid { .. }))
        ));
        assert!(!deployment.env_path().exists());
    }

    #[test]
    fn test_has_content() {
        let dir = TempDir::new().unwrap();
        assert!(!has_content(&dir.path().join("missing")).unwrap());
        assert!(!has_content(dir.path()).unwrap());
        std::fs::write(dir.path().join("x"), "").unwrap();
        assert!(has_content(dir.path()).unwrap());
    }

    #[test]
    fn test_stop_without_tunnel_or_runtime_manifest() {
        let dir = TempDir::new().unwrap();
        let deployment = Deployment::new(settings(), dir.path()).unwrap();
        // No compose manifest was written, so whichever runtime is found the
        // stop cannot reach `compose down`.
        assert!(deployment.stop().is_err());
    }

    #[test]
    fn test_status_without_anything_running() {
        let dir = TempDir::new().unwrap();
        let deployment = Deployment::new(settings(), dir.path()).unwrap();
        let status = deployment.status().unwrap();
        assert!(status.services.is_none());
        assert!(status.tunnel_pid.is_none());
        assert!(status.public_url.is_none());
    }
}
