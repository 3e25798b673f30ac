use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::debug;

/// Compose implementations supported, in order of preference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeRuntime {
    /// `docker compose` plugin
    DockerPlugin,
    /// Standalone `docker-compose` binary
    DockerCompose,
    /// `podman compose`
    PodmanCompose,
    /// No compose implementation available
    None,
}

impl ComposeRuntime {
    /// Executable to invoke
    pub fn program(&self) -> &'static str {
        match self {
            ComposeRuntime::DockerPlugin => "docker",
            ComposeRuntime::DockerCompose => "docker-compose",
            ComposeRuntime::PodmanCompose => "podman",
            ComposeRuntime::None => "",
        }
    }

    /// Arguments that select the compose subcommand
    pub fn base_args(&self) -> &'static [&'static str] {
        match self {
            ComposeRuntime::DockerPlugin | ComposeRuntime::PodmanCompose => &["compose"],
            ComposeRuntime::DockerCompose | ComposeRuntime::None => &[],
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, ComposeRuntime::None)
    }
}

impl std::fmt::Display for ComposeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComposeRuntime::DockerPlugin => write!(f, "docker compose"),
            ComposeRuntime::DockerCompose => write!(f, "docker-compose"),
            ComposeRuntime::PodmanCompose => write!(f, "podman compose"),
            ComposeRuntime::None => write!(f, "none"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ContainerError {
    /// No compose implementation is installed
    #[error("No container runtime available. Install Docker with the compose plugin (run `flowdeploy setup`).")]
    NoRuntimeAvailable,

    /// Compose manifest is missing from the deployment directory
    #[error("Compose manifest not found at {path}. Run `flowdeploy setup` or `flowdeploy render` first.")]
    ManifestMissing { path: String },

    /// A compose command exited unsuccessfully
    #[error("Command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// The service never reported healthy
    #[error("Service health check failed: {reason}. Inspect `flowdeploy logs` for details.")]
    HealthCheckFailed { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ContainerResult<T> = Result<T, ContainerError>;

fn probe(program: &str, args: &[&str]) -> bool {
    Command::new(program)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

/// Detect the available compose implementation in order of preference
pub fn detect_runtime() -> ComposeRuntime {
    if probe("docker", &["compose", "version"]) {
        return ComposeRuntime::DockerPlugin;
    }

    if probe("docker-compose", &["--version"]) {
        return ComposeRuntime::DockerCompose;
    }

    if probe("podman", &["compose", "version"]) {
        return ComposeRuntime::PodmanCompose;
    }

    ComposeRuntime::None
}

/// A compose manifest in a deployment directory
#[derive(Debug, Clone)]
pub struct ComposeProject {
    runtime: ComposeRuntime,
    dir: PathBuf,
    compose_file: String,
}

impl ComposeProject {
    pub fn new(runtime: ComposeRuntime, dir: impl Into<PathBuf>, compose_file: &str) -> Self {
        Self {
            runtime,
            dir: dir.into(),
            compose_file: compose_file.to_string(),
        }
    }

    pub fn runtime(&self) -> ComposeRuntime {
        self.runtime
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The full argument vector for a compose subcommand
    pub fn argv(&self, args: &[&str]) -> Vec<String> {
        let mut argv: Vec<&str> = self.runtime.base_args().to_vec();
        argv.extend(["-f", self.compose_file.as_str()]);
        argv.extend_from_slice(args);
        argv.into_iter().map(str::to_string).collect()
    }

    fn command(&self, args: &[&str]) -> ContainerResult<Command> {
        if !self.runtime.is_available() {
            return Err(ContainerError::NoRuntimeAvailable);
        }
        let manifest = self.dir.join(&self.compose_file);
        if !manifest.exists() {
            return Err(ContainerError::ManifestMissing {
                path: manifest.display().to_string(),
            });
        }

        let mut cmd = Command::new(self.runtime.program());
        cmd.args(self.argv(args)).current_dir(&self.dir);
        Ok(cmd)
    }

    fn describe(&self, args: &[&str]) -> String {
        std::iter::once(self.runtime.program().to_string())
            .chain(self.argv(args))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn run_captured(&self, args: &[&str]) -> ContainerResult<Output> {
        debug!("Running {}", self.describe(args));
        let output = self.command(args)?.output()?;
        if !output.status.success() {
            return Err(ContainerError::CommandFailed {
                command: self.describe(args),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Pull images as needed and start the service detached
    pub fn up(&self) -> ContainerResult<()> {
        self.run_captured(&["up", "-d"])?;
        Ok(())
    }

    pub fn down(&self) -> ContainerResult<()> {
        self.run_captured(&["down"])?;
        Ok(())
    }

    /// Service state as reported by `compose ps`
    pub fn ps(&self) -> ContainerResult<String> {
        let output = self.run_captured(&["ps"])?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Stream logs straight to the terminal
    pub fn logs(&self, follow: bool, tail: Option<usize>) -> ContainerResult<()> {
        let tail = tail.map(|n| n.to_string());
        let mut args = vec!["logs"];
        if follow {
            args.push("--follow");
        }
        if let Some(tail) = &tail {
            args.extend(["--tail", tail.as_str()]);
        }

        let status = self
            .command(&args)?
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()?;

        if !status.success() {
            return Err(ContainerError::CommandFailed {
                command: self.describe(&args),
                stderr: format!("exited with {}", status),
            });
        }
        Ok(())
    }
}

/// Poll `health_url` until it answers 200 or `timeout_duration` elapses
pub async fn wait_for_health(health_url: &str, timeout_duration: Duration) -> ContainerResult<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| ContainerError::HealthCheckFailed {
            reason: format!("Failed to build HTTP client: {}", e),
        })?;
    let start_time = std::time::Instant::now();

    loop {
        match client.get(health_url).send().await {
            Ok(response) if response.status().is_success() => return Ok(()),
            Ok(response) => debug!("Health check returned {}", response.status()),
            Err(e) => debug!("Health check not ready: {}", e),
        }

        if start_time.elapsed() >= timeout_duration {
            return Err(ContainerError::HealthCheckFailed {
                reason: format!(
                    "{} did not respond after {}s",
                    health_url,
                    timeout_duration.as_secs()
                ),
            });
        }
        sleep(Duration::from_secs(2)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_compose_runtime_program() {
        assert_eq!(ComposeRuntime::DockerPlugin.program(), "docker");
        assert_eq!(ComposeRuntime::DockerCompose.program(), "docker-compose");
        assert_eq!(ComposeRuntime::PodmanCompose.program(), "podman");
        assert_eq!(ComposeRuntime::None.program(), "");
    }

    #[test]
    fn test_compose_runtime_availability() {
        assert!(ComposeRuntime::DockerPlugin.is_available());
        assert!(ComposeRuntime::DockerCompose.is_available());
        assert!(ComposeRuntime::PodmanCompose.is_available());
        assert!(!ComposeRuntime::None.is_available());
    }

    #[test]
    fn test_compose_runtime_display() {
        assert_eq!(ComposeRuntime::DockerPlugin.to_string(), "docker compose");
        assert_eq!(ComposeRuntime::None.to_string(), "none");
    }

    #[test]
    fn test_detect_runtime() {
        // Whatever is installed, detection must settle on one variant
        match detect_runtime() {
            ComposeRuntime::DockerPlugin
            | ComposeRuntime::DockerCompose
            | ComposeRuntime::PodmanCompose
            | ComposeRuntime::None => {}
        }
    }

    #[test]
    fn test_argv() {
        let project = ComposeProject::new(ComposeRuntime::DockerPlugin, "/srv", "docker-compose.yml");
        assert_eq!(
            project.argv(&["up", "-d"]),
            vec!["compose", "-f", "docker-compose.yml", "up", "-d"]
        );

        let project = ComposeProject::new(ComposeRuntime::DockerCompose, "/srv", "stack.yml");
        assert_eq!(project.argv(&["down"]), vec!["-f", "stack.yml", "down"]);
        assert_eq!(project.describe(&["down"]), "docker-compose -f stack.yml down");
    }

    #[test]
    fn test_no_runtime() {
        let dir = TempDir::new().unwrap();
        let project = ComposeProject::new(ComposeRuntime::None, dir.path(), "docker-compose.yml");
        assert!(matches!(project.up(), Err(ContainerError::NoRuntimeAvailable)));
    }

    #[test]
    fn test_manifest_missing() {
        let dir = TempDir::new().unwrap();
        let project =
            ComposeProject::new(ComposeRuntime::DockerPlugin, dir.path(), "docker-compose.yml");
        assert!(matches!(
            project.down(),
            Err(ContainerError::ManifestMissing { .. })
        ));
    }

    #[test]
    fn test_container_error_display() {
        let error = ContainerError::NoRuntimeAvailable;
        assert!(error.to_string().contains("No container runtime available"));

        let error = ContainerError::CommandFailed {
            command: "docker compose up -d".to_string(),
            stderr: "port is already allocated".to_string(),
        };
        assert!(error.to_string().contains("docker compose up -d"));
        assert!(error.to_string().contains("already allocated"));
    }

    #[tokio::test]
    async fn test_wait_for_health_times_out() {
        // Nothing listens on the discard port
        let result = wait_for_health("http://127.0.0.1:9/healthz", Duration::from_millis(10)).await;
        assert!(matches!(
            result,
            Err(ContainerError::HealthCheckFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_wait_for_health_returns_on_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/healthz")
            .with_status(200)
            .with_body("{\"status\":\"ok\"}")
            .create_async()
            .await;

        let url = format!("{}/healthz", server.url());
        wait_for_health(&url, Duration::from_secs(5)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_wait_for_health_rejects_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/healthz")
            .with_status(503)
            .create_async()
            .await;

        let url = format!("{}/healthz", server.url());
        let result = wait_for_health(&url, Duration::from_millis(10)).await;
        assert!(matches!(
            result,
            Err(ContainerError::HealthCheckFailed { .. })
        ));
    }
}
