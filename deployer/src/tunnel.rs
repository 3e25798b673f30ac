//! The tunnel agent that publishes the local service on its static domain.
//!
//! The agent runs detached from the CLI. Its pid is kept in
//! `<state_dir>/tunnel.pid` so later `stop` and `status` invocations can find
//! it, and its output is appended to `<state_dir>/tunnel.log`.

use crate::packages::{ensure_binary, PackageError};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const PID_FILE: &str = "tunnel.pid";
const LOG_FILE: &str = "tunnel.log";
const STARTUP_GRACE: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error(transparent)]
    Binary(#[from] PackageError),

    #[error("Tunnel agent is already running (pid {pid}). Run `flowdeploy stop` first.")]
    AlreadyRunning { pid: u32 },

    #[error("Failed to configure the tunnel auth token: {reason}")]
    AuthTokenFailed { reason: String },

    #[error("Tunnel agent exited right after starting ({status}). Last output:\n{log_tail}")]
    ExitedEarly { status: String, log_tail: String },

    #[error("Failed to stop tunnel agent (pid {pid}): {reason}")]
    StopFailed { pid: u32, reason: String },

    #[error("Corrupt pid file {path}")]
    CorruptPidFile { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TunnelResult<T> = Result<T, TunnelError>;

#[derive(Debug, Clone)]
pub struct Tunnel {
    binary: String,
    domain: String,
    port: u16,
    state_dir: PathBuf,
}

impl Tunnel {
    pub fn new(
        binary: impl Into<String>,
        domain: impl Into<String>,
        port: u16,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            binary: binary.into(),
            domain: domain.into(),
            port,
            state_dir: state_dir.into(),
        }
    }

    pub fn public_url(&self) -> String {
        format!("https://{}", self.domain)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.state_dir.join(PID_FILE)
    }

    pub fn log_file(&self) -> PathBuf {
        self.state_dir.join(LOG_FILE)
    }

    /// Agent arguments for an HTTP tunnel on the reserved domain
    pub fn args(&self) -> Vec<String> {
        vec![
            "http".to_string(),
            format!("--domain={}", self.domain),
            self.port.to_string(),
            "--log=stdout".to_string(),
        ]
    }

    /// Store the account token in the agent's own config file
    pub fn configure_authtoken(&self, token: &str) -> TunnelResult<()> {
        let binary = ensure_binary(&self.binary)?;
        let output = Command::new(binary)
            .args(["config", "add-authtoken", token])
            .output()?;

        if !output.status.success() {
            return Err(TunnelError::AuthTokenFailed {
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!("Tunnel auth token configured");
        Ok(())
    }

    pub fn read_pid(&self) -> TunnelResult<Option<u32>> {
        let path = self.pid_file();
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        contents
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| TunnelError::CorruptPidFile {
                path: path.display().to_string(),
            })
    }

    /// Pid of the agent if one is recorded and still alive
    pub fn running_pid(&self) -> TunnelResult<Option<u32>> {
        Ok(self.read_pid()?.filter(|pid| process_alive(*pid)))
    }

    pub fn is_running(&self) -> bool {
        matches!(self.running_pid(), Ok(Some(_)))
    }

    /// Launch the agent detached and record its pid
    pub async fn start(&self) -> TunnelResult<u32> {
        if let Some(pid) = self.running_pid()? {
            return Err(TunnelError::AlreadyRunning { pid });
        }
        let binary = ensure_binary(&self.binary)?;
        fs::create_dir_all(&self.state_dir)?;

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_file())?;

        let mut cmd = Command::new(binary);
        cmd.args(self.args())
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log);
        detach(&mut cmd);

        let mut child = cmd.spawn()?;
        let pid = child.id();
        debug!("Tunnel agent spawned with pid {}", pid);

        sleep(STARTUP_GRACE).await;
        if let Some(status) = child.try_wait()? {
            return Err(TunnelError::ExitedEarly {
                status: status.to_string(),
                log_tail: tail_lines(&self.log_file(), 10),
            });
        }

        fs::write(self.pid_file(), format!("{}\n", pid))?;
        info!("Tunnel agent running (pid {}) for {}", pid, self.public_url());
        Ok(pid)
    }

    /// Terminate the agent. Returns `false` when nothing was running.
    pub fn stop(&self) -> TunnelResult<bool> {
        let Some(pid) = self.read_pid()? else {
            return Ok(false);
        };

        let was_alive = process_alive(pid);
        if was_alive {
            let output = Command::new("kill").arg(pid.to_string()).output()?;
            if !output.status.success() {
                return Err(TunnelError::StopFailed {
                    pid,
                    reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
            info!("Stopped tunnel agent (pid {})", pid);
        } else {
            warn!("Tunnel agent (pid {}) was no longer running", pid);
        }

        fs::remove_file(self.pid_file())?;
        Ok(was_alive)
    }
}

fn process_alive(pid: u32) -> bool {
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

// Own process group so a Ctrl-C aimed at the CLI does not reach the agent.
#[cfg(unix)]
fn detach(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn detach(_cmd: &mut Command) {}

fn tail_lines(path: &Path, n: usize) -> String {
    let contents = fs::read_to_string(path).unwrap_or_default();
    let lines: Vec<&str> = contents.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}
