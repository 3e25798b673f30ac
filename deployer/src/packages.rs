//! System package provisioning and `PATH` lookups.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("Unsupported host: {reason}. Install {packages} manually and rerun with --skip-packages.")]
    Unsupported { reason: String, packages: String },

    #[error("Required program '{name}' was not found on PATH")]
    MissingBinary { name: String },

    #[error("Command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PackageResult<T> = Result<T, PackageError>;

/// Find an executable the way a shell would. Names containing a `/` are
/// taken as paths.
pub fn find_binary(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

pub fn ensure_binary(name: &str) -> PackageResult<PathBuf> {
    which::which(name).map_err(|e| {
        debug!("Lookup of {} failed: {}", name, e);
        PackageError::MissingBinary {
            name: name.to_string(),
        }
    })
}

/// Whether the current process runs as root
pub fn is_root() -> bool {
    Command::new("id")
        .arg("-u")
        .output()
        .map(|out| out.status.success() && String::from_utf8_lossy(&out.stdout).trim() == "0")
        .unwrap_or(false)
}

/// Argument vector for a command that needs root, going through `sudo`
/// when not already privileged.
pub fn privileged_argv(use_sudo: bool, program: &str, args: &[&str]) -> Vec<String> {
    let mut argv = Vec::with_capacity(args.len() + 2);
    if use_sudo {
        argv.push("sudo".to_string());
    }
    argv.push(program.to_string());
    argv.extend(args.iter().map(|a| a.to_string()));
    argv
}

/// Installs system packages through `apt-get`
#[derive(Debug, Clone)]
pub struct Provisioner {
    use_sudo: bool,
}

impl Provisioner {
    /// Detect an apt-based host. Other package managers are not handled.
    pub fn detect(packages: &[String]) -> PackageResult<Self> {
        if find_binary("apt-get").is_none() || find_binary("dpkg").is_none() {
            return Err(PackageError::Unsupported {
                reason: "apt-get was not found".to_string(),
                packages: packages.join(", "),
            });
        }
        Ok(Self {
            use_sudo: !is_root(),
        })
    }

    pub fn uses_sudo(&self) -> bool {
        self.use_sudo
    }

    pub fn is_installed(package: &str) -> bool {
        Command::new("dpkg")
            .args(["-s", package])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }

    pub fn missing(packages: &[String]) -> Vec<String> {
        packages
            .iter()
            .filter(|p| !Self::is_installed(p))
            .cloned()
            .collect()
    }

    fn run(&self, program: &str, args: &[&str]) -> PackageResult<()> {
        let argv = privileged_argv(self.use_sudo, program, args);
        let command = argv.join(" ");
        debug!("Running {}", command);

        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .env("DEBIAN_FRONTEND", "noninteractive")
            .stdin(Stdio::inherit())
            .output()?;

        if !output.status.success() {
            return Err(PackageError::CommandFailed {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    /// Install whatever in `packages` is missing; returns what was installed
    pub fn provision(&self, packages: &[String]) -> PackageResult<Vec<String>> {
        let missing = Self::missing(packages);
        if missing.is_empty() {
            info!("All {} packages already installed", packages.len());
            return Ok(missing);
        }

        println!("📦 Installing packages: {}", missing.join(" "));
        self.run("apt-get", &["update", "-q"])?;

        let mut args = vec!["install", "-y", "-q"];
        args.extend(missing.iter().map(String::as_str));
        self.run("apt-get", &args)?;

        info!("Installed {:?}", missing);
        Ok(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_privileged_argv() {
        assert_eq!(
            privileged_argv(true, "apt-get", &["install", "-y", "curl"]),
            vec!["sudo", "apt-get", "install", "-y", "curl"]
        );
        assert_eq!(
            privileged_argv(false, "apt-get", &["update"]),
            vec!["apt-get", "update"]
        );
    }

    #[test]
    fn test_find_binary_on_path() {
        // `sh` exists on every host these tests run on
        assert!(find_binary("sh").is_some());
        assert!(find_binary("definitely-not-a-real-binary-4242").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_find_binary_by_path() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let script = dir.path().join("agent");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();

        let name = script.display().to_string();
        assert!(find_binary(&name).is_none());

        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(find_binary(&name), Some(script));
    }

    #[test]
    fn test_ensure_binary_resolves_absolute_path() {
        let path = ensure_binary("sh").unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("sh"));
    }

    #[test]
    fn test_ensure_binary_missing() {
        let result = ensure_binary("definitely-not-a-real-binary-4242");
        assert!(matches!(result, Err(PackageError::MissingBinary { .. })));
    }

    #[test]
    fn test_unsupported_error_lists_packages() {
        let error = PackageError::Unsupported {
            reason: "apt-get was not found".to_string(),
            packages: "docker.io, unzip".to_string(),
        };
        assert!(error.to_string().contains("docker.io, unzip"));
        assert!(error.to_string().contains("--skip-packages"));
    }
}
