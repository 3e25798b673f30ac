//! Unpacking the downloaded data archive into the service data directory.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info};

/// User and group the service runs as inside its container
pub const SERVICE_OWNER: &str = "1000:1000";

#[derive(Error, Debug)]
pub enum UnpackError {
    #[error("Unrecognized archive format for {path}. Expected .tar.gz, .tgz, .tar or .zip.")]
    UnknownFormat { path: String },

    #[error("Archive is empty: {path}")]
    Empty { path: String },

    #[error("Command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type UnpackResult<T> = Result<T, UnpackError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Tar,
    Zip,
}

impl ArchiveFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }

    /// Identify the format from the file's leading bytes
    pub fn sniff(path: &Path) -> std::io::Result<Option<Self>> {
        let mut header = Vec::with_capacity(262);
        fs::File::open(path)?.take(262).read_to_end(&mut header)?;

        if header.starts_with(&[0x1f, 0x8b]) {
            Ok(Some(Self::TarGz))
        } else if header.starts_with(b"PK\x03\x04") {
            Ok(Some(Self::Zip))
        } else if header.get(257..262) == Some(b"ustar".as_slice()) {
            Ok(Some(Self::Tar))
        } else {
            Ok(None)
        }
    }

    /// Use the name when it is conclusive, the content otherwise
    pub fn detect(name_hint: &str, path: &Path) -> UnpackResult<Self> {
        if let Some(format) = Self::from_name(name_hint) {
            return Ok(format);
        }
        Self::sniff(path)?.ok_or_else(|| UnpackError::UnknownFormat {
            path: name_hint.to_string(),
        })
    }

    fn extract_argv(&self, archive: &Path, into: &Path) -> (&'static str, Vec<String>) {
        let archive = archive.display().to_string();
        let into = into.display().to_string();
        match self {
            Self::TarGz => ("tar", vec!["-xzf".into(), archive, "-C".into(), into]),
            Self::Tar => ("tar", vec!["-xf".into(), archive, "-C".into(), into]),
            Self::Zip => ("unzip", vec!["-o".into(), "-q".into(), archive, "-d".into(), into]),
        }
    }
}

/// Extract `archive` into `data_dir`. An archive holding a single top-level
/// directory contributes that directory's contents. Returns the number of
/// entries placed in `data_dir`.
pub fn unpack(archive: &Path, format: ArchiveFormat, data_dir: &Path) -> UnpackResult<usize> {
    let staging = staging_dir(data_dir);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    let result = extract_and_move(archive, format, &staging, data_dir);
    let cleanup = fs::remove_dir_all(&staging);
    let moved = result?;
    cleanup?;

    info!("Unpacked {} entries into {}", moved, data_dir.display());
    Ok(moved)
}

fn extract_and_move(
    archive: &Path,
    format: ArchiveFormat,
    staging: &Path,
    data_dir: &Path,
) -> UnpackResult<usize> {
    let (program, args) = format.extract_argv(archive, staging);
    debug!("Running {} {}", program, args.join(" "));
    let output = Command::new(program).args(&args).output()?;
    if !output.status.success() {
        return Err(UnpackError::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let root = content_root(staging)?.ok_or_else(|| UnpackError::Empty {
        path: archive.display().to_string(),
    })?;

    fs::create_dir_all(data_dir)?;
    let mut moved = 0;
    for entry in fs::read_dir(&root)? {
        let entry = entry?;
        let target = data_dir.join(entry.file_name());
        remove_existing(&target)?;
        fs::rename(entry.path(), &target)?;
        moved += 1;
    }
    Ok(moved)
}

fn staging_dir(data_dir: &Path) -> PathBuf {
    let mut name = data_dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".unpack");
    data_dir.with_file_name(name)
}

// macOS zip tools add a resource-fork directory next to the real content.
fn is_noise(name: &str) -> bool {
    name == "__MACOSX" || name == ".DS_Store"
}

fn content_root(staging: &Path) -> UnpackResult<Option<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(staging)? {
        let entry = entry?;
        if is_noise(&entry.file_name().to_string_lossy()) {
            fs::remove_dir_all(entry.path()).or_else(|_| fs::remove_file(entry.path()))?;
            continue;
        }
        entries.push(entry);
    }

    match entries.as_slice() {
        [] => Ok(None),
        [single] if single.file_type()?.is_dir() => Ok(Some(single.path())),
        _ => Ok(Some(staging.to_path_buf())),
    }
}

fn remove_existing(target: &Path) -> std::io::Result<()> {
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(target),
        Ok(_) => fs::remove_file(target),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Hand `data_dir` to the container user. Uses non-interactive `sudo` when
/// not root, so it fails instead of prompting.
pub fn fix_ownership(data_dir: &Path, use_sudo: bool) -> UnpackResult<()> {
    let path = data_dir.display().to_string();
    let argv = crate::packages::privileged_argv(use_sudo, "chown", &["-R", SERVICE_OWNER, &path]);
    let mut cmd = Command::new(&argv[0]);
    if use_sudo {
        cmd.arg("-n");
    }
    cmd.args(&argv[1..]);

    let output = cmd.output()?;
    if !output.status.success() {
        return Err(UnpackError::CommandFailed {
            command: argv.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}
