pub mod config;
pub mod drive;
pub mod file_id;
pub mod provider;
pub mod types;

pub use config::DriveConfig;
pub use drive::GoogleDriveSource;
pub use file_id::FileId;
pub use provider::{ArchiveError, ArchiveResult, ArchiveSource};
pub use types::DownloadOutcome;

pub mod prelude {
    pub use crate::config::*;
    pub use crate::drive::*;
    pub use crate::file_id::*;
    pub use crate::provider::*;
    pub use crate::types::*;
}
