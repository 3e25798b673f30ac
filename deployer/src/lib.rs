pub mod container;
pub mod lifecycle;
pub mod packages;
pub mod settings;
pub mod tunnel;
pub mod unpack;

pub use container::{
    detect_runtime, wait_for_health, ComposeProject, ComposeRuntime, ContainerError,
};
pub use lifecycle::{
    ArchiveStep, DeployError, DeployResult, Deployment, RenderedFiles, SetupOptions, SetupReport,
    StartReport, StatusReport,
};
pub use packages::{ensure_binary, find_binary, PackageError, Provisioner};
pub use settings::{
    ArchiveSettings, FileSettings, PackageSettings, ServiceSettings, Settings, SettingsError,
    TunnelSettings, DEFAULT_CONFIG_FILE,
};
pub use tunnel::{Tunnel, TunnelError};
pub use unpack::{ArchiveFormat, UnpackError};
