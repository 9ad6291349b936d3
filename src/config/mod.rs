//! Configuration: file settings, resolved operation config and fixed names

pub mod defaults;
pub mod install;
pub mod settings;

pub use install::{
    Component, Credentials, InstallConfig, InstallerMeta, ManifestSource, PortalCredentials,
    Timeouts, WaitPolicy,
};
pub use settings::Settings;
