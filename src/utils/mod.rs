//! Utility modules for storage-deploy

pub mod container;
pub mod dryrun;
pub mod errors;
pub mod logger;
pub mod prereqs;
pub mod progress;
pub mod prompt;

// Re-export commonly used items
pub use container::ContainerRuntime;
pub use errors::{InstallerError, Remediation};
pub use logger::{log_error, log_info, log_warn};
pub use prereqs::{CommonPrereqs, Prerequisite};
pub use prompt::confirm_destructive;
