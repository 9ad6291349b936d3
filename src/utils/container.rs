//! Container runtime detection and image file extraction (Docker/Podman)

use crate::utils::errors::{InstallerError, Result};
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRuntime {
    Docker,
    Podman,
}

impl ContainerRuntime {
    /// Detect which container runtime is available
    pub fn detect() -> Result<Self> {
        if which::which("docker").is_ok() {
            crate::log_info!("Using container runtime: docker");
            return Ok(ContainerRuntime::Docker);
        }

        if which::which("podman").is_ok() {
            crate::log_info!("Using container runtime: podman");
            return Ok(ContainerRuntime::Podman);
        }

        Err(InstallerError::Command {
            program: "docker".to_string(),
            stderr: "neither docker nor podman found; one is required to read manifests from images"
                .to_string(),
        })
    }

    /// Get the command name for this runtime
    pub fn command(&self) -> &str {
        match self {
            ContainerRuntime::Docker => "docker",
            ContainerRuntime::Podman => "podman",
        }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(self.command()).args(args).output()?;

        if !output.status.success() {
            return Err(InstallerError::Command {
                program: format!("{} {}", self.command(), args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Pull an image
    pub fn pull(&self, image: &str) -> Result<()> {
        crate::log_info!("Pulling image: {}", image);
        self.run(&["pull", image]).map(|_| ())
    }

    /// Read `file_name` from the root of `image`'s filesystem.
    ///
    /// Returns `Ok(None)` when the image is fine but does not carry the file.
    pub fn read_file_from_image(&self, image: &str, file_name: &str) -> Result<Option<Vec<u8>>> {
        self.pull(image)?;

        // The container is never started; `create` only materializes its filesystem.
        // Images built FROM scratch have no default command, so give it a dummy one.
        let container_id = self.run(&["create", image, "none"])?;

        let result = (|| -> Result<Option<Vec<u8>>> {
            let dir = tempfile::tempdir()?;
            let dest = dir.path().join(file_name);
            let source = format!("{}:/{}", container_id, file_name.trim_start_matches('/'));
            let dest_arg = dest.to_string_lossy().to_string();

            match self.run(&["cp", &source, &dest_arg]) {
                Ok(_) => Ok(Some(std::fs::read(&dest)?)),
                Err(e) => {
                    tracing::debug!(image, file_name, error = %e, "file not present in image");
                    Ok(None)
                }
            }
        })();

        if let Err(e) = self.run(&["rm", &container_id]) {
            crate::log_warn!("Failed to remove container {}: {}", container_id, e);
        }

        result
    }
}

impl std::fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.command())
    }
}
