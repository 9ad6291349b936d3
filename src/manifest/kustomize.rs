//! Overlay builds over a component subtree

use crate::config::Component;
use crate::manifest::vfs::VirtualFs;
use crate::utils::errors::{InstallerError, Result};
use std::path::Path;
use std::process::Command;

/// Renders a component's overlay into the resource YAML to apply
pub trait OverlayBuilder {
    fn build(&self, fs: &VirtualFs, component: Component) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tool {
    Kustomize,
    /// `kubectl kustomize`, embedded in kubectl
    Kubectl,
}

/// Runs `kustomize build` over the subtree written to a temp directory
#[derive(Debug, Clone, Copy)]
pub struct KustomizeBuilder {
    tool: Tool,
}

impl KustomizeBuilder {
    /// Prefer a standalone kustomize, falling back to kubectl's
    pub fn detect() -> Result<Self> {
        if which::which("kustomize").is_ok() {
            return Ok(Self {
                tool: Tool::Kustomize,
            });
        }
        if which::which("kubectl").is_ok() {
            return Ok(Self { tool: Tool::Kubectl });
        }
        Err(InstallerError::Command {
            program: "kustomize".to_string(),
            stderr: "neither kustomize nor kubectl found in PATH".to_string(),
        })
    }

    fn command(&self, dir: &Path) -> Command {
        let mut cmd = match self.tool {
            Tool::Kustomize => {
                let mut cmd = Command::new("kustomize");
                cmd.arg("build");
                cmd
            }
            Tool::Kubectl => {
                let mut cmd = Command::new("kubectl");
                cmd.arg("kustomize");
                cmd
            }
        };
        cmd.arg(dir);
        cmd
    }
}

impl OverlayBuilder for KustomizeBuilder {
    fn build(&self, fs: &VirtualFs, component: Component) -> Result<String> {
        let temp_dir = tempfile::tempdir()?;
        let dir = fs.write_component_to(temp_dir.path(), component)?;

        tracing::debug!(%component, dir = %dir.display(), "building overlay");
        let output = self.command(&dir).output()?;

        if !output.status.success() {
            return Err(InstallerError::Command {
                program: format!("kustomize build {component}"),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8(output.stdout)
            .map_err(|e| InstallerError::parse(format!("{component} overlay output"), e))
    }
}
