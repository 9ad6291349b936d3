//! Install command implementation

use super::{RunOptions, connect, success};
use crate::config::InstallConfig;
use anyhow::Result;

/// Install the platform described by `config`
pub fn install(config: &InstallConfig, options: &RunOptions) -> Result<()> {
    let session = connect(config, options)?;
    let installer = session.installer(config)?;

    crate::log_info!(
        "Installing storage platform {} into namespace {}",
        installer.version(),
        config.namespaces.operator
    );
    installer.install()?;

    if config.dry_run.is_some() {
        success("Manifests written (dry run)");
    } else {
        success(&format!("Storage platform {} installed", installer.version()));
    }
    Ok(())
}
