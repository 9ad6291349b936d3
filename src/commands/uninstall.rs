//! Uninstall command implementation

use super::{RunOptions, connect, success};
use crate::config::InstallConfig;
use anyhow::Result;

/// Remove the installed platform
pub fn uninstall(config: &InstallConfig, options: &RunOptions) -> Result<()> {
    let session = connect(config, options)?;
    let installer = session.installed(config)?;

    let namespaces = if config.skip_namespace_deletion {
        "namespaces are kept"
    } else {
        "its namespaces are deleted"
    };
    let prompt = format!(
        "Uninstall storage platform {} from namespace {} ({namespaces})?",
        installer.version(),
        installer.config().namespaces.operator
    );
    if config.dry_run.is_none() && !options.confirm(&prompt)? {
        crate::log_warn!("Uninstall cancelled");
        return Ok(());
    }

    installer.uninstall()?;

    if let Some(dir) = session.backup_path() {
        crate::log_info!("Removed manifests saved to {}", dir.display());
    }
    success(&format!("Storage platform {} uninstalled", installer.version()));
    Ok(())
}
