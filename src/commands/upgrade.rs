//! Upgrade command implementation

use super::{RunOptions, connect, success};
use crate::config::InstallConfig;
use crate::install::UpgradeOutcome;
use anyhow::Result;

/// Replace the installed platform with `target`.
///
/// The installed side shares `target`'s settings but its version is read from
/// the running operator.
pub fn upgrade(target: &InstallConfig, options: &RunOptions) -> Result<()> {
    let installed = target.with_version(crate::config::defaults::LATEST);
    let session = connect(target, options)?;

    let prompt = "Upgrading uninstalls the running platform before installing the new version. Continue?";
    if target.dry_run.is_none() && !options.confirm(prompt)? {
        crate::log_warn!("Upgrade cancelled");
        return Ok(());
    }

    match session.upgrade(&installed, target)? {
        UpgradeOutcome::AlreadyCurrent(version) => {
            success(&format!("Storage platform is already at {version}"));
        }
        UpgradeOutcome::Upgraded { from, to, migrated } => {
            if migrated > 0 {
                crate::log_info!("Carried {} objects across the upgrade", migrated);
            }
            success(&format!("Storage platform upgraded {from} → {to}"));
        }
    }
    Ok(())
}
