//! Portal manager command implementations

use super::{RunOptions, connect, success};
use crate::config::InstallConfig;
use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalAction {
    Enable,
    Disable,
    Install,
    Uninstall,
}

/// Run a portal manager action against the installed platform
pub fn run(action: PortalAction, config: &InstallConfig, options: &RunOptions) -> Result<()> {
    let session = connect(config, options)?;
    let installer = session.installed(config)?;

    match action {
        PortalAction::Enable => {
            installer.enable_portal_manager(true)?;
            success("Portal manager enabled");
        }
        PortalAction::Disable => {
            installer.enable_portal_manager(false)?;
            success("Portal manager disabled");
        }
        PortalAction::Install => {
            installer.install_portal_manager()?;
            success("Portal manager installed");
        }
        PortalAction::Uninstall => {
            if config.dry_run.is_none() && !options.confirm("Uninstall the portal manager?")? {
                crate::log_warn!("Portal manager uninstall cancelled");
                return Ok(());
            }
            installer.uninstall_portal_manager()?;
            success("Portal manager uninstalled");
        }
    }
    Ok(())
}
