//! Phase ordering and the per-component apply and delete flows

use super::{Installer, etcd};
use crate::config::defaults;
use crate::config::{Component, InstallConfig};
use crate::k8s::wait;
use crate::manifest::VirtualFs;
use crate::manifest::patch;
use anyhow::Context;
use std::fmt;
use std::path::Path;

/// One step of an install or uninstall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Apply(Component),
    AwaitReady(Component),
    ValidateEndpoints,
    Delete(Component),
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Apply(c) => write!(f, "applying {c}"),
            Phase::AwaitReady(c) => write!(f, "waiting for {c} to become ready"),
            Phase::ValidateEndpoints => f.write_str("validating etcd endpoints"),
            Phase::Delete(c) => write!(f, "deleting {c}"),
        }
    }
}

/// Install order: etcd (or endpoint validation), operator, cluster, portal
pub fn install_phases(config: &InstallConfig) -> Vec<Phase> {
    let mut phases = Vec::new();

    if config.etcd_in_scope() {
        if config.includes(Component::EtcdOperator) {
            phases.push(Phase::Apply(Component::EtcdOperator));
            phases.push(Phase::AwaitReady(Component::EtcdOperator));
        }
        if config.includes(Component::EtcdCluster) {
            phases.push(Phase::Apply(Component::EtcdCluster));
        }
    } else if config.etcd.validate {
        phases.push(Phase::ValidateEndpoints);
    }

    if config.includes(Component::Operator) {
        phases.push(Phase::Apply(Component::Operator));
        phases.push(Phase::AwaitReady(Component::Operator));
    }
    if config.includes(Component::Cluster) {
        phases.push(Phase::Apply(Component::Cluster));
    }
    if config.includes(Component::PortalManager) {
        phases.push(Phase::Apply(Component::PortalManager));
    }
    phases
}

/// Uninstall order is the reverse of install
pub fn uninstall_phases(config: &InstallConfig) -> Vec<Phase> {
    let mut phases = Vec::new();

    // Credentials are not needed to remove the portal manager
    if config.options.portal_manager {
        phases.push(Phase::Delete(Component::PortalManager));
    }
    for component in [
        Component::Cluster,
        Component::Operator,
        Component::EtcdCluster,
        Component::EtcdOperator,
    ] {
        if config.includes(component) {
            phases.push(Phase::Delete(component));
        }
    }
    phases
}

/// Components touched by `phases`, first appearance first
pub fn components(phases: &[Phase]) -> Vec<Component> {
    let mut seen = Vec::new();
    for phase in phases {
        let component = match phase {
            Phase::Apply(c) | Phase::Delete(c) => *c,
            _ => continue,
        };
        if !seen.contains(&component) {
            seen.push(component);
        }
    }
    seen
}

fn is_operator(component: Component) -> bool {
    matches!(component, Component::Operator | Component::EtcdOperator)
}

impl Installer<'_> {
    pub(super) fn run_phase(&self, phase: &Phase, fs: &VirtualFs) -> anyhow::Result<()> {
        match *phase {
            Phase::Apply(component) => self.apply_component(fs, component),
            Phase::Delete(component) => self.delete_component(fs, component),
            Phase::AwaitReady(component) => self.await_ready(component),
            Phase::ValidateEndpoints => {
                if self.session.is_dry_run() {
                    crate::log_info!("[DRY RUN] skipping etcd endpoint validation");
                    return Ok(());
                }
                etcd::validate(self.session, &self.config)
            }
        }
    }

    /// Build the overlay and either dump it or apply it, namespaces first
    pub(crate) fn apply_component(&self, fs: &VirtualFs, component: Component) -> anyhow::Result<()> {
        let built = self
            .session
            .overlay
            .build(fs, component)
            .context("building overlay")?;

        if self.dump_if_dry_run(component, &built)? {
            return Ok(());
        }

        let (rest, namespaces) = patch::omit_and_return_by_kind(&built, "Namespace")?;
        let cluster = self.session.cluster();

        for document in &namespaces {
            let name = patch::get_field(document, &["metadata", "name"])?;
            cluster
                .apply("", document, false)
                .with_context(|| format!("creating namespace {name}"))?;
            self.session.wait(
                &format!("namespace {name}"),
                self.config.timeouts.namespace,
                wait::namespace_exists(cluster, &name),
            )?;
        }

        if !rest.trim().is_empty() {
            cluster.apply("", &rest, is_operator(component))?;
        }
        Ok(())
    }

    /// Delete a component's objects, then drain and remove its namespaces
    pub(crate) fn delete_component(&self, fs: &VirtualFs, component: Component) -> anyhow::Result<()> {
        let built = self
            .session
            .overlay
            .build(fs, component)
            .context("building overlay")?;

        if self.dump_if_dry_run(component, &built)? {
            return Ok(());
        }

        if let Some(backup) = &self.session.backup {
            if let Err(e) = backup.write(component.file_name(), built.as_bytes()) {
                crate::log_warn!("Could not back up {}: {}", component, e);
            }
        }

        let (rest, namespaces) = patch::omit_and_return_by_kind(&built, "Namespace")?;
        let cluster = self.session.cluster();

        if !rest.trim().is_empty() {
            cluster.delete("", &rest, false)?;
        }

        if self.config.skip_namespace_deletion {
            return Ok(());
        }

        for document in &namespaces {
            let name = patch::get_field(document, &["metadata", "name"])?;
            self.session.wait(
                &format!("pods in {name} to terminate"),
                self.config.timeouts.drain,
                wait::no_pods(cluster, &name),
            )?;
            cluster
                .delete("", document, false)
                .with_context(|| format!("deleting namespace {name}"))?;
            self.session.wait(
                &format!("namespace {name} to be removed"),
                self.config.timeouts.namespace,
                wait::namespace_absent(cluster, &name),
            )?;
        }
        Ok(())
    }

    fn await_ready(&self, component: Component) -> anyhow::Result<()> {
        if self.session.is_dry_run() {
            return Ok(());
        }

        let (namespace, name) = match component {
            Component::Operator => (self.config.namespaces.operator.as_str(), self.operator_deployment()),
            Component::EtcdOperator => (
                self.config.namespaces.etcd.as_str(),
                defaults::ETCD_OPERATOR_DEPLOYMENT,
            ),
            _ => return Ok(()),
        };

        self.session.wait(
            &format!("deployment {namespace}/{name}"),
            self.config.timeouts.deployment,
            wait::deployment_ready(self.session.cluster(), namespace, name),
        )?;
        Ok(())
    }

    /// Write the built overlay to the dry-run directory. True if it was written.
    pub(super) fn dump_if_dry_run(&self, component: Component, built: &str) -> anyhow::Result<bool> {
        let Some(dump) = &self.session.dump else {
            return Ok(false);
        };
        let relative = Path::new(component.group())
            .join(component.name())
            .join(component.file_name());
        dump.write(&relative, built.as_bytes())?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortalCredentials;

    fn portal() -> PortalCredentials {
        PortalCredentials {
            client_id: "id".into(),
            secret: "s".into(),
            api_url: "https://portal".into(),
            tenant_id: "t".into(),
        }
    }

    #[test]
    fn test_default_install_order() {
        let phases = install_phases(&InstallConfig::default());
        assert_eq!(
            phases,
            vec![
                Phase::Apply(Component::EtcdOperator),
                Phase::AwaitReady(Component::EtcdOperator),
                Phase::Apply(Component::EtcdCluster),
                Phase::Apply(Component::Operator),
                Phase::AwaitReady(Component::Operator),
                Phase::Apply(Component::Cluster),
            ]
        );
    }

    #[test]
    fn test_external_etcd_is_validated_first() {
        let mut config = InstallConfig::default();
        config.etcd.skip = true;
        let phases = install_phases(&config);
        assert_eq!(phases[0], Phase::ValidateEndpoints);
        assert!(!components(&phases).contains(&Component::EtcdCluster));

        config.etcd.validate = false;
        assert!(!install_phases(&config).contains(&Phase::ValidateEndpoints));
    }

    #[test]
    fn test_portal_is_last_when_included() {
        let mut config = InstallConfig::default();
        config.options.portal_manager = true;
        config.portal = Some(portal());
        let phases = install_phases(&config);
        assert_eq!(phases.last(), Some(&Phase::Apply(Component::PortalManager)));
    }

    #[test]
    fn test_uninstall_order_reverses_install() {
        let mut config = InstallConfig::default();
        config.options.portal_manager = true;
        assert_eq!(
            components(&uninstall_phases(&config)),
            vec![
                Component::PortalManager,
                Component::Cluster,
                Component::Operator,
                Component::EtcdCluster,
                Component::EtcdOperator,
            ]
        );
    }

    #[test]
    fn test_components_dedups_in_order() {
        let phases = [
            Phase::Apply(Component::Operator),
            Phase::AwaitReady(Component::Operator),
            Phase::ValidateEndpoints,
            Phase::Apply(Component::Cluster),
            Phase::Delete(Component::Operator),
        ];
        assert_eq!(components(&phases), vec![Component::Operator, Component::Cluster]);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Apply(Component::Cluster).to_string(), "applying cluster");
        assert_eq!(
            Phase::ValidateEndpoints.to_string(),
            "validating etcd endpoints"
        );
    }
}
