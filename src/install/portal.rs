//! Portal manager lifecycle on an already installed platform

use super::{Installer, Mode};
use crate::config::Component;
use crate::config::defaults;
use crate::manifest::patch::{self, Patch};
use anyhow::Context;
use serde_yaml::Value;

impl Installer<'_> {
    /// Flip `spec.enablePortalManager` on the cluster resource and re-apply
    /// only that resource.
    pub fn enable_portal_manager(&self, enabled: bool) -> anyhow::Result<()> {
        let mut fs = self.build_tree(&[Component::Cluster], Mode::Install)?;
        let overlay = patch::add_patches(
            &fs.kustomization(Component::Cluster)?,
            defaults::CLUSTER_KIND,
            defaults::CLUSTER_NAME,
            &[Patch::add("/spec/enablePortalManager", Value::Bool(enabled))],
        )?;
        fs.set_kustomization(Component::Cluster, overlay);

        let built = self
            .session
            .overlay
            .build(&fs, Component::Cluster)
            .context("building cluster overlay")?;
        let resource = patch::get_manifest_by_kind(&built, defaults::CLUSTER_KIND)?
            .with_context(|| format!("no {} in the cluster manifest", defaults::CLUSTER_KIND))?;

        if self.dump_if_dry_run(Component::Cluster, &resource)? {
            return Ok(());
        }
        self.session.cluster().apply("", &resource, false)?;
        crate::log_info!(
            "Portal manager {}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    pub fn install_portal_manager(&self) -> anyhow::Result<()> {
        if self.config.portal.is_none() {
            anyhow::bail!("portal manager credentials are required (client id, secret, API URL and tenant id)");
        }

        let fs = self.build_tree(&[Component::PortalManager], Mode::Install)?;
        self.apply_component(&fs, Component::PortalManager)
            .context("applying portal manager")?;
        self.enable_portal_manager(true)
    }

    pub fn uninstall_portal_manager(&self) -> anyhow::Result<()> {
        self.enable_portal_manager(false)?;
        let fs = self.build_tree(&[Component::PortalManager], Mode::Uninstall)?;
        self.delete_component(&fs, Component::PortalManager)
            .context("deleting portal manager")
    }
}

#[cfg(test)]
mod tests {
    use crate::config::PortalCredentials;
    use crate::install::tests::{release_server, session, test_config};
    use crate::k8s::fake::FakeCluster;

    fn with_portal(version: &str) -> crate::config::InstallConfig {
        let mut config = test_config(version);
        config.etcd.skip = true;
        config.etcd.validate = false;
        config.etcd.endpoints = "10.0.0.1:2379".to_string();
        config.options.portal_manager = true;
        config.portal = Some(PortalCredentials {
            client_id: "client".into(),
            secret: "s3cret".into(),
            api_url: "https://portal.example.com".into(),
            tenant_id: "tenant".into(),
        });
        config
    }

    fn applied_objects(cluster: &FakeCluster) -> Vec<Vec<String>> {
        cluster
            .calls()
            .into_iter()
            .filter(|c| c.is_apply())
            .map(|c| c.objects().to_vec())
            .collect()
    }

    #[test]
    fn test_install_portal_then_enable_on_cluster() {
        let cluster = FakeCluster::new();
        let mut base = with_portal("2.5.0");
        base.options.portal_manager = false;
        let session = session(&cluster, release_server(&["2.5.0"]), &base);
        session.install(&base).unwrap();
        cluster.clear_calls();

        let config = with_portal("2.5.0");
        session.installed(&config).unwrap().install_portal_manager().unwrap();

        let applied = applied_objects(&cluster);
        assert_eq!(applied.len(), 2);
        assert!(applied[0].contains(&"Secret/storage-portal-client".to_string()));
        assert!(applied[0].contains(&"ConfigMap/storage-portal-config".to_string()));
        assert_eq!(applied[1], vec!["StorageCluster/storage-cluster".to_string()]);

        let secret = cluster.secret("storage-system", "storage-portal-client").unwrap();
        let data = secret.string_data.unwrap();
        assert_eq!(data.get("client-id").map(String::as_str), Some("client"));
    }

    #[test]
    fn test_portal_install_requires_credentials() {
        let cluster = FakeCluster::new();
        let mut config = with_portal("2.5.0");
        config.portal = None;
        let session = session(&cluster, release_server(&["2.5.0"]), &config);

        let installer = session.installer(&config).unwrap();
        assert!(installer.install_portal_manager().is_err());
        assert_eq!(cluster.mutations(), 0);
    }

    #[test]
    fn test_enable_flag_lands_on_cluster_resource() {
        let cluster = FakeCluster::new();
        let dir = tempfile::tempdir().unwrap();
        let mut config = with_portal("2.5.0");
        config.dry_run = Some(dir.path().to_path_buf());
        let session = session(&cluster, release_server(&["2.5.0"]), &config);
        let installer = session.installer(&config).unwrap();

        let written = dir.path().join("storage/cluster/storage-cluster.yaml");

        installer.enable_portal_manager(false).unwrap();
        let text = std::fs::read_to_string(&written).unwrap();
        assert!(text.contains("enablePortalManager: false"));
        assert!(!text.contains("kind: Secret"));

        installer.enable_portal_manager(true).unwrap();
        let text = std::fs::read_to_string(&written).unwrap();
        assert!(text.contains("enablePortalManager: true"));
        assert_eq!(cluster.mutations(), 0);
    }

    #[test]
    fn test_uninstall_portal_disables_first() {
        let cluster = FakeCluster::new();
        let config = with_portal("2.5.0");
        let session = session(&cluster, release_server(&["2.5.0"]), &config);
        session.install(&config).unwrap();
        assert!(cluster.secret("storage-system", "storage-portal-client").is_some());
        cluster.clear_calls();

        session.installed(&config).unwrap().uninstall_portal_manager().unwrap();

        let calls = cluster.calls();
        assert!(calls[0].is_apply());
        assert_eq!(calls[0].objects(), ["StorageCluster/storage-cluster".to_string()]);
        assert!(calls[1].is_delete());
        assert!(cluster.secret("storage-system", "storage-portal-client").is_none());
        assert!(cluster.has_deployment("storage-system", "storage-operator"));
    }
}
