//! Resolved configuration for one install, uninstall or upgrade

use crate::config::defaults;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Platform components the engine knows how to install
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Component {
    EtcdOperator,
    EtcdCluster,
    Operator,
    Cluster,
    PortalManager,
}

impl Component {
    pub const ALL: [Component; 5] = [
        Component::EtcdOperator,
        Component::EtcdCluster,
        Component::Operator,
        Component::Cluster,
        Component::PortalManager,
    ];

    /// Top-level directory of the component in the manifest tree
    pub fn group(self) -> &'static str {
        match self {
            Component::Operator | Component::Cluster => "storage",
            Component::EtcdOperator | Component::EtcdCluster => "etcd",
            Component::PortalManager => "portal",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Component::Operator => "operator",
            Component::Cluster => "cluster",
            Component::EtcdOperator => "etcd-operator",
            Component::EtcdCluster => "etcd-cluster",
            Component::PortalManager => "portal-manager",
        }
    }

    pub fn from_name(name: &str) -> Option<Component> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Name of the primary manifest, both in the tree and in release artifacts
    pub fn file_name(self) -> &'static str {
        match self {
            Component::Operator => "storage-operator.yaml",
            Component::Cluster => "storage-cluster.yaml",
            Component::EtcdOperator => "etcd-operator.yaml",
            Component::EtcdCluster => "etcd-cluster.yaml",
            Component::PortalManager => "portal-manager.yaml",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// User overrides for where a component's manifest comes from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestSource {
    pub path: Option<PathBuf>,
    pub url: Option<String>,
    pub image: Option<String>,
}

/// URL templates used when no override is given
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultUrls {
    pub storage: String,
    pub etcd: String,
    pub portal: String,
    pub releases_api: String,
}

impl Default for DefaultUrls {
    fn default() -> Self {
        Self {
            storage: defaults::STORAGE_URL_TEMPLATE.to_string(),
            etcd: defaults::ETCD_URL_TEMPLATE.to_string(),
            portal: defaults::PORTAL_URL_TEMPLATE.to_string(),
            releases_api: defaults::RELEASES_API.to_string(),
        }
    }
}

impl DefaultUrls {
    pub fn for_component(&self, component: Component, version: &str) -> String {
        let template = match component.group() {
            "etcd" => &self.etcd,
            "portal" => &self.portal,
            _ => &self.storage,
        };
        template
            .replace("{version}", version.trim_start_matches('v'))
            .replace("{file}", component.file_name())
    }
}

/// Which components take part in the operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallerOptions {
    pub operator: bool,
    pub cluster: bool,
    pub etcd_operator: bool,
    pub etcd_cluster: bool,
    pub portal_manager: bool,
}

impl Default for InstallerOptions {
    fn default() -> Self {
        Self {
            operator: true,
            cluster: true,
            etcd_operator: true,
            etcd_cluster: true,
            portal_manager: false,
        }
    }
}

impl InstallerOptions {
    pub fn includes(&self, component: Component) -> bool {
        match component {
            Component::Operator => self.operator,
            Component::Cluster => self.cluster,
            Component::EtcdOperator => self.etcd_operator,
            Component::EtcdCluster => self.etcd_cluster,
            Component::PortalManager => self.portal_manager,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespaces {
    pub operator: String,
    /// Defaults to the operator namespace when unset
    pub cluster: Option<String>,
    pub etcd: String,
}

impl Default for Namespaces {
    fn default() -> Self {
        Self {
            operator: defaults::OPERATOR_NAMESPACE.to_string(),
            cluster: None,
            etcd: defaults::ETCD_NAMESPACE.to_string(),
        }
    }
}

impl Namespaces {
    pub fn cluster(&self) -> &str {
        self.cluster.as_deref().unwrap_or(&self.operator)
    }

    /// True when the cluster has a namespace of its own to create and remove
    pub fn has_separate_cluster(&self) -> bool {
        self.cluster
            .as_deref()
            .is_some_and(|ns| !ns.is_empty() && ns != self.operator)
    }
}

/// Coordination-service (etcd) settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdOptions {
    /// Use external endpoints instead of installing etcd
    pub skip: bool,
    /// Comma-separated external endpoints
    pub endpoints: String,
    pub tls: bool,
    pub tls_secret_name: String,
    pub storage_class: Option<String>,
    /// Round-trip check external endpoints before installing
    pub validate: bool,
}

impl Default for EtcdOptions {
    fn default() -> Self {
        Self {
            skip: false,
            endpoints: String::new(),
            tls: false,
            tls_secret_name: defaults::ETCD_TLS_SECRET.to_string(),
            storage_class: None,
            validate: true,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct PortalCredentials {
    pub client_id: String,
    pub secret: String,
    pub api_url: String,
    pub tenant_id: String,
}

impl fmt::Debug for PortalCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortalCredentials")
            .field("client_id", &self.client_id)
            .field("secret", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

/// Platform API credentials carried from the old installation into the new one
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallerMeta {
    pub credentials: Option<Credentials>,
}

/// Fixed-interval polling bounds for one kind of wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub limit: Duration,
    pub interval: Duration,
}

impl WaitPolicy {
    pub const fn from_secs(limit: u64, interval: u64) -> Self {
        Self {
            limit: Duration::from_secs(limit),
            interval: Duration::from_secs(interval),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub deployment: WaitPolicy,
    pub namespace: WaitPolicy,
    pub pod: WaitPolicy,
    pub drain: WaitPolicy,
    pub secret: WaitPolicy,
    /// Pause between uninstalling the old generation and installing the new one
    pub upgrade_grace: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            deployment: WaitPolicy::from_secs(300, 5),
            namespace: WaitPolicy::from_secs(120, 2),
            pod: WaitPolicy::from_secs(120, 2),
            drain: WaitPolicy::from_secs(300, 5),
            secret: WaitPolicy::from_secs(60, 2),
            upgrade_grace: Duration::from_secs(30),
        }
    }
}

/// Fully resolved configuration of one operation. Not modified once the
/// operation starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallConfig {
    /// Target version, or `latest`
    pub version: String,
    pub namespaces: Namespaces,
    pub sources: BTreeMap<Component, ManifestSource>,
    pub default_urls: DefaultUrls,
    pub options: InstallerOptions,
    pub etcd: EtcdOptions,
    pub metrics: bool,
    pub portal: Option<PortalCredentials>,
    /// Leave namespaces in place on uninstall
    pub skip_namespace_deletion: bool,
    /// Create the cluster namespace when it differs from the operator's
    pub create_namespace: bool,
    /// Save removed manifests locally before deleting them
    pub backup: bool,
    pub backup_dir: PathBuf,
    /// Write built manifests here instead of touching the cluster
    pub dry_run: Option<PathBuf>,
    pub timeouts: Timeouts,
    pub meta: InstallerMeta,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            version: defaults::LATEST.to_string(),
            namespaces: Namespaces::default(),
            sources: BTreeMap::new(),
            default_urls: DefaultUrls::default(),
            options: InstallerOptions::default(),
            etcd: EtcdOptions::default(),
            metrics: false,
            portal: None,
            skip_namespace_deletion: false,
            create_namespace: true,
            backup: true,
            backup_dir: PathBuf::from(defaults::BACKUP_DIR),
            dry_run: None,
            timeouts: Timeouts::default(),
            meta: InstallerMeta::default(),
        }
    }
}

impl InstallConfig {
    pub fn source(&self, component: Component) -> ManifestSource {
        self.sources.get(&component).cloned().unwrap_or_default()
    }

    /// Whether this operation installs or removes etcd itself
    pub fn etcd_in_scope(&self) -> bool {
        !self.etcd.skip && (self.options.etcd_operator || self.options.etcd_cluster)
    }

    pub fn includes(&self, component: Component) -> bool {
        match component {
            Component::EtcdOperator | Component::EtcdCluster => {
                self.etcd_in_scope() && self.options.includes(component)
            }
            Component::PortalManager => self.options.portal_manager && self.portal.is_some(),
            _ => self.options.includes(component),
        }
    }

    /// Version-pinned config of the same platform, as used for the installed side of an upgrade
    pub fn with_version(&self, version: &str) -> Self {
        Self {
            version: version.to_string(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_url_substitutes_version_and_file() {
        let urls = DefaultUrls::default();
        let url = urls.for_component(Component::Operator, "v2.5.0");
        assert_eq!(
            url,
            "https://github.com/storage-platform/storage-operator/releases/download/v2.5.0/storage-operator.yaml"
        );
        assert!(urls
            .for_component(Component::EtcdCluster, "2.5.0")
            .ends_with("/etcd-cluster.yaml"));
    }

    #[test]
    fn test_component_from_name() {
        for component in Component::ALL {
            assert_eq!(Component::from_name(component.name()), Some(component));
        }
        assert_eq!(Component::from_name("nope"), None);
    }

    #[test]
    fn test_cluster_namespace_falls_back_to_operator() {
        let mut ns = Namespaces::default();
        assert_eq!(ns.cluster(), "storage-system");
        assert!(!ns.has_separate_cluster());

        ns.cluster = Some("storage-system".into());
        assert!(!ns.has_separate_cluster());

        ns.cluster = Some("tenant-a".into());
        assert_eq!(ns.cluster(), "tenant-a");
        assert!(ns.has_separate_cluster());
    }

    #[test]
    fn test_etcd_scope() {
        let mut config = InstallConfig::default();
        assert!(config.etcd_in_scope());
        assert!(config.includes(Component::EtcdCluster));

        config.etcd.skip = true;
        assert!(!config.etcd_in_scope());
        assert!(!config.includes(Component::EtcdOperator));

        config.etcd.skip = false;
        config.options.etcd_operator = false;
        config.options.etcd_cluster = false;
        assert!(!config.etcd_in_scope());
    }

    #[test]
    fn test_portal_needs_credentials() {
        let mut config = InstallConfig::default();
        config.options.portal_manager = true;
        assert!(!config.includes(Component::PortalManager));

        config.portal = Some(PortalCredentials {
            client_id: "id".into(),
            secret: "s".into(),
            api_url: "https://portal".into(),
            tenant_id: "t".into(),
        });
        assert!(config.includes(Component::PortalManager));
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = Credentials {
            username: "admin".into(),
            password: "hunter2".into(),
        };
        let text = format!("{creds:?}");
        assert!(text.contains("admin"));
        assert!(!text.contains("hunter2"));
    }
}
