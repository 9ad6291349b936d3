//! Configuration file support for storage-deploy

use crate::config::defaults;
use crate::config::install::{DefaultUrls, InstallConfig, Namespaces, Timeouts, WaitPolicy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub behavior: Behavior,

    #[serde(default)]
    pub urls: Urls,

    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

/// Default values for common operations
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Defaults {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default = "default_operator_namespace")]
    pub operator_namespace: String,

    /// Namespace of the storage cluster; the operator namespace when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_namespace: Option<String>,

    #[serde(default = "default_etcd_namespace")]
    pub etcd_namespace: String,

    #[serde(default = "default_etcd_tls_secret")]
    pub etcd_tls_secret: String,

    #[serde(default = "default_backup_dir")]
    pub backup_dir: String,
}

/// Behavior settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Behavior {
    #[serde(default = "default_true")]
    pub confirm_destructive: bool,

    #[serde(default = "default_true")]
    pub backup_on_uninstall: bool,

    #[serde(default = "default_true")]
    pub validate_etcd: bool,
}

/// Manifest download locations
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Urls {
    #[serde(default = "default_storage_template")]
    pub storage: String,

    #[serde(default = "default_etcd_template")]
    pub etcd: String,

    #[serde(default = "default_portal_template")]
    pub portal: String,

    #[serde(default = "default_releases_api")]
    pub releases_api: String,
}

/// Bounds of one wait, in seconds
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct WaitSeconds {
    pub limit: u64,
    pub interval: u64,
}

impl From<WaitPolicy> for WaitSeconds {
    fn from(policy: WaitPolicy) -> Self {
        Self {
            limit: policy.limit.as_secs(),
            interval: policy.interval.as_secs(),
        }
    }
}

impl From<WaitSeconds> for WaitPolicy {
    fn from(secs: WaitSeconds) -> Self {
        WaitPolicy::from_secs(secs.limit, secs.interval)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TimeoutSettings {
    #[serde(default = "default_deployment_wait")]
    pub deployment: WaitSeconds,

    #[serde(default = "default_namespace_wait")]
    pub namespace: WaitSeconds,

    #[serde(default = "default_pod_wait")]
    pub pod: WaitSeconds,

    #[serde(default = "default_drain_wait")]
    pub drain: WaitSeconds,

    #[serde(default = "default_secret_wait")]
    pub secret: WaitSeconds,

    #[serde(default = "default_upgrade_grace")]
    pub upgrade_grace_secs: u64,
}

// Default value functions
fn default_version() -> String {
    defaults::LATEST.to_string()
}

fn default_operator_namespace() -> String {
    defaults::OPERATOR_NAMESPACE.to_string()
}

fn default_etcd_namespace() -> String {
    defaults::ETCD_NAMESPACE.to_string()
}

fn default_etcd_tls_secret() -> String {
    defaults::ETCD_TLS_SECRET.to_string()
}

fn default_backup_dir() -> String {
    defaults::BACKUP_DIR.to_string()
}

fn default_true() -> bool {
    true
}

fn default_storage_template() -> String {
    defaults::STORAGE_URL_TEMPLATE.to_string()
}

fn default_etcd_template() -> String {
    defaults::ETCD_URL_TEMPLATE.to_string()
}

fn default_portal_template() -> String {
    defaults::PORTAL_URL_TEMPLATE.to_string()
}

fn default_releases_api() -> String {
    defaults::RELEASES_API.to_string()
}

fn default_deployment_wait() -> WaitSeconds {
    Timeouts::default().deployment.into()
}

fn default_namespace_wait() -> WaitSeconds {
    Timeouts::default().namespace.into()
}

fn default_pod_wait() -> WaitSeconds {
    Timeouts::default().pod.into()
}

fn default_drain_wait() -> WaitSeconds {
    Timeouts::default().drain.into()
}

fn default_secret_wait() -> WaitSeconds {
    Timeouts::default().secret.into()
}

fn default_upgrade_grace() -> u64 {
    Timeouts::default().upgrade_grace.as_secs()
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            version: default_version(),
            operator_namespace: default_operator_namespace(),
            cluster_namespace: None,
            etcd_namespace: default_etcd_namespace(),
            etcd_tls_secret: default_etcd_tls_secret(),
            backup_dir: default_backup_dir(),
        }
    }
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            confirm_destructive: default_true(),
            backup_on_uninstall: default_true(),
            validate_etcd: default_true(),
        }
    }
}

impl Default for Urls {
    fn default() -> Self {
        Self {
            storage: default_storage_template(),
            etcd: default_etcd_template(),
            portal: default_portal_template(),
            releases_api: default_releases_api(),
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            deployment: default_deployment_wait(),
            namespace: default_namespace_wait(),
            pod: default_pod_wait(),
            drain: default_drain_wait(),
            secret: default_secret_wait(),
            upgrade_grace_secs: default_upgrade_grace(),
        }
    }
}

impl Settings {
    /// Load settings from file or return defaults
    pub fn load() -> Self {
        let Some(path) = Self::find_config_file() else {
            return Self::default();
        };

        Self::load_from_file(&path).unwrap_or_else(|e| {
            crate::log_warn!("Ignoring config file: {:#}", e);
            Self::default()
        })
    }

    /// Load settings from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(settings)
    }

    /// Find config file in standard locations
    /// Priority:
    /// 1. .storage-deploy.toml in current directory
    /// 2. ~/.config/storage-deploy/config.toml (XDG config directory)
    fn find_config_file() -> Option<PathBuf> {
        let local_config = PathBuf::from(".storage-deploy.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("storage-deploy").join("config.toml");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        None
    }

    /// Starting point for an operation's config, before CLI flags are applied
    pub fn install_config(&self) -> InstallConfig {
        let mut config = InstallConfig {
            version: self.defaults.version.clone(),
            namespaces: Namespaces {
                operator: self.defaults.operator_namespace.clone(),
                cluster: self.defaults.cluster_namespace.clone(),
                etcd: self.defaults.etcd_namespace.clone(),
            },
            default_urls: DefaultUrls {
                storage: self.urls.storage.clone(),
                etcd: self.urls.etcd.clone(),
                portal: self.urls.portal.clone(),
                releases_api: self.urls.releases_api.clone(),
            },
            backup: self.behavior.backup_on_uninstall,
            backup_dir: PathBuf::from(&self.defaults.backup_dir),
            timeouts: Timeouts {
                deployment: self.timeouts.deployment.into(),
                namespace: self.timeouts.namespace.into(),
                pod: self.timeouts.pod.into(),
                drain: self.timeouts.drain.into(),
                secret: self.timeouts.secret.into(),
                upgrade_grace: Duration::from_secs(self.timeouts.upgrade_grace_secs),
            },
            ..InstallConfig::default()
        };
        config.etcd.tls_secret_name = self.defaults.etcd_tls_secret.clone();
        config.etcd.validate = self.behavior.validate_etcd;
        config
    }

    /// Generate example config file content
    pub fn example_config() -> String {
        let header = "# storage-deploy configuration file\n\
                      # Place this file at ~/.config/storage-deploy/config.toml or .storage-deploy.toml in your project\n\n";

        match toml::to_string_pretty(&Settings::default()) {
            Ok(config) => format!("{}{}", header, config),
            Err(_) => header.to_string(),
        }
    }
}
