//! Uninstall-then-install upgrades, carrying state across the operator
//! generation boundary

use super::{Installer, Session, etcd, version};
use crate::config::defaults::{self, API_SECRET, SECRET_FINALIZER};
use crate::config::{Credentials, InstallConfig};
use crate::k8s::{ClusterClient, wait};
use crate::utils::errors::{InstallerError, Result};
use anyhow::Context;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use semver::Version;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// Installed and target versions matched; nothing was touched
    AlreadyCurrent(Version),
    Upgraded {
        from: Version,
        to: Version,
        /// Secrets and storage classes recreated after the switch
        migrated: usize,
    },
}

/// Config describing the platform at `version`. The legacy generation
/// always lives in its own fixed namespace.
pub fn config_for_version(config: &InstallConfig, version: &Version) -> InstallConfig {
    let mut config = config.with_version(&version.to_string());
    if version::is_legacy(version) {
        config.namespaces.operator = defaults::LEGACY_OPERATOR_NAMESPACE.to_string();
    }
    config
}

/// Remove the fields the source cluster owns so the object can be created again
fn strip_export_metadata(meta: &mut ObjectMeta) {
    meta.uid = None;
    meta.resource_version = None;
    meta.creation_timestamp = None;
    meta.deletion_timestamp = None;
    meta.deletion_grace_period_seconds = None;
    meta.managed_fields = None;
    meta.generation = None;
    meta.owner_references = None;
    meta.finalizers = None;
}

#[derive(Debug, Clone)]
struct SavedSecret {
    secret: Secret,
    namespace: String,
    /// Carried the protection finalizer, so deletion leaves it in place
    protected: bool,
}

impl SavedSecret {
    fn capture(mut secret: Secret, namespace: &str) -> Self {
        let protected = secret
            .metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|f| f == SECRET_FINALIZER));
        strip_export_metadata(&mut secret.metadata);
        secret.metadata.namespace = Some(namespace.to_string());
        Self {
            secret,
            namespace: namespace.to_string(),
            protected,
        }
    }

    fn name(&self) -> &str {
        self.secret.metadata.name.as_deref().unwrap_or_default()
    }
}

/// Objects the legacy generation deletes on uninstall that the new one still needs
#[derive(Debug, Default)]
struct Snapshot {
    secrets: Vec<SavedSecret>,
    storage_class: Option<StorageClass>,
}

impl Snapshot {
    fn capture(cluster: &dyn ClusterClient, old_namespace: &str, new_namespace: &str) -> Result<Self> {
        let mut snapshot = Snapshot::default();

        for name in defaults::CSI_SECRETS {
            if let Some(secret) = cluster.get_secret(defaults::CSI_SECRET_NAMESPACE, name)? {
                snapshot
                    .secrets
                    .push(SavedSecret::capture(secret, defaults::CSI_SECRET_NAMESPACE));
            }
        }

        let selector = format!("{}={}", defaults::PART_OF_LABEL, defaults::PART_OF_VALUE);
        for secret in cluster.list_secrets(old_namespace, &selector)? {
            // The install recreates the API secret from the carried credentials
            if secret.metadata.name.as_deref() == Some(API_SECRET) {
                continue;
            }
            snapshot.secrets.push(SavedSecret::capture(secret, new_namespace));
        }

        snapshot.storage_class = cluster
            .get_storage_class(defaults::SNAPSHOT_STORAGE_CLASS)?
            .map(|mut sc| {
                strip_export_metadata(&mut sc.metadata);
                sc
            });

        tracing::info!(
            secrets = snapshot.secrets.len(),
            storage_class = snapshot.storage_class.is_some(),
            "captured legacy state"
        );
        Ok(snapshot)
    }

    /// Recreate what the uninstall removed. Returns how many objects were created.
    fn restore(self, session: &Session, config: &InstallConfig) -> Result<usize> {
        let cluster = session.cluster();
        let mut restored = 0;

        if let Some(storage_class) = self.storage_class {
            let name = storage_class.metadata.name.clone().unwrap_or_default();
            if cluster.get_storage_class(&name)?.is_some() {
                tracing::debug!(name, "storage class survived, skipping");
            } else {
                cluster.create_storage_class(&storage_class)?;
                crate::log_info!("Restored storage class {}", name);
                restored += 1;
            }
        }

        for saved in self.secrets {
            if saved.protected {
                tracing::debug!(name = saved.name(), "secret is protected, skipping");
                continue;
            }

            let name = saved.name().to_string();
            let namespace = saved.namespace.as_str();
            let present = cluster
                .get_secret(namespace, &name)?
                .is_some_and(|s| s.metadata.deletion_timestamp.is_none());
            if present {
                tracing::debug!(namespace, name, "secret already present, skipping");
                continue;
            }
            let mut secret = saved.secret.clone();
            secret
                .metadata
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(SECRET_FINALIZER.to_string());

            session.wait(
                &format!("secret {namespace}/{name} to be released"),
                config.timeouts.secret,
                wait::secret_absent(cluster, namespace, &name),
            )?;
            cluster.create_secret(namespace, &secret)?;
            session.wait(
                &format!("secret {namespace}/{name}"),
                config.timeouts.secret,
                wait::secret_exists(cluster, namespace, &name),
            )?;
            crate::log_info!("Restored secret {}/{}", namespace, name);
            restored += 1;
        }

        Ok(restored)
    }
}

/// Platform API credentials from the installed cluster's API secret
fn read_credentials(cluster: &dyn ClusterClient, namespace: &str) -> Result<Credentials> {
    let secret = cluster
        .get_secret(namespace, API_SECRET)?
        .ok_or_else(|| InstallerError::SecretMissing {
            namespace: namespace.to_string(),
            name: API_SECRET.to_string(),
        })?;

    let field = |key: &str| -> Result<String> {
        if let Some(value) = secret.data.as_ref().and_then(|d| d.get(key)) {
            return String::from_utf8(value.0.clone())
                .map_err(|e| InstallerError::parse(format!("{API_SECRET}.{key}"), e));
        }
        secret
            .string_data
            .as_ref()
            .and_then(|d| d.get(key))
            .cloned()
            .ok_or_else(|| InstallerError::FieldNotFound(format!("{API_SECRET}.{key}")))
    };

    Ok(Credentials {
        username: field("username")?,
        password: field("password")?,
    })
}

impl Session {
    /// Replace the installed platform with the one `install` describes.
    ///
    /// `uninstall` describes the installed side; its version is always read
    /// from the running operator.
    pub fn upgrade(&self, uninstall: &InstallConfig, install: &InstallConfig) -> anyhow::Result<UpgradeOutcome> {
        let cluster = self.cluster();
        let from = version::existing_operator_version(cluster, &uninstall.namespaces.operator)
            .context("reading installed operator version")?;
        let to = self
            .catalog
            .resolve(self.resolver.http(), &install.version)
            .context("resolving target version")?;
        version::ensure_supported(&to)?;

        if from == to {
            crate::log_info!("Storage platform is already at {}", to);
            return Ok(UpgradeOutcome::AlreadyCurrent(to));
        }
        if to < from {
            crate::log_warn!("Target {} is older than installed {}", to, from);
        }
        crate::log_info!("Upgrading storage platform {} → {}", from, to);

        let mut target = config_for_version(install, &to);
        if !target.etcd_in_scope() && target.etcd.validate && !self.is_dry_run() {
            etcd::validate(self, &target).context("validating target etcd endpoints")?;
        }
        target.etcd.validate = false;

        let mut installed = config_for_version(uninstall, &from);
        installed.create_namespace = false;
        // etcd holds the platform's data and outlives the operator generation
        installed.etcd.skip = true;

        target.meta.credentials = Some(
            read_credentials(cluster, installed.namespaces.cluster())
                .context("reading platform API credentials")?,
        );

        let snapshot = if version::is_legacy(&from) {
            Some(Snapshot::capture(
                cluster,
                installed.namespaces.cluster(),
                target.namespaces.cluster(),
            )?)
        } else {
            None
        };

        Installer::new(self, installed, from.clone())
            .uninstall()
            .context("removing installed version")?;

        if !self.is_dry_run() && !target.timeouts.upgrade_grace.is_zero() {
            tracing::info!(grace = ?target.timeouts.upgrade_grace, "waiting before reinstall");
            std::thread::sleep(target.timeouts.upgrade_grace);
        }

        Installer::new(self, target.clone(), to.clone())
            .install_unguarded()
            .context("installing target version")?;

        let migrated = match snapshot {
            Some(snapshot) if !self.is_dry_run() => snapshot
                .restore(self, &target)
                .context("restoring state removed with the legacy operator")?,
            _ => 0,
        };

        Ok(UpgradeOutcome::Upgraded { from, to, migrated })
    }
}
