//! Install, uninstall and upgrade orchestration for the storage platform

pub mod etcd;
pub mod orchestrator;
pub mod portal;
pub mod upgrade;
pub mod version;

use crate::config::defaults;
use crate::config::{Component, InstallConfig, WaitPolicy};
use crate::k8s::{ClusterClient, wait};
use crate::manifest::patch::{self, Patch};
use crate::manifest::{OverlayBuilder, SourceResolver, VirtualFs, vfs};
use crate::utils::dryrun::{BackupDir, ManifestDump};
use crate::utils::errors::Result;
use crate::utils::progress;
use anyhow::Context;
use semver::Version;
use serde_yaml::{Mapping, Value};

use orchestrator::Phase;
use version::ReleaseCatalog;

pub use upgrade::UpgradeOutcome;

/// Collaborators and per-operation state shared by every installer of one
/// invocation. Built once per operation.
pub struct Session {
    cluster: Box<dyn ClusterClient>,
    overlay: Box<dyn OverlayBuilder>,
    resolver: SourceResolver,
    catalog: ReleaseCatalog,
    dump: Option<ManifestDump>,
    backup: Option<BackupDir>,
}

impl Session {
    /// Dry-run and backup locations are taken from `config`
    pub fn new(
        cluster: Box<dyn ClusterClient>,
        overlay: Box<dyn OverlayBuilder>,
        resolver: SourceResolver,
        config: &InstallConfig,
    ) -> Self {
        Self {
            cluster,
            overlay,
            resolver,
            catalog: ReleaseCatalog::new(config.default_urls.releases_api.clone()),
            dump: config.dry_run.as_ref().map(ManifestDump::new),
            backup: config
                .backup
                .then(|| BackupDir::new(config.backup_dir.clone())),
        }
    }

    pub fn cluster(&self) -> &dyn ClusterClient {
        self.cluster.as_ref()
    }

    pub fn is_dry_run(&self) -> bool {
        self.dump.is_some()
    }

    /// Where an uninstall saved removed manifests, if it saved any
    pub fn backup_path(&self) -> Option<&std::path::Path> {
        self.backup.as_ref().and_then(BackupDir::path)
    }

    /// Installer for `config`, with its target version resolved
    pub fn installer(&self, config: &InstallConfig) -> anyhow::Result<Installer<'_>> {
        let version = self
            .catalog
            .resolve(self.resolver.http(), &config.version)
            .context("resolving target version")?;
        version::ensure_supported(&version)?;
        let config = upgrade::config_for_version(config, &version);
        Ok(Installer::new(self, config, version))
    }

    pub fn install(&self, config: &InstallConfig) -> anyhow::Result<()> {
        self.installer(config)?.install()
    }

    /// Installer for what is running. An unpinned version is read from the
    /// installed operator.
    pub fn installed(&self, config: &InstallConfig) -> anyhow::Result<Installer<'_>> {
        let installed = match config.version.trim() {
            "" | defaults::LATEST => {
                version::existing_operator_version(self.cluster(), &config.namespaces.operator)
                    .context("reading installed operator version")?
            }
            pinned => version::parse_version(pinned)?,
        };
        let config = upgrade::config_for_version(config, &installed);
        Ok(Installer::new(self, config, installed))
    }

    pub fn uninstall(&self, config: &InstallConfig) -> anyhow::Result<()> {
        self.installed(config)?.uninstall()
    }

    fn wait<F>(&self, what: &str, policy: WaitPolicy, predicate: F) -> Result<()>
    where
        F: FnMut() -> Result<()>,
    {
        progress::with_wait(what, || wait::wait_for(what, policy, predicate))
    }
}

/// Whether a tree is being built to apply or to delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Install,
    Uninstall,
}

/// Engine for one configuration of the platform at one version
pub struct Installer<'s> {
    session: &'s Session,
    config: InstallConfig,
    version: Version,
    legacy: bool,
}

impl<'s> Installer<'s> {
    pub fn new(session: &'s Session, config: InstallConfig, version: Version) -> Self {
        let legacy = version::is_legacy(&version);
        Self {
            session,
            config,
            version,
            legacy,
        }
    }

    pub fn config(&self) -> &InstallConfig {
        &self.config
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn install(&self) -> anyhow::Result<()> {
        if !self.session.is_dry_run() {
            self.ensure_not_installed()?;
        }
        self.install_unguarded()
    }

    /// Install without checking for an existing operator; upgrades replace one
    pub(crate) fn install_unguarded(&self) -> anyhow::Result<()> {
        crate::log_info!("Installing storage platform {}", self.version);
        let phases = orchestrator::install_phases(&self.config);
        let fs = self.build_tree(&orchestrator::components(&phases), Mode::Install)?;
        self.run_phases(&phases, &fs)?;
        crate::log_info!("Storage platform {} installed", self.version);
        Ok(())
    }

    pub fn uninstall(&self) -> anyhow::Result<()> {
        crate::log_info!("Uninstalling storage platform {}", self.version);
        let phases = orchestrator::uninstall_phases(&self.config);
        let fs = self.build_tree(&orchestrator::components(&phases), Mode::Uninstall)?;
        self.run_phases(&phases, &fs)?;
        crate::log_info!("Storage platform {} uninstalled", self.version);
        Ok(())
    }

    fn ensure_not_installed(&self) -> anyhow::Result<()> {
        let found = version::find_operator(self.session.cluster(), &self.config.namespaces.operator)
            .context("checking for an existing installation")?;
        if let Some((deployment, _)) = found {
            anyhow::bail!(
                "the storage operator is already installed ({}/{}); use `upgrade` instead",
                deployment.metadata.namespace.unwrap_or_default(),
                deployment.metadata.name.unwrap_or_default()
            );
        }
        Ok(())
    }

    /// Namespace the operator manifests ship with for this generation
    fn stock_operator_namespace(&self) -> &'static str {
        if self.legacy {
            defaults::LEGACY_OPERATOR_NAMESPACE
        } else {
            defaults::OPERATOR_NAMESPACE
        }
    }

    pub(crate) fn operator_deployment(&self) -> &'static str {
        if self.legacy {
            defaults::LEGACY_OPERATOR_DEPLOYMENT
        } else {
            defaults::OPERATOR_DEPLOYMENT
        }
    }

    /// Resolve the manifests of `components` and apply every config-driven patch
    pub fn build_tree(&self, components: &[Component], mode: Mode) -> anyhow::Result<VirtualFs> {
        let mut fs = vfs::build(
            &self.config,
            &self.version.to_string(),
            self.legacy,
            components,
            &self.session.resolver,
        )
        .context("assembling manifests")?;

        for &component in components {
            self.patch_component(&mut fs, component, mode)
                .with_context(|| format!("patching {component} manifests"))?;
        }
        Ok(fs)
    }

    fn patch_component(&self, fs: &mut VirtualFs, component: Component, mode: Mode) -> Result<()> {
        let namespaces = &self.config.namespaces;
        let mut overlay = fs.kustomization(component)?;

        match component {
            Component::Operator => {
                overlay = retarget_namespace(&overlay, self.stock_operator_namespace(), &namespaces.operator)?;
            }
            Component::EtcdOperator => {
                overlay = retarget_namespace(&overlay, defaults::ETCD_NAMESPACE, &namespaces.etcd)?;
            }
            Component::EtcdCluster => {
                overlay = retarget_namespace(&overlay, defaults::ETCD_NAMESPACE, &namespaces.etcd)?;
                if let Some(class) = &self.config.etcd.storage_class {
                    overlay = patch::add_patches(
                        &overlay,
                        defaults::ETCD_CLUSTER_KIND,
                        defaults::ETCD_CLUSTER_NAME,
                        &[Patch::add("/spec/storageClassName", Value::from(class.as_str()))],
                    )?;
                }
            }
            Component::Cluster => {
                overlay = self.patch_cluster(&overlay, mode)?;
                if self.wants_cluster_namespace(mode) {
                    let manifest = fs.manifest(component)?;
                    let namespace = namespace_document(namespaces.cluster());
                    fs.set_manifest(component, patch::join_documents(&[namespace, manifest]));
                }
            }
            Component::PortalManager => {
                overlay = self.patch_portal(&overlay)?;
            }
        }

        fs.set_kustomization(component, overlay);
        Ok(())
    }

    /// The cluster gets a namespace of its own only when one was asked for
    fn wants_cluster_namespace(&self, mode: Mode) -> bool {
        let ns = &self.config.namespaces;
        let wanted = ns.has_separate_cluster() && self.config.create_namespace;
        match mode {
            Mode::Install => wanted,
            Mode::Uninstall => wanted && !self.config.skip_namespace_deletion,
        }
    }

    /// `kvBackend.address` for the cluster resource
    pub(crate) fn etcd_address(&self) -> Result<String> {
        let etcd = &self.config.etcd;
        if self.config.etcd_in_scope() {
            let scheme = if etcd.tls { "https" } else { "http" };
            return Ok(format!(
                "{scheme}://{}.{}:{}",
                defaults::ETCD_SERVICE,
                self.config.namespaces.etcd,
                defaults::ETCD_CLIENT_PORT
            ));
        }
        Ok(etcd::normalize_endpoints(&etcd.endpoints, etcd.tls)?.join(","))
    }

    fn patch_cluster(&self, overlay: &str, mode: Mode) -> Result<String> {
        let config = &self.config;
        let cluster_ns = config.namespaces.cluster();

        let mut patches = vec![
            Patch::add("/metadata/namespace", Value::from(cluster_ns)),
            Patch::add("/spec/kvBackend/address", Value::from(self.etcd_address()?)),
        ];
        if config.etcd.tls {
            patches.push(Patch::add(
                "/spec/tlsEtcdSecretRefName",
                Value::from(config.etcd.tls_secret_name.as_str()),
            ));
            patches.push(Patch::add(
                "/spec/tlsEtcdSecretRefNamespace",
                Value::from(cluster_ns),
            ));
        }
        if config.metrics {
            let mut metrics = Mapping::new();
            metrics.insert(Value::from("enabled"), Value::Bool(true));
            patches.push(Patch::add("/spec/metrics", Value::Mapping(metrics)));
        }
        if mode == Mode::Install && config.includes(Component::PortalManager) {
            patches.push(Patch::add("/spec/enablePortalManager", Value::Bool(true)));
        }
        let overlay = patch::add_patches(overlay, defaults::CLUSTER_KIND, defaults::CLUSTER_NAME, &patches)?;

        let mut secret_patches = vec![Patch::add("/metadata/namespace", Value::from(cluster_ns))];
        if let Some(credentials) = &config.meta.credentials {
            let mut data = Mapping::new();
            data.insert(Value::from("username"), Value::from(credentials.username.as_str()));
            data.insert(Value::from("password"), Value::from(credentials.password.as_str()));
            secret_patches.push(Patch::add("/stringData", Value::Mapping(data)));
        }
        patch::add_patches(&overlay, "Secret", defaults::API_SECRET, &secret_patches)
    }

    fn patch_portal(&self, overlay: &str) -> Result<String> {
        let cluster_ns = self.config.namespaces.cluster();

        let mut secret_patches = vec![Patch::add("/metadata/namespace", Value::from(cluster_ns))];
        let mut config_patches = secret_patches.clone();

        if let Some(portal) = &self.config.portal {
            let mut data = Mapping::new();
            data.insert(Value::from("client-id"), Value::from(portal.client_id.as_str()));
            data.insert(Value::from("client-secret"), Value::from(portal.secret.as_str()));
            data.insert(Value::from("tenant-id"), Value::from(portal.tenant_id.as_str()));
            secret_patches.push(Patch::add("/stringData", Value::Mapping(data)));

            let mut settings = Mapping::new();
            settings.insert(Value::from("api-url"), Value::from(portal.api_url.as_str()));
            config_patches.push(Patch::add("/data", Value::Mapping(settings)));
        }

        let overlay = patch::add_patches(overlay, "Secret", defaults::PORTAL_SECRET, &secret_patches)?;
        patch::add_patches(&overlay, "ConfigMap", defaults::PORTAL_CONFIG_MAP, &config_patches)
    }

    fn run_phases(&self, phases: &[Phase], fs: &VirtualFs) -> anyhow::Result<()> {
        for phase in phases {
            tracing::debug!(%phase, "starting phase");
            self.run_phase(phase, fs).with_context(|| phase.to_string())?;
        }
        Ok(())
    }
}

/// Move a component from the namespace its manifests ship with to `target`
fn retarget_namespace(overlay: &str, stock: &str, target: &str) -> Result<String> {
    if target.is_empty() || target == stock {
        return Ok(overlay.to_string());
    }
    let overlay = patch::set_field(overlay, &format!("'{target}'"), "namespace", &[])?;
    patch::add_patches(
        &overlay,
        "Namespace",
        stock,
        &[Patch::replace("/metadata/name", Value::from(target))],
    )
}

fn namespace_document(name: &str) -> String {
    format!("apiVersion: v1\nkind: Namespace\nmetadata:\n  name: {name}\n")
}
