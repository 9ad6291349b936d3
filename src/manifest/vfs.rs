//! In-memory manifest tree: group → component → file → bytes

use crate::config::defaults;
use crate::config::{Component, InstallConfig};
use crate::manifest::patch;
use crate::manifest::source::SourceResolver;
use crate::utils::errors::{InstallerError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const KUSTOMIZATION_FILE: &str = "kustomization.yaml";

/// Baseline of every generated overlay file
pub const KUSTOMIZATION_HEADER: &str =
    "apiVersion: kustomize.config.k8s.io/v1beta1\nkind: Kustomization\nresources: []\n";

type Files = BTreeMap<String, Vec<u8>>;

/// Manifest tree for one operation. Built fresh, patched in place, consumed
/// by the orchestrator, then dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualFs {
    groups: BTreeMap<String, BTreeMap<String, Files>>,
}

impl VirtualFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, group: &str, component: &str, file: &str, contents: impl Into<Vec<u8>>) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .entry(component.to_string())
            .or_default()
            .insert(file.to_string(), contents.into());
    }

    pub fn read(&self, group: &str, component: &str, file: &str) -> Option<&[u8]> {
        self.groups
            .get(group)?
            .get(component)?
            .get(file)
            .map(Vec::as_slice)
    }

    pub fn read_string(&self, group: &str, component: &str, file: &str) -> Result<String> {
        let bytes = self
            .read(group, component, file)
            .ok_or_else(|| InstallerError::SourceNotFound(format!("{group}/{component}/{file}")))?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| InstallerError::parse(format!("{group}/{component}/{file}"), e))
    }

    /// Files of one component subtree, in name order
    pub fn files(&self, group: &str, component: &str) -> impl Iterator<Item = (&str, &[u8])> {
        self.groups
            .get(group)
            .and_then(|g| g.get(component))
            .into_iter()
            .flat_map(|files| files.iter().map(|(name, data)| (name.as_str(), data.as_slice())))
    }

    pub fn contains(&self, component: Component) -> bool {
        self.groups
            .get(component.group())
            .is_some_and(|g| g.contains_key(component.name()))
    }

    pub fn manifest(&self, component: Component) -> Result<String> {
        self.read_string(component.group(), component.name(), component.file_name())
    }

    pub fn set_manifest(&mut self, component: Component, contents: impl Into<Vec<u8>>) {
        self.write(component.group(), component.name(), component.file_name(), contents);
    }

    pub fn kustomization(&self, component: Component) -> Result<String> {
        self.read_string(component.group(), component.name(), KUSTOMIZATION_FILE)
    }

    pub fn set_kustomization(&mut self, component: Component, contents: impl Into<Vec<u8>>) {
        self.write(component.group(), component.name(), KUSTOMIZATION_FILE, contents);
    }

    /// Materialize one component subtree under `dir` and return its directory
    pub fn write_component_to(&self, dir: &Path, component: Component) -> Result<PathBuf> {
        let target = dir.join(component.group()).join(component.name());
        std::fs::create_dir_all(&target)?;
        for (name, data) in self.files(component.group(), component.name()) {
            std::fs::write(target.join(name), data)?;
        }
        Ok(target)
    }
}

/// Overlay file listing exactly `resource`
pub fn new_kustomization(resource: &str) -> Result<String> {
    patch::set_field(KUSTOMIZATION_HEADER, &format!("[{resource}]"), "resources", &[])
}

/// API credentials secret the legacy generation shipped inside the cluster manifest
pub fn legacy_api_secret(namespace: &str) -> String {
    format!(
        "apiVersion: v1\nkind: Secret\nmetadata:\n  name: {}\n  namespace: {}\ntype: Opaque\n",
        defaults::API_SECRET,
        namespace
    )
}

/// Resolve and lay out the manifests of `components`.
///
/// `version` is the concrete release the default URLs point at. With
/// `legacy` set, the legacy API secret rides along as a second document of
/// the cluster manifest so it is applied and deleted together with it.
pub fn build(
    config: &InstallConfig,
    version: &str,
    legacy: bool,
    components: &[Component],
    resolver: &SourceResolver,
) -> Result<VirtualFs> {
    let mut fs = VirtualFs::new();

    for &component in components {
        let default_url = config.default_urls.for_component(component, version);
        let bytes = resolver.resolve(&config.source(component), &default_url, component.file_name())?;
        let mut manifest = String::from_utf8(bytes)
            .map_err(|e| InstallerError::parse(component.file_name(), e))?;

        if component == Component::Cluster && legacy {
            let secret = legacy_api_secret(defaults::LEGACY_OPERATOR_NAMESPACE);
            manifest = patch::join_documents(&[manifest, secret]);
        }

        tracing::debug!(%component, bytes = manifest.len(), "resolved manifest");
        fs.set_manifest(component, manifest);
        fs.set_kustomization(component, new_kustomization(component.file_name())?);
    }

    Ok(fs)
}
