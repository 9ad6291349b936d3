//! Installed and target version resolution

use crate::config::defaults::{
    self, DEVELOP_TAG, LAST_PRE_BREAKING_VERSION, LATEST_SUPPORTED_VERSION,
    OLDEST_SUPPORTED_VERSION,
};
use crate::k8s::ClusterClient;
use crate::manifest::HttpFetch;
use crate::utils::errors::{InstallerError, Result};
use k8s_openapi::api::apps::v1::Deployment;
use semver::Version;
use std::sync::OnceLock;

/// Parse a release or image tag leniently: a leading `v` is dropped and
/// missing minor/patch parts count as zero.
pub fn parse_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim().trim_start_matches('v');
    let split = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(split);

    let mut parts: Vec<&str> = core.split('.').collect();
    while parts.len() < 3 {
        parts.push("0");
    }

    Version::parse(&format!("{}{}", parts.join("."), suffix)).map_err(|e| {
        InstallerError::VersionParse {
            version: raw.to_string(),
            reason: e.to_string(),
        }
    })
}

pub fn ensure_supported(version: &Version) -> Result<()> {
    if *version < OLDEST_SUPPORTED_VERSION {
        return Err(InstallerError::UnsupportedVersion {
            found: version.to_string(),
            oldest: OLDEST_SUPPORTED_VERSION.to_string(),
        });
    }
    Ok(())
}

/// Whether `version` belongs to the operator generation before the breaking change
pub fn is_legacy(version: &Version) -> bool {
    *version <= LAST_PRE_BREAKING_VERSION
}

/// Version from the tag of an image reference (`repo/operator:v2.5.0`)
pub fn version_from_image(image: &str) -> Result<Version> {
    let tag = image
        .rsplit_once(':')
        .map(|(_, tag)| tag)
        .filter(|tag| !tag.contains('/'))
        .ok_or_else(|| InstallerError::VersionParse {
            version: image.to_string(),
            reason: "image has no tag".to_string(),
        })?;

    if tag == DEVELOP_TAG {
        return Ok(LATEST_SUPPORTED_VERSION);
    }
    parse_version(tag)
}

fn operator_image(deployment: &Deployment) -> Option<&str> {
    deployment
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .first()?
        .image
        .as_deref()
}

/// The running operator deployment, legacy location first.
///
/// Returns whether the hit was the legacy deployment alongside it.
pub fn find_operator(cluster: &dyn ClusterClient, namespace: &str) -> Result<Option<(Deployment, bool)>> {
    if let Some(deployment) = cluster.get_deployment(
        defaults::LEGACY_OPERATOR_NAMESPACE,
        defaults::LEGACY_OPERATOR_DEPLOYMENT,
    )? {
        return Ok(Some((deployment, true)));
    }

    Ok(cluster
        .get_deployment(namespace, defaults::OPERATOR_DEPLOYMENT)?
        .map(|deployment| (deployment, false)))
}

/// Version of the operator currently running in the cluster
pub fn existing_operator_version(cluster: &dyn ClusterClient, namespace: &str) -> Result<Version> {
    let (deployment, legacy) = find_operator(cluster, namespace)?.ok_or_else(|| {
        InstallerError::not_found(format!(
            "no operator deployment {}/{} or {}/{}",
            defaults::LEGACY_OPERATOR_NAMESPACE,
            defaults::LEGACY_OPERATOR_DEPLOYMENT,
            namespace,
            defaults::OPERATOR_DEPLOYMENT
        ))
    })?;

    let image = operator_image(&deployment).ok_or_else(|| InstallerError::VersionParse {
        version: deployment.metadata.name.clone().unwrap_or_default(),
        reason: "operator deployment has no container image".to_string(),
    })?;

    let version = version_from_image(image)?;
    tracing::info!(%version, image, legacy, "found installed operator");
    ensure_supported(&version)?;
    Ok(version)
}

/// Latest release tag, fetched at most once per session
pub struct ReleaseCatalog {
    url: String,
    latest: OnceLock<String>,
}

impl ReleaseCatalog {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            latest: OnceLock::new(),
        }
    }

    pub fn latest_tag(&self, http: &dyn HttpFetch) -> Result<String> {
        if let Some(tag) = self.latest.get() {
            return Ok(tag.clone());
        }

        let body = http.get(&self.url)?;
        let release: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| InstallerError::parse("release metadata", e))?;
        let tag = release["tag_name"]
            .as_str()
            .ok_or_else(|| InstallerError::FieldNotFound("tag_name".to_string()))?;

        crate::log_info!("Latest release is {}", tag);
        Ok(self.latest.get_or_init(|| tag.to_string()).clone())
    }

    /// Concrete version for a configured target; `latest` or empty asks the catalog
    pub fn resolve(&self, http: &dyn HttpFetch, configured: &str) -> Result<Version> {
        let configured = configured.trim();
        if configured.is_empty() || configured == defaults::LATEST {
            return parse_version(&self.latest_tag(http)?);
        }
        parse_version(configured)
    }
}
