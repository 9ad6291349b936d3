//! Pre-flight round trip against externally provided etcd endpoints

use super::Session;
use crate::config::InstallConfig;
use crate::config::defaults::{self, ETCD_CERT_MOUNT, VALIDATION_IMAGE, VALIDATION_POD};
use crate::k8s::wait;
use crate::utils::errors::{InstallerError, Result};
use anyhow::Context;
use k8s_openapi::api::core::v1::{
    Container, Pod, PodSpec, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use regex::Regex;
use std::collections::BTreeMap;

const SCHEME_PATTERN: &str = r"^[a-zA-Z][a-zA-Z0-9+.-]*://";
const PROBE_KEY: &str = "storage-deploy-validation";
const PROBE_VALUE: &str = "ok";
const POD_DEADLINE_SECS: i64 = 600;
const CERT_VOLUME: &str = "etcd-client-certs";

/// Split a comma-separated endpoint list, dropping blanks and giving every
/// scheme-less entry `https://` under TLS and `http://` otherwise.
pub fn normalize_endpoints(raw: &str, tls: bool) -> Result<Vec<String>> {
    let scheme = Regex::new(SCHEME_PATTERN).map_err(|e| InstallerError::parse("endpoint pattern", e))?;
    let prefix = if tls { "https://" } else { "http://" };

    Ok(raw
        .split(',')
        .map(str::trim)
        .filter(|ep| !ep.is_empty())
        .map(|ep| {
            if scheme.is_match(ep) {
                ep.to_string()
            } else {
                format!("{prefix}{ep}")
            }
        })
        .collect())
}

/// Short-lived pod carrying `etcdctl`, with the client certificates mounted under TLS
fn validation_pod(namespace: &str, tls_secret: Option<&str>) -> Pod {
    let mut labels = BTreeMap::new();
    labels.insert(defaults::PART_OF_LABEL.to_string(), defaults::PART_OF_VALUE.to_string());

    let mut container = Container {
        name: "etcdctl".to_string(),
        image: Some(VALIDATION_IMAGE.to_string()),
        command: Some(vec!["sleep".to_string(), POD_DEADLINE_SECS.to_string()]),
        ..Default::default()
    };
    let mut volumes = None;

    if let Some(secret) = tls_secret {
        container.volume_mounts = Some(vec![VolumeMount {
            name: CERT_VOLUME.to_string(),
            mount_path: ETCD_CERT_MOUNT.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]);
        volumes = Some(vec![Volume {
            name: CERT_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }]);
    }

    Pod {
        metadata: ObjectMeta {
            name: Some(VALIDATION_POD.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            active_deadline_seconds: Some(POD_DEADLINE_SECS),
            containers: vec![container],
            volumes,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn etcdctl(endpoint: &str, tls: bool, args: &[&str]) -> Vec<String> {
    let mut command = vec!["etcdctl".to_string(), format!("--endpoints={endpoint}")];
    if tls {
        command.push(format!("--cacert={ETCD_CERT_MOUNT}/etcd-client-ca.crt"));
        command.push(format!("--cert={ETCD_CERT_MOUNT}/etcd-client.crt"));
        command.push(format!("--key={ETCD_CERT_MOUNT}/etcd-client.key"));
    }
    command.extend(args.iter().map(|a| a.to_string()));
    command
}

/// The client certificate secret must already exist in the cluster namespace;
/// it is labelled so uninstall and upgrade treat it as part of the platform.
fn check_tls_secret(session: &Session, config: &InstallConfig) -> Result<()> {
    let cluster = session.cluster();
    let namespace = config.namespaces.cluster();
    let name = &config.etcd.tls_secret_name;

    if cluster.get_namespace(namespace)?.is_none() {
        return Err(InstallerError::NamespaceMissing(namespace.to_string()));
    }
    if cluster.get_secret(namespace, name)?.is_none() {
        return Err(InstallerError::SecretMissing {
            namespace: namespace.to_string(),
            name: name.clone(),
        });
    }
    cluster.label_secret(namespace, name, defaults::PART_OF_LABEL, defaults::PART_OF_VALUE)
}

/// Run a put, get and delete against every configured endpoint from inside
/// the cluster. The probe pod is removed whatever the outcome.
pub fn validate(session: &Session, config: &InstallConfig) -> anyhow::Result<()> {
    let etcd = &config.etcd;
    let endpoints = normalize_endpoints(&etcd.endpoints, etcd.tls)?;
    if endpoints.is_empty() {
        anyhow::bail!("no etcd endpoints configured; pass --etcd-endpoints or install etcd");
    }

    let namespace = if etcd.tls {
        check_tls_secret(session, config)?;
        config.namespaces.cluster()
    } else {
        defaults::VALIDATION_NAMESPACE
    };

    let pod = validation_pod(namespace, etcd.tls.then_some(etcd.tls_secret_name.as_str()));
    let manifest = serde_yaml::to_string(&pod).context("serializing validation pod")?;
    let cluster = session.cluster();

    crate::log_info!("Validating etcd endpoints: {}", endpoints.join(", "));
    let result = cluster
        .apply(namespace, &manifest, false)
        .map_err(anyhow::Error::from)
        .and_then(|()| {
            session.wait(
                &format!("pod {namespace}/{VALIDATION_POD}"),
                config.timeouts.pod,
                wait::pod_running(cluster, namespace, VALIDATION_POD),
            )?;
            for endpoint in &endpoints {
                probe(session, namespace, endpoint, etcd.tls)
                    .with_context(|| format!("etcd endpoint {endpoint} failed validation"))?;
            }
            Ok(())
        });

    if let Err(e) = cluster.delete(namespace, &manifest, true) {
        crate::log_warn!("Could not remove validation pod {}/{}: {}", namespace, VALIDATION_POD, e);
    }

    result?;
    crate::log_info!("✓ etcd endpoints reachable");
    Ok(())
}

fn probe(session: &Session, namespace: &str, endpoint: &str, tls: bool) -> Result<()> {
    for args in [
        &["put", PROBE_KEY, PROBE_VALUE][..],
        &["get", PROBE_KEY][..],
        &["del", PROBE_KEY][..],
    ] {
        let command = etcdctl(endpoint, tls, args);
        let output = session.cluster().exec(VALIDATION_POD, namespace, &command)?;
        if !output.stderr.trim().is_empty() {
            return Err(InstallerError::Command {
                program: format!("etcdctl {}", args[0]),
                stderr: output.stderr.trim().to_string(),
            });
        }
        tracing::debug!(endpoint, op = args[0], stdout = %output.stdout.trim(), "etcd probe");
    }
    Ok(())
}
