//! Bounded fixed-interval polling and the readiness predicates built on it

use crate::config::WaitPolicy;
use crate::k8s::client::ClusterClient;
use crate::utils::errors::{InstallerError, Result};
use std::time::Instant;

/// Poll `predicate` every `policy.interval` until it succeeds.
///
/// Every failed poll is retried; once `policy.limit` has elapsed the last
/// failure is returned inside [`InstallerError::Timeout`].
pub fn wait_for<F>(what: &str, policy: WaitPolicy, mut predicate: F) -> Result<()>
where
    F: FnMut() -> Result<()>,
{
    let start = Instant::now();

    loop {
        let last = match predicate() {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if start.elapsed() >= policy.limit {
            return Err(InstallerError::Timeout {
                what: what.to_string(),
                limit: policy.limit,
                last: Box::new(last),
            });
        }

        tracing::trace!(what, error = %last, "not ready, retrying");
        std::thread::sleep(policy.interval);
    }
}

fn not_ready(message: String) -> Result<()> {
    Err(InstallerError::NotReady(message))
}

/// Deployment exists and all desired replicas are ready
pub fn deployment_ready<'a>(
    cluster: &'a dyn ClusterClient,
    namespace: &'a str,
    name: &'a str,
) -> impl FnMut() -> Result<()> + 'a {
    move || {
        let Some(deployment) = cluster.get_deployment(namespace, name)? else {
            return not_ready(format!("deployment {namespace}/{name} not found"));
        };

        let desired = deployment
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1)
            .max(1);
        let ready = deployment
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);

        if ready >= desired {
            Ok(())
        } else {
            not_ready(format!("{ready}/{desired} replicas ready"))
        }
    }
}

pub fn pod_running<'a>(
    cluster: &'a dyn ClusterClient,
    namespace: &'a str,
    name: &'a str,
) -> impl FnMut() -> Result<()> + 'a {
    move || {
        let Some(pod) = cluster.get_pod(namespace, name)? else {
            return not_ready(format!("pod {namespace}/{name} not found"));
        };

        let phase = pod
            .status
            .and_then(|s| s.phase)
            .unwrap_or_else(|| "Unknown".to_string());
        if phase == "Running" {
            Ok(())
        } else {
            not_ready(format!("pod {namespace}/{name} is {phase}"))
        }
    }
}

pub fn namespace_exists<'a>(
    cluster: &'a dyn ClusterClient,
    name: &'a str,
) -> impl FnMut() -> Result<()> + 'a {
    move || match cluster.get_namespace(name)? {
        Some(_) => Ok(()),
        None => not_ready(format!("namespace {name} not found")),
    }
}

/// Namespace is fully gone; a terminating namespace still counts as present
pub fn namespace_absent<'a>(
    cluster: &'a dyn ClusterClient,
    name: &'a str,
) -> impl FnMut() -> Result<()> + 'a {
    move || match cluster.get_namespace(name)? {
        None => Ok(()),
        Some(_) => not_ready(format!("namespace {name} still exists")),
    }
}

pub fn no_pods<'a>(
    cluster: &'a dyn ClusterClient,
    namespace: &'a str,
) -> impl FnMut() -> Result<()> + 'a {
    move || {
        let remaining = cluster.list_pods(namespace)?.len();
        if remaining == 0 {
            Ok(())
        } else {
            not_ready(format!("{remaining} pods remain in {namespace}"))
        }
    }
}

pub fn secret_exists<'a>(
    cluster: &'a dyn ClusterClient,
    namespace: &'a str,
    name: &'a str,
) -> impl FnMut() -> Result<()> + 'a {
    move || match cluster.get_secret(namespace, name)? {
        Some(_) => Ok(()),
        None => not_ready(format!("secret {namespace}/{name} not found")),
    }
}

pub fn secret_absent<'a>(
    cluster: &'a dyn ClusterClient,
    namespace: &'a str,
    name: &'a str,
) -> impl FnMut() -> Result<()> + 'a {
    move || match cluster.get_secret(namespace, name)? {
        None => Ok(()),
        Some(_) => not_ready(format!("secret {namespace}/{name} still exists")),
    }
}
