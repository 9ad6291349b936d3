//! Kubernetes operations

pub mod client;
pub mod kubectl;
pub mod wait;

#[cfg(test)]
pub mod fake;

pub use client::{ClusterClient, ExecOutput, KubeClusterClient};
pub use wait::wait_for;
