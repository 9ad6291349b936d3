//! Command implementations for the storage-deploy CLI

pub mod install;
pub mod portal;
pub mod uninstall;
pub mod upgrade;

use crate::config::InstallConfig;
use crate::install::Session;
use crate::k8s::KubeClusterClient;
use crate::manifest::{HttpClient, KustomizeBuilder, LazyRuntime, SourceResolver};
use crate::utils::{CommonPrereqs, Prerequisite};
use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

/// Flags shared by every command that touches the cluster
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub kubeconfig: Option<PathBuf>,
    /// Skip confirmation prompts
    pub assume_yes: bool,
    /// Ask before destructive steps (from settings)
    pub confirm: bool,
}

impl RunOptions {
    /// False if the user declined
    pub fn confirm(&self, prompt: &str) -> Result<bool> {
        if !self.confirm {
            return Ok(true);
        }
        crate::utils::confirm_destructive(prompt, self.assume_yes)
    }
}

/// Fail early when kubectl or kustomize is missing
pub fn check_prerequisites() -> Result<()> {
    let kubectl = CommonPrereqs::kubectl();
    let kustomize = CommonPrereqs::kustomize();
    let prereqs: Vec<&dyn Prerequisite> = vec![&kubectl, &kustomize];

    let missing = CommonPrereqs::check_all(&prereqs);
    if missing.is_empty() {
        return Ok(());
    }
    for (name, hint) in &missing {
        crate::log_error!("Missing prerequisite {}: {}", name, hint);
    }
    let names: Vec<&str> = missing.iter().map(|(name, _)| name.as_str()).collect();
    anyhow::bail!("missing required tools: {}", names.join(", "))
}

/// Session wired to the real cluster, kustomize and the network
pub fn connect(config: &InstallConfig, options: &RunOptions) -> Result<Session> {
    check_prerequisites()?;

    let cluster = KubeClusterClient::connect(options.kubeconfig.as_deref())
        .context("connecting to the cluster")?;
    let overlay = KustomizeBuilder::detect()?;
    let resolver = SourceResolver::new(
        Box::new(HttpClient::new()?),
        Box::new(LazyRuntime::default()),
    );

    if let Some(dir) = &config.dry_run {
        crate::log_info!("DRY RUN: manifests will be written to {}", dir.display());
    }

    Ok(Session::new(
        Box::new(cluster),
        Box::new(overlay),
        resolver,
        config,
    ))
}

pub(crate) fn success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.bold());
}
