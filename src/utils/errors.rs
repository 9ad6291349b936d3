//! Error taxonomy for the installer engine and actionable remediation hints

use colored::Colorize;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the leaf modules of the engine.
///
/// Orchestration code wraps these in `anyhow::Error` with the failing phase
/// as context; [`Remediation::from_error`] walks that chain back down to pick
/// a targeted hint.
#[derive(Error, Debug)]
pub enum InstallerError {
    #[error("no manifest source yielded content for {0}")]
    SourceNotFound(String),

    #[error("failed to fetch {location}: {reason}")]
    SourceUnreachable { location: String, reason: String },

    #[error("field not found at path '{0}'")]
    FieldNotFound(String),

    #[error("failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },

    /// A wait predicate has not been satisfied yet. Only ever produced by
    /// predicates; the waiter turns the last one into [`InstallerError::Timeout`].
    #[error("{0}")]
    NotReady(String),

    #[error("timed out after {limit:?} waiting for {what}: {last}")]
    Timeout {
        what: String,
        limit: Duration,
        last: Box<InstallerError>,
    },

    #[error("version {found} is not supported (oldest supported version is {oldest})")]
    UnsupportedVersion { found: String, oldest: String },

    #[error("unable to parse version '{version}': {reason}")]
    VersionParse { version: String, reason: String },

    #[error("secret {namespace}/{name} does not exist")]
    SecretMissing { namespace: String, name: String },

    #[error("namespace {0} does not exist")]
    NamespaceMissing(String),

    #[error("cluster API error: {message}")]
    ClusterApi { message: String, not_found: bool },

    #[error("{program} failed: {stderr}")]
    Command { program: String, stderr: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl InstallerError {
    pub fn parse(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Parse {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    pub fn cluster(message: impl std::fmt::Display) -> Self {
        Self::ClusterApi {
            message: message.to_string(),
            not_found: false,
        }
    }

    pub fn not_found(message: impl std::fmt::Display) -> Self {
        Self::ClusterApi {
            message: message.to_string(),
            not_found: true,
        }
    }

    /// True for cluster lookups that failed only because the object is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ClusterApi { not_found: true, .. })
    }
}

pub type Result<T, E = InstallerError> = std::result::Result<T, E>;

/// User-facing failure with suggestions
#[derive(Error, Debug)]
#[error("{message}")]
pub struct Remediation {
    pub message: String,
    pub suggestions: Vec<String>,
}

impl Remediation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Print the failure and its suggestions to the terminal
    pub fn display(&self) {
        crate::log_error!("{}", self.message);
        eprintln!("{} {}", "✗".red().bold(), self.message);

        if !self.suggestions.is_empty() {
            eprintln!();
            eprintln!("{}", "Suggestions:".yellow().bold());
            for suggestion in &self.suggestions {
                eprintln!("  {} {}", "→".blue(), suggestion);
            }
        }
    }

    /// Build a hint from a failed top-level operation.
    ///
    /// Not-found lookups and version mismatches get a targeted hint instead of
    /// the raw API error.
    pub fn from_error(err: &anyhow::Error) -> Self {
        let cause = err
            .chain()
            .find_map(|e| e.downcast_ref::<InstallerError>());

        match cause {
            Some(InstallerError::ClusterApi {
                not_found: true, ..
            }) => Self::new(format!("{err:#}"))
                .suggest("Check your namespace flags (--operator-namespace, --cluster-namespace)")
                .suggest("Verify the platform is installed in the current kube context"),
            Some(InstallerError::UnsupportedVersion { oldest, .. }) => {
                Self::new(format!("{err:#}"))
                    .suggest(format!(
                        "Upgrade the platform to at least {oldest} manually before using this tool"
                    ))
                    .suggest("Check the installed operator image tag with: kubectl get deployments -A -o wide")
            }
            Some(InstallerError::VersionParse { .. }) => Self::new(format!("{err:#}"))
                .suggest("Pass an explicit semantic version with --version (for example 2.5.0)"),
            Some(InstallerError::SecretMissing { namespace, name }) => {
                Self::new(format!("{err:#}")).suggest(format!(
                    "Create it with: kubectl create secret generic {name} -n {namespace} \
                     --from-file=etcd-client-ca.crt --from-file=etcd-client.crt --from-file=etcd-client.key"
                ))
            }
            Some(InstallerError::NamespaceMissing(ns)) => Self::new(format!("{err:#}"))
                .suggest(format!("Create it with: kubectl create namespace {ns}"))
                .suggest("Or check your --cluster-namespace flag"),
            Some(InstallerError::Timeout { .. }) => Self::new(format!("{err:#}"))
                .suggest("Check pod status in the platform namespaces: kubectl get pods -A")
                .suggest("Increase the wait limits in the [timeouts] section of your config"),
            Some(InstallerError::SourceNotFound(_)) | Some(InstallerError::SourceUnreachable { .. }) => {
                Self::new(format!("{err:#}"))
                    .suggest("Verify the --manifest-path, --manifest-url or --manifest-image overrides")
                    .suggest("Check network access to the release download URL")
            }
            Some(InstallerError::Command { program, .. }) => Self::new(format!("{err:#}"))
                .suggest(format!("Ensure {program} is installed and on your PATH")),
            _ => Self::new(format!("{err:#}")).suggest("Run with -vv for more details"),
        }
    }
}
