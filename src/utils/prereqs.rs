//! Prerequisite checking for the external tools the engine drives

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrereqError {
    #[error("Tool '{name}' not found")]
    NotFound { name: String, hint: String },
}

/// Trait for checking prerequisites
pub trait Prerequisite {
    /// Name of the prerequisite tool
    fn name(&self) -> &str;

    /// Check if the tool is available
    fn check(&self) -> Result<(), PrereqError>;
}

/// Prerequisite satisfied by any one of several commands on PATH
pub struct CommandPrereq {
    pub name: String,
    pub alternatives: Vec<String>,
    pub hint: String,
}

impl CommandPrereq {
    pub fn new(name: impl Into<String>, hint: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            alternatives: vec![name.clone()],
            name,
            hint: hint.into(),
        }
    }

    pub fn or(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }
}

impl Prerequisite for CommandPrereq {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self) -> Result<(), PrereqError> {
        if self.alternatives.iter().any(|tool| which::which(tool).is_ok()) {
            return Ok(());
        }
        Err(PrereqError::NotFound {
            name: self.name.clone(),
            hint: self.hint.clone(),
        })
    }
}

/// Tools needed by install, uninstall and upgrade
pub struct CommonPrereqs;

impl CommonPrereqs {
    pub fn kubectl() -> CommandPrereq {
        CommandPrereq::new(
            "kubectl",
            "Install from: https://kubernetes.io/docs/tasks/tools/",
        )
    }

    /// kustomize itself, or kubectl's embedded `kubectl kustomize`
    pub fn kustomize() -> CommandPrereq {
        CommandPrereq::new(
            "kustomize",
            "Install from: https://kubectl.docs.kubernetes.io/installation/kustomize/",
        )
        .or("kubectl")
    }

    /// Check all prerequisites, returning the missing ones with their hints
    pub fn check_all(prereqs: &[&dyn Prerequisite]) -> Vec<(String, String)> {
        prereqs
            .iter()
            .filter_map(|prereq| match prereq.check() {
                Ok(()) => None,
                Err(PrereqError::NotFound { name, hint }) => Some((name, hint)),
            })
            .collect()
    }
}
