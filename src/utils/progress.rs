//! Progress indicators for readiness and drain waits

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Create a spinner for indeterminate operations.
///
/// Hidden when stderr is not a terminal, so tests and CI logs stay clean.
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Spinner wrapper around a single wait
pub struct WaitProgress {
    pb: ProgressBar,
    what: String,
}

impl WaitProgress {
    pub fn new(what: &str) -> Self {
        Self {
            pb: create_spinner(&format!("Waiting for {what}")),
            what: what.to_string(),
        }
    }

    pub fn finish_success(&self) {
        self.pb.finish_and_clear();
        crate::log_info!("✓ {}", self.what);
    }

    pub fn finish_error(&self, error: &str) {
        self.pb.finish_and_clear();
        crate::log_warn!("✗ {}: {}", self.what, error);
    }
}

/// Run `f` while a wait spinner is shown, reporting the outcome
pub fn with_wait<F, T, E>(what: &str, f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
    E: std::fmt::Display,
{
    let progress = WaitProgress::new(what);
    match f() {
        Ok(value) => {
            progress.finish_success();
            Ok(value)
        }
        Err(e) => {
            progress.finish_error(&e.to_string());
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_spinner() {
        let pb = create_spinner("Test operation");
        assert!(pb.message().contains("Test operation"));
        pb.finish_and_clear();
    }

    #[test]
    fn test_with_wait_passes_through_result() {
        let ok: Result<u32, String> = with_wait("thing", || Ok(7));
        assert_eq!(ok.unwrap(), 7);

        let err: Result<u32, String> = with_wait("thing", || Err("nope".to_string()));
        assert_eq!(err.unwrap_err(), "nope");
    }
}
