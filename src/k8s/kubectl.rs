//! Kubectl wrapper utilities

use crate::utils::errors::{InstallerError, Result};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

fn kubectl(kubeconfig: Option<&Path>) -> Command {
    let mut cmd = Command::new("kubectl");
    if let Some(kc) = kubeconfig {
        cmd.env("KUBECONFIG", kc);
    }
    cmd
}

fn check(args: &[&str], output: Output) -> Result<Output> {
    if !output.status.success() {
        return Err(InstallerError::Command {
            program: format!("kubectl {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

/// Run kubectl with `yaml` on stdin
fn run_with_stdin(args: &[&str], yaml: &str, kubeconfig: Option<&Path>) -> Result<String> {
    let mut child = kubectl(kubeconfig)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(yaml.as_bytes())?;
    }

    let output = check(args, child.wait_with_output()?)?;
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    for line in stdout.lines() {
        tracing::debug!("kubectl: {}", line);
    }
    Ok(stdout)
}

/// Apply a YAML stream. `force` switches to server-side apply and takes
/// ownership of conflicting fields, which large CRDs need.
pub fn apply_yaml(namespace: &str, yaml: &str, force: bool, kubeconfig: Option<&Path>) -> Result<()> {
    let mut args = vec!["apply"];
    if !namespace.is_empty() {
        args.extend(["-n", namespace]);
    }
    if force {
        args.extend(["--server-side", "--force-conflicts"]);
    }
    args.extend(["-f", "-"]);

    run_with_stdin(&args, yaml, kubeconfig).map(|_| ())
}

/// Delete everything in a YAML stream, ignoring objects that are already gone.
/// `force` skips graceful termination.
pub fn delete_yaml(namespace: &str, yaml: &str, force: bool, kubeconfig: Option<&Path>) -> Result<()> {
    let mut args = vec!["delete", "--ignore-not-found"];
    if !namespace.is_empty() {
        args.extend(["-n", namespace]);
    }
    if force {
        args.extend(["--force", "--grace-period=0"]);
    }
    args.extend(["-f", "-"]);

    run_with_stdin(&args, yaml, kubeconfig).map(|_| ())
}

/// Run `command` inside `pod`, returning (stdout, stderr).
///
/// A non-zero exit is an error carrying the command's stderr.
pub fn exec(
    pod: &str,
    namespace: &str,
    command: &[String],
    kubeconfig: Option<&Path>,
) -> Result<(String, String)> {
    let mut args = vec!["exec", "-n", namespace, pod, "--"];
    args.extend(command.iter().map(String::as_str));

    let output = kubectl(kubeconfig).args(&args).output()?;
    let output = check(&args, output)?;
    Ok((
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).trim().to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    #[test]
    fn test_check_reports_args_and_stderr() {
        let output = Output {
            status: ExitStatus::from_raw(1 << 8),
            stdout: Vec::new(),
            stderr: b"error: the server doesn't have a resource type \"foo\"\n".to_vec(),
        };
        let err = check(&["get", "foo"], output).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("kubectl get foo"));
        assert!(text.contains("resource type"));
    }

    #[test]
    fn test_check_passes_success() {
        let output = Output {
            status: ExitStatus::from_raw(0),
            stdout: b"ok".to_vec(),
            stderr: Vec::new(),
        };
        assert_eq!(check(&["version"], output).unwrap().stdout, b"ok");
    }
}
