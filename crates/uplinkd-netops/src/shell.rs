use std::process::{Command, Output, Stdio};

use crate::error::{HostError, Result};

/// Run a host utility, folding a non-zero exit status into an error that
/// carries the tool's stderr.
pub fn run(op: &'static str, iface: &str, program: &str, args: &[&str]) -> Result<Output> {
    let out = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| HostError::call(op, iface, format!("spawn {program} failed: {e}")))?;

    if !out.status.success() {
        return Err(HostError::call(
            op,
            iface,
            format!(
                "{program} exited with {:?}: {}",
                out.status.code(),
                String::from_utf8_lossy(&out.stderr).trim()
            ),
        ));
    }

    Ok(out)
}

/// Run a host utility where a non-zero exit is acceptable (e.g. flushing
/// rules that may not exist). Only the spawn itself can fail.
pub fn run_allow_failure(
    op: &'static str,
    iface: &str,
    program: &str,
    args: &[&str],
) -> Result<Output> {
    Command::new(program)
        .args(args)
        .output()
        .map_err(|e| HostError::call(op, iface, format!("spawn {program} failed: {e}")))
}

/// Spawn a long-running host utility detached from our stdio, returning the
/// child handle for later teardown.
pub fn spawn_detached(
    op: &'static str,
    iface: &str,
    program: &str,
    args: &[&str],
) -> Result<std::process::Child> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| HostError::call(op, iface, format!("spawn {program} failed: {e}")))
}

pub fn stdout_string(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}
