//! Sandboxed command execution.
//!
//! The sandbox is a policy record, not a process mode: when enabled and
//! `bwrap` is available the command runs under a read-only filesystem view
//! with explicit read-write binds and no network; otherwise it runs directly
//! under the host shell with the provided environment. Either way the
//! command's output is teed to a log file and failures carry its tail.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use thiserror::Error;
use wait_timeout::ChildExt;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("command failed with exit code {code:?}: {command}\n{output}")]
    BuildFailed {
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("command timed out after {timeout:?}: {command}")]
    BuildTimeout { command: String, timeout: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the executed command may touch.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Run under the host sandbox tool when available.
    pub enabled: bool,
    /// Allow network access inside the sandbox.
    pub network: bool,
    /// Wall-clock limit per command.
    pub timeout: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            enabled: true,
            network: false,
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl Policy {
    /// Marker string folded into the build fingerprint.
    pub fn marker(&self) -> &'static str {
        match (self.enabled, self.network) {
            (true, false) => "sandbox",
            (true, true) => "network-on",
            (false, _) => "no-sandbox",
        }
    }
}

/// Run one shell command under the policy.
///
/// stdout and stderr are appended to `log`; the last lines are surfaced on
/// failure so callers never need to open the log for the common case.
pub fn run(
    policy: &Policy,
    command: &str,
    cwd: &Path,
    env: &[(String, String)],
    writable: &[PathBuf],
    log: &Path,
) -> Result<(), SandboxError> {
    let mut cmd = build_command(policy, command, cwd, writable);
    for (key, value) in env {
        cmd.env(key, value);
    }

    if let Some(parent) = log.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log)?;
    cmd.stdout(Stdio::from(log_file.try_clone()?));
    cmd.stderr(Stdio::from(log_file));
    cmd.stdin(Stdio::null());

    let mut child = cmd.spawn()?;
    let status = match child.wait_timeout(policy.timeout)? {
        Some(status) => status,
        None => {
            child.kill().ok();
            child.wait().ok();
            return Err(SandboxError::BuildTimeout {
                command: command.to_string(),
                timeout: policy.timeout,
            });
        }
    };

    if !status.success() {
        return Err(SandboxError::BuildFailed {
            command: command.to_string(),
            code: status.code(),
            output: read_last_lines(log, 20).unwrap_or_default(),
        });
    }

    Ok(())
}

fn build_command(policy: &Policy, command: &str, cwd: &Path, writable: &[PathBuf]) -> Command {
    if policy.enabled {
        if let Ok(bwrap) = which::which("bwrap") {
            let mut cmd = Command::new(bwrap);
            cmd.args(["--ro-bind", "/", "/"])
                .args(["--dev", "/dev"])
                .args(["--proc", "/proc"])
                .args(["--tmpfs", "/tmp"]);
            for path in writable {
                cmd.arg("--bind").arg(path).arg(path);
            }
            if !policy.network {
                cmd.arg("--unshare-net");
            }
            cmd.arg("--chdir").arg(cwd);
            cmd.args(["sh", "-c", command]);
            return cmd;
        }
        tracing::debug!("bwrap not found, running unsandboxed");
    }

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).current_dir(cwd);
    cmd
}

fn read_last_lines(path: &Path, n: usize) -> std::io::Result<String> {
    use std::io::{BufRead, BufReader};

    let file = std::fs::File::open(path)?;
    let lines: Vec<String> = BufReader::new(file).lines().map_while(Result::ok).collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].join("\n"))
}
