//! Helpers for running child processes with timeouts and bounded output.
//!
//! Model-emitted commands are shell strings and run through `sh -c`;
//! verifier checks run as argv vectors. Either way output is drained on
//! reader threads while the child runs, so a chatty process can never
//! deadlock the pipe, and stored bytes are bounded.

use std::io::Read;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use wait_timeout::ChildExt;

use crate::core::types::CancelToken;

/// Grace period between a cancellation and the hard kill.
pub const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: Option<ExitStatus>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes discarded beyond the storage limit.
    pub truncated_bytes: usize,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl CommandOutput {
    pub fn exit_code(&self) -> i32 {
        match &self.status {
            Some(status) => status.code().unwrap_or(-1),
            None => -1,
        }
    }

    pub fn success(&self) -> bool {
        self.status.as_ref().is_some_and(ExitStatus::success) && !self.timed_out
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Trailing slice of stderr-then-stdout, the part worth feeding back
    /// to an analyzer.
    pub fn error_tail(&self, max_chars: usize) -> String {
        let stderr = self.stderr_lossy();
        let text = if stderr.trim().is_empty() {
            self.stdout_lossy()
        } else {
            stderr
        };
        let trimmed = text.trim();
        let count = trimmed.chars().count();
        if count <= max_chars {
            return trimmed.to_string();
        }
        trimmed.chars().skip(count - max_chars).collect()
    }
}

/// Build a `sh -c` invocation for a model-emitted shell string.
pub fn shell_command(command: &str, cwd: &Path) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).current_dir(cwd);
    cmd
}

/// Run a command with a timeout, draining stdout/stderr concurrently.
///
/// A cancellation gives the child [`CANCEL_GRACE`] to exit before the
/// kill; a timeout kills immediately. `output_limit_bytes` bounds stored
/// output per stream while the pipes are still drained to completion.
pub fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: &CancelToken,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().context("spawn command")?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let mut cancelled = false;
    let poll = Duration::from_millis(200);
    let mut waited = Duration::ZERO;

    let status = loop {
        if let Some(status) = child.wait_timeout(poll).context("wait for command")? {
            break Some(status);
        }
        waited += poll;
        if cancel.is_cancelled() {
            cancelled = true;
            let status = match child.wait_timeout(CANCEL_GRACE).context("grace wait")? {
                Some(status) => Some(status),
                None => {
                    child.kill().context("kill cancelled command")?;
                    Some(child.wait().context("wait after kill")?)
                }
            };
            break status;
        }
        if waited >= timeout {
            timed_out = true;
            child.kill().context("kill timed-out command")?;
            child.wait().context("wait after kill")?;
            break None;
        }
    };

    let (stdout, out_truncated) = join_reader(stdout_handle).context("join stdout")?;
    let (stderr, err_truncated) = join_reader(stderr_handle).context("join stderr")?;

    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        truncated_bytes: out_truncated + err_truncated,
        timed_out,
        cancelled,
    })
}

/// Spawn a shell command detached, for servers and watchers. The child's
/// output is discarded; the handle is dropped so it outlives the engine.
pub fn spawn_detached(command: &str, cwd: &Path) -> Result<()> {
    shell_command(command, cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("spawn background command '{command}'"))?;
    Ok(())
}

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

/// Truncate captured output to the first `max_lines` lines for display.
pub fn truncate_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= max_lines {
        return text.trim_end().to_string();
    }
    let mut shown = lines[..max_lines].join("\n");
    shown.push_str(&format!("\n… ({} more lines)", lines.len() - max_lines));
    shown
}
