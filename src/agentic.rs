//! Agentic executor: the single-shot autonomous path.
//!
//! One model call produces file writes and shell commands; files land on
//! disk first, then foreground commands run in order. The first non-zero
//! foreground exit stops the remaining foreground commands (background
//! commands are unaffected) and feeds an auto-fix loop bounded at three
//! rounds. The dangerous-command filter has already run inside the
//! parser; rejected commands surface here as events only.

use anyhow::{Context, Result};
use minijinja::context;
use tracing::{debug, info, instrument, warn};

use crate::agents::render_prompt;
use crate::core::parser::{self, CommandKind, ShellCommand};
use crate::core::types::{ChatMessage, Role};
use crate::events::EventCode;
use crate::io::process::{self, truncate_lines};
use crate::io::verifier::{detect_run_command, DISPLAY_LINES};
use crate::io::workspace;
use crate::orchestrator::Engine;

/// Auto-fix rounds before a run failure surfaces to the user.
pub const MAX_AUTO_FIX: u32 = 3;

/// What one agentic request did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgenticOutcome {
    pub files_written: usize,
    pub commands_run: usize,
    pub display_text: String,
    /// False when a foreground command failed and auto-fix gave up.
    pub commands_ok: bool,
}

/// Result of running the detected project command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub command: String,
    pub exit_code: i32,
    pub output: String,
}

/// Execute one autonomous request against the workspace.
#[instrument(skip_all)]
pub fn run_agentic(engine: &Engine, request: &str) -> Result<AgenticOutcome> {
    engine.classify(request);
    engine.scan_workspace()?;

    let session = engine.role_session(Role::Agentic)?;
    let prompt = render_prompt(
        "agentic",
        context! {
            project_summary => project_summary(engine),
            file_contents => file_contents(engine)?,
            user_request => request,
        },
    )?;
    let outcome = session
        .call(vec![ChatMessage::user(prompt)])
        .context("agentic call")?;

    let parsed = parser::parse(&outcome.text);
    record_rejected(engine, &parsed.rejected_commands);

    let mut files_written = 0usize;
    for file in &parsed.files {
        engine.write_generated(&file.path, &file.content)?;
        files_written += 1;
    }
    if files_written > 0 {
        info!(files = files_written, "applied file changes");
    }

    let (commands_run, failure) = execute_commands(engine, &parsed.commands);
    let commands_ok = match failure {
        Some(failed) => auto_fix(engine, request, &failed),
        None => true,
    };

    {
        let mut memory = engine.memory.write().expect("memory lock");
        memory.push_history(Role::Chat, ChatMessage::user(request));
        memory.push_history(
            Role::Chat,
            ChatMessage::assistant(crate::core::types::truncate(&outcome.text, 3_000)),
        );
    }

    Ok(AgenticOutcome {
        files_written,
        commands_run,
        display_text: parsed.display_text,
        commands_ok,
    })
}

/// A foreground command that exited non-zero, with its captured output.
struct FailedCommand {
    command: String,
    output: String,
}

/// Dispatch parsed commands in order. Returns the count dispatched and
/// the first foreground failure, if any. Background commands still spawn
/// after a foreground failure.
fn execute_commands(
    engine: &Engine,
    commands: &[ShellCommand],
) -> (usize, Option<FailedCommand>) {
    let mut dispatched = 0usize;
    let mut failure: Option<FailedCommand> = None;

    for entry in commands {
        match entry.kind {
            CommandKind::Background => {
                engine
                    .events
                    .record(EventCode::CommandBackground, entry.command.clone());
                if let Err(err) = process::spawn_detached(&entry.command, &engine.root) {
                    warn!(command = %entry.command, %err, "background spawn failed");
                } else {
                    dispatched += 1;
                }
            }
            CommandKind::Foreground => {
                if failure.is_some() {
                    debug!(command = %entry.command, "skipped after earlier failure");
                    continue;
                }
                engine
                    .events
                    .record(EventCode::CommandDispatched, entry.command.clone());
                dispatched += 1;
                match run_foreground(engine, &entry.command) {
                    Ok(report) if report.exit_code == 0 => {}
                    Ok(report) => {
                        engine.events.record(
                            EventCode::CommandFailed,
                            format!("{} (exit {})", entry.command, report.exit_code),
                        );
                        failure = Some(FailedCommand {
                            command: entry.command.clone(),
                            output: report.output,
                        });
                    }
                    Err(err) => {
                        engine
                            .events
                            .record(EventCode::CommandFailed, format!("{}: {err}", entry.command));
                        failure = Some(FailedCommand {
                            command: entry.command.clone(),
                            output: err.to_string(),
                        });
                    }
                }
            }
        }
    }
    (dispatched, failure)
}

fn run_foreground(engine: &Engine, command: &str) -> Result<RunReport> {
    let output = process::run_with_timeout(
        process::shell_command(command, &engine.root),
        engine.config.run_timeout(),
        engine.config.command_output_limit_bytes,
        &engine.cancel,
    )?;
    let mut text = output.stdout_lossy();
    let stderr = output.stderr_lossy();
    if !stderr.trim().is_empty() {
        text.push('\n');
        text.push_str(&stderr);
    }
    if output.timed_out {
        text.push_str("\n[timed out]");
    }
    Ok(RunReport {
        command: command.to_string(),
        exit_code: output.exit_code(),
        output: truncate_lines(&text, DISPLAY_LINES),
    })
}

/// Feed the captured failure back to the model, re-running the failed
/// command after each fix. Gives up after [`MAX_AUTO_FIX`] rounds.
fn auto_fix(engine: &Engine, request: &str, failed: &FailedCommand) -> bool {
    let mut last_output = failed.output.clone();
    for attempt in 1..=MAX_AUTO_FIX {
        if engine.cancel.is_cancelled() {
            return false;
        }
        info!(attempt, command = %failed.command, "auto-fix round");
        match model_fix(engine, request, &failed.command, &last_output) {
            Ok(0) => {
                warn!("auto-fix produced no file changes, stopping");
                return false;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(%err, "auto-fix model call failed");
                return false;
            }
        }
        match run_foreground(engine, &failed.command) {
            Ok(report) if report.exit_code == 0 => {
                info!(attempt, "auto-fix verified, command now succeeds");
                return true;
            }
            Ok(report) => last_output = report.output,
            Err(err) => last_output = err.to_string(),
        }
    }
    false
}

/// One model round of the fix loop: error in, file writes out.
fn model_fix(engine: &Engine, request: &str, command: &str, error_output: &str) -> Result<usize> {
    let session = engine.role_session(Role::Agentic)?;
    let prompt = format!(
        "The project failed to run after your last changes.\n\n\
         Original request: {request}\n\
         Command: {command}\n\n\
         EXACT error output:\n```\n{error_output}\n```\n\n\
         Read the error, find the broken file(s), and output complete \
         corrected files using ===FILE: path=== ... ===END=== blocks. \
         Do not give advice; fix the code.\n\n\
         ## Current Files\n{}",
        file_contents(engine)?
    );
    let outcome = session
        .call(vec![ChatMessage::user(prompt)])
        .context("auto-fix call")?;

    let parsed = parser::parse(&outcome.text);
    record_rejected(engine, &parsed.rejected_commands);
    let mut written = 0usize;
    for file in &parsed.files {
        engine.write_generated(&file.path, &file.content)?;
        written += 1;
    }
    Ok(written)
}

/// Detect and run the project's own entry command, auto-fixing failures.
/// Returns `None` when no run command can be detected.
pub fn run_project(engine: &Engine, request: &str) -> Result<Option<RunReport>> {
    let Some(run) = detect_run_command(&engine.root) else {
        return Ok(None);
    };
    engine
        .events
        .record(EventCode::CommandDispatched, run.command.clone());
    let output = process::run_with_timeout(
        process::shell_command(&run.command, &run.cwd),
        engine.config.run_timeout(),
        engine.config.command_output_limit_bytes,
        &engine.cancel,
    )?;
    let report = RunReport {
        command: run.command.clone(),
        exit_code: output.exit_code(),
        output: truncate_lines(&output.error_tail(10_000), DISPLAY_LINES),
    };
    if report.exit_code == 0 {
        return Ok(Some(report));
    }
    engine.events.record(
        EventCode::CommandFailed,
        format!("{} (exit {})", report.command, report.exit_code),
    );
    let failed = FailedCommand {
        command: run.command,
        output: report.output.clone(),
    };
    auto_fix(engine, request, &failed);
    Ok(Some(report))
}

fn record_rejected(engine: &Engine, rejected: &[String]) {
    for command in rejected {
        engine
            .events
            .record(EventCode::DangerousCommand, command.clone());
    }
}

fn project_summary(engine: &Engine) -> String {
    let memory = engine.memory.read().expect("memory lock");
    format!(
        "{}\n\nFiles:\n{}",
        memory.architecture(),
        memory.file_index_text()
    )
}

/// All scanned file contents, bounded per file, for the agentic prompt.
fn file_contents(engine: &Engine) -> Result<String> {
    let files = workspace::scan(&engine.root)?;
    if files.is_empty() {
        return Ok("(no files yet)".to_string());
    }
    let parts: Vec<String> = files
        .iter()
        .map(|f| {
            format!(
                "### {}\n```\n{}\n```",
                f.path,
                crate::core::types::truncate(&f.content, 6_000)
            )
        })
        .collect();
    Ok(parts.join("\n\n"))
}
