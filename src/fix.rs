//! The fix engine: per-task repair loop with five escalating strategies.
//!
//! Attempts are bounded by `MAX_TASK_FAILURES`. Each attempt runs the
//! analyzer, selects a strategy the analyzer has not forbidden, applies
//! it through the coder, and re-verifies. Exhaustion raises an
//! escalation decision; guided fixes restart the loop with a hint and a
//! smaller budget.

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::agents::{analyzer, coder};
use crate::core::dag::TaskNode;
use crate::core::strategy::{classify_outcome, select_strategy};
use crate::core::types::{
    EscalationDecision, FailureRecord, Role, StrategyCode, TaskStatus, VerificationResult,
    GUIDED_FIX_ATTEMPTS, MAX_TASK_FAILURES,
};
use crate::events::EventCode;
use crate::io::workspace;
use crate::orchestrator::Engine;

/// Decides what happens when a task exhausts its fix attempts.
pub trait EscalationHandler: Send + Sync {
    fn decide(&self, task: &TaskNode, failure: &VerificationResult) -> EscalationDecision;
}

/// Non-interactive default: give up on the task, keep the build going.
pub struct NonInteractiveEscalation;

impl EscalationHandler for NonInteractiveEscalation {
    fn decide(&self, _task: &TaskNode, _failure: &VerificationResult) -> EscalationDecision {
        EscalationDecision::Skip
    }
}

/// Opaque external research provider (web search lives outside the core).
pub trait ResearchProvider: Send + Sync {
    fn research(&self, query: &str) -> Option<String>;
}

/// Default provider: research disabled.
pub struct NoResearch;

impl ResearchProvider for NoResearch {
    fn research(&self, _query: &str) -> Option<String> {
        None
    }
}

/// Terminal outcome of the fix loop for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixLoopResult {
    Verified,
    Failed,
    /// Escalation chose to pause the build; the task stays re-runnable.
    Paused,
    Cancelled,
}

/// Run the repair loop until the task verifies, fails, or escalates out.
#[instrument(skip_all, fields(task = task.id, file = %task.file))]
pub fn run_fix_loop(
    engine: &Engine,
    task: &mut TaskNode,
    all: &[TaskNode],
    mut verification: VerificationResult,
) -> Result<FixLoopResult> {
    let mut hint = String::new();
    let mut budget = MAX_TASK_FAILURES;

    loop {
        while task.failure_count < budget {
            if engine.cancel.is_cancelled() {
                task.status = TaskStatus::Pending;
                return Ok(FixLoopResult::Cancelled);
            }
            task.failure_count += 1;
            task.status = TaskStatus::NeedsFix;
            let attempt = task.failure_count;
            let previous_summary = verification.failure_summary();

            let analysis = analyze_failure(engine, task, &verification, &hint)?;
            task.error_summary = analysis.root_cause.clone();

            let Some(strategy) = select_strategy(attempt, &analysis.forbid_strategies) else {
                warn!(task = task.id, "analyzer forbade every strategy");
                break;
            };
            info!(attempt, %strategy, "applying fix strategy");

            if let Err(err) = apply_strategy(engine, strategy, task, all, &analysis, &verification)
            {
                warn!(task = task.id, %err, "fix strategy failed to apply");
            }

            let next = engine.verify_task_file(task)?;
            let outcome = classify_outcome(&previous_summary, &next);
            engine.record_failure(FailureRecord {
                task_id: task.id,
                attempt,
                verifier_excerpt: crate::core::types::truncate(&previous_summary, 500),
                diagnosis: analysis.root_cause.clone(),
                strategy,
                outcome,
            });

            if next.passed {
                task.status = TaskStatus::Verified;
                return Ok(FixLoopResult::Verified);
            }
            verification = next;
        }

        engine.events.record(
            EventCode::Escalation,
            format!(
                "task {} ({}) exhausted {} fix attempts",
                task.id, task.file, task.failure_count
            ),
        );
        match engine.escalation.decide(task, &verification) {
            EscalationDecision::Retry => {
                debug!(task = task.id, "escalation: retry with reset counter");
                task.failure_count = 0;
                budget = MAX_TASK_FAILURES;
            }
            EscalationDecision::GuidedFix(operator_hint) => {
                debug!(task = task.id, "escalation: guided fix");
                hint = operator_hint;
                task.failure_count = 0;
                budget = GUIDED_FIX_ATTEMPTS;
            }
            EscalationDecision::Skip => {
                task.status = TaskStatus::Failed;
                return Ok(FixLoopResult::Failed);
            }
            EscalationDecision::Pause => {
                task.status = TaskStatus::Pending;
                return Ok(FixLoopResult::Paused);
            }
        }
    }
}

fn analyze_failure(
    engine: &Engine,
    task: &TaskNode,
    verification: &VerificationResult,
    hint: &str,
) -> Result<analyzer::Analysis> {
    let session = engine.role_session(Role::Analyzer)?;
    let (architecture, previous_fixes) = {
        let memory = engine.memory.read().expect("memory lock");
        (
            memory.architecture(),
            memory.failure_log_text(Some(task.id)),
        )
    };
    let ctx = analyzer::AnalyzeContext {
        file_path: task.file.clone(),
        file_content: workspace::read_file(&engine.root, &task.file).unwrap_or_default(),
        error_output: render_verifier_output(verification),
        previous_fixes,
        architecture,
        hint: hint.to_string(),
    };
    analyzer::analyze(&session, &ctx).context("analyze failure")
}

fn render_verifier_output(verification: &VerificationResult) -> String {
    let mut out = verification.failure_summary();
    for diag in &verification.structured_errors {
        out.push('\n');
        match diag.line {
            Some(line) => out.push_str(&format!("{}:{}: {}", diag.path, line, diag.message)),
            None => out.push_str(&diag.message),
        }
    }
    out
}

fn apply_strategy(
    engine: &Engine,
    strategy: StrategyCode,
    task: &TaskNode,
    all: &[TaskNode],
    analysis: &analyzer::Analysis,
    verification: &VerificationResult,
) -> Result<()> {
    match strategy {
        StrategyCode::A => {
            let content = patch_file(engine, task, analysis, verification, String::new())?;
            engine.write_generated(&task.file, &content)
        }
        StrategyCode::B => {
            // Deep analysis: dependents' context rides along, and a
            // flagged dependency gets patched first.
            if analysis.is_dependency_issue {
                if let Some(dep) = first_dependency(task, all) {
                    let dep_content = workspace::read_file(&engine.root, &dep.file)
                        .unwrap_or_default();
                    let session = engine.role_session(Role::Coder)?;
                    let patched = coder::patch(
                        &session,
                        &coder::PatchContext {
                            file_path: dep.file.clone(),
                            current_content: dep_content,
                            error: format!(
                                "dependent file {} fails verification: {}",
                                task.file, analysis.root_cause
                            ),
                            guidance: analysis.fix_strategy.clone(),
                            architecture: engine.architecture(),
                            reverse_context: String::new(),
                        },
                    )?;
                    if !patched.trim().is_empty() {
                        engine.write_generated(&dep.file, &patched)?;
                    }
                }
            }
            let reverse = {
                let memory = engine.memory.read().expect("memory lock");
                memory.reverse_dependency_context(&engine.root, task, all)
            };
            let content = patch_file(engine, task, analysis, verification, reverse)?;
            engine.write_generated(&task.file, &content)
        }
        StrategyCode::C => regenerate(engine, task, all, String::new()),
        StrategyCode::D => regenerate(
            engine,
            task,
            all,
            "Produce the simplest version of this file that runs correctly. \
             Prefer fewer features over broken features; mark anything you \
             leave out with a TODO comment."
                .to_string(),
        ),
        StrategyCode::E => {
            let query = research_query(task, verification);
            let guidance = engine.research.research(&query).unwrap_or_else(|| {
                "No external guidance available; reason from the failure log.".to_string()
            });
            regenerate(engine, task, all, format!("Retrieved guidance:\n{guidance}"))
        }
    }
}

fn patch_file(
    engine: &Engine,
    task: &TaskNode,
    analysis: &analyzer::Analysis,
    verification: &VerificationResult,
    reverse_context: String,
) -> Result<String> {
    let session = engine.role_session(Role::Coder)?;
    coder::patch(
        &session,
        &coder::PatchContext {
            file_path: task.file.clone(),
            current_content: workspace::read_file(&engine.root, &task.file).unwrap_or_default(),
            error: render_verifier_output(verification),
            guidance: analysis.fix_strategy.clone(),
            architecture: engine.architecture(),
            reverse_context,
        },
    )
}

/// Full regeneration (strategies C, D, E) with the failure log in view.
fn regenerate(engine: &Engine, task: &TaskNode, all: &[TaskNode], extra: String) -> Result<()> {
    let session = engine.role_session(Role::Coder)?;
    let ctx = engine.generate_context(task, all, extra);
    let content = coder::generate(&session, &ctx)?;
    if content.trim().is_empty() {
        engine.events.record(
            EventCode::ParseEmpty,
            format!("regeneration of {} produced no content", task.file),
        );
        return Ok(());
    }
    engine.write_generated(&task.file, &content)
}

fn first_dependency<'a>(task: &TaskNode, all: &'a [TaskNode]) -> Option<&'a TaskNode> {
    task.depends_on
        .iter()
        .find_map(|id| all.iter().find(|t| t.id == *id))
}

/// Classify the error for the research provider.
fn research_query(task: &TaskNode, verification: &VerificationResult) -> String {
    match verification.structured_errors.first() {
        Some(diag) => format!(
            "{:?} error in {}: {}",
            diag.category, task.file, diag.message
        ),
        None => format!(
            "build error in {}: {}",
            task.file,
            verification.failure_summary()
        ),
    }
}
