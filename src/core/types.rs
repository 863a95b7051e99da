//! Shared contract types for the engine.
//!
//! These types define stable contracts between components. They must remain
//! deterministic and serializable; anything touching I/O lives under `io`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Hard ceiling on per-task fix attempts before escalation.
pub const MAX_TASK_FAILURES: u32 = 8;

/// Further attempts granted by a guided-fix escalation decision.
pub const GUIDED_FIX_ATTEMPTS: u32 = 3;

/// Review → patch → re-review rounds permitted before verification.
pub const MAX_REVIEW_ROUNDS: u32 = 2;

/// Request complexity, as classified from the prompt and workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Heavy,
}

impl Complexity {
    pub fn as_str(self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Heavy => "heavy",
        }
    }

    /// One step down, clamped at `Simple`. Used by router degradation.
    pub fn degrade(self) -> Option<Complexity> {
        match self {
            Complexity::Heavy => Some(Complexity::Medium),
            Complexity::Medium => Some(Complexity::Simple),
            Complexity::Simple => None,
        }
    }
}

/// Project size, as classified from the prompt and workspace file count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Small,
    Medium,
    Large,
}

impl SizeClass {
    pub fn as_str(self) -> &'static str {
        match self {
            SizeClass::Small => "small",
            SizeClass::Medium => "medium",
            SizeClass::Large => "large",
        }
    }

    pub fn degrade(self) -> Option<SizeClass> {
        match self {
            SizeClass::Large => Some(SizeClass::Medium),
            SizeClass::Medium => Some(SizeClass::Small),
            SizeClass::Small => None,
        }
    }

    /// Context-window multiplier applied to a model's declared default.
    pub fn context_scale(self) -> f32 {
        match self {
            SizeClass::Small => 1.0,
            SizeClass::Medium => 1.5,
            SizeClass::Large => 2.0,
        }
    }
}

/// A named behavior: prompt template + sampling profile + output schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Planner,
    Coder,
    Reviewer,
    Analyzer,
    Agentic,
    Chat,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Planner => "planner",
            Role::Coder => "coder",
            Role::Reviewer => "reviewer",
            Role::Analyzer => "analyzer",
            Role::Agentic => "agentic",
            Role::Chat => "chat",
        }
    }
}

/// Task lifecycle states. Transitions are owned by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Generated,
    Reviewing,
    Reviewed,
    NeedsFix,
    Verified,
    Failed,
    Skipped,
}

impl TaskStatus {
    /// Terminal states never transition again within a session.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Verified | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

/// Fix strategy codes, applied in escalating bands by attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyCode {
    /// Targeted patch from the analyzer's diagnosis.
    A,
    /// Deep analysis with reverse-dependency context.
    B,
    /// Full regeneration with the failure log as context.
    C,
    /// Simplification: minimal version that prioritizes compiling.
    D,
    /// Research: classify the error and regenerate with retrieved guidance.
    E,
}

impl fmt::Display for StrategyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            StrategyCode::A => "A",
            StrategyCode::B => "B",
            StrategyCode::C => "C",
            StrategyCode::D => "D",
            StrategyCode::E => "E",
        };
        f.write_str(c)
    }
}

/// What a fix attempt did to the verifier outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixOutcome {
    Fixed,
    Unchanged,
    Regressed,
}

/// Reviewer issue severity. Info-only reviews count as approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

/// One append-only entry in the per-task failure log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub task_id: u32,
    pub attempt: u32,
    /// Trailing excerpt of the verifier output that triggered the fix.
    pub verifier_excerpt: String,
    /// Analyzer root-cause diagnosis, if one was produced.
    pub diagnosis: String,
    pub strategy: StrategyCode,
    pub outcome: FixOutcome,
}

/// Diagnostic category extracted from verifier output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Syntax,
    Lint,
    Import,
    Type,
    Runtime,
}

/// A single file/line diagnostic parsed from verifier output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub path: String,
    pub line: Option<u32>,
    pub category: ErrorCategory,
    pub message: String,
}

/// One named verification check and its outcome, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

/// Aggregated result of verifying a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub passed: bool,
    pub checks: Vec<Check>,
    pub structured_errors: Vec<Diagnostic>,
}

impl VerificationResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            checks: Vec::new(),
            structured_errors: Vec::new(),
        }
    }

    /// One-line-per-check summary of everything that failed.
    pub fn failure_summary(&self) -> String {
        let failed: Vec<String> = self
            .checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| format!("{}: {}", c.name, truncate(&c.detail, 200)))
            .collect();
        if failed.is_empty() {
            "all checks passed".to_string()
        } else {
            failed.join("; ")
        }
    }
}

/// A chat message in model-server wire order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Decision returned by an escalation handler after the fix loop exhausts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationDecision {
    /// Restart the fix loop with the counter reset.
    Retry,
    /// Restart with a user-provided hint injected into the analyzer context.
    GuidedFix(String),
    /// Give up on this task; independent branches continue.
    Skip,
    /// Stop the build, leaving the task non-terminal for a later resume.
    Pause,
}

/// Cooperative cancellation shared across streams, subprocesses, and waves.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Truncate to a character boundary, appending an ellipsis when cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_cover_verified_failed_skipped() {
        assert!(TaskStatus::Verified.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Skipped.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::NeedsFix.is_terminal());
    }

    #[test]
    fn complexity_degrades_toward_simple() {
        assert_eq!(Complexity::Heavy.degrade(), Some(Complexity::Medium));
        assert_eq!(Complexity::Medium.degrade(), Some(Complexity::Simple));
        assert_eq!(Complexity::Simple.degrade(), None);
    }

    #[test]
    fn context_scale_matches_size() {
        assert_eq!(SizeClass::Small.context_scale(), 1.0);
        assert_eq!(SizeClass::Medium.context_scale(), 1.5);
        assert_eq!(SizeClass::Large.context_scale(), 2.0);
    }

    #[test]
    fn cancel_token_flips_once() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        let clone = token.clone();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn truncate_keeps_short_strings() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("0123456789abc", 10), "0123456789…");
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::NeedsFix).expect("serialize");
        assert_eq!(json, "\"needs_fix\"");
        let json = serde_json::to_string(&TaskStatus::InProgress).expect("serialize");
        assert_eq!(json, "\"in_progress\"");
    }
}
