//! Analyzer: distills verifier output into an actionable diagnosis.

use anyhow::{Context, Result};
use minijinja::context;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::agents::{extract_json, render_prompt, strip_think, RoleSession};
use crate::core::types::{truncate, ChatMessage, StrategyCode};

#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
pub struct Analysis {
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub fix_strategy: String,
    #[serde(default)]
    pub is_dependency_issue: bool,
    /// Strategy codes that already failed on this error and must not be
    /// selected again.
    #[serde(default)]
    pub forbid_strategies: Vec<StrategyCode>,
}

/// Inputs for one analysis call: the analyzer's contractual slice.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeContext {
    pub file_path: String,
    pub file_content: String,
    pub error_output: String,
    pub previous_fixes: String,
    pub architecture: String,
    /// Operator hint from a guided-fix escalation.
    pub hint: String,
}

/// Analyze a failure. Unparseable analyzer output degrades to a raw-text
/// diagnosis so the fix loop always has something to apply.
#[instrument(skip_all, fields(file = %ctx.file_path))]
pub fn analyze(session: &RoleSession<'_>, ctx: &AnalyzeContext) -> Result<Analysis> {
    let prompt = render_prompt(
        "analyzer",
        context! {
            architecture => ctx.architecture,
            file_path => ctx.file_path,
            file_content => truncate(&ctx.file_content, 8_000),
            error_output => tail(&ctx.error_output, 2_000),
            previous_fixes => ctx.previous_fixes,
            hint => {
                let trimmed = ctx.hint.trim();
                (!trimmed.is_empty()).then_some(trimmed)
            },
        },
    )?;
    let outcome = session
        .call(vec![ChatMessage::user(prompt)])
        .context("analyzer call")?;

    let analysis = extract_json::<Analysis>(&outcome.text).unwrap_or_else(|_| Analysis {
        root_cause: "could not parse analysis".to_string(),
        fix_strategy: truncate(&strip_think(&outcome.text), 500),
        is_dependency_issue: false,
        forbid_strategies: Vec::new(),
    });
    debug!(
        dependency_issue = analysis.is_dependency_issue,
        forbidden = analysis.forbid_strategies.len(),
        "analysis complete"
    );
    Ok(analysis)
}

/// Last `max_chars` of the error output; the tail carries the message.
fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}
