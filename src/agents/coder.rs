//! Coder: generates complete files and applies targeted patches.

use anyhow::{Context, Result};
use minijinja::context;
use tracing::{debug, instrument};

use crate::agents::{extract_file_body, render_prompt, RoleSession};
use crate::core::types::ChatMessage;

/// Everything the coder sees when generating a file: structured memory
/// slices, never raw dumps of other roles' conversations.
#[derive(Debug, Clone, Default)]
pub struct GenerateContext {
    pub file_path: String,
    pub description: String,
    pub architecture: String,
    pub file_index: String,
    pub spec_details: String,
    pub tech_stack: String,
    pub dependency_context: String,
    pub related_context: String,
    pub failure_log: String,
    pub extra_instructions: String,
}

/// Generate the complete contents of one file.
#[instrument(skip_all, fields(file = %ctx.file_path))]
pub fn generate(session: &RoleSession<'_>, ctx: &GenerateContext) -> Result<String> {
    let prompt = render_prompt(
        "coder_generate",
        context! {
            architecture => ctx.architecture,
            file_index => ctx.file_index,
            spec_details => ctx.spec_details,
            tech_stack => non_empty(&ctx.tech_stack),
            dependency_context => non_empty(&ctx.dependency_context),
            related_context => non_empty(&ctx.related_context),
            failure_log => non_empty(&ctx.failure_log),
            extra_instructions => non_empty(&ctx.extra_instructions),
            file_path => ctx.file_path,
            description => ctx.description,
        },
    )?;
    let outcome = session
        .call(vec![ChatMessage::user(prompt)])
        .context("coder generate call")?;
    let body = extract_file_body(&outcome.text);
    debug!(bytes = body.len(), interrupted = outcome.interrupted, "generated file body");
    Ok(body)
}

#[derive(Debug, Clone, Default)]
pub struct PatchContext {
    pub file_path: String,
    pub current_content: String,
    pub error: String,
    pub guidance: String,
    pub architecture: String,
    pub reverse_context: String,
}

/// Apply a minimal fix, returning the full replacement content.
#[instrument(skip_all, fields(file = %ctx.file_path))]
pub fn patch(session: &RoleSession<'_>, ctx: &PatchContext) -> Result<String> {
    let prompt = render_prompt(
        "coder_patch",
        context! {
            architecture => ctx.architecture,
            file_path => ctx.file_path,
            current_content => ctx.current_content,
            error => ctx.error,
            guidance => if ctx.guidance.trim().is_empty() {
                "(no analyzer guidance)"
            } else {
                ctx.guidance.as_str()
            },
            reverse_context => non_empty(&ctx.reverse_context),
        },
    )?;
    let outcome = session
        .call(vec![ChatMessage::user(prompt)])
        .context("coder patch call")?;
    let body = extract_file_body(&outcome.text);
    debug!(bytes = body.len(), "patched file body");
    Ok(body)
}

fn non_empty(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
