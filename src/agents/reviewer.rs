//! Reviewer: critiques generated files before they ever execute.

use anyhow::{Context, Result};
use minijinja::context;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::agents::{extract_json, render_prompt, RoleSession};
use crate::core::types::{ChatMessage, Severity};

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ReviewIssue {
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Review {
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
    #[serde(default)]
    pub summary: String,
}

impl Review {
    /// A review with only info-grade issues counts as approved.
    pub fn effectively_approved(&self) -> bool {
        self.approved
            || self
                .issues
                .iter()
                .all(|issue| issue.severity == Severity::Info)
    }

    /// Critical and warning issues, formatted for the patch prompt.
    pub fn actionable_feedback(&self) -> String {
        self.issues
            .iter()
            .filter(|issue| issue.severity != Severity::Info)
            .map(|issue| format!("- [{:?}] {}", issue.severity, issue.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Review one generated file. Unparseable reviewer output falls back to
/// approval: a broken critic must not block the pipeline.
#[instrument(skip_all, fields(file = file_path))]
pub fn review(
    session: &RoleSession<'_>,
    file_path: &str,
    purpose: &str,
    content: &str,
    architecture: &str,
) -> Result<Review> {
    if content.trim().is_empty() {
        return Ok(Review {
            approved: false,
            issues: vec![ReviewIssue {
                severity: Severity::Critical,
                description: "file is empty".to_string(),
            }],
            summary: "empty file".to_string(),
        });
    }

    let prompt = render_prompt(
        "reviewer",
        context! {
            architecture => architecture,
            file_path => file_path,
            purpose => purpose,
            content => content,
        },
    )?;
    let outcome = session
        .call(vec![ChatMessage::user(prompt)])
        .context("reviewer call")?;

    let review = extract_json::<Review>(&outcome.text).unwrap_or_else(|_| Review {
        approved: true,
        issues: Vec::new(),
        summary: "unparseable review, assuming approval".to_string(),
    });
    debug!(
        approved = review.effectively_approved(),
        issues = review.issues.len(),
        "review complete"
    );
    Ok(review)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_only_issues_count_as_approved() {
        let review = Review {
            approved: false,
            issues: vec![ReviewIssue {
                severity: Severity::Info,
                description: "could use a docstring".to_string(),
            }],
            summary: String::new(),
        };
        assert!(review.effectively_approved());
    }

    #[test]
    fn warnings_block_approval_and_feed_back() {
        let review = Review {
            approved: false,
            issues: vec![
                ReviewIssue {
                    severity: Severity::Warning,
                    description: "unused import".to_string(),
                },
                ReviewIssue {
                    severity: Severity::Info,
                    description: "nit".to_string(),
                },
            ],
            summary: String::new(),
        };
        assert!(!review.effectively_approved());
        let feedback = review.actionable_feedback();
        assert!(feedback.contains("unused import"));
        assert!(!feedback.contains("nit"));
    }
}
