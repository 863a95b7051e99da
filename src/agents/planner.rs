//! Planner: turns a request into an architecture and a task DAG.

use anyhow::{Context, Result};
use minijinja::context;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::agents::{extract_json, render_prompt, RoleSession};
use crate::core::dag::{FileIndexEntry, Plan, SpecSlots, TaskNode};
use crate::core::types::ChatMessage;

/// Ask the planner for a fresh plan.
#[instrument(skip_all)]
pub fn create_plan(
    session: &RoleSession<'_>,
    request: &str,
    research_brief: Option<&str>,
) -> Result<Plan> {
    let system = render_prompt(
        "planner",
        context! { refine => false, failure_log => "", architecture => "" },
    )?;
    let mut user = request.to_string();
    if let Some(brief) = research_brief {
        user.push_str("\n\n## Research Brief\n");
        user.push_str(brief);
    }
    let outcome = session
        .call(vec![ChatMessage::system(system), ChatMessage::user(user)])
        .context("planner call")?;
    let plan = parse_plan(&outcome.text)?;
    debug!(tasks = plan.tasks.len(), "plan created");
    Ok(plan)
}

/// Ask the planner to revise its plan after accumulated failures.
#[instrument(skip_all)]
pub fn refine_plan(
    session: &RoleSession<'_>,
    request: &str,
    failure_log: &str,
    architecture: &str,
) -> Result<Plan> {
    let system = render_prompt(
        "planner",
        context! {
            refine => true,
            failure_log => failure_log,
            architecture => architecture,
        },
    )?;
    let outcome = session
        .call(vec![
            ChatMessage::system(system),
            ChatMessage::user(request.to_string()),
        ])
        .context("planner refine call")?;
    parse_plan(&outcome.text)
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    project_name: String,
    #[serde(default)]
    architecture_summary: String,
    #[serde(default)]
    tech_stack: Vec<String>,
    #[serde(default)]
    file_index: serde_json::Value,
    #[serde(default)]
    database_schema: Option<serde_json::Value>,
    #[serde(default)]
    api_surface: Option<serde_json::Value>,
    #[serde(default)]
    auth_flow: Option<String>,
    #[serde(default)]
    deployment: Option<String>,
    #[serde(default)]
    tasks: Vec<RawTask>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    id: u32,
    file: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    depends_on: Vec<u32>,
}

/// Parse planner output into a [`Plan`]. Reasoning traces are stripped
/// before parsing; the file index tolerates both the array form the
/// prompt asks for and the object form models sometimes emit.
pub fn parse_plan(text: &str) -> Result<Plan> {
    let raw: RawPlan = extract_json(text).context("parse plan json")?;

    let file_index = normalize_file_index(&raw.file_index);
    let tasks = raw
        .tasks
        .into_iter()
        .map(|t| {
            let mut node = TaskNode::new(t.id, t.file, t.description);
            node.depends_on = t.depends_on;
            node
        })
        .collect();

    Ok(Plan {
        project_name: raw.project_name,
        architecture_summary: raw.architecture_summary,
        tech_stack: raw.tech_stack,
        file_index,
        spec_slots: SpecSlots {
            database_schema: raw.database_schema,
            api_surface: raw.api_surface,
            auth_flow: raw.auth_flow,
            deployment: raw.deployment,
        },
        tasks,
    })
}

fn normalize_file_index(value: &serde_json::Value) -> Vec<FileIndexEntry> {
    match value {
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let path = item.get("path")?.as_str()?.to_string();
                let purpose = item
                    .get("purpose")
                    .and_then(|p| p.as_str())
                    .unwrap_or_default()
                    .to_string();
                Some(FileIndexEntry { path, purpose })
            })
            .collect(),
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(path, purpose)| FileIndexEntry {
                path: path.clone(),
                purpose: purpose.as_str().unwrap_or_default().to_string(),
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN_JSON: &str = r#"{
        "project_name": "linkup",
        "architecture_summary": "A matching service with an API and a data layer.",
        "tech_stack": ["Python", "Flask"],
        "file_index": [
            {"path": "models.py", "purpose": "Data models"},
            {"path": "app.py", "purpose": "API entry point"}
        ],
        "auth_flow": "JWT sessions",
        "tasks": [
            {"id": 1, "file": "models.py", "description": "define models", "depends_on": []},
            {"id": 2, "file": "app.py", "description": "wire endpoints", "depends_on": [1]}
        ]
    }"#;

    #[test]
    fn parses_full_plan() {
        let plan = parse_plan(PLAN_JSON).expect("parse");
        assert_eq!(plan.project_name, "linkup");
        assert_eq!(plan.tech_stack, vec!["Python", "Flask"]);
        assert_eq!(plan.file_index.len(), 2);
        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.tasks[1].depends_on, vec![1]);
        assert_eq!(plan.spec_slots.auth_flow.as_deref(), Some("JWT sessions"));
        assert!(plan.spec_slots.database_schema.is_none());
    }

    #[test]
    fn parses_plan_wrapped_in_reasoning_and_fence() {
        let text = format!("<think>planning...</think>\n```json\n{PLAN_JSON}\n```");
        let plan = parse_plan(&text).expect("parse");
        assert_eq!(plan.tasks.len(), 2);
    }

    #[test]
    fn file_index_object_form_is_accepted() {
        let text = r#"{"tasks": [], "file_index": {"a.py": "entry", "b.py": "helpers"}}"#;
        let plan = parse_plan(text).expect("parse");
        assert_eq!(plan.file_index.len(), 2);
        assert_eq!(plan.file_index[0].path, "a.py");
    }

    #[test]
    fn garbage_output_is_an_error() {
        assert!(parse_plan("I could not produce a plan, sorry.").is_err());
    }
}
