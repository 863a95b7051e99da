//! Structured project memory.
//!
//! Replaces raw context dumps with sliced knowledge: an architecture
//! summary, a file index, a dependency graph, a bounded failure log,
//! bounded per-role histories, and an optional embedding index. Roles
//! receive only their contractual slice; no role ever sees another
//! role's conversation.
//!
//! Memory holds file *hashes*, not contents. Context slices re-read
//! files from disk, so nothing cached survives a verification boundary.

pub mod embedding;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::dag::{FileIndexEntry, Plan, SpecSlots, TaskNode};
use crate::core::types::{truncate, ChatMessage, FailureRecord, Role};
use crate::io::workspace;
use crate::memory::embedding::EmbeddingIndex;

/// Max characters of any single file injected into a prompt slice.
pub const MAX_FILE_READ_CHARS: usize = 12_000;

/// Related files retrieved per coder call when embeddings are available.
pub const RELATED_TOP_K: usize = 3;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Memory {
    pub architecture_summary: String,
    pub tech_stack: Vec<String>,
    pub file_index: Vec<FileIndexEntry>,
    pub spec_slots: SpecSlots,
    /// path → content hash of the last write this session observed.
    pub file_hashes: BTreeMap<String, String>,
    pub dependency_graph: BTreeMap<String, Vec<String>>,
    failure_log: Vec<FailureRecord>,
    histories: HashMap<Role, Vec<ChatMessage>>,
    pub embeddings: EmbeddingIndex,
    /// Bounds applied on append.
    pub history_limit: usize,
    pub failure_log_limit: usize,
}

impl Memory {
    pub fn new(history_limit: usize, failure_log_limit: usize) -> Self {
        Self {
            history_limit,
            failure_log_limit,
            ..Self::default()
        }
    }

    /// Adopt a plan: architecture, stack, file index, and spec slots.
    pub fn adopt_plan(&mut self, plan: &Plan) {
        self.architecture_summary = plan.architecture_summary.clone();
        self.tech_stack = plan.tech_stack.clone();
        self.file_index = plan.file_index.clone();
        self.spec_slots = plan.spec_slots.clone();
    }

    /// Seed memory from a scanned existing project.
    pub fn adopt_scan(
        &mut self,
        summary: String,
        index: Vec<FileIndexEntry>,
        graph: BTreeMap<String, Vec<String>>,
    ) {
        self.architecture_summary = summary;
        self.file_index = index;
        self.dependency_graph = graph;
    }

    pub fn record_file(&mut self, path: &str, content_hash: String) {
        self.file_hashes.insert(path.to_string(), content_hash);
    }

    pub fn file_hash(&self, path: &str) -> Option<&str> {
        self.file_hashes.get(path).map(String::as_str)
    }

    /// Append a failure record, trimming this task's oldest entries past
    /// the bound. The log is append-only within a session otherwise.
    pub fn record_failure(&mut self, record: FailureRecord) {
        let task_id = record.task_id;
        self.failure_log.push(record);
        let per_task: Vec<usize> = self
            .failure_log
            .iter()
            .enumerate()
            .filter(|(_, r)| r.task_id == task_id)
            .map(|(i, _)| i)
            .collect();
        if per_task.len() > self.failure_log_limit {
            let drop = per_task.len() - self.failure_log_limit;
            for index in per_task.into_iter().take(drop).rev() {
                self.failure_log.remove(index);
            }
        }
    }

    pub fn failure_log(&self) -> &[FailureRecord] {
        &self.failure_log
    }

    pub fn failures_for(&self, task_id: u32) -> Vec<&FailureRecord> {
        self.failure_log
            .iter()
            .filter(|r| r.task_id == task_id)
            .collect()
    }

    pub fn restore_failure_log(&mut self, log: Vec<FailureRecord>) {
        self.failure_log = log;
    }

    /// Append to a role's history, trimming oldest-first past the bound.
    pub fn push_history(&mut self, role: Role, message: ChatMessage) {
        let history = self.histories.entry(role).or_default();
        history.push(message);
        while history.len() > self.history_limit {
            history.remove(0);
        }
    }

    pub fn history(&self, role: Role) -> &[ChatMessage] {
        self.histories.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn clear_history(&mut self, role: Role) {
        self.histories.remove(&role);
    }

    pub fn histories(&self) -> &HashMap<Role, Vec<ChatMessage>> {
        &self.histories
    }

    pub fn restore_histories(&mut self, histories: HashMap<Role, Vec<ChatMessage>>) {
        self.histories = histories;
    }

    // ── Formatting for prompt injection ────────────────────────────

    pub fn architecture(&self) -> String {
        if self.architecture_summary.trim().is_empty() {
            "(no architecture defined)".to_string()
        } else {
            self.architecture_summary.clone()
        }
    }

    pub fn file_index_text(&self) -> String {
        if self.file_index.is_empty() {
            return "(empty)".to_string();
        }
        self.file_index
            .iter()
            .map(|e| format!("- `{}`: {}", e.path, e.purpose))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Render the planner's formal spec slots for the coder prompt.
    pub fn spec_details_text(&self) -> String {
        if self.spec_slots.is_empty() {
            return "(simple project, no formal spec)".to_string();
        }
        let mut parts = Vec::new();
        if let Some(schema) = &self.spec_slots.database_schema {
            parts.push(format!(
                "### Database Schema\n{}",
                serde_json::to_string_pretty(schema).unwrap_or_default()
            ));
        }
        if let Some(api) = &self.spec_slots.api_surface {
            parts.push(format!(
                "### API Surface\n{}",
                serde_json::to_string_pretty(api).unwrap_or_default()
            ));
        }
        if let Some(auth) = &self.spec_slots.auth_flow {
            if auth != "none" {
                parts.push(format!("### Auth Flow\n{auth}"));
            }
        }
        if let Some(deploy) = &self.spec_slots.deployment {
            parts.push(format!("### Deployment\n{deploy}"));
        }
        parts.join("\n\n")
    }

    pub fn failure_log_text(&self, task_id: Option<u32>) -> String {
        let entries: Vec<&FailureRecord> = match task_id {
            Some(id) => self.failures_for(id),
            None => self.failure_log.iter().collect(),
        };
        if entries.is_empty() {
            return "(no previous failures)".to_string();
        }
        entries
            .iter()
            .rev()
            .take(5)
            .rev()
            .map(|r| {
                format!(
                    "- task {} attempt {} [{}]: {}",
                    r.task_id,
                    r.attempt,
                    r.strategy,
                    truncate(&r.verifier_excerpt, 120)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Contents of the files `file` imports, read fresh from disk.
    pub fn dependency_context(&self, root: &Path, file: &str) -> String {
        let deps = self
            .dependency_graph
            .get(file)
            .cloned()
            .unwrap_or_default();
        self.file_context(root, &deps)
    }

    /// Contents of the files a task's dependencies produced.
    pub fn task_dependency_context(&self, root: &Path, task: &TaskNode, all: &[TaskNode]) -> String {
        let paths: Vec<String> = task
            .depends_on
            .iter()
            .filter_map(|id| all.iter().find(|t| t.id == *id))
            .map(|t| t.file.clone())
            .collect();
        self.file_context(root, &paths)
    }

    /// Tasks whose dependency lists include `task`, with their files.
    /// Used by the deep-analysis fix strategy.
    pub fn reverse_dependency_context(
        &self,
        root: &Path,
        task: &TaskNode,
        all: &[TaskNode],
    ) -> String {
        let paths: Vec<String> = all
            .iter()
            .filter(|t| t.depends_on.contains(&task.id))
            .map(|t| t.file.clone())
            .collect();
        self.file_context(root, &paths)
    }

    /// Formatted contents of specific files, sliced and bounded.
    pub fn file_context(&self, root: &Path, paths: &[String]) -> String {
        let mut parts = Vec::new();
        for path in paths {
            let Ok(content) = workspace::read_file(root, path) else {
                continue;
            };
            let shown = truncate(&content, MAX_FILE_READ_CHARS);
            parts.push(format!("### {path}\n```\n{shown}\n```"));
        }
        if parts.is_empty() {
            "(no existing files)".to_string()
        } else {
            parts.join("\n\n")
        }
    }

    /// Top-k semantically related files for a query vector, rendered for
    /// prompt injection. Empty without an embedding index.
    pub fn related_context(
        &self,
        root: &Path,
        query_vector: &[f32],
        exclude: &[&str],
    ) -> String {
        let related = self
            .embeddings
            .retrieve(query_vector, RELATED_TOP_K, exclude);
        if related.is_empty() {
            return String::new();
        }
        debug!(count = related.len(), "retrieved related files");
        self.file_context(root, &related)
    }
}

/// Architecture summary for a scanned project, built without a model.
pub fn summarize_scan(name: &str, tech_stack: &[String], index: &[FileIndexEntry]) -> String {
    let mut summary = format!("{name} is an existing project");
    if !tech_stack.is_empty() {
        let shown: Vec<&str> = tech_stack.iter().take(5).map(String::as_str).collect();
        summary.push_str(&format!(" using {}", shown.join(", ")));
    }
    summary.push('.');

    let mut dirs: BTreeMap<String, usize> = BTreeMap::new();
    for entry in index {
        let dir = Path::new(&entry.path)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "(root)".to_string());
        *dirs.entry(dir).or_default() += 1;
    }
    if !dirs.is_empty() {
        let mut counted: Vec<(String, usize)> = dirs.into_iter().collect();
        counted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let shown: Vec<String> = counted
            .into_iter()
            .take(5)
            .map(|(dir, count)| format!("{dir} ({count} files)"))
            .collect();
        summary.push_str(&format!(" Structure: {}.", shown.join(", ")));
    }
    summary
}
