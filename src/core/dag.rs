//! Task DAG: nodes, plan structure, wave scheduling, and invariants.
//!
//! Tasks reference dependencies by integer id only; there are no pointer
//! cycles to manage. Cycles and duplicate file paths are rejected when a
//! plan is loaded, before any model call is spent on it.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::core::types::{TaskStatus, MAX_TASK_FAILURES};

/// A single file-generation task in the DAG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: u32,
    /// Workspace-relative path this task produces.
    pub file: String,
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<u32>,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default)]
    pub error_summary: String,
    #[serde(default)]
    pub review_feedback: String,
}

fn default_status() -> TaskStatus {
    TaskStatus::Pending
}

impl TaskNode {
    pub fn new(id: u32, file: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            file: file.into(),
            description: description.into(),
            depends_on: Vec::new(),
            status: TaskStatus::Pending,
            failure_count: 0,
            error_summary: String::new(),
            review_feedback: String::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// One entry of the ordered file index: path → one-line purpose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIndexEntry {
    pub path: String,
    pub purpose: String,
}

/// Formal spec slots the planner fills for non-trivial requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SpecSlots {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_schema: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_surface: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_flow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,
}

impl SpecSlots {
    pub fn is_empty(&self) -> bool {
        self.database_schema.is_none()
            && self.api_surface.is_none()
            && self.auth_flow.is_none()
            && self.deployment.is_none()
    }
}

/// The planner's output: architecture, stack, file index, and the task DAG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Plan {
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub architecture_summary: String,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub file_index: Vec<FileIndexEntry>,
    #[serde(default)]
    pub spec_slots: SpecSlots,
    #[serde(default)]
    pub tasks: Vec<TaskNode>,
}

/// Check plan invariants: unique ids, unique file paths, known dependency
/// ids, no self-dependencies, bounded failure counters, acyclic graph.
pub fn validate_plan(tasks: &[TaskNode]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut ids = HashSet::new();
    let mut paths = HashSet::new();
    let known: HashSet<u32> = tasks.iter().map(|t| t.id).collect();

    for task in tasks {
        if !ids.insert(task.id) {
            errors.push(format!("duplicate task id {}", task.id));
        }
        if task.file.trim().is_empty() {
            errors.push(format!("task {} has an empty file path", task.id));
        } else if !paths.insert(task.file.clone()) {
            errors.push(format!("duplicate file path '{}'", task.file));
        }
        if task.failure_count > MAX_TASK_FAILURES {
            errors.push(format!(
                "task {} failure_count {} exceeds {}",
                task.id, task.failure_count, MAX_TASK_FAILURES
            ));
        }
        for dep in &task.depends_on {
            if *dep == task.id {
                errors.push(format!("task {} depends on itself", task.id));
            } else if !known.contains(dep) {
                errors.push(format!("task {} depends on unknown id {}", task.id, dep));
            }
        }
    }

    if errors.is_empty() {
        if let Err(cycle) = compute_waves(tasks) {
            errors.push(cycle);
        }
    }
    errors
}

/// Layer the DAG into execution waves via breadth-first topological sort.
///
/// Wave 0 holds tasks with no dependencies; wave N holds tasks whose
/// dependencies all live in earlier waves. Errors on a cycle, naming the
/// unreachable task ids.
pub fn compute_waves(tasks: &[TaskNode]) -> Result<Vec<Vec<u32>>, String> {
    if tasks.is_empty() {
        return Ok(Vec::new());
    }

    let known: HashSet<u32> = tasks.iter().map(|t| t.id).collect();
    let mut in_degree: HashMap<u32, usize> = tasks.iter().map(|t| (t.id, 0)).collect();
    let mut dependents: HashMap<u32, Vec<u32>> = HashMap::new();

    for task in tasks {
        for dep in &task.depends_on {
            if known.contains(dep) {
                *in_degree.entry(task.id).or_default() += 1;
                dependents.entry(*dep).or_default().push(task.id);
            }
        }
    }

    let mut queue: VecDeque<u32> = tasks
        .iter()
        .filter(|t| in_degree[&t.id] == 0)
        .map(|t| t.id)
        .collect();

    let mut waves = Vec::new();
    let mut placed = 0usize;
    while !queue.is_empty() {
        let wave: Vec<u32> = queue.drain(..).collect();
        placed += wave.len();
        for id in &wave {
            for child in dependents.get(id).into_iter().flatten() {
                let degree = in_degree.get_mut(child).expect("known id");
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*child);
                }
            }
        }
        waves.push(wave);
    }

    if placed < tasks.len() {
        let reached: HashSet<u32> = waves.iter().flatten().copied().collect();
        let mut unreached: Vec<u32> = tasks
            .iter()
            .map(|t| t.id)
            .filter(|id| !reached.contains(id))
            .collect();
        unreached.sort_unstable();
        return Err(format!(
            "cycle detected in task graph, unreachable tasks: {unreached:?}"
        ));
    }
    Ok(waves)
}

/// Tasks ready to run now: PENDING with every dependency VERIFIED.
pub fn ready_set(tasks: &[TaskNode]) -> Vec<u32> {
    let verified: HashSet<u32> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Verified)
        .map(|t| t.id)
        .collect();
    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending)
        .filter(|t| t.depends_on.iter().all(|d| verified.contains(d)))
        .map(|t| t.id)
        .collect()
}

/// True once every task has reached a terminal state.
pub fn all_terminal(tasks: &[TaskNode]) -> bool {
    tasks.iter().all(TaskNode::is_terminal)
}

/// Compact status counts for progress display and session summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DagStats {
    pub total: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub verified: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub fn stats(tasks: &[TaskNode]) -> DagStats {
    let mut stats = DagStats {
        total: tasks.len(),
        ..DagStats::default()
    };
    for task in tasks {
        match task.status {
            TaskStatus::Pending => stats.pending += 1,
            TaskStatus::Verified => stats.verified += 1,
            TaskStatus::Failed => stats.failed += 1,
            TaskStatus::Skipped => stats.skipped += 1,
            _ => stats.in_flight += 1,
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{task, task_with_deps};

    #[test]
    fn waves_layer_by_dependency_depth() {
        let tasks = vec![
            task(1, "models.py"),
            task_with_deps(2, "api.py", &[1]),
            task_with_deps(3, "app.py", &[1, 2]),
            task(4, "readme.md"),
        ];
        let waves = compute_waves(&tasks).expect("acyclic");
        assert_eq!(waves, vec![vec![1, 4], vec![2], vec![3]]);
    }

    #[test]
    fn cycle_is_reported_with_unreachable_ids() {
        let mut a = task_with_deps(1, "a.py", &[2]);
        let b = task_with_deps(2, "b.py", &[1]);
        a.depends_on = vec![2];
        let err = compute_waves(&[a, b]).expect_err("cycle");
        assert!(err.contains("cycle detected"));
        assert!(err.contains('1') && err.contains('2'));
    }

    #[test]
    fn validate_rejects_duplicate_paths() {
        let tasks = vec![task(1, "app.py"), task(2, "app.py")];
        let errors = validate_plan(&tasks);
        assert!(errors.iter().any(|e| e.contains("duplicate file path")));
    }

    #[test]
    fn validate_rejects_unknown_and_self_deps() {
        let tasks = vec![task_with_deps(1, "a.py", &[1]), task_with_deps(2, "b.py", &[9])];
        let errors = validate_plan(&tasks);
        assert!(errors.iter().any(|e| e.contains("depends on itself")));
        assert!(errors.iter().any(|e| e.contains("unknown id 9")));
    }

    #[test]
    fn ready_set_requires_verified_dependencies() {
        let mut tasks = vec![
            task(1, "models.py"),
            task_with_deps(2, "api.py", &[1]),
            task_with_deps(3, "ui.py", &[2]),
        ];
        assert_eq!(ready_set(&tasks), vec![1]);

        tasks[0].status = TaskStatus::Verified;
        assert_eq!(ready_set(&tasks), vec![2]);

        // A failed dependency never unblocks its dependents.
        tasks[1].status = TaskStatus::Failed;
        assert!(ready_set(&tasks).is_empty());
    }

    #[test]
    fn stats_count_by_bucket() {
        let mut tasks = vec![task(1, "a.py"), task(2, "b.py"), task(3, "c.py")];
        tasks[1].status = TaskStatus::Verified;
        tasks[2].status = TaskStatus::NeedsFix;
        let stats = stats(&tasks);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.verified, 1);
        assert_eq!(stats.in_flight, 1);
    }

    #[test]
    fn empty_plan_has_no_waves() {
        assert!(compute_waves(&[]).expect("empty").is_empty());
        assert!(all_terminal(&[]));
    }
}
