//! Session persistence: `<workspace>/.wright_session.json`.
//!
//! Saved after every successful wave and at clean shutdown. The file is
//! self-describing JSON with a version tag; sessions written by a newer
//! engine load read-only. Generation is not transactional, so tasks that
//! were in flight at save time downgrade to PENDING on resume.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::dag::Plan;
use crate::core::types::{Complexity, SizeClass, TaskStatus};
use crate::memory::Memory;

pub const SESSION_VERSION: u32 = 1;
pub const SESSION_FILE: &str = ".wright_session.json";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SessionState {
    pub version: u32,
    pub name: String,
    pub request: String,
    pub complexity: Option<Complexity>,
    pub size: Option<SizeClass>,
    pub created_at: String,
    pub saved_at: String,
    pub plan: Plan,
    pub memory: Memory,
}

impl SessionState {
    pub fn new(name: impl Into<String>, request: impl Into<String>) -> Self {
        Self {
            version: SESSION_VERSION,
            name: name.into(),
            request: request.into(),
            created_at: chrono::Utc::now().to_rfc3339(),
            ..Self::default()
        }
    }
}

/// A loaded session plus whether this engine may overwrite it.
#[derive(Debug, Clone)]
pub struct LoadedSession {
    pub state: SessionState,
    pub read_only: bool,
}

pub fn session_path(root: &Path) -> PathBuf {
    root.join(SESSION_FILE)
}

/// Atomically persist the session, stamping `saved_at`.
pub fn save_session(root: &Path, state: &SessionState) -> Result<()> {
    let mut state = state.clone();
    state.version = SESSION_VERSION;
    state.saved_at = chrono::Utc::now().to_rfc3339();

    let path = session_path(root);
    let mut payload = serde_json::to_string_pretty(&state).context("serialize session")?;
    payload.push('\n');

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &payload).with_context(|| format!("write temp {}", tmp.display()))?;
    std::fs::rename(&tmp, &path).with_context(|| format!("replace {}", path.display()))?;
    debug!(path = %path.display(), "session saved");
    Ok(())
}

/// Load the workspace session if one exists.
///
/// In-flight task statuses downgrade to PENDING. A session written by an
/// unknown (newer) engine version loads best-effort and read-only.
pub fn load_session(root: &Path) -> Result<Option<LoadedSession>> {
    let path = session_path(root);
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        std::fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let mut state: SessionState =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;

    let read_only = state.version > SESSION_VERSION;
    if read_only {
        warn!(
            version = state.version,
            supported = SESSION_VERSION,
            "session written by a newer engine, loading read-only"
        );
    }

    for task in &mut state.plan.tasks {
        if !task.status.is_terminal() && task.status != TaskStatus::Pending {
            debug!(task = task.id, from = ?task.status, "downgrading in-flight task");
            task.status = TaskStatus::Pending;
        }
    }

    Ok(Some(LoadedSession { state, read_only }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FixOutcome, StrategyCode};
    use crate::test_support::{task, task_with_deps};

    fn sample_state() -> SessionState {
        let mut state = SessionState::new("demo", "build a todo app");
        state.complexity = Some(Complexity::Medium);
        state.size = Some(SizeClass::Small);
        state.plan.tasks = vec![task(1, "models.py"), task_with_deps(2, "api.py", &[1])];
        state.plan.tasks[0].status = TaskStatus::Verified;
        state.memory = Memory::new(20, 5);
        state.memory.record_failure(crate::core::types::FailureRecord {
            task_id: 2,
            attempt: 1,
            verifier_excerpt: "SyntaxError".to_string(),
            diagnosis: "missing colon".to_string(),
            strategy: StrategyCode::A,
            outcome: FixOutcome::Unchanged,
        });
        state
    }

    #[test]
    fn save_then_load_round_trips_dag_and_failures() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = sample_state();
        save_session(temp.path(), &state).expect("save");

        let loaded = load_session(temp.path()).expect("load").expect("present");
        assert!(!loaded.read_only);
        assert_eq!(loaded.state.plan.tasks.len(), 2);
        assert_eq!(loaded.state.plan.tasks[0].status, TaskStatus::Verified);
        assert_eq!(loaded.state.plan.tasks[1].depends_on, vec![1]);
        assert_eq!(loaded.state.memory.failure_log().len(), 1);
        assert_eq!(loaded.state.memory.failure_log()[0].diagnosis, "missing colon");
    }

    #[test]
    fn in_flight_tasks_downgrade_to_pending() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut state = sample_state();
        state.plan.tasks[1].status = TaskStatus::InProgress;
        save_session(temp.path(), &state).expect("save");

        let loaded = load_session(temp.path()).expect("load").expect("present");
        assert_eq!(loaded.state.plan.tasks[1].status, TaskStatus::Pending);
        // Terminal statuses are untouched.
        assert_eq!(loaded.state.plan.tasks[0].status, TaskStatus::Verified);
    }

    #[test]
    fn missing_session_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(load_session(temp.path()).expect("load").is_none());
    }

    #[test]
    fn newer_version_loads_read_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        save_session(temp.path(), &sample_state()).expect("save");

        // Rewrite the version tag to simulate a newer engine's file.
        let path = session_path(temp.path());
        let contents = std::fs::read_to_string(&path).expect("read");
        let bumped = contents.replacen("\"version\": 1", "\"version\": 99", 1);
        std::fs::write(&path, bumped).expect("write");

        let loaded = load_session(temp.path()).expect("load").expect("present");
        assert!(loaded.read_only);
    }

    #[test]
    fn histories_survive_round_trip() {
        use crate::core::types::{ChatMessage, Role};
        let temp = tempfile::tempdir().expect("tempdir");
        let mut state = sample_state();
        state
            .memory
            .push_history(Role::Planner, ChatMessage::user("plan it"));
        save_session(temp.path(), &state).expect("save");

        let loaded = load_session(temp.path()).expect("load").expect("present");
        let history = loaded.state.memory.history(Role::Planner);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "plan it");
    }
}
