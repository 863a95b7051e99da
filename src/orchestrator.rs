//! The DAG orchestrator: classification, planning, wave scheduling, and
//! the per-task generate → review → verify → fix pipeline.
//!
//! The [`Engine`] owns every subordinate component; nothing lives in
//! module-level state. Ready tasks run in parallel up to the configured
//! fan-out; workers receive task clones and the orchestrator applies all
//! DAG mutations single-threaded between dispatches, so wave order never
//! changes the resulting statuses.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::thread;

use anyhow::{Context, Result};
use minijinja::context;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::agents::{coder, planner, render_prompt, reviewer, RoleSession};
use crate::core::classifier::{self, Classification};
use crate::core::dag::{self, DagStats, FileIndexEntry, Plan, TaskNode};
use crate::core::router::Router;
use crate::core::types::{
    truncate, CancelToken, ChatMessage, Check, Complexity, FailureRecord, Role, SizeClass,
    TaskStatus, VerificationResult, MAX_REVIEW_ROUNDS, MAX_TASK_FAILURES,
};
use crate::events::{EventCode, EventLog};
use crate::fix::{
    self, EscalationHandler, FixLoopResult, NoResearch, NonInteractiveEscalation, ResearchProvider,
};
use crate::io::client::{chat_with_retry, ChatRequest, ModelClient, SamplingOptions};
use crate::io::config::{load_config, EngineConfig};
use crate::io::session::{self, SessionState, SESSION_VERSION};
use crate::io::settings::{load_settings, settings_path, UserSettings};
use crate::io::verifier::{FileVerifier, StaticVerifier};
use crate::io::workspace;
use crate::memory::embedding::{EmbeddingIndex, FileEmbedding};
use crate::memory::Memory;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The planner emitted duplicate paths or a cyclic graph; the build
    /// aborts before any code generation and the session is preserved.
    #[error("plan rejected: {0}")]
    PlanInvariant(String),
}

/// Final shape of one build run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub stats: DagStats,
    pub completed: bool,
}

impl BuildReport {
    fn from_tasks(tasks: &[TaskNode]) -> Self {
        let stats = dag::stats(tasks);
        Self {
            stats,
            completed: stats.failed == 0 && stats.skipped == 0 && stats.verified == stats.total,
        }
    }
}

/// The engine value owning all subordinate components.
pub struct Engine {
    pub root: PathBuf,
    pub config: EngineConfig,
    pub settings: UserSettings,
    pub router: Router,
    pub client: Arc<dyn ModelClient>,
    pub verifier: Arc<dyn FileVerifier>,
    pub research: Arc<dyn ResearchProvider>,
    pub escalation: Arc<dyn EscalationHandler>,
    pub events: EventLog,
    pub cancel: CancelToken,
    pub memory: Arc<RwLock<Memory>>,
    installed: RwLock<Vec<String>>,
    classification: RwLock<Classification>,
    request: RwLock<String>,
    project_name: RwLock<String>,
    created_at: String,
}

impl Engine {
    pub fn new(root: &Path, client: Arc<dyn ModelClient>) -> Result<Self> {
        let config = load_config(&root.join(".wright.toml"))?;
        let settings = load_settings(&settings_path())?;
        let router = Router::new();
        let installed = match client.installed() {
            Ok(models) => models,
            Err(err) => {
                warn!(%err, "model server not reachable, starting without models");
                Vec::new()
            }
        };
        let mut memory = Memory::new(config.history_limit, config.failure_log_limit);
        memory.embeddings =
            EmbeddingIndex::new(router.embedding_model(&installed).map(|m| m.name.clone()));

        Ok(Self {
            root: root.to_path_buf(),
            config,
            settings,
            router,
            client,
            verifier: Arc::new(StaticVerifier::new()),
            research: Arc::new(NoResearch),
            escalation: Arc::new(NonInteractiveEscalation),
            events: EventLog::new(),
            cancel: CancelToken::new(),
            memory: Arc::new(RwLock::new(memory)),
            installed: RwLock::new(installed),
            classification: RwLock::new(Classification {
                complexity: Complexity::Medium,
                size: SizeClass::Medium,
            }),
            request: RwLock::new(String::new()),
            project_name: RwLock::new(String::new()),
            created_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn FileVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_escalation(mut self, escalation: Arc<dyn EscalationHandler>) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn with_research(mut self, research: Arc<dyn ResearchProvider>) -> Self {
        self.research = research;
        self
    }

    pub fn with_settings(mut self, settings: UserSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn installed_models(&self) -> Vec<String> {
        self.installed.read().expect("installed lock").clone()
    }

    /// Re-query the server's installed models.
    pub fn refresh_models(&self) -> Result<()> {
        let models = self.client.installed().context("list installed models")?;
        *self.installed.write().expect("installed lock") = models;
        Ok(())
    }

    pub fn classification(&self) -> Classification {
        *self.classification.read().expect("classification lock")
    }

    // ── Classification ─────────────────────────────────────────────

    /// Classify a request: keyword phase, then an LLM label from the
    /// fastest installed model when one is available.
    #[instrument(skip_all)]
    pub fn classify(&self, prompt: &str) -> Classification {
        let file_count = workspace::source_file_count(&self.root);
        let installed = self.installed_models();
        let phase_b = self.router.fastest_available(&installed).and_then(|spec| {
            let rendered = render_prompt(
                "classifier",
                context! { prompt => prompt, file_count => file_count },
            )
            .ok()?;
            let request = ChatRequest {
                model: spec.name.clone(),
                messages: vec![ChatMessage::user(rendered)],
                options: SamplingOptions::for_role(Role::Chat, spec, SizeClass::Small),
                strip_reasoning: spec.supports_reasoning_trace,
            };
            let outcome = chat_with_retry(self.client.as_ref(), &request, &self.cancel).ok()?;
            classifier::parse_label(&outcome.text)
        });

        let fused = classifier::fuse(prompt, phase_b, file_count);
        *self.classification.write().expect("classification lock") = fused;
        info!(label = %fused.label(), "request classified");
        fused
    }

    // ── Role plumbing ──────────────────────────────────────────────

    /// Resolve a role to a live session: concrete model, sampling
    /// profile, reasoning-trace policy.
    pub(crate) fn role_session(&self, role: Role) -> Result<RoleSession<'_>> {
        let classification = self.classification();
        let installed = self.installed_models();
        let spec = self
            .router
            .resolve(role, classification.complexity, classification.size, &installed)
            .map_err(anyhow::Error::from)?;
        Ok(RoleSession {
            client: self.client.as_ref(),
            role,
            model: spec.name.clone(),
            options: SamplingOptions::for_role(role, spec, classification.size),
            strip_reasoning: spec.supports_reasoning_trace,
            cancel: self.cancel.clone(),
        })
    }

    pub(crate) fn architecture(&self) -> String {
        self.memory.read().expect("memory lock").architecture()
    }

    pub(crate) fn record_failure(&self, record: FailureRecord) {
        self.memory
            .write()
            .expect("memory lock")
            .record_failure(record);
    }

    /// Write generated content through the atomic helper and update the
    /// memory hash index.
    pub(crate) fn write_generated(&self, rel_path: &str, content: &str) -> Result<()> {
        workspace::write_file(&self.root, rel_path, content)?;
        let stored = workspace::read_file(&self.root, rel_path)?;
        let hash = workspace::content_hash(&stored);
        self.memory
            .write()
            .expect("memory lock")
            .record_file(rel_path, hash);
        self.events.record(EventCode::FileWritten, rel_path);
        Ok(())
    }

    /// Verify a task's file. Verifier breakage counts as a failed check,
    /// never a fatal error: it feeds the fix loop like any other failure.
    pub(crate) fn verify_task_file(&self, task: &TaskNode) -> Result<VerificationResult> {
        let path = self.root.join(&task.file);
        match self.verifier.verify(&path) {
            Ok(result) => Ok(result),
            Err(err) => Ok(VerificationResult {
                passed: false,
                checks: vec![Check {
                    name: "verifier".to_string(),
                    passed: false,
                    detail: err.to_string(),
                }],
                structured_errors: Vec::new(),
            }),
        }
    }

    /// Assemble the coder's contextual slice for one task.
    pub(crate) fn generate_context(
        &self,
        task: &TaskNode,
        all: &[TaskNode],
        extra_instructions: String,
    ) -> coder::GenerateContext {
        let (architecture, file_index, spec_details, tech_stack, dependency_context, failure_log, embed_model) = {
            let memory = self.memory.read().expect("memory lock");
            (
                memory.architecture(),
                memory.file_index_text(),
                memory.spec_details_text(),
                memory.tech_stack.join(", "),
                memory.task_dependency_context(&self.root, task, all),
                if memory.failures_for(task.id).is_empty() {
                    String::new()
                } else {
                    memory.failure_log_text(Some(task.id))
                },
                memory.embeddings.model.clone(),
            )
        };

        // Embedding retrieval is additive: absent a model it contributes
        // nothing and the context is identical.
        let related_context = embed_model
            .and_then(|model| {
                let query = format!("{}: {}", task.file, task.description);
                self.client.embed(&model, &query).ok()
            })
            .map(|vector| {
                self.memory
                    .read()
                    .expect("memory lock")
                    .related_context(&self.root, &vector, &[task.file.as_str()])
            })
            .unwrap_or_default();

        coder::GenerateContext {
            file_path: task.file.clone(),
            description: task.description.clone(),
            architecture,
            file_index,
            spec_details,
            tech_stack,
            dependency_context,
            related_context,
            failure_log,
            extra_instructions,
        }
    }

    // ── Workspace seeding ──────────────────────────────────────────

    /// Seed memory from an existing project directory.
    pub fn scan_workspace(&self) -> Result<usize> {
        let files = workspace::scan(&self.root)?;
        let index: Vec<FileIndexEntry> = files
            .iter()
            .map(|f| FileIndexEntry {
                path: f.path.clone(),
                purpose: workspace::infer_purpose(&f.path, &f.content),
            })
            .collect();
        let graph = workspace::build_dependency_graph(&files);
        let name = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string());
        let summary = crate::memory::summarize_scan(&name, &[], &index);

        let mut memory = self.memory.write().expect("memory lock");
        memory.adopt_scan(summary, index, graph);
        for file in &files {
            memory.record_file(&file.path, workspace::content_hash(&file.content));
        }
        debug!(files = files.len(), "workspace scanned");
        Ok(files.len())
    }

    // ── Build ──────────────────────────────────────────────────────

    /// Full build: classify, plan, then execute the DAG to completion.
    #[instrument(skip_all)]
    pub fn build(&self, request: &str) -> Result<BuildReport> {
        let classification = self.classify(request);
        *self.request.write().expect("request lock") = request.to_string();

        let research_brief = if classification.complexity == Complexity::Heavy
            && self.settings.internet_access
        {
            self.research.research(request)
        } else {
            None
        };

        let planner_session = self.role_session(Role::Planner)?;
        let plan = planner::create_plan(&planner_session, request, research_brief.as_deref())?;

        let violations = dag::validate_plan(&plan.tasks);
        if !violations.is_empty() {
            let detail = violations.join("; ");
            self.events.record(EventCode::PlanRejected, detail.clone());
            return Err(EngineError::PlanInvariant(detail).into());
        }

        {
            let mut memory = self.memory.write().expect("memory lock");
            memory.adopt_plan(&plan);
            memory.push_history(Role::Planner, ChatMessage::user(request));
            memory.push_history(
                Role::Planner,
                ChatMessage::assistant(plan.architecture_summary.clone()),
            );
        }
        *self.project_name.write().expect("name lock") = if plan.project_name.is_empty() {
            "project".to_string()
        } else {
            plan.project_name.clone()
        };

        info!(tasks = plan.tasks.len(), "plan accepted");
        let mut tasks = plan.tasks;
        self.persist(&tasks)?;
        self.execute_tasks(&mut tasks)?;
        Ok(BuildReport::from_tasks(&tasks))
    }

    /// Resume the workspace session, if any. Verified tasks whose files
    /// are unchanged on disk complete without any model call.
    pub fn resume(&self) -> Result<Option<BuildReport>> {
        let Some(loaded) = session::load_session(&self.root)? else {
            return Ok(None);
        };
        let state = loaded.state;
        if loaded.read_only {
            warn!("session is read-only (newer engine version), not executing");
            return Ok(Some(BuildReport::from_tasks(&state.plan.tasks)));
        }

        {
            let mut memory = self.memory.write().expect("memory lock");
            *memory = state.memory;
            if memory.history_limit == 0 {
                memory.history_limit = self.config.history_limit;
            }
            if memory.failure_log_limit == 0 {
                memory.failure_log_limit = self.config.failure_log_limit;
            }
        }
        *self.request.write().expect("request lock") = state.request.clone();
        *self.project_name.write().expect("name lock") = state.name.clone();
        if let (Some(complexity), Some(size)) = (state.complexity, state.size) {
            *self.classification.write().expect("classification lock") =
                Classification { complexity, size };
        }

        let mut tasks = state.plan.tasks;
        self.downgrade_changed_files(&mut tasks);
        if !dag::all_terminal(&tasks) {
            self.execute_tasks(&mut tasks)?;
        }
        Ok(Some(BuildReport::from_tasks(&tasks)))
    }

    /// A VERIFIED task stays verified only while its on-disk content
    /// hash matches memory; edits send it back through the pipeline.
    fn downgrade_changed_files(&self, tasks: &mut [TaskNode]) {
        let memory = self.memory.read().expect("memory lock");
        for task in tasks {
            if task.status != TaskStatus::Verified {
                continue;
            }
            let unchanged = workspace::read_file(&self.root, &task.file)
                .ok()
                .map(|content| {
                    memory.file_hash(&task.file) == Some(workspace::content_hash(&content).as_str())
                })
                .unwrap_or(false);
            if !unchanged {
                debug!(task = task.id, file = %task.file, "file changed on disk, re-queuing");
                task.status = TaskStatus::Pending;
                task.failure_count = 0;
            }
        }
    }

    // ── Wave loop ──────────────────────────────────────────────────

    fn execute_tasks(&self, tasks: &mut Vec<TaskNode>) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                self.flush_cancelled(tasks)?;
                return Ok(());
            }

            let ready = dag::ready_set(tasks);
            if ready.is_empty() {
                if !dag::all_terminal(tasks) {
                    self.skip_unreachable(tasks);
                    self.persist(tasks)?;
                }
                break;
            }
            debug!(wave = ?ready, "dispatching wave");

            let snapshot = tasks.clone();
            let mut wave_files = Vec::new();
            for chunk in ready.chunks(self.config.fan_out.max(1)) {
                let outcomes: Vec<TaskNode> = thread::scope(|scope| {
                    let handles: Vec<_> = chunk
                        .iter()
                        .map(|id| {
                            let task = snapshot
                                .iter()
                                .find(|t| t.id == *id)
                                .expect("ready id exists")
                                .clone();
                            let snap = &snapshot;
                            scope.spawn(move || self.run_task_pipeline(task, snap))
                        })
                        .collect();
                    handles
                        .into_iter()
                        .map(|handle| handle.join().expect("task worker panicked"))
                        .collect()
                });
                for updated in outcomes {
                    if updated.status == TaskStatus::Verified {
                        wave_files.push(updated.file.clone());
                    }
                    if let Some(slot) = tasks.iter_mut().find(|t| t.id == updated.id) {
                        *slot = updated;
                    }
                }
            }

            self.reindex_embeddings(&wave_files);
            self.persist(tasks)?;
        }
        self.persist(tasks)?;
        Ok(())
    }

    fn flush_cancelled(&self, tasks: &mut [TaskNode]) -> Result<()> {
        self.events
            .record(EventCode::Cancelled, "build cancelled, state persisted");
        for task in tasks.iter_mut() {
            if !task.is_terminal() {
                task.status = TaskStatus::Pending;
            }
        }
        self.persist(tasks)
    }

    fn skip_unreachable(&self, tasks: &mut [TaskNode]) {
        for task in tasks.iter_mut() {
            if task.status == TaskStatus::Pending {
                task.status = TaskStatus::Skipped;
                self.events.record(
                    EventCode::TaskSkipped,
                    format!("task {} ({}) unreachable, dependency not verified", task.id, task.file),
                );
            }
        }
    }

    // ── Per-task pipeline ──────────────────────────────────────────

    /// One task's full pipeline, run on a worker thread against a wave
    /// snapshot. Returns the updated task; the caller merges it.
    #[instrument(skip_all, fields(task = task.id, file = %task.file))]
    fn run_task_pipeline(&self, mut task: TaskNode, all: &[TaskNode]) -> TaskNode {
        if self.cancel.is_cancelled() {
            return task;
        }
        task.status = TaskStatus::InProgress;

        // Generate, tolerating empty model output per the failure budget.
        loop {
            if self.cancel.is_cancelled() {
                task.status = TaskStatus::Pending;
                return task;
            }
            let generated = self.role_session(Role::Coder).and_then(|session| {
                let ctx = self.generate_context(&task, all, String::new());
                coder::generate(&session, &ctx)
            });
            match generated {
                Ok(content) if !content.trim().is_empty() => {
                    if let Err(err) = self.write_generated(&task.file, &content) {
                        return self.fail_task(task, &format!("write failed: {err}"));
                    }
                    break;
                }
                Ok(_) => {
                    self.events.record(
                        EventCode::ParseEmpty,
                        format!("generation of {} yielded no content", task.file),
                    );
                    task.failure_count += 1;
                    if task.failure_count >= MAX_TASK_FAILURES {
                        return self.fail_task(task, "model produced no parseable content");
                    }
                }
                Err(err) => return self.fail_task(task, &err.to_string()),
            }
        }
        task.status = TaskStatus::Generated;

        self.review_rounds(&mut task);
        task.status = TaskStatus::Reviewed;

        let verification = match self.verify_task_file(&task) {
            Ok(result) => result,
            Err(err) => return self.fail_task(task, &err.to_string()),
        };
        if verification.passed {
            task.status = TaskStatus::Verified;
            self.events
                .record(EventCode::TaskVerified, task.file.clone());
            return task;
        }

        task.status = TaskStatus::NeedsFix;
        match fix::run_fix_loop(self, &mut task, all, verification) {
            Ok(FixLoopResult::Verified) => {
                self.events
                    .record(EventCode::TaskVerified, task.file.clone());
            }
            Ok(FixLoopResult::Failed) => {
                self.events.record(
                    EventCode::TaskFailed,
                    format!("{}: {}", task.file, task.error_summary),
                );
            }
            Ok(FixLoopResult::Paused) => {
                // Pause stops the build; the session stays resumable.
                self.cancel.cancel();
            }
            Ok(FixLoopResult::Cancelled) => {}
            Err(err) => {
                task.status = TaskStatus::Failed;
                task.error_summary = truncate(&err.to_string(), 300);
                self.events.record(
                    EventCode::TaskFailed,
                    format!("{}: {}", task.file, task.error_summary),
                );
            }
        }
        task
    }

    /// Review → patch → re-review, bounded by `MAX_REVIEW_ROUNDS`.
    fn review_rounds(&self, task: &mut TaskNode) {
        let purpose = {
            let memory = self.memory.read().expect("memory lock");
            memory
                .file_index
                .iter()
                .find(|e| e.path == task.file)
                .map(|e| e.purpose.clone())
                .unwrap_or_else(|| task.description.clone())
        };

        for round in 0..MAX_REVIEW_ROUNDS {
            task.status = TaskStatus::Reviewing;
            let review = (|| -> Result<reviewer::Review> {
                let session = self.role_session(Role::Reviewer)?;
                let content = workspace::read_file(&self.root, &task.file)?;
                reviewer::review(
                    &session,
                    &task.file,
                    &purpose,
                    &content,
                    &self.architecture(),
                )
            })();
            let review = match review {
                Ok(review) => review,
                Err(err) => {
                    warn!(task = task.id, %err, "review unavailable, proceeding to verifier");
                    return;
                }
            };
            if review.effectively_approved() {
                return;
            }

            task.review_feedback = review.actionable_feedback();
            task.status = TaskStatus::NeedsFix;
            debug!(task = task.id, round, "applying review feedback");
            let patched = self.role_session(Role::Coder).and_then(|session| {
                coder::patch(
                    &session,
                    &coder::PatchContext {
                        file_path: task.file.clone(),
                        current_content: workspace::read_file(&self.root, &task.file)
                            .unwrap_or_default(),
                        error: "reviewer flagged issues before execution".to_string(),
                        guidance: task.review_feedback.clone(),
                        architecture: self.architecture(),
                        reverse_context: String::new(),
                    },
                )
            });
            match patched {
                Ok(content) if !content.trim().is_empty() => {
                    if let Err(err) = self.write_generated(&task.file, &content) {
                        warn!(task = task.id, %err, "review patch write failed");
                    }
                }
                Ok(_) => warn!(task = task.id, "review patch was empty, keeping original"),
                Err(err) => warn!(task = task.id, %err, "review patch failed"),
            }
            task.status = TaskStatus::Generated;
        }
    }

    fn fail_task(&self, mut task: TaskNode, reason: &str) -> TaskNode {
        task.status = TaskStatus::Failed;
        task.error_summary = truncate(reason, 300);
        self.events.record(
            EventCode::TaskFailed,
            format!("{}: {}", task.file, task.error_summary),
        );
        task
    }

    // ── Embeddings ─────────────────────────────────────────────────

    /// Re-embed files produced by the last wave whose hashes changed.
    fn reindex_embeddings(&self, paths: &[String]) {
        let model = {
            let memory = self.memory.read().expect("memory lock");
            memory.embeddings.model.clone()
        };
        let Some(model) = model else { return };

        for path in paths {
            let Ok(content) = workspace::read_file(&self.root, path) else {
                continue;
            };
            let hash = workspace::content_hash(&content);
            let (stale, purpose) = {
                let memory = self.memory.read().expect("memory lock");
                (
                    memory.embeddings.is_stale(path, &hash),
                    memory
                        .file_index
                        .iter()
                        .find(|e| e.path == *path)
                        .map(|e| e.purpose.clone())
                        .unwrap_or_default(),
                )
            };
            if !stale {
                continue;
            }
            let text = format!("File: {path}\nPurpose: {purpose}\n\n{}", truncate(&content, 1_500));
            match self.client.embed(&model, &text) {
                Ok(vector) if !vector.is_empty() => {
                    self.memory
                        .write()
                        .expect("memory lock")
                        .embeddings
                        .insert(FileEmbedding {
                            path: path.clone(),
                            content_hash: hash,
                            vector,
                        });
                }
                Ok(_) => {}
                Err(err) => warn!(%err, path, "embedding failed, skipping"),
            }
        }
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Serialize the session after a wave or at shutdown.
    pub fn persist(&self, tasks: &[TaskNode]) -> Result<()> {
        let classification = self.classification();
        let state = {
            let memory = self.memory.read().expect("memory lock");
            SessionState {
                version: SESSION_VERSION,
                name: self.project_name.read().expect("name lock").clone(),
                request: self.request.read().expect("request lock").clone(),
                complexity: Some(classification.complexity),
                size: Some(classification.size),
                created_at: self.created_at.clone(),
                saved_at: String::new(),
                plan: Plan {
                    project_name: self.project_name.read().expect("name lock").clone(),
                    architecture_summary: memory.architecture_summary.clone(),
                    tech_stack: memory.tech_stack.clone(),
                    file_index: memory.file_index.clone(),
                    spec_slots: memory.spec_slots.clone(),
                    tasks: tasks.to_vec(),
                },
                memory: memory.clone(),
            }
        };
        session::save_session(&self.root, &state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::EscalationDecision;
    use crate::test_support::{
        failing_verification, FixedEscalation, ScriptedClient, ScriptedVerifier,
    };

    const PLAN: &str = r#"{
        "project_name": "demo",
        "architecture_summary": "Two-file python demo.",
        "tech_stack": ["Python"],
        "file_index": [
            {"path": "models.py", "purpose": "Data models"},
            {"path": "app.py", "purpose": "Entry point"}
        ],
        "tasks": [
            {"id": 1, "file": "models.py", "description": "models", "depends_on": []},
            {"id": 2, "file": "app.py", "description": "entry", "depends_on": [1]}
        ]
    }"#;

    fn engine_with(
        root: &Path,
        responses: Vec<&str>,
        verifier: ScriptedVerifier,
    ) -> Engine {
        let client = Arc::new(ScriptedClient::new(responses));
        Engine::new(root, client)
            .expect("engine")
            .with_verifier(Arc::new(verifier))
    }

    /// Reviewer approval JSON reused across scripts.
    const APPROVE: &str = r#"{"approved": true, "issues": [], "summary": "ok"}"#;

    #[test]
    fn build_runs_dag_in_dependency_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        // classify (phase B), plan, then per task: generate + review.
        let responses = vec![
            "medium/small",
            PLAN,
            "```python\nclass User: pass\n```",
            APPROVE,
            "```python\nprint('app')\n```",
            APPROVE,
        ];
        let engine = engine_with(temp.path(), responses, ScriptedVerifier::always_pass());
        let report = engine.build("build a demo").expect("build");

        assert!(report.completed);
        assert_eq!(report.stats.verified, 2);
        let models = std::fs::read_to_string(temp.path().join("models.py")).expect("read");
        assert_eq!(models, "class User: pass\n");
        assert!(temp.path().join(".wright_session.json").exists());
    }

    #[test]
    fn duplicate_plan_paths_abort_the_build() {
        let temp = tempfile::tempdir().expect("tempdir");
        let bad_plan = r#"{
            "project_name": "dup",
            "tasks": [
                {"id": 1, "file": "a.py", "description": "x", "depends_on": []},
                {"id": 2, "file": "a.py", "description": "y", "depends_on": []}
            ]
        }"#;
        let responses = vec!["medium/small", bad_plan];
        let engine = engine_with(temp.path(), responses, ScriptedVerifier::always_pass());
        let err = engine.build("build something").expect_err("abort");
        assert!(err.downcast_ref::<EngineError>().is_some());
        assert_eq!(engine.events.count(EventCode::PlanRejected), 1);
    }

    #[test]
    fn failed_dependency_skips_dependents() {
        let temp = tempfile::tempdir().expect("tempdir");
        // Task 1 verifies red and the script runs dry during analysis, so
        // the task fails and task 2 becomes unreachable.
        let responses = vec![
            "simple/small",
            r#"{
                "project_name": "chain",
                "tasks": [
                    {"id": 1, "file": "a.py", "description": "a", "depends_on": []},
                    {"id": 2, "file": "b.py", "description": "b", "depends_on": [1]}
                ]
            }"#,
            "```python\nx = 1\n```",
            APPROVE,
        ];
        let verifier = ScriptedVerifier::new(vec![failing_verification("boom")]);
        let engine = engine_with(temp.path(), responses, verifier)
            .with_escalation(Arc::new(FixedEscalation(EscalationDecision::Skip)));
        let report = engine.build("build chain").expect("build");

        assert!(!report.completed);
        assert_eq!(report.stats.failed, 1);
        assert_eq!(report.stats.skipped, 1);
        assert_eq!(engine.events.count(EventCode::TaskSkipped), 1);
    }

    #[test]
    fn resume_with_unchanged_files_makes_no_model_calls() {
        let temp = tempfile::tempdir().expect("tempdir");
        let responses = vec![
            "medium/small",
            PLAN,
            "```python\nclass User: pass\n```",
            APPROVE,
            "```python\nprint('app')\n```",
            APPROVE,
        ];
        let client = Arc::new(ScriptedClient::new(responses));
        let engine = Engine::new(temp.path(), client)
            .expect("engine")
            .with_verifier(Arc::new(ScriptedVerifier::always_pass()));
        engine.build("build a demo").expect("build");

        // Fresh engine over the same workspace: everything is verified
        // and hashes match, so resume touches no model.
        let client2 = Arc::new(ScriptedClient::new(Vec::<String>::new()));
        let engine2 = Engine::new(temp.path(), Arc::clone(&client2) as Arc<dyn ModelClient>)
            .expect("engine")
            .with_verifier(Arc::new(ScriptedVerifier::always_pass()));
        let report = engine2.resume().expect("resume").expect("session present");

        assert!(report.completed);
        assert_eq!(client2.call_count(), 0);
    }

    #[test]
    fn resume_requeues_edited_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let responses = vec![
            "medium/small",
            PLAN,
            "```python\nclass User: pass\n```",
            APPROVE,
            "```python\nprint('app')\n```",
            APPROVE,
        ];
        let engine = engine_with(temp.path(), responses, ScriptedVerifier::always_pass());
        engine.build("build a demo").expect("build");

        // Hand-edit one generated file behind the engine's back.
        std::fs::write(temp.path().join("app.py"), "print('edited')\n").expect("write");

        let client2 = Arc::new(ScriptedClient::new(vec![
            "```python\nprint('regenerated')\n```",
            APPROVE,
        ]));
        let engine2 = Engine::new(temp.path(), Arc::clone(&client2) as Arc<dyn ModelClient>)
            .expect("engine")
            .with_verifier(Arc::new(ScriptedVerifier::always_pass()));
        let report = engine2.resume().expect("resume").expect("session present");

        assert!(report.completed);
        assert!(client2.call_count() > 0);
        let content = std::fs::read_to_string(temp.path().join("app.py")).expect("read");
        assert_eq!(content, "print('regenerated')\n");
    }
}
