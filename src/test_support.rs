//! Test-only helpers: task constructors and scripted seam implementations.
//!
//! Scripted fakes stand in for the model server, the static verifier, and
//! the escalation prompt so pipeline tests run hermetically.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;

use crate::core::dag::TaskNode;
use crate::core::types::{CancelToken, Check, EscalationDecision, VerificationResult};
use crate::fix::{EscalationHandler, ResearchProvider};
use crate::io::client::{ChatOutcome, ChatRequest, ClientError, ModelClient, PullProgress};
use crate::io::verifier::FileVerifier;

/// Create a deterministic pending task.
pub fn task(id: u32, file: &str) -> TaskNode {
    TaskNode::new(id, file, format!("produce {file}"))
}

/// Create a task with explicit dependencies.
pub fn task_with_deps(id: u32, file: &str, deps: &[u32]) -> TaskNode {
    let mut task = task(id, file);
    task.depends_on = deps.to_vec();
    task
}

pub fn failing_verification(detail: &str) -> VerificationResult {
    VerificationResult {
        passed: false,
        checks: vec![Check {
            name: "python-syntax".to_string(),
            passed: false,
            detail: detail.to_string(),
        }],
        structured_errors: Vec::new(),
    }
}

/// Model client that replays scripted responses in order.
///
/// Every chat request is recorded for assertions. Exhausting the script
/// yields a protocol error, which callers treat as a degraded model.
pub struct ScriptedClient {
    responses: Mutex<VecDeque<String>>,
    pub calls: Mutex<Vec<ChatRequest>>,
    installed_models: Vec<String>,
    embed_vector: Option<Vec<f32>>,
}

impl ScriptedClient {
    pub fn new<S: Into<String>>(responses: Vec<S>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            calls: Mutex::new(Vec::new()),
            installed_models: vec![
                "qwen2.5-coder:14b".to_string(),
                "deepseek-r1:14b".to_string(),
                "llama3.1:8b".to_string(),
                "qwen2.5:7b".to_string(),
            ],
            embed_vector: None,
        }
    }

    pub fn with_installed(mut self, installed: Vec<String>) -> Self {
        self.installed_models = installed;
        self
    }

    pub fn with_embeddings(mut self, vector: Vec<f32>) -> Self {
        self.embed_vector = Some(vector);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

impl ModelClient for ScriptedClient {
    fn chat(&self, request: &ChatRequest, _cancel: &CancelToken) -> Result<ChatOutcome, ClientError> {
        self.calls.lock().expect("calls lock").push(request.clone());
        let next = self.responses.lock().expect("responses lock").pop_front();
        match next {
            Some(text) => Ok(ChatOutcome {
                text,
                interrupted: false,
            }),
            None => Err(ClientError::Protocol("script exhausted".to_string())),
        }
    }

    fn installed(&self) -> Result<Vec<String>, ClientError> {
        Ok(self.installed_models.clone())
    }

    fn pull(&self, _model: &str, _progress: &mut dyn FnMut(&PullProgress)) -> Result<(), ClientError> {
        Ok(())
    }

    fn embed(&self, _model: &str, _input: &str) -> Result<Vec<f32>, ClientError> {
        Ok(self.embed_vector.clone().unwrap_or_default())
    }
}

/// Verifier that replays a scripted sequence of results, then passes.
pub struct ScriptedVerifier {
    script: Mutex<VecDeque<VerificationResult>>,
    pub verify_count: Mutex<usize>,
}

impl ScriptedVerifier {
    pub fn new(script: Vec<VerificationResult>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            verify_count: Mutex::new(0),
        }
    }

    pub fn always_pass() -> Self {
        Self::new(Vec::new())
    }

    pub fn count(&self) -> usize {
        *self.verify_count.lock().expect("count lock")
    }
}

impl FileVerifier for ScriptedVerifier {
    fn verify(&self, _path: &Path) -> Result<VerificationResult> {
        *self.verify_count.lock().expect("count lock") += 1;
        let next = self.script.lock().expect("script lock").pop_front();
        Ok(next.unwrap_or_else(VerificationResult::pass))
    }
}

/// Escalation handler returning a fixed decision.
pub struct FixedEscalation(pub EscalationDecision);

impl EscalationHandler for FixedEscalation {
    fn decide(&self, _task: &TaskNode, _failure: &VerificationResult) -> EscalationDecision {
        self.0.clone()
    }
}

/// Research provider returning a fixed brief.
pub struct FixedResearch(pub Option<String>);

impl ResearchProvider for FixedResearch {
    fn research(&self, _query: &str) -> Option<String> {
        self.0.clone()
    }
}
