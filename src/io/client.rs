//! Streaming client for the local model server.
//!
//! Speaks the line-delimited JSON protocol on loopback port 11434:
//! `POST /api/chat` for streaming completions, `GET /api/tags` for the
//! installed-model list, `POST /api/pull` for downloads with progress,
//! and `POST /api/embed` for embedding vectors.
//!
//! The [`ModelClient`] trait decouples the engine from the wire so tests
//! run against scripted clients without a server.

use std::io::{BufRead, BufReader};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::core::router::ModelSpec;
use crate::core::types::{CancelToken, ChatMessage, Role, SizeClass};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

/// Transport retries per call before the error surfaces.
const TRANSPORT_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("model server unreachable: {0}")]
    Transport(String),
    #[error("model '{0}' is not installed on the server")]
    ModelMissing(String),
    #[error("malformed server response: {0}")]
    Protocol(String),
}

/// Sampling options sent with a chat call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplingOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub num_ctx: u32,
}

impl SamplingOptions {
    /// Per-role defaults, with the context window scaled by project size.
    ///
    /// The temperature table is contractual: reasoning roles 0.4, coder
    /// 0.15, reviewer 0.3, agentic/general 0.6.
    pub fn for_role(role: Role, spec: &ModelSpec, size: SizeClass) -> Self {
        let (temperature, top_p) = match role {
            Role::Planner | Role::Analyzer => (0.4, 0.9),
            Role::Coder => (0.15, 0.95),
            Role::Reviewer => (0.3, 0.9),
            Role::Agentic | Role::Chat => (0.6, 0.9),
        };
        Self {
            temperature,
            top_p,
            num_ctx: (spec.context_window as f32 * size.context_scale()) as u32,
        }
    }
}

/// One chat call, fully resolved: concrete model, ordered messages.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub options: SamplingOptions,
    /// Strip `<think>…</think>` spans from the stream before accumulation.
    pub strip_reasoning: bool,
}

/// Accumulated result of one chat call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatOutcome {
    pub text: String,
    /// Set when the stream was cancelled; `text` holds the partial output.
    pub interrupted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PullProgress {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub total: u64,
}

/// Abstraction over the model server.
pub trait ModelClient: Send + Sync {
    /// Stream one chat completion. Cancellation returns the partial text
    /// accumulated so far with `interrupted = true`, never an error.
    fn chat(&self, request: &ChatRequest, cancel: &CancelToken) -> Result<ChatOutcome, ClientError>;

    /// Exact names of installed models, including quantization tags.
    fn installed(&self) -> Result<Vec<String>, ClientError>;

    /// Download a model, reporting byte-accurate progress.
    fn pull(
        &self,
        model: &str,
        progress: &mut dyn FnMut(&PullProgress),
    ) -> Result<(), ClientError>;

    /// Embed one input text. Empty result means the model produced none.
    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, ClientError>;
}

/// Retry wrapper: transport errors back off exponentially up to three
/// times per call; other errors surface immediately.
pub fn chat_with_retry(
    client: &dyn ModelClient,
    request: &ChatRequest,
    cancel: &CancelToken,
) -> Result<ChatOutcome, ClientError> {
    let mut delay = RETRY_BASE_DELAY;
    let mut last = None;
    for attempt in 0..=TRANSPORT_RETRIES {
        if cancel.is_cancelled() {
            return Ok(ChatOutcome {
                text: String::new(),
                interrupted: true,
            });
        }
        match client.chat(request, cancel) {
            Err(ClientError::Transport(msg)) => {
                warn!(attempt, error = %msg, "transport error, backing off");
                last = Some(ClientError::Transport(msg));
                std::thread::sleep(delay);
                delay *= 2;
            }
            other => return other,
        }
    }
    Err(last.unwrap_or_else(|| ClientError::Transport("retries exhausted".to_string())))
}

// ── Wire types ─────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatPayload<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: &'a SamplingOptions,
}

#[derive(Deserialize)]
struct ChatDelta {
    #[serde(default)]
    message: Option<DeltaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct DeltaMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

#[derive(Deserialize)]
struct PullDelta {
    #[serde(flatten)]
    progress: PullProgress,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct EmbedPayload<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

// ── HTTP implementation ────────────────────────────────────────────

/// Blocking HTTP client against the local server. Model calls have no
/// hard timeout; they are cancellable instead.
pub struct OllamaClient {
    base_url: String,
    http: reqwest::blocking::Client,
}

impl OllamaClient {
    pub fn new() -> Result<Self, ClientError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, ClientError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(None)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// True when the server answers `/api/tags`.
    pub fn preflight(&self) -> bool {
        self.installed().is_ok()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn transport(err: reqwest::Error) -> ClientError {
    ClientError::Transport(err.to_string())
}

impl ModelClient for OllamaClient {
    fn chat(&self, request: &ChatRequest, cancel: &CancelToken) -> Result<ChatOutcome, ClientError> {
        let payload = ChatPayload {
            model: &request.model,
            messages: &request.messages,
            stream: true,
            options: &request.options,
        };
        let response = self
            .http
            .post(self.url("/api/chat"))
            .json(&payload)
            .send()
            .map_err(transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            if body.contains("not found") {
                return Err(ClientError::ModelMissing(request.model.clone()));
            }
            return Err(ClientError::Protocol(format!("{status}: {body}")));
        }

        let mut filter = request.strip_reasoning.then(ThinkFilter::new);
        let mut text = String::new();
        let reader = BufReader::new(response);
        for line in reader.lines() {
            if cancel.is_cancelled() {
                if let Some(filter) = filter.take() {
                    text.push_str(&filter.finish());
                }
                debug!(chars = text.len(), "chat stream cancelled, partial kept");
                return Ok(ChatOutcome {
                    text,
                    interrupted: true,
                });
            }
            let line = line.map_err(|e| ClientError::Transport(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            trace!(raw = %line, "chat delta");
            let delta: ChatDelta = serde_json::from_str(&line)
                .map_err(|e| ClientError::Protocol(format!("{e}: {line}")))?;
            if let Some(error) = delta.error {
                if error.contains("not found") {
                    return Err(ClientError::ModelMissing(request.model.clone()));
                }
                return Err(ClientError::Protocol(error));
            }
            if let Some(message) = delta.message {
                match &mut filter {
                    Some(filter) => text.push_str(&filter.push(&message.content)),
                    None => text.push_str(&message.content),
                }
            }
            if delta.done {
                break;
            }
        }
        if let Some(filter) = filter {
            text.push_str(&filter.finish());
        }
        Ok(ChatOutcome {
            text,
            interrupted: false,
        })
    }

    fn installed(&self) -> Result<Vec<String>, ClientError> {
        let response = self
            .http
            .get(self.url("/api/tags"))
            .timeout(Duration::from_secs(5))
            .send()
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?;
        let tags: TagsResponse = response.json().map_err(|e| {
            ClientError::Protocol(format!("decode /api/tags: {e}"))
        })?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    fn pull(
        &self,
        model: &str,
        progress: &mut dyn FnMut(&PullProgress),
    ) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.url("/api/pull"))
            .json(&serde_json::json!({ "name": model, "stream": true }))
            .send()
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?;

        let reader = BufReader::new(response);
        for line in reader.lines() {
            let line = line.map_err(|e| ClientError::Transport(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let delta: PullDelta = serde_json::from_str(&line)
                .map_err(|e| ClientError::Protocol(format!("{e}: {line}")))?;
            if let Some(error) = delta.error {
                return Err(ClientError::Protocol(error));
            }
            progress(&delta.progress);
        }
        Ok(())
    }

    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, ClientError> {
        let response = self
            .http
            .post(self.url("/api/embed"))
            .json(&EmbedPayload { model, input })
            .timeout(Duration::from_secs(60))
            .send()
            .map_err(transport)?;
        if !response.status().is_success() {
            let body = response.text().unwrap_or_default();
            if body.contains("not found") {
                return Err(ClientError::ModelMissing(model.to_string()));
            }
            return Err(ClientError::Protocol(body));
        }
        let decoded: EmbedResponse = response
            .json()
            .map_err(|e| ClientError::Protocol(format!("decode /api/embed: {e}")))?;
        Ok(decoded.embeddings.into_iter().next().unwrap_or_default())
    }
}

// ── Reasoning-trace filter ─────────────────────────────────────────

/// Stream-level removal of `<think>…</think>` spans.
///
/// Tags can arrive split across deltas, so the filter holds back any
/// trailing partial tag and emits the rest. Raw deltas stay visible at
/// `trace` level for debugging; downstream parsers only see filtered text.
#[derive(Debug, Default)]
pub struct ThinkFilter {
    in_think: bool,
    buffer: String,
}

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

impl ThinkFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the visible text it released.
    pub fn push(&mut self, chunk: &str) -> String {
        self.buffer.push_str(chunk);
        let mut out = String::new();
        loop {
            if self.in_think {
                match self.buffer.find(CLOSE_TAG) {
                    Some(pos) => {
                        self.buffer.drain(..pos + CLOSE_TAG.len());
                        self.in_think = false;
                    }
                    None => {
                        // Keep only enough to recognize a split close tag.
                        let keep = partial_suffix_len(&self.buffer, CLOSE_TAG);
                        let len = self.buffer.len();
                        self.buffer.drain(..len - keep);
                        return out;
                    }
                }
            } else {
                match self.buffer.find(OPEN_TAG) {
                    Some(pos) => {
                        out.push_str(&self.buffer[..pos]);
                        self.buffer.drain(..pos + OPEN_TAG.len());
                        self.in_think = true;
                    }
                    None => {
                        let keep = partial_suffix_len(&self.buffer, OPEN_TAG);
                        let emit_to = self.buffer.len() - keep;
                        out.push_str(&self.buffer[..emit_to]);
                        self.buffer.drain(..emit_to);
                        return out;
                    }
                }
            }
        }
    }

    /// Flush at end of stream. An unterminated think span is dropped; a
    /// held-back partial tag that never completed is emitted as text.
    pub fn finish(self) -> String {
        if self.in_think {
            String::new()
        } else {
            self.buffer
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`.
fn partial_suffix_len(text: &str, tag: &str) -> usize {
    let max = tag.len().saturating_sub(1).min(text.len());
    (1..=max)
        .rev()
        .find(|&len| {
            text.is_char_boundary(text.len() - len) && tag.starts_with(&text[text.len() - len..])
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::router::{ModelCategory, ModelTier};

    fn spec(context_window: u32) -> ModelSpec {
        ModelSpec {
            name: "qwen2.5-coder:14b".to_string(),
            category: ModelCategory::Coding,
            tier: ModelTier::Medium,
            priority: 30,
            supports_reasoning_trace: false,
            context_window,
        }
    }

    #[test]
    fn sampling_defaults_follow_role_table() {
        let spec = spec(16_384);
        assert_eq!(
            SamplingOptions::for_role(Role::Coder, &spec, SizeClass::Small).temperature,
            0.15
        );
        assert_eq!(
            SamplingOptions::for_role(Role::Planner, &spec, SizeClass::Small).temperature,
            0.4
        );
        assert_eq!(
            SamplingOptions::for_role(Role::Reviewer, &spec, SizeClass::Small).temperature,
            0.3
        );
        assert_eq!(
            SamplingOptions::for_role(Role::Agentic, &spec, SizeClass::Small).temperature,
            0.6
        );
    }

    #[test]
    fn context_window_scales_with_size() {
        let spec = spec(16_384);
        let small = SamplingOptions::for_role(Role::Coder, &spec, SizeClass::Small);
        let medium = SamplingOptions::for_role(Role::Coder, &spec, SizeClass::Medium);
        let large = SamplingOptions::for_role(Role::Coder, &spec, SizeClass::Large);
        assert_eq!(small.num_ctx, 16_384);
        assert_eq!(medium.num_ctx, 24_576);
        assert_eq!(large.num_ctx, 32_768);
    }

    #[test]
    fn think_filter_removes_complete_span() {
        let mut filter = ThinkFilter::new();
        let out = filter.push("<think>hidden reasoning</think>visible");
        assert_eq!(out, "visible");
        assert_eq!(filter.finish(), "");
    }

    #[test]
    fn think_filter_handles_tags_split_across_chunks() {
        let mut filter = ThinkFilter::new();
        let mut out = String::new();
        for chunk in ["before<th", "ink>secret</thi", "nk>after"] {
            out.push_str(&filter.push(chunk));
        }
        out.push_str(&filter.finish());
        assert_eq!(out, "beforeafter");
    }

    #[test]
    fn think_filter_passes_plain_text_through() {
        let mut filter = ThinkFilter::new();
        let mut out = filter.push("no tags ");
        out.push_str(&filter.push("at all"));
        out.push_str(&filter.finish());
        assert_eq!(out, "no tags at all");
    }

    #[test]
    fn think_filter_drops_unterminated_span() {
        let mut filter = ThinkFilter::new();
        let out = filter.push("text<think>never closed");
        assert_eq!(out, "text");
        assert_eq!(filter.finish(), "");
    }

    #[test]
    fn think_filter_emits_false_partial_tag() {
        let mut filter = ThinkFilter::new();
        let mut out = filter.push("a < b <th");
        out.push_str(&filter.push("at is all"));
        out.push_str(&filter.finish());
        assert_eq!(out, "a < b <that is all");
    }

    #[test]
    fn multiple_spans_are_all_removed() {
        let mut filter = ThinkFilter::new();
        let out = filter.push("<think>a</think>x<think>b</think>y");
        assert_eq!(out, "xy");
    }
}
