//! Role engines: each role is a stable prompt template, an output
//! schema, and a thin wrapper over the model client.

pub mod analyzer;
pub mod coder;
pub mod planner;
pub mod reviewer;

use std::sync::LazyLock;

use anyhow::{anyhow, Context, Result};
use minijinja::Environment;
use regex::Regex;
use serde::de::DeserializeOwned;

use crate::core::parser;
use crate::core::types::{CancelToken, ChatMessage, Role};
use crate::io::client::{chat_with_retry, ChatOutcome, ChatRequest, ClientError, ModelClient, SamplingOptions};

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const CODER_GENERATE_TEMPLATE: &str = include_str!("prompts/coder_generate.md");
const CODER_PATCH_TEMPLATE: &str = include_str!("prompts/coder_patch.md");
const REVIEWER_TEMPLATE: &str = include_str!("prompts/reviewer.md");
const ANALYZER_TEMPLATE: &str = include_str!("prompts/analyzer.md");
const AGENTIC_TEMPLATE: &str = include_str!("prompts/agentic.md");
const CHAT_TEMPLATE: &str = include_str!("prompts/chat.md");
const CLASSIFIER_TEMPLATE: &str = include_str!("prompts/classifier.md");

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        for (name, template) in [
            ("planner", PLANNER_TEMPLATE),
            ("coder_generate", CODER_GENERATE_TEMPLATE),
            ("coder_patch", CODER_PATCH_TEMPLATE),
            ("reviewer", REVIEWER_TEMPLATE),
            ("analyzer", ANALYZER_TEMPLATE),
            ("agentic", AGENTIC_TEMPLATE),
            ("chat", CHAT_TEMPLATE),
            ("classifier", CLASSIFIER_TEMPLATE),
        ] {
            env.add_template(name, template)
                .expect("embedded template should be valid");
        }
        Self { env }
    }
}

/// Render one of the embedded role templates.
pub fn render_prompt(name: &str, ctx: minijinja::Value) -> Result<String> {
    let engine = PromptEngine::new();
    let template = engine
        .env
        .get_template(name)
        .with_context(|| format!("template '{name}'"))?;
    template
        .render(ctx)
        .with_context(|| format!("render template '{name}'"))
}

/// A role call, fully resolved: concrete model, sampling, trace policy.
pub struct RoleSession<'a> {
    pub client: &'a dyn ModelClient,
    pub role: Role,
    pub model: String,
    pub options: SamplingOptions,
    pub strip_reasoning: bool,
    pub cancel: CancelToken,
}

impl RoleSession<'_> {
    pub fn call(&self, messages: Vec<ChatMessage>) -> Result<ChatOutcome, ClientError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            options: self.options.clone(),
            strip_reasoning: self.strip_reasoning,
        };
        chat_with_retry(self.client, &request, &self.cancel)
    }
}

static THINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("think regex"));

/// Remove any reasoning-trace spans that survived the stream filter.
pub fn strip_think(text: &str) -> String {
    THINK_RE.replace_all(text, "").trim().to_string()
}

static JSON_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?[ \t]*\n(.*?)```").expect("json fence regex")
});

/// Extract the first JSON object from model output.
///
/// Strips reasoning traces, prefers a fenced `json` block, then scans for
/// balanced `{…}` candidates, parsing each until one deserializes.
pub fn extract_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    let cleaned = strip_think(text);
    let candidate = match JSON_FENCE_RE.captures(&cleaned) {
        Some(caps) => caps[1].trim().to_string(),
        None => cleaned.clone(),
    };

    for slice in balanced_objects(&candidate) {
        if let Ok(value) = serde_json::from_str::<T>(slice) {
            return Ok(value);
        }
    }
    // The fenced block may have been prose-wrapped; fall back to the
    // whole cleaned text.
    for slice in balanced_objects(&cleaned) {
        if let Ok(value) = serde_json::from_str::<T>(slice) {
            return Ok(value);
        }
    }
    Err(anyhow!("no valid JSON object in model output"))
}

/// Balanced `{…}` slices starting at each top-level opening brace.
fn balanced_objects(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut slices = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(s) = start.take() {
                            slices.push(&text[s..=i]);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    slices
}

/// Extract a file body from coder output.
///
/// Coders are told to answer with one fenced block, but some emit marker
/// blocks or prose around the code. Marker blocks win; otherwise a
/// substantial fenced block; otherwise the raw text.
pub fn extract_file_body(text: &str) -> String {
    let cleaned = strip_think(text);
    let parsed = parser::parse(&cleaned);
    if let Some(first) = parsed.files.first() {
        return first.content.clone();
    }

    static WHOLE_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)^```\w*[ \t]*\n(.*?)\n?```\s*$").expect("whole fence regex")
    });
    if let Some(caps) = WHOLE_FENCE_RE.captures(&cleaned) {
        return caps[1].trim().to_string();
    }

    static FENCE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)```\w*[ \t]*\n(.*?)\n```").expect("fence regex"));
    if let Some(caps) = FENCE_RE.captures(&cleaned) {
        let inner = caps[1].trim();
        // Only trust the block when it is most of the answer; a tiny
        // fenced snippet inside prose is usually an example, not the file.
        if inner.len() * 10 >= cleaned.len() * 3 {
            return inner.to_string();
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn extract_json_from_fenced_block() {
        let text = "Here you go:\n```json\n{\"name\": \"x\", \"count\": 2}\n```\nDone.";
        let sample: Sample = extract_json(text).expect("extract");
        assert_eq!(sample.name, "x");
        assert_eq!(sample.count, 2);
    }

    #[test]
    fn extract_json_skips_think_spans() {
        let text = "<think>{\"name\": \"wrong\", \"count\": 0}</think>{\"name\": \"right\", \"count\": 1}";
        let sample: Sample = extract_json(text).expect("extract");
        assert_eq!(sample.name, "right");
    }

    #[test]
    fn extract_json_scans_past_non_matching_objects() {
        let text = "{\"other\": true} then {\"name\": \"x\", \"count\": 3}";
        let sample: Sample = extract_json(text).expect("extract");
        assert_eq!(sample.count, 3);
    }

    #[test]
    fn extract_json_handles_braces_inside_strings() {
        let text = "{\"name\": \"has } brace\", \"count\": 1}";
        let sample: Sample = extract_json(text).expect("extract");
        assert_eq!(sample.name, "has } brace");
    }

    #[test]
    fn extract_json_errors_without_object() {
        let result: Result<Sample> = extract_json("no json here");
        assert!(result.is_err());
    }

    #[test]
    fn file_body_prefers_marker_blocks() {
        let text = "===FILE: app.py===\nx = 1\n===END===";
        assert_eq!(extract_file_body(text), "x = 1");
    }

    #[test]
    fn file_body_unwraps_dominant_fence() {
        let text = "```python\nx = 1\ny = 2\n```";
        assert_eq!(extract_file_body(text), "x = 1\ny = 2");
    }

    #[test]
    fn file_body_unwraps_short_whole_fence() {
        assert_eq!(extract_file_body("```python\nx = 1\n```"), "x = 1");
        assert_eq!(extract_file_body("```\n{}\n```"), "{}");
    }

    #[test]
    fn file_body_keeps_prose_with_tiny_fence() {
        let text = "Lots of explanation about the approach that goes on and on and on.\nMore prose here filling space.\n```\nx\n```\nEven more prose after the tiny example block.";
        assert_eq!(extract_file_body(text), strip_think(text));
    }

    #[test]
    fn templates_render() {
        let prompt = render_prompt(
            "classifier",
            minijinja::context! { prompt => "build a game", file_count => 2 },
        )
        .expect("render");
        assert!(prompt.contains("build a game"));
        assert!(prompt.contains("heavy/large"));
    }
}
