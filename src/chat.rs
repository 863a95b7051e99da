//! Chat mode: conversational and strictly read-only.
//!
//! The model sees the project summary and the running conversation, but
//! nothing it emits touches disk: any file or command blocks that slip
//! through are stripped from the reply.

use anyhow::{Context, Result};
use minijinja::context;
use tracing::instrument;

use crate::agents::render_prompt;
use crate::core::parser;
use crate::core::types::{ChatMessage, Role};
use crate::orchestrator::Engine;

/// Answer one chat message. Returns display text with all blocks removed.
#[instrument(skip_all)]
pub fn run_chat(engine: &Engine, message: &str) -> Result<String> {
    engine.scan_workspace()?;

    let system = {
        let memory = engine.memory.read().expect("memory lock");
        let summary = format!(
            "{}\n\nFiles:\n{}",
            memory.architecture(),
            memory.file_index_text()
        );
        render_prompt("chat", context! { project_summary => summary })?
    };

    let mut messages = vec![ChatMessage::system(system)];
    {
        let memory = engine.memory.read().expect("memory lock");
        messages.extend(memory.history(Role::Chat).iter().cloned());
    }
    messages.push(ChatMessage::user(message));

    let session = engine.role_session(Role::Chat)?;
    let outcome = session.call(messages).context("chat call")?;

    {
        let mut memory = engine.memory.write().expect("memory lock");
        memory.push_history(Role::Chat, ChatMessage::user(message));
        memory.push_history(
            Role::Chat,
            ChatMessage::assistant(crate::core::types::truncate(&outcome.text, 3_000)),
        );
    }

    // Read-only: drop any blocks the model emitted anyway.
    Ok(parser::parse(&outcome.text).display_text)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_support::ScriptedClient;

    #[test]
    fn chat_strips_blocks_and_writes_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let responses = vec![
            "medium/medium",
            "Use a venv.\n\n===FILE: sneaky.py===\nx = 1\n===END===\n",
        ];
        let client = Arc::new(ScriptedClient::new(responses));
        let engine = Engine::new(temp.path(), client).expect("engine");
        engine.classify("how do I set up python?");

        let reply = run_chat(&engine, "how do I set up python?").expect("chat");
        assert!(reply.contains("Use a venv."));
        assert!(!reply.contains("sneaky"));
        assert!(!temp.path().join("sneaky.py").exists());
    }
}
