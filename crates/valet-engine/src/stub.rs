//! Deterministic engine for offline deployments and local smoke tests.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::types::{EngineReply, EngineTurn, TurnEngine, TurnInput};
use crate::EngineError;

/// Echo engine: acknowledges user text, never requests tools, and closes
/// out tool-output rounds with a short completion.
#[derive(Default)]
pub struct StubEngine {
    counter: AtomicU64,
}

#[async_trait]
impl TurnEngine for StubEngine {
    async fn run_turn(&self, turn: &EngineTurn) -> Result<EngineReply, EngineError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let assistant_text = match &turn.input {
            TurnInput::UserMessage(text) => format!("You said: {text}"),
            TurnInput::ToolOutputs(outputs) => {
                format!("Processed {} tool result(s).", outputs.len())
            }
        };
        Ok(EngineReply {
            response_id: format!("stub-resp-{n}"),
            assistant_text: Some(assistant_text),
            tool_calls: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_echoes_and_numbers_responses() {
        let engine = StubEngine::default();
        let turn = EngineTurn {
            session_id: "sess".to_string(),
            previous_response_id: None,
            instructions: String::new(),
            input: TurnInput::UserMessage("hello".to_string()),
            tools: Vec::new(),
        };
        let first = engine.run_turn(&turn).await.expect("reply");
        let second = engine.run_turn(&turn).await.expect("reply");
        assert_eq!(first.assistant_text.as_deref(), Some("You said: hello"));
        assert_ne!(first.response_id, second.response_id);
        assert!(!first.wants_tools());
    }
}
