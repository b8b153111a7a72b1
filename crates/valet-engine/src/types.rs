//! Engine turn protocol types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::EngineError;

/// A function surface advertised to the engine for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Result of a completed tool call fed back into the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub call_id: String,
    pub output: Value,
}

/// What the caller feeds into a turn: a fresh user message or the outputs
/// of tool calls the engine asked for on the previous round.
#[derive(Debug, Clone)]
pub enum TurnInput {
    UserMessage(String),
    ToolOutputs(Vec<ToolOutput>),
}

#[derive(Debug, Clone)]
pub struct EngineTurn {
    pub session_id: String,
    pub previous_response_id: Option<String>,
    pub instructions: String,
    pub input: TurnInput,
    pub tools: Vec<ToolDefinition>,
}

/// A tool call requested by the engine. Arguments are already parsed from
/// the wire's JSON-string encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Default)]
pub struct EngineReply {
    pub response_id: String,
    pub assistant_text: Option<String>,
    pub tool_calls: Vec<EngineToolCall>,
}

impl EngineReply {
    pub fn wants_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One conversational turn against the engine. Object-safe so tests can
/// substitute scripted implementations.
#[async_trait]
pub trait TurnEngine: Send + Sync {
    async fn run_turn(&self, turn: &EngineTurn) -> Result<EngineReply, EngineError>;
}
