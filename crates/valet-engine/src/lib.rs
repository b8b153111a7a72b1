//! Conversation engine client: one turn in, text and/or tool calls out.

mod error;
mod http;
mod retry;
mod stub;
mod types;

pub use error::EngineError;
pub use http::{HttpEngine, HttpEngineConfig};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use stub::StubEngine;
pub use types::{
    EngineReply, EngineToolCall, EngineTurn, ToolDefinition, ToolOutput, TurnEngine, TurnInput,
};
