//! HTTP engine client speaking a Responses-shaped wire protocol.
//!
//! A turn posts the instructions, input items, and advertised tools; the
//! reply is a list of output items from which assistant text and function
//! calls are extracted. Function-call arguments arrive as a JSON string and
//! are parsed before they reach callers.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::types::{EngineReply, EngineToolCall, EngineTurn, ToolDefinition, TurnEngine, TurnInput};
use crate::EngineError;

#[derive(Debug, Clone)]
pub struct HttpEngineConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

pub struct HttpEngine {
    client: reqwest::Client,
    config: HttpEngineConfig,
}

impl HttpEngine {
    pub fn new(config: HttpEngineConfig) -> Result<Self, EngineError> {
        if config.base_url.trim().is_empty() {
            return Err(EngineError::MissingBaseUrl);
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn request_body(&self, turn: &EngineTurn) -> Value {
        let input = match &turn.input {
            TurnInput::UserMessage(text) => json!([{
                "role": "user",
                "content": text,
            }]),
            TurnInput::ToolOutputs(outputs) => Value::Array(
                outputs
                    .iter()
                    .map(|output| {
                        json!({
                            "type": "function_call_output",
                            "call_id": output.call_id,
                            "output": output.output.to_string(),
                        })
                    })
                    .collect(),
            ),
        };
        let tools: Vec<Value> = turn
            .tools
            .iter()
            .map(|ToolDefinition { name, description, parameters }| {
                json!({
                    "type": "function",
                    "name": name,
                    "description": description,
                    "parameters": parameters,
                })
            })
            .collect();
        json!({
            "model": self.config.model,
            "instructions": turn.instructions,
            "input": input,
            "previous_response_id": turn.previous_response_id,
            "tools": tools,
            "store": true,
        })
    }

    async fn post_turn(&self, body: &Value) -> Result<EngineReply, EngineError> {
        let url = format!("{}/v1/responses", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        let wire: WireResponse = response.json().await?;
        extract_reply(wire)
    }
}

#[async_trait]
impl TurnEngine for HttpEngine {
    async fn run_turn(&self, turn: &EngineTurn) -> Result<EngineReply, EngineError> {
        let body = self.request_body(turn);
        retry_with_backoff(self.config.retry, || self.post_turn(&body)).await
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    id: String,
    #[serde(default)]
    output: Vec<WireItem>,
    #[serde(default)]
    output_text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireItem {
    #[serde(rename = "message")]
    Message {
        #[serde(default)]
        content: Vec<WireContent>,
    },
    #[serde(rename = "function_call")]
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireContent {
    #[serde(rename = "output_text")]
    OutputText { text: String },
    #[serde(other)]
    Unknown,
}

fn extract_reply(wire: WireResponse) -> Result<EngineReply, EngineError> {
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls = Vec::new();

    for item in wire.output {
        match item {
            WireItem::Message { content } => {
                for part in content {
                    if let WireContent::OutputText { text } = part {
                        text_parts.push(text);
                    }
                }
            }
            WireItem::FunctionCall {
                call_id,
                name,
                arguments,
            } => {
                let arguments: Value = serde_json::from_str(&arguments).map_err(|_| {
                    EngineError::InvalidResponse(format!(
                        "function call {name} carried non-JSON arguments"
                    ))
                })?;
                tool_calls.push(EngineToolCall {
                    call_id,
                    name,
                    arguments,
                });
            }
            WireItem::Unknown => {}
        }
    }

    let assistant_text = if text_parts.is_empty() {
        wire.output_text.filter(|text| !text.is_empty())
    } else {
        Some(text_parts.join("\n"))
    };

    Ok(EngineReply {
        response_id: wire.id,
        assistant_text,
        tool_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn engine(base_url: String) -> HttpEngine {
        HttpEngine::new(HttpEngineConfig {
            base_url,
            api_key: "test-key".to_string(),
            model: "gpt-test".to_string(),
            request_timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
            },
        })
        .expect("engine")
    }

    fn turn(input: TurnInput) -> EngineTurn {
        EngineTurn {
            session_id: "sess-1".to_string(),
            previous_response_id: Some("resp-0".to_string()),
            instructions: "You are a helpful assistant.".to_string(),
            input,
            tools: vec![ToolDefinition {
                name: "list_events".to_string(),
                description: "List calendar events".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            }],
        }
    }

    #[tokio::test]
    async fn extracts_text_and_function_calls() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/responses")
                .header("authorization", "Bearer test-key")
                .json_body_partial(r#"{"previous_response_id": "resp-0"}"#);
            then.status(200).json_body(json!({
                "id": "resp-1",
                "output": [
                    {"type": "message", "content": [
                        {"type": "output_text", "text": "Checking your calendar."}
                    ]},
                    {"type": "function_call", "call_id": "call-1",
                     "name": "list_events", "arguments": "{\"max\": 5}"},
                    {"type": "reasoning"}
                ]
            }));
        });

        let reply = engine(server.base_url())
            .run_turn(&turn(TurnInput::UserMessage("what's on today?".to_string())))
            .await
            .expect("reply");
        mock.assert();

        assert_eq!(reply.response_id, "resp-1");
        assert_eq!(reply.assistant_text.as_deref(), Some("Checking your calendar."));
        assert_eq!(
            reply.tool_calls,
            vec![EngineToolCall {
                call_id: "call-1".to_string(),
                name: "list_events".to_string(),
                arguments: json!({"max": 5}),
            }]
        );
    }

    #[tokio::test]
    async fn tool_outputs_are_sent_as_function_call_output_items() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/responses")
                .body_contains("function_call_output")
                .body_contains("call-1");
            then.status(200).json_body(json!({
                "id": "resp-2",
                "output": [],
                "output_text": "Done."
            }));
        });

        let reply = engine(server.base_url())
            .run_turn(&turn(TurnInput::ToolOutputs(vec![crate::ToolOutput {
                call_id: "call-1".to_string(),
                output: json!({"events": []}),
            }])))
            .await
            .expect("reply");
        mock.assert();
        assert_eq!(reply.assistant_text.as_deref(), Some("Done."));
        assert!(!reply.wants_tools());
    }

    #[tokio::test]
    async fn retries_a_transient_5xx_then_succeeds() {
        let server = MockServer::start();
        let failing = server.mock(|when, then| {
            when.method(POST).path("/v1/responses");
            then.status(503).body("unavailable");
        });

        let result = engine(server.base_url())
            .run_turn(&turn(TurnInput::UserMessage("hi".to_string())))
            .await;
        assert!(matches!(
            result,
            Err(EngineError::HttpStatus { status: 503, .. })
        ));
        // Both attempts hit the server.
        failing.assert_hits(2);
    }

    #[tokio::test]
    async fn malformed_arguments_are_rejected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/responses");
            then.status(200).json_body(json!({
                "id": "resp-3",
                "output": [
                    {"type": "function_call", "call_id": "call-1",
                     "name": "list_events", "arguments": "not json"}
                ]
            }));
        });

        let result = engine(server.base_url())
            .run_turn(&turn(TurnInput::UserMessage("hi".to_string())))
            .await;
        assert!(matches!(result, Err(EngineError::InvalidResponse(_))));
    }
}
