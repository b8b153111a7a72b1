//! The static tool catalog advertised to the engine every round.
//!
//! The catalog must stay stable within a session; it is built once and
//! shared. Write tools carry the action type that shows up on approval
//! requests.

use serde_json::{json, Value};

use valet_domain::WriteActionType;
use valet_engine::ToolDefinition;
use valet_store::ConnectorScope;

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
    pub is_write: bool,
    pub action_type: Option<WriteActionType>,
    pub connector_scope: Option<ConnectorScope>,
}

impl ToolSpec {
    fn read(name: &'static str, description: &'static str, parameters: Value) -> Self {
        Self {
            name,
            description,
            parameters,
            is_write: false,
            action_type: None,
            connector_scope: None,
        }
    }

    fn write(
        name: &'static str,
        description: &'static str,
        parameters: Value,
        action_type: WriteActionType,
        connector_scope: Option<ConnectorScope>,
    ) -> Self {
        Self {
            name,
            description,
            parameters,
            is_write: true,
            action_type: Some(action_type),
            connector_scope,
        }
    }

    fn with_scope(mut self, scope: ConnectorScope) -> Self {
        self.connector_scope = Some(scope);
        self
    }
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

pub fn catalog() -> Vec<ToolSpec> {
    vec![
        ToolSpec::read(
            "get_profile",
            "Fetch the user's profile: preferred name, timezone, signature style, and which accounts are connected.",
            object_schema(json!({}), &[]),
        ),
        ToolSpec::read(
            "update_profile",
            "Update the user's stored preferences (timezone, email signature style).",
            object_schema(
                json!({
                    "timezone": {"type": "string", "description": "IANA timezone, e.g. Europe/Paris"},
                    "email_signature_style": {"type": "string"},
                }),
                &[],
            ),
        ),
        ToolSpec::read(
            "search_conversation",
            "Search the user's past conversation transcript for matching messages.",
            object_schema(
                json!({
                    "query": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 50},
                }),
                &["query"],
            ),
        ),
        ToolSpec::read(
            "list_events",
            "List upcoming calendar events in a time window.",
            object_schema(
                json!({
                    "time_min": {"type": "string", "description": "RFC 3339 lower bound"},
                    "time_max": {"type": "string", "description": "RFC 3339 upper bound"},
                    "max_results": {"type": "integer", "minimum": 1, "maximum": 50},
                }),
                &[],
            ),
        )
        .with_scope(ConnectorScope::Calendar),
        ToolSpec::read(
            "get_event",
            "Fetch one calendar event by id.",
            object_schema(json!({"event_id": {"type": "string"}}), &["event_id"]),
        )
        .with_scope(ConnectorScope::Calendar),
        ToolSpec::read(
            "check_availability",
            "Check whether a time window is free of calendar events.",
            object_schema(
                json!({
                    "time_min": {"type": "string"},
                    "time_max": {"type": "string"},
                }),
                &["time_min", "time_max"],
            ),
        )
        .with_scope(ConnectorScope::Calendar),
        ToolSpec::write(
            "create_event",
            "Create a calendar event. Requires the user's confirmation before it runs.",
            object_schema(
                json!({
                    "summary": {"type": "string"},
                    "start": {"type": "string", "description": "RFC 3339 start time"},
                    "end": {"type": "string", "description": "RFC 3339 end time"},
                    "description": {"type": "string"},
                    "attendees": {"type": "array", "items": {"type": "string"}},
                }),
                &["summary", "start", "end"],
            ),
            WriteActionType::CreateEvent,
            Some(ConnectorScope::Calendar),
        ),
        ToolSpec::write(
            "update_event",
            "Update an existing calendar event. Requires the user's confirmation before it runs.",
            object_schema(
                json!({
                    "event_id": {"type": "string"},
                    "summary": {"type": "string"},
                    "start": {"type": "string"},
                    "end": {"type": "string"},
                    "description": {"type": "string"},
                }),
                &["event_id"],
            ),
            WriteActionType::UpdateEvent,
            Some(ConnectorScope::Calendar),
        ),
        ToolSpec::read(
            "list_emails",
            "List recent emails from the user's inbox.",
            object_schema(
                json!({
                    "max_results": {"type": "integer", "minimum": 1, "maximum": 50},
                    "label": {"type": "string"},
                }),
                &[],
            ),
        )
        .with_scope(ConnectorScope::Email),
        ToolSpec::read(
            "read_email",
            "Fetch one email by id.",
            object_schema(json!({"message_id": {"type": "string"}}), &["message_id"]),
        )
        .with_scope(ConnectorScope::Email),
        ToolSpec::read(
            "search_emails",
            "Search the user's mailbox with a provider query string.",
            object_schema(
                json!({
                    "query": {"type": "string"},
                    "max_results": {"type": "integer", "minimum": 1, "maximum": 50},
                }),
                &["query"],
            ),
        )
        .with_scope(ConnectorScope::Email),
        ToolSpec::write(
            "send_email",
            "Send an email from the user's account. Requires the user's confirmation before it runs.",
            object_schema(
                json!({
                    "to": {"type": "string"},
                    "subject": {"type": "string"},
                    "body": {"type": "string"},
                    "cc": {"type": "array", "items": {"type": "string"}},
                }),
                &["to", "subject", "body"],
            ),
            WriteActionType::SendEmail,
            Some(ConnectorScope::Email),
        ),
        ToolSpec::write(
            "draft_email",
            "Save an email as a draft in the user's account without sending it. Requires the user's confirmation before it runs.",
            object_schema(
                json!({
                    "to": {"type": "string"},
                    "subject": {"type": "string"},
                    "body": {"type": "string"},
                    "cc": {"type": "array", "items": {"type": "string"}},
                }),
                &["to", "subject", "body"],
            ),
            WriteActionType::SendEmail,
            Some(ConnectorScope::Email),
        ),
        ToolSpec::read(
            "browse_page",
            "Fetch a web page from an allowlisted domain and return its text.",
            object_schema(json!({"url": {"type": "string"}}), &["url"]),
        ),
        ToolSpec::write(
            "submit_form",
            "Submit a form to an allowlisted domain. Requires the user's confirmation before it runs.",
            object_schema(
                json!({
                    "url": {"type": "string"},
                    "fields": {"type": "object"},
                }),
                &["url", "fields"],
            ),
            WriteActionType::SubmitForm,
            None,
        ),
        ToolSpec::read(
            "create_reminder",
            "Create a reminder for the user.",
            object_schema(
                json!({
                    "title": {"type": "string"},
                    "due_at": {"type": "string", "description": "RFC 3339 due time"},
                }),
                &["title"],
            ),
        ),
        ToolSpec::read(
            "list_reminders",
            "List the user's active reminders.",
            object_schema(json!({}), &[]),
        ),
        ToolSpec::read(
            "cancel_reminder",
            "Cancel an active reminder by id.",
            object_schema(json!({"reminder_id": {"type": "string"}}), &["reminder_id"]),
        ),
        ToolSpec::read(
            "create_task",
            "Add a task to the user's task list.",
            object_schema(
                json!({
                    "title": {"type": "string"},
                    "due_at": {"type": "string"},
                }),
                &["title"],
            ),
        ),
        ToolSpec::read(
            "list_tasks",
            "List the user's tasks.",
            object_schema(
                json!({"include_done": {"type": "boolean"}}),
                &[],
            ),
        ),
        ToolSpec::read(
            "complete_task",
            "Mark a task as done.",
            object_schema(json!({"task_id": {"type": "string"}}), &["task_id"]),
        ),
        ToolSpec::read(
            "list_pending_approvals",
            "List write actions that are still waiting for the user's confirmation.",
            object_schema(json!({}), &[]),
        ),
    ]
}

/// The catalog in the shape the engine protocol expects.
pub fn engine_tool_definitions() -> Vec<ToolDefinition> {
    catalog()
        .into_iter()
        .map(|spec| ToolDefinition {
            name: spec.name.to_string(),
            description: spec.description.to_string(),
            parameters: spec.parameters,
        })
        .collect()
}
