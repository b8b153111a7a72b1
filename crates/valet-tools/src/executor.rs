//! Tool execution: dispatch, bounded retry for reads, invocation audit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

use valet_store::{ConnectorScope, InvocationStatus, InvocationWrite, Store, TokenCipher};

use crate::browser::BrowserClient;
use crate::google::GoogleProvider;
use crate::registry::ResolvedCall;

#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// Extra attempts after the first failure, read-only tools only.
    pub read_retry_attempts: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            read_retry_attempts: 2,
        }
    }
}

pub struct ToolExecutor {
    store: Arc<Store>,
    cipher: TokenCipher,
    google: GoogleProvider,
    browser: BrowserClient,
    config: ExecutorConfig,
}

impl ToolExecutor {
    pub fn new(
        store: Arc<Store>,
        cipher: TokenCipher,
        google: GoogleProvider,
        browser: BrowserClient,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            cipher,
            google,
            browser,
            config,
        }
    }

    /// Executes a read-only call with bounded retry. Always returns a
    /// structured output suitable for feeding back to the engine; failures
    /// become `{ok:false, ...}` rather than errors.
    pub async fn execute_read(&self, person_id: &str, call: &ResolvedCall) -> Value {
        let attempts = 1 + self.config.read_retry_attempts;
        let mut last_error = None;
        for attempt in 0..attempts {
            let started = Instant::now();
            match self.dispatch(person_id, call).await {
                Ok(output) => {
                    let output = json!({"ok": true, "result": output});
                    self.record(person_id, call, Some(&output), InvocationStatus::Succeeded, attempt, started, None, None);
                    return output;
                }
                Err(error) => {
                    tracing::warn!(
                        tool = call.name,
                        attempt,
                        %error,
                        "read tool attempt failed"
                    );
                    self.record(
                        person_id,
                        call,
                        None,
                        InvocationStatus::Failed,
                        attempt,
                        started,
                        Some("tool_failed"),
                        None,
                    );
                    last_error = Some(error);
                }
            }
        }
        let detail = last_error
            .map(|error| error.to_string())
            .unwrap_or_else(|| "unknown failure".to_string());
        json!({"ok": false, "error": "tool_failed", "detail": detail})
    }

    /// Executes a write call exactly once. Failures are surfaced to the
    /// caller (the approval worker marks the request FAILED).
    pub async fn execute_write(
        &self,
        person_id: &str,
        call: &ResolvedCall,
        approval_request_id: Option<&str>,
    ) -> Result<Value> {
        let started = Instant::now();
        match self.dispatch(person_id, call).await {
            Ok(output) => {
                let output = json!({"ok": true, "result": output});
                self.record(
                    person_id,
                    call,
                    Some(&output),
                    InvocationStatus::Succeeded,
                    0,
                    started,
                    None,
                    approval_request_id,
                );
                Ok(output)
            }
            Err(error) => {
                self.record(
                    person_id,
                    call,
                    None,
                    InvocationStatus::Failed,
                    0,
                    started,
                    Some("tool_failed"),
                    approval_request_id,
                );
                Err(error)
            }
        }
    }

    /// Audit row for a call that was parked behind an approval.
    pub fn record_deferred(&self, person_id: &str, call: &ResolvedCall, approval_request_id: &str) {
        self.record(
            person_id,
            call,
            None,
            InvocationStatus::PendingApproval,
            0,
            Instant::now(),
            None,
            Some(approval_request_id),
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        person_id: &str,
        call: &ResolvedCall,
        output: Option<&Value>,
        status: InvocationStatus,
        retry_count: u32,
        started: Instant,
        error_code: Option<&str>,
        approval_request_id: Option<&str>,
    ) {
        let write = InvocationWrite {
            person_id,
            tool_name: &call.name,
            tool_call_id: Some(&call.call_id),
            input: &call.arguments,
            output,
            status,
            retry_count,
            latency_ms: started.elapsed().as_millis() as u64,
            error_code,
            approval_request_id,
        };
        if let Err(error) = self.store.record_invocation(&write) {
            tracing::error!(%error, tool = call.name, "failed to record tool invocation");
        }
        if status == InvocationStatus::Succeeded {
            if let Err(error) = self.store.append_audit(
                Some(person_id),
                "TOOL_EXECUTED",
                Some("tool"),
                Some(&call.name),
                None,
            ) {
                tracing::warn!(%error, tool = call.name, "failed to append tool audit event");
            }
        }
    }

    async fn google_token(&self, person_id: &str, scope: ConnectorScope) -> Result<String> {
        self.google
            .access_token(&self.store, &self.cipher, person_id, scope)
            .await
    }

    async fn dispatch(&self, person_id: &str, call: &ResolvedCall) -> Result<Value> {
        let args = &call.arguments;
        match call.name.as_str() {
            "get_profile" => {
                let person = self
                    .store
                    .find_person(person_id)?
                    .context("person not found")?;
                Ok(json!({
                    "preferred_name": person.preferred_name,
                    "timezone": person.timezone,
                    "email_signature_style": person.email_signature_style,
                    "calendar_connected": self.store.connector_is_linked(
                        person_id, "google", ConnectorScope::Calendar)?,
                    "email_connected": self.store.connector_is_linked(
                        person_id, "google", ConnectorScope::Email)?,
                    "skills": self.store.list_enabled_skills(person_id)?,
                }))
            }
            "update_profile" => {
                self.store.set_profile_preferences(
                    person_id,
                    args["timezone"].as_str(),
                    args["email_signature_style"].as_str(),
                )?;
                Ok(json!({"updated": true}))
            }
            "search_conversation" => {
                let query = args["query"].as_str().context("query is required")?;
                let limit = args["limit"].as_u64().unwrap_or(10) as u32;
                let hits = self.store.search_messages(person_id, query, limit)?;
                let items: Vec<Value> = hits
                    .iter()
                    .map(|hit| {
                        json!({
                            "direction": hit.direction,
                            "body": hit.body,
                            "at": hit.created_at,
                        })
                    })
                    .collect();
                Ok(json!({"matches": items}))
            }
            "list_events" => {
                let token = self.google_token(person_id, ConnectorScope::Calendar).await?;
                self.google
                    .list_events(
                        &token,
                        args["time_min"].as_str(),
                        args["time_max"].as_str(),
                        args["max_results"].as_u64().unwrap_or(10) as u32,
                    )
                    .await
            }
            "get_event" => {
                let token = self.google_token(person_id, ConnectorScope::Calendar).await?;
                let event_id = args["event_id"].as_str().context("event_id is required")?;
                self.google.get_event(&token, event_id).await
            }
            "check_availability" => {
                let token = self.google_token(person_id, ConnectorScope::Calendar).await?;
                let events = self
                    .google
                    .list_events(
                        &token,
                        args["time_min"].as_str(),
                        args["time_max"].as_str(),
                        10,
                    )
                    .await?;
                let busy = events["items"]
                    .as_array()
                    .map(|items| !items.is_empty())
                    .unwrap_or(false);
                Ok(json!({"available": !busy}))
            }
            "create_event" => {
                let token = self.google_token(person_id, ConnectorScope::Calendar).await?;
                self.google.create_event(&token, args).await
            }
            "update_event" => {
                let token = self.google_token(person_id, ConnectorScope::Calendar).await?;
                self.google.update_event(&token, args).await
            }
            "list_emails" => {
                let token = self.google_token(person_id, ConnectorScope::Email).await?;
                let query = args["label"].as_str().map(|label| format!("label:{label}"));
                self.google
                    .list_messages(
                        &token,
                        query.as_deref(),
                        args["max_results"].as_u64().unwrap_or(10) as u32,
                    )
                    .await
            }
            "read_email" => {
                let token = self.google_token(person_id, ConnectorScope::Email).await?;
                let message_id = args["message_id"].as_str().context("message_id is required")?;
                self.google.get_message(&token, message_id).await
            }
            "search_emails" => {
                let token = self.google_token(person_id, ConnectorScope::Email).await?;
                self.google
                    .list_messages(
                        &token,
                        args["query"].as_str(),
                        args["max_results"].as_u64().unwrap_or(10) as u32,
                    )
                    .await
            }
            "send_email" => {
                let token = self.google_token(person_id, ConnectorScope::Email).await?;
                self.google.send_email(&token, args).await
            }
            "draft_email" => {
                let token = self.google_token(person_id, ConnectorScope::Email).await?;
                self.google.create_draft(&token, args).await
            }
            "browse_page" => {
                let url = args["url"].as_str().context("url is required")?;
                self.browser.fetch_page(url).await
            }
            "submit_form" => {
                let url = args["url"].as_str().context("url is required")?;
                let fields = form_fields(&args["fields"])?;
                self.browser.submit_form(url, &fields).await
            }
            "create_reminder" => {
                let title = args["title"].as_str().context("title is required")?;
                let reminder =
                    self.store
                        .create_reminder(person_id, title, args["due_at"].as_str())?;
                Ok(json!({"reminder_id": reminder.id}))
            }
            "list_reminders" => {
                let reminders = self.store.list_reminders(person_id)?;
                let items: Vec<Value> = reminders
                    .iter()
                    .map(|reminder| {
                        json!({
                            "id": reminder.id,
                            "title": reminder.title,
                            "due_at": reminder.due_at,
                        })
                    })
                    .collect();
                Ok(json!({"reminders": items}))
            }
            "cancel_reminder" => {
                let reminder_id = args["reminder_id"].as_str().context("reminder_id is required")?;
                let cancelled = self.store.cancel_reminder(person_id, reminder_id)?;
                if !cancelled {
                    bail!("reminder {reminder_id} is not active");
                }
                Ok(json!({"cancelled": true}))
            }
            "create_task" => {
                let title = args["title"].as_str().context("title is required")?;
                let task = self.store.create_task(person_id, title, args["due_at"].as_str())?;
                Ok(json!({"task_id": task.id}))
            }
            "list_tasks" => {
                let include_done = args["include_done"].as_bool().unwrap_or(false);
                let tasks = self.store.list_tasks(person_id, include_done)?;
                let items: Vec<Value> = tasks
                    .iter()
                    .map(|task| {
                        json!({
                            "id": task.id,
                            "title": task.title,
                            "due_at": task.due_at,
                            "status": task.status,
                        })
                    })
                    .collect();
                Ok(json!({"tasks": items}))
            }
            "complete_task" => {
                let task_id = args["task_id"].as_str().context("task_id is required")?;
                let completed = self.store.complete_task(person_id, task_id)?;
                if !completed {
                    bail!("task {task_id} is not open");
                }
                Ok(json!({"completed": true}))
            }
            "list_pending_approvals" => {
                let approvals = self.store.list_pending_approvals(Some(person_id))?;
                let items: Vec<Value> = approvals
                    .iter()
                    .map(|approval| {
                        json!({
                            "id": approval.id,
                            "action_type": approval.action_type,
                            "tool_name": approval.tool_name,
                            "created_at": approval.created_at,
                        })
                    })
                    .collect();
                Ok(json!({"pending": items}))
            }
            other => bail!("tool {other:?} has no executor"),
        }
    }
}

fn form_fields(value: &Value) -> Result<HashMap<String, String>> {
    let object = value.as_object().context("fields must be an object")?;
    let mut fields = HashMap::with_capacity(object.len());
    for (key, value) in object {
        let rendered = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        fields.insert(key.clone(), rendered);
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::BrowserConfig;
    use crate::google::GoogleConfig;
    use crate::registry::ToolRegistry;
    use serde_json::json;
    use std::time::Duration;

    fn executor(store: Arc<Store>) -> ToolExecutor {
        ToolExecutor::new(
            store,
            TokenCipher::new("unit-secret").expect("cipher"),
            GoogleProvider::new(GoogleConfig::default()).expect("google"),
            BrowserClient::new(BrowserConfig::default()).expect("browser"),
            ExecutorConfig::default(),
        )
    }

    #[tokio::test]
    async fn local_tools_execute_and_audit() {
        let store = Arc::new(Store::open_in_memory().expect("store"));
        let person = store.insert_person(None, true).expect("person");
        let registry = ToolRegistry::new().expect("registry");
        let executor = executor(store.clone());

        let call = registry
            .resolve("call-1", "create_reminder", json!({"title": "water plants"}))
            .expect("resolve");
        let output = executor.execute_read(&person.id, &call).await;
        assert_eq!(output["ok"], true);

        let call = registry
            .resolve("call-2", "list_reminders", json!({}))
            .expect("resolve");
        let output = executor.execute_read(&person.id, &call).await;
        assert_eq!(output["result"]["reminders"].as_array().unwrap().len(), 1);

        let invocations = store.list_invocations(&person.id, 10).expect("audit");
        assert_eq!(invocations.len(), 2);
        assert!(invocations
            .iter()
            .all(|row| row.status == InvocationStatus::Succeeded));
    }

    #[tokio::test]
    async fn failed_reads_retry_then_return_structured_failure() {
        let store = Arc::new(Store::open_in_memory().expect("store"));
        let person = store.insert_person(None, true).expect("person");
        let registry = ToolRegistry::new().expect("registry");
        let executor = executor(store.clone());

        // Cancelling a reminder that does not exist fails on every attempt.
        let call = registry
            .resolve("call-1", "cancel_reminder", json!({"reminder_id": "rem-x"}))
            .expect("resolve");
        let output = executor.execute_read(&person.id, &call).await;
        assert_eq!(output["ok"], false);
        assert_eq!(output["error"], "tool_failed");

        let invocations = store.list_invocations(&person.id, 10).expect("audit");
        // One row per attempt: the first try plus two retries.
        assert_eq!(invocations.len(), 3);
        assert!(invocations
            .iter()
            .all(|row| row.status == InvocationStatus::Failed));
    }

    #[tokio::test]
    async fn write_failures_surface_to_the_caller() {
        let store = Arc::new(Store::open_in_memory().expect("store"));
        let person = store.insert_person(None, true).expect("person");
        let registry = ToolRegistry::new().expect("registry");
        let executor = executor(store.clone());

        // No connector row, so the send fails before reaching the network.
        let call = registry
            .resolve(
                "call-1",
                "send_email",
                json!({"to": "a@example.com", "subject": "hi", "body": "text"}),
            )
            .expect("resolve");
        let error = executor
            .execute_write(&person.id, &call, Some("appr-1"))
            .await
            .expect_err("must fail");
        assert!(error.to_string().contains("not connected"));

        let invocations = store.list_invocations(&person.id, 10).expect("audit");
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].status, InvocationStatus::Failed);
        assert_eq!(invocations[0].approval_request_id.as_deref(), Some("appr-1"));
    }

    #[tokio::test]
    async fn submit_form_rejects_non_allowlisted_domains() {
        let store = Arc::new(Store::open_in_memory().expect("store"));
        let person = store.insert_person(None, true).expect("person");
        let registry = ToolRegistry::new().expect("registry");
        let executor = executor(store);

        let call = registry
            .resolve(
                "call-1",
                "submit_form",
                json!({"url": "https://forms.example.com/x", "fields": {"a": "b"}}),
            )
            .expect("resolve");
        let error = executor
            .execute_write(&person.id, &call, None)
            .await
            .expect_err("must fail");
        assert!(error.to_string().contains("allowlist"));
    }
}
