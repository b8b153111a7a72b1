//! The turn orchestration loop: one inbound message in, one reply out.
//!
//! The loop runs under a per-person advisory lock, drives the engine
//! through bounded tool-calling rounds, gates write tools behind the
//! approval ledger, and parks the conversation on the first gated call.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{json, Value};

use valet_core::{AdvisoryLocks, KvCache};
use valet_domain::{
    advance_onboarding, can_execute_read, onboarding_prompt, requires_approval, Channel,
    InboundMessage, MessageDirection, OnboardingState, OutboundMessage, Person,
};
use valet_engine::{EngineTurn, ToolOutput, TurnEngine, TurnInput};
use valet_store::{ApprovalCreation, InvocationStatus, InvocationWrite, Store};
use valet_tools::{engine_tool_definitions, ResolvedCall, ToolCallError, ToolExecutor, ToolRegistry};

use crate::config::GatewayConfig;
use crate::continuity::{SessionContinuity, SessionHandle};
use crate::identity::IdentityResolver;
use crate::senders::ChannelRouter;

const BUSY_REPLY: &str = "Still finishing up your last request. Give me a few seconds and try again.";
const FALLBACK_REPLY: &str = "I processed your request.";
const FAILURE_REPLY: &str = "Sorry, something went wrong while processing that. Please try again.";
const WRITES_DISABLED_REPLY: &str =
    "Actions that change things are temporarily disabled. I can still look things up for you.";
const VERIFY_PHONE_REPLY: &str =
    "I need a verified phone number before we continue. Text me from your mobile number to verify it.";

pub struct TurnRouter {
    store: Arc<Store>,
    cache: Arc<KvCache>,
    locks: AdvisoryLocks,
    identity: IdentityResolver,
    continuity: SessionContinuity,
    registry: ToolRegistry,
    executor: Arc<ToolExecutor>,
    engine: Arc<dyn TurnEngine>,
    channels: Arc<ChannelRouter>,
    config: GatewayConfig,
}

impl TurnRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        cache: Arc<KvCache>,
        executor: Arc<ToolExecutor>,
        engine: Arc<dyn TurnEngine>,
        channels: Arc<ChannelRouter>,
        config: GatewayConfig,
    ) -> Result<Self> {
        Ok(Self {
            locks: AdvisoryLocks::new(Arc::clone(&cache), config.lock_ttl),
            identity: IdentityResolver::new(Arc::clone(&store), Arc::clone(&cache)),
            continuity: SessionContinuity::new(
                Arc::clone(&store),
                Arc::clone(&cache),
                config.session_ttl,
            ),
            registry: ToolRegistry::new()?,
            store,
            cache,
            executor,
            engine,
            channels,
            config,
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Full inbound path: resolve identity, run onboarding or the turn
    /// loop, persist and deliver the reply.
    pub async fn handle_inbound(&self, inbound: &InboundMessage) -> Result<OutboundMessage> {
        // Carrier-backed channels verify the phone number for us.
        let phone_verified = matches!(inbound.channel, Channel::Sms | Channel::Whatsapp)
            && inbound.phone_e164.is_some();
        let mut person = self.identity.resolve(
            inbound.channel,
            &inbound.external_user_key,
            inbound.phone_e164.as_deref(),
            phone_verified,
        )?;

        self.store.insert_message(
            &person.id,
            inbound.channel,
            MessageDirection::Inbound,
            &inbound.text,
            Some(&inbound.provider_message_id),
            None,
        )?;
        self.store.append_audit(
            Some(&person.id),
            "MESSAGE_INBOUND",
            Some("message"),
            Some(&inbound.provider_message_id),
            Some(&json!({"channel": inbound.channel})),
        )?;

        if phone_verified && !person.phone_verified {
            if let Some(phone) = inbound.phone_e164.as_deref() {
                self.store.mark_phone_verified(&person.id, phone)?;
                person.phone_verified = true;
                person.phone_e164 = Some(phone.to_string());
            }
        }

        let text = self.reply_for(&person, inbound).await?;
        let outbound = OutboundMessage {
            channel: inbound.channel,
            external_user_key: inbound.external_user_key.clone(),
            text,
        };
        self.channels.deliver(&outbound).await?;
        self.store.insert_message(
            &person.id,
            outbound.channel,
            MessageDirection::Outbound,
            &outbound.text,
            None,
            None,
        )?;
        self.store.append_audit(
            Some(&person.id),
            "MESSAGE_OUTBOUND",
            Some("message"),
            None,
            Some(&json!({"channel": outbound.channel})),
        )?;
        Ok(outbound)
    }

    async fn reply_for(&self, person: &Person, inbound: &InboundMessage) -> Result<String> {
        // A staged identity-merge code short-circuits everything else.
        let trimmed = inbound.text.trim();
        if trimmed.starts_with("merge-") {
            return Ok(if self.identity.complete_merge(trimmed)? {
                "Your accounts are now linked.".to_string()
            } else {
                "That link code is invalid or has expired.".to_string()
            });
        }

        // An unverified phone claim on an existing verified account gets a
        // merge offer instead of silent linking.
        let phone_claims_other = match inbound.phone_e164.as_deref() {
            Some(phone) if !matches!(inbound.channel, Channel::Sms | Channel::Whatsapp) => self
                .store
                .find_person_by_phone(phone)?
                .filter(|other| other.phone_verified && other.id != person.id),
            _ => None,
        };
        if let Some(existing) = phone_claims_other {
            let token = self.identity.begin_merge(&person.id, &existing.id);
            return Ok(format!(
                "That phone number already belongs to a Valet account. \
                 Reply {token} within 10 minutes to link this chat to it."
            ));
        }

        // Phone-first product: no onboarding and no engine call until a
        // carrier-verified number is on the account.
        if !person.phone_verified {
            return Ok(VERIFY_PHONE_REPLY.to_string());
        }

        if person.onboarding_state != OnboardingState::Active {
            return self.advance_onboarding_reply(person, &inbound.text);
        }

        let Some(_guard) = self.locks.acquire(&person.id) else {
            tracing::debug!(person = person.id, "turn lock is busy");
            return Ok(BUSY_REPLY.to_string());
        };
        match self.run_turn(person, inbound).await {
            Ok(reply) => Ok(reply),
            Err(error) => {
                tracing::error!(person = person.id, %error, "turn loop failed");
                Ok(FAILURE_REPLY.to_string())
            }
        }
    }

    fn advance_onboarding_reply(&self, person: &Person, text: &str) -> Result<String> {
        let state = person.onboarding_state;
        // A brand-new person's first message opens the conversation; it is
        // not consumed as their name.
        if state == OnboardingState::AskName
            && person.preferred_name.is_none()
            && self.store.recent_messages(&person.id, 2)?.len() <= 1
        {
            return Ok(onboarding_prompt(state).to_string());
        }
        let step = advance_onboarding(state, text);
        if state == OnboardingState::AskName && step.next_state != state {
            self.store.update_preferred_name(&person.id, text.trim())?;
        }
        if step.next_state != state {
            self.store.update_onboarding_state(&person.id, step.next_state)?;
        }
        tracing::debug!(
            person = person.id,
            from = state.as_str(),
            to = step.next_state.as_str(),
            "onboarding advanced"
        );
        Ok(step.response)
    }

    async fn run_turn(&self, person: &Person, inbound: &InboundMessage) -> Result<String> {
        let (mut handle, provisioned) = self
            .continuity
            .ensure(&person.id, || async {
                Ok(SessionHandle {
                    session_id: valet_core::new_entity_id("sess"),
                    last_response_id: None,
                })
            })
            .await?;
        if provisioned {
            self.store.append_audit(
                Some(&person.id),
                "RUNTIME_PROVISIONED",
                Some("session"),
                Some(&handle.session_id),
                None,
            )?;
        }

        let tools = engine_tool_definitions();
        let mut input = TurnInput::UserMessage(inbound.text.clone());
        let mut last_text: Option<String> = None;

        for round in 0..self.config.max_rounds {
            let turn = EngineTurn {
                session_id: handle.session_id.clone(),
                previous_response_id: handle.last_response_id.clone(),
                instructions: self.config.instructions.clone(),
                input,
                tools: tools.clone(),
            };
            let reply = self.engine.run_turn(&turn).await?;

            handle.last_response_id = Some(reply.response_id.clone());
            self.continuity
                .update_checkpoint(&person.id, &reply.response_id)?;
            self.store.append_audit(
                Some(&person.id),
                "ENGINE_EXECUTION",
                Some("response"),
                Some(&reply.response_id),
                Some(&json!({"round": round, "tool_calls": reply.tool_calls.len()})),
            )?;

            if let Some(text) = reply.assistant_text.clone().filter(|text| !text.is_empty()) {
                last_text = Some(text);
            }
            if reply.tool_calls.is_empty() {
                return Ok(last_text.unwrap_or_else(|| FALLBACK_REPLY.to_string()));
            }

            let policy = self.store.permission_policy(&person.id)?;
            let mut outputs: Vec<ToolOutput> = Vec::with_capacity(reply.tool_calls.len());
            for call in &reply.tool_calls {
                let resolved =
                    match self
                        .registry
                        .resolve(&call.call_id, &call.name, call.arguments.clone())
                    {
                        Ok(resolved) => resolved,
                        Err(error) => {
                            outputs.push(invalid_call_output(&call.call_id, &error));
                            continue;
                        }
                    };

                if resolved.is_write {
                    if self.config.writes_disabled {
                        self.record_blocked_write(&person.id, &resolved)?;
                        outputs.push(ToolOutput {
                            call_id: resolved.call_id.clone(),
                            output: json!({
                                "ok": false,
                                "error": "writes_disabled",
                                "detail": WRITES_DISABLED_REPLY,
                            }),
                        });
                        last_text = Some(WRITES_DISABLED_REPLY.to_string());
                        continue;
                    }

                    let action_type = resolved
                        .action_type
                        .context("write tool without an action type")?;
                    if self.config.strict_approvals || requires_approval(&policy, action_type) {
                        return self
                            .park_on_approval(person, inbound, &handle, &resolved)
                            .await;
                    }

                    // Policy allows direct writes; execute once, no retry.
                    let output = match self
                        .executor
                        .execute_write(&person.id, &resolved, None)
                        .await
                    {
                        Ok(output) => output,
                        Err(error) => json!({
                            "ok": false,
                            "error": "tool_failed",
                            "detail": error.to_string(),
                        }),
                    };
                    outputs.push(ToolOutput {
                        call_id: resolved.call_id.clone(),
                        output,
                    });
                    continue;
                }

                if !can_execute_read(&policy) {
                    outputs.push(ToolOutput {
                        call_id: resolved.call_id.clone(),
                        output: json!({
                            "ok": false,
                            "error": "reads_disabled",
                            "detail": "this account is not permitted to run lookup tools",
                        }),
                    });
                    continue;
                }
                let output = self.executor.execute_read(&person.id, &resolved).await;
                outputs.push(ToolOutput {
                    call_id: resolved.call_id.clone(),
                    output,
                });
            }

            input = TurnInput::ToolOutputs(outputs);
        }

        // Round budget exhausted; fall back to the last assistant text.
        tracing::warn!(person = person.id, "turn hit the round bound");
        Ok(last_text.unwrap_or_else(|| FALLBACK_REPLY.to_string()))
    }

    /// Creates the approval ledger entry, caches the resume payload, and
    /// returns the confirmation prompt. The loop stops here; the worker
    /// resumes the session after the user decides.
    async fn park_on_approval(
        &self,
        person: &Person,
        inbound: &InboundMessage,
        handle: &SessionHandle,
        resolved: &ResolvedCall,
    ) -> Result<String> {
        let action_type = resolved
            .action_type
            .context("write tool without an action type")?;
        let summary = describe_action(resolved);
        let creation = ApprovalCreation {
            person_id: person.id.clone(),
            action_type,
            tool_name: resolved.name.clone(),
            tool_call_id: resolved.call_id.clone(),
            tool_input: resolved.arguments.clone(),
            engine_session_id: handle.session_id.clone(),
            engine_response_id: handle.last_response_id.clone(),
            origin_channel: inbound.channel,
            origin_external_user_key: inbound.external_user_key.clone(),
            idempotency_key: format!("{}:{}", handle.session_id, resolved.call_id),
            summary: summary.clone(),
            ttl: self.config.approval_ttl,
        };
        let (record, raw_token) = self.store.create_approval(&creation)?;

        self.cache.set_with_ttl(
            &format!("resume:approval:{}", record.id),
            &serde_json::to_string(&json!({
                "session_id": record.engine_session_id,
                "response_id": record.engine_response_id,
                "call_id": record.tool_call_id,
            }))?,
            self.config.resume_payload_ttl,
        );
        self.executor
            .record_deferred(&person.id, resolved, &record.id);
        self.store.append_audit(
            Some(&person.id),
            "APPROVAL_CREATED",
            Some("approval"),
            Some(&record.id),
            Some(&json!({"action_type": action_type, "tool": resolved.name})),
        )?;

        match raw_token {
            Some(token) => {
                let base = self.config.approval_link_base.trim_end_matches('/');
                Ok(format!(
                    "Before I {summary}, I need your go-ahead.\n\
                     Approve: {base}/approvals/{token}/confirm\n\
                     Reject: {base}/approvals/{token}/reject\n\
                     This link expires in {} minutes.",
                    self.config.approval_ttl.as_secs() / 60
                ))
            }
            // Duplicate call id within the same session; the original
            // prompt already carried the link.
            None => Ok(format!(
                "I still need your confirmation before I {summary}. \
                 Use the link I sent earlier."
            )),
        }
    }

    fn record_blocked_write(&self, person_id: &str, resolved: &ResolvedCall) -> Result<()> {
        self.store.record_invocation(&InvocationWrite {
            person_id,
            tool_name: &resolved.name,
            tool_call_id: Some(&resolved.call_id),
            input: &resolved.arguments,
            output: None,
            status: InvocationStatus::Failed,
            retry_count: 0,
            latency_ms: 0,
            error_code: Some("writes_disabled"),
            approval_request_id: None,
        })?;
        self.store.append_audit(
            Some(person_id),
            "WRITE_BLOCKED",
            Some("tool"),
            Some(&resolved.name),
            None,
        )?;
        Ok(())
    }
}

fn invalid_call_output(call_id: &str, error: &ToolCallError) -> ToolOutput {
    let code = match error {
        ToolCallError::NotAllowed { .. } => "tool_not_allowed",
        ToolCallError::SchemaInvalid { .. } => "invalid_arguments",
    };
    ToolOutput {
        call_id: call_id.to_string(),
        output: json!({"ok": false, "error": code, "detail": error.to_string()}),
    }
}

/// Human summary of a write call for confirmation prompts.
fn describe_action(resolved: &ResolvedCall) -> String {
    let args: &Value = &resolved.arguments;
    match resolved.name.as_str() {
        "send_email" => match args["to"].as_str() {
            Some(to) => format!("send an email to {to}"),
            None => "send an email".to_string(),
        },
        "draft_email" => match args["to"].as_str() {
            Some(to) => format!("save a draft email to {to}"),
            None => "save a draft email".to_string(),
        },
        "create_event" => match args["summary"].as_str() {
            Some(summary) => format!("create the event \"{summary}\""),
            None => "create a calendar event".to_string(),
        },
        "update_event" => "update a calendar event".to_string(),
        "submit_form" => match args["url"].as_str() {
            Some(url) => format!("submit a form at {url}"),
            None => "submit a form".to_string(),
        },
        other => format!("run {other}"),
    }
}
