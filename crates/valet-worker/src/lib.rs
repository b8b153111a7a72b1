//! Background worker that executes approved write actions.
//!
//! Claims approved-but-unexecuted ledger rows in batches, runs the deferred
//! tool call against the real provider, resumes the engine session with the
//! tool output, and delivers the closing message over the origin channel.
//! FAILED is terminal; the worker never re-runs a failed approval.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;

use valet_core::{truncate_chars, KvCache};
use valet_domain::OutboundMessage;
use valet_engine::{EngineTurn, ToolOutput, TurnEngine, TurnInput};
use valet_gateway::ChannelRouter;
use valet_store::{ApprovalRecord, Store};
use valet_tools::{ToolExecutor, ToolRegistry};

const FAILURE_DETAIL_LIMIT: usize = 200;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub batch_size: u32,
    /// Instructions for resumed engine turns; must match the gateway's.
    pub instructions: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            batch_size: 50,
            instructions: String::new(),
        }
    }
}

pub struct ApprovalWorker {
    store: Arc<Store>,
    cache: Arc<KvCache>,
    executor: Arc<ToolExecutor>,
    registry: ToolRegistry,
    /// None when no orchestration backend is configured; completion then
    /// falls back to a generic notice.
    engine: Option<Arc<dyn TurnEngine>>,
    channels: Arc<ChannelRouter>,
    config: WorkerConfig,
}

impl ApprovalWorker {
    pub fn new(
        store: Arc<Store>,
        cache: Arc<KvCache>,
        executor: Arc<ToolExecutor>,
        engine: Option<Arc<dyn TurnEngine>>,
        channels: Arc<ChannelRouter>,
        config: WorkerConfig,
    ) -> Result<Self> {
        Ok(Self {
            registry: ToolRegistry::new()?,
            store,
            cache,
            executor,
            engine,
            channels,
            config,
        })
    }

    /// Polls forever. Errors in one tick are logged, never fatal.
    pub async fn run(&self) {
        loop {
            if let Err(error) = self.tick().await {
                tracing::error!(%error, "worker tick failed");
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// One poll cycle: sweep expired approvals, claim a batch, execute.
    pub async fn tick(&self) -> Result<usize> {
        let expired = self.store.expire_stale_approvals()?;
        if expired > 0 {
            tracing::debug!(expired, "swept lapsed approvals");
        }

        let claimed = self.store.claim_approved(self.config.batch_size)?;
        let count = claimed.len();
        for record in claimed {
            if let Err(error) = self.process(&record).await {
                tracing::error!(approval = record.id, %error, "approval processing failed");
            }
        }
        Ok(count)
    }

    async fn process(&self, record: &ApprovalRecord) -> Result<()> {
        tracing::info!(
            approval = record.id,
            tool = record.tool_name,
            "executing approved action"
        );

        let resolved = match self.registry.resolve(
            &record.tool_call_id,
            &record.tool_name,
            record.tool_input.clone(),
        ) {
            Ok(resolved) => resolved,
            Err(error) => {
                return self.fail(record, &error.to_string()).await;
            }
        };

        let output = match self
            .executor
            .execute_write(&record.person_id, &resolved, Some(&record.id))
            .await
        {
            Ok(output) => output,
            Err(error) => {
                return self.fail(record, &error.to_string()).await;
            }
        };

        let text = self.resume_session(record, output).await;
        self.store.mark_approval_executed(&record.id)?;
        self.store.append_audit(
            Some(&record.person_id),
            "APPROVAL_EXECUTED",
            Some("approval"),
            Some(&record.id),
            None,
        )?;
        self.deliver(record, text).await;
        Ok(())
    }

    /// Feeds the tool output back into the engine session and extracts the
    /// closing assistant text. Any resumption problem degrades to a generic
    /// completion notice rather than blocking delivery.
    async fn resume_session(&self, record: &ApprovalRecord, output: serde_json::Value) -> String {
        let fallback = format!("Approved action {} was executed.", record.tool_name);
        let Some(engine) = &self.engine else {
            return fallback;
        };

        // The resume payload cache is a shortcut; the ledger row carries
        // everything needed when it has lapsed.
        let response_id = self
            .cache
            .get(&format!("resume:approval:{}", record.id))
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
            .and_then(|payload| payload["response_id"].as_str().map(str::to_string))
            .or_else(|| record.engine_response_id.clone());

        let turn = EngineTurn {
            session_id: record.engine_session_id.clone(),
            previous_response_id: response_id,
            instructions: self.config.instructions.clone(),
            input: TurnInput::ToolOutputs(vec![ToolOutput {
                call_id: record.tool_call_id.clone(),
                output,
            }]),
            tools: Vec::new(),
        };
        match engine.run_turn(&turn).await {
            Ok(reply) => {
                if let Err(error) = self
                    .store
                    .upsert_runtime_session(
                        &record.person_id,
                        &record.engine_session_id,
                        Some(&reply.response_id),
                        Duration::from_secs(600),
                    )
                    .map(|_| ())
                {
                    tracing::warn!(%error, "failed to mirror resumed checkpoint");
                }
                reply
                    .assistant_text
                    .filter(|text| !text.is_empty())
                    .unwrap_or(fallback)
            }
            Err(error) => {
                tracing::warn!(approval = record.id, %error, "session resume failed");
                fallback
            }
        }
    }

    async fn fail(&self, record: &ApprovalRecord, reason: &str) -> Result<()> {
        let reason = truncate_chars(reason, FAILURE_DETAIL_LIMIT);
        self.store.mark_approval_failed(&record.id, &reason)?;
        self.store.append_audit(
            Some(&record.person_id),
            "APPROVAL_FAILED",
            Some("approval"),
            Some(&record.id),
            Some(&json!({"reason": reason})),
        )?;
        self.deliver(
            record,
            format!(
                "I couldn't complete the approved action ({}). Please ask me to try again.",
                record.tool_name
            ),
        )
        .await;
        Ok(())
    }

    async fn deliver(&self, record: &ApprovalRecord, text: String) {
        let message = OutboundMessage {
            channel: record.origin_channel,
            external_user_key: record.origin_external_user_key.clone(),
            text,
        };
        if let Err(error) = self.channels.deliver(&message).await {
            tracing::error!(approval = record.id, %error, "completion delivery failed");
            return;
        }
        if let Err(error) = self.store.insert_message(
            &record.person_id,
            record.origin_channel,
            valet_domain::MessageDirection::Outbound,
            &message.text,
            None,
            None,
        ) {
            tracing::warn!(%error, "failed to persist completion message");
        }
    }
}
