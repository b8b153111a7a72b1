//! End-to-end scenarios: onboarding, tool rounds, approval gating, and the
//! worker completing an approved action.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use httpmock::prelude::*;
use serde_json::json;

use valet_core::{AdvisoryLocks, KvCache};
use valet_domain::{Channel, InboundMessage, OnboardingState, OutboundMessage, PolicyContext};
use valet_engine::{EngineError, EngineReply, EngineToolCall, EngineTurn, TurnEngine};
use valet_gateway::{ChannelRouter, ChannelSender, GatewayConfig, TurnRouter};
use valet_store::{
    ApprovalStatus, ConnectorScope, ConnectorTokens, InvocationStatus, Store, TokenCipher,
};
use valet_tools::{
    BrowserClient, BrowserConfig, ExecutorConfig, GoogleConfig, GoogleProvider, ToolExecutor,
};
use valet_worker::{ApprovalWorker, WorkerConfig};

struct ScriptedEngine {
    replies: Mutex<VecDeque<EngineReply>>,
    turns: Mutex<Vec<EngineTurn>>,
}

impl ScriptedEngine {
    fn new(replies: Vec<EngineReply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::from(replies)),
            turns: Mutex::new(Vec::new()),
        })
    }

    fn turn_count(&self) -> usize {
        self.turns.lock().unwrap().len()
    }
}

#[async_trait]
impl TurnEngine for ScriptedEngine {
    async fn run_turn(&self, turn: &EngineTurn) -> Result<EngineReply, EngineError> {
        self.turns.lock().unwrap().push(turn.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| EngineError::InvalidResponse("scripted reply queue exhausted".into()))
    }
}

struct RecordingSender(Mutex<Vec<OutboundMessage>>);

#[async_trait]
impl ChannelSender for RecordingSender {
    async fn send(&self, message: &OutboundMessage) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(message.clone());
        Ok(())
    }
}

fn text_reply(id: &str, text: &str) -> EngineReply {
    EngineReply {
        response_id: id.to_string(),
        assistant_text: Some(text.to_string()),
        tool_calls: Vec::new(),
    }
}

fn tool_reply(id: &str, call_id: &str, name: &str, arguments: serde_json::Value) -> EngineReply {
    EngineReply {
        response_id: id.to_string(),
        assistant_text: None,
        tool_calls: vec![EngineToolCall {
            call_id: call_id.to_string(),
            name: name.to_string(),
            arguments,
        }],
    }
}

struct Harness {
    store: Arc<Store>,
    cache: Arc<KvCache>,
    turns: TurnRouter,
    engine: Arc<ScriptedEngine>,
    sent: Arc<RecordingSender>,
}

fn harness(replies: Vec<EngineReply>) -> Harness {
    harness_with(replies, GoogleConfig::default(), GatewayConfig::default())
}

fn harness_with(
    replies: Vec<EngineReply>,
    google: GoogleConfig,
    config: GatewayConfig,
) -> Harness {
    let store = Arc::new(Store::open_in_memory().expect("store"));
    let cache = Arc::new(KvCache::new());
    let engine = ScriptedEngine::new(replies);
    let sent = Arc::new(RecordingSender(Mutex::new(Vec::new())));
    let channels = Arc::new(
        ChannelRouter::new()
            .with_sender(Channel::Sms, sent.clone())
            .with_sender(Channel::Web, sent.clone()),
    );
    let executor = Arc::new(ToolExecutor::new(
        store.clone(),
        TokenCipher::new("it-secret").expect("cipher"),
        GoogleProvider::new(google).expect("google"),
        BrowserClient::new(BrowserConfig::default()).expect("browser"),
        ExecutorConfig::default(),
    ));
    let turns = TurnRouter::new(
        store.clone(),
        cache.clone(),
        executor,
        engine.clone(),
        channels,
        config,
    )
    .expect("turn router");
    Harness {
        store,
        cache,
        turns,
        engine,
        sent,
    }
}

fn inbound(text: &str) -> InboundMessage {
    InboundMessage {
        channel: Channel::Sms,
        external_user_key: "+15550001111".to_string(),
        text: text.to_string(),
        provider_message_id: valet_core::new_entity_id("pm"),
        phone_e164: Some("+15550001111".to_string()),
        metadata: None,
    }
}

async fn onboard(harness: &Harness) -> String {
    harness.turns.handle_inbound(&inbound("hi")).await.expect("welcome");
    harness.turns.handle_inbound(&inbound("Ada")).await.expect("name");
    harness.turns.handle_inbound(&inbound("skip")).await.expect("calendar");
    harness.turns.handle_inbound(&inbound("skip")).await.expect("email");
    harness.turns.handle_inbound(&inbound("ready")).await.expect("ready");
    harness
        .store
        .find_person_by_phone("+15550001111")
        .expect("lookup")
        .expect("person")
        .id
}

#[tokio::test]
async fn scenario_onboarding_then_first_engine_turn() {
    let harness = harness(vec![text_reply("resp-1", "Hello Ada, how can I help?")]);

    let welcome = harness.turns.handle_inbound(&inbound("hi")).await.expect("welcome");
    assert!(welcome.text.contains("What should I call you"));
    // Onboarding never touches the engine.
    assert_eq!(harness.engine.turn_count(), 0);

    let person_id = onboard(&harness).await;
    let person = harness
        .store
        .find_person(&person_id)
        .expect("lookup")
        .expect("person");
    assert_eq!(person.onboarding_state, OnboardingState::Active);
    assert_eq!(person.preferred_name.as_deref(), Some("Ada"));
    assert!(person.phone_verified);

    let reply = harness
        .turns
        .handle_inbound(&inbound("what can you do?"))
        .await
        .expect("turn");
    assert_eq!(reply.text, "Hello Ada, how can I help?");
    assert_eq!(harness.engine.turn_count(), 1);
}

#[tokio::test]
async fn scenario_read_tool_round_feeds_output_back() {
    let harness = harness(vec![
        tool_reply("resp-1", "call-1", "create_reminder", json!({"title": "water plants"})),
        text_reply("resp-2", "Reminder set."),
    ]);
    let person_id = onboard(&harness).await;

    let reply = harness
        .turns
        .handle_inbound(&inbound("remind me to water plants"))
        .await
        .expect("turn");
    assert_eq!(reply.text, "Reminder set.");
    assert_eq!(harness.engine.turn_count(), 2);

    // The second engine turn carried the tool output for call-1.
    let turns = harness.engine.turns.lock().unwrap();
    match &turns[1].input {
        valet_engine::TurnInput::ToolOutputs(outputs) => {
            assert_eq!(outputs.len(), 1);
            assert_eq!(outputs[0].call_id, "call-1");
            assert_eq!(outputs[0].output["ok"], true);
        }
        other => panic!("expected tool outputs, got {other:?}"),
    }
    drop(turns);

    assert_eq!(harness.store.list_reminders(&person_id).expect("list").len(), 1);
    let invocations = harness.store.list_invocations(&person_id, 10).expect("audit");
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].status, InvocationStatus::Succeeded);
}

#[tokio::test]
async fn reads_disabled_policy_blocks_lookup_tools() {
    let harness = harness(vec![
        tool_reply("resp-1", "call-1", "list_reminders", json!({})),
        text_reply("resp-2", "I can't look that up right now."),
    ]);
    let person_id = onboard(&harness).await;
    harness
        .store
        .set_permission_policy(
            &person_id,
            &PolicyContext {
                read_allowed: false,
                write_requires_approval: true,
            },
        )
        .expect("policy");

    let reply = harness
        .turns
        .handle_inbound(&inbound("any reminders?"))
        .await
        .expect("turn");
    assert_eq!(reply.text, "I can't look that up right now.");

    // The denial is surfaced to the engine; the tool itself never ran.
    let turns = harness.engine.turns.lock().unwrap();
    match &turns[1].input {
        valet_engine::TurnInput::ToolOutputs(outputs) => {
            assert_eq!(outputs[0].output["ok"], false);
            assert_eq!(outputs[0].output["error"], "reads_disabled");
        }
        other => panic!("expected tool outputs, got {other:?}"),
    }
    drop(turns);
    assert!(harness
        .store
        .list_invocations(&person_id, 10)
        .expect("audit")
        .is_empty());
}

#[tokio::test]
async fn scenario_invalid_tool_call_becomes_structured_failure() {
    let harness = harness(vec![
        tool_reply("resp-1", "call-1", "send_email", json!({"to": "a@example.com"})),
        text_reply("resp-2", "I couldn't do that."),
    ]);
    onboard(&harness).await;

    let reply = harness
        .turns
        .handle_inbound(&inbound("email Alex"))
        .await
        .expect("turn");
    assert_eq!(reply.text, "I couldn't do that.");

    let turns = harness.engine.turns.lock().unwrap();
    match &turns[1].input {
        valet_engine::TurnInput::ToolOutputs(outputs) => {
            assert_eq!(outputs[0].output["ok"], false);
            assert_eq!(outputs[0].output["error"], "invalid_arguments");
        }
        other => panic!("expected tool outputs, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_write_call_parks_on_approval() {
    let harness = harness(vec![tool_reply(
        "resp-1",
        "call-1",
        "create_event",
        json!({
            "summary": "Dentist",
            "start": "2026-09-02T09:00:00Z",
            "end": "2026-09-02T10:00:00Z",
        }),
    )]);
    let person_id = onboard(&harness).await;

    let reply = harness
        .turns
        .handle_inbound(&inbound("book the dentist for 9am"))
        .await
        .expect("turn");
    assert!(reply.text.contains("/approvals/"));
    assert!(reply.text.contains("/confirm"));

    // Exactly one pending ledger entry, and the loop parked: the scripted
    // engine was consulted exactly once.
    let pending = harness
        .store
        .list_pending_approvals(Some(&person_id))
        .expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, ApprovalStatus::Pending);
    assert_eq!(pending[0].action_type, valet_domain::WriteActionType::CreateEvent);
    assert_eq!(harness.engine.turn_count(), 1);

    let invocations = harness.store.list_invocations(&person_id, 10).expect("audit");
    assert_eq!(invocations[0].status, InvocationStatus::PendingApproval);
}

fn extract_token(reply: &str) -> String {
    let start = reply.find("/approvals/").expect("link") + "/approvals/".len();
    let rest = &reply[start..];
    let end = rest.find("/confirm").expect("confirm suffix");
    rest[..end].to_string()
}

#[tokio::test]
async fn scenario_approved_event_is_executed_and_session_resumed() {
    let server = MockServer::start();
    let calendar = server.mock(|when, then| {
        when.method(POST)
            .path("/calendar/v3/calendars/primary/events")
            .json_body_partial(r#"{"summary": "Dentist"}"#);
        then.status(200).json_body(json!({"id": "evt-1"}));
    });
    let google = GoogleConfig {
        calendar_base: format!("{}/calendar/v3", server.base_url()),
        ..GoogleConfig::default()
    };

    let harness = harness_with(
        vec![tool_reply(
            "resp-1",
            "call-1",
            "create_event",
            json!({
                "summary": "Dentist",
                "start": "2026-09-02T09:00:00Z",
                "end": "2026-09-02T10:00:00Z",
            }),
        )],
        google.clone(),
        GatewayConfig::default(),
    );
    let person_id = onboard(&harness).await;
    let cipher = TokenCipher::new("it-secret").expect("cipher");
    harness
        .store
        .upsert_connector(
            &cipher,
            &person_id,
            "google",
            ConnectorScope::Calendar,
            &ConnectorTokens {
                access_token: "access-1".to_string(),
                refresh_token: None,
                expires_at_ms: valet_core::now_unix_ms() + 3_600_000,
            },
        )
        .expect("connector");

    let reply = harness
        .turns
        .handle_inbound(&inbound("book the dentist"))
        .await
        .expect("turn");
    let token = extract_token(&reply.text);

    // User confirms; exactly once.
    let outcome = harness
        .store
        .decide_approval(&token, valet_store::ApprovalDecision::Approve)
        .expect("decide");
    assert!(matches!(outcome, valet_store::DecideOutcome::Applied(_)));
    let again = harness
        .store
        .decide_approval(&token, valet_store::ApprovalDecision::Approve)
        .expect("decide again");
    assert!(matches!(again, valet_store::DecideOutcome::AlreadyDecided(_)));

    // The worker claims, executes against the calendar API, resumes the
    // session, and delivers the closing message over the origin channel.
    let resume_engine = ScriptedEngine::new(vec![text_reply("resp-2", "Your dentist visit is booked.")]);
    let executor = Arc::new(ToolExecutor::new(
        harness.store.clone(),
        cipher,
        GoogleProvider::new(google).expect("google"),
        BrowserClient::new(BrowserConfig::default()).expect("browser"),
        ExecutorConfig::default(),
    ));
    let worker = ApprovalWorker::new(
        harness.store.clone(),
        harness.cache.clone(),
        executor,
        Some(resume_engine.clone() as Arc<dyn TurnEngine>),
        Arc::new(ChannelRouter::new().with_sender(Channel::Sms, harness.sent.clone())),
        WorkerConfig::default(),
    )
    .expect("worker");

    let processed = worker.tick().await.expect("tick");
    assert_eq!(processed, 1);
    calendar.assert();

    let approvals = harness.store.list_approvals(&person_id, 10).expect("list");
    assert_eq!(approvals[0].status, ApprovalStatus::Executed);

    let sent = harness.sent.0.lock().unwrap();
    let last = sent.last().expect("delivery");
    assert_eq!(last.text, "Your dentist visit is booked.");
    assert_eq!(last.channel, Channel::Sms);

    // The resumed turn referenced the parked session and call id.
    let resume_turns = resume_engine.turns.lock().unwrap();
    assert_eq!(resume_turns.len(), 1);
    match &resume_turns[0].input {
        valet_engine::TurnInput::ToolOutputs(outputs) => {
            assert_eq!(outputs[0].call_id, "call-1");
            assert_eq!(outputs[0].output["ok"], true);
        }
        other => panic!("expected tool outputs, got {other:?}"),
    }
}

#[tokio::test]
async fn web_contact_without_verified_phone_is_held_at_verification() {
    let harness = harness(vec![text_reply("resp-1", "unused")]);
    let reply = harness
        .turns
        .handle_inbound(&InboundMessage {
            channel: Channel::Web,
            external_user_key: "web-42".to_string(),
            text: "hello".to_string(),
            provider_message_id: valet_core::new_entity_id("pm"),
            phone_e164: None,
            metadata: None,
        })
        .await
        .expect("turn");
    assert!(reply.text.contains("verified phone"));
    assert_eq!(harness.engine.turn_count(), 0);
}

#[tokio::test]
async fn scenario_concurrent_message_gets_busy_reply() {
    let harness = harness(vec![text_reply("resp-1", "unused")]);
    let person_id = onboard(&harness).await;

    // Simulate an in-flight turn by holding the person's advisory lock.
    let locks = AdvisoryLocks::new(harness.cache.clone(), Duration::from_secs(20));
    let _guard = locks.acquire(&person_id).expect("lock");

    let reply = harness
        .turns
        .handle_inbound(&inbound("are you there?"))
        .await
        .expect("busy turn");
    assert!(reply.text.contains("Still finishing"));
    assert_eq!(harness.engine.turn_count(), 0);
    assert!(harness
        .store
        .list_pending_approvals(Some(&person_id))
        .expect("pending")
        .is_empty());
}

#[tokio::test]
async fn scenario_kill_switch_blocks_writes_without_approvals() {
    let harness = harness_with(
        vec![
            tool_reply(
                "resp-1",
                "call-1",
                "send_email",
                json!({"to": "a@example.com", "subject": "hi", "body": "x"}),
            ),
            text_reply("resp-2", "Understood."),
        ],
        GoogleConfig::default(),
        GatewayConfig {
            writes_disabled: true,
            ..GatewayConfig::default()
        },
    );
    let person_id = onboard(&harness).await;

    harness
        .turns
        .handle_inbound(&inbound("email Alex hi"))
        .await
        .expect("turn");

    // No approval was created; the block is recorded instead.
    assert!(harness
        .store
        .list_pending_approvals(Some(&person_id))
        .expect("pending")
        .is_empty());
    let invocations = harness.store.list_invocations(&person_id, 10).expect("audit");
    assert_eq!(invocations[0].status, InvocationStatus::Failed);
    assert_eq!(invocations[0].error_code.as_deref(), Some("writes_disabled"));
}
