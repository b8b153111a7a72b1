//! Durable storage for the Valet gateway on bundled SQLite.
//!
//! One `Store` owns the connection; accessors are grouped per aggregate in
//! submodules. Timestamps are RFC 3339 TEXT except expiry deadlines, which
//! are unix-millisecond INTEGER columns so predicate comparisons stay exact.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use valet_core::{new_entity_id, now_rfc3339, now_unix_ms};
use valet_domain::{
    Channel, ChannelIdentity, MessageDirection, OnboardingState, Person, PolicyContext,
    WriteActionType,
};

mod approvals;
mod audit;
mod connectors;
mod envelope;
mod identities;
mod invocations;
mod messages;
mod persons;
mod reminders_tasks;
mod runtime_sessions;

pub use approvals::{
    ApprovalCreation, ApprovalDecision, ApprovalRecord, ApprovalStatus, DecideOutcome,
};
pub use audit::AuditEntry;
pub use connectors::{ConnectorScope, ConnectorTokens};
pub use envelope::TokenCipher;
pub use invocations::{InvocationStatus, InvocationWrite, ToolInvocationRecord};
pub use messages::MessageRecord;
pub use reminders_tasks::{ReminderRecord, TaskRecord};
pub use runtime_sessions::RuntimeSessionRow;

/// Durable relational store. Cheap to share behind an `Arc`.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Opens (creating if needed) the SQLite database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create store directory {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open store {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests and the stub deployment mode.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory store")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS persons (
            id TEXT PRIMARY KEY,
            preferred_name TEXT,
            phone_e164 TEXT,
            phone_verified INTEGER NOT NULL DEFAULT 0,
            onboarding_state TEXT NOT NULL,
            timezone TEXT,
            email_signature_style TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_persons_phone ON persons(phone_e164);

        CREATE TABLE IF NOT EXISTS channel_identities (
            channel TEXT NOT NULL,
            external_user_key TEXT NOT NULL,
            person_id TEXT NOT NULL,
            phone_e164 TEXT,
            verified_phone INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (channel, external_user_key)
        );
        CREATE INDEX IF NOT EXISTS idx_channel_identities_person
            ON channel_identities(person_id);

        CREATE TABLE IF NOT EXISTS permissions (
            person_id TEXT NOT NULL,
            resource TEXT NOT NULL,
            can_read INTEGER NOT NULL,
            requires_approval_for_write INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (person_id, resource)
        );

        CREATE TABLE IF NOT EXISTS skills_enabled (
            person_id TEXT NOT NULL,
            skill TEXT NOT NULL,
            enabled INTEGER NOT NULL,
            PRIMARY KEY (person_id, skill)
        );

        CREATE TABLE IF NOT EXISTS threads (
            id TEXT PRIMARY KEY,
            person_id TEXT NOT NULL,
            channel TEXT NOT NULL,
            provider_thread_id TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            person_id TEXT NOT NULL,
            channel TEXT NOT NULL,
            direction TEXT NOT NULL,
            body TEXT NOT NULL,
            provider_message_id TEXT,
            thread_id TEXT,
            metadata_json TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_person_created
            ON messages(person_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS web_outbox (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_user_key TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_web_outbox_key ON web_outbox(external_user_key, id);

        CREATE TABLE IF NOT EXISTS approval_requests (
            id TEXT PRIMARY KEY,
            person_id TEXT NOT NULL,
            action_type TEXT NOT NULL,
            tool_name TEXT,
            tool_call_id TEXT,
            tool_input_json TEXT,
            engine_session_id TEXT,
            engine_response_id TEXT,
            origin_channel TEXT,
            origin_external_user_key TEXT,
            idempotency_key TEXT,
            token_hash TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL,
            status_detail TEXT,
            payload_json TEXT,
            created_at TEXT NOT NULL,
            expires_at_ms INTEGER NOT NULL,
            decided_at TEXT,
            executed_at TEXT,
            failure_reason TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_approvals_person_created
            ON approval_requests(person_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_approvals_claimable
            ON approval_requests(status, status_detail);

        CREATE TABLE IF NOT EXISTS tool_invocations (
            id TEXT PRIMARY KEY,
            person_id TEXT NOT NULL,
            tool_name TEXT NOT NULL,
            tool_call_id TEXT,
            input_json TEXT,
            output_json TEXT,
            status TEXT NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            latency_ms INTEGER NOT NULL DEFAULT 0,
            error_code TEXT,
            approval_request_id TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tool_invocations_person
            ON tool_invocations(person_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS runtime_sessions (
            id TEXT PRIMARY KEY,
            person_id TEXT NOT NULL,
            status TEXT NOT NULL,
            engine_session_id TEXT NOT NULL UNIQUE,
            last_response_id TEXT,
            last_active_at TEXT NOT NULL,
            expires_at_ms INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_runtime_sessions_person
            ON runtime_sessions(person_id, last_active_at DESC);

        CREATE TABLE IF NOT EXISTS reminders (
            id TEXT PRIMARY KEY,
            person_id TEXT NOT NULL,
            title TEXT NOT NULL,
            due_at TEXT,
            status TEXT NOT NULL DEFAULT 'ACTIVE',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            person_id TEXT NOT NULL,
            title TEXT NOT NULL,
            due_at TEXT,
            status TEXT NOT NULL DEFAULT 'OPEN',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS connectors (
            person_id TEXT NOT NULL,
            provider TEXT NOT NULL,
            scope TEXT NOT NULL,
            token_ciphertext TEXT NOT NULL,
            refresh_ciphertext TEXT,
            expires_at_ms INTEGER NOT NULL,
            status TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (person_id, provider, scope)
        );

        CREATE TABLE IF NOT EXISTS audit_logs (
            id TEXT PRIMARY KEY,
            person_id TEXT,
            event_type TEXT NOT NULL,
            entity_type TEXT,
            entity_id TEXT,
            metadata_json TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_audit_logs_person
            ON audit_logs(person_id, created_at DESC);
        "#,
    )
    .context("failed to initialize store schema")?;
    Ok(())
}
