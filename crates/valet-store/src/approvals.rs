//! Approval ledger for gated write actions.
//!
//! Raw confirmation tokens are never stored; only their SHA-256 hash is.
//! Decisions and worker claims are conditional UPDATEs so each request is
//! decided at most once and executed at most once.

use super::*;
use crate::envelope::{random_token, sha256_hex};

const TOKEN_BYTES: usize = 24;

pub(crate) const DETAIL_AWAITING: &str = "awaiting_user_confirmation";
pub(crate) const DETAIL_QUEUED: &str = "queued_for_execution";
pub(crate) const DETAIL_REJECTED: &str = "rejected_by_user";
pub(crate) const DETAIL_PROCESSING: &str = "processing";
pub(crate) const DETAIL_EXECUTED: &str = "executed";
pub(crate) const DETAIL_FAILED: &str = "failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Executed,
    Failed,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
            ApprovalStatus::Expired => "EXPIRED",
            ApprovalStatus::Executed => "EXECUTED",
            ApprovalStatus::Failed => "FAILED",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "PENDING" => Ok(ApprovalStatus::Pending),
            "APPROVED" => Ok(ApprovalStatus::Approved),
            "REJECTED" => Ok(ApprovalStatus::Rejected),
            "EXPIRED" => Ok(ApprovalStatus::Expired),
            "EXECUTED" => Ok(ApprovalStatus::Executed),
            "FAILED" => Ok(ApprovalStatus::Failed),
            other => anyhow::bail!("unknown approval status {other:?}"),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ApprovalStatus::Rejected
                | ApprovalStatus::Expired
                | ApprovalStatus::Executed
                | ApprovalStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    Reject,
}

/// What a decision attempt resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum DecideOutcome {
    /// The decision was applied by this call.
    Applied(ApprovalRecord),
    /// The request was already decided (or executed) before this call.
    AlreadyDecided(ApprovalRecord),
    /// The request exists but its confirmation window has lapsed.
    Expired(ApprovalRecord),
    /// No request matches the supplied token.
    NotFound,
}

/// Inputs for a new ledger entry.
#[derive(Debug, Clone)]
pub struct ApprovalCreation {
    pub person_id: String,
    pub action_type: WriteActionType,
    pub tool_name: String,
    pub tool_call_id: String,
    pub tool_input: Value,
    pub engine_session_id: String,
    pub engine_response_id: Option<String>,
    pub origin_channel: Channel,
    pub origin_external_user_key: String,
    pub idempotency_key: String,
    pub summary: String,
    pub ttl: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalRecord {
    pub id: String,
    pub person_id: String,
    pub action_type: WriteActionType,
    pub tool_name: String,
    pub tool_call_id: String,
    pub tool_input: Value,
    pub engine_session_id: String,
    pub engine_response_id: Option<String>,
    pub origin_channel: Channel,
    pub origin_external_user_key: String,
    pub idempotency_key: String,
    pub status: ApprovalStatus,
    pub status_detail: Option<String>,
    pub summary: Option<String>,
    pub created_at: String,
    pub expires_at_ms: u64,
    pub decided_at: Option<String>,
    pub executed_at: Option<String>,
    pub failure_reason: Option<String>,
}

impl Store {
    /// Creates a pending approval and returns it with the raw confirmation
    /// token. If a pending entry already exists for the same idempotency
    /// key, that entry is returned and no token is minted (the original
    /// prompt already carried one).
    pub fn create_approval(
        &self,
        creation: &ApprovalCreation,
    ) -> Result<(ApprovalRecord, Option<String>)> {
        if let Some(existing) = self.find_pending_by_idempotency_key(&creation.idempotency_key)? {
            return Ok((existing, None));
        }

        let id = new_entity_id("appr");
        let raw_token = random_token(TOKEN_BYTES);
        let token_hash = sha256_hex(&raw_token);
        let created_at = now_rfc3339();
        let expires_at_ms = now_unix_ms() + creation.ttl.as_millis() as u64;
        let input_json = serde_json::to_string(&creation.tool_input)?;

        self.conn().execute(
            "INSERT INTO approval_requests
                 (id, person_id, action_type, tool_name, tool_call_id, tool_input_json,
                  engine_session_id, engine_response_id, origin_channel,
                  origin_external_user_key, idempotency_key, token_hash, status,
                  status_detail, payload_json, created_at, expires_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                id,
                creation.person_id,
                creation.action_type.as_str(),
                creation.tool_name,
                creation.tool_call_id,
                input_json,
                creation.engine_session_id,
                creation.engine_response_id,
                creation.origin_channel.as_str(),
                creation.origin_external_user_key,
                creation.idempotency_key,
                token_hash,
                ApprovalStatus::Pending.as_str(),
                DETAIL_AWAITING,
                creation.summary,
                created_at,
                expires_at_ms
            ],
        )?;

        let record = self
            .find_approval(&id)?
            .context("approval row vanished after insert")?;
        Ok((record, Some(raw_token)))
    }

    /// Applies an approve/reject decision exactly once. The UPDATE predicate
    /// requires the row to still be pending and unexpired, so a losing racer
    /// observes zero affected rows and gets the already-settled record back.
    pub fn decide_approval(
        &self,
        raw_token: &str,
        decision: ApprovalDecision,
    ) -> Result<DecideOutcome> {
        let token_hash = sha256_hex(raw_token);
        let now_ms = now_unix_ms();
        let (status, detail) = match decision {
            ApprovalDecision::Approve => (ApprovalStatus::Approved, DETAIL_QUEUED),
            ApprovalDecision::Reject => (ApprovalStatus::Rejected, DETAIL_REJECTED),
        };

        let changed = self.conn().execute(
            "UPDATE approval_requests
             SET status = ?2, status_detail = ?3, decided_at = ?4
             WHERE token_hash = ?1 AND status = ?5 AND expires_at_ms > ?6",
            params![
                token_hash,
                status.as_str(),
                detail,
                now_rfc3339(),
                ApprovalStatus::Pending.as_str(),
                now_ms
            ],
        )?;

        let Some(record) = self.find_approval_by_token_hash(&token_hash)? else {
            return Ok(DecideOutcome::NotFound);
        };
        if changed == 1 {
            return Ok(DecideOutcome::Applied(record));
        }
        if record.status == ApprovalStatus::Pending && record.expires_at_ms <= now_ms {
            return Ok(DecideOutcome::Expired(record));
        }
        Ok(DecideOutcome::AlreadyDecided(record))
    }

    /// Marks lapsed pending requests as expired; returns how many changed.
    pub fn expire_stale_approvals(&self) -> Result<usize> {
        let changed = self.conn().execute(
            "UPDATE approval_requests
             SET status = ?1, status_detail = NULL
             WHERE status = ?2 AND expires_at_ms <= ?3",
            params![
                ApprovalStatus::Expired.as_str(),
                ApprovalStatus::Pending.as_str(),
                now_unix_ms()
            ],
        )?;
        Ok(changed)
    }

    /// Claims up to `limit` approved entries for execution. The claim flips
    /// `status_detail` from queued to processing inside one transaction, so
    /// two workers can never claim the same entry.
    pub fn claim_approved(&self, limit: u32) -> Result<Vec<ApprovalRecord>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let ids: Vec<String> = {
            let mut statement = tx.prepare(
                "SELECT id FROM approval_requests
                 WHERE status = ?1 AND status_detail = ?2
                 ORDER BY created_at ASC
                 LIMIT ?3",
            )?;
            let rows = statement.query_map(
                params![ApprovalStatus::Approved.as_str(), DETAIL_QUEUED, limit],
                |row| row.get::<_, String>(0),
            )?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        let mut claimed = Vec::with_capacity(ids.len());
        for id in &ids {
            let changed = tx.execute(
                "UPDATE approval_requests SET status_detail = ?2
                 WHERE id = ?1 AND status_detail = ?3",
                params![id, DETAIL_PROCESSING, DETAIL_QUEUED],
            )?;
            if changed == 1 {
                claimed.push(id.clone());
            }
        }
        tx.commit()?;

        let mut records = Vec::with_capacity(claimed.len());
        drop(conn);
        for id in claimed {
            if let Some(record) = self.find_approval(&id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub fn mark_approval_executed(&self, approval_id: &str) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE approval_requests
             SET status = ?2, status_detail = ?3, executed_at = ?4
             WHERE id = ?1 AND status = ?5",
            params![
                approval_id,
                ApprovalStatus::Executed.as_str(),
                DETAIL_EXECUTED,
                now_rfc3339(),
                ApprovalStatus::Approved.as_str()
            ],
        )?;
        anyhow::ensure!(changed == 1, "approval {approval_id} was not in an executable state");
        Ok(())
    }

    pub fn mark_approval_failed(&self, approval_id: &str, reason: &str) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE approval_requests
             SET status = ?2, status_detail = ?3, failure_reason = ?4, executed_at = ?5
             WHERE id = ?1 AND status = ?6",
            params![
                approval_id,
                ApprovalStatus::Failed.as_str(),
                DETAIL_FAILED,
                reason,
                now_rfc3339(),
                ApprovalStatus::Approved.as_str()
            ],
        )?;
        anyhow::ensure!(changed == 1, "approval {approval_id} was not in an executable state");
        Ok(())
    }

    pub fn find_approval(&self, approval_id: &str) -> Result<Option<ApprovalRecord>> {
        self.query_one_approval("id = ?1", approval_id)
    }

    pub fn find_approval_by_raw_token(&self, raw_token: &str) -> Result<Option<ApprovalRecord>> {
        self.find_approval_by_token_hash(&sha256_hex(raw_token))
    }

    fn find_approval_by_token_hash(&self, token_hash: &str) -> Result<Option<ApprovalRecord>> {
        self.query_one_approval("token_hash = ?1", token_hash)
    }

    fn find_pending_by_idempotency_key(&self, key: &str) -> Result<Option<ApprovalRecord>> {
        let conn = self.conn();
        let mut statement = conn.prepare(&format!(
            "{APPROVAL_SELECT} WHERE idempotency_key = ?1 AND status = ?2
             ORDER BY created_at DESC LIMIT 1"
        ))?;
        let row = statement
            .query_row(params![key, ApprovalStatus::Pending.as_str()], row_to_approval)
            .optional()
            .context("failed to query approval by idempotency key")?;
        row.transpose()
    }

    pub fn list_pending_approvals(&self, person_id: Option<&str>) -> Result<Vec<ApprovalRecord>> {
        let conn = self.conn();
        let (sql, bind): (String, Vec<rusqlite::types::Value>) = match person_id {
            Some(person) => (
                format!(
                    "{APPROVAL_SELECT} WHERE status = ?1 AND person_id = ?2
                     ORDER BY created_at DESC"
                ),
                vec![
                    ApprovalStatus::Pending.as_str().to_string().into(),
                    person.to_string().into(),
                ],
            ),
            None => (
                format!("{APPROVAL_SELECT} WHERE status = ?1 ORDER BY created_at DESC"),
                vec![ApprovalStatus::Pending.as_str().to_string().into()],
            ),
        };
        let mut statement = conn.prepare(&sql)?;
        let rows = statement.query_map(rusqlite::params_from_iter(bind), row_to_approval)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    pub fn list_approvals(&self, person_id: &str, limit: u32) -> Result<Vec<ApprovalRecord>> {
        let conn = self.conn();
        let mut statement = conn.prepare(&format!(
            "{APPROVAL_SELECT} WHERE person_id = ?1 ORDER BY created_at DESC LIMIT ?2"
        ))?;
        let rows = statement.query_map(params![person_id, limit], row_to_approval)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    fn query_one_approval(&self, predicate: &str, bind: &str) -> Result<Option<ApprovalRecord>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!("{APPROVAL_SELECT} WHERE {predicate}"),
                params![bind],
                row_to_approval,
            )
            .optional()
            .context("failed to query approval")?;
        row.transpose()
    }
}

const APPROVAL_SELECT: &str = "SELECT id, person_id, action_type, tool_name, tool_call_id,
        tool_input_json, engine_session_id, engine_response_id, origin_channel,
        origin_external_user_key, idempotency_key, status, status_detail, payload_json,
        created_at, expires_at_ms, decided_at, executed_at, failure_reason
     FROM approval_requests";

fn row_to_approval(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<ApprovalRecord>> {
    let action_raw: String = row.get(2)?;
    let channel_raw: String = row.get(8)?;
    let status_raw: String = row.get(11)?;
    let input_raw: Option<String> = row.get(5)?;
    Ok((|| {
        let action_type = WriteActionType::parse(&action_raw)
            .map_err(|error| anyhow::anyhow!("corrupt approval_requests row: {error}"))?;
        let origin_channel = Channel::parse(&channel_raw)
            .map_err(|error| anyhow::anyhow!("corrupt approval_requests row: {error}"))?;
        let status = ApprovalStatus::parse(&status_raw)?;
        let tool_input = match input_raw {
            Some(raw) => serde_json::from_str(&raw)
                .context("corrupt approval_requests row: tool_input_json")?,
            None => Value::Null,
        };
        Ok(ApprovalRecord {
            id: row.get(0)?,
            person_id: row.get(1)?,
            action_type,
            tool_name: row.get(3)?,
            tool_call_id: row.get(4)?,
            tool_input,
            engine_session_id: row.get(6)?,
            engine_response_id: row.get(7)?,
            origin_channel,
            origin_external_user_key: row.get(9)?,
            idempotency_key: row.get(10)?,
            status,
            status_detail: row.get(12)?,
            summary: row.get(13)?,
            created_at: row.get(14)?,
            expires_at_ms: row.get::<_, i64>(15)? as u64,
            decided_at: row.get(16)?,
            executed_at: row.get(17)?,
            failure_reason: row.get(18)?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn creation(person_id: &str, call_id: &str, ttl: Duration) -> ApprovalCreation {
        ApprovalCreation {
            person_id: person_id.to_string(),
            action_type: WriteActionType::SendEmail,
            tool_name: "send_email".to_string(),
            tool_call_id: call_id.to_string(),
            tool_input: json!({"to": "a@example.com", "subject": "hi"}),
            engine_session_id: "sess-1".to_string(),
            engine_response_id: Some("resp-1".to_string()),
            origin_channel: Channel::Sms,
            origin_external_user_key: "+15550001111".to_string(),
            idempotency_key: format!("sess-1:{call_id}"),
            summary: "Send email to a@example.com".to_string(),
            ttl,
        }
    }

    #[test]
    fn create_is_idempotent_per_key() {
        let store = Store::open_in_memory().expect("store");
        let person = store.insert_person(None, true).expect("person");
        let ttl = Duration::from_secs(1800);

        let (first, token) = store
            .create_approval(&creation(&person.id, "call-1", ttl))
            .expect("create");
        assert!(token.is_some());
        assert_eq!(first.status, ApprovalStatus::Pending);
        assert_eq!(
            first.status_detail.as_deref(),
            Some(DETAIL_AWAITING)
        );

        let (second, token) = store
            .create_approval(&creation(&person.id, "call-1", ttl))
            .expect("recreate");
        assert!(token.is_none());
        assert_eq!(second.id, first.id);
    }

    #[test]
    fn decide_applies_exactly_once() {
        let store = Store::open_in_memory().expect("store");
        let person = store.insert_person(None, true).expect("person");
        let (_, token) = store
            .create_approval(&creation(&person.id, "call-1", Duration::from_secs(1800)))
            .expect("create");
        let token = token.expect("token");

        let first = store
            .decide_approval(&token, ApprovalDecision::Approve)
            .expect("decide");
        let DecideOutcome::Applied(record) = first else {
            panic!("expected Applied, got {first:?}");
        };
        assert_eq!(record.status, ApprovalStatus::Approved);
        assert_eq!(record.status_detail.as_deref(), Some(DETAIL_QUEUED));
        assert!(record.decided_at.is_some());

        let second = store
            .decide_approval(&token, ApprovalDecision::Reject)
            .expect("decide again");
        let DecideOutcome::AlreadyDecided(record) = second else {
            panic!("expected AlreadyDecided, got {second:?}");
        };
        assert_eq!(record.status, ApprovalStatus::Approved);
    }

    #[test]
    fn unknown_token_is_not_found() {
        let store = Store::open_in_memory().expect("store");
        let outcome = store
            .decide_approval("no-such-token", ApprovalDecision::Approve)
            .expect("decide");
        assert_eq!(outcome, DecideOutcome::NotFound);
    }

    #[test]
    fn lapsed_request_cannot_be_decided() {
        let store = Store::open_in_memory().expect("store");
        let person = store.insert_person(None, true).expect("person");
        let (_, token) = store
            .create_approval(&creation(&person.id, "call-1", Duration::ZERO))
            .expect("create");
        let token = token.expect("token");

        let outcome = store
            .decide_approval(&token, ApprovalDecision::Approve)
            .expect("decide");
        assert!(matches!(outcome, DecideOutcome::Expired(_)));

        let expired = store.expire_stale_approvals().expect("sweep");
        assert_eq!(expired, 1);
        let record = store
            .find_approval_by_raw_token(&token)
            .expect("lookup")
            .expect("record");
        assert_eq!(record.status, ApprovalStatus::Expired);
    }

    #[test]
    fn claim_moves_queued_entries_to_processing_once() {
        let store = Store::open_in_memory().expect("store");
        let person = store.insert_person(None, true).expect("person");
        let ttl = Duration::from_secs(1800);
        for call in ["call-1", "call-2"] {
            let (_, token) = store
                .create_approval(&creation(&person.id, call, ttl))
                .expect("create");
            store
                .decide_approval(&token.expect("token"), ApprovalDecision::Approve)
                .expect("approve");
        }

        let first = store.claim_approved(10).expect("claim");
        assert_eq!(first.len(), 2);
        assert!(first
            .iter()
            .all(|record| record.status_detail.as_deref() == Some(DETAIL_PROCESSING)));

        let second = store.claim_approved(10).expect("claim again");
        assert!(second.is_empty());
    }

    #[test]
    fn executed_and_failed_are_terminal() {
        let store = Store::open_in_memory().expect("store");
        let person = store.insert_person(None, true).expect("person");
        let ttl = Duration::from_secs(1800);

        let (_, token) = store
            .create_approval(&creation(&person.id, "call-1", ttl))
            .expect("create");
        store
            .decide_approval(&token.expect("token"), ApprovalDecision::Approve)
            .expect("approve");
        let claimed = store.claim_approved(1).expect("claim");
        store
            .mark_approval_executed(&claimed[0].id)
            .expect("execute");
        let record = store
            .find_approval(&claimed[0].id)
            .expect("lookup")
            .expect("record");
        assert_eq!(record.status, ApprovalStatus::Executed);
        assert!(record.executed_at.is_some());
        assert!(record.status.is_terminal());

        // Terminal rows reject further transitions.
        assert!(store.mark_approval_failed(&claimed[0].id, "late").is_err());
    }
}
