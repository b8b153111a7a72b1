//! Per-attempt tool invocation audit rows.

use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationStatus {
    Succeeded,
    Failed,
    PendingApproval,
}

impl InvocationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvocationStatus::Succeeded => "SUCCEEDED",
            InvocationStatus::Failed => "FAILED",
            InvocationStatus::PendingApproval => "PENDING_APPROVAL",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "SUCCEEDED" => Ok(InvocationStatus::Succeeded),
            "FAILED" => Ok(InvocationStatus::Failed),
            "PENDING_APPROVAL" => Ok(InvocationStatus::PendingApproval),
            other => anyhow::bail!("unknown invocation status {other:?}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolInvocationRecord {
    pub id: String,
    pub person_id: String,
    pub tool_name: String,
    pub tool_call_id: Option<String>,
    pub input: Value,
    pub output: Option<Value>,
    pub status: InvocationStatus,
    pub retry_count: u32,
    pub latency_ms: u64,
    pub error_code: Option<String>,
    pub approval_request_id: Option<String>,
    pub created_at: String,
}

pub struct InvocationWrite<'a> {
    pub person_id: &'a str,
    pub tool_name: &'a str,
    pub tool_call_id: Option<&'a str>,
    pub input: &'a Value,
    pub output: Option<&'a Value>,
    pub status: InvocationStatus,
    pub retry_count: u32,
    pub latency_ms: u64,
    pub error_code: Option<&'a str>,
    pub approval_request_id: Option<&'a str>,
}

impl Store {
    pub fn record_invocation(&self, write: &InvocationWrite<'_>) -> Result<String> {
        let id = new_entity_id("inv");
        let input_json = serde_json::to_string(write.input)?;
        let output_json = write
            .output
            .map(serde_json::to_string)
            .transpose()?;
        self.conn().execute(
            "INSERT INTO tool_invocations
                 (id, person_id, tool_name, tool_call_id, input_json, output_json,
                  status, retry_count, latency_ms, error_code, approval_request_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                id,
                write.person_id,
                write.tool_name,
                write.tool_call_id,
                input_json,
                output_json,
                write.status.as_str(),
                write.retry_count,
                write.latency_ms as i64,
                write.error_code,
                write.approval_request_id,
                now_rfc3339()
            ],
        )?;
        Ok(id)
    }

    pub fn list_invocations(&self, person_id: &str, limit: u32) -> Result<Vec<ToolInvocationRecord>> {
        let conn = self.conn();
        let mut statement = conn.prepare(
            "SELECT id, person_id, tool_name, tool_call_id, input_json, output_json,
                    status, retry_count, latency_ms, error_code, approval_request_id, created_at
             FROM tool_invocations
             WHERE person_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = statement.query_map(params![person_id, limit], |row| {
            let status_raw: String = row.get(6)?;
            let input_raw: String = row.get(4)?;
            let output_raw: Option<String> = row.get(5)?;
            Ok((
                ToolInvocationRecord {
                    id: row.get(0)?,
                    person_id: row.get(1)?,
                    tool_name: row.get(2)?,
                    tool_call_id: row.get(3)?,
                    input: Value::Null,
                    output: None,
                    status: InvocationStatus::Failed,
                    retry_count: row.get(7)?,
                    latency_ms: row.get::<_, i64>(8)? as u64,
                    error_code: row.get(9)?,
                    approval_request_id: row.get(10)?,
                    created_at: row.get(11)?,
                },
                status_raw,
                input_raw,
                output_raw,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (mut record, status_raw, input_raw, output_raw) = row?;
            record.status = InvocationStatus::parse(&status_raw)?;
            record.input = serde_json::from_str(&input_raw)
                .context("corrupt tool_invocations row: input_json")?;
            record.output = output_raw
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .context("corrupt tool_invocations row: output_json")?;
            records.push(record);
        }
        Ok(records)
    }
}
