//! Append-only audit trail.

use super::*;

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: String,
    pub person_id: Option<String>,
    pub event_type: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: String,
}

impl Store {
    pub fn append_audit(
        &self,
        person_id: Option<&str>,
        event_type: &str,
        entity_type: Option<&str>,
        entity_id: Option<&str>,
        metadata: Option<&Value>,
    ) -> Result<()> {
        let metadata_json = metadata.map(serde_json::to_string).transpose()?;
        self.conn().execute(
            "INSERT INTO audit_logs (id, person_id, event_type, entity_type, entity_id, metadata_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new_entity_id("audit"),
                person_id,
                event_type,
                entity_type,
                entity_id,
                metadata_json,
                now_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn list_audit(&self, person_id: &str, limit: u32) -> Result<Vec<AuditEntry>> {
        let conn = self.conn();
        let mut statement = conn.prepare(
            "SELECT id, person_id, event_type, entity_type, entity_id, metadata_json, created_at
             FROM audit_logs
             WHERE person_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = statement.query_map(params![person_id, limit], |row| {
            let metadata_raw: Option<String> = row.get(5)?;
            Ok((
                AuditEntry {
                    id: row.get(0)?,
                    person_id: row.get(1)?,
                    event_type: row.get(2)?,
                    entity_type: row.get(3)?,
                    entity_id: row.get(4)?,
                    metadata: None,
                    created_at: row.get(6)?,
                },
                metadata_raw,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (mut entry, metadata_raw) = row?;
            entry.metadata = metadata_raw
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .context("corrupt audit_logs row: metadata_json")?;
            entries.push(entry);
        }
        Ok(entries)
    }
}
