//! Durable mirror of engine session continuity.

use super::*;

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSessionRow {
    pub id: String,
    pub person_id: String,
    pub status: String,
    pub engine_session_id: String,
    pub last_response_id: Option<String>,
    pub last_active_at: String,
    pub expires_at_ms: u64,
}

const SESSION_SELECT: &str = "SELECT id, person_id, status, engine_session_id,
        last_response_id, last_active_at, expires_at_ms
     FROM runtime_sessions";

impl Store {
    /// Insert-or-refresh keyed on the engine's session id.
    pub fn upsert_runtime_session(
        &self,
        person_id: &str,
        engine_session_id: &str,
        last_response_id: Option<&str>,
        ttl: Duration,
    ) -> Result<RuntimeSessionRow> {
        let expires_at_ms = now_unix_ms() + ttl.as_millis() as u64;
        let now = now_rfc3339();
        self.conn().execute(
            "INSERT INTO runtime_sessions
                 (id, person_id, status, engine_session_id, last_response_id,
                  last_active_at, expires_at_ms)
             VALUES (?1, ?2, 'ACTIVE', ?3, ?4, ?5, ?6)
             ON CONFLICT (engine_session_id)
             DO UPDATE SET last_response_id = COALESCE(excluded.last_response_id, last_response_id),
                           last_active_at = excluded.last_active_at,
                           expires_at_ms = excluded.expires_at_ms,
                           status = 'ACTIVE'",
            params![
                new_entity_id("rs"),
                person_id,
                engine_session_id,
                last_response_id,
                now,
                expires_at_ms as i64
            ],
        )?;
        self.find_runtime_session(engine_session_id)?
            .context("runtime session vanished after upsert")
    }

    pub fn find_runtime_session(
        &self,
        engine_session_id: &str,
    ) -> Result<Option<RuntimeSessionRow>> {
        let conn = self.conn();
        conn.query_row(
            &format!("{SESSION_SELECT} WHERE engine_session_id = ?1"),
            params![engine_session_id],
            row_to_session,
        )
        .optional()
        .context("failed to query runtime session")
    }

    /// The freshest unexpired session for a person, if any.
    pub fn latest_runtime_session(&self, person_id: &str) -> Result<Option<RuntimeSessionRow>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "{SESSION_SELECT}
                 WHERE person_id = ?1 AND expires_at_ms > ?2
                 ORDER BY last_active_at DESC
                 LIMIT 1"
            ),
            params![person_id, now_unix_ms()],
            row_to_session,
        )
        .optional()
        .context("failed to query latest runtime session")
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<RuntimeSessionRow> {
    Ok(RuntimeSessionRow {
        id: row.get(0)?,
        person_id: row.get(1)?,
        status: row.get(2)?,
        engine_session_id: row.get(3)?,
        last_response_id: row.get(4)?,
        last_active_at: row.get(5)?,
        expires_at_ms: row.get::<_, i64>(6)? as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_refreshes_without_duplicating() {
        let store = Store::open_in_memory().expect("store");
        let person = store.insert_person(None, true).expect("person");
        let ttl = Duration::from_secs(600);

        let first = store
            .upsert_runtime_session(&person.id, "sess-1", None, ttl)
            .expect("insert");
        assert!(first.last_response_id.is_none());

        let second = store
            .upsert_runtime_session(&person.id, "sess-1", Some("resp-9"), ttl)
            .expect("refresh");
        assert_eq!(second.id, first.id);
        assert_eq!(second.last_response_id.as_deref(), Some("resp-9"));

        // A refresh without a new response id keeps the last one.
        let third = store
            .upsert_runtime_session(&person.id, "sess-1", None, ttl)
            .expect("refresh");
        assert_eq!(third.last_response_id.as_deref(), Some("resp-9"));
    }

    #[test]
    fn latest_session_ignores_expired_rows() {
        let store = Store::open_in_memory().expect("store");
        let person = store.insert_person(None, true).expect("person");

        store
            .upsert_runtime_session(&person.id, "sess-old", None, Duration::ZERO)
            .expect("insert expired");
        assert!(store
            .latest_runtime_session(&person.id)
            .expect("lookup")
            .is_none());

        store
            .upsert_runtime_session(&person.id, "sess-new", None, Duration::from_secs(600))
            .expect("insert live");
        let latest = store
            .latest_runtime_session(&person.id)
            .expect("lookup")
            .expect("session");
        assert_eq!(latest.engine_session_id, "sess-new");
    }
}
