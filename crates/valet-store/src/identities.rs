//! Channel identity mapping and cross-channel identity merge.

use super::*;

/// Tables that carry a `person_id` foreign key and are repointed during a
/// merge, in dependency order.
const MERGE_TABLES: &[&str] = &[
    "channel_identities",
    "permissions",
    "skills_enabled",
    "threads",
    "messages",
    "approval_requests",
    "tool_invocations",
    "runtime_sessions",
    "reminders",
    "tasks",
    "connectors",
    "audit_logs",
];

impl Store {
    pub fn find_channel_identity(
        &self,
        channel: Channel,
        external_user_key: &str,
    ) -> Result<Option<ChannelIdentity>> {
        let conn = self.conn();
        let identity = conn
            .query_row(
                "SELECT person_id, channel, external_user_key, phone_e164, verified_phone
                 FROM channel_identities
                 WHERE channel = ?1 AND external_user_key = ?2",
                params![channel.as_str(), external_user_key],
                |row| {
                    let channel_raw: String = row.get(1)?;
                    Ok((
                        row.get::<_, String>(0)?,
                        channel_raw,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, bool>(4)?,
                    ))
                },
            )
            .optional()
            .context("failed to query channel identity")?;

        match identity {
            Some((person_id, channel_raw, external_user_key, phone_e164, verified_phone)) => {
                let channel = Channel::parse(&channel_raw)
                    .map_err(|error| anyhow::anyhow!("corrupt channel_identities row: {error}"))?;
                Ok(Some(ChannelIdentity {
                    person_id,
                    channel,
                    external_user_key,
                    phone_e164,
                    verified_phone,
                }))
            }
            None => Ok(None),
        }
    }

    /// Insert-or-update on the (channel, external key) unique pair.
    pub fn upsert_channel_identity(&self, identity: &ChannelIdentity) -> Result<()> {
        self.conn().execute(
            "INSERT INTO channel_identities
                 (channel, external_user_key, person_id, phone_e164, verified_phone, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (channel, external_user_key)
             DO UPDATE SET person_id = excluded.person_id,
                           phone_e164 = excluded.phone_e164,
                           verified_phone = excluded.verified_phone,
                           updated_at = excluded.updated_at",
            params![
                identity.channel.as_str(),
                identity.external_user_key,
                identity.person_id,
                identity.phone_e164,
                identity.verified_phone,
                now_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Repoints every owned row from `source_person_id` to
    /// `target_person_id` and deletes the source person, all in one
    /// transaction. Re-running after a completed merge is a no-op because
    /// the source rows are gone.
    pub fn merge_persons(&self, source_person_id: &str, target_person_id: &str) -> Result<()> {
        if source_person_id == target_person_id {
            return Ok(());
        }
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for table in MERGE_TABLES {
            tx.execute(
                &format!("UPDATE {table} SET person_id = ?1 WHERE person_id = ?2"),
                params![target_person_id, source_person_id],
            )?;
        }
        tx.execute(
            "DELETE FROM persons WHERE id = ?1",
            params![source_person_id],
        )?;
        tx.commit()?;
        tracing::info!(
            source = source_person_id,
            target = target_person_id,
            "identity merge committed"
        );
        Ok(())
    }
}
