//! Conversation transcript rows.

use super::*;

#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: String,
    pub person_id: String,
    pub channel: Channel,
    pub direction: MessageDirection,
    pub body: String,
    pub provider_message_id: Option<String>,
    pub thread_id: Option<String>,
    pub created_at: String,
}

impl Store {
    pub fn insert_message(
        &self,
        person_id: &str,
        channel: Channel,
        direction: MessageDirection,
        body: &str,
        provider_message_id: Option<&str>,
        thread_id: Option<&str>,
    ) -> Result<MessageRecord> {
        let id = new_entity_id("msg");
        let created_at = now_rfc3339();
        self.conn().execute(
            "INSERT INTO messages
                 (id, person_id, channel, direction, body, provider_message_id, thread_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                person_id,
                channel.as_str(),
                direction.as_str(),
                body,
                provider_message_id,
                thread_id,
                created_at
            ],
        )?;
        Ok(MessageRecord {
            id,
            person_id: person_id.to_string(),
            channel,
            direction,
            body: body.to_string(),
            provider_message_id: provider_message_id.map(str::to_string),
            thread_id: thread_id.map(str::to_string),
            created_at,
        })
    }

    /// Newest-first transcript slice for a person.
    pub fn recent_messages(&self, person_id: &str, limit: u32) -> Result<Vec<MessageRecord>> {
        let conn = self.conn();
        let mut statement = conn.prepare(
            "SELECT id, person_id, channel, direction, body, provider_message_id, thread_id, created_at
             FROM messages
             WHERE person_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = statement.query_map(params![person_id, limit], row_to_message)?;
        collect_messages(rows)
    }

    /// Case-insensitive substring search over a person's transcript.
    pub fn search_messages(
        &self,
        person_id: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<MessageRecord>> {
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        let conn = self.conn();
        let mut statement = conn.prepare(
            "SELECT id, person_id, channel, direction, body, provider_message_id, thread_id, created_at
             FROM messages
             WHERE person_id = ?1 AND body LIKE ?2 ESCAPE '\\'
             ORDER BY created_at DESC, id DESC
             LIMIT ?3",
        )?;
        let rows = statement.query_map(params![person_id, pattern, limit], row_to_message)?;
        collect_messages(rows)
    }

    /// Queues an outbound web-channel message until the client collects it.
    /// Durable so the serve process can drain what the worker queued.
    pub fn queue_web_outbound(&self, external_user_key: &str, body: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO web_outbox (external_user_key, body, created_at) VALUES (?1, ?2, ?3)",
            params![external_user_key, body, now_rfc3339()],
        )?;
        Ok(())
    }

    /// Removes and returns everything queued for one web client, oldest
    /// first.
    pub fn drain_web_outbound(&self, external_user_key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let bodies = {
            let mut statement = tx.prepare(
                "SELECT body FROM web_outbox WHERE external_user_key = ?1 ORDER BY id",
            )?;
            let rows = statement.query_map(params![external_user_key], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()?
        };
        tx.execute(
            "DELETE FROM web_outbox WHERE external_user_key = ?1",
            params![external_user_key],
        )?;
        tx.commit()?;
        Ok(bodies)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<(MessageRecord, String, String)> {
    let channel_raw: String = row.get(2)?;
    let direction_raw: String = row.get(3)?;
    Ok((
        MessageRecord {
            id: row.get(0)?,
            person_id: row.get(1)?,
            channel: Channel::Sms,
            direction: MessageDirection::Inbound,
            body: row.get(4)?,
            provider_message_id: row.get(5)?,
            thread_id: row.get(6)?,
            created_at: row.get(7)?,
        },
        channel_raw,
        direction_raw,
    ))
}

fn collect_messages<I>(rows: I) -> Result<Vec<MessageRecord>>
where
    I: Iterator<Item = rusqlite::Result<(MessageRecord, String, String)>>,
{
    let mut records = Vec::new();
    for row in rows {
        let (mut record, channel_raw, direction_raw) = row?;
        record.channel = Channel::parse(&channel_raw)
            .map_err(|error| anyhow::anyhow!("corrupt messages row: {error}"))?;
        record.direction = MessageDirection::parse(&direction_raw)
            .map_err(|error| anyhow::anyhow!("corrupt messages row: {error}"))?;
        records.push(record);
    }
    Ok(records)
}
