//! OAuth connector grants, stored encrypted.

use super::*;
use crate::envelope::TokenCipher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectorScope {
    Calendar,
    Email,
}

impl ConnectorScope {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectorScope::Calendar => "calendar",
            ConnectorScope::Email => "email",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "calendar" => Ok(ConnectorScope::Calendar),
            "email" => Ok(ConnectorScope::Email),
            other => anyhow::bail!("unknown connector scope {other:?}"),
        }
    }
}

/// Decrypted connector credentials.
#[derive(Clone)]
pub struct ConnectorTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at_ms: u64,
}

impl ConnectorTokens {
    pub fn expires_within(&self, window: Duration) -> bool {
        self.expires_at_ms <= now_unix_ms() + window.as_millis() as u64
    }
}

impl std::fmt::Debug for ConnectorTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorTokens")
            .field("expires_at_ms", &self.expires_at_ms)
            .finish_non_exhaustive()
    }
}

impl Store {
    pub fn upsert_connector(
        &self,
        cipher: &TokenCipher,
        person_id: &str,
        provider: &str,
        scope: ConnectorScope,
        tokens: &ConnectorTokens,
    ) -> Result<()> {
        let token_ciphertext = cipher.encrypt(&tokens.access_token)?;
        let refresh_ciphertext = tokens
            .refresh_token
            .as_deref()
            .map(|refresh| cipher.encrypt(refresh))
            .transpose()?;
        self.conn().execute(
            "INSERT INTO connectors
                 (person_id, provider, scope, token_ciphertext, refresh_ciphertext,
                  expires_at_ms, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'CONNECTED', ?7)
             ON CONFLICT (person_id, provider, scope)
             DO UPDATE SET token_ciphertext = excluded.token_ciphertext,
                           refresh_ciphertext = COALESCE(excluded.refresh_ciphertext, refresh_ciphertext),
                           expires_at_ms = excluded.expires_at_ms,
                           status = 'CONNECTED',
                           updated_at = excluded.updated_at",
            params![
                person_id,
                provider,
                scope.as_str(),
                token_ciphertext,
                refresh_ciphertext,
                tokens.expires_at_ms as i64,
                now_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn connector_tokens(
        &self,
        cipher: &TokenCipher,
        person_id: &str,
        provider: &str,
        scope: ConnectorScope,
    ) -> Result<Option<ConnectorTokens>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT token_ciphertext, refresh_ciphertext, expires_at_ms
                 FROM connectors
                 WHERE person_id = ?1 AND provider = ?2 AND scope = ?3 AND status = 'CONNECTED'",
                params![person_id, provider, scope.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()
            .context("failed to query connector")?;

        let Some((token_ciphertext, refresh_ciphertext, expires_at_ms)) = row else {
            return Ok(None);
        };
        let access_token = cipher.decrypt(&token_ciphertext)?;
        let refresh_token = refresh_ciphertext
            .as_deref()
            .map(|ciphertext| cipher.decrypt(ciphertext))
            .transpose()?;
        Ok(Some(ConnectorTokens {
            access_token,
            refresh_token,
            expires_at_ms: expires_at_ms as u64,
        }))
    }

    pub fn connector_is_linked(
        &self,
        person_id: &str,
        provider: &str,
        scope: ConnectorScope,
    ) -> Result<bool> {
        let conn = self.conn();
        let linked = conn
            .query_row(
                "SELECT 1 FROM connectors
                 WHERE person_id = ?1 AND provider = ?2 AND scope = ?3 AND status = 'CONNECTED'",
                params![person_id, provider, scope.as_str()],
                |_| Ok(()),
            )
            .optional()
            .context("failed to query connector status")?;
        Ok(linked.is_some())
    }

    pub fn revoke_connector(
        &self,
        person_id: &str,
        provider: &str,
        scope: ConnectorScope,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE connectors SET status = 'REVOKED', updated_at = ?4
             WHERE person_id = ?1 AND provider = ?2 AND scope = ?3",
            params![person_id, provider, scope.as_str(), now_rfc3339()],
        )?;
        Ok(())
    }
}
