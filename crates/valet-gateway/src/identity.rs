//! Maps (channel, external user key) to a Person, creating on first contact.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;

use valet_core::KvCache;
use valet_domain::{Channel, ChannelIdentity, Person};
use valet_store::Store;

const MERGE_TOKEN_TTL: Duration = Duration::from_secs(10 * 60);

pub struct IdentityResolver {
    store: Arc<Store>,
    cache: Arc<KvCache>,
}

impl IdentityResolver {
    pub fn new(store: Arc<Store>, cache: Arc<KvCache>) -> Self {
        Self { store, cache }
    }

    /// Lookup order: exact channel identity, then verified phone, then a
    /// fresh person. Always upserts the channel identity row so the mapping
    /// tracks the latest phone and verification flag.
    pub fn resolve(
        &self,
        channel: Channel,
        external_user_key: &str,
        phone_e164: Option<&str>,
        verified_phone: bool,
    ) -> Result<Person> {
        let person = match self.store.find_channel_identity(channel, external_user_key)? {
            Some(identity) => self
                .store
                .find_person(&identity.person_id)?
                .context("channel identity points at a missing person")?,
            None => {
                let by_phone = match (phone_e164, verified_phone) {
                    (Some(phone), true) => self.store.find_person_by_phone(phone)?,
                    _ => None,
                };
                match by_phone {
                    Some(person) => person,
                    None => self.store.insert_person(phone_e164, verified_phone)?,
                }
            }
        };

        self.store.upsert_channel_identity(&ChannelIdentity {
            person_id: person.id.clone(),
            channel,
            external_user_key: external_user_key.to_string(),
            phone_e164: phone_e164.map(str::to_string),
            verified_phone,
        })?;
        Ok(person)
    }

    /// Stages a merge and returns a single-use token the user confirms
    /// out-of-band. Tokens lapse after ten minutes.
    pub fn begin_merge(&self, source_person_id: &str, target_person_id: &str) -> String {
        let token = valet_core::new_entity_id("merge");
        self.cache.set_with_ttl(
            &format!("identity-merge:{token}"),
            &json!({
                "source": source_person_id,
                "target": target_person_id,
            })
            .to_string(),
            MERGE_TOKEN_TTL,
        );
        token
    }

    /// Consumes a staged merge token; returns false when the token is
    /// unknown or lapsed.
    pub fn complete_merge(&self, token: &str) -> Result<bool> {
        let Some(staged) = self.cache.take(&format!("identity-merge:{token}")) else {
            return Ok(false);
        };
        let staged: serde_json::Value =
            serde_json::from_str(&staged).context("staged merge payload is corrupt")?;
        let source = staged["source"].as_str().context("staged merge has no source")?;
        let target = staged["target"].as_str().context("staged merge has no target")?;

        self.store.merge_persons(source, target)?;
        self.store.append_audit(
            Some(target),
            "IDENTITY_MERGED",
            Some("person"),
            Some(source),
            None,
        )?;
        Ok(true)
    }
}
