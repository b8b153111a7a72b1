//! Person rows plus their default permission and skill fixtures.

use super::*;

const DEFAULT_SKILLS: &[&str] = &["conversation", "calendar", "email", "browser"];

impl Store {
    pub fn find_person(&self, person_id: &str) -> Result<Option<Person>> {
        let conn = self.conn();
        let person = conn
            .query_row(
                "SELECT id, preferred_name, phone_e164, phone_verified, onboarding_state,
                        timezone, email_signature_style
                 FROM persons WHERE id = ?1",
                params![person_id],
                row_to_person,
            )
            .optional()
            .context("failed to query person by id")?;
        person.transpose()
    }

    pub fn find_person_by_phone(&self, phone_e164: &str) -> Result<Option<Person>> {
        let conn = self.conn();
        let person = conn
            .query_row(
                "SELECT id, preferred_name, phone_e164, phone_verified, onboarding_state,
                        timezone, email_signature_style
                 FROM persons WHERE phone_e164 = ?1",
                params![phone_e164],
                row_to_person,
            )
            .optional()
            .context("failed to query person by phone")?;
        person.transpose()
    }

    /// Inserts a new person with default permissions and skills in one
    /// transaction.
    pub fn insert_person(
        &self,
        phone_e164: Option<&str>,
        phone_verified: bool,
    ) -> Result<Person> {
        let person_id = new_entity_id("person");
        let now = now_rfc3339();
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO persons (id, phone_e164, phone_verified, onboarding_state, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                person_id,
                phone_e164,
                phone_verified,
                OnboardingState::AskName.as_str(),
                now
            ],
        )?;
        tx.execute(
            "INSERT INTO permissions (person_id, resource, can_read, requires_approval_for_write, updated_at)
             VALUES (?1, 'default', 1, 1, ?2)",
            params![person_id, now],
        )?;
        for skill in DEFAULT_SKILLS {
            tx.execute(
                "INSERT INTO skills_enabled (person_id, skill, enabled) VALUES (?1, ?2, 1)",
                params![person_id, skill],
            )?;
        }
        tx.commit()?;

        Ok(Person {
            id: person_id,
            preferred_name: None,
            phone_e164: phone_e164.map(str::to_string),
            phone_verified,
            onboarding_state: OnboardingState::AskName,
            timezone: None,
            email_signature_style: None,
        })
    }

    pub fn update_preferred_name(&self, person_id: &str, preferred_name: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE persons SET preferred_name = ?2, updated_at = ?3 WHERE id = ?1",
            params![person_id, preferred_name, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn update_onboarding_state(&self, person_id: &str, state: OnboardingState) -> Result<()> {
        self.conn().execute(
            "UPDATE persons SET onboarding_state = ?2, updated_at = ?3 WHERE id = ?1",
            params![person_id, state.as_str(), now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn mark_phone_verified(&self, person_id: &str, phone_e164: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE persons SET phone_e164 = ?2, phone_verified = 1, updated_at = ?3 WHERE id = ?1",
            params![person_id, phone_e164, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn set_profile_preferences(
        &self,
        person_id: &str,
        timezone: Option<&str>,
        email_signature_style: Option<&str>,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE persons
             SET timezone = COALESCE(?2, timezone),
                 email_signature_style = COALESCE(?3, email_signature_style),
                 updated_at = ?4
             WHERE id = ?1",
            params![person_id, timezone, email_signature_style, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn set_permission_policy(&self, person_id: &str, policy: &PolicyContext) -> Result<()> {
        self.conn().execute(
            "UPDATE permissions
             SET can_read = ?2, requires_approval_for_write = ?3, updated_at = ?4
             WHERE person_id = ?1",
            params![
                person_id,
                policy.read_allowed,
                policy.write_requires_approval,
                now_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Effective permission policy; defaults to gated writes when no row
    /// exists.
    pub fn permission_policy(&self, person_id: &str) -> Result<PolicyContext> {
        let conn = self.conn();
        let policy = conn
            .query_row(
                "SELECT can_read, requires_approval_for_write
                 FROM permissions
                 WHERE person_id = ?1
                 ORDER BY updated_at DESC
                 LIMIT 1",
                params![person_id],
                |row| {
                    Ok(PolicyContext {
                        read_allowed: row.get::<_, bool>(0)?,
                        write_requires_approval: row.get::<_, bool>(1)?,
                    })
                },
            )
            .optional()
            .context("failed to query permission policy")?;
        Ok(policy.unwrap_or_default())
    }

    pub fn list_enabled_skills(&self, person_id: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut statement = conn.prepare(
            "SELECT skill FROM skills_enabled WHERE person_id = ?1 AND enabled = 1 ORDER BY skill",
        )?;
        let skills = statement
            .query_map(params![person_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(skills)
    }
}

fn row_to_person(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Person>> {
    let state_raw: String = row.get(4)?;
    Ok((|| {
        let onboarding_state = OnboardingState::parse(&state_raw)
            .map_err(|error| anyhow::anyhow!("corrupt persons row: {error}"))?;
        Ok(Person {
            id: row.get(0)?,
            preferred_name: row.get(1)?,
            phone_e164: row.get(2)?,
            phone_verified: row.get(3)?,
            onboarding_state,
            timezone: row.get(5)?,
            email_signature_style: row.get(6)?,
        })
    })())
}
