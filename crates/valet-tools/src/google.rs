//! Google Calendar and Gmail providers over REST.
//!
//! Access tokens are loaded from the encrypted connector store and
//! refreshed when they expire within one minute; a rotated token is
//! persisted back before the provider call runs.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Map, Value};

use valet_store::{ConnectorScope, ConnectorTokens, Store, TokenCipher};

const REFRESH_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub calendar_base: String,
    pub gmail_base: String,
    pub request_timeout: Duration,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            calendar_base: "https://www.googleapis.com/calendar/v3".to_string(),
            gmail_base: "https://gmail.googleapis.com/gmail/v1".to_string(),
            request_timeout: Duration::from_secs(20),
        }
    }
}

pub struct GoogleProvider {
    http: reqwest::Client,
    config: GoogleConfig,
}

impl GoogleProvider {
    pub fn new(config: GoogleConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build google http client")?;
        Ok(Self { http, config })
    }

    /// Resolves a usable access token for the person and scope, refreshing
    /// and re-persisting it when it expires within the refresh window.
    pub async fn access_token(
        &self,
        store: &Store,
        cipher: &TokenCipher,
        person_id: &str,
        scope: ConnectorScope,
    ) -> Result<String> {
        let Some(tokens) = store.connector_tokens(cipher, person_id, "google", scope)? else {
            bail!("the {} account is not connected", scope.as_str());
        };
        if !tokens.expires_within(REFRESH_WINDOW) {
            return Ok(tokens.access_token);
        }
        let Some(refresh_token) = tokens.refresh_token.clone() else {
            bail!("the {} token expired and cannot be refreshed", scope.as_str());
        };

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .context("token refresh request failed")?;
        if !response.status().is_success() {
            bail!("token refresh returned HTTP {}", response.status().as_u16());
        }
        let payload: Value = response.json().await.context("token refresh payload")?;
        let access_token = payload["access_token"]
            .as_str()
            .context("token refresh payload had no access_token")?
            .to_string();
        let expires_in = payload["expires_in"].as_u64().unwrap_or(3600);

        let rotated = ConnectorTokens {
            access_token: access_token.clone(),
            refresh_token: Some(refresh_token),
            expires_at_ms: valet_core::now_unix_ms() + expires_in * 1000,
        };
        store.upsert_connector(cipher, person_id, "google", scope, &rotated)?;
        tracing::debug!(person = person_id, scope = scope.as_str(), "access token rotated");
        Ok(access_token)
    }

    async fn get_json(&self, token: &str, url: String) -> Result<Value> {
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .context("provider request failed")?;
        read_json(response).await
    }

    pub async fn list_events(
        &self,
        token: &str,
        time_min: Option<&str>,
        time_max: Option<&str>,
        max_results: u32,
    ) -> Result<Value> {
        let mut url = format!(
            "{}/calendars/primary/events?singleEvents=true&orderBy=startTime&maxResults={max_results}",
            self.config.calendar_base
        );
        if let Some(time_min) = time_min {
            url.push_str(&format!("&timeMin={}", urlencode(time_min)));
        }
        if let Some(time_max) = time_max {
            url.push_str(&format!("&timeMax={}", urlencode(time_max)));
        }
        self.get_json(token, url).await
    }

    pub async fn get_event(&self, token: &str, event_id: &str) -> Result<Value> {
        self.get_json(
            token,
            format!(
                "{}/calendars/primary/events/{}",
                self.config.calendar_base,
                urlencode(event_id)
            ),
        )
        .await
    }

    pub async fn create_event(&self, token: &str, arguments: &Value) -> Result<Value> {
        let body = event_body(arguments)?;
        let response = self
            .http
            .post(format!("{}/calendars/primary/events", self.config.calendar_base))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .context("event creation failed")?;
        read_json(response).await
    }

    pub async fn update_event(&self, token: &str, arguments: &Value) -> Result<Value> {
        let event_id = arguments["event_id"]
            .as_str()
            .context("update_event needs an event_id")?;
        let body = event_body(arguments)?;
        let response = self
            .http
            .patch(format!(
                "{}/calendars/primary/events/{}",
                self.config.calendar_base,
                urlencode(event_id)
            ))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .context("event update failed")?;
        read_json(response).await
    }

    pub async fn list_messages(
        &self,
        token: &str,
        query: Option<&str>,
        max_results: u32,
    ) -> Result<Value> {
        let mut url = format!(
            "{}/users/me/messages?maxResults={max_results}",
            self.config.gmail_base
        );
        if let Some(query) = query {
            url.push_str(&format!("&q={}", urlencode(query)));
        }
        self.get_json(token, url).await
    }

    pub async fn get_message(&self, token: &str, message_id: &str) -> Result<Value> {
        self.get_json(
            token,
            format!(
                "{}/users/me/messages/{}?format=full",
                self.config.gmail_base,
                urlencode(message_id)
            ),
        )
        .await
    }

    pub async fn send_email(&self, token: &str, arguments: &Value) -> Result<Value> {
        let raw = raw_mime(arguments)?;
        let response = self
            .http
            .post(format!("{}/users/me/messages/send", self.config.gmail_base))
            .bearer_auth(token)
            .json(&json!({ "raw": raw }))
            .send()
            .await
            .context("email send failed")?;
        read_json(response).await
    }

    /// Saves the message as a Gmail draft instead of sending it.
    pub async fn create_draft(&self, token: &str, arguments: &Value) -> Result<Value> {
        let raw = raw_mime(arguments)?;
        let response = self
            .http
            .post(format!("{}/users/me/drafts", self.config.gmail_base))
            .bearer_auth(token)
            .json(&json!({ "message": { "raw": raw } }))
            .send()
            .await
            .context("draft creation failed")?;
        read_json(response).await
    }
}

/// URL-safe, unpadded base64 of a plain-text RFC 2822 message.
fn raw_mime(arguments: &Value) -> Result<String> {
    let to = arguments["to"].as_str().context("the email needs a recipient")?;
    let subject = arguments["subject"]
        .as_str()
        .context("the email needs a subject")?;
    let body = arguments["body"].as_str().context("the email needs a body")?;
    let cc: Vec<&str> = arguments["cc"]
        .as_array()
        .map(|values| values.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut mime = format!("To: {to}\r\n");
    if !cc.is_empty() {
        mime.push_str(&format!("Cc: {}\r\n", cc.join(", ")));
    }
    mime.push_str(&format!(
        "Subject: {subject}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{body}"
    ));
    Ok(URL_SAFE_NO_PAD.encode(mime.as_bytes()))
}

fn event_body(arguments: &Value) -> Result<Value> {
    let mut body = Map::new();
    if let Some(summary) = arguments["summary"].as_str() {
        body.insert("summary".to_string(), json!(summary));
    }
    if let Some(description) = arguments["description"].as_str() {
        body.insert("description".to_string(), json!(description));
    }
    if let Some(start) = arguments["start"].as_str() {
        body.insert("start".to_string(), json!({"dateTime": start}));
    }
    if let Some(end) = arguments["end"].as_str() {
        body.insert("end".to_string(), json!({"dateTime": end}));
    }
    if let Some(attendees) = arguments["attendees"].as_array() {
        let attendees: Vec<Value> = attendees
            .iter()
            .filter_map(Value::as_str)
            .map(|email| json!({"email": email}))
            .collect();
        body.insert("attendees".to_string(), Value::Array(attendees));
    }
    if body.is_empty() {
        bail!("event payload has no fields to send");
    }
    Ok(Value::Object(body))
}

async fn read_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!(
            "provider returned HTTP {}: {}",
            status.as_u16(),
            valet_core::truncate_chars(&body, 200)
        );
    }
    response.json().await.context("provider payload was not JSON")
}

fn urlencode(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}
