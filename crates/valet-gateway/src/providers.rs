//! Concrete delivery adapters: Twilio (SMS and WhatsApp), Telegram, and a
//! collectable sender for embedded web clients.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use valet_domain::{Channel, OutboundMessage};
use valet_store::Store;

use crate::senders::ChannelSender;

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub api_base: String,
    /// E.164 number messages are sent from on the SMS channel.
    pub sms_from: String,
    /// WhatsApp-enabled number; empty disables the WhatsApp channel.
    pub whatsapp_from: String,
    pub request_timeout: Duration,
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            api_base: "https://api.twilio.com".to_string(),
            sms_from: String::new(),
            whatsapp_from: String::new(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

pub struct TwilioSender {
    http: reqwest::Client,
    config: TwilioConfig,
}

impl TwilioSender {
    pub fn new(config: TwilioConfig) -> Result<Self> {
        if config.account_sid.is_empty() || config.auth_token.is_empty() {
            bail!("twilio sender requires an account sid and auth token");
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build twilio http client")?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl ChannelSender for TwilioSender {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let (to, from) = match message.channel {
            Channel::Sms => (
                message.external_user_key.clone(),
                self.config.sms_from.clone(),
            ),
            Channel::Whatsapp => {
                if self.config.whatsapp_from.is_empty() {
                    bail!("no whatsapp-enabled twilio number configured");
                }
                (
                    format!("whatsapp:{}", message.external_user_key),
                    format!("whatsapp:{}", self.config.whatsapp_from),
                )
            }
            other => bail!("twilio sender cannot deliver on channel {}", other.as_str()),
        };

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_base.trim_end_matches('/'),
            self.config.account_sid
        );
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("To", to.as_str()),
                ("From", from.as_str()),
                ("Body", message.text.as_str()),
            ])
            .send()
            .await
            .context("twilio request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("twilio rejected the message: {status} {body}");
        }
        tracing::info!(channel = message.channel.as_str(), to = %message.external_user_key, "twilio delivery accepted");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub api_base: String,
    pub request_timeout: Duration,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: "https://api.telegram.org".to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

pub struct TelegramSender {
    http: reqwest::Client,
    config: TelegramConfig,
}

impl TelegramSender {
    pub fn new(config: TelegramConfig) -> Result<Self> {
        if config.bot_token.is_empty() {
            bail!("telegram sender requires a bot token");
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build telegram http client")?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl ChannelSender for TelegramSender {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token
        );
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": message.external_user_key,
                "text": message.text,
            }))
            .send()
            .await
            .context("telegram request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("telegram rejected the message: {status} {body}");
        }
        Ok(())
    }
}

/// Queues web-channel messages in the durable outbox until the embedding
/// client collects them through `GET /outbox/{user_key}`. Synchronous
/// replies travel back on the inbound response; this sender only sees
/// worker-driven completions, which may originate in another process.
pub struct WebCollectSender {
    store: Arc<Store>,
}

impl WebCollectSender {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Drains and returns everything queued for one web client.
    pub fn take(&self, external_user_key: &str) -> Result<Vec<String>> {
        self.store.drain_web_outbound(external_user_key)
    }
}

#[async_trait]
impl ChannelSender for WebCollectSender {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        self.store
            .queue_web_outbound(&message.external_user_key, &message.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn outbound(channel: Channel, key: &str) -> OutboundMessage {
        OutboundMessage {
            channel,
            external_user_key: key.to_string(),
            text: "hello".to_string(),
        }
    }

    #[tokio::test]
    async fn twilio_posts_form_encoded_message() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/2010-04-01/Accounts/AC123/Messages.json")
                .body_contains("To=%2B15550001111")
                .body_contains("Body=hello");
            then.status(201).json_body(serde_json::json!({"sid": "SM1"}));
        });

        let sender = TwilioSender::new(TwilioConfig {
            account_sid: "AC123".to_string(),
            auth_token: "secret".to_string(),
            api_base: server.base_url(),
            sms_from: "+15559990000".to_string(),
            ..TwilioConfig::default()
        })
        .expect("sender");
        sender
            .send(&outbound(Channel::Sms, "+15550001111"))
            .await
            .expect("send");
        mock.assert();
    }

    #[tokio::test]
    async fn twilio_prefixes_whatsapp_addresses() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/2010-04-01/Accounts/AC123/Messages.json")
                .body_contains("To=whatsapp%3A%2B15550001111")
                .body_contains("From=whatsapp%3A%2B15559990000");
            then.status(201).json_body(serde_json::json!({"sid": "SM2"}));
        });

        let sender = TwilioSender::new(TwilioConfig {
            account_sid: "AC123".to_string(),
            auth_token: "secret".to_string(),
            api_base: server.base_url(),
            sms_from: "+15559990000".to_string(),
            whatsapp_from: "+15559990000".to_string(),
            ..TwilioConfig::default()
        })
        .expect("sender");
        sender
            .send(&outbound(Channel::Whatsapp, "+15550001111"))
            .await
            .expect("send");
        mock.assert();
    }

    #[tokio::test]
    async fn twilio_surfaces_provider_rejection() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(400).body("invalid To");
        });

        let sender = TwilioSender::new(TwilioConfig {
            account_sid: "AC123".to_string(),
            auth_token: "secret".to_string(),
            api_base: server.base_url(),
            sms_from: "+15559990000".to_string(),
            ..TwilioConfig::default()
        })
        .expect("sender");
        let error = sender
            .send(&outbound(Channel::Sms, "bad"))
            .await
            .expect_err("rejection");
        assert!(error.to_string().contains("twilio rejected"));
    }

    #[tokio::test]
    async fn telegram_sends_chat_message() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/bottok-1/sendMessage")
                .json_body_partial(r#"{"chat_id": "tg-77", "text": "hello"}"#);
            then.status(200).json_body(serde_json::json!({"ok": true}));
        });

        let sender = TelegramSender::new(TelegramConfig {
            bot_token: "tok-1".to_string(),
            api_base: server.base_url(),
            ..TelegramConfig::default()
        })
        .expect("sender");
        sender
            .send(&outbound(Channel::Telegram, "tg-77"))
            .await
            .expect("send");
        mock.assert();
    }

    #[tokio::test]
    async fn web_collect_queues_durably_until_taken() {
        let store = Arc::new(Store::open_in_memory().expect("store"));
        let sender = WebCollectSender::new(store.clone());
        sender
            .send(&outbound(Channel::Web, "web-1"))
            .await
            .expect("send");
        sender
            .send(&outbound(Channel::Web, "web-1"))
            .await
            .expect("send");

        // A sender in another process sees the same outbox rows.
        let other = WebCollectSender::new(store);
        assert_eq!(other.take("web-1").expect("take"), ["hello", "hello"]);
        assert!(sender.take("web-1").expect("take").is_empty());
    }
}
