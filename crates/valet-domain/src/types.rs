//! Core entity and message types shared across gateway, store, and worker.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Delivery channel an inbound or outbound message travels over.
pub enum Channel {
    Sms,
    Whatsapp,
    Telegram,
    Web,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "SMS",
            Channel::Whatsapp => "WHATSAPP",
            Channel::Telegram => "TELEGRAM",
            Channel::Web => "WEB",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DomainParseError> {
        match raw {
            "SMS" => Ok(Channel::Sms),
            "WHATSAPP" => Ok(Channel::Whatsapp),
            "TELEGRAM" => Ok(Channel::Telegram),
            "WEB" => Ok(Channel::Web),
            other => Err(DomainParseError::Channel(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Onboarding progression for a person; advances linearly to `Active`.
pub enum OnboardingState {
    AskName,
    AskConnectCalendar,
    AskConnectEmail,
    ConfirmReady,
    Active,
}

impl OnboardingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnboardingState::AskName => "ASK_NAME",
            OnboardingState::AskConnectCalendar => "ASK_CONNECT_CALENDAR",
            OnboardingState::AskConnectEmail => "ASK_CONNECT_EMAIL",
            OnboardingState::ConfirmReady => "CONFIRM_READY",
            OnboardingState::Active => "ACTIVE",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DomainParseError> {
        match raw {
            "ASK_NAME" => Ok(OnboardingState::AskName),
            "ASK_CONNECT_CALENDAR" => Ok(OnboardingState::AskConnectCalendar),
            "ASK_CONNECT_EMAIL" => Ok(OnboardingState::AskConnectEmail),
            "CONFIRM_READY" => Ok(OnboardingState::ConfirmReady),
            "ACTIVE" => Ok(OnboardingState::Active),
            other => Err(DomainParseError::OnboardingState(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Side-effecting action category a write tool maps to for approval gating.
pub enum WriteActionType {
    SendEmail,
    CreateEvent,
    UpdateEvent,
    SubmitForm,
}

impl WriteActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteActionType::SendEmail => "SEND_EMAIL",
            WriteActionType::CreateEvent => "CREATE_EVENT",
            WriteActionType::UpdateEvent => "UPDATE_EVENT",
            WriteActionType::SubmitForm => "SUBMIT_FORM",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DomainParseError> {
        match raw {
            "SEND_EMAIL" => Ok(WriteActionType::SendEmail),
            "CREATE_EVENT" => Ok(WriteActionType::CreateEvent),
            "UPDATE_EVENT" => Ok(WriteActionType::UpdateEvent),
            "SUBMIT_FORM" => Ok(WriteActionType::SubmitForm),
            other => Err(DomainParseError::ActionType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Direction of a transcript entry.
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageDirection::Inbound => "INBOUND",
            MessageDirection::Outbound => "OUTBOUND",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DomainParseError> {
        match raw {
            "INBOUND" => Ok(MessageDirection::Inbound),
            "OUTBOUND" => Ok(MessageDirection::Outbound),
            other => Err(DomainParseError::Direction(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
/// Parse failures for persisted enum columns.
pub enum DomainParseError {
    #[error("unknown channel '{0}'")]
    Channel(String),
    #[error("unknown onboarding state '{0}'")]
    OnboardingState(String),
    #[error("unknown write action type '{0}'")]
    ActionType(String),
    #[error("unknown message direction '{0}'")]
    Direction(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Identity anchor; all owned rows reference `id`.
pub struct Person {
    pub id: String,
    pub preferred_name: Option<String>,
    pub phone_e164: Option<String>,
    pub phone_verified: bool,
    pub onboarding_state: OnboardingState,
    pub timezone: Option<String>,
    pub email_signature_style: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// (channel, external user key) → person mapping.
pub struct ChannelIdentity {
    pub person_id: String,
    pub channel: Channel,
    pub external_user_key: String,
    pub phone_e164: Option<String>,
    pub verified_phone: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Normalized inbound message as produced by channel adapters.
pub struct InboundMessage {
    pub channel: Channel,
    pub external_user_key: String,
    pub text: String,
    pub provider_message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_e164: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Outbound send request consumed by channel senders.
pub struct OutboundMessage {
    pub channel: Channel,
    pub external_user_key: String,
    pub text: String,
}
