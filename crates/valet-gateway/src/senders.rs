//! Outbound channel delivery seam.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use valet_domain::{Channel, OutboundMessage};

/// Delivery backend for one channel. Adapters for real providers live
/// outside the core; tests substitute recording implementations.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<()>;
}

/// Fallback sender that only logs; used for channels without a configured
/// adapter so delivery failures never break a turn.
pub struct LogSender;

#[async_trait]
impl ChannelSender for LogSender {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        tracing::info!(
            channel = message.channel.as_str(),
            to = %message.external_user_key,
            "outbound message (no adapter configured): {}",
            message.text
        );
        Ok(())
    }
}

pub struct ChannelRouter {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
    fallback: Arc<dyn ChannelSender>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self {
            senders: HashMap::new(),
            fallback: Arc::new(LogSender),
        }
    }

    pub fn with_sender(mut self, channel: Channel, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(channel, sender);
        self
    }

    pub async fn deliver(&self, message: &OutboundMessage) -> Result<()> {
        let sender = self
            .senders
            .get(&message.channel)
            .unwrap_or(&self.fallback);
        sender.send(message).await
    }
}

impl Default for ChannelRouter {
    fn default() -> Self {
        Self::new()
    }
}
