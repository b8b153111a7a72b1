//! Inbound gateway: identity resolution, onboarding, the turn loop, and
//! the HTTP approval surface.

mod config;
mod continuity;
mod identity;
mod providers;
mod routes;
mod senders;
mod turn_loop;

pub use config::GatewayConfig;
pub use continuity::{SessionContinuity, SessionHandle};
pub use identity::IdentityResolver;
pub use providers::{
    TelegramConfig, TelegramSender, TwilioConfig, TwilioSender, WebCollectSender,
};
pub use routes::{router, AppState};
pub use senders::{ChannelRouter, ChannelSender, LogSender};
pub use turn_loop::TurnRouter;
