//! Domain model for the Valet assistant gateway: channels, persons,
//! onboarding, write-action taxonomy, and approval policy.

pub mod onboarding;
pub mod permissions;
pub mod types;

pub use onboarding::{advance_onboarding, onboarding_prompt, OnboardingStep};
pub use permissions::{can_execute_read, requires_approval, PolicyContext};
pub use types::*;
