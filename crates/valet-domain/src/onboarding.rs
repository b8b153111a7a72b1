//! Onboarding state machine: prompt catalog and advancement rules.

use crate::types::OnboardingState;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Result of feeding one user reply into the onboarding machine.
pub struct OnboardingStep {
    pub next_state: OnboardingState,
    pub response: String,
}

/// The prompt a person should see when entering `state`.
pub fn onboarding_prompt(state: OnboardingState) -> &'static str {
    match state {
        OnboardingState::AskName => "Welcome to Valet. What should I call you?",
        OnboardingState::AskConnectCalendar => {
            "Nice to meet you. Reply CONNECT CALENDAR to link Google Calendar or SKIP."
        }
        OnboardingState::AskConnectEmail => "Great. Reply CONNECT EMAIL to link Gmail or SKIP.",
        OnboardingState::ConfirmReady => "All set. Reply READY to start using your assistant.",
        OnboardingState::Active => "You are fully onboarded.",
    }
}

/// Advances onboarding by one user reply. Unrecognized input keeps the
/// current state and re-prompts.
pub fn advance_onboarding(state: OnboardingState, input: &str) -> OnboardingStep {
    let normalized = input.trim();
    match state {
        OnboardingState::AskName => {
            if normalized.is_empty() {
                return OnboardingStep {
                    next_state: state,
                    response: "Please share your preferred name.".to_string(),
                };
            }
            OnboardingStep {
                next_state: OnboardingState::AskConnectCalendar,
                response: format!("Thanks {normalized}. Reply CONNECT CALENDAR to continue, or SKIP."),
            }
        }
        OnboardingState::AskConnectCalendar => {
            let upper = normalized.to_uppercase();
            if upper == "CONNECT CALENDAR" || upper == "SKIP" {
                OnboardingStep {
                    next_state: OnboardingState::AskConnectEmail,
                    response: "Reply CONNECT EMAIL to continue, or SKIP.".to_string(),
                }
            } else {
                OnboardingStep {
                    next_state: state,
                    response: "Reply CONNECT CALENDAR to link now, or SKIP to continue."
                        .to_string(),
                }
            }
        }
        OnboardingState::AskConnectEmail => {
            let upper = normalized.to_uppercase();
            if upper == "CONNECT EMAIL" || upper == "SKIP" {
                OnboardingStep {
                    next_state: OnboardingState::ConfirmReady,
                    response: "Reply READY when you are ready to start.".to_string(),
                }
            } else {
                OnboardingStep {
                    next_state: state,
                    response: "Reply CONNECT EMAIL to link now, or SKIP to continue.".to_string(),
                }
            }
        }
        OnboardingState::ConfirmReady => {
            if normalized.eq_ignore_ascii_case("READY") {
                OnboardingStep {
                    next_state: OnboardingState::Active,
                    response: "Great. Your assistant is active.".to_string(),
                }
            } else {
                OnboardingStep {
                    next_state: state,
                    response: "Reply READY to activate your assistant.".to_string(),
                }
            }
        }
        OnboardingState::Active => OnboardingStep {
            next_state: state,
            response: "Your assistant is already active.".to_string(),
        },
    }
}
