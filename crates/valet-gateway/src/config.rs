use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Per-person advisory lock TTL.
    pub lock_ttl: Duration,
    /// Engine session continuity cache TTL.
    pub session_ttl: Duration,
    /// Confirmation window for pending approvals.
    pub approval_ttl: Duration,
    /// Cache TTL for the worker's resume payload shortcut.
    pub resume_payload_ttl: Duration,
    /// Upper bound on tool-calling rounds per turn.
    pub max_rounds: u32,
    /// Global write kill-switch; blocks every write tool when set.
    pub writes_disabled: bool,
    /// When set, every write requires approval regardless of per-person policy.
    pub strict_approvals: bool,
    /// Public base used to render approval links.
    pub approval_link_base: String,
    /// System instructions sent with every engine turn.
    pub instructions: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(20),
            session_ttl: Duration::from_secs(600),
            approval_ttl: Duration::from_secs(30 * 60),
            resume_payload_ttl: Duration::from_secs(60 * 60),
            max_rounds: 6,
            writes_disabled: false,
            strict_approvals: false,
            approval_link_base: "http://localhost:8080".to_string(),
            instructions: "You are Valet, a personal assistant reachable over \
                           messaging. Be concise and use the available tools \
                           when the user asks for information or actions."
                .to_string(),
        }
    }
}
