//! Bearer token validation for agent connections.

use axum::http::{HeaderMap, header};
use tether_core::AgentId;

/// Decides whether a bearer token may open a connection for an agent.
pub trait TokenValidator: Send + Sync {
    /// Whether `token` grants access for `agent_id`.
    fn validate(&self, token: &str, agent_id: &AgentId) -> bool;
}

/// Accepts the configured runner token. With none configured, any non-empty
/// token is accepted.
#[derive(Clone, Debug, Default)]
pub struct RunnerTokenValidator {
    runner_token: Option<String>,
}

impl RunnerTokenValidator {
    /// Validator for an optional shared runner token.
    pub fn new(runner_token: Option<String>) -> Self {
        Self {
            runner_token: runner_token.filter(|t| !t.is_empty()),
        }
    }
}

impl TokenValidator for RunnerTokenValidator {
    fn validate(&self, token: &str, _agent_id: &AgentId) -> bool {
        match &self.runner_token {
            Some(expected) => token == expected,
            None => !token.is_empty(),
        }
    }
}

/// The token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, rest) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(rest.trim()).filter(|t| !t.is_empty())
}
