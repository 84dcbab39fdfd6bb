//! `GET /api/v1/external-agents/sync`: authenticate, then upgrade.

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tether_core::AgentId;
use tracing::{debug, warn};

use super::auth::bearer_token;
use super::session::run_agent_session;
use crate::server::AppState;

/// Connection query parameters.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConnectQuery {
    /// Platform session the agent speaks for.
    pub session_id: Option<String>,
    /// Free-form agent identifier.
    pub agent_id: Option<String>,
}

impl ConnectQuery {
    /// `session_id`, else `agent_id`, else a generated ID.
    pub fn resolve_agent_id(&self) -> AgentId {
        [&self.session_id, &self.agent_id]
            .into_iter()
            .flatten()
            .find(|id| !id.is_empty())
            .map_or_else(AgentId::generated, |id| AgentId::from(id.as_str()))
    }
}

/// Authentication runs before the upgrade so rejected agents never get a
/// socket.
pub async fn sync_handler(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        debug!("agent connection without bearer token");
        return (StatusCode::UNAUTHORIZED, "Authorization header required").into_response();
    };
    let agent_id = query.resolve_agent_id();
    if !state.validator.validate(token, &agent_id) {
        warn!(agent_id = %agent_id, "agent connection rejected: invalid token");
        return (StatusCode::UNAUTHORIZED, "Invalid token").into_response();
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let engine = state.engine.clone();
    let params = state.session;
    ws.on_upgrade(move |socket| run_agent_session(socket, agent_id, engine, params))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_takes_priority() {
        let query = ConnectQuery {
            session_id: Some("ses_1".into()),
            agent_id: Some("agent-9".into()),
        };
        assert_eq!(query.resolve_agent_id().as_str(), "ses_1");
    }

    #[test]
    fn falls_back_to_agent_id_then_generated() {
        let query = ConnectQuery {
            session_id: Some(String::new()),
            agent_id: Some("agent-9".into()),
        };
        assert_eq!(query.resolve_agent_id().as_str(), "agent-9");
        let generated = ConnectQuery::default().resolve_agent_id();
        assert!(generated.as_str().starts_with("external-agent-"));
    }
}
