use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, sync::Arc};
use tracing::{debug, info, warn};

const DEFAULT_KEYS: &str = "dashboard:dashboard-key";

#[derive(Clone)]
pub struct AuthState {
    keys: Arc<HashMap<String, AuthContext>>,
}

/// Dashboard operator behind a request, attached as a request extension.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub user: String,
    pub key_id: String,
}

impl AuthState {
    /// Parses `user:key` pairs separated by commas. Malformed entries are
    /// skipped; an empty result falls back to the local default key.
    pub fn from_keys(raw: Option<&str>) -> Self {
        let mut keys = parse_keys(raw.unwrap_or(DEFAULT_KEYS));
        if keys.is_empty() {
            warn!(
                target = "social2listing.api",
                "DASHBOARD_API_KEYS produced no keys; falling back to the default key"
            );
            keys = parse_keys(DEFAULT_KEYS);
        } else {
            info!(target = "social2listing.api", key_count = keys.len(), "loaded dashboard keys");
        }
        Self {
            keys: Arc::new(keys),
        }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.keys.get(presented).cloned()
    }
}

pub async fn require_dashboard_key(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_key(request.headers()) else {
        return Ok(unauthorized(
            "missing_api_key",
            "Provide X-Dashboard-Key or Bearer token",
        ));
    };
    let Some(context) = state.authenticate(&presented) else {
        return Ok(unauthorized("invalid_api_key", "Key not recognized"));
    };

    debug!(target = "social2listing.api", user = %context.user, key_id = %context.key_id, "request_authenticated");
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

fn extract_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get("X-Dashboard-Key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn unauthorized(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}

fn parse_keys(raw: &str) -> HashMap<String, AuthContext> {
    let mut keys = HashMap::new();
    for (idx, token) in raw.split(',').enumerate() {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.splitn(2, ':');
        let user = parts.next().map(str::trim).filter(|s| !s.is_empty());
        let key = parts.next().map(str::trim).filter(|s| !s.is_empty());
        match (user, key) {
            (Some(user), Some(secret)) => {
                keys.insert(
                    secret.to_string(),
                    AuthContext {
                        user: user.to_string(),
                        key_id: format!("key-{:02}", idx + 1),
                    },
                );
            }
            _ => warn!(
                target = "social2listing.api",
                "ignored malformed DASHBOARD_API_KEYS entry at position {}",
                idx + 1
            ),
        }
    }
    keys
}
