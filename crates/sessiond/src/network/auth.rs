//! Bearer-token gate for `/api` and `/ws`.
//!
//! With no token configured every request passes. The WebSocket route also
//! accepts the token as a `token` query parameter, since browsers cannot set
//! headers on a WebSocket handshake.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::server::{ServerState, WS_PATH};

/// What a request presented.
#[derive(Debug, PartialEq, Eq)]
enum Presented {
    Missing,
    Token(String),
}

pub async fn require_token(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.auth_token.as_deref() else {
        return next.run(request).await;
    };

    match presented_token(&request) {
        Presented::Token(token) if token == expected => next.run(request).await,
        Presented::Token(_) => {
            tracing::warn!(path = %request.uri().path(), "Rejected request with bad token");
            (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "Token verification failed" })),
            )
                .into_response()
        }
        Presented::Missing => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Missing or invalid Authorization header" })),
        )
            .into_response(),
    }
}

fn presented_token(request: &Request) -> Presented {
    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Presented::Token(token.to_string());
    }

    if request.uri().path() == WS_PATH {
        if let Some(token) = request.uri().query().and_then(query_token) {
            return Presented::Token(token.to_string());
        }
    }

    Presented::Missing
}

fn query_token(query: &str) -> Option<&str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "token")
        .map(|(_, value)| value)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(uri: &str, auth: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri(uri);
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_bearer_header() {
        assert_eq!(
            presented_token(&request("/api/health", Some("Bearer s3cret"))),
            Presented::Token("s3cret".to_string())
        );
        assert_eq!(
            presented_token(&request("/api/health", Some("Basic abc"))),
            Presented::Missing
        );
        assert_eq!(presented_token(&request("/api/health", None)), Presented::Missing);
    }

    #[test]
    fn test_query_token_only_on_websocket() {
        assert_eq!(
            presented_token(&request("/ws/pty?token=abc", None)),
            Presented::Token("abc".to_string())
        );
        assert_eq!(
            presented_token(&request("/api/health?token=abc", None)),
            Presented::Missing
        );
    }

    #[test]
    fn test_query_token_parsing() {
        assert_eq!(query_token("a=1&token=xyz"), Some("xyz"));
        assert_eq!(query_token("token="), None);
        assert_eq!(query_token("tokens=1"), None);
    }
}
