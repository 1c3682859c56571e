use axum::body::{Body, to_bytes};
use axum::extract::Request;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::limits::MAX_FORM_BODY_BYTES;
use crate::session::Session;

pub const HEADER: &str = "x-csrf-token";
pub const FIELD: &str = "csrf_token";

fn rejected(reason: &str) -> Response {
    warn!("csrf check failed: {reason}");
    metrics::counter!(crate::observability::CSRF_REJECTIONS_TOTAL).increment(1);
    (StatusCode::BAD_REQUEST, "Bad Request").into_response()
}

fn tokens_match(expected: &str, presented: &str) -> bool {
    expected.len() == presented.len()
        && expected
            .bytes()
            .zip(presented.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

fn is_form(req: &Request) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"))
}

fn form_token(body: &[u8]) -> Option<String> {
    serde_urlencoded::from_bytes::<Vec<(String, String)>>(body)
        .ok()?
        .into_iter()
        .find(|(name, _)| name == FIELD)
        .map(|(_, value)| value)
}

/// Synchronizer-token check for every request that can change state. The
/// token comes from the `X-CSRF-Token` header or the form's `csrf_token`
/// field; a form body is buffered and handed on unchanged.
pub async fn csrf_guard(session: Session, req: Request, next: Next) -> Response {
    if matches!(
        *req.method(),
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    ) {
        return next.run(req).await;
    }
    let expected = session.expected_csrf_token();

    let header_token = req
        .headers()
        .get(HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if let Some(token) = header_token {
        if tokens_match(&expected, &token) {
            return next.run(req).await;
        }
        return rejected("header token mismatch");
    }

    if !is_form(&req) {
        return rejected("no token");
    }
    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, MAX_FORM_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return rejected("form body unreadable or too large"),
    };
    match form_token(&bytes) {
        Some(token) if tokens_match(&expected, &token) => {
            next.run(Request::from_parts(parts, Body::from(bytes))).await
        }
        Some(_) => rejected("form token mismatch"),
        None => rejected("no token"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_comparison() {
        assert!(tokens_match("01HZX", "01HZX"));
        assert!(!tokens_match("01HZX", "01HZY"));
        assert!(!tokens_match("01HZX", "01HZ"));
        assert!(!tokens_match("01HZX", ""));
    }

    #[test]
    fn token_found_among_fields() {
        let body = b"start=2050-01-01&csrf_token=abc%2B1&end=2050-01-02";
        assert_eq!(form_token(body).as_deref(), Some("abc+1"));
        assert_eq!(form_token(b"start=2050-01-01"), None);
    }
}
