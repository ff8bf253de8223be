//! Loan-token extraction. Mirrors the teacher's query/header token
//! extraction shape, but checks the loan's own token rather than a JWT —
//! per spec.md §1 there is no authenticated identity beyond possession.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Pulls a token from `?token=...` or an `Authorization: Bearer ...` header.
pub fn extract_token(uri: &axum::http::Uri, headers: &axum::http::HeaderMap) -> Option<String> {
    let from_query = uri.query().and_then(|query| {
        query
            .split('&')
            .find(|pair| pair.starts_with("token="))
            .and_then(|pair| pair.split('=').nth(1))
            .map(|t| t.to_string())
    });

    let from_header = headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|t| t.to_string());

    from_query.or(from_header)
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    TokenMismatch,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "missing loan token"),
            AuthError::TokenMismatch => (StatusCode::FORBIDDEN, "token does not match loan"),
        };
        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue, Uri};

    #[test]
    fn extracts_token_from_query() {
        let uri: Uri = "/api/loans/abc?token=deadbeef".parse().unwrap();
        let headers = HeaderMap::new();
        assert_eq!(extract_token(&uri, &headers), Some("deadbeef".to_string()));
    }

    #[test]
    fn extracts_token_from_bearer_header() {
        let uri: Uri = "/api/loans/abc".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Bearer deadbeef"));
        assert_eq!(extract_token(&uri, &headers), Some("deadbeef".to_string()));
    }

    #[test]
    fn no_token_present() {
        let uri: Uri = "/api/loans/abc".parse().unwrap();
        let headers = HeaderMap::new();
        assert_eq!(extract_token(&uri, &headers), None);
    }
}
