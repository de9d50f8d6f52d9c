use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;

use super::state::{AppState, Credentials};

/// Proof that the request carried valid HTTP Basic credentials. Extract it in
/// handlers that require auth.
pub struct BasicAuth {
    pub username: String,
}

impl FromRequestParts<AppState> for BasicAuth {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        match header_value.and_then(|v| check_basic(v, &state.credentials)) {
            Some(username) => Ok(BasicAuth { username }),
            None => Err(unauthorized()),
        }
    }
}

/// Returns the username when `header_value` matches the configured pair.
/// An empty configured password never matches.
pub fn check_basic(header_value: &str, credentials: &Credentials) -> Option<String> {
    if credentials.password.is_empty() {
        return None;
    }

    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;

    let expected = format!("{}:{}", credentials.username, credentials.password);
    if constant_time_eq(decoded.as_bytes(), expected.as_bytes()) {
        Some(credentials.username.clone())
    } else {
        None
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"comment-monitor\"")],
        Json(serde_json::json!({ "detail": "Неверные учетные данные" })),
    )
        .into_response()
}

/// Constant-time comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(password: &str) -> Credentials {
        Credentials {
            username: "admin".into(),
            password: password.into(),
        }
    }

    fn basic(pair: &str) -> String {
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(pair)
        )
    }

    #[test]
    fn accepts_matching_pair() {
        assert_eq!(
            check_basic(&basic("admin:secret"), &creds("secret")).as_deref(),
            Some("admin")
        );
    }

    #[test]
    fn rejects_wrong_password_and_malformed_headers() {
        assert_eq!(check_basic(&basic("admin:nope"), &creds("secret")), None);
        assert_eq!(check_basic("Bearer abc", &creds("secret")), None);
        assert_eq!(check_basic("Basic !!!", &creds("secret")), None);
    }

    #[test]
    fn empty_password_locks_the_api() {
        assert_eq!(check_basic(&basic("admin:"), &creds("")), None);
    }
}
