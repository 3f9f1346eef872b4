//! Auth endpoint transport.
//!
//! The coordinator talks to the three auth endpoints only through
//! [`AuthTransport`], so tests can script refresh outcomes and embedders can
//! swap the HTTP stack.

use crate::session::{LoginRequest, RefreshTokenRequest, TokenGrant};
use crate::{AuthError, AuthResult, CoordinatorConfig};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Login endpoint, relative to the API base URL.
pub const LOGIN_PATH: &str = "auth/login";

/// Refresh endpoint, relative to the API base URL.
pub const REFRESH_PATH: &str = "auth/refresh";

/// Revoke endpoint, relative to the API base URL.
pub const LOGOUT_PATH: &str = "auth/logout";

const MAX_ERROR_MESSAGE_LEN: usize = 200;

/// The remote operations the coordinator depends on.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    /// Exchange credentials for a token grant.
    async fn login(&self, email: &str, password: &str) -> AuthResult<TokenGrant>;

    /// Exchange a refresh token for a new grant. The old refresh token is
    /// invalidated by the server.
    async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenGrant>;

    /// Revoke a refresh token.
    async fn revoke(&self, refresh_token: &str) -> AuthResult<()>;
}

/// Returns true for requests that must never go through token renewal:
/// the login and refresh calls themselves.
pub fn is_auth_endpoint(path: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let path = path.trim_matches('/');

    [LOGIN_PATH, REFRESH_PATH].iter().any(|endpoint| {
        path == *endpoint
            || path
                .strip_suffix(endpoint)
                .is_some_and(|prefix| prefix.ends_with('/'))
    })
}

/// [`AuthTransport`] over the cashflow REST API.
pub struct HttpAuthTransport {
    http: Client,
    config: CoordinatorConfig,
}

impl HttpAuthTransport {
    /// Create a transport using the configured base URL and timeout.
    pub fn new(config: CoordinatorConfig) -> AuthResult<Self> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { http, config })
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> AuthResult<Response> {
        let url = self.config.endpoint(path)?;
        debug!(url = %url, "Calling auth endpoint");

        self.http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(map_send_error)
    }
}

#[async_trait]
impl AuthTransport for HttpAuthTransport {
    async fn login(&self, email: &str, password: &str) -> AuthResult<TokenGrant> {
        let response = self
            .post(LOGIN_PATH, &LoginRequest { email, password })
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = error_message(response).await;
            warn!(status, message = %message, "Login rejected");
            return Err(map_login_status(status, message));
        }

        Ok(response.json().await?)
    }

    async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenGrant> {
        let response = self
            .post(REFRESH_PATH, &RefreshTokenRequest { refresh_token })
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = error_message(response).await;
            warn!(status, message = %message, "Token refresh rejected");
            return Err(map_refresh_status(status, message));
        }

        Ok(response.json().await?)
    }

    async fn revoke(&self, refresh_token: &str) -> AuthResult<()> {
        let response = self
            .post(LOGOUT_PATH, &RefreshTokenRequest { refresh_token })
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = error_message(response).await;
            return Err(map_api_status(status, message));
        }

        Ok(())
    }
}

pub(crate) fn map_send_error(e: reqwest::Error) -> AuthError {
    if e.is_timeout() {
        AuthError::Timeout
    } else {
        AuthError::Http(e)
    }
}

fn map_login_status(status: u16, message: String) -> AuthError {
    match status {
        400 | 401 => AuthError::InvalidCredentials(message),
        403 => AuthError::AccountDisabled,
        429 => AuthError::RateLimited,
        _ => AuthError::Api { status, message },
    }
}

fn map_refresh_status(status: u16, message: String) -> AuthError {
    match status {
        400 | 401 | 403 => AuthError::SessionExpired,
        _ => map_api_status(status, message),
    }
}

/// Map a non-success status from any non-auth endpoint.
pub(crate) fn map_api_status(status: u16, message: String) -> AuthError {
    match status {
        401 => AuthError::Unauthenticated,
        403 => AuthError::Forbidden,
        429 => AuthError::RateLimited,
        _ => AuthError::Api { status, message },
    }
}

/// Pull a readable message out of an error response body.
pub(crate) async fn error_message(response: Response) -> String {
    let body = response.text().await.unwrap_or_default();
    message_from_body(&body)
}

fn message_from_body(body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|json| {
        ["message", "error"]
            .iter()
            .find_map(|field| json.get(*field).and_then(Value::as_str).map(str::to_string))
    });

    let message = from_json.unwrap_or_else(|| body.trim().to_string());
    if message.len() <= MAX_ERROR_MESSAGE_LEN {
        return message;
    }

    let mut end = MAX_ERROR_MESSAGE_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &message[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_auth_endpoint() {
        assert!(is_auth_endpoint("auth/login"));
        assert!(is_auth_endpoint("/auth/refresh"));
        assert!(is_auth_endpoint("/api/auth/refresh"));
        assert!(is_auth_endpoint("/api/auth/login?next=%2F"));

        assert!(!is_auth_endpoint("/api/auth/logout"));
        assert!(!is_auth_endpoint("/api/oauth/refresh"));
        assert!(!is_auth_endpoint("/api/transactions"));
    }

    #[test]
    fn test_login_status_mapping() {
        assert!(matches!(
            map_login_status(401, "bad password".to_string()),
            AuthError::InvalidCredentials(message) if message == "bad password"
        ));
        assert!(matches!(
            map_login_status(403, String::new()),
            AuthError::AccountDisabled
        ));
        assert!(matches!(
            map_login_status(429, String::new()),
            AuthError::RateLimited
        ));
        assert!(matches!(
            map_login_status(500, String::new()),
            AuthError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn test_refresh_status_mapping() {
        assert!(matches!(
            map_refresh_status(401, String::new()),
            AuthError::SessionExpired
        ));
        assert!(matches!(
            map_refresh_status(400, String::new()),
            AuthError::SessionExpired
        ));
        assert!(matches!(
            map_refresh_status(502, String::new()),
            AuthError::Api { status: 502, .. }
        ));
    }

    #[test]
    fn test_api_status_mapping() {
        assert!(matches!(
            map_api_status(403, String::new()),
            AuthError::Forbidden
        ));
        assert!(matches!(
            map_api_status(429, String::new()),
            AuthError::RateLimited
        ));
        assert!(matches!(
            map_api_status(401, String::new()),
            AuthError::Unauthenticated
        ));
    }

    #[test]
    fn test_message_from_body() {
        assert_eq!(
            message_from_body(r#"{"message":"Account locked"}"#),
            "Account locked"
        );
        assert_eq!(message_from_body(r#"{"error":"nope"}"#), "nope");
        assert_eq!(message_from_body("  plain text \n"), "plain text");

        let long = "é".repeat(300);
        let truncated = message_from_body(&long);
        assert!(truncated.ends_with('…'));
        assert!(truncated.len() <= MAX_ERROR_MESSAGE_LEN + '…'.len_utf8());
    }

    fn transport_for(server: &wiremock::MockServer) -> HttpAuthTransport {
        let config = CoordinatorConfig::new(&format!("{}/api", server.uri())).unwrap();
        HttpAuthTransport::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_login_posts_credentials_and_decodes_grant() {
        use wiremock::matchers::{body_json, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .and(body_json(serde_json::json!({
                "email": "ana@example.com",
                "password": "hunter2"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "accessToken": "at-1",
                "refreshToken": "rt-1",
                "expiresInSeconds": 900,
                "user": {"id": "u-1", "email": "ana@example.com", "role": "admin"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = transport_for(&server)
            .login("ana@example.com", "hunter2")
            .await
            .unwrap();

        assert_eq!(grant.access_token, "at-1");
        assert_eq!(grant.refresh_token, "rt-1");
        assert_eq!(grant.expires_in_seconds, 900);
        assert_eq!(grant.user.role, "admin");
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_session_expired() {
        use wiremock::matchers::{body_json, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .and(body_json(serde_json::json!({"refreshToken": "rt-stale"})))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(serde_json::json!({"error": "revoked"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let result = transport_for(&server).refresh("rt-stale").await;

        assert!(matches!(result, Err(AuthError::SessionExpired)));
    }
}
