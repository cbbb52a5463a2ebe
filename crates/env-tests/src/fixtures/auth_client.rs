//! Authentication client fixture for the sign-in flow.

use crate::schemas::{Envelope, SigninData, SigninRequest};
use common::secret::{ExposeSecret, SecretString};
use reqwest::Client;
use thiserror::Error;

use super::sanitize_error_body;

/// Authentication client errors.
#[derive(Debug, Error)]
pub enum AuthClientError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Sign-in failed with status {status}: {body}")]
    SigninFailed { status: u16, body: String },

    #[error("Sign-in response does not match the expected schema: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("No access token in sign-in response (expected data.tokens.access_token)")]
    MissingToken,

    #[error("Protected endpoint returned status {status}: {body}")]
    Unauthorized { status: u16, body: String },
}

/// Client for the auth endpoints of the API.
pub struct AuthClient {
    base_url: String,
    http_client: Client,
}

impl AuthClient {
    /// Create a client sharing an existing HTTP client (and its timeout).
    pub fn new(base_url: impl Into<String>, http_client: Client) -> Self {
        Self {
            base_url: base_url.into(),
            http_client,
        }
    }

    /// `POST /api/v2/auth/signin` and extract `data.tokens.access_token`.
    pub async fn sign_in(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<SecretString, AuthClientError> {
        let signin_url = format!("{}/api/v2/auth/signin", self.base_url);

        let response = self
            .http_client
            .post(&signin_url)
            .json(&SigninRequest {
                email,
                password: password.expose_secret(),
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.as_u16() != 200 {
            return Err(AuthClientError::SigninFailed {
                status: status.as_u16(),
                body: sanitize_error_body(&body),
            });
        }

        let envelope: Envelope<SigninData> = serde_json::from_str(&body)?;
        envelope
            .data
            .and_then(|data| data.tokens)
            .and_then(|tokens| tokens.access_token)
            .filter(|token| !token.is_empty())
            .map(SecretString::from)
            .ok_or(AuthClientError::MissingToken)
    }

    /// `GET /api/v2/auth/me` with the bearer token; only 200 passes.
    pub async fn me(&self, access_token: &SecretString) -> Result<(), AuthClientError> {
        let me_url = format!("{}/api/v2/auth/me", self.base_url);

        let response = self
            .http_client
            .get(&me_url)
            .bearer_auth(access_token.expose_secret())
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthClientError::Unauthorized {
                status: status.as_u16(),
                body: sanitize_error_body(&body),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> AuthClient {
        AuthClient::new(server.uri(), Client::new())
    }

    #[tokio::test]
    async fn test_sign_in_posts_credentials_and_extracts_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/auth/signin"))
            .and(body_json(json!({
                "email": "admin@ci.example.com",
                "password": "ci-admin-password"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "tokens": { "access_token": "abc", "refresh_token": "def" } }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = client(&server)
            .sign_in("admin@ci.example.com", &SecretString::from("ci-admin-password"))
            .await
            .unwrap();

        assert_eq!(token.expose_secret(), "abc");
    }

    #[tokio::test]
    async fn test_me_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/auth/me"))
            .and(header("authorization", "Bearer abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {} })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .me(&SecretString::from("abc"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_token_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/auth/signin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "tokens": {} } })))
            .mount(&server)
            .await;

        let err = client(&server)
            .sign_in("a@example.com", &SecretString::from("pw"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthClientError::MissingToken));
    }

    #[tokio::test]
    async fn test_rejected_sign_in_redacts_tokens_in_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/auth/signin"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_string("invalid session eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiIxIn0.sig"),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .sign_in("a@example.com", &SecretString::from("pw"))
            .await
            .unwrap_err();

        match err {
            AuthClientError::SigninFailed { status, body } => {
                assert_eq!(status, 401);
                assert!(!body.contains("eyJhbGciOiJIUzI1NiJ9"));
                assert!(body.contains("[JWT_REDACTED]"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_me_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/auth/me"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client(&server)
            .me(&SecretString::from("abc"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthClientError::Unauthorized { status: 401, .. }));
    }
}
