//! Cookie-session REST client.
//!
//! The API keeps the login session in HTTP-only cookies, so this client runs
//! with a cookie store and never sees the session credentials directly. The
//! only token it hands out is the short-lived WebSocket token.

use parking_lot::RwLock;
use reqwest::header::HeaderValue;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use async_trait::async_trait;

use crate::error::{AuthError, Result};
use crate::provider::TokenProvider;
use crate::AuthConfig;

const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// The authenticated user as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Identity provider subject.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Login email, also used as the chat sender name.
    pub email: String,
    /// Given name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Family name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    user: Credentials<'a>,
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    user: User,
}

#[derive(Debug, Deserialize)]
struct WsTokenResponse {
    token: String,
}

/// Error body returned by the API. Either field may carry the message.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Client for the chat REST API.
pub struct ApiClient {
    config: AuthConfig,
    client: reqwest::Client,
    user: RwLock<Option<User>>,
    last_request_id: RwLock<Option<String>>,
}

impl ApiClient {
    /// Create a new client with its own cookie store.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: AuthConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            config,
            client,
            user: RwLock::new(None),
            last_request_id: RwLock::new(None),
        })
    }

    /// The user from the last successful login, if any.
    #[must_use]
    pub fn current_user(&self) -> Option<User> {
        self.user.read().clone()
    }

    /// The request ID echoed by the server on the most recent response.
    #[must_use]
    pub fn last_request_id(&self) -> Option<String> {
        self.last_request_id.read().clone()
    }

    /// Log in with email and password. The session cookie is kept by the client.
    ///
    /// # Errors
    ///
    /// Returns `LoginFailed` for rejected credentials, `RateLimited` on 429,
    /// or a transport/HTTP error.
    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let body = LoginRequest {
            user: Credentials { email, password },
        };
        let response = self
            .send(self.client.post(self.config.login_url()).json(&body))
            .await?;

        let status = response.status();
        if !status.is_success() {
            let err = Self::error_from(response).await;
            return Err(match err {
                AuthError::Http { status: 400 | 401, message } => AuthError::LoginFailed(message),
                other => other,
            });
        }

        let envelope: UserEnvelope = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        tracing::info!(email = %envelope.user.email, "Logged in");
        *self.user.write() = Some(envelope.user.clone());
        Ok(envelope.user)
    }

    /// End the session on the server and forget the cached user.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails. The cached user is cleared either way.
    pub async fn logout(&self) -> Result<()> {
        *self.user.write() = None;
        let response = self
            .send(self.client.post(self.config.logout_url()).json(&serde_json::json!({})))
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(())
    }

    /// Refresh the session cookie.
    ///
    /// # Errors
    ///
    /// Returns `SessionExpired` if the server rejects the refresh.
    pub async fn refresh(&self) -> Result<()> {
        let response = self
            .send(self.client.post(self.config.refresh_url()).json(&serde_json::json!({})))
            .await?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                *self.user.write() = None;
                Err(AuthError::SessionExpired)
            }
            _ => Err(Self::error_from(response).await),
        }
    }

    /// Fetch a WebSocket token for the current session.
    ///
    /// A 401 triggers one session refresh followed by a single retry.
    ///
    /// # Errors
    ///
    /// Returns `SessionExpired` if the session cannot be refreshed,
    /// `MissingToken` if the server returns an empty token, or an HTTP error.
    pub async fn ws_token(&self) -> Result<String> {
        let mut response = self.send(self.client.get(self.config.ws_token_url())).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::debug!("ws-token rejected, refreshing session");
            self.refresh().await?;
            response = self.send(self.client.get(self.config.ws_token_url())).await?;
            if response.status() == StatusCode::UNAUTHORIZED {
                return Err(AuthError::SessionExpired);
            }
        }

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let body: WsTokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        if body.token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        Ok(body.token)
    }

    /// Attach a request ID, send, and remember the ID the server echoes back.
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let request_id = Uuid::new_v4().to_string();
        let response = request.header(REQUEST_ID_HEADER, &request_id).send().await?;

        let echoed = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v: &HeaderValue| v.to_str().ok())
            .map_or(request_id, String::from);
        *self.last_request_id.write() = Some(echoed);

        Ok(response)
    }

    /// Convert a non-success response into an `AuthError`.
    async fn error_from(response: Response) -> AuthError {
        let status = response.status().as_u16();
        if status == 429 {
            return AuthError::RateLimited;
        }
        let body: ApiErrorBody = response.json().await.unwrap_or_default();
        let message = body
            .message
            .or(body.error)
            .unwrap_or_else(|| "Unknown error".to_string());
        AuthError::Http { status, message }
    }
}

#[async_trait]
impl TokenProvider for ApiClient {
    async fn token(&self) -> Result<String> {
        self.ws_token().await
    }
}
