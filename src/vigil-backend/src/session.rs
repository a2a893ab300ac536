//! Bearer-token session against the backend
//!
//! The session owns the single live token. It logs in lazily on first use
//! and again when an authenticated call comes back `401`, at most once per
//! request.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{BackendError, Result};
use crate::types::{LoginRequest, LoginResponse};

/// Backend login credentials
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Session manager holding the bearer token
pub struct SessionManager {
    client: Client,
    base_url: String,
    credentials: Credentials,
    token: Mutex<Option<String>>,
}

impl SessionManager {
    pub fn new(client: Client, base_url: impl Into<String>, credentials: Credentials) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            credentials,
            token: Mutex::new(None),
        }
    }

    /// Absolute URL for a backend path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Whether a token is currently held
    pub async fn has_token(&self) -> bool {
        self.token.lock().await.is_some()
    }

    /// Authorization headers, logging in first if no token is held
    pub async fn ensure_authorized(&self) -> Result<HeaderMap> {
        let mut token = self.token.lock().await;
        if let Some(ref current) = *token {
            return bearer_headers(current);
        }

        let fresh = self.login().await?;
        let headers = bearer_headers(&fresh)?;
        *token = Some(fresh);
        Ok(headers)
    }

    /// Discard the held token and log in again
    pub async fn reauthorize(&self) -> Result<HeaderMap> {
        let mut token = self.token.lock().await;
        *token = None;

        let fresh = self.login().await?;
        let headers = bearer_headers(&fresh)?;
        *token = Some(fresh);
        Ok(headers)
    }

    /// Send an authenticated request.
    ///
    /// `build` is invoked once per attempt with fresh authorization headers.
    /// A `401` triggers exactly one re-login and one retry; a second `401`
    /// yields [`BackendError::Auth`].
    pub async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client, HeaderMap) -> Result<RequestBuilder>,
    {
        let headers = self.ensure_authorized().await?;
        let response = build(&self.client, headers)?.send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!("backend rejected session token, logging in again");
        let headers = self.reauthorize().await?;
        let response = build(&self.client, headers)?.send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(BackendError::Auth(
                "request still unauthorized after re-login".to_string(),
            ));
        }

        Ok(response)
    }

    async fn login(&self) -> Result<String> {
        let url = self.url("/api/auth/login");
        debug!("logging in to {} as {}", url, self.credentials.username);

        let response = self
            .client
            .post(&url)
            .json(&LoginRequest {
                username: &self.credentials.username,
                password: &self.credentials.password,
            })
            .send()
            .await
            .map_err(|e| BackendError::Auth(format!("login request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Auth(format!("login returned {}", status)));
        }

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Auth(format!("malformed login response: {}", e)))?;

        if body.code != 0 && body.code != 200 {
            return Err(BackendError::Auth(format!(
                "login rejected with code {}: {}",
                body.code,
                body.message.unwrap_or_default()
            )));
        }

        let data = body
            .data
            .filter(|d| !d.token.is_empty())
            .ok_or_else(|| BackendError::Auth("login response carried no token".to_string()))?;

        info!("logged in to backend as {}", self.credentials.username);
        if let Some(expires_at) = data.expires_at {
            debug!("session token expires at {}", expires_at);
        }

        Ok(data.token)
    }
}

fn bearer_headers(token: &str) -> Result<HeaderMap> {
    let value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| BackendError::Auth(format!("token is not a valid header value: {}", e)))?;
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}
