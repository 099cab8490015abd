//! Token refresh: one stateless request/response round trip, no retries.

use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::debug;

use crate::authorizer::AUTHORIZATION;
use crate::credentials::{AuthSession, AuthToken};
use crate::error::SocketError;

/// Request body carrying the previous token material.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRefresh {
    pub refresh_token: String,
}

pub trait TokenRefreshApi: Send + Sync {
    /// Exchange `refresh` for a new token, presenting `authorization` verbatim.
    fn create_new_token(
        &self,
        refresh: &TokenRefresh,
        authorization: &str,
    ) -> impl Future<Output = Result<AuthToken, SocketError>> + Send;
}

/// `POST {base_url}/refresh` over HTTP.
#[derive(Clone, Debug)]
pub struct HttpTokenRefresh {
    base_url: String,
    http: reqwest::Client,
}

impl HttpTokenRefresh {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, http }
    }

    fn refresh_url(&self) -> String {
        format!("{}/refresh", self.base_url)
    }
}

impl TokenRefreshApi for HttpTokenRefresh {
    async fn create_new_token(
        &self,
        refresh: &TokenRefresh,
        authorization: &str,
    ) -> Result<AuthToken, SocketError> {
        let url = self.refresh_url();
        debug!(url = %url, "refreshing token");

        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, authorization)
            .json(refresh)
            .send()
            .await
            .map_err(SocketError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SocketError::Refresh {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<AuthToken>()
            .await
            .map_err(SocketError::from_reqwest)
    }
}

/// Refresh the token held by `session` and store the result.
///
/// The current access token is presented as the authorization credential;
/// `bootstrap` is used instead when the session has none.
pub async fn refresh_session<A: TokenRefreshApi>(
    api: &A,
    session: &AuthSession,
    bootstrap: Option<&str>,
) -> Result<AuthToken, SocketError> {
    let current = session.token();
    let refresh_token = current
        .as_ref()
        .map(|t| t.refresh_token.clone())
        .ok_or_else(|| SocketError::Refresh {
            status: 0,
            message: "no session to refresh".to_string(),
        })?;
    let authorization = current
        .as_ref()
        .map(|t| t.access_token.as_str())
        .filter(|t| !t.is_empty())
        .or(bootstrap)
        .unwrap_or_default()
        .to_string();

    let token = api
        .create_new_token(&TokenRefresh { refresh_token }, &authorization)
        .await?;
    session.set(token.clone());
    Ok(token)
}
