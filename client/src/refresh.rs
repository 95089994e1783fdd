//! Silent token refresh.
//!
//! Every 401 that qualifies for recovery funnels through one
//! [`TokenRefresher`]. Concurrent callers join the refresh already in flight
//! instead of each spending the refresh token, so a burst of 401s costs one
//! `POST /v1/users/refresh`.

use lms_core::{SessionStore, TokenPair};
use lms_runtime::SingleFlight;
use lms_runtime::metrics::SessionMetrics;
use serde::Serialize;
use std::sync::Arc;

use crate::error::{ClientError, Result};

/// Login endpoint.
pub const LOGIN_PATH: &str = "/v1/users/login";

/// Refresh endpoint.
pub const REFRESH_PATH: &str = "/v1/users/refresh";

/// Whether `path` is an auth endpoint; a 401 there is final.
#[must_use]
pub fn is_auth_endpoint(path: &str) -> bool {
    let path = path.split('?').next().unwrap_or(path).trim_end_matches('/');
    path.ends_with(LOGIN_PATH) || path.ends_with(REFRESH_PATH)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody {
    refresh_token: String,
}

/// Single-flight refresh-token exchange.
#[derive(Debug, Default)]
pub struct TokenRefresher {
    flight: SingleFlight<TokenPair, ClientError>,
}

impl TokenRefresher {
    /// Idle refresher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a refresh is currently in flight.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.flight.is_in_flight()
    }

    /// Exchange the stored refresh token for a new pair, or join the exchange
    /// already in flight.
    ///
    /// On success the new pair is written to `session` (keeping its user)
    /// before any waiter resumes.
    ///
    /// # Errors
    ///
    /// - [`ClientError::SessionExpired`] if there is no refresh token, or the
    ///   session was cleared while the exchange was running
    /// - Any transport or HTTP error of the refresh call itself
    pub async fn refresh(
        &self,
        http: &reqwest::Client,
        url: String,
        session: Arc<dyn SessionStore>,
    ) -> Result<TokenPair> {
        let http = http.clone();
        self.flight
            .run(move || exchange(http, url, session))
            .await
    }
}

async fn exchange(
    http: reqwest::Client,
    url: String,
    session: Arc<dyn SessionStore>,
) -> Result<TokenPair> {
    let Some(refresh_token) = session.refresh_token() else {
        tracing::info!("No refresh token stored, session cannot be recovered");
        SessionMetrics::record_refresh("missing");
        return Err(ClientError::SessionExpired);
    };

    tracing::info!("Refreshing access token");
    let response = http
        .post(&url)
        .json(&RefreshBody { refresh_token })
        .send()
        .await
        .inspect_err(|_| SessionMetrics::record_refresh("error"))?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .bytes()
        .await
        .inspect_err(|_| SessionMetrics::record_refresh("error"))?;

    if !status.is_success() {
        tracing::warn!(status = status.as_u16(), "Token refresh rejected");
        SessionMetrics::record_refresh("rejected");
        return Err(ClientError::from_response(status.as_u16(), &headers, &body));
    }

    let tokens: TokenPair = serde_json::from_slice(&body).map_err(|e| {
        SessionMetrics::record_refresh("error");
        ClientError::Decode(e.to_string())
    })?;

    if !session.set_tokens(tokens.clone()) {
        tracing::info!("Session cleared during refresh, discarding new tokens");
        SessionMetrics::record_refresh("discarded");
        return Err(ClientError::SessionExpired);
    }

    tracing::info!("Access token refreshed");
    SessionMetrics::record_refresh("success");
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_endpoints() {
        assert!(is_auth_endpoint("/v1/users/login"));
        assert!(is_auth_endpoint("/v1/users/refresh/"));
        assert!(is_auth_endpoint("https://api.example/v1/users/login?next=/home"));
        assert!(!is_auth_endpoint("/v1/users"));
        assert!(!is_auth_endpoint("/v1/users/42"));
        assert!(!is_auth_endpoint("/v1/classes"));
    }

    #[tokio::test]
    async fn test_missing_refresh_token_expires_session() {
        let refresher = TokenRefresher::new();
        let session: Arc<dyn SessionStore> = Arc::new(lms_core::MemorySessionStore::new());

        let result = refresher
            .refresh(
                &reqwest::Client::new(),
                "http://127.0.0.1:9/v1/users/refresh".to_string(),
                session,
            )
            .await;

        assert_eq!(result, Err(ClientError::SessionExpired));
        assert!(!refresher.is_refreshing());
    }
}
