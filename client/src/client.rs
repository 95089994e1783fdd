//! LMS API client implementation

use lms_core::environment::{Clock, SystemClock};
use lms_core::{ErrorBody, Navigator, Session, SessionStore, TokenPair, UserRecord};
use lms_runtime::metrics::{HttpMetrics, SessionMetrics};
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::cooldown::Cooldown;
use crate::error::{ClientError, Result};
use crate::lifecycle::{AttemptOutcome, Event, InvalidTransition, RequestLifecycle, RequestState};
use crate::refresh::{LOGIN_PATH, REFRESH_PATH, TokenRefresher, is_auth_endpoint};
use crate::request::{ApiRequest, ApiResponse, FormPart, RequestBody, build_form};

/// Header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Login credentials.
#[derive(Clone, Serialize)]
pub struct Credentials {
    /// Login email
    pub email: String,
    /// Password
    pub password: String,
}

impl Credentials {
    /// Build credentials.
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(flatten)]
    tokens: TokenPair,
    user: UserRecord,
}

struct Inner {
    http: reqwest::Client,
    config: ClientConfig,
    session: Arc<dyn SessionStore>,
    navigator: Arc<dyn Navigator>,
    refresher: TokenRefresher,
    cooldown: Cooldown,
    teardown: Mutex<()>,
}

/// LMS API client.
///
/// Cheap to clone; clones share the HTTP connection pool, the session store
/// and the in-flight refresh.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.config.base_url())
            .field("authenticated", &self.inner.session.is_authenticated())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a client using the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Internal`] if the HTTP client cannot be built
    /// (e.g. no TLS backend).
    pub fn new(
        config: ClientConfig,
        session: Arc<dyn SessionStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        Self::with_clock(config, session, navigator, Arc::new(SystemClock))
    }

    /// Create a client with an explicit clock (drives the rate-limit cooldown).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Internal`] if the HTTP client cannot be built.
    pub fn with_clock(
        config: ClientConfig,
        session: Arc<dyn SessionStore>,
        navigator: Arc<dyn Navigator>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| ClientError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                config,
                session,
                navigator,
                refresher: TokenRefresher::new(),
                cooldown: Cooldown::new(clock),
                teardown: Mutex::new(()),
            }),
        })
    }

    /// Client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Session store this client reads tokens from.
    #[must_use]
    pub fn session(&self) -> &Arc<dyn SessionStore> {
        &self.inner.session
    }

    /// Rate-limit cooldown.
    #[must_use]
    pub fn cooldown(&self) -> &Cooldown {
        &self.inner.cooldown
    }

    /// Send a request, recovering once from an expired access token.
    ///
    /// # Errors
    ///
    /// - [`ClientError::SessionExpired`] when a 401 could not be recovered; the
    ///   session has been cleared and the user sent to the sign-in route
    /// - The error of the resend, unchanged, when the resend fails (a second
    ///   401 included)
    /// - Any other transport or HTTP error of the first attempt
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "api_request",
            %request_id,
            method = %request.method,
            path = %request.path,
        );
        self.send_with_recovery(&request, request_id)
            .instrument(span)
            .await
    }

    async fn send_with_recovery(&self, request: &ApiRequest, request_id: Uuid) -> Result<ApiResponse> {
        let recoverable = !is_auth_endpoint(&request.path);
        let mut lifecycle = RequestLifecycle::new();

        let dispatched_token = self.inner.session.access_token();
        lifecycle.apply(Event::Dispatch).map_err(internal)?;
        let first = self
            .attempt(request, dispatched_token.as_deref(), request_id)
            .await;
        lifecycle
            .apply(Event::Completed(outcome(&first, recoverable)))
            .map_err(internal)?;

        if lifecycle.state() != RequestState::Failed401First {
            return first;
        }
        lifecycle.apply(Event::RefreshStarted).map_err(internal)?;

        let current_token = self.inner.session.access_token();
        let retry_token = if current_token.is_some() && current_token != dispatched_token {
            tracing::debug!("Access token already rotated, resending");
            current_token
        } else {
            tracing::debug!(
                joining = self.inner.refresher.is_refreshing(),
                "Refreshing access token"
            );
            let refreshed = self
                .inner
                .refresher
                .refresh(
                    &self.inner.http,
                    self.inner.config.url_for(REFRESH_PATH),
                    Arc::clone(&self.inner.session),
                )
                .await;
            match refreshed {
                Ok(tokens) => Some(tokens.access_token),
                Err(err) => {
                    lifecycle.apply(Event::RefreshFailed).map_err(internal)?;
                    tracing::warn!(error = %err, "Session recovery failed");
                    self.teardown();
                    return Err(ClientError::SessionExpired);
                }
            }
        };

        lifecycle.apply(Event::Dispatch).map_err(internal)?;
        debug_assert!(lifecycle.is_retry());
        let second = self
            .attempt(request, retry_token.as_deref(), request_id)
            .await;
        let state = lifecycle
            .apply(Event::Completed(outcome(&second, recoverable)))
            .map_err(internal)?;
        tracing::debug!(?state, attempts = lifecycle.attempts(), "Resend finished");
        second
    }

    async fn attempt(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
        request_id: Uuid,
    ) -> Result<ApiResponse> {
        let url = self.inner.config.url_for(&request.path);
        let mut builder = self
            .inner
            .http
            .request(request.method.clone(), &url)
            .header(REQUEST_ID_HEADER, request_id.to_string());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        builder = match &request.body {
            RequestBody::Empty => builder.header(CONTENT_TYPE, "application/json"),
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(parts) => builder.multipart(build_form(parts)?),
        };

        let started = Instant::now();
        let method = request.method.as_str();
        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                let err = ClientError::from(err);
                HttpMetrics::record_request(method, 0, started.elapsed());
                tracing::warn!(error = %err, "Request failed before a response");
                return Err(err);
            }
        };

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        HttpMetrics::record_request(method, status, started.elapsed());

        if (200..300).contains(&status) {
            tracing::debug!(status, "Request succeeded");
            return Ok(ApiResponse {
                status,
                headers,
                body,
            });
        }

        let err = ClientError::from_response(status, &headers, &body);
        if let ClientError::RateLimited { retry_after, .. } = &err {
            self.inner.cooldown.trip(*retry_after);
        }
        tracing::debug!(status, "Request rejected");
        Err(err)
    }

    /// Clear the session and send the user to sign-in, unless already there.
    fn teardown(&self) {
        let _guard = self
            .inner
            .teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        self.inner.session.clear();
        SessionMetrics::record_teardown();

        let sign_in = self.inner.config.sign_in_path.as_str();
        if self.inner.navigator.current_path() == sign_in {
            tracing::debug!("Already on the sign-in route, not redirecting");
            return;
        }
        tracing::info!(to = sign_in, "Session ended, redirecting to sign-in");
        self.inner.navigator.redirect(sign_in);
    }

    /// Sign in and store the session (tokens and user).
    ///
    /// # Errors
    ///
    /// - [`ClientError::RateLimited`] without sending anything while the
    ///   rate-limit cooldown is active
    /// - Any error of the login call (wrong credentials surface as a 401
    ///   [`ClientError::Http`]; login never triggers a refresh)
    pub async fn login(&self, credentials: &Credentials) -> Result<UserRecord> {
        if let Some(remaining) = self.inner.cooldown.remaining() {
            return Err(ClientError::RateLimited {
                retry_after: Some(remaining),
                body: ErrorBody {
                    message: self.inner.cooldown.message(),
                    ..ErrorBody::default()
                },
            });
        }

        let request = ApiRequest::post(LOGIN_PATH).json(credentials)?;
        let login: LoginResponse = self.send(request).await?.json()?;

        self.inner
            .session
            .login(Session::new(login.tokens, login.user.clone()));
        self.inner.cooldown.reset();
        tracing::info!(user = %login.user.id, role = ?login.user.role, "Signed in");
        Ok(login.user)
    }

    /// Drop the session. Navigation is left to the caller.
    pub fn logout(&self) {
        self.inner.session.clear();
        tracing::info!("Signed out");
    }

    /// `GET path`, decoded as JSON.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`]; also [`ClientError::Decode`].
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    /// `POST path` with a JSON body, decoded as JSON.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`]; also [`ClientError::Decode`].
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::post(path).json(body)?).await?.json()
    }

    /// `PUT path` with a JSON body, decoded as JSON.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`]; also [`ClientError::Decode`].
    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::put(path).json(body)?).await?.json()
    }

    /// `PATCH path` with a JSON body, decoded as JSON.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`]; also [`ClientError::Decode`].
    pub async fn patch_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::patch(path).json(body)?).await?.json()
    }

    /// `DELETE path`; the response body is ignored.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`].
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send(ApiRequest::delete(path)).await.map(|_| ())
    }

    /// `POST path` as `multipart/form-data`, decoded as JSON.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`]; also [`ClientError::Decode`].
    pub async fn upload<T: DeserializeOwned>(&self, path: &str, parts: Vec<FormPart>) -> Result<T> {
        self.send(ApiRequest::post(path).multipart(parts))
            .await?
            .json()
    }
}

fn outcome(result: &Result<ApiResponse>, recoverable: bool) -> AttemptOutcome {
    match result {
        Ok(_) => AttemptOutcome::Succeeded,
        Err(ClientError::Http { status: 401, .. }) if recoverable => AttemptOutcome::Unauthorized,
        Err(_) => AttemptOutcome::Failed,
    }
}

fn internal(err: InvalidTransition) -> ClientError {
    ClientError::Internal(err.to_string())
}
