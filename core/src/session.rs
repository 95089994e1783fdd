//! Authenticated session and the store that owns it.
//!
//! A session is the access/refresh token pair together with the signed-in
//! user. The two always travel together: the store holds either a complete
//! [`Session`] or nothing, so a stale user can never outlive its tokens.

use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};

use crate::id::RecordId;

/// Role of a platform user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// School administrator.
    Admin,
    /// Teacher ("guru").
    Teacher,
    /// Student ("siswa").
    Student,
    /// Parent or guardian.
    Parent,
    /// Any role this client does not know about yet.
    #[serde(other)]
    Unknown,
}

/// The signed-in user as returned by the login endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// User identifier.
    pub id: RecordId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Login email.
    #[serde(default)]
    pub email: String,
    /// Role used for page-level authorization.
    pub role: Role,
    /// Fields this client does not model explicitly.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Access/refresh token pair, as exchanged with `/v1/users/refresh`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    /// Short-lived bearer token.
    pub access_token: String,
    /// Long-lived token used to mint a new access token.
    pub refresh_token: String,
}

/// A complete authenticated session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Bearer token attached to every request.
    pub access_token: String,
    /// Token exchanged for a new pair when the access token expires.
    pub refresh_token: String,
    /// The signed-in user.
    pub user: UserRecord,
}

impl Session {
    /// Build a session from a token pair and its user.
    #[must_use]
    pub fn new(tokens: TokenPair, user: UserRecord) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            user,
        }
    }

    /// The token pair of this session.
    #[must_use]
    pub fn tokens(&self) -> TokenPair {
        TokenPair {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }
}

/// Token store.
///
/// Process-wide session state, injected into the HTTP client at construction.
/// Written only by login, refresh success and logout/teardown.
///
/// # Implementation Notes
///
/// - `clear()` MUST drop tokens and user in one step; no reader may observe a
///   partially cleared session.
/// - `set_tokens()` replaces the token pair of the existing session and keeps
///   its user. It never re-checks or reloads the user, and it does nothing when
///   the session has already been cleared.
pub trait SessionStore: Send + Sync {
    /// Snapshot of the current session.
    fn current(&self) -> Option<Session>;

    /// Replace the whole session (login).
    fn login(&self, session: Session);

    /// Replace the token pair of the current session (refresh).
    ///
    /// Returns `false` when there is no session to update.
    fn set_tokens(&self, tokens: TokenPair) -> bool;

    /// Drop tokens and user together.
    fn clear(&self);

    /// Current access token.
    fn access_token(&self) -> Option<String> {
        self.current().map(|session| session.access_token)
    }

    /// Current refresh token.
    fn refresh_token(&self) -> Option<String> {
        self.current().map(|session| session.refresh_token)
    }

    /// Currently signed-in user.
    fn user(&self) -> Option<UserRecord> {
        self.current().map(|session| session.user)
    }

    /// Whether a session exists.
    fn is_authenticated(&self) -> bool {
        self.current().is_some()
    }
}

/// In-memory session store.
///
/// A single lock guards the whole session, which is what makes `clear()`
/// atomic.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    session: RwLock<Option<Session>>,
}

impl MemorySessionStore {
    /// Create an empty store (signed out).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that starts with an existing session.
    #[must_use]
    pub fn with_session(session: Session) -> Self {
        Self {
            session: RwLock::new(Some(session)),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn current(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn login(&self, session: Session) {
        tracing::debug!(user_id = %session.user.id, "Session established");
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    fn set_tokens(&self, tokens: TokenPair) -> bool {
        let mut guard = self.session.write().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(session) => {
                session.access_token = tokens.access_token;
                session.refresh_token = tokens.refresh_token;
                true
            }
            None => {
                tracing::debug!("Ignoring token update for a cleared session");
                false
            }
        }
    }

    fn clear(&self) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = None;
        tracing::debug!("Session cleared");
    }
}
