//! Server-side sessions: an in-process store keyed by opaque tokens, the
//! `connect.sid` cookie transport, and per-request identity resolution.
//!
//! The only thing a session holds is the user's id. Every request resolves
//! that id back to a full user; any failure along the way (missing cookie,
//! expired session, store error, user deleted) is a terminal "no identity".

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::COOKIE, request::Parts, HeaderMap},
};
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;
use crate::users::repo::UserRecord;

pub const SESSION_COOKIE: &str = "connect.sid";

#[derive(Debug, Clone)]
struct Session {
    user_id: String,
    expires_at: OffsetDateTime,
}

/// In-process session map. Single-process by design; state shared between
/// requests only through the cookie-carried token.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, Session>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl.whole_seconds()
    }

    /// Opens a session for a user and returns the opaque token.
    pub async fn create(&self, user_id: &str) -> String {
        let token = Uuid::new_v4().simple().to_string();
        let session = Session {
            user_id: user_id.to_string(),
            expires_at: OffsetDateTime::now_utc() + self.ttl,
        };
        self.inner.write().await.insert(token.clone(), session);
        token
    }

    /// Looks up the user id behind a token. Expired entries are dropped on
    /// the way through.
    pub async fn get(&self, token: &str) -> Option<String> {
        let mut sessions = self.inner.write().await;
        match sessions.get(token) {
            Some(session) if session.expires_at > OffsetDateTime::now_utc() => {
                Some(session.user_id.clone())
            }
            Some(_) => {
                sessions.remove(token);
                None
            }
            None => None,
        }
    }

    pub async fn remove(&self, token: &str) -> bool {
        self.inner.write().await.remove(token).is_some()
    }
}

/// Builds the session `Set-Cookie` value: HttpOnly, SameSite=Lax, scoped to
/// the whole site, `Secure` behind config.
pub fn session_cookie(token: &str, max_age_seconds: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// A `Set-Cookie` value that clears the session cookie.
pub fn clear_session_cookie(secure: bool) -> String {
    session_cookie("", 0, secure)
}

/// Extracts a cookie value from the request headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((key, value)) = pair.trim().split_once('=') {
                if key == name {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

/// Resolves the request's session cookie to a full user, or nothing. A
/// session whose user no longer exists is discarded.
pub async fn resolve_identity(state: &AppState, headers: &HeaderMap) -> Option<UserRecord> {
    let token = cookie_value(headers, SESSION_COOKIE)?;
    let user_id = state.sessions.get(&token).await?;
    match state.repo.find_by_id(&user_id).await {
        Ok(Some(user)) => Some(user),
        Ok(None) => {
            warn!(%user_id, "session references a deleted user");
            state.sessions.remove(&token).await;
            None
        }
        Err(e) => {
            error!(error = %e, "session user lookup failed");
            None
        }
    }
}

/// Requires-auth gate: extracts the authenticated user or rejects with 401.
#[derive(Debug)]
pub struct CurrentUser(pub UserRecord);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match resolve_identity(state, &parts.headers).await {
            Some(user) => Ok(CurrentUser(user)),
            None => Err(ApiError::Unauthorized("Unauthorized. Please log in.".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn create_then_get_returns_user_id() {
        let store = SessionStore::new(60);
        let token = store.create("user-1").await;
        assert_eq!(store.get(&token).await.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn tokens_are_unique_per_session() {
        let store = SessionStore::new(60);
        let a = store.create("user-1").await;
        let b = store.create("user-1").await;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn expired_sessions_are_dropped() {
        let store = SessionStore::new(-1);
        let token = store.create("user-1").await;
        assert!(store.get(&token).await.is_none());
        // a second get sees the entry already gone
        assert!(store.get(&token).await.is_none());
    }

    #[tokio::test]
    async fn remove_invalidates_token() {
        let store = SessionStore::new(60);
        let token = store.create("user-1").await;
        assert!(store.remove(&token).await);
        assert!(store.get(&token).await.is_none());
        assert!(!store.remove(&token).await);
    }

    #[test]
    fn session_cookie_carries_required_attributes() {
        let cookie = session_cookie("abc", 86400, false);
        assert!(cookie.starts_with("connect.sid=abc"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Max-Age=86400"));
        assert!(cookie.contains("Path=/"));
        assert!(!cookie.contains("Secure"));
        assert!(session_cookie("abc", 86400, true).contains("Secure"));
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        let cookie = clear_session_cookie(false);
        assert!(cookie.starts_with("connect.sid=;"));
        assert!(cookie.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn gate_rejects_anonymous_request_with_login_prompt() {
        let state = crate::state::AppState::fake().await;
        let request = axum::http::Request::builder().body(()).unwrap();
        let (mut parts, _) = request.into_parts();
        let err = CurrentUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApiError::Unauthorized(message) if message == "Unauthorized. Please log in."
        ));
    }

    #[test]
    fn cookie_value_finds_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("foo=bar; connect.sid=tok123; baz=qux"),
        );
        assert_eq!(
            cookie_value(&headers, SESSION_COOKIE).as_deref(),
            Some("tok123")
        );
        assert!(cookie_value(&headers, "missing").is_none());
    }
}
