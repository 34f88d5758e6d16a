use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{AuthResponse, CredentialsRequest, MeResponse, MessageResponse, PublicUser},
        password::hash_password,
        strategy::{verify_credentials, AuthOutcome},
    },
    error::{ApiError, ApiJson, ApiResult},
    session::{self, CurrentUser, SESSION_COOKIE},
    state::AppState,
    users::repo::UserRecord,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route("/protected", get(protected_data))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CredentialsRequest>,
) -> ApiResult<(StatusCode, HeaderMap, Json<AuthResponse>)> {
    let email = payload
        .email
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let password = payload.password.as_deref().filter(|v| !v.is_empty());
    let (Some(email), Some(password)) = (email, password) else {
        return Err(ApiError::Validation("Email and password are required.".into()));
    };

    if password.chars().count() < 6 {
        warn!("registration with short password");
        return Err(ApiError::Validation(
            "Password must be at least 6 characters long.".into(),
        ));
    }

    // Pre-check for a friendlier conflict; the unique index still catches
    // the race and maps to the same 409.
    let existing = state
        .repo
        .find_by_email(email)
        .await
        .map_err(|e| ApiError::from_repo("Registration failed.", e))?;
    if existing.is_some() {
        warn!("registration with taken email");
        return Err(ApiError::Conflict(
            "User with this email already exists.".into(),
        ));
    }

    let hash = hash_password(password).map_err(|e| {
        error!(error = %e, "hash_password failed");
        ApiError::store("Registration failed.", e)
    })?;

    let user = state
        .repo
        .create_user(email, &hash)
        .await
        .map_err(|e| ApiError::from_repo("Registration failed.", e))?;

    let headers = open_session(&state, &user).await;
    info!(user_id = %user.id_hex(), "user registered");
    Ok((
        StatusCode::CREATED,
        headers,
        Json(AuthResponse {
            message: "Registration successful.".into(),
            user: PublicUser::from(&user),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CredentialsRequest>,
) -> ApiResult<(HeaderMap, Json<AuthResponse>)> {
    let email = payload.email.as_deref().unwrap_or_default();
    let password = payload.password.as_deref().unwrap_or_default();

    let outcome = verify_credentials(&state.repo, email, password)
        .await
        .map_err(|e| {
            error!(error = %e, "credential verification failed");
            ApiError::store("Login failed.", e)
        })?;

    let user = match outcome {
        AuthOutcome::Authenticated(user) => user,
        AuthOutcome::Rejected => {
            return Err(ApiError::Unauthorized("Invalid credentials.".into()));
        }
    };

    let headers = open_session(&state, &user).await;
    info!(user_id = %user.id_hex(), "user logged in");
    Ok((
        headers,
        Json(AuthResponse {
            message: "Login successful.".into(),
            user: PublicUser::from(&user),
        }),
    ))
}

#[instrument(skip(state, headers))]
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (HeaderMap, Json<MessageResponse>) {
    if let Some(token) = session::cookie_value(&headers, SESSION_COOKIE) {
        state.sessions.remove(&token).await;
    }

    let mut out = HeaderMap::new();
    if let Ok(cookie) =
        session::clear_session_cookie(state.config.session.cookie_secure).parse()
    {
        out.insert(SET_COOKIE, cookie);
    }
    (
        out,
        Json(MessageResponse {
            message: "Logout successful.".into(),
        }),
    )
}

/// Unlike the gated routes, an anonymous caller here gets the dedicated
/// "Not authenticated." message rather than the generic gate rejection.
#[instrument(skip_all)]
pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<MeResponse>> {
    let Some(user) = session::resolve_identity(&state, &headers).await else {
        return Err(ApiError::Unauthorized("Not authenticated.".into()));
    };
    Ok(Json(MeResponse {
        user: PublicUser::from(&user),
    }))
}

#[instrument(skip_all)]
pub async fn protected_data(CurrentUser(user): CurrentUser) -> Json<AuthResponse> {
    Json(AuthResponse {
        message: "You have access to protected data.".into(),
        user: PublicUser::from(&user),
    })
}

async fn open_session(state: &AppState, user: &UserRecord) -> HeaderMap {
    let token = state.sessions.create(&user.id_hex()).await;
    let cookie = session::session_cookie(
        &token,
        state.sessions.ttl_seconds(),
        state.config.session.cookie_secure,
    );
    let mut headers = HeaderMap::new();
    if let Ok(value) = cookie.parse() {
        headers.insert(SET_COOKIE, value);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn me_without_session_says_not_authenticated() {
        let state = AppState::fake().await;
        let err = me(State(state), HeaderMap::new()).await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::Unauthorized(message) if message == "Not authenticated."
        ));
    }
}
