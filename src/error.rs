use axum::{
    async_trait,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::users::repo::RepoError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Handler-level error type. Every variant maps to one HTTP status and a
/// structured JSON body; nothing else reaches the transport layer.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed client input (400).
    #[error("{0}")]
    Validation(String),

    /// Missing or bad credentials / session (401).
    #[error("{0}")]
    Unauthorized(String),

    /// Absent identity where one was expected (404).
    #[error("{0}")]
    NotFound(String),

    /// Uniqueness violation (409).
    #[error("{0}")]
    Conflict(String),

    /// Underlying store failure (500). The driver message is passed through
    /// in the `error` field; this API is an internal admin tool.
    #[error("{message}")]
    Store { message: String, error: String },
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApiError {
    pub fn store(message: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::Store {
            message: message.into(),
            error: error.to_string(),
        }
    }

    /// Maps a repository failure to the wire: duplicate email is a 409, a
    /// rejected caller-supplied id a 400, any other store failure a 500
    /// carrying the given route-level message.
    pub fn from_repo(message: &str, err: RepoError) -> Self {
        match err {
            RepoError::DuplicateEmail => {
                ApiError::Conflict("User with this email already exists.".into())
            }
            RepoError::InvalidId(_) => {
                ApiError::Validation("id must be a valid ObjectId.".into())
            }
            RepoError::Store(e) => ApiError::store(message, e),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON body extractor whose rejection is an [`ApiError`], so malformed
/// bodies come back as the same `{ "message": ... }` shape as every other
/// client error instead of axum's plain-text rejection.
#[derive(Debug)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError::Validation(rejection.body_text())),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::Store { message, error } => ErrorBody {
                message,
                error: Some(error),
            },
            other => ErrorBody {
                message: other.to_string(),
                error: None,
            },
        };
        (status, Json(body)).into_response()
    }
}
