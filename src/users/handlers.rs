use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Html,
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use mongodb::bson::{doc, Bson, Document};
use serde_json::Value;
use tracing::{error, info, instrument};

use crate::{
    error::{ApiError, ApiJson, ApiResult},
    session::CurrentUser,
    state::AppState,
    users::{
        dto::{
            DeleteRequest, DeleteResponse, InsertManyRequest, InsertManyResponse,
            InsertOneRequest, InsertOneResponse, ListParams, ListResponse, ReplaceRequest,
            UpdateRequest, WriteResponse,
        },
        normalize::{json_to_bson, normalize_filter},
        repo::ListQuery,
    },
};

const MAX_LIMIT: i64 = 100;
const MAX_SKIP: i64 = 10_000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/page", get(users_page))
        .route("/users/insert-one", post(insert_one))
        .route("/users/insert-many", post(insert_many))
        .route("/users/update-one", patch(update_one))
        .route("/users/update-many", patch(update_many))
        .route("/users/replace-one", put(replace_one))
        .route("/users/delete-one", delete(delete_one))
        .route("/users/delete-many", delete(delete_many))
}

#[instrument(skip(state, _user))]
pub async fn list_users(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ListResponse>> {
    let query = build_list_query(params)?;
    let users = state
        .repo
        .find_users(query)
        .await
        .map_err(|e| ApiError::from_repo("Failed to load users from MongoDB.", e))?;
    Ok(Json(ListResponse {
        total: users.len(),
        users,
    }))
}

#[instrument(skip(state, _user, payload))]
pub async fn insert_one(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    ApiJson(payload): ApiJson<InsertOneRequest>,
) -> ApiResult<(StatusCode, Json<InsertOneResponse>)> {
    let document = require_object("document", payload.document.as_ref())?;
    let inserted_id = state
        .repo
        .insert_one(document)
        .await
        .map_err(|e| ApiError::from_repo("Failed to insert document.", e))?;
    info!(%inserted_id, "document inserted");
    Ok((
        StatusCode::CREATED,
        Json(InsertOneResponse {
            message: "Document inserted.".into(),
            inserted_id,
        }),
    ))
}

#[instrument(skip(state, _user, payload))]
pub async fn insert_many(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    ApiJson(payload): ApiJson<InsertManyRequest>,
) -> ApiResult<(StatusCode, Json<InsertManyResponse>)> {
    let documents = match payload.documents {
        Some(docs) if !docs.is_empty() && docs.iter().all(Value::is_object) => docs,
        _ => {
            return Err(ApiError::Validation(
                "documents must be a non-empty array of JSON objects.".into(),
            ))
        }
    };
    let inserted_ids = state
        .repo
        .insert_many(&documents)
        .await
        .map_err(|e| ApiError::from_repo("Failed to insert documents.", e))?;
    info!(count = inserted_ids.len(), "documents inserted");
    Ok((
        StatusCode::CREATED,
        Json(InsertManyResponse {
            message: "Documents inserted.".into(),
            inserted_count: inserted_ids.len(),
            inserted_ids,
        }),
    ))
}

#[instrument(skip(state, _user, payload))]
pub async fn update_one(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    ApiJson(payload): ApiJson<UpdateRequest>,
) -> ApiResult<Json<WriteResponse>> {
    let filter = require_object("filter", payload.filter.as_ref())?;
    let update = require_object("update", payload.update.as_ref())?;
    let outcome = state
        .repo
        .update_one(filter, update, payload.upsert)
        .await
        .map_err(|e| ApiError::from_repo("Failed to update document.", e))?;
    Ok(Json(WriteResponse {
        message: "Document updated.".into(),
        outcome,
    }))
}

#[instrument(skip(state, _user, payload))]
pub async fn update_many(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    ApiJson(payload): ApiJson<UpdateRequest>,
) -> ApiResult<Json<WriteResponse>> {
    let filter = require_object("filter", payload.filter.as_ref())?;
    let update = require_object("update", payload.update.as_ref())?;
    let outcome = state
        .repo
        .update_many(filter, update, payload.upsert)
        .await
        .map_err(|e| ApiError::from_repo("Failed to update documents.", e))?;
    Ok(Json(WriteResponse {
        message: "Documents updated.".into(),
        outcome,
    }))
}

#[instrument(skip(state, _user, payload))]
pub async fn replace_one(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    ApiJson(payload): ApiJson<ReplaceRequest>,
) -> ApiResult<Json<WriteResponse>> {
    let filter = require_object("filter", payload.filter.as_ref())?;
    let replacement = require_object("replacement", payload.replacement.as_ref())?;
    let outcome = state
        .repo
        .replace_one(filter, replacement, payload.upsert)
        .await
        .map_err(|e| ApiError::from_repo("Failed to replace document.", e))?;
    Ok(Json(WriteResponse {
        message: "Document replaced.".into(),
        outcome,
    }))
}

#[instrument(skip(state, _user, payload))]
pub async fn delete_one(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    ApiJson(payload): ApiJson<DeleteRequest>,
) -> ApiResult<Json<DeleteResponse>> {
    let filter = require_object("filter", payload.filter.as_ref())?;
    let deleted_count = state
        .repo
        .delete_one(filter)
        .await
        .map_err(|e| ApiError::from_repo("Failed to delete document.", e))?;
    Ok(Json(DeleteResponse {
        message: "Document deleted.".into(),
        deleted_count,
    }))
}

#[instrument(skip(state, _user, payload))]
pub async fn delete_many(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    ApiJson(payload): ApiJson<DeleteRequest>,
) -> ApiResult<Json<DeleteResponse>> {
    let filter = require_object("filter", payload.filter.as_ref())?;
    let deleted_count = state
        .repo
        .delete_many(filter)
        .await
        .map_err(|e| ApiError::from_repo("Failed to delete documents.", e))?;
    Ok(Json(DeleteResponse {
        message: "Documents deleted.".into(),
        deleted_count,
    }))
}

/// HTML debug listing of registered users, newest first.
#[instrument(skip(state, _user))]
pub async fn users_page(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
) -> Result<Html<String>, (StatusCode, Html<String>)> {
    let query = ListQuery {
        projection: Some(doc! { "email": 1, "createdAt": 1 }),
        limit: MAX_LIMIT,
        ..Default::default()
    };
    match state.repo.find_users(query).await {
        Ok(users) => Ok(Html(render_users_page(&users))),
        Err(e) => {
            error!(error = %e, "users page failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(format!(
                    "<h1>Failed to load users</h1><p>{}</p>",
                    escape_html(&e.to_string())
                )),
            ))
        }
    }
}

// --- helpers ---

fn build_list_query(params: ListParams) -> Result<ListQuery, ApiError> {
    // The store reads a limit of 0 as "unlimited", so it falls back to the
    // default instead of passing through.
    let limit = match params.limit {
        Some(l) if l < 0 => {
            return Err(ApiError::Validation(
                "limit must be a non-negative integer.".into(),
            ))
        }
        Some(0) | None => 50,
        Some(l) => l,
    };
    let skip = params.skip.unwrap_or(0);
    if skip < 0 {
        return Err(ApiError::Validation(
            "skip must be a non-negative integer.".into(),
        ));
    }

    let filter = match params.filter.as_deref() {
        Some(raw) => normalize_filter(&parse_json_object("filter", raw)?),
        None => Document::new(),
    };
    // Without an explicit projection the hash stays out of responses.
    let projection = match params.projection.as_deref() {
        Some(raw) => Some(value_to_document(&parse_json_object("projection", raw)?)),
        None => Some(doc! { "passwordHash": 0 }),
    };
    let sort = match params.sort.as_deref() {
        Some(raw) => Some(value_to_document(&parse_json_object("sort", raw)?)),
        None => None,
    };

    Ok(ListQuery {
        filter,
        projection,
        sort,
        limit: limit.min(MAX_LIMIT),
        skip: skip.min(MAX_SKIP) as u64,
    })
}

fn parse_json_object(name: &str, raw: &str) -> Result<Value, ApiError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|_| ApiError::Validation(format!("{name} must be valid JSON.")))?;
    if !value.is_object() {
        return Err(ApiError::Validation(format!(
            "{name} must be a JSON object."
        )));
    }
    Ok(value)
}

fn value_to_document(value: &Value) -> Document {
    match json_to_bson(value) {
        Bson::Document(doc) => doc,
        _ => Document::new(),
    }
}

fn require_object<'a>(name: &str, value: Option<&'a Value>) -> Result<&'a Value, ApiError> {
    match value {
        Some(v) if v.is_object() => Ok(v),
        _ => Err(ApiError::Validation(format!(
            "{name} must be a JSON object."
        ))),
    }
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn render_users_page(users: &[Value]) -> String {
    let listing = if users.is_empty() {
        "<p>No users found yet.</p>".to_string()
    } else {
        let items: String = users
            .iter()
            .map(|user| {
                let email = user["email"].as_str().unwrap_or("(no email)");
                let created = user["createdAt"].as_str().unwrap_or("");
                format!(
                    "<li><strong>{}</strong> - {}</li>",
                    escape_html(email),
                    escape_html(created)
                )
            })
            .collect();
        format!("<ul>{items}</ul>")
    };

    format!(
        r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Users</title>
    <style>
      body {{ font-family: sans-serif; max-width: 720px; margin: 40px auto; padding: 0 16px; line-height: 1.5; }}
      h1 {{ margin-bottom: 8px; }}
      p {{ color: #333; }}
    </style>
  </head>
  <body>
    <h1>Registered users</h1>
    <p>Found: {}</p>
    {}
  </body>
</html>"#,
        users.len(),
        listing
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn list_query_defaults_exclude_password_hash() {
        let query = build_list_query(ListParams::default()).unwrap();
        assert_eq!(query.limit, 50);
        assert_eq!(query.skip, 0);
        assert_eq!(
            query.projection.unwrap(),
            doc! { "passwordHash": 0 }
        );
    }

    #[test]
    fn list_query_clamps_limit_and_skip() {
        let query = build_list_query(ListParams {
            limit: Some(500),
            skip: Some(1_000_000),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(query.limit, 100);
        assert_eq!(query.skip, 10_000);

        // Zero would mean "unlimited" at the store, so it takes the default.
        let query = build_list_query(ListParams {
            limit: Some(0),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(query.limit, 50);
    }

    #[test]
    fn list_query_rejects_negative_values() {
        assert!(build_list_query(ListParams {
            limit: Some(-1),
            ..Default::default()
        })
        .is_err());
        assert!(build_list_query(ListParams {
            skip: Some(-1),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn list_query_rejects_malformed_filter_json() {
        assert!(build_list_query(ListParams {
            filter: Some("{not json".into()),
            ..Default::default()
        })
        .is_err());
        assert!(build_list_query(ListParams {
            filter: Some("[1,2]".into()),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn list_query_normalizes_filter_id() {
        let oid = mongodb::bson::oid::ObjectId::new();
        let query = build_list_query(ListParams {
            filter: Some(format!(r#"{{"id":"{}"}}"#, oid.to_hex())),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(query.filter.get_object_id("_id").unwrap(), oid);
    }

    #[test]
    fn explicit_projection_replaces_default() {
        let query = build_list_query(ListParams {
            projection: Some(r#"{"email":1}"#.into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(query.projection.unwrap(), doc! { "email": 1_i64 });
    }

    #[test]
    fn require_object_rejects_missing_and_non_objects() {
        assert!(require_object("filter", None).is_err());
        assert!(require_object("filter", Some(&json!("x"))).is_err());
        assert!(require_object("filter", Some(&json!([1]))).is_err());
        assert!(require_object("filter", Some(&json!({}))).is_ok());
    }

    #[test]
    fn escape_html_neutralizes_markup() {
        assert_eq!(
            escape_html(r#"<script>alert("x&y")</script>"#),
            "&lt;script&gt;alert(&quot;x&amp;y&quot;)&lt;/script&gt;"
        );
    }

    #[test]
    fn users_page_lists_emails_escaped() {
        let page = render_users_page(&[
            json!({ "id": "1", "email": "a@b.com", "createdAt": "2024-01-01T00:00:00Z" }),
            json!({ "id": "2", "email": "<evil>@b.com" }),
        ]);
        assert!(page.contains("Found: 2"));
        assert!(page.contains("a@b.com"));
        assert!(page.contains("&lt;evil&gt;@b.com"));
        assert!(!page.contains("<evil>"));
    }

    #[test]
    fn users_page_handles_empty_store() {
        let page = render_users_page(&[]);
        assert!(page.contains("No users found yet."));
    }
}
