use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::users::repo::UpdateOutcome;

/// Query params for `GET /users`. `filter`/`projection`/`sort` are JSON
/// object strings; limit/skip are validated and clamped by the handler.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub filter: Option<String>,
    pub projection: Option<String>,
    pub sort: Option<String>,
    pub limit: Option<i64>,
    pub skip: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub total: usize,
    pub users: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct InsertOneRequest {
    pub document: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct InsertManyRequest {
    pub documents: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub filter: Option<Value>,
    pub update: Option<Value>,
    #[serde(default)]
    pub upsert: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceRequest {
    pub filter: Option<Value>,
    pub replacement: Option<Value>,
    #[serde(default)]
    pub upsert: bool,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub filter: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct InsertOneResponse {
    pub message: String,
    #[serde(rename = "insertedId")]
    pub inserted_id: String,
}

#[derive(Debug, Serialize)]
pub struct InsertManyResponse {
    pub message: String,
    #[serde(rename = "insertedCount")]
    pub inserted_count: usize,
    #[serde(rename = "insertedIds")]
    pub inserted_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct WriteResponse {
    pub message: String,
    #[serde(flatten)]
    pub outcome: UpdateOutcome,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub message: String,
    #[serde(rename = "deletedCount")]
    pub deleted_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn update_request_defaults_upsert_off() {
        let req: UpdateRequest =
            serde_json::from_value(json!({ "filter": {}, "update": {} })).unwrap();
        assert!(!req.upsert);
    }

    #[test]
    fn write_response_flattens_outcome() {
        let resp = WriteResponse {
            message: "Update applied.".into(),
            outcome: UpdateOutcome {
                matched: 2,
                modified: 1,
                upserted_id: None,
            },
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["matchedCount"], json!(2));
        assert_eq!(value["modifiedCount"], json!(1));
        assert_eq!(value["message"], "Update applied.");
    }
}
