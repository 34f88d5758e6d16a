use futures::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, Bson, DateTime, Document},
    error::{ErrorKind, WriteFailure},
    options::{FindOptions, ReplaceOptions, UpdateOptions},
    Collection,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::users::normalize::{
    normalize_document, normalize_filter, normalize_insert_document, normalize_update_payload,
    InvalidIdError,
};

/// Typed view of a user document, used by the auth and session paths.
/// Generic CRUD traffic stays on raw documents and never goes through this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub email: String,
    #[serde(rename = "passwordHash", default, skip_serializing)]
    pub password_hash: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime>,
}

impl UserRecord {
    pub fn id_hex(&self) -> String {
        self.id.to_hex()
    }
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("user with this email already exists")]
    DuplicateEmail,
    #[error(transparent)]
    InvalidId(#[from] InvalidIdError),
    #[error(transparent)]
    Store(#[from] mongodb::error::Error),
}

/// Generic query arguments for [`UserRepository::find_users`]. The route
/// layer clamps limit/skip; the repository accepts any non-negative values.
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub filter: Document,
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub limit: i64,
    pub skip: u64,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            filter: Document::new(),
            projection: None,
            sort: None,
            limit: 50,
            skip: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    #[serde(rename = "matchedCount")]
    pub matched: u64,
    #[serde(rename = "modifiedCount")]
    pub modified: u64,
    #[serde(rename = "upsertedId", skip_serializing_if = "Option::is_none")]
    pub upserted_id: Option<String>,
}

/// Email lookup seam for the credential strategy; lets tests run the
/// strategy against an in-memory directory instead of a live collection.
#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, RepoError>;
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Emails are stored normalized no matter which write path produced the
/// document; the unique index compares exact strings.
fn normalize_email_field(doc: &mut Document) {
    if let Some(Bson::String(email)) = doc.get("email") {
        let normalized = normalize_email(email);
        doc.insert("email", normalized);
    }
}

/// Thin typed facade over the `users` collection: normalization in front,
/// driver calls behind, no business validation in between.
#[derive(Clone)]
pub struct UserRepository {
    collection: Collection<Document>,
}

impl UserRepository {
    pub fn new(collection: Collection<Document>) -> Self {
        Self { collection }
    }

    pub async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<UserRecord, RepoError> {
        let email = normalize_email(email);
        let now = DateTime::now();
        let document = doc! {
            "email": &email,
            "passwordHash": password_hash,
            "createdAt": now,
            "updatedAt": now,
        };
        let result = self.collection.insert_one(document, None).await.map_err(|e| {
            if is_duplicate_key(&e) {
                RepoError::DuplicateEmail
            } else {
                RepoError::Store(e)
            }
        })?;
        // insert_one of a doc without _id always yields an ObjectId
        let id = result.inserted_id.as_object_id().ok_or_else(|| {
            RepoError::Store(mongodb::error::Error::custom("inserted id is not an ObjectId"))
        })?;
        Ok(UserRecord {
            id,
            email,
            password_hash: password_hash.to_string(),
            created_at: Some(now),
        })
    }

    /// Fails closed: a string that is not a valid ObjectId is "not found",
    /// never an error.
    pub async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>, RepoError> {
        let Ok(oid) = ObjectId::parse_str(id) else {
            return Ok(None);
        };
        let doc = self.collection.find_one(doc! { "_id": oid }, None).await?;
        doc.map(record_from_document).transpose()
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, RepoError> {
        let email = normalize_email(email);
        let doc = self
            .collection
            .find_one(doc! { "email": email }, None)
            .await?;
        doc.map(record_from_document).transpose()
    }

    /// Generic listing. Defaults to newest first; the projection is applied
    /// only when non-empty, otherwise whole documents come back.
    pub async fn find_users(&self, query: ListQuery) -> Result<Vec<Value>, RepoError> {
        let ListQuery {
            filter,
            projection,
            sort,
            limit,
            skip,
        } = query;
        let options = FindOptions::builder()
            .sort(sort.unwrap_or_else(|| doc! { "createdAt": -1 }))
            .projection(projection.filter(|p| !p.is_empty()))
            .limit(limit)
            .skip(skip)
            .build();
        let mut cursor = self.collection.find(filter, options).await?;
        let mut users = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            users.push(normalize_document(doc));
        }
        Ok(users)
    }

    pub async fn insert_one(&self, document: &Value) -> Result<String, RepoError> {
        let mut doc = normalize_insert_document(document)?;
        normalize_email_field(&mut doc);
        let result = self.collection.insert_one(doc, None).await?;
        Ok(id_string(result.inserted_id))
    }

    /// Each document is normalized independently; batch atomicity is
    /// whatever the store provides.
    pub async fn insert_many(&self, documents: &[Value]) -> Result<Vec<String>, RepoError> {
        let mut docs = Vec::with_capacity(documents.len());
        for d in documents {
            let mut doc = normalize_insert_document(d)?;
            normalize_email_field(&mut doc);
            docs.push(doc);
        }
        let result = self.collection.insert_many(docs, None).await?;
        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);
        Ok(ids.into_iter().map(|(_, id)| id_string(id)).collect())
    }

    pub async fn update_one(
        &self,
        filter: &Value,
        update: &Value,
        upsert: bool,
    ) -> Result<UpdateOutcome, RepoError> {
        let options = UpdateOptions::builder().upsert(upsert).build();
        let result = self
            .collection
            .update_one(normalize_filter(filter), normalize_update_payload(update), options)
            .await?;
        Ok(update_outcome(
            result.matched_count,
            result.modified_count,
            result.upserted_id,
        ))
    }

    pub async fn update_many(
        &self,
        filter: &Value,
        update: &Value,
        upsert: bool,
    ) -> Result<UpdateOutcome, RepoError> {
        let options = UpdateOptions::builder().upsert(upsert).build();
        let result = self
            .collection
            .update_many(normalize_filter(filter), normalize_update_payload(update), options)
            .await?;
        Ok(update_outcome(
            result.matched_count,
            result.modified_count,
            result.upserted_id,
        ))
    }

    /// The replacement goes through insert-document shaping, so it gets
    /// fresh timestamps unless the caller included its own.
    pub async fn replace_one(
        &self,
        filter: &Value,
        replacement: &Value,
        upsert: bool,
    ) -> Result<UpdateOutcome, RepoError> {
        let options = ReplaceOptions::builder().upsert(upsert).build();
        let mut replacement = normalize_insert_document(replacement)?;
        normalize_email_field(&mut replacement);
        let result = self
            .collection
            .replace_one(normalize_filter(filter), replacement, options)
            .await?;
        Ok(update_outcome(
            result.matched_count,
            result.modified_count,
            result.upserted_id,
        ))
    }

    pub async fn delete_one(&self, filter: &Value) -> Result<u64, RepoError> {
        let result = self
            .collection
            .delete_one(normalize_filter(filter), None)
            .await?;
        Ok(result.deleted_count)
    }

    pub async fn delete_many(&self, filter: &Value) -> Result<u64, RepoError> {
        let result = self
            .collection
            .delete_many(normalize_filter(filter), None)
            .await?;
        Ok(result.deleted_count)
    }
}

#[async_trait::async_trait]
impl UserDirectory for UserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, RepoError> {
        UserRepository::find_by_email(self, email).await
    }
}

fn record_from_document(doc: Document) -> Result<UserRecord, RepoError> {
    mongodb::bson::from_document(doc)
        .map_err(mongodb::error::Error::from)
        .map_err(RepoError::Store)
}

fn id_string(id: Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s,
        other => other.to_string(),
    }
}

fn update_outcome(matched: u64, modified: u64, upserted_id: Option<Bson>) -> UpdateOutcome {
    UpdateOutcome {
        matched,
        modified,
        upserted_id: upserted_id.map(id_string),
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == 11000,
        ErrorKind::Command(command) => command.code == 11000,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn email_normalization_collides_case_and_whitespace() {
        assert_eq!(normalize_email("A@b.com"), normalize_email(" a@b.com "));
        assert_eq!(normalize_email("  T@X.COM\t"), "t@x.com");
    }

    #[test]
    fn email_field_is_normalized_on_raw_writes() {
        let mut doc = doc! { "email": " T@X.com ", "name": "t" };
        normalize_email_field(&mut doc);
        assert_eq!(doc.get_str("email").unwrap(), "t@x.com");

        // non-string emails pass through untouched
        let mut doc = doc! { "email": 42 };
        normalize_email_field(&mut doc);
        assert_eq!(doc.get_i32("email").unwrap(), 42);
    }

    #[test]
    fn record_deserializes_store_document() {
        let oid = ObjectId::new();
        let doc = doc! {
            "_id": oid,
            "email": "t@x.com",
            "passwordHash": "$argon2id$...",
            "createdAt": DateTime::now(),
        };
        let record = record_from_document(doc).unwrap();
        assert_eq!(record.id, oid);
        assert_eq!(record.email, "t@x.com");
        assert_eq!(record.password_hash, "$argon2id$...");
        assert!(record.created_at.is_some());
    }

    #[test]
    fn record_tolerates_generic_documents_without_hash() {
        // Documents inserted through the raw CRUD surface may lack
        // passwordHash/createdAt; session resolution must still work.
        let doc = doc! { "_id": ObjectId::new(), "email": "raw@x.com" };
        let record = record_from_document(doc).unwrap();
        assert!(record.password_hash.is_empty());
        assert!(record.created_at.is_none());
    }

    #[test]
    fn record_never_serializes_password_hash() {
        let record = UserRecord {
            id: ObjectId::new(),
            email: "t@x.com".into(),
            password_hash: "secret".into(),
            created_at: Some(DateTime::now()),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("passwordHash").is_none());
        assert!(value.get("password_hash").is_none());
    }

    #[test]
    fn list_query_defaults_match_contract() {
        let query = ListQuery::default();
        assert_eq!(query.limit, 50);
        assert_eq!(query.skip, 0);
        assert!(query.filter.is_empty());
        assert!(query.sort.is_none());
        assert!(query.projection.is_none());
    }

    #[test]
    fn update_outcome_serializes_counts_camel_case() {
        let outcome = update_outcome(1, 1, Some(Bson::ObjectId(ObjectId::new())));
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["matchedCount"], json!(1));
        assert_eq!(value["modifiedCount"], json!(1));
        assert!(value["upsertedId"].is_string());

        let no_upsert = update_outcome(0, 0, None);
        let value = serde_json::to_value(&no_upsert).unwrap();
        assert!(value.get("upsertedId").is_none());
    }
}
