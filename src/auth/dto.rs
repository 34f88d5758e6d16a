use serde::{Deserialize, Serialize};

use crate::users::repo::UserRecord;

/// Request body for register and login. Fields are optional so a missing
/// key produces the API's own 400 message instead of a deserialize
/// rejection.
#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Public part of a user returned to clients. Never carries the hash.
#[derive(Debug, Clone, Serialize)]
pub struct PublicUser {
    pub id: String,
    pub email: String,
}

impl From<&UserRecord> for PublicUser {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id_hex(),
            email: user.email.clone(),
        }
    }
}

/// Response for register/login and the protected-data route.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub message: String,
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::oid::ObjectId;

    #[test]
    fn public_user_exposes_hex_id_and_email_only() {
        let record = UserRecord {
            id: ObjectId::new(),
            email: "t@x.com".into(),
            password_hash: "secret".into(),
            created_at: None,
        };
        let public = PublicUser::from(&record);
        let value = serde_json::to_value(&public).unwrap();
        assert_eq!(value["email"], "t@x.com");
        assert_eq!(value["id"].as_str().unwrap().len(), 24);
        assert_eq!(value.as_object().unwrap().len(), 2);
    }

    #[test]
    fn credentials_tolerate_missing_fields() {
        let req: CredentialsRequest = serde_json::from_str("{}").unwrap();
        assert!(req.email.is_none());
        assert!(req.password.is_none());
    }
}
