//! Credential verification as a stateless function over an injected user
//! directory and the hashing primitive.

use tracing::warn;

use crate::auth::password::verify_password;
use crate::users::repo::{UserDirectory, UserRecord};

/// Result of a single verification pass. Unknown email and wrong password
/// are the same `Rejected`, so responses cannot reveal which emails exist.
/// Store or hash failures come back as `Err` and surface as 500s.
#[derive(Debug)]
pub enum AuthOutcome {
    Authenticated(UserRecord),
    Rejected,
}

pub async fn verify_credentials(
    users: &dyn UserDirectory,
    email: &str,
    password: &str,
) -> anyhow::Result<AuthOutcome> {
    let Some(user) = users.find_by_email(email).await? else {
        warn!("login attempt for unknown email");
        return Ok(AuthOutcome::Rejected);
    };

    if !verify_password(password, &user.password_hash)? {
        warn!(user_id = %user.id_hex(), "login attempt with invalid password");
        return Ok(AuthOutcome::Rejected);
    }

    Ok(AuthOutcome::Authenticated(user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::hash_password;
    use crate::users::repo::{normalize_email, RepoError};
    use mongodb::bson::oid::ObjectId;

    struct InMemoryDirectory {
        users: Vec<UserRecord>,
    }

    #[async_trait::async_trait]
    impl UserDirectory for InMemoryDirectory {
        async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, RepoError> {
            let email = normalize_email(email);
            Ok(self.users.iter().find(|u| u.email == email).cloned())
        }
    }

    fn directory_with(email: &str, password: &str) -> InMemoryDirectory {
        InMemoryDirectory {
            users: vec![UserRecord {
                id: ObjectId::new(),
                email: email.into(),
                password_hash: hash_password(password).unwrap(),
                created_at: None,
            }],
        }
    }

    #[tokio::test]
    async fn valid_credentials_authenticate() {
        let dir = directory_with("t@x.com", "secret-pass");
        let outcome = verify_credentials(&dir, "t@x.com", "secret-pass")
            .await
            .unwrap();
        match outcome {
            AuthOutcome::Authenticated(user) => assert_eq!(user.email, "t@x.com"),
            AuthOutcome::Rejected => panic!("expected authentication"),
        }
    }

    #[tokio::test]
    async fn email_lookup_is_case_and_whitespace_insensitive() {
        let dir = directory_with("a@b.com", "secret-pass");
        let outcome = verify_credentials(&dir, " A@B.com ", "secret-pass")
            .await
            .unwrap();
        assert!(matches!(outcome, AuthOutcome::Authenticated(_)));
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_reject_identically() {
        let dir = directory_with("t@x.com", "secret-pass");
        let unknown = verify_credentials(&dir, "nobody@x.com", "secret-pass")
            .await
            .unwrap();
        let wrong = verify_credentials(&dir, "t@x.com", "not-the-password")
            .await
            .unwrap();
        assert!(matches!(unknown, AuthOutcome::Rejected));
        assert!(matches!(wrong, AuthOutcome::Rejected));
    }

    #[tokio::test]
    async fn malformed_stored_hash_is_an_error_not_a_rejection() {
        let dir = InMemoryDirectory {
            users: vec![UserRecord {
                id: ObjectId::new(),
                email: "t@x.com".into(),
                password_hash: "corrupted".into(),
                created_at: None,
            }],
        };
        assert!(verify_credentials(&dir, "t@x.com", "whatever").await.is_err());
    }
}
