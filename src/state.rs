use std::sync::Arc;

use anyhow::Context;
use mongodb::{
    bson::{doc, Document},
    options::IndexOptions,
    Client, Collection, IndexModel,
};

use crate::config::AppConfig;
use crate::session::SessionStore;
use crate::users::repo::UserRepository;

#[derive(Clone)]
pub struct AppState {
    pub repo: UserRepository,
    pub sessions: SessionStore,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Connects to the store and prepares shared state. The ping forces the
    /// lazily-connecting driver to fail here, at startup, on a bad URI.
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let client = Client::with_uri_str(&config.mongodb_uri)
            .await
            .context("connect to mongodb")?;
        let db = client.database(&config.mongodb_db);
        db.run_command(doc! { "ping": 1 }, None)
            .await
            .context("ping mongodb")?;

        let users: Collection<Document> = db.collection("users");
        ensure_email_index(&users)
            .await
            .context("create unique email index")?;

        let sessions = SessionStore::new(config.session.ttl_seconds);
        Ok(Self {
            repo: UserRepository::new(users),
            sessions,
            config,
        })
    }

    /// State over a lazily-connecting client; handler tests that never
    /// touch the store can run without a live server.
    #[cfg(test)]
    pub async fn fake() -> Self {
        use crate::config::SessionConfig;

        let client = Client::with_uri_str("mongodb://127.0.0.1:27017")
            .await
            .unwrap();
        let users: Collection<Document> = client.database("test").collection("users");
        Self {
            repo: UserRepository::new(users),
            sessions: SessionStore::new(60),
            config: Arc::new(AppConfig {
                mongodb_uri: "mongodb://127.0.0.1:27017".into(),
                mongodb_db: "test".into(),
                session: SessionConfig {
                    ttl_seconds: 60,
                    cookie_secure: false,
                },
            }),
        }
    }
}

/// One user per normalized email, enforced by the store.
async fn ensure_email_index(users: &Collection<Document>) -> mongodb::error::Result<()> {
    let index = IndexModel::builder()
        .keys(doc! { "email": 1 })
        .options(IndexOptions::builder().unique(true).build())
        .build();
    users.create_index(index, None).await?;
    Ok(())
}
