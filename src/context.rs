/// Application context and dependency injection
use crate::{
    config::ServerConfig,
    controller::{ControllerClient, HttpControllerClient},
    db,
    error::WardenResult,
    store::{MembershipStore, SqliteMembershipStore},
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub store: Arc<dyn MembershipStore>,
    pub controller: Arc<dyn ControllerClient>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> WardenResult<Self> {
        // Validate configuration
        config.validate()?;

        let db = db::create_pool(
            &config.database.path,
            db::DatabaseOptions {
                max_connections: config.database.max_connections,
                ..Default::default()
            },
        )
        .await?;

        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        let store: Arc<dyn MembershipStore> = Arc::new(SqliteMembershipStore::new(db.clone()));

        // Per-owner controller overrides are read from the same store
        let controller: Arc<dyn ControllerClient> = Arc::new(HttpControllerClient::new(
            config.controller.clone(),
            Some(Arc::clone(&store)),
        )?);

        tracing::info!(
            "Controller at {}{}",
            config.controller.local_url,
            if config.controller.central_token.is_some() {
                " (Central API enabled)"
            } else {
                ""
            }
        );

        Ok(Self::from_parts(config, db, store, controller))
    }

    /// Assemble a context from already constructed services
    pub fn from_parts(
        config: ServerConfig,
        db: SqlitePool,
        store: Arc<dyn MembershipStore>,
        controller: Arc<dyn ControllerClient>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            db,
            store,
            controller,
        }
    }
}
