pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

pub use error::{VcError, VcResult};

pub use logic::{
    BranchDirectory, BranchScope, DataAccess, MergeCandidateManager, MergeConflicts,
    MergePreviewService, ModelCatalog, ModelInfo, RoutingPolicy, StoreId, UnitOfWork,
    VersionControl, VersioningRegistry,
};

// Export all model types
pub use model::*;

// Export store types
pub use store::{DoltStore, EngineSession, MemoryEngine, VersionedEngine};

use crate::config::AppConfig;

/// Run schema migrations with branch-aware routing switched off, then
/// record them with a commit on the primary branch.
pub async fn migrate_and_commit(vc: &VersionControl<DoltStore>) -> anyhow::Result<()> {
    {
        let _routing_off = vc.policy.suspend_for_migration();
        vc.engine.migrate().await?;
    }
    logic::commit_migrations(vc.engine.as_ref(), vc.system_author.clone()).await?;
    Ok(())
}

/// Connect to Dolt, migrate, and serve the API until the listener closes.
pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    use axum::serve;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    let settings = &config.version_control;
    let database_url = config.database_url()?;
    log::info!("connecting to Dolt");
    let store = DoltStore::new(
        &database_url,
        config.database.max_connections.unwrap_or(20),
        &settings.default_branch,
    )
    .await?;

    let vc = VersionControl::new(store, settings)?;
    migrate_and_commit(&vc).await?;

    let app = crate::api::routes::create_router().with_state(Arc::new(vc));

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!("dolt-vc listening on http://{}", bind_address);

    serve(listener, app).await?;

    Ok(())
}
