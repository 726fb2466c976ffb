use axum::{
    routing::{get, post},
    Router,
};

use crate::api::handlers::AppState;
use crate::api::{branch_handlers, handlers, merge_handlers};
use crate::store::VersionedEngine;

pub fn create_router<E: VersionedEngine + 'static>() -> Router<AppState<E>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Branches
        .route(
            "/branches",
            get(branch_handlers::list_branches::<E>).post(branch_handlers::create_branch::<E>),
        )
        .route(
            "/branches/:name",
            get(branch_handlers::get_branch::<E>).delete(branch_handlers::delete_branch::<E>),
        )
        .route(
            "/branches/:name/commits",
            get(branch_handlers::list_branch_commits::<E>),
        )
        .route("/branches/:name/merge", post(branch_handlers::merge_branch::<E>))
        .route(
            "/merge-candidates/cleanup",
            post(branch_handlers::collect_stale_candidates::<E>),
        )
        // Merge preview
        .route(
            "/merge-preview/:source/:destination",
            get(merge_handlers::get_merge_preview::<E>),
        )
        .route(
            "/merge-preview/:source/:destination/count",
            get(merge_handlers::get_merge_conflict_count::<E>),
        )
        // Routed entity access
        .route(
            "/entities/:namespace/:model",
            post(handlers::create_entity::<E>),
        )
        .route(
            "/entities/:namespace/:model/:id",
            get(handlers::get_entity::<E>)
                .put(handlers::put_entity::<E>)
                .delete(handlers::delete_entity::<E>),
        )
}
