use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Serialize;

use crate::api::handlers::{api_error, ApiError, AppState};
use crate::model::MergePreview;
use crate::store::VersionedEngine;

#[derive(Debug, Serialize)]
pub struct ConflictCountResponse {
    pub source: String,
    pub destination: String,
    pub conflicts: u64,
}

/// GET /merge-preview/{source}/{destination}
/// Conflicts and constraint violations merging `source` into `destination` would produce
pub async fn get_merge_preview<E: VersionedEngine + 'static>(
    Path((source, destination)): Path<(String, String)>,
    State(vc): State<AppState<E>>,
) -> Result<Json<MergePreview>, ApiError> {
    vc.previews
        .conflicts_for_merge(&source, &destination)
        .await
        .map(Json)
        .map_err(api_error)
}

/// GET /merge-preview/{source}/{destination}/count
pub async fn get_merge_conflict_count<E: VersionedEngine + 'static>(
    Path((source, destination)): Path<(String, String)>,
    State(vc): State<AppState<E>>,
) -> Result<Json<ConflictCountResponse>, ApiError> {
    let conflicts = vc
        .previews
        .conflicts_count_for_merge(&source, &destination)
        .await
        .map_err(api_error)?;
    Ok(Json(ConflictCountResponse {
        source,
        destination,
        conflicts,
    }))
}
