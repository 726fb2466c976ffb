use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    Json as RequestJson,
};
use serde::{Deserialize, Serialize};

use crate::api::handlers::{api_error, ApiError, AppState, ListResponse};
use crate::model::{Branch, Commit, RequestContext};
use crate::store::VersionedEngine;

#[derive(Debug, Deserialize)]
pub struct BranchListQuery {
    /// Include merge-candidate branches in the listing
    pub include_candidates: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBranchRequest {
    pub name: String,
    /// Defaults to the request's active branch
    pub starting_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MergeBranchRequest {
    pub source: String,
}

#[derive(Debug, Deserialize)]
pub struct CommitLogQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: Vec<String>,
}

/// GET /branches
pub async fn list_branches<E: VersionedEngine + 'static>(
    State(vc): State<AppState<E>>,
    Query(query): Query<BranchListQuery>,
) -> Result<Json<ListResponse<Branch>>, ApiError> {
    let items = vc
        .branches
        .list(query.include_candidates.unwrap_or(false))
        .await
        .map_err(api_error)?;
    Ok(Json(ListResponse {
        total: items.len(),
        items,
    }))
}

/// POST /branches
/// Fork a new branch from `starting_branch`
pub async fn create_branch<E: VersionedEngine + 'static>(
    State(vc): State<AppState<E>>,
    ctx: RequestContext,
    RequestJson(req): RequestJson<CreateBranchRequest>,
) -> Result<(StatusCode, Json<Branch>), ApiError> {
    let starting_branch = req.starting_branch.unwrap_or_else(|| ctx.branch.clone());
    let creator = ctx.user.author().to_string();
    let branch = vc
        .branches
        .create(&req.name, &starting_branch, Some(&creator))
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(branch)))
}

/// GET /branches/{name}
pub async fn get_branch<E: VersionedEngine + 'static>(
    Path(name): Path<String>,
    State(vc): State<AppState<E>>,
) -> Result<Json<Branch>, ApiError> {
    vc.branches.get(&name).await.map(Json).map_err(api_error)
}

/// DELETE /branches/{name}
/// The primary branch and the caller's active branch cannot be deleted
pub async fn delete_branch<E: VersionedEngine + 'static>(
    Path(name): Path<String>,
    State(vc): State<AppState<E>>,
    ctx: RequestContext,
) -> Result<Json<DeletedResponse>, ApiError> {
    vc.branches
        .delete(&name, ctx.active_branch())
        .await
        .map_err(api_error)?;
    Ok(Json(DeletedResponse { deleted: vec![name] }))
}

/// POST /branches/{name}/merge
/// Merge `source` into this branch; refused while the merge preview reports issues
pub async fn merge_branch<E: VersionedEngine + 'static>(
    Path(name): Path<String>,
    State(vc): State<AppState<E>>,
    ctx: RequestContext,
    RequestJson(req): RequestJson<MergeBranchRequest>,
) -> Result<Json<Branch>, ApiError> {
    vc.branches
        .merge(&req.source, &name, ctx.user.author())
        .await
        .map(Json)
        .map_err(api_error)
}

/// GET /branches/{name}/commits
pub async fn list_branch_commits<E: VersionedEngine + 'static>(
    Path(name): Path<String>,
    State(vc): State<AppState<E>>,
    Query(query): Query<CommitLogQuery>,
) -> Result<Json<ListResponse<Commit>>, ApiError> {
    let items = vc
        .branches
        .log(&name, query.limit.unwrap_or(50))
        .await
        .map_err(api_error)?;
    Ok(Json(ListResponse {
        total: items.len(),
        items,
    }))
}

/// POST /merge-candidates/cleanup
/// Remove merge candidates whose branches moved on or no longer exist
pub async fn collect_stale_candidates<E: VersionedEngine + 'static>(
    State(vc): State<AppState<E>>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let deleted = vc
        .branches
        .collect_stale_merge_candidates()
        .await
        .map_err(api_error)?;
    Ok(Json(DeletedResponse { deleted }))
}
