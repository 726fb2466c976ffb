use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    Json as RequestJson,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::VcError;
use crate::logic::{UnitOfWork, VersionControl};
use crate::model::{EntityType, RequestContext, Row};
use crate::store::VersionedEngine;

pub type AppState<E> = Arc<VersionControl<E>>;

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
        }
    }
}

pub fn status_for(err: &VcError) -> StatusCode {
    match err {
        VcError::Validation(_) => StatusCode::BAD_REQUEST,
        VcError::PolicyViolation { .. } => StatusCode::FORBIDDEN,
        VcError::NotFound { .. } => StatusCode::NOT_FOUND,
        VcError::MergeFailure { .. }
        | VcError::BranchProtected { .. }
        | VcError::BranchExists(_) => StatusCode::CONFLICT,
        VcError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn api_error(err: VcError) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        log::error!("request failed: {}", err);
    }
    (status, Json(ErrorResponse::new(&err.to_string())))
}

#[derive(Debug, Serialize)]
pub struct EntityWriteResponse {
    pub entity: String,
    pub id: Value,
    pub branch: String,
    pub commits: Vec<String>,
}

/// GET /entities/{namespace}/{model}/{id}
/// Read a row from wherever the routing policy sends reads of this model
pub async fn get_entity<E: VersionedEngine + 'static>(
    Path((namespace, model, id)): Path<(String, String, String)>,
    State(vc): State<AppState<E>>,
    ctx: RequestContext,
) -> Result<Json<Row>, ApiError> {
    let entity = EntityType::new(namespace, model);
    let id = Value::String(id);
    match vc.data.get(&ctx, &entity, &id).await.map_err(api_error)? {
        Some(row) => Ok(Json(row)),
        None => Err(api_error(VcError::not_found(entity.to_string(), id_text(&id)))),
    }
}

/// PUT /entities/{namespace}/{model}/{id}
/// Create or replace a row and commit the change
pub async fn put_entity<E: VersionedEngine + 'static>(
    Path((namespace, model, id)): Path<(String, String, String)>,
    State(vc): State<AppState<E>>,
    ctx: RequestContext,
    RequestJson(mut row): RequestJson<Row>,
) -> Result<Json<EntityWriteResponse>, ApiError> {
    let entity = EntityType::new(namespace, model);
    let id = Value::String(id);
    match row.get("id") {
        None | Some(Value::Null) => {
            row.insert("id".to_string(), id.clone());
        }
        Some(body_id) if id_text(body_id) == id_text(&id) => {}
        Some(body_id) => {
            return Err(api_error(VcError::Validation(format!(
                "body id '{}' does not match path id '{}'",
                id_text(body_id),
                id_text(&id)
            ))));
        }
    }

    let mut uow = UnitOfWork::new();
    vc.data.save(&ctx, &entity, row, &mut uow).await.map_err(api_error)?;
    let commits = uow.commit(vc.engine.as_ref(), &ctx).await.map_err(api_error)?;

    Ok(Json(EntityWriteResponse {
        entity: entity.to_string(),
        id,
        branch: ctx.branch,
        commits,
    }))
}

/// POST /entities/{namespace}/{model}
/// Create a row under a freshly generated id
pub async fn create_entity<E: VersionedEngine + 'static>(
    Path((namespace, model)): Path<(String, String)>,
    State(vc): State<AppState<E>>,
    ctx: RequestContext,
    RequestJson(mut row): RequestJson<Row>,
) -> Result<(StatusCode, Json<EntityWriteResponse>), ApiError> {
    let entity = EntityType::new(namespace, model);
    if row.get("id").map_or(false, |id| !id.is_null()) {
        return Err(api_error(VcError::Validation(
            "new rows get a generated id; use PUT to write a known id".to_string(),
        )));
    }
    let id = Value::String(uuid::Uuid::new_v4().to_string());
    row.insert("id".to_string(), id.clone());

    let mut uow = UnitOfWork::new();
    vc.data.save(&ctx, &entity, row, &mut uow).await.map_err(api_error)?;
    let commits = uow.commit(vc.engine.as_ref(), &ctx).await.map_err(api_error)?;

    Ok((
        StatusCode::CREATED,
        Json(EntityWriteResponse {
            entity: entity.to_string(),
            id,
            branch: ctx.branch,
            commits,
        }),
    ))
}

/// DELETE /entities/{namespace}/{model}/{id}
pub async fn delete_entity<E: VersionedEngine + 'static>(
    Path((namespace, model, id)): Path<(String, String, String)>,
    State(vc): State<AppState<E>>,
    ctx: RequestContext,
) -> Result<Json<EntityWriteResponse>, ApiError> {
    let entity = EntityType::new(namespace, model);
    let id = Value::String(id);

    let mut uow = UnitOfWork::new();
    let deleted = vc.data.delete(&ctx, &entity, &id, &mut uow).await.map_err(api_error)?;
    if !deleted {
        return Err(api_error(VcError::not_found(entity.to_string(), id_text(&id))));
    }
    let commits = uow.commit(vc.engine.as_ref(), &ctx).await.map_err(api_error)?;

    Ok(Json(EntityWriteResponse {
        entity: entity.to_string(),
        id,
        branch: ctx.branch,
        commits,
    }))
}

fn id_text(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(status_for(&VcError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&VcError::not_found("branch", "x")), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&VcError::BranchExists("x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&VcError::PolicyViolation {
                entity: "users.user".into(),
                branch: "feature".into(),
                required: "main".into(),
            }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&anyhow::anyhow!("disk on fire").into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
