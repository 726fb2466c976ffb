//! Generic entity reads and writes, dispatched through the routing policy.

use serde_json::Value;
use std::sync::Arc;

use crate::error::{VcError, VcResult};
use crate::logic::catalog::{ModelCatalog, ModelInfo};
use crate::logic::routing::{RoutingPolicy, StoreId};
use crate::logic::unit_of_work::UnitOfWork;
use crate::model::{EntityType, RequestContext, Row};
use crate::store::{EngineSession, VersionedEngine};

pub struct DataAccess<E: VersionedEngine> {
    engine: Arc<E>,
    policy: Arc<RoutingPolicy>,
    catalog: Arc<ModelCatalog>,
}

impl<E: VersionedEngine> DataAccess<E> {
    pub fn new(engine: Arc<E>, policy: Arc<RoutingPolicy>, catalog: Arc<ModelCatalog>) -> Self {
        Self {
            engine,
            policy,
            catalog,
        }
    }

    pub async fn get(
        &self,
        ctx: &RequestContext,
        entity: &EntityType,
        id: &Value,
    ) -> VcResult<Option<Row>> {
        let model = self.model(entity)?;
        let target = self.policy.store_for_read(entity);
        let mut session = self.session_for(&target, ctx).await?;
        Ok(session.get_row(&model.table, id).await?)
    }

    /// Insert or update `row` (which must carry its `id`) and note the change in `uow`.
    pub async fn save(
        &self,
        ctx: &RequestContext,
        entity: &EntityType,
        row: Row,
        uow: &mut UnitOfWork,
    ) -> VcResult<()> {
        let model = self.model(entity)?;
        let id = row
            .get("id")
            .filter(|id| !id.is_null())
            .cloned()
            .ok_or_else(|| VcError::Validation(format!("{} row has no id", entity)))?;
        let target = self.policy.store_for_write(entity, ctx)?;
        let mut session = self.session_for(&target, ctx).await?;

        let created = session.get_row(&model.table, &id).await?.is_none();
        session.upsert_row(&model.table, &row).await?;
        uow.record_save(target, model, &display_of(model, &row, &id), created);
        Ok(())
    }

    /// Delete by id. Returns `false` when there was nothing to delete.
    pub async fn delete(
        &self,
        ctx: &RequestContext,
        entity: &EntityType,
        id: &Value,
        uow: &mut UnitOfWork,
    ) -> VcResult<bool> {
        let model = self.model(entity)?;
        let target = self.policy.store_for_write(entity, ctx)?;
        let mut session = self.session_for(&target, ctx).await?;

        let Some(existing) = session.get_row(&model.table, id).await? else {
            return Ok(false);
        };
        session.delete_row(&model.table, id).await?;
        uow.record_delete(target, model, &display_of(model, &existing, id));
        Ok(true)
    }

    fn model(&self, entity: &EntityType) -> VcResult<&ModelInfo> {
        self.catalog
            .model(entity)
            .ok_or_else(|| VcError::not_found("model", entity.to_string()))
    }

    async fn session_for(
        &self,
        target: &Option<StoreId>,
        ctx: &RequestContext,
    ) -> VcResult<E::Session> {
        match target {
            Some(_) => Ok(self.engine.global_session().await?),
            None => {
                let mut session = self.engine.session().await?;
                session.checkout(ctx.active_branch()).await?;
                Ok(session)
            }
        }
    }
}

fn display_of(model: &ModelInfo, row: &Row, id: &Value) -> String {
    match row.get(model.display_field.as_str()) {
        Some(Value::String(s)) => s.clone(),
        Some(value) if !value.is_null() => value.to_string(),
        _ => match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}
