//! Mapping between entity types, their storage tables, and how an object of
//! each type is presented to a person.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::VcError;
use crate::model::{EntityType, Identifier};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub entity: EntityType,
    pub table: Identifier,
    pub verbose_name: String,
    /// Column rendered when an object is named in a message.
    pub display_field: Identifier,
}

impl ModelInfo {
    pub fn new(
        entity: EntityType,
        verbose_name: impl Into<String>,
        display_field: &str,
    ) -> Result<Self, VcError> {
        let table = Identifier::new(entity.default_table())?;
        Ok(Self {
            entity,
            table,
            verbose_name: verbose_name.into(),
            display_field: Identifier::new(display_field)?,
        })
    }

    pub fn with_table(mut self, table: Identifier) -> Self {
        self.table = table;
        self
    }
}

/// Model definition as it appears in configuration:
/// `{ entity = "dcim.device", verbose_name = "device", display_field = "name" }`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelDefinition {
    pub entity: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub verbose_name: Option<String>,
    #[serde(default)]
    pub display_field: Option<String>,
}

impl TryFrom<&ModelDefinition> for ModelInfo {
    type Error = VcError;

    fn try_from(def: &ModelDefinition) -> Result<Self, Self::Error> {
        let entity: EntityType = def.entity.parse()?;
        let verbose_name = def.verbose_name.clone().unwrap_or_else(|| entity.model.clone());
        let display_field = def.display_field.as_deref().unwrap_or("name");
        let info = ModelInfo::new(entity, verbose_name, display_field)?;
        match &def.table {
            Some(table) => Ok(info.with_table(Identifier::new(table.as_str())?)),
            None => Ok(info),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    by_entity: HashMap<EntityType, ModelInfo>,
    by_table: HashMap<String, EntityType>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let defaults: [(&str, &str, &str, &str); 16] = [
            ("dcim", "site", "site", "name"),
            ("dcim", "region", "region", "name"),
            ("dcim", "rack", "rack", "name"),
            ("dcim", "device", "device", "name"),
            ("dcim", "devicetype", "device type", "model"),
            ("dcim", "manufacturer", "manufacturer", "name"),
            ("dcim", "interface", "interface", "name"),
            ("circuits", "provider", "provider", "name"),
            ("circuits", "circuit", "circuit", "cid"),
            ("ipam", "prefix", "prefix", "prefix"),
            ("ipam", "ipaddress", "IP address", "address"),
            ("ipam", "vlan", "VLAN", "name"),
            ("tenancy", "tenant", "tenant", "name"),
            ("extras", "status", "status", "name"),
            ("extras", "tag", "tag", "name"),
            ("users", "user", "user", "username"),
        ];
        let mut catalog = Self::new();
        for (namespace, model, verbose, display) in defaults {
            // the defaults are static and always valid identifiers
            if let Ok(info) = ModelInfo::new(EntityType::new(namespace, model), verbose, display) {
                catalog.register(info);
            }
        }
        catalog
    }

    /// Add or replace a model definition.
    pub fn register(&mut self, info: ModelInfo) {
        if let Some(previous) = self.by_entity.get(&info.entity) {
            self.by_table.remove(previous.table.as_str());
        }
        self.by_table.insert(info.table.as_str().to_string(), info.entity.clone());
        self.by_entity.insert(info.entity.clone(), info);
    }

    pub fn register_definitions(&mut self, definitions: &[ModelDefinition]) -> Result<(), VcError> {
        let infos = definitions
            .iter()
            .map(ModelInfo::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        for info in infos {
            self.register(info);
        }
        Ok(())
    }

    pub fn model(&self, entity: &EntityType) -> Option<&ModelInfo> {
        self.by_entity.get(entity)
    }

    pub fn model_for_table(&self, table: &str) -> Option<&ModelInfo> {
        self.by_table.get(table).and_then(|entity| self.by_entity.get(entity))
    }

    /// Human-readable model name for a storage table; unknown tables are
    /// shown by their raw name.
    pub fn model_name_for_table(&self, table: &str) -> String {
        self.model_for_table(table)
            .map(|info| info.verbose_name.clone())
            .unwrap_or_else(|| table.to_string())
    }

    pub fn len(&self) -> usize {
        self.by_entity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_entity.is_empty()
    }
}
