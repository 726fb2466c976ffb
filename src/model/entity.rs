use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::VcError;

/// A row of an entity table, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Namespace holding the engine's own control models.
pub const CONTROL_NAMESPACE: &str = "version_control";

/// Control models live in the engine's control plane and are always written
/// to the global store, whatever branch is checked out.
pub const CONTROL_MODELS: &[&str] = &[
    "branch",
    "branchmeta",
    "commit",
    "commitancestor",
    "conflicts",
    "constraintviolations",
];

/// Identity of an entity type: the namespace (application label) it belongs
/// to plus its lowercase model name, e.g. `dcim.device`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityType {
    pub namespace: String,
    pub model: String,
}

impl EntityType {
    pub fn new(namespace: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into().to_lowercase(),
            model: model.into().to_lowercase(),
        }
    }

    /// Whether this is one of the engine's own control tables.
    pub fn is_control_model(&self) -> bool {
        self.namespace == CONTROL_NAMESPACE && CONTROL_MODELS.contains(&self.model.as_str())
    }

    /// Conventional table name, `<namespace>_<model>`.
    pub fn default_table(&self) -> String {
        format!("{}_{}", self.namespace, self.model)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.model)
    }
}

impl FromStr for EntityType {
    type Err = VcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((namespace, model)) if !namespace.is_empty() && !model.is_empty() => {
                Ok(EntityType::new(namespace, model))
            }
            _ => Err(VcError::Validation(format!(
                "entity type '{}' must look like '<namespace>.<model>'",
                s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_parsing_lowercases() {
        let entity: EntityType = "DCIM.Device".parse().unwrap();
        assert_eq!(entity, EntityType::new("dcim", "device"));
        assert_eq!(entity.to_string(), "dcim.device");
        assert_eq!(entity.default_table(), "dcim_device");
        assert!("device".parse::<EntityType>().is_err());
        assert!(".device".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_control_models() {
        assert!(EntityType::new("version_control", "branch").is_control_model());
        assert!(EntityType::new("version_control", "commit").is_control_model());
        assert!(!EntityType::new("version_control", "pullrequest").is_control_model());
        assert!(!EntityType::new("dcim", "branch").is_control_model());
    }
}
