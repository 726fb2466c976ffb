//! Registry of entity types under version control.
//!
//! Top-level keys are namespaces. A namespace maps either to a boolean that
//! applies to every model in it, or to a nested map of model name to boolean
//! for a per-model override:
//!
//! ```json
//! { "dcim": true, "extras": { "tag": true, "job": false } }
//! ```

use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::VcError;
use crate::model::{EntityType, Identifier};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEntry {
    /// Applies to every model in the namespace.
    All(bool),
    /// Only the listed models; anything else in the namespace is unregistered.
    Models(BTreeMap<String, bool>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersioningRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl VersioningRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry covering the inventory namespaces and the engine's own tables.
    pub fn with_defaults() -> Self {
        let mut entries = BTreeMap::new();
        let control = [
            // pull requests and branch bookkeeping are shared by every branch
            ("pullrequest", false),
            ("pullrequestreviewcomments", false),
            ("pullrequestreviews", false),
            ("branchmeta", false),
            ("branch", false),
            // parameterised by the checked-out branch
            ("commit", true),
            ("commitancestor", true),
            ("conflicts", true),
            ("constraintviolations", true),
        ];
        entries.insert(
            crate::model::CONTROL_NAMESPACE.to_string(),
            RegistryEntry::Models(control.iter().map(|(m, v)| (m.to_string(), *v)).collect()),
        );
        for namespace in ["dcim", "circuits", "ipam", "virtualization", "taggit", "tenancy"] {
            entries.insert(namespace.to_string(), RegistryEntry::All(true));
        }
        let extras = [
            "computedfield",
            "configcontext",
            "configcontextschema",
            "customfield",
            "customfieldchoice",
            "customlink",
            "exporttemplate",
            "graphqlquery",
            "imageattachment",
            "objectchange",
            "relationship",
            "relationshipassociation",
            "secret",
            "secretsgroup",
            "status",
            "tag",
            "taggeditem",
            "webhook",
        ];
        entries.insert(
            "extras".to_string(),
            RegistryEntry::Models(extras.iter().map(|m| (m.to_string(), true)).collect()),
        );
        Self { entries }
    }

    /// Raw lookup. `None` means nothing is registered for the entity type,
    /// which is distinct from an explicit `Some(false)`.
    pub fn query(&self, entity: &EntityType) -> Option<bool> {
        match self.entries.get(&entity.namespace)? {
            RegistryEntry::All(versioned) => Some(*versioned),
            RegistryEntry::Models(models) => models.get(&entity.model).copied(),
        }
    }

    pub fn is_versioned(&self, entity: &EntityType) -> bool {
        self.query(entity).unwrap_or(false)
    }

    /// Merge additional registrations. The whole mapping is validated first;
    /// on error the registry is left untouched. Registered namespaces replace
    /// existing entries of the same name.
    pub fn register(&mut self, mapping: &Value) -> Result<(), VcError> {
        let parsed = Self::parse(mapping)?;
        self.entries.extend(parsed);
        Ok(())
    }

    fn parse(mapping: &Value) -> Result<BTreeMap<String, RegistryEntry>, VcError> {
        let invalid = |detail: String| {
            VcError::Validation(format!("invalid versioned model registry: {}", detail))
        };

        let Value::Object(top) = mapping else {
            return Err(invalid("expected a mapping of namespace to entry".to_string()));
        };
        let mut parsed = BTreeMap::new();
        for (namespace, value) in top {
            Identifier::new(namespace.as_str()).map_err(|_| {
                invalid(format!("namespace key '{}' is not a valid name", namespace))
            })?;
            let entry = match value {
                Value::Bool(versioned) => RegistryEntry::All(*versioned),
                Value::Object(models) => {
                    let mut nested = BTreeMap::new();
                    for (model, flag) in models {
                        let name = format!("{}.{}", namespace, model);
                        Identifier::new(model.as_str()).map_err(|_| {
                            invalid(format!("model key '{}' is not a valid name", name))
                        })?;
                        let Value::Bool(flag) = flag else {
                            return Err(invalid(format!("'{}' must map to a boolean", name)));
                        };
                        nested.insert(model.to_lowercase(), *flag);
                    }
                    RegistryEntry::Models(nested)
                }
                other => {
                    return Err(invalid(format!(
                        "'{}' must map to a boolean or a mapping, got {}",
                        namespace, other
                    )))
                }
            };
            parsed.insert(namespace.to_lowercase(), entry);
        }
        Ok(parsed)
    }
}
