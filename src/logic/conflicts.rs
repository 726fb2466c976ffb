//! Turns the engine's raw conflict and constraint-violation tables into
//! per-table summaries and per-row detail a person can act on.
//!
//! Every query runs through a [`BranchScope`] on the merge candidate: the
//! staging tables only exist while that branch is checked out.

use serde_json::Value;
use std::collections::BTreeMap;

use itertools::Itertools;

use crate::error::VcResult;
use crate::logic::catalog::ModelCatalog;
use crate::logic::scope::BranchScope;
use crate::model::{
    ConflictDetail, ConflictSummaryRow, Identifier, MergeReport, Row, ViolationDetail,
    ViolationKind, ViolationRow,
};
use crate::store::EngineSession;

const OURS: &str = "our_";
const THEIRS: &str = "their_";
const BASE: &str = "base_";

pub struct MergeConflicts<'a> {
    catalog: &'a ModelCatalog,
    source: String,
    destination: String,
}

impl<'a> MergeConflicts<'a> {
    pub fn new(
        catalog: &'a ModelCatalog,
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// One row per table that has conflicts, violations or both.
    pub async fn summary<S: EngineSession>(
        &self,
        scope: &mut BranchScope<'_, S>,
    ) -> VcResult<Vec<ConflictSummaryRow>> {
        let mut rows: BTreeMap<String, ConflictSummaryRow> = BTreeMap::new();
        for conflict in scope.conflict_summaries().await? {
            self.summary_row(&mut rows, &conflict.table).num_conflicts = Some(conflict.count);
        }
        for violation in scope.violation_summaries().await? {
            self.summary_row(&mut rows, &violation.table).num_violations = Some(violation.count);
        }
        Ok(rows.into_values().collect())
    }

    fn summary_row<'r>(
        &self,
        rows: &'r mut BTreeMap<String, ConflictSummaryRow>,
        table: &str,
    ) -> &'r mut ConflictSummaryRow {
        rows.entry(table.to_string()).or_insert_with(|| ConflictSummaryRow {
            table: table.to_string(),
            model: self.catalog.model_name_for_table(table),
            num_conflicts: None,
            num_violations: None,
        })
    }

    pub async fn conflict_details<S: EngineSession>(
        &self,
        scope: &mut BranchScope<'_, S>,
    ) -> VcResult<Vec<ConflictDetail>> {
        let mut details = Vec::new();
        for summary in scope.conflict_summaries().await? {
            let table = Identifier::new(summary.table.as_str())?;
            let columns = scope.conflict_columns(&table).await?;
            let model = self.catalog.model_name_for_table(table.as_str());
            for row in scope.conflict_rows(&table, &columns).await? {
                let id = conflict_row_id(&row);
                details.push(ConflictDetail {
                    model: model.clone(),
                    id: self.object_name(scope, &table, &id).await?,
                    conflicts: self.real_conflicts(&row),
                });
            }
        }
        Ok(details)
    }

    pub async fn violation_details<S: EngineSession>(
        &self,
        scope: &mut BranchScope<'_, S>,
    ) -> VcResult<Vec<ViolationDetail>> {
        let mut details = Vec::new();
        for summary in scope.violation_summaries().await? {
            let table = Identifier::new(summary.table.as_str())?;
            let model = self.catalog.model_name_for_table(table.as_str());
            for row in scope.violation_rows(&table).await? {
                let object = self.object_name(scope, &table, &row.id).await?;
                details.push(ViolationDetail {
                    violations: self.violation_message(&row, &model, &object),
                    model: model.clone(),
                    id: object,
                    violation_type: row.violation_type,
                });
            }
        }
        Ok(details)
    }

    pub async fn report<S: EngineSession>(
        &self,
        scope: &mut BranchScope<'_, S>,
    ) -> VcResult<MergeReport> {
        Ok(MergeReport {
            summary: self.summary(scope).await?,
            conflicts: self.conflict_details(scope).await?,
            violations: self.violation_details(scope).await?,
        })
    }

    /// Fields that both sides changed to different values. A field is kept
    /// when ours differs from theirs and from the common ancestor; each kept
    /// field maps the destination name to ours, the source name to theirs,
    /// and `"base"` to the ancestor value.
    pub fn real_conflicts(&self, row: &Row) -> BTreeMap<String, Row> {
        let mut conflicts = BTreeMap::new();
        for (key, ours) in row {
            let Some(field) = key.strip_prefix(OURS) else {
                continue;
            };
            let (Some(theirs), Some(base)) = (
                row.get(&format!("{}{}", THEIRS, field)),
                row.get(&format!("{}{}", BASE, field)),
            ) else {
                continue;
            };
            if ours == theirs || ours == base {
                continue;
            }
            let mut sides = Row::new();
            sides.insert(self.destination.clone(), ours.clone());
            sides.insert(self.source.clone(), theirs.clone());
            sides.insert("base".to_string(), base.clone());
            conflicts.insert(field.to_string(), sides);
        }
        conflicts
    }

    pub fn violation_message(&self, row: &ViolationRow, model: &str, object: &str) -> String {
        let info = parse_info(&row.violation_info);
        match ViolationKind::parse(&row.violation_type) {
            ViolationKind::ForeignKey => {
                if let Some(Value::String(referenced)) = info.get("ReferencedTable") {
                    return format!(
                        "The {} \"{}\" references a missing \"{}\" object",
                        model,
                        object,
                        self.catalog.model_name_for_table(referenced)
                    );
                }
            }
            ViolationKind::UniqueIndex => {
                if let Some(columns) = info.get("Columns") {
                    return format!(
                        "The {} \"{}\" violates a uniqueness constraint defined over the columns {}",
                        model,
                        object,
                        render_columns(columns)
                    );
                }
            }
            ViolationKind::Other(_) => {}
        }
        "Unknown constraint violation".to_string()
    }

    /// Display string of the live object, or the raw id when it cannot be
    /// loaded from the checked-out branch.
    async fn object_name<S: EngineSession>(
        &self,
        scope: &mut BranchScope<'_, S>,
        table: &Identifier,
        id: &Value,
    ) -> VcResult<String> {
        let Some(info) = self.catalog.model_for_table(table.as_str()) else {
            return Ok(id_text(id));
        };
        if id.is_null() {
            return Ok(id_text(id));
        }
        let display = scope.fetch_display(table, id, &info.display_field).await?;
        Ok(display.unwrap_or_else(|| id_text(id)))
    }
}

/// Sum of all conflict and violation counts on the checked-out branch.
pub async fn total_issue_count<S: EngineSession>(scope: &mut BranchScope<'_, S>) -> VcResult<u64> {
    let conflicts: u64 = scope.conflict_summaries().await?.iter().map(|c| c.count).sum();
    let violations: u64 = scope.violation_summaries().await?.iter().map(|v| v.count).sum();
    Ok(conflicts + violations)
}

/// The ancestor's id identifies the row; added rows have none, so fall back
/// to whichever side still has it.
fn conflict_row_id(row: &Row) -> Value {
    ["base_id", "our_id", "their_id"]
        .iter()
        .filter_map(|key| row.get(*key))
        .find(|id| !id.is_null())
        .cloned()
        .unwrap_or(Value::Null)
}

/// Violation info arrives as a JSON object or, from some drivers, as a JSON string.
fn parse_info(info: &Value) -> serde_json::Map<String, Value> {
    match info {
        Value::Object(map) => map.clone(),
        Value::String(text) => serde_json::from_str::<Value>(text)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default(),
        _ => serde_json::Map::new(),
    }
}

fn render_columns(columns: &Value) -> String {
    match columns {
        Value::Array(items) => items.iter().map(id_text).join(", "),
        other => id_text(other),
    }
}

fn id_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::catalog::ModelInfo;
    use crate::model::EntityType;
    use serde_json::json;

    fn catalog() -> ModelCatalog {
        let mut catalog = ModelCatalog::new();
        let device = ModelInfo::new(EntityType::new("dcim", "device"), "Device", "name").unwrap();
        catalog.register(device);
        catalog.register(ModelInfo::new(EntityType::new("dcim", "site"), "site", "name").unwrap());
        catalog
    }

    fn row(value: Value) -> Row {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_field_changed_on_both_sides_is_a_conflict() {
        let catalog = catalog();
        let reporter = MergeConflicts::new(&catalog, "feature", "main");
        let conflicts = reporter.real_conflicts(&row(json!({
            "base_id": "1", "our_id": "1", "their_id": "1",
            "base_status": "planned", "our_status": "active", "their_status": "retired",
            "base_name": "ams01", "our_name": "ams01", "their_name": "ams01-new",
        })));
        assert_eq!(conflicts.len(), 1);
        assert_eq!(
            Value::Object(conflicts["status"].clone()),
            json!({"main": "active", "feature": "retired", "base": "planned"})
        );
    }

    #[test]
    fn test_field_changed_differently_from_base_only_on_our_side() {
        let catalog = catalog();
        let reporter = MergeConflicts::new(&catalog, "feature", "main");

        let ours_changed = reporter.real_conflicts(&row(json!({
            "our_status": "active", "their_status": "planned", "base_status": "planned",
        })));
        assert!(ours_changed.contains_key("status"));

        let theirs_changed = reporter.real_conflicts(&row(json!({
            "our_status": "planned", "their_status": "active", "base_status": "planned",
        })));
        assert!(theirs_changed.is_empty());
    }

    #[test]
    fn test_fields_without_counterparts_are_ignored() {
        let catalog = catalog();
        let reporter = MergeConflicts::new(&catalog, "feature", "main");
        let conflicts = reporter.real_conflicts(&row(json!({
            "our_diff_type": "modified", "their_diff_type": "removed",
            "base_name": null, "our_name": "x", "their_name": null,
        })));
        assert!(conflicts.contains_key("name"));
        assert!(!conflicts.contains_key("diff_type"));
    }

    #[test]
    fn test_violation_messages() {
        let catalog = catalog();
        let reporter = MergeConflicts::new(&catalog, "feature", "main");

        let fk = ViolationRow {
            id: json!("dev-1"),
            violation_type: "foreign key".into(),
            violation_info: json!({"ReferencedTable": "dcim_site"}),
        };
        let msg = reporter.violation_message(&fk, "Device", "dev-1");
        assert_eq!(msg, "The Device \"dev-1\" references a missing \"site\" object");

        let fk_string_info = ViolationRow {
            violation_info: json!("{\"ReferencedTable\": \"mystery\"}"),
            ..fk.clone()
        };
        assert!(reporter
            .violation_message(&fk_string_info, "Device", "dev-1")
            .contains("\"mystery\""));

        let unique = ViolationRow {
            id: json!("dev-1"),
            violation_type: "unique index".into(),
            violation_info: json!({"Name": "uniq", "Columns": ["site_id", "name"]}),
        };
        assert_eq!(
            reporter.violation_message(&unique, "Device", "edge01"),
            "The Device \"edge01\" violates a uniqueness constraint defined over the columns site_id, name"
        );

        let unknown = ViolationRow {
            id: json!(1),
            violation_type: "check constraint".into(),
            violation_info: json!({}),
        };
        assert_eq!(
            reporter.violation_message(&unknown, "Device", "1"),
            "Unknown constraint violation"
        );
        // a known type without the field it needs is also unknown
        let bare_fk = ViolationRow {
            violation_type: "foreign key".into(),
            ..unknown
        };
        assert_eq!(
            reporter.violation_message(&bare_fk, "Device", "1"),
            "Unknown constraint violation"
        );
    }

    #[test]
    fn test_conflict_row_id_fallback() {
        assert_eq!(conflict_row_id(&row(json!({"base_id": "b", "our_id": "o"}))), json!("b"));
        assert_eq!(conflict_row_id(&row(json!({"base_id": null, "our_id": "o"}))), json!("o"));
        assert_eq!(
            conflict_row_id(&row(json!({"base_id": null, "our_id": null, "their_id": 7}))),
            json!(7)
        );
        assert_eq!(conflict_row_id(&row(json!({}))), Value::Null);
    }
}
