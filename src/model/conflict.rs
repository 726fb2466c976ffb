use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::model::Row;

/// Per-table count from the engine's conflict or constraint-violation summary tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCount {
    pub table: String,
    pub count: u64,
}

/// One entry of `dolt_constraint_violations_<table>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRow {
    pub id: serde_json::Value,
    pub violation_type: String,
    pub violation_info: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    ForeignKey,
    UniqueIndex,
    Other(String),
}

impl ViolationKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "foreign key" => ViolationKind::ForeignKey,
            "unique index" => ViolationKind::UniqueIndex,
            other => ViolationKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ViolationKind::ForeignKey => "foreign key",
            ViolationKind::UniqueIndex => "unique index",
            ViolationKind::Other(other) => other,
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the merge summary: issues found in a single table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictSummaryRow {
    pub table: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_conflicts: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_violations: Option<u64>,
}

/// A conflicted row with only the fields both sides changed differently.
///
/// Each field maps to `{<destination>: ours, <source>: theirs, "base": base}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictDetail {
    pub model: String,
    pub id: String,
    pub conflicts: BTreeMap<String, Row>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationDetail {
    pub model: String,
    pub id: String,
    pub violation_type: String,
    pub violations: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub summary: Vec<ConflictSummaryRow>,
    pub conflicts: Vec<ConflictDetail>,
    pub violations: Vec<ViolationDetail>,
}

/// Outcome of a merge preview. `Unavailable` means the engine could not build
/// the candidate; the preview is advisory so callers render it as "no data".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergePreview {
    Ready(MergeReport),
    Unavailable { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_kind_parse() {
        assert_eq!(ViolationKind::parse("foreign key"), ViolationKind::ForeignKey);
        assert_eq!(ViolationKind::parse("unique index"), ViolationKind::UniqueIndex);
        assert_eq!(
            ViolationKind::parse("check constraint"),
            ViolationKind::Other("check constraint".into())
        );
        assert_eq!(ViolationKind::UniqueIndex.to_string(), "unique index");
    }

    #[test]
    fn test_summary_row_omits_missing_counts() {
        let row = ConflictSummaryRow {
            table: "dcim_site".into(),
            model: "site".into(),
            num_conflicts: Some(2),
            num_violations: None,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["num_conflicts"], 2);
        assert!(json.get("num_violations").is_none());
    }
}
