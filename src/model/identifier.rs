use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::VcError;

const MAX_IDENTIFIER_LEN: usize = 64;

/// A table or column name that is safe to place in a SQL statement.
///
/// Only ASCII letters, digits and underscores are accepted and the name must
/// not start with a digit. Anything read back from schema introspection goes
/// through this type before it is used to build a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

fn has_identifier_shape(name: &str) -> bool {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn invalid(name: &str) -> VcError {
    VcError::Validation(format!("invalid identifier: '{}'", name))
}

impl Identifier {
    /// A user-supplied table, column or model name.
    pub fn new(name: impl Into<String>) -> Result<Self, VcError> {
        let name = name.into();
        if !has_identifier_shape(&name) || name.len() > MAX_IDENTIFIER_LEN {
            return Err(invalid(&name));
        }
        Ok(Self(name))
    }

    /// A name the engine generated itself, such as a conflict-table column
    /// `their_<column>`. Only the character rules apply; the length cap is
    /// for names users choose.
    pub fn from_schema(name: impl Into<String>) -> Result<Self, VcError> {
        let name = name.into();
        if !has_identifier_shape(&name) {
            return Err(invalid(&name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Backtick-quoted form for MySQL-compatible engines.
    pub fn quoted(&self) -> String {
        format!("`{}`", self.0)
    }

    /// Name of a derived system table such as `dolt_conflicts_<table>`.
    pub fn prefixed(&self, prefix: &str) -> Result<Identifier, VcError> {
        Identifier::from_schema(format!("{}{}", prefix, self.0))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identifier {
    type Error = VcError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Identifier::new(value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(Identifier::new("dcim_device").is_ok());
        assert!(Identifier::new("_private").is_ok());
        assert!(Identifier::new("").is_err());
        assert!(Identifier::new("1table").is_err());
        assert!(Identifier::new("site; DROP TABLE x").is_err());
        assert!(Identifier::new("a`b").is_err());
        assert!(Identifier::new("x".repeat(65)).is_err());
    }

    #[test]
    fn test_prefixed_and_quoted() {
        let table = Identifier::new("dcim_site").unwrap();
        let conflicts = table.prefixed("dolt_conflicts_").unwrap();
        assert_eq!(conflicts.as_str(), "dolt_conflicts_dcim_site");
        assert_eq!(conflicts.quoted(), "`dolt_conflicts_dcim_site`");
    }

    #[test]
    fn test_system_tables_of_long_table_names() {
        let table = Identifier::new("dcim_interfaceredundancygroupassociation").unwrap();
        let violations = table.prefixed("dolt_constraint_violations_").unwrap();
        assert_eq!(
            violations.as_str(),
            "dolt_constraint_violations_dcim_interfaceredundancygroupassociation"
        );
        assert!(violations.as_str().len() > MAX_IDENTIFIER_LEN);
        assert!(table.prefixed("dolt conflicts ").is_err());

        let column = format!("their_{}", "x".repeat(64));
        assert!(Identifier::from_schema(column.as_str()).is_ok());
        assert!(Identifier::new(column).is_err());
        assert!(Identifier::from_schema("their_`x").is_err());
    }
}
