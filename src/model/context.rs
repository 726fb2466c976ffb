use serde::{Deserialize, Serialize};

use crate::model::Author;

/// User making the request, taken from request headers for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
}

impl UserContext {
    pub fn new(user_id: String) -> Self {
        Self {
            user_id,
            user_email: None,
            user_name: None,
        }
    }

    pub fn with_details(user_id: String, email: Option<String>, name: Option<String>) -> Self {
        Self {
            user_id,
            user_email: email,
            user_name: name,
        }
    }

    /// Anonymous development user when no identity headers are sent.
    pub fn default_user() -> Self {
        Self {
            user_id: "dev-user".to_string(),
            user_email: Some("dev@localhost".to_string()),
            user_name: Some("Development User".to_string()),
        }
    }

    /// Commit author for changes made by this user.
    pub fn author(&self) -> Author {
        let name = self.user_name.clone().unwrap_or_else(|| self.user_id.clone());
        let email = self.user_email.clone().unwrap_or_default();
        Author::new(name, email)
    }
}

impl Default for UserContext {
    fn default() -> Self {
        Self::default_user()
    }
}

/// Per-request state: the branch the request is pinned to and who is asking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub branch: String,
    pub user: UserContext,
}

impl RequestContext {
    pub fn new(branch: impl Into<String>, user: UserContext) -> Self {
        Self {
            branch: branch.into(),
            user,
        }
    }

    pub fn active_branch(&self) -> &str {
        &self.branch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_author_from_user() {
        let user = UserContext::with_details(
            "u1".to_string(),
            Some("ops@example.com".to_string()),
            Some("Ops".to_string()),
        );
        assert_eq!(user.author().to_string(), "Ops <ops@example.com>");

        let bare = UserContext::new("u2".to_string());
        assert_eq!(bare.author().to_string(), "u2 <>");
    }
}
