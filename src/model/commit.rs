use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Commit author in `Name <email>` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Parse `Name <email>`; a bare name gets an empty email.
    pub fn parse(s: &str) -> Self {
        match (s.find('<'), s.rfind('>')) {
            (Some(open), Some(close)) if open < close => Author::new(
                s[..open].trim(),
                s[open + 1..close].trim(),
            ),
            _ => Author::new(s.trim(), ""),
        }
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// An immutable node of the commit graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub hash: String,
    pub message: String,
    pub committer: String,
    pub email: String,
    pub date: DateTime<Utc>,
    pub parents: Vec<String>,
}

/// Arguments for a commit on the checked-out branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub message: String,
    pub author: Author,
    /// Stage every modified table before committing.
    pub all: bool,
    /// Commit even when the branch has no changes.
    pub allow_empty: bool,
    /// Commit even when conflicts or constraint violations are present.
    pub force: bool,
}

impl CommitRequest {
    pub fn new(message: impl Into<String>, author: Author) -> Self {
        Self {
            message: message.into(),
            author,
            all: true,
            allow_empty: false,
            force: false,
        }
    }

    /// The forced, empty-allowed commit used to record a merge attempt.
    pub fn forced(message: impl Into<String>, author: Author) -> Self {
        Self {
            allow_empty: true,
            force: true,
            ..Self::new(message, author)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_author_round_trip() {
        let author = Author::parse("nautobot <nautobot@ntc.com>");
        assert_eq!(author.name, "nautobot");
        assert_eq!(author.email, "nautobot@ntc.com");
        assert_eq!(author.to_string(), "nautobot <nautobot@ntc.com>");

        let bare = Author::parse("admin");
        assert_eq!(bare.name, "admin");
        assert_eq!(bare.email, "");
    }

    #[test]
    fn test_forced_commit_request() {
        let req = CommitRequest::forced("merge", Author::new("a", "a@b"));
        assert!(req.force && req.allow_empty && req.all);
        let plain = CommitRequest::new("edit", Author::new("a", "a@b"));
        assert!(!plain.force && !plain.allow_empty);
    }
}
