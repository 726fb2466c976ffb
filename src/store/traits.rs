use anyhow::Result;
use serde_json::Value;

use crate::model::{
    BranchHead, BranchMeta, Commit, CommitRequest, Identifier, Row, TableCount, ViolationRow,
};

/// A versioned SQL engine that hands out connection-scoped sessions.
#[async_trait::async_trait]
pub trait VersionedEngine: Send + Sync {
    type Session: EngineSession;

    /// A session whose checkout may be moved between branches. It starts on
    /// the primary branch.
    async fn session(&self) -> Result<Self::Session>;

    /// A session pinned to the primary branch: the global store.
    async fn global_session(&self) -> Result<Self::Session>;

    /// Name of the primary branch.
    fn default_branch(&self) -> &str;
}

/// One connection to the engine. The checked-out branch is state of the
/// session, never of the engine as a whole, and every call takes `&mut self`
/// so two logical operations cannot share a checkout.
#[async_trait::async_trait]
pub trait EngineSession: Send {
    async fn active_branch(&mut self) -> Result<String>;
    async fn checkout(&mut self, branch: &str) -> Result<()>;

    /// Fork `name` from `start_point`. With `force` an existing branch is overwritten.
    async fn create_branch(&mut self, name: &str, start_point: &str, force: bool) -> Result<()>;
    async fn delete_branch(&mut self, name: &str) -> Result<()>;
    async fn branch_head(&mut self, name: &str) -> Result<Option<BranchHead>>;
    async fn list_branch_heads(&mut self) -> Result<Vec<BranchHead>>;

    /// Merge `source` into the checked-out branch. Conflicts and constraint
    /// violations stay in the working set only while conflicted commits are
    /// allowed; otherwise such a merge fails and the branch is left as it was.
    async fn merge(&mut self, source: &str) -> Result<()>;
    /// Toggle whether merges and commits of this session may keep conflicts
    /// and constraint violations. Every session starts with this off.
    async fn allow_conflicted_commits(&mut self, allow: bool) -> Result<()>;
    async fn stage_all(&mut self) -> Result<()>;
    /// Commit the checked-out branch and return the new head hash.
    async fn commit(&mut self, request: &CommitRequest) -> Result<String>;
    async fn merge_base(&mut self, left: &str, right: &str) -> Result<Option<String>>;
    /// Number of commits reachable from `head` but not from `base`.
    async fn count_commits(&mut self, base: &str, head: &str) -> Result<u64>;
    async fn log(&mut self, branch: &str, limit: usize) -> Result<Vec<Commit>>;

    async fn conflict_summaries(&mut self) -> Result<Vec<TableCount>>;
    async fn violation_summaries(&mut self) -> Result<Vec<TableCount>>;
    /// Column names of `dolt_conflicts_<table>`, discovered at runtime.
    async fn conflict_columns(&mut self, table: &Identifier) -> Result<Vec<Identifier>>;
    /// Each conflict row as a JSON object keyed by the given columns.
    async fn conflict_rows(
        &mut self,
        table: &Identifier,
        columns: &[Identifier],
    ) -> Result<Vec<Row>>;
    async fn violation_rows(&mut self, table: &Identifier) -> Result<Vec<ViolationRow>>;

    async fn get_row(&mut self, table: &Identifier, id: &Value) -> Result<Option<Row>>;
    /// Insert or replace a row; the row must carry its `id`.
    async fn upsert_row(&mut self, table: &Identifier, row: &Row) -> Result<()>;
    async fn delete_row(&mut self, table: &Identifier, id: &Value) -> Result<bool>;
    /// Render one column of a row as text, or `None` if the row is not visible.
    async fn fetch_display(
        &mut self,
        table: &Identifier,
        id: &Value,
        field: &Identifier,
    ) -> Result<Option<String>>;

    async fn branch_meta(&mut self, branch: &str) -> Result<Option<BranchMeta>>;
    async fn save_branch_meta(&mut self, meta: &BranchMeta) -> Result<()>;
    async fn delete_branch_meta(&mut self, branch: &str) -> Result<()>;
}
