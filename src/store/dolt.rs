use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDateTime;
use itertools::Itertools;
use serde_json::Value;
use sqlx::mysql::{MySqlArguments, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::{MySql, Row};

use crate::model::{
    BranchHead, BranchMeta, Commit, CommitRequest, Identifier, Row as EntityRow, TableCount,
    ViolationRow,
};
use crate::store::traits::{EngineSession, VersionedEngine};

const BRANCH_META_TABLE: &str = "version_control_branchmeta";

/// Dolt server reached over the MySQL protocol.
#[derive(Debug, Clone)]
pub struct DoltStore {
    pool: MySqlPool,
    default_branch: String,
}

impl DoltStore {
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        default_branch: &str,
    ) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create Dolt connection pool")?;

        Ok(Self {
            pool,
            default_branch: default_branch.to_string(),
        })
    }

    /// Create the control tables this service owns on the primary branch.
    pub async fn migrate(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.context("Failed to acquire connection")?;
        sqlx::query("CALL DOLT_CHECKOUT(?)")
            .bind(&self.default_branch)
            .execute(&mut *conn)
            .await
            .context("Failed to check out primary branch")?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS `{}` (
                branch VARCHAR(255) NOT NULL PRIMARY KEY,
                source_branch VARCHAR(255) NULL,
                created_by VARCHAR(255) NULL,
                created_at DATETIME(6) NOT NULL
            )",
            BRANCH_META_TABLE
        ))
        .execute(&mut *conn)
        .await
        .context("Failed to create branch metadata table")?;
        Ok(())
    }

    async fn open(&self, pinned: bool) -> Result<DoltSession> {
        let mut conn = self.pool.acquire().await.context("Failed to acquire connection")?;
        // Pooled connections keep whatever branch and session settings their
        // previous user left behind.
        sqlx::query("CALL DOLT_CHECKOUT(?)")
            .bind(&self.default_branch)
            .execute(&mut *conn)
            .await
            .context("Failed to reset session to primary branch")?;
        let mut session = DoltSession {
            conn,
            default_branch: self.default_branch.clone(),
            pinned,
        };
        session.allow_conflicted_commits(false).await?;
        Ok(session)
    }
}

#[async_trait::async_trait]
impl VersionedEngine for DoltStore {
    type Session = DoltSession;

    async fn session(&self) -> Result<Self::Session> {
        self.open(false).await
    }

    async fn global_session(&self) -> Result<Self::Session> {
        self.open(true).await
    }

    fn default_branch(&self) -> &str {
        &self.default_branch
    }
}

pub struct DoltSession {
    conn: PoolConnection<MySql>,
    default_branch: String,
    pinned: bool,
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &'q Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.as_str()),
        other => query.bind(other.to_string()),
    }
}

/// `JSON_OBJECT('a', `a`, 'b', `b`)` over validated column names.
fn json_object_expr(columns: &[Identifier]) -> String {
    let pairs = columns
        .iter()
        .map(|c| format!("'{}', {}", c.as_str(), c.quoted()))
        .join(", ");
    format!("CAST(JSON_OBJECT({}) AS CHAR)", pairs)
}

/// Positional arguments for `DOLT_COMMIT`.
fn commit_args(request: &CommitRequest) -> Vec<String> {
    let mut args = Vec::new();
    if request.force {
        args.push("--force".to_string());
    }
    if request.all {
        args.push("--all".to_string());
    }
    if request.allow_empty {
        args.push("--allow-empty".to_string());
    }
    args.push("--message".to_string());
    args.push(request.message.clone());
    args.push("--author".to_string());
    args.push(request.author.to_string());
    args
}

/// Session variables that let a transaction commit with merge conflicts
/// and constraint violations in it.
fn conflict_settings(allow: bool) -> [String; 2] {
    let value = u8::from(allow);
    [
        format!("SET @@dolt_allow_commit_conflicts = {}", value),
        format!("SET @@dolt_force_transaction_commit = {}", value),
    ]
}

fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).join(", ")
}

fn parse_json_object(text: &str) -> Result<EntityRow> {
    match serde_json::from_str::<Value>(text).context("Failed to parse row JSON")? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("expected a JSON object, got {}", other)),
    }
}

fn branch_head_from_row(row: &MySqlRow) -> Result<BranchHead> {
    let date: Option<NaiveDateTime> = row.try_get("latest_commit_date")?;
    Ok(BranchHead {
        name: row.try_get("name")?,
        hash: row.try_get("hash")?,
        latest_committer: row.try_get("latest_committer")?,
        latest_committer_email: row.try_get("latest_committer_email")?,
        latest_commit_date: date.map(|d| d.and_utc()),
        latest_commit_message: row.try_get("latest_commit_message")?,
    })
}

impl DoltSession {
    async fn columns_of(&mut self, table: &Identifier) -> Result<Vec<Identifier>> {
        let rows = sqlx::query(&format!("DESCRIBE {}", table.quoted()))
            .fetch_all(&mut *self.conn)
            .await
            .with_context(|| format!("Failed to describe table {}", table))?;
        rows.iter()
            .map(|row| -> Result<Identifier> {
                let name: String = row.try_get(0)?;
                Identifier::from_schema(name).map_err(|e| anyhow!(e))
            })
            .collect()
    }

    async fn table_counts(
        &mut self,
        system_table: &str,
        count_column: &str,
    ) -> Result<Vec<TableCount>> {
        let rows = sqlx::query(&format!(
            "SELECT `table`, CAST({} AS SIGNED) FROM {}",
            count_column, system_table
        ))
        .fetch_all(&mut *self.conn)
        .await
        .with_context(|| format!("Failed to read {}", system_table))?;
        rows.iter()
            .map(|row| -> Result<TableCount> {
                let count: i64 = row.try_get(1)?;
                Ok(TableCount {
                    table: row.try_get(0)?,
                    count: count.max(0) as u64,
                })
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl EngineSession for DoltSession {
    async fn active_branch(&mut self) -> Result<String> {
        let row = sqlx::query("SELECT active_branch()")
            .fetch_one(&mut *self.conn)
            .await
            .context("Failed to read active branch")?;
        Ok(row.try_get(0)?)
    }

    async fn checkout(&mut self, branch: &str) -> Result<()> {
        if self.pinned && branch != self.default_branch {
            bail!("global session is pinned to '{}'", self.default_branch);
        }
        sqlx::query("CALL DOLT_CHECKOUT(?)")
            .bind(branch)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("Failed to check out branch {}", branch))?;
        Ok(())
    }

    async fn create_branch(&mut self, name: &str, start_point: &str, force: bool) -> Result<()> {
        let sql = if force {
            "CALL DOLT_BRANCH('-f', ?, ?)"
        } else {
            "CALL DOLT_BRANCH(?, ?)"
        };
        sqlx::query(sql)
            .bind(name)
            .bind(start_point)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("Failed to create branch {} from {}", name, start_point))?;
        Ok(())
    }

    async fn delete_branch(&mut self, name: &str) -> Result<()> {
        sqlx::query("CALL DOLT_BRANCH('-D', ?)")
            .bind(name)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("Failed to delete branch {}", name))?;
        Ok(())
    }

    async fn branch_head(&mut self, name: &str) -> Result<Option<BranchHead>> {
        let row = sqlx::query(
            "SELECT name, hash, latest_committer, latest_committer_email,
                    latest_commit_date, latest_commit_message
             FROM dolt_branches WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&mut *self.conn)
        .await
        .context("Failed to fetch branch")?;

        row.as_ref().map(branch_head_from_row).transpose()
    }

    async fn list_branch_heads(&mut self) -> Result<Vec<BranchHead>> {
        let rows = sqlx::query(
            "SELECT name, hash, latest_committer, latest_committer_email,
                    latest_commit_date, latest_commit_message
             FROM dolt_branches ORDER BY name",
        )
        .fetch_all(&mut *self.conn)
        .await
        .context("Failed to list branches")?;

        rows.iter().map(branch_head_from_row).collect()
    }

    async fn merge(&mut self, source: &str) -> Result<()> {
        sqlx::query("CALL DOLT_MERGE(?)")
            .bind(source)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("Failed to merge {}", source))?;
        Ok(())
    }

    async fn allow_conflicted_commits(&mut self, allow: bool) -> Result<()> {
        for statement in conflict_settings(allow) {
            sqlx::query(&statement)
                .execute(&mut *self.conn)
                .await
                .with_context(|| format!("Failed to run '{}'", statement))?;
        }
        Ok(())
    }

    async fn stage_all(&mut self) -> Result<()> {
        sqlx::query("CALL DOLT_ADD('-A')")
            .execute(&mut *self.conn)
            .await
            .context("Failed to stage changes")?;
        Ok(())
    }

    async fn commit(&mut self, request: &CommitRequest) -> Result<String> {
        let args = commit_args(request);
        let sql = format!("CALL DOLT_COMMIT({})", placeholders(args.len()));
        let mut query = sqlx::query(&sql);
        for arg in &args {
            query = query.bind(arg.as_str());
        }
        let row = query
            .fetch_one(&mut *self.conn)
            .await
            .context("Failed to commit")?;
        Ok(row.try_get(0)?)
    }

    async fn merge_base(&mut self, left: &str, right: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT DOLT_MERGE_BASE(?, ?)")
            .bind(left)
            .bind(right)
            .fetch_one(&mut *self.conn)
            .await
            .with_context(|| format!("Failed to compute merge base of {} and {}", left, right))?;
        Ok(row.try_get(0)?)
    }

    async fn count_commits(&mut self, base: &str, head: &str) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) FROM DOLT_LOG(?)")
            .bind(format!("{}..{}", base, head))
            .fetch_one(&mut *self.conn)
            .await
            .with_context(|| format!("Failed to count commits {}..{}", base, head))?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn log(&mut self, branch: &str, limit: usize) -> Result<Vec<Commit>> {
        let rows = sqlx::query(
            "SELECT commit_hash, committer, email, date, message FROM DOLT_LOG(?) LIMIT ?",
        )
        .bind(branch)
        .bind(limit as u64)
        .fetch_all(&mut *self.conn)
        .await
        .with_context(|| format!("Failed to read log of {}", branch))?;

        let mut commits = Vec::with_capacity(rows.len());
        for row in rows {
            let hash: String = row.try_get("commit_hash")?;
            let parents = sqlx::query(
                "SELECT parent_hash FROM dolt_commit_ancestors
                 WHERE commit_hash = ? ORDER BY parent_index",
            )
            .bind(&hash)
            .fetch_all(&mut *self.conn)
            .await
            .context("Failed to read commit ancestors")?
            .iter()
            .map(|r| r.try_get::<String, _>(0))
            .collect::<Result<Vec<_>, _>>()?;
            let date: NaiveDateTime = row.try_get("date")?;
            commits.push(Commit {
                hash,
                message: row.try_get("message")?,
                committer: row.try_get("committer")?,
                email: row.try_get("email")?,
                date: date.and_utc(),
                parents,
            });
        }
        Ok(commits)
    }

    async fn conflict_summaries(&mut self) -> Result<Vec<TableCount>> {
        self.table_counts("dolt_conflicts", "num_conflicts").await
    }

    async fn violation_summaries(&mut self) -> Result<Vec<TableCount>> {
        self.table_counts("dolt_constraint_violations", "num_violations").await
    }

    async fn conflict_columns(&mut self, table: &Identifier) -> Result<Vec<Identifier>> {
        let conflicts = table.prefixed("dolt_conflicts_").map_err(|e| anyhow!(e))?;
        self.columns_of(&conflicts).await
    }

    async fn conflict_rows(
        &mut self,
        table: &Identifier,
        columns: &[Identifier],
    ) -> Result<Vec<EntityRow>> {
        if columns.is_empty() {
            return Ok(Vec::new());
        }
        let conflicts = table.prefixed("dolt_conflicts_").map_err(|e| anyhow!(e))?;
        let rows = sqlx::query(&format!(
            "SELECT {} FROM {}",
            json_object_expr(columns),
            conflicts.quoted()
        ))
        .fetch_all(&mut *self.conn)
        .await
        .with_context(|| format!("Failed to read conflicts of {}", table))?;

        rows.iter()
            .map(|row| parse_json_object(&row.try_get::<String, _>(0)?))
            .collect()
    }

    async fn violation_rows(&mut self, table: &Identifier) -> Result<Vec<ViolationRow>> {
        let violations = table
            .prefixed("dolt_constraint_violations_")
            .map_err(|e| anyhow!(e))?;
        let rows = sqlx::query(&format!(
            "SELECT CAST(JSON_OBJECT('id', `id`) AS CHAR), CAST(violation_type AS CHAR),
                    CAST(violation_info AS CHAR)
             FROM {}",
            violations.quoted()
        ))
        .fetch_all(&mut *self.conn)
        .await
        .with_context(|| format!("Failed to read constraint violations of {}", table))?;

        rows.iter()
            .map(|row| -> Result<ViolationRow> {
                let mut id = parse_json_object(&row.try_get::<String, _>(0)?)?;
                let info: Option<String> = row.try_get(2)?;
                Ok(ViolationRow {
                    id: id.remove("id").unwrap_or(Value::Null),
                    violation_type: row.try_get(1)?,
                    violation_info: match info {
                        Some(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
                        None => Value::Null,
                    },
                })
            })
            .collect()
    }

    async fn get_row(&mut self, table: &Identifier, id: &Value) -> Result<Option<EntityRow>> {
        let columns = self.columns_of(table).await?;
        let sql = format!(
            "SELECT {} FROM {} WHERE `id` = ?",
            json_object_expr(&columns),
            table.quoted()
        );
        let row = bind_value(sqlx::query(&sql), id)
            .fetch_optional(&mut *self.conn)
            .await
            .with_context(|| format!("Failed to fetch row from {}", table))?;
        row.map(|row| parse_json_object(&row.try_get::<String, _>(0)?))
            .transpose()
    }

    async fn upsert_row(&mut self, table: &Identifier, row: &EntityRow) -> Result<()> {
        if !row.contains_key("id") {
            bail!("row for '{}' has no id", table);
        }
        let columns = row
            .keys()
            .map(|k| Identifier::new(k.as_str()).map_err(|e| anyhow!(e)))
            .collect::<Result<Vec<_>>>()?;
        let sql = format!(
            "REPLACE INTO {} ({}) VALUES ({})",
            table.quoted(),
            columns.iter().map(Identifier::quoted).join(", "),
            placeholders(columns.len())
        );
        let mut query = sqlx::query(&sql);
        for value in row.values() {
            query = bind_value(query, value);
        }
        query
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("Failed to write row to {}", table))?;
        Ok(())
    }

    async fn delete_row(&mut self, table: &Identifier, id: &Value) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE `id` = ?", table.quoted());
        let result = bind_value(sqlx::query(&sql), id)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("Failed to delete row from {}", table))?;
        Ok(result.rows_affected() > 0)
    }

    async fn fetch_display(
        &mut self,
        table: &Identifier,
        id: &Value,
        field: &Identifier,
    ) -> Result<Option<String>> {
        let sql = format!(
            "SELECT CAST({} AS CHAR) FROM {} WHERE `id` = ?",
            field.quoted(),
            table.quoted()
        );
        let row = bind_value(sqlx::query(&sql), id)
            .fetch_optional(&mut *self.conn)
            .await
            .with_context(|| format!("Failed to look up {} in {}", field, table))?;
        Ok(match row {
            Some(row) => row.try_get::<Option<String>, _>(0)?,
            None => None,
        })
    }

    async fn branch_meta(&mut self, branch: &str) -> Result<Option<BranchMeta>> {
        let row = sqlx::query(&format!(
            "SELECT branch, source_branch, created_by, created_at FROM `{}` WHERE branch = ?",
            BRANCH_META_TABLE
        ))
        .bind(branch)
        .fetch_optional(&mut *self.conn)
        .await
        .context("Failed to fetch branch metadata")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let created_at: NaiveDateTime = row.try_get("created_at")?;
        Ok(Some(BranchMeta {
            branch: row.try_get("branch")?,
            starting_branch: row.try_get("source_branch")?,
            created_by: row.try_get("created_by")?,
            created_at: created_at.and_utc(),
        }))
    }

    async fn save_branch_meta(&mut self, meta: &BranchMeta) -> Result<()> {
        sqlx::query(&format!(
            "REPLACE INTO `{}` (branch, source_branch, created_by, created_at) VALUES (?, ?, ?, ?)",
            BRANCH_META_TABLE
        ))
        .bind(&meta.branch)
        .bind(&meta.starting_branch)
        .bind(&meta.created_by)
        .bind(meta.created_at.naive_utc())
        .execute(&mut *self.conn)
        .await
        .context("Failed to save branch metadata")?;
        Ok(())
    }

    async fn delete_branch_meta(&mut self, branch: &str) -> Result<()> {
        sqlx::query(&format!("DELETE FROM `{}` WHERE branch = ?", BRANCH_META_TABLE))
            .bind(branch)
            .execute(&mut *self.conn)
            .await
            .context("Failed to delete branch metadata")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Author;

    #[test]
    fn test_commit_args_bind_message_and_author_separately() {
        let request = CommitRequest::forced(
            "creating merge candidate with src: \"a'b\"",
            Author::new("nautobot", "nautobot@ntc.com"),
        );
        let args = commit_args(&request);
        assert_eq!(
            args,
            vec![
                "--force",
                "--all",
                "--allow-empty",
                "--message",
                "creating merge candidate with src: \"a'b\"",
                "--author",
                "nautobot <nautobot@ntc.com>",
            ]
        );
        assert_eq!(placeholders(args.len()), "?, ?, ?, ?, ?, ?, ?");
    }

    #[test]
    fn test_conflict_settings_switch_both_variables() {
        assert_eq!(
            conflict_settings(true),
            [
                "SET @@dolt_allow_commit_conflicts = 1".to_string(),
                "SET @@dolt_force_transaction_commit = 1".to_string(),
            ]
        );
        assert_eq!(
            conflict_settings(false),
            [
                "SET @@dolt_allow_commit_conflicts = 0".to_string(),
                "SET @@dolt_force_transaction_commit = 0".to_string(),
            ]
        );
    }

    #[test]
    fn test_json_object_expr_quotes_columns() {
        let columns = vec![
            Identifier::new("base_id").unwrap(),
            Identifier::new("our_name").unwrap(),
        ];
        assert_eq!(
            json_object_expr(&columns),
            "CAST(JSON_OBJECT('base_id', `base_id`, 'our_name', `our_name`) AS CHAR)"
        );
    }

    #[test]
    fn test_parse_json_object_rejects_scalars() {
        assert!(parse_json_object(r#"{"id": 1}"#).is_ok());
        assert!(parse_json_object("42").is_err());
    }
}
