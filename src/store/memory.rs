//! In-process versioned engine.
//!
//! Keeps a commit graph of full table snapshots, per-branch working sets and
//! the same conflict / constraint-violation tables a Dolt server exposes after
//! a merge. Used by the test-suite and for running the service without a
//! database server.

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::model::{
    Author, BranchHead, BranchMeta, Commit, CommitRequest, Identifier, Row, TableCount,
    ViolationRow,
};
use crate::store::traits::{EngineSession, VersionedEngine};

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub name: String,
    pub column: String,
    pub referenced_table: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniqueIndex {
    pub name: String,
    pub columns: Vec<String>,
}

/// Column layout and constraints of a table. `id` is always the primary key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSchema {
    pub columns: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub unique_indexes: Vec<UniqueIndex>,
}

impl TableSchema {
    pub fn new(columns: &[&str]) -> Self {
        let mut all = vec!["id".to_string()];
        all.extend(columns.iter().filter(|c| **c != "id").map(|c| c.to_string()));
        Self {
            columns: all,
            ..Default::default()
        }
    }

    pub fn with_foreign_key(mut self, column: &str, referenced_table: &str) -> Self {
        self.foreign_keys.push(ForeignKey {
            name: format!("fk_{}_{}", column, referenced_table),
            column: column.to_string(),
            referenced_table: referenced_table.to_string(),
        });
        self
    }

    pub fn with_unique(mut self, columns: &[&str]) -> Self {
        self.unique_indexes.push(UniqueIndex {
            name: format!("uniq_{}", columns.join("_")),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }
}

type Tables = BTreeMap<String, BTreeMap<String, Row>>;

static NULL: Value = Value::Null;

#[derive(Debug, Clone, Default, PartialEq)]
struct Snapshot {
    tables: Tables,
    conflicts: BTreeMap<String, Vec<Row>>,
    violations: BTreeMap<String, Vec<ViolationRow>>,
}

#[derive(Debug, Clone)]
struct CommitNode {
    commit: Commit,
    snapshot: Snapshot,
}

#[derive(Debug, Clone)]
struct BranchState {
    head: String,
    working: Snapshot,
    merge_parent: Option<String>,
}

#[derive(Debug, Default)]
struct EngineState {
    commits: HashMap<String, CommitNode>,
    branches: BTreeMap<String, BranchState>,
    meta: HashMap<String, BranchMeta>,
    schemas: BTreeMap<String, TableSchema>,
    sequence: u64,
}

fn id_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl EngineState {
    fn resolve(&self, reference: &str) -> Result<String> {
        if let Some(branch) = self.branches.get(reference) {
            return Ok(branch.head.clone());
        }
        if self.commits.contains_key(reference) {
            return Ok(reference.to_string());
        }
        bail!("branch not found: {}", reference)
    }

    fn branch(&self, name: &str) -> Result<&BranchState> {
        self.branches
            .get(name)
            .ok_or_else(|| anyhow!("branch not found: {}", name))
    }

    fn branch_mut(&mut self, name: &str) -> Result<&mut BranchState> {
        self.branches
            .get_mut(name)
            .ok_or_else(|| anyhow!("branch not found: {}", name))
    }

    fn snapshot(&self, hash: &str) -> Result<&Snapshot> {
        self.commits
            .get(hash)
            .map(|node| &node.snapshot)
            .ok_or_else(|| anyhow!("commit not found: {}", hash))
    }

    /// Breadth-first walk over the ancestors of `hash`, itself included.
    fn ancestors(&self, hash: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([hash.to_string()]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(node) = self.commits.get(&current) {
                queue.extend(node.commit.parents.iter().cloned());
            }
            order.push(current);
        }
        order
    }

    fn merge_base(&self, left: &str, right: &str) -> Option<String> {
        let left: HashSet<String> = self.ancestors(left).into_iter().collect();
        self.ancestors(right).into_iter().find(|c| left.contains(c))
    }

    fn schema(&self, table: &str) -> Result<&TableSchema> {
        self.schemas
            .get(table)
            .ok_or_else(|| anyhow!("table not found: {}", table))
    }

    fn head_of(&self, name: &str) -> Result<BranchHead> {
        let branch = self.branch(name)?;
        let node = self
            .commits
            .get(&branch.head)
            .ok_or_else(|| anyhow!("commit not found: {}", branch.head))?;
        Ok(BranchHead {
            name: name.to_string(),
            hash: node.commit.hash.clone(),
            latest_committer: Some(node.commit.committer.clone()),
            latest_committer_email: Some(node.commit.email.clone()),
            latest_commit_date: Some(node.commit.date),
            latest_commit_message: Some(node.commit.message.clone()),
        })
    }

    fn record_commit(
        &mut self,
        parents: Vec<String>,
        snapshot: Snapshot,
        message: &str,
        author: &Author,
    ) -> String {
        use sha2::{Digest, Sha256};

        self.sequence += 1;
        let date = Utc::now();
        let mut hasher = Sha256::new();
        for parent in &parents {
            hasher.update(format!("parent:{}\n", parent));
        }
        hasher.update(format!("author:{}\n", author));
        hasher.update(format!("message:{}\n", message));
        hasher.update(format!("date:{}\n", date.to_rfc3339()));
        hasher.update(format!("sequence:{}\n", self.sequence));
        hasher.update(format!("data:{:?}\n", snapshot.tables));
        let hash = hex::encode(hasher.finalize());

        self.commits.insert(
            hash.clone(),
            CommitNode {
                commit: Commit {
                    hash: hash.clone(),
                    message: message.to_string(),
                    committer: author.name.clone(),
                    email: author.email.clone(),
                    date,
                    parents,
                },
                snapshot,
            },
        );
        hash
    }
}

/// Rows of `tables` that break a foreign-key or unique-index rule.
fn constraint_violations(
    schemas: &BTreeMap<String, TableSchema>,
    tables: &Tables,
) -> BTreeMap<String, Vec<ViolationRow>> {
    let mut found: BTreeMap<String, Vec<ViolationRow>> = BTreeMap::new();
    let empty = BTreeMap::new();
    for (table, schema) in schemas {
        let rows = tables.get(table).unwrap_or(&empty);
        for fk in &schema.foreign_keys {
            let referenced = tables.get(&fk.referenced_table).unwrap_or(&empty);
            for (key, row) in rows {
                let target = row.get(&fk.column).unwrap_or(&NULL);
                if target.is_null() || referenced.contains_key(&id_key(target)) {
                    continue;
                }
                found.entry(table.clone()).or_default().push(ViolationRow {
                    id: row.get("id").cloned().unwrap_or_else(|| json!(key)),
                    violation_type: "foreign key".to_string(),
                    violation_info: json!({
                        "ForeignKey": fk.name,
                        "Table": table,
                        "Columns": [fk.column],
                        "ReferencedTable": fk.referenced_table,
                        "ReferencedColumns": ["id"],
                    }),
                });
            }
        }
        for index in &schema.unique_indexes {
            let mut groups: BTreeMap<String, Vec<&Row>> = BTreeMap::new();
            for row in rows.values() {
                let values: Vec<&Value> = index
                    .columns
                    .iter()
                    .map(|c| row.get(c).unwrap_or(&NULL))
                    .collect();
                if values.iter().any(|v| v.is_null()) {
                    continue;
                }
                groups.entry(json!(values).to_string()).or_default().push(row);
            }
            for duplicates in groups.values().filter(|rows| rows.len() > 1) {
                for row in duplicates {
                    found.entry(table.clone()).or_default().push(ViolationRow {
                        id: row.get("id").cloned().unwrap_or(Value::Null),
                        violation_type: "unique index".to_string(),
                        violation_info: json!({
                            "Name": index.name,
                            "Columns": index.columns,
                        }),
                    });
                }
            }
        }
    }
    found
}

/// Conflict-table row for one key, in the column layout Dolt uses.
fn conflict_row(
    schema: &TableSchema,
    base: Option<&Row>,
    ours: Option<&Row>,
    theirs: Option<&Row>,
) -> Row {
    fn diff_type(base: Option<&Row>, side: Option<&Row>) -> &'static str {
        match (base, side) {
            (None, Some(_)) => "added",
            (Some(_), None) => "removed",
            _ => "modified",
        }
    }

    let mut row = Row::new();
    for (prefix, side) in [("base_", base), ("our_", ours), ("their_", theirs)] {
        for column in &schema.columns {
            let value = side.and_then(|r| r.get(column)).cloned().unwrap_or(Value::Null);
            row.insert(format!("{}{}", prefix, column), value);
        }
    }
    row.insert("our_diff_type".into(), json!(diff_type(base, ours)));
    row.insert("their_diff_type".into(), json!(diff_type(base, theirs)));
    row
}

/// Cell-wise three-way merge of a row present on every side. `None` when
/// some column was changed to different values on both sides.
fn merge_cells(schema: &TableSchema, base: &Row, ours: &Row, theirs: &Row) -> Option<Row> {
    let mut merged = ours.clone();
    for column in &schema.columns {
        let b = base.get(column).unwrap_or(&NULL);
        let o = ours.get(column).unwrap_or(&NULL);
        let t = theirs.get(column).unwrap_or(&NULL);
        if o == t || t == b {
            continue;
        }
        if o != b {
            return None;
        }
        merged.insert(column.clone(), t.clone());
    }
    Some(merged)
}

/// Engine shared by all of its sessions.
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    state: Arc<Mutex<EngineState>>,
    default_branch: String,
}

impl MemoryEngine {
    /// A repository with one initial commit on `default_branch`.
    pub fn new(default_branch: &str) -> Self {
        let mut state = EngineState::default();
        let head = state.record_commit(
            Vec::new(),
            Snapshot::default(),
            "Initialize data repository",
            &Author::new("system", "system@localhost"),
        );
        state.branches.insert(
            default_branch.to_string(),
            BranchState {
                head,
                working: Snapshot::default(),
                merge_parent: None,
            },
        );
        Self {
            state: Arc::new(Mutex::new(state)),
            default_branch: default_branch.to_string(),
        }
    }

    /// Register a table. Schemas are shared by every branch.
    pub fn define_table(&self, table: &str, schema: TableSchema) {
        self.state.lock().schemas.insert(table.to_string(), schema);
    }

    /// Number of commits recorded so far, reachable or not.
    pub fn commit_count(&self) -> usize {
        self.state.lock().commits.len()
    }

    fn open(&self, pinned: bool) -> MemorySession {
        MemorySession {
            state: Arc::clone(&self.state),
            current: self.default_branch.clone(),
            pinned,
            allow_conflicts: false,
        }
    }
}

#[async_trait::async_trait]
impl VersionedEngine for MemoryEngine {
    type Session = MemorySession;

    async fn session(&self) -> Result<Self::Session> {
        Ok(self.open(false))
    }

    async fn global_session(&self) -> Result<Self::Session> {
        Ok(self.open(true))
    }

    fn default_branch(&self) -> &str {
        &self.default_branch
    }
}

#[derive(Debug)]
pub struct MemorySession {
    state: Arc<Mutex<EngineState>>,
    current: String,
    pinned: bool,
    allow_conflicts: bool,
}

impl MemorySession {
    fn with_working<T>(&self, f: impl FnOnce(&EngineState, &Snapshot) -> Result<T>) -> Result<T> {
        let state = self.state.lock();
        let branch = state.branch(&self.current)?;
        f(&state, &branch.working)
    }
}

#[async_trait::async_trait]
impl EngineSession for MemorySession {
    async fn active_branch(&mut self) -> Result<String> {
        Ok(self.current.clone())
    }

    async fn checkout(&mut self, branch: &str) -> Result<()> {
        if self.pinned && branch != self.current {
            bail!("global session is pinned to '{}'", self.current);
        }
        self.state.lock().branch(branch)?;
        self.current = branch.to_string();
        Ok(())
    }

    async fn create_branch(&mut self, name: &str, start_point: &str, force: bool) -> Result<()> {
        let mut state = self.state.lock();
        if state.branches.contains_key(name) && !force {
            bail!("branch '{}' already exists", name);
        }
        let head = state.resolve(start_point)?;
        let working = state.snapshot(&head)?.clone();
        state.branches.insert(
            name.to_string(),
            BranchState {
                head,
                working,
                merge_parent: None,
            },
        );
        Ok(())
    }

    async fn delete_branch(&mut self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.branches.remove(name).is_none() {
            bail!("branch not found: {}", name);
        }
        Ok(())
    }

    async fn branch_head(&mut self, name: &str) -> Result<Option<BranchHead>> {
        let state = self.state.lock();
        if !state.branches.contains_key(name) {
            return Ok(None);
        }
        state.head_of(name).map(Some)
    }

    async fn list_branch_heads(&mut self) -> Result<Vec<BranchHead>> {
        let state = self.state.lock();
        state.branches.keys().map(|name| state.head_of(name)).collect()
    }

    async fn merge(&mut self, source: &str) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let theirs_head = state.resolve(source)?;
        let branch = state.branch(&self.current)?;
        let ours_head = branch.head.clone();
        if &branch.working != state.snapshot(&ours_head)? {
            bail!("cannot merge with uncommitted changes on '{}'", self.current);
        }
        let base_head = state
            .merge_base(&ours_head, &theirs_head)
            .ok_or_else(|| {
                anyhow!("no common ancestor between '{}' and '{}'", self.current, source)
            })?;

        if base_head == theirs_head {
            return Ok(());
        }
        if base_head == ours_head {
            let working = state.snapshot(&theirs_head)?.clone();
            let branch = state.branch_mut(&self.current)?;
            branch.head = theirs_head;
            branch.working = working;
            return Ok(());
        }

        let base = state.snapshot(&base_head)?.clone();
        let ours = state.snapshot(&ours_head)?.clone();
        let theirs = state.snapshot(&theirs_head)?.clone();
        let mut merged = ours.clone();
        let empty = BTreeMap::new();

        for (table, schema) in &state.schemas {
            let base_rows = base.tables.get(table).unwrap_or(&empty);
            let our_rows = ours.tables.get(table).unwrap_or(&empty);
            let their_rows = theirs.tables.get(table).unwrap_or(&empty);
            let keys: HashSet<&String> = base_rows
                .keys()
                .chain(our_rows.keys())
                .chain(their_rows.keys())
                .collect();
            let mut keys: Vec<&String> = keys.into_iter().collect();
            keys.sort();

            for key in keys {
                let (b, o, t) = (base_rows.get(key), our_rows.get(key), their_rows.get(key));
                if o == t || t == b {
                    continue;
                }
                if let (Some(b), Some(o), Some(t)) = (b, o, t) {
                    if let Some(row) = merge_cells(schema, b, o, t) {
                        merged.tables.entry(table.clone()).or_default().insert(key.clone(), row);
                        continue;
                    }
                }
                if o == b {
                    let rows = merged.tables.entry(table.clone()).or_default();
                    match t {
                        Some(row) => rows.insert(key.clone(), row.clone()),
                        None => rows.remove(key),
                    };
                    continue;
                }
                merged
                    .conflicts
                    .entry(table.clone())
                    .or_default()
                    .push(conflict_row(schema, b, o, t));
            }
        }

        for (table, rows) in constraint_violations(&state.schemas, &merged.tables) {
            merged.violations.entry(table).or_default().extend(rows);
        }
        let has_issues = !merged.conflicts.is_empty() || !merged.violations.is_empty();
        if has_issues && !self.allow_conflicts {
            bail!(
                "merging '{}' into '{}' leaves conflicts or constraint violations",
                source,
                self.current
            );
        }

        let branch = state.branch_mut(&self.current)?;
        branch.working = merged;
        branch.merge_parent = Some(theirs_head);
        Ok(())
    }

    async fn allow_conflicted_commits(&mut self, allow: bool) -> Result<()> {
        self.allow_conflicts = allow;
        Ok(())
    }

    async fn stage_all(&mut self) -> Result<()> {
        self.state.lock().branch(&self.current)?;
        Ok(())
    }

    async fn commit(&mut self, request: &CommitRequest) -> Result<String> {
        let mut state = self.state.lock();
        let branch = state.branch(&self.current)?.clone();
        let has_issues =
            !branch.working.conflicts.is_empty() || !branch.working.violations.is_empty();
        if has_issues && !request.force {
            bail!(
                "cannot commit '{}' with unresolved conflicts or constraint violations",
                self.current
            );
        }
        let unchanged =
            &branch.working == state.snapshot(&branch.head)? && branch.merge_parent.is_none();
        if unchanged && !request.allow_empty {
            bail!("nothing to commit on '{}'", self.current);
        }

        let mut parents = vec![branch.head.clone()];
        parents.extend(branch.merge_parent.clone());
        let hash = state.record_commit(
            parents,
            branch.working.clone(),
            &request.message,
            &request.author,
        );
        let branch = state.branch_mut(&self.current)?;
        branch.head = hash.clone();
        branch.merge_parent = None;
        Ok(hash)
    }

    async fn merge_base(&mut self, left: &str, right: &str) -> Result<Option<String>> {
        let state = self.state.lock();
        let left = state.resolve(left)?;
        let right = state.resolve(right)?;
        Ok(state.merge_base(&left, &right))
    }

    async fn count_commits(&mut self, base: &str, head: &str) -> Result<u64> {
        let state = self.state.lock();
        let excluded: HashSet<String> =
            state.ancestors(&state.resolve(base)?).into_iter().collect();
        let count = state
            .ancestors(&state.resolve(head)?)
            .iter()
            .filter(|c| !excluded.contains(*c))
            .count();
        Ok(count as u64)
    }

    async fn log(&mut self, branch: &str, limit: usize) -> Result<Vec<Commit>> {
        let state = self.state.lock();
        let head = state.resolve(branch)?;
        let mut commits: Vec<Commit> = state
            .ancestors(&head)
            .iter()
            .filter_map(|hash| state.commits.get(hash).map(|node| node.commit.clone()))
            .collect();
        commits.sort_by(|a, b| b.date.cmp(&a.date));
        commits.truncate(limit);
        Ok(commits)
    }

    async fn conflict_summaries(&mut self) -> Result<Vec<TableCount>> {
        self.with_working(|_, working| {
            Ok(working
                .conflicts
                .iter()
                .map(|(table, rows)| TableCount {
                    table: table.clone(),
                    count: rows.len() as u64,
                })
                .collect())
        })
    }

    async fn violation_summaries(&mut self) -> Result<Vec<TableCount>> {
        self.with_working(|_, working| {
            Ok(working
                .violations
                .iter()
                .map(|(table, rows)| TableCount {
                    table: table.clone(),
                    count: rows.len() as u64,
                })
                .collect())
        })
    }

    async fn conflict_columns(&mut self, table: &Identifier) -> Result<Vec<Identifier>> {
        self.with_working(|state, _| {
            let schema = state.schema(table.as_str())?;
            let mut names = Vec::new();
            for prefix in ["base_", "our_", "their_"] {
                names.extend(schema.columns.iter().map(|c| format!("{}{}", prefix, c)));
            }
            names.push("our_diff_type".to_string());
            names.push("their_diff_type".to_string());
            names
                .into_iter()
                .map(|name| Identifier::from_schema(name).context("conflict column"))
                .collect()
        })
    }

    async fn conflict_rows(
        &mut self,
        table: &Identifier,
        columns: &[Identifier],
    ) -> Result<Vec<Row>> {
        self.with_working(|_, working| {
            let rows = working.conflicts.get(table.as_str()).cloned().unwrap_or_default();
            Ok(rows
                .into_iter()
                .map(|row| {
                    columns
                        .iter()
                        .map(|c| {
                            let value = row.get(c.as_str()).cloned().unwrap_or(Value::Null);
                            (c.as_str().to_string(), value)
                        })
                        .collect()
                })
                .collect())
        })
    }

    async fn violation_rows(&mut self, table: &Identifier) -> Result<Vec<ViolationRow>> {
        self.with_working(|_, working| {
            Ok(working.violations.get(table.as_str()).cloned().unwrap_or_default())
        })
    }

    async fn get_row(&mut self, table: &Identifier, id: &Value) -> Result<Option<Row>> {
        self.with_working(|state, working| {
            state.schema(table.as_str())?;
            Ok(working
                .tables
                .get(table.as_str())
                .and_then(|rows| rows.get(&id_key(id)))
                .cloned())
        })
    }

    async fn upsert_row(&mut self, table: &Identifier, row: &Row) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let schema = state.schema(table.as_str())?.clone();
        let id = row
            .get("id")
            .filter(|id| !id.is_null())
            .ok_or_else(|| anyhow!("row for '{}' has no id", table))?;
        if let Some(column) = row.keys().find(|k| !schema.columns.contains(k)) {
            bail!("unknown column '{}' for table '{}'", column, table);
        }

        let mut tables = state.branch(&self.current)?.working.tables.clone();
        tables
            .entry(table.as_str().to_string())
            .or_default()
            .insert(id_key(id), row.clone());
        let violations = constraint_violations(&state.schemas, &tables);
        if let Some(violated) = violations.keys().next() {
            bail!("write to '{}' violates a constraint on '{}'", table, violated);
        }
        state.branch_mut(&self.current)?.working.tables = tables;
        Ok(())
    }

    async fn delete_row(&mut self, table: &Identifier, id: &Value) -> Result<bool> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.schema(table.as_str())?;
        let mut tables = state.branch(&self.current)?.working.tables.clone();
        let removed = tables
            .get_mut(table.as_str())
            .and_then(|rows| rows.remove(&id_key(id)))
            .is_some();
        let violations = constraint_violations(&state.schemas, &tables);
        if let Some(violated) = violations.keys().next() {
            bail!("delete from '{}' is still referenced by '{}'", table, violated);
        }
        state.branch_mut(&self.current)?.working.tables = tables;
        Ok(removed)
    }

    async fn fetch_display(
        &mut self,
        table: &Identifier,
        id: &Value,
        field: &Identifier,
    ) -> Result<Option<String>> {
        self.with_working(|_, working| {
            let value = working
                .tables
                .get(table.as_str())
                .and_then(|rows| rows.get(&id_key(id)))
                .and_then(|row| row.get(field.as_str()));
            Ok(match value {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) => Some(s.clone()),
                Some(other) => Some(other.to_string()),
            })
        })
    }

    async fn branch_meta(&mut self, branch: &str) -> Result<Option<BranchMeta>> {
        Ok(self.state.lock().meta.get(branch).cloned())
    }

    async fn save_branch_meta(&mut self, meta: &BranchMeta) -> Result<()> {
        self.state.lock().meta.insert(meta.branch.clone(), meta.clone());
        Ok(())
    }

    async fn delete_branch_meta(&mut self, branch: &str) -> Result<()> {
        self.state.lock().meta.remove(branch);
        Ok(())
    }
}
