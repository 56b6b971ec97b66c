//! LibSQL storage backend implementation
//!
//! Persists triples, feedback and archived rows in a local libSQL database.
//! Multi-row mutations run inside a transaction that is rolled back on the
//! first error.

use crate::error::{QualityError, Result};
use crate::storage::{MergeOutcome, TripleStore};
use crate::types::{
    FeedbackAction, FeedbackKind, FeedbackRecord, NewTriple, Triple, TripleFilter, TripleId,
    ValidatedBy,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{params, params_from_iter, Builder, Connection, Database, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Embedded schema migrations, applied in order
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_initial_schema.sql",
        include_str!("../../migrations/libsql/001_initial_schema.sql"),
    ),
    (
        "002_add_indexes.sql",
        include_str!("../../migrations/libsql/002_add_indexes.sql"),
    ),
];

const TRIPLE_COLUMNS: &str =
    "id, subject, predicate, object, confidence, validated_by, created_at, updated_at";

/// Parse SQL file into individual statements
fn parse_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();

        if current.is_empty() && (trimmed.is_empty() || trimmed.starts_with("--")) {
            continue;
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);

        if trimmed.ends_with(';') {
            statements.push(current.clone());
            current.clear();
        }
    }

    if !current.trim().is_empty() {
        statements.push(current);
    }

    statements
}

/// Timestamps are stored as fixed-width RFC 3339 UTC strings so that
/// lexical comparison in SQL matches chronological order.
pub(crate) fn to_db_time(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_db_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| QualityError::Database(format!("Invalid timestamp '{}': {}", s, e)))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn id_values(ids: &[TripleId]) -> Vec<Value> {
    ids.iter().map(|id| Value::Integer(id.0)).collect()
}

/// LibSQL storage backend
pub struct LibsqlStore {
    db: Database,
    path: String,
    ready: OnceCell<()>,
}

impl LibsqlStore {
    /// Open (creating if missing) a local database and apply migrations
    pub async fn connect(path: &str) -> Result<Self> {
        info!("Opening triple store at {}", path);

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    QualityError::StoreUnavailable(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let db = Builder::new_local(path).build().await.map_err(|e| {
            QualityError::StoreUnavailable(format!("Failed to open database {}: {}", path, e))
        })?;

        let store = Self {
            db,
            path: path.to_string(),
            ready: OnceCell::new(),
        };
        store.ensure_ready().await?;
        Ok(store)
    }

    /// Path of the underlying database file
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Apply pending migrations once per process; later calls are no-ops
    pub async fn ensure_ready(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| self.run_migrations())
            .await
            .map(|_| ())
    }

    async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations...");
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations_applied (
                migration_name TEXT PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )",
            params![],
        )
        .await
        .map_err(|e| QualityError::Migration(format!("Failed to create migrations table: {}", e)))?;

        for (name, sql) in MIGRATIONS {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM _migrations_applied WHERE migration_name = ?",
                    params![*name],
                )
                .await?;
            let applied = match rows.next().await? {
                Some(row) => row.get::<i64>(0).unwrap_or(0),
                None => 0,
            };
            if applied > 0 {
                debug!("Skipping already applied migration: {}", name);
                continue;
            }

            for (i, statement) in parse_sql_statements(sql).iter().enumerate() {
                conn.execute(statement.trim(), params![]).await.map_err(|e| {
                    QualityError::Migration(format!(
                        "Failed to execute statement #{} in {}: {}",
                        i + 1,
                        name,
                        e
                    ))
                })?;
            }

            conn.execute(
                "INSERT INTO _migrations_applied (migration_name, applied_at) VALUES (?, ?)",
                params![*name, Utc::now().timestamp()],
            )
            .await
            .map_err(|e| QualityError::Migration(format!("Failed to record migration: {}", e)))?;

            info!("Executed migration: {}", name);
        }

        info!("Database migrations completed");
        Ok(())
    }

    /// Get a connection from the database
    fn get_conn(&self) -> Result<Connection> {
        let conn = self
            .db
            .connect()
            .map_err(|e| {
                QualityError::StoreUnavailable(format!("Failed to get connection: {}", e))
            })?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Insert a triple with explicit timestamps (imports and backfills)
    pub async fn insert_at(
        &self,
        triple: &NewTriple,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Triple> {
        triple.validate()?;

        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO triples (subject, predicate, object, confidence, validated_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                triple.subject.clone(),
                triple.predicate.clone(),
                triple.object.clone(),
                triple.confidence,
                triple.validated_by.as_str(),
                to_db_time(created_at),
                to_db_time(updated_at),
            ],
        )
        .await?;

        let id = TripleId(conn.last_insert_rowid());
        debug!("Inserted triple {}", id);
        Self::fetch(&conn, id).await
    }

    fn row_to_triple(row: &libsql::Row) -> Result<Triple> {
        let validated_by: String = row.get(5)?;
        let created_at: String = row.get(6)?;
        let updated_at: String = row.get(7)?;

        Ok(Triple {
            id: TripleId(row.get::<i64>(0)?),
            subject: row.get(1)?,
            predicate: row.get(2)?,
            object: row.get(3)?,
            confidence: row.get::<f64>(4)?,
            validated_by: validated_by.parse::<ValidatedBy>()?,
            created_at: from_db_time(&created_at)?,
            updated_at: from_db_time(&updated_at)?,
        })
    }

    fn row_to_feedback(row: &libsql::Row) -> Result<FeedbackRecord> {
        let action: String = row.get(2)?;
        let created_at: String = row.get(5)?;

        Ok(FeedbackRecord {
            id: row.get::<i64>(0)?,
            triple_id: TripleId(row.get::<i64>(1)?),
            action: action.parse::<FeedbackKind>()?,
            confidence: row.get::<f64>(3)?,
            notes: row.get(4)?,
            created_at: from_db_time(&created_at)?,
        })
    }

    async fn collect_triples(mut rows: libsql::Rows) -> Result<Vec<Triple>> {
        let mut triples = Vec::new();
        while let Some(row) = rows.next().await? {
            triples.push(Self::row_to_triple(&row)?);
        }
        Ok(triples)
    }

    async fn fetch(conn: &Connection, id: TripleId) -> Result<Triple> {
        let mut rows = conn
            .query(
                &format!("SELECT {} FROM triples WHERE id = ?", TRIPLE_COLUMNS),
                params![id.0],
            )
            .await?;

        let row = rows
            .next()
            .await?
            .ok_or_else(|| QualityError::NotFound(format!("triple {}", id)))?;
        Self::row_to_triple(&row)
    }

    async fn scalar_count(conn: &Connection, sql: &str, args: Vec<Value>) -> Result<usize> {
        let mut rows = conn.query(sql, params_from_iter(args)).await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(count.max(0) as usize)
    }

    async fn feedback_in_tx(
        conn: &Connection,
        id: TripleId,
        action: FeedbackAction,
        approve_boost: f64,
        notes: Option<&str>,
    ) -> Result<Option<Triple>> {
        let current = Self::fetch(conn, id).await?;
        let now = to_db_time(Utc::now());

        let new_confidence = match action {
            FeedbackAction::Reject => {
                conn.execute("DELETE FROM triples WHERE id = ?", params![id.0])
                    .await?;
                return Ok(None);
            }
            FeedbackAction::Approve => (current.confidence + approve_boost).min(1.0),
            FeedbackAction::Adjust(value) => value,
        };

        conn.execute(
            "UPDATE triples SET confidence = ?, validated_by = ?, updated_at = ? WHERE id = ?",
            params![new_confidence, ValidatedBy::User.as_str(), now.clone(), id.0],
        )
        .await?;

        if let Some(notes) = notes.filter(|n| !n.trim().is_empty()) {
            conn.execute(
                r#"
                INSERT INTO feedback (triple_id, action, confidence, notes, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
                params![id.0, action.kind().as_str(), new_confidence, notes, now],
            )
            .await?;
        }

        Self::fetch(conn, id).await.map(Some)
    }

    async fn merge_in_tx(conn: &Connection, ids: &[TripleId]) -> Result<MergeOutcome> {
        let mut group = Vec::with_capacity(ids.len());
        for id in ids {
            group.push(Self::fetch(conn, *id).await?);
        }

        let key = group[0].duplicate_key();
        if group.iter().any(|t| t.duplicate_key() != key) {
            return Err(QualityError::InvalidRequest(
                "triples do not share subject, predicate and object".to_string(),
            ));
        }

        // The oldest row keeps its id; it inherits the best confidence and
        // the provenance that came with it.
        let survivor_id = ids[0];
        let best = group
            .iter()
            .max_by(|a, b| {
                a.confidence
                    .total_cmp(&b.confidence)
                    .then_with(|| b.id.cmp(&a.id))
            })
            .cloned()
            .ok_or_else(|| QualityError::InvalidRequest("empty merge group".to_string()))?;

        conn.execute(
            "UPDATE triples SET confidence = ?, validated_by = ?, updated_at = ? WHERE id = ?",
            params![
                best.confidence,
                best.validated_by.as_str(),
                to_db_time(Utc::now()),
                survivor_id.0
            ],
        )
        .await?;

        let removed: Vec<TripleId> = ids[1..].to_vec();

        let mut args = vec![Value::Integer(survivor_id.0)];
        args.extend(id_values(&removed));
        let feedback_moved = conn
            .execute(
                &format!(
                    "UPDATE feedback SET triple_id = ? WHERE triple_id IN ({})",
                    placeholders(removed.len())
                ),
                params_from_iter(args),
            )
            .await? as usize;

        conn.execute(
            &format!(
                "DELETE FROM triples WHERE id IN ({})",
                placeholders(removed.len())
            ),
            params_from_iter(id_values(&removed)),
        )
        .await?;

        let survivor = Self::fetch(conn, survivor_id).await?;
        Ok(MergeOutcome {
            survivor,
            removed,
            feedback_moved,
        })
    }

    async fn archive_in_tx(conn: &Connection, threshold: f64, cutoff: &str) -> Result<usize> {
        let archived = conn
            .execute(
                &format!(
                    r#"
                    INSERT OR REPLACE INTO triples_archive ({cols}, archived_at)
                    SELECT {cols}, ? FROM triples WHERE confidence < ? AND updated_at < ?
                    "#,
                    cols = TRIPLE_COLUMNS
                ),
                params![to_db_time(Utc::now()), threshold, cutoff],
            )
            .await?;

        conn.execute(
            "DELETE FROM triples WHERE confidence < ? AND updated_at < ?",
            params![threshold, cutoff],
        )
        .await?;

        Ok(archived as usize)
    }

    /// Commit on success, roll back on failure
    async fn finish_tx<T>(tx: libsql::Transaction, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                tx.commit().await.map_err(|e| {
                    let msg = e.to_string();
                    if msg.contains("locked") || msg.contains("busy") {
                        QualityError::Database(
                            "Transaction failed: database is locked by another writer".to_string(),
                        )
                    } else {
                        QualityError::Database(format!("Transaction commit failed: {}", msg))
                    }
                })?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!("Rollback failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl TripleStore for LibsqlStore {
    async fn ping(&self) -> Result<()> {
        let conn = self.get_conn()?;
        conn.query("SELECT 1", params![])
            .await
            .map_err(|e| QualityError::StoreUnavailable(format!("Health query failed: {}", e)))?;
        Ok(())
    }

    async fn insert(&self, triple: &NewTriple) -> Result<Triple> {
        let now = Utc::now();
        self.insert_at(triple, now, now).await
    }

    async fn get(&self, id: TripleId) -> Result<Triple> {
        let conn = self.get_conn()?;
        Self::fetch(&conn, id).await
    }

    async fn query(&self, filter: &TripleFilter) -> Result<Vec<Triple>> {
        let mut clauses = Vec::new();
        let mut args: Vec<Value> = Vec::new();

        for (column, value) in [
            ("subject", &filter.subject),
            ("predicate", &filter.predicate),
            ("object", &filter.object),
        ] {
            if let Some(v) = value {
                clauses.push(format!("{} = ?", column));
                args.push(Value::Text(v.clone()));
            }
        }
        if let Some(min) = filter.min_confidence {
            clauses.push("confidence >= ?".to_string());
            args.push(Value::Real(min));
        }

        let mut sql = format!("SELECT {} FROM triples", TRIPLE_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY confidence DESC, id ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        debug!("Querying triples: {:?}", filter);
        let conn = self.get_conn()?;
        let rows = conn.query(&sql, params_from_iter(args)).await?;
        Self::collect_triples(rows).await
    }

    async fn since(&self, cutoff: Option<DateTime<Utc>>) -> Result<Vec<Triple>> {
        let conn = self.get_conn()?;
        let rows = match cutoff {
            Some(cutoff) => {
                conn.query(
                    &format!(
                        "SELECT {} FROM triples WHERE created_at >= ? ORDER BY created_at ASC, id ASC",
                        TRIPLE_COLUMNS
                    ),
                    params![to_db_time(cutoff)],
                )
                .await?
            }
            None => {
                conn.query(
                    &format!(
                        "SELECT {} FROM triples ORDER BY created_at ASC, id ASC",
                        TRIPLE_COLUMNS
                    ),
                    params![],
                )
                .await?
            }
        };
        Self::collect_triples(rows).await
    }

    async fn count(&self) -> Result<usize> {
        let conn = self.get_conn()?;
        Self::scalar_count(&conn, "SELECT COUNT(*) FROM triples", vec![]).await
    }

    async fn count_below(&self, threshold: f64) -> Result<usize> {
        let conn = self.get_conn()?;
        Self::scalar_count(
            &conn,
            "SELECT COUNT(*) FROM triples WHERE confidence < ?",
            vec![Value::Real(threshold)],
        )
        .await
    }

    async fn count_stale(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.get_conn()?;
        Self::scalar_count(
            &conn,
            "SELECT COUNT(*) FROM triples WHERE updated_at < ?",
            vec![Value::Text(to_db_time(cutoff))],
        )
        .await
    }

    async fn find_duplicate_groups(&self, limit: usize) -> Result<Vec<Vec<Triple>>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {cols} FROM triples t
            JOIN (
                SELECT lower(trim(subject)) AS s, lower(trim(predicate)) AS p, lower(trim(object)) AS o
                FROM triples
                GROUP BY s, p, o
                HAVING COUNT(*) > 1
                ORDER BY COUNT(*) DESC, s, p, o
                LIMIT ?
            ) d
            ON lower(trim(t.subject)) = d.s AND lower(trim(t.predicate)) = d.p AND lower(trim(t.object)) = d.o
            ORDER BY t.id ASC
            "#,
            cols = TRIPLE_COLUMNS
                .split(", ")
                .map(|c| format!("t.{}", c))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let rows = conn.query(&sql, params![limit as i64]).await?;
        let triples = Self::collect_triples(rows).await?;

        let mut grouped: BTreeMap<(String, String, String), Vec<Triple>> = BTreeMap::new();
        for triple in triples {
            grouped.entry(triple.duplicate_key()).or_default().push(triple);
        }

        let groups: Vec<Vec<Triple>> = grouped
            .into_values()
            .filter(|g| g.len() > 1)
            .collect();
        debug!("Found {} duplicate groups", groups.len());
        Ok(groups)
    }

    async fn apply_feedback(
        &self,
        id: TripleId,
        action: FeedbackAction,
        approve_boost: f64,
        notes: Option<&str>,
    ) -> Result<Option<Triple>> {
        let conn = self.get_conn()?;
        let tx = conn.transaction().await?;
        let result = Self::feedback_in_tx(&tx, id, action, approve_boost, notes).await;
        Self::finish_tx(tx, result).await
    }

    async fn list_feedback(&self, id: TripleId) -> Result<Vec<FeedbackRecord>> {
        let conn = self.get_conn()?;
        let mut rows = conn
            .query(
                r#"
                SELECT id, triple_id, action, confidence, notes, created_at
                FROM feedback WHERE triple_id = ?
                ORDER BY created_at ASC, id ASC
                "#,
                params![id.0],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::row_to_feedback(&row)?);
        }
        Ok(records)
    }

    async fn decay_outdated(&self, cutoff: DateTime<Utc>, rate: f64) -> Result<usize> {
        // Decay is not a re-validation, so updated_at is left alone and the
        // triple keeps decaying on later passes until refreshed.
        let conn = self.get_conn()?;
        let tx = conn.transaction().await?;
        let result = tx
            .execute(
                "UPDATE triples SET confidence = MAX(0.0, confidence - ?) WHERE updated_at < ? AND confidence > 0.0",
                params![rate, to_db_time(cutoff)],
            )
            .await
            .map(|n| n as usize)
            .map_err(QualityError::from);
        Self::finish_tx(tx, result).await
    }

    async fn delete_low_confidence(&self, threshold: f64) -> Result<usize> {
        let conn = self.get_conn()?;
        let tx = conn.transaction().await?;
        let result = tx
            .execute(
                "DELETE FROM triples WHERE confidence < ?",
                params![threshold],
            )
            .await
            .map(|n| n as usize)
            .map_err(QualityError::from);
        Self::finish_tx(tx, result).await
    }

    async fn merge_duplicates(&self, ids: &[TripleId]) -> Result<MergeOutcome> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();
        if ids.len() < 2 {
            return Err(QualityError::InvalidRequest(
                "merge requires at least two distinct triple ids".to_string(),
            ));
        }

        let conn = self.get_conn()?;
        let tx = conn.transaction().await?;
        let result = Self::merge_in_tx(&tx, &ids).await;
        Self::finish_tx(tx, result).await
    }

    async fn archive(&self, threshold: f64, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.get_conn()?;
        let tx = conn.transaction().await?;
        let result = Self::archive_in_tx(&tx, threshold, &to_db_time(cutoff)).await;
        Self::finish_tx(tx, result).await
    }
}
