//! PostgreSQL graph store.
//!
//! Every crawl-path mutation is a single upsert statement (or one short
//! transaction), so concurrent workers never lose an increment. Deadlocks and
//! serialization failures are retried here and surface as
//! [`StoreError::Contention`] only when they keep recurring.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::error::{StoreError, StoreResult};
use crate::traits::{GraphCatalog, GraphStore};
use crate::types::*;

const MAX_ATTEMPTS: u32 = 5;

const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const UNIQUE_VIOLATION: &str = "23505";

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS channels (
        id BIGINT PRIMARY KEY,
        title TEXT NOT NULL,
        username TEXT,
        date TIMESTAMPTZ,
        discovered_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_channels_username ON channels (lower(username))",
    r#"
    CREATE TABLE IF NOT EXISTS channel_frontier (
        channel_id BIGINT PRIMARY KEY,
        enqueued_at TIMESTAMPTZ NOT NULL,
        seq BIGSERIAL NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_channel_frontier_order ON channel_frontier (enqueued_at, seq)",
    r#"
    CREATE TABLE IF NOT EXISTS channel_edges (
        origin_id BIGINT NOT NULL REFERENCES channels (id),
        destination_id BIGINT NOT NULL REFERENCES channels (id),
        bucket TEXT NOT NULL CHECK (bucket IN ('before', 'after')),
        strength BIGINT NOT NULL CHECK (strength >= 0),
        kind TEXT NOT NULL CHECK (kind IN ('forward', 'link_or_mention')),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (origin_id, destination_id, bucket)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_channel_edges_destination ON channel_edges (destination_id)",
];

const EDGE_COLUMNS: &str = "origin_id, destination_id, bucket, strength, kind, updated_at";
const CHANNEL_COLUMNS: &str = "id, title, username, date, discovered_at";

/// PostgreSQL-backed [`GraphStore`] and [`GraphCatalog`].
#[derive(Clone)]
pub struct PostgresGraphStore {
    pool: PgPool,
}

impl PostgresGraphStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the schema exists.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if missing. Safe to run repeatedly.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

// ============================================================================
// ROWS
// ============================================================================

#[derive(Debug, FromRow)]
struct ChannelRow {
    id: i64,
    title: String,
    username: Option<String>,
    date: Option<DateTime<Utc>>,
    discovered_at: DateTime<Utc>,
}

impl ChannelRow {
    fn into_node(self) -> ChannelNode {
        ChannelNode {
            id: ChannelId(self.id),
            title: self.title,
            username: self.username,
            date: self.date,
            discovered_at: self.discovered_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct EdgeRow {
    origin_id: i64,
    destination_id: i64,
    bucket: String,
    strength: i64,
    kind: String,
    updated_at: DateTime<Utc>,
}

impl EdgeRow {
    fn into_edge(self) -> StoreResult<ChannelEdge> {
        let bucket = self
            .bucket
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("{}", e)))?;
        let kind = self
            .kind
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("{}", e)))?;

        Ok(ChannelEdge {
            origin: ChannelId(self.origin_id),
            destination: ChannelId(self.destination_id),
            bucket,
            strength: self.strength,
            kind,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct FrontierRow {
    channel_id: i64,
    enqueued_at: DateTime<Utc>,
}

impl FrontierRow {
    fn into_entry(self) -> FrontierEntry {
        FrontierEntry {
            channel_id: ChannelId(self.channel_id),
            enqueued_at: self.enqueued_at,
        }
    }
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

fn has_code(err: &sqlx::Error, code: &str) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|c| c == code)
}

fn is_retryable(err: &StoreError) -> bool {
    match err {
        StoreError::Database(e) => {
            has_code(e, SERIALIZATION_FAILURE) || has_code(e, DEADLOCK_DETECTED)
        }
        _ => false,
    }
}

/// Map FK and unique violations onto the domain errors.
fn classify(err: sqlx::Error, entity: &'static str, key: impl fmt::Display) -> StoreError {
    if has_code(&err, FOREIGN_KEY_VIOLATION) {
        StoreError::not_found("channel", key)
    } else if has_code(&err, UNIQUE_VIOLATION) {
        StoreError::conflict(entity, key)
    } else {
        StoreError::Database(err)
    }
}

async fn with_retry<T, F, Fut>(key: impl fmt::Display, mut op: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if is_retryable(&e) => {
                if attempt >= MAX_ATTEMPTS {
                    return Err(StoreError::Contention {
                        key: key.to_string(),
                        attempts: attempt,
                    });
                }
                tracing::debug!(key = %key, attempt, error = %e, "Retrying after store conflict");
                tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

// ============================================================================
// CRAWL PATH
// ============================================================================

#[async_trait]
impl GraphStore for PostgresGraphStore {
    async fn upsert_node(&self, node: &ChannelNode) -> StoreResult<()> {
        let pool = &self.pool;
        with_retry(node.id, move || async move {
            sqlx::query(
                r#"
                INSERT INTO channels (id, title, username, date, discovered_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO UPDATE SET
                    title = EXCLUDED.title,
                    username = EXCLUDED.username,
                    date = EXCLUDED.date
                "#,
            )
            .bind(node.id.0)
            .bind(&node.title)
            .bind(&node.username)
            .bind(node.date)
            .bind(node.discovered_at)
            .execute(pool)
            .await?;
            Ok::<_, StoreError>(())
        })
        .await
    }

    async fn get_node(&self, id: ChannelId) -> StoreResult<Option<ChannelNode>> {
        let row = sqlx::query_as::<_, ChannelRow>(&format!(
            "SELECT {} FROM channels WHERE id = $1",
            CHANNEL_COLUMNS
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ChannelRow::into_node))
    }

    async fn node_exists(&self, id: ChannelId) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM channels WHERE id = $1)")
            .bind(id.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn admit_node(&self, node: &ChannelNode) -> StoreResult<Admission> {
        let pool = &self.pool;
        with_retry(node.id, move || async move {
            let mut tx = pool.begin().await?;

            // xmax = 0 means INSERT, xmax > 0 means UPDATE
            let inserted: bool = sqlx::query_scalar(
                r#"
                INSERT INTO channels (id, title, username, date, discovered_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO UPDATE SET
                    title = EXCLUDED.title,
                    username = EXCLUDED.username,
                    date = EXCLUDED.date
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(node.id.0)
            .bind(&node.title)
            .bind(&node.username)
            .bind(node.date)
            .bind(node.discovered_at)
            .fetch_one(&mut *tx)
            .await?;

            if inserted {
                sqlx::query(
                    r#"
                    INSERT INTO channel_frontier (channel_id, enqueued_at)
                    VALUES ($1, $2)
                    ON CONFLICT (channel_id) DO NOTHING
                    "#,
                )
                .bind(node.id.0)
                .bind(node.discovered_at)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;

            Ok::<_, StoreError>(if inserted {
                Admission::Discovered
            } else {
                Admission::Known
            })
        })
        .await
    }

    async fn enqueue_if_unvisited(&self, id: ChannelId, at: DateTime<Utc>) -> StoreResult<bool> {
        let pool = &self.pool;
        with_retry(id, move || async move {
            let result = sqlx::query(
                r#"
                INSERT INTO channel_frontier (channel_id, enqueued_at)
                SELECT $1, $2
                WHERE NOT EXISTS (SELECT 1 FROM channels WHERE id = $1)
                ON CONFLICT (channel_id) DO NOTHING
                "#,
            )
            .bind(id.0)
            .bind(at)
            .execute(pool)
            .await?;
            Ok::<_, StoreError>(result.rows_affected() == 1)
        })
        .await
    }

    async fn peek_frontier(&self, limit: usize) -> StoreResult<Vec<FrontierEntry>> {
        let rows = sqlx::query_as::<_, FrontierRow>(
            r#"
            SELECT channel_id, enqueued_at
            FROM channel_frontier
            ORDER BY enqueued_at, seq
            LIMIT $1
            "#,
        )
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FrontierRow::into_entry).collect())
    }

    async fn remove_frontier_entry(&self, id: ChannelId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM channel_frontier WHERE channel_id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn frontier_len(&self) -> StoreResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM channel_frontier")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn get_edge(&self, key: &EdgeKey) -> StoreResult<Option<ChannelEdge>> {
        let row = sqlx::query_as::<_, EdgeRow>(&format!(
            "SELECT {} FROM channel_edges WHERE origin_id = $1 AND destination_id = $2 AND bucket = $3",
            EDGE_COLUMNS
        ))
        .bind(key.origin.0)
        .bind(key.destination.0)
        .bind(key.bucket.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(EdgeRow::into_edge).transpose()
    }

    async fn record_edge(
        &self,
        key: &EdgeKey,
        kind: ReferenceKind,
        at: DateTime<Utc>,
    ) -> StoreResult<ChannelEdge> {
        let pool = &self.pool;
        let sql = format!(
            r#"
            INSERT INTO channel_edges ({cols})
            VALUES ($1, $2, $3, 1, $4, $5)
            ON CONFLICT (origin_id, destination_id, bucket) DO UPDATE SET
                strength = channel_edges.strength + 1,
                kind = CASE
                    WHEN EXCLUDED.kind = 'forward' THEN 'forward'
                    ELSE channel_edges.kind
                END,
                updated_at = EXCLUDED.updated_at
            RETURNING {cols}
            "#,
            cols = EDGE_COLUMNS
        );
        let sql = sql.as_str();

        with_retry(key, move || async move {
            let row = sqlx::query_as::<_, EdgeRow>(sql)
                .bind(key.origin.0)
                .bind(key.destination.0)
                .bind(key.bucket.as_str())
                .bind(kind.as_str())
                .bind(at)
                .fetch_one(pool)
                .await
                .map_err(|e| classify(e, "edge", key))?;
            row.into_edge()
        })
        .await
    }
}

// ============================================================================
// CATALOG
// ============================================================================

#[async_trait]
impl GraphCatalog for PostgresGraphStore {
    async fn find_nodes_by_username(
        &self,
        query: &str,
        limit: usize,
    ) -> StoreResult<Vec<ChannelNode>> {
        let rows = sqlx::query_as::<_, ChannelRow>(&format!(
            r#"
            SELECT {}
            FROM channels
            WHERE username ILIKE $1 ESCAPE '\'
            ORDER BY id
            LIMIT $2
            "#,
            CHANNEL_COLUMNS
        ))
        .bind(like_pattern(query))
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ChannelRow::into_node).collect())
    }

    async fn find_nodes_by_title(
        &self,
        query: &str,
        limit: usize,
    ) -> StoreResult<Vec<ChannelNode>> {
        let rows = sqlx::query_as::<_, ChannelRow>(&format!(
            r#"
            SELECT {}
            FROM channels
            WHERE title ILIKE $1 ESCAPE '\'
            ORDER BY id
            LIMIT $2
            "#,
            CHANNEL_COLUMNS
        ))
        .bind(like_pattern(query))
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ChannelRow::into_node).collect())
    }

    async fn list_edges(&self, filter: &EdgeFilter) -> StoreResult<Vec<ChannelEdge>> {
        let column = match filter.direction {
            Direction::Out => "origin_id",
            Direction::In => "destination_id",
        };

        let rows = sqlx::query_as::<_, EdgeRow>(&format!(
            r#"
            SELECT {cols}
            FROM channel_edges
            WHERE {column} = $1
              AND ($2::TEXT IS NULL OR bucket = $2)
              AND ($3::TEXT IS NULL OR kind = $3)
            ORDER BY origin_id, destination_id, bucket
            "#,
            cols = EDGE_COLUMNS,
            column = column
        ))
        .bind(filter.channel.0)
        .bind(filter.bucket.map(|b| b.as_str()))
        .bind(filter.kind.map(|k| k.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EdgeRow::into_edge).collect()
    }

    async fn create_node(&self, node: &ChannelNode) -> StoreResult<ChannelNode> {
        let row = sqlx::query_as::<_, ChannelRow>(&format!(
            r#"
            INSERT INTO channels (id, title, username, date, discovered_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            CHANNEL_COLUMNS
        ))
        .bind(node.id.0)
        .bind(&node.title)
        .bind(&node.username)
        .bind(node.date)
        .bind(node.discovered_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, "channel", node.id))?;

        Ok(row.into_node())
    }

    async fn update_node(&self, node: &ChannelNode) -> StoreResult<ChannelNode> {
        let row = sqlx::query_as::<_, ChannelRow>(&format!(
            r#"
            UPDATE channels
            SET title = $2, username = $3, date = $4
            WHERE id = $1
            RETURNING {}
            "#,
            CHANNEL_COLUMNS
        ))
        .bind(node.id.0)
        .bind(&node.title)
        .bind(&node.username)
        .bind(node.date)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChannelRow::into_node)
            .ok_or_else(|| StoreError::not_found("channel", node.id))
    }

    async fn delete_node(&self, id: ChannelId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM channels WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                // Deleting a referenced row is a conflict, not a missing endpoint
                if has_code(&e, FOREIGN_KEY_VIOLATION) {
                    StoreError::conflict("channel edges", id)
                } else {
                    StoreError::Database(e)
                }
            })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("channel", id));
        }
        Ok(())
    }

    async fn create_edge(&self, edge: &ChannelEdge) -> StoreResult<ChannelEdge> {
        let key = edge.key();
        let row = sqlx::query_as::<_, EdgeRow>(&format!(
            r#"
            INSERT INTO channel_edges ({cols})
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {cols}
            "#,
            cols = EDGE_COLUMNS
        ))
        .bind(edge.origin.0)
        .bind(edge.destination.0)
        .bind(edge.bucket.as_str())
        .bind(edge.strength)
        .bind(edge.kind.as_str())
        .bind(edge.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, "edge", key))?;

        row.into_edge()
    }

    async fn update_edge(&self, key: &EdgeKey, update: &EdgeUpdate) -> StoreResult<ChannelEdge> {
        let row = sqlx::query_as::<_, EdgeRow>(&format!(
            r#"
            UPDATE channel_edges
            SET strength = COALESCE($4, strength),
                kind = COALESCE($5, kind),
                updated_at = NOW()
            WHERE origin_id = $1 AND destination_id = $2 AND bucket = $3
            RETURNING {}
            "#,
            EDGE_COLUMNS
        ))
        .bind(key.origin.0)
        .bind(key.destination.0)
        .bind(key.bucket.as_str())
        .bind(update.strength)
        .bind(update.kind.map(|k| k.as_str()))
        .fetch_optional(&self.pool)
        .await?;

        row.map(EdgeRow::into_edge)
            .transpose()?
            .ok_or_else(|| StoreError::not_found("edge", key))
    }

    async fn delete_edge(&self, key: &EdgeKey) -> StoreResult<()> {
        let result = sqlx::query(
            "DELETE FROM channel_edges WHERE origin_id = $1 AND destination_id = $2 AND bucket = $3",
        )
        .bind(key.origin.0)
        .bind(key.destination.0)
        .bind(key.bucket.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("edge", key));
        }
        Ok(())
    }

    async fn delete_outgoing_edges(&self, origin: ChannelId) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM channel_edges WHERE origin_id = $1")
            .bind(origin.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn push_frontier_entry(&self, entry: &FrontierEntry) -> StoreResult<FrontierEntry> {
        let row = sqlx::query_as::<_, FrontierRow>(
            r#"
            INSERT INTO channel_frontier (channel_id, enqueued_at)
            VALUES ($1, $2)
            RETURNING channel_id, enqueued_at
            "#,
        )
        .bind(entry.channel_id.0)
        .bind(entry.enqueued_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, "frontier entry", entry.channel_id))?;

        Ok(row.into_entry())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("news"), "%news%");
        assert_eq!(like_pattern("a_b%c"), "%a\\_b\\%c%");
        assert_eq!(like_pattern("back\\slash"), "%back\\\\slash%");
    }

    #[test]
    fn test_sql_limit_saturates() {
        assert_eq!(sql_limit(10), 10);
        assert_eq!(sql_limit(usize::MAX), i64::MAX);
    }
}
