//! PostgreSQL registry
//!
//! Implements [`Registry`] with SQLx. Multi-row writes run in a single
//! transaction; digests are stored as 32-byte `BYTEA`.

use crate::models::*;
use crate::registry::{check_tiling, Registry};
use crate::{MetadataError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument};
use xorbhub_core::ContentHash;

/// Database error types
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Invalid data: {0}")]
    Invalid(String),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/xorbhub".to_string(),
            max_connections: 10,
            min_connections: 2,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

// =========================================================================
// ROW MAPPING
// =========================================================================

#[derive(FromRow)]
struct FileRow {
    id: i64,
    path: String,
    content_hash: String,
    size: i64,
    lfs: bool,
    is_deleted: bool,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct BlockRow {
    id: i64,
    hash: Vec<u8>,
    size: i64,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct XorbRow {
    id: i64,
    xorb_id: Vec<u8>,
    storage_key: String,
    size: i64,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct ShardRow {
    id: i64,
    shard_id: Vec<u8>,
    storage_key: String,
    size: i64,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct PlacementRow {
    block_hash: Vec<u8>,
    xorb_hash: Vec<u8>,
    storage_key: String,
    offset: i64,
    length: i64,
}

fn digest(raw: &[u8]) -> Result<ContentHash> {
    ContentHash::from_slice(raw).map_err(|e| DbError::Invalid(e.to_string()).into())
}

fn unsigned(v: i64) -> u64 {
    v.max(0) as u64
}

fn signed(v: u64) -> Result<i64> {
    i64::try_from(v).map_err(|_| MetadataError::Invalid(format!("{} exceeds BIGINT", v)))
}

impl From<FileRow> for FileRecord {
    fn from(row: FileRow) -> Self {
        Self {
            id: row.id,
            path: row.path,
            content_hash: row.content_hash,
            size: unsigned(row.size),
            lfs: row.lfs,
            is_deleted: row.is_deleted,
            created_at: row.created_at,
        }
    }
}

impl TryFrom<BlockRow> for BlockRecord {
    type Error = MetadataError;

    fn try_from(row: BlockRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            hash: digest(&row.hash)?,
            size: unsigned(row.size),
            created_at: row.created_at,
        })
    }
}

impl TryFrom<XorbRow> for XorbRecord {
    type Error = MetadataError;

    fn try_from(row: XorbRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            xorb_id: digest(&row.xorb_id)?,
            storage_key: row.storage_key,
            size: unsigned(row.size),
            created_at: row.created_at,
        })
    }
}

impl TryFrom<ShardRow> for ShardRecord {
    type Error = MetadataError;

    fn try_from(row: ShardRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            shard_id: digest(&row.shard_id)?,
            storage_key: row.storage_key,
            size: unsigned(row.size),
            created_at: row.created_at,
        })
    }
}

const FILE_COLUMNS: &str = "id, path, content_hash, size, lfs, is_deleted, created_at";

const UPSERT_BLOCK: &str = r#"
    INSERT INTO blocks (hash, size) VALUES ($1, $2)
    ON CONFLICT (hash) DO UPDATE
        SET size = CASE WHEN blocks.size = 0 THEN EXCLUDED.size ELSE blocks.size END
    RETURNING id, hash, size, created_at
"#;

const PLACEMENT_SELECT: &str = r#"
    SELECT b.hash AS block_hash, x.xorb_id AS xorb_hash, x.storage_key,
           p."offset" AS "offset", p.length
    FROM block_placements p
    JOIN blocks b ON b.id = p.block_id
    JOIN xorbs x ON x.id = p.xorb_id
"#;

/// PostgreSQL-backed registry
#[derive(Clone)]
pub struct PostgresRegistry {
    pool: PgPool,
}

impl PostgresRegistry {
    /// Create a new database connection pool
    pub async fn new(config: DbConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(config.idle_timeout)
            .connect(&config.url)
            .await?;

        info!("Connected to PostgreSQL database");
        Ok(Self { pool })
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(DbError::from)?;
        info!("Database migrations complete");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Registry for PostgresRegistry {
    // =========================================================================
    // FILE OPERATIONS
    // =========================================================================

    #[instrument(skip(self, file), fields(path = %file.path))]
    async fn upsert_file(&self, file: NewFile) -> Result<FileRecord> {
        let mut tx = self.pool.begin().await?;

        // A changed content hash invalidates the previous layout
        sqlx::query(
            r#"
            DELETE FROM file_layouts
            WHERE file_id IN (SELECT id FROM files WHERE path = $1 AND content_hash <> $2)
            "#,
        )
        .bind(&file.path)
        .bind(&file.content_hash)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, FileRow>(&format!(
            r#"
            INSERT INTO files (path, content_hash, size, lfs, is_deleted)
            VALUES ($1, $2, $3, $4, FALSE)
            ON CONFLICT (path) DO UPDATE
                SET content_hash = EXCLUDED.content_hash,
                    size = EXCLUDED.size,
                    lfs = EXCLUDED.lfs,
                    is_deleted = FALSE
            RETURNING {}
            "#,
            FILE_COLUMNS
        ))
        .bind(&file.path)
        .bind(&file.content_hash)
        .bind(signed(file.size)?)
        .bind(file.lfs)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(file_id = row.id, "File upserted");
        Ok(row.into())
    }

    async fn mark_file_deleted(&self, path: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE files SET is_deleted = TRUE WHERE path = $1 AND NOT is_deleted")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_file_by_hash(&self, content_hash: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {} FROM files WHERE content_hash = $1 AND NOT is_deleted ORDER BY id LIMIT 1",
            FILE_COLUMNS
        ))
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn files_pending_chunking(&self, limit: usize) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRow>(&format!(
            r#"
            SELECT {} FROM files f
            WHERE f.lfs AND NOT f.is_deleted AND f.size > 0
              AND NOT EXISTS (SELECT 1 FROM file_layouts l WHERE l.file_id = f.id)
            ORDER BY f.id
            LIMIT $1
            "#,
            FILE_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    // =========================================================================
    // BLOCK OPERATIONS
    // =========================================================================

    async fn get_block(&self, hash: &ContentHash) -> Result<Option<BlockRecord>> {
        sqlx::query_as::<_, BlockRow>("SELECT id, hash, size, created_at FROM blocks WHERE hash = $1")
            .bind(hash.as_bytes().as_slice())
            .fetch_optional(&self.pool)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn get_or_create_block(&self, block: NewBlock) -> Result<BlockRecord> {
        sqlx::query_as::<_, BlockRow>(UPSERT_BLOCK)
            .bind(block.hash.as_bytes().as_slice())
            .bind(signed(block.size)?)
            .fetch_one(&self.pool)
            .await?
            .try_into()
    }

    async fn unplaced_blocks(&self, limit: usize) -> Result<Vec<BlockRecord>> {
        sqlx::query_as::<_, BlockRow>(
            r#"
            SELECT b.id, b.hash, b.size, b.created_at FROM blocks b
            LEFT JOIN block_placements p ON p.block_id = b.id
            WHERE p.block_id IS NULL AND b.size > 0
            ORDER BY b.id
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TryInto::try_into)
        .collect()
    }

    // =========================================================================
    // LAYOUT OPERATIONS
    // =========================================================================

    async fn has_layout(&self, file_id: i64) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM file_layouts WHERE file_id = $1)")
                .bind(file_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    #[instrument(skip(self, blocks), fields(blocks = blocks.len()))]
    async fn commit_file_layout(&self, file_id: i64, blocks: &[NewBlock]) -> Result<LayoutCommit> {
        if blocks.is_empty() {
            return Err(MetadataError::Invalid("empty layout".into()));
        }
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent chunkers of the same file
        let locked: Option<i64> = sqlx::query_scalar("SELECT id FROM files WHERE id = $1 FOR UPDATE")
            .bind(file_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            tx.rollback().await?;
            return Err(MetadataError::NotFound(format!("file {}", file_id)));
        }

        let chunked: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM file_layouts WHERE file_id = $1)")
                .bind(file_id)
                .fetch_one(&mut *tx)
                .await?;
        if chunked {
            tx.rollback().await?;
            return Ok(LayoutCommit::AlreadyChunked);
        }

        for (seq, block) in blocks.iter().enumerate() {
            let row = sqlx::query_as::<_, BlockRow>(UPSERT_BLOCK)
                .bind(block.hash.as_bytes().as_slice())
                .bind(signed(block.size)?)
                .fetch_one(&mut *tx)
                .await?;
            sqlx::query("INSERT INTO file_layouts (file_id, block_id, sequence_order) VALUES ($1, $2, $3)")
                .bind(file_id)
                .bind(row.id)
                .bind(seq as i32)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        debug!(file_id, blocks = blocks.len(), "File layout committed");
        Ok(LayoutCommit::Committed {
            blocks: blocks.len(),
        })
    }

    async fn file_layout(&self, file_id: i64) -> Result<Vec<LayoutEntry>> {
        #[derive(FromRow)]
        struct Row {
            sequence_order: i32,
            #[sqlx(flatten)]
            block: BlockRow,
        }

        sqlx::query_as::<_, Row>(
            r#"
            SELECT l.sequence_order, b.id, b.hash, b.size, b.created_at
            FROM file_layouts l JOIN blocks b ON b.id = l.block_id
            WHERE l.file_id = $1
            ORDER BY l.sequence_order
            "#,
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| {
            Ok(LayoutEntry {
                sequence: row.sequence_order as u32,
                block: row.block.try_into()?,
            })
        })
        .collect()
    }

    // =========================================================================
    // XORB & PLACEMENT OPERATIONS
    // =========================================================================

    #[instrument(skip(self, xorb, placements), fields(xorb = %xorb.xorb_id, blocks = placements.len()))]
    async fn seal_xorb(&self, xorb: NewXorb, placements: &[NewPlacement]) -> Result<XorbRecord> {
        check_tiling(&xorb, placements)?;
        let mut tx = self.pool.begin().await?;

        let record: XorbRecord = sqlx::query_as::<_, XorbRow>(
            r#"
            INSERT INTO xorbs (xorb_id, storage_key, size) VALUES ($1, $2, $3)
            ON CONFLICT (xorb_id) DO UPDATE SET storage_key = xorbs.storage_key
            RETURNING id, xorb_id, storage_key, size, created_at
            "#,
        )
        .bind(xorb.xorb_id.as_bytes().as_slice())
        .bind(&xorb.storage_key)
        .bind(signed(xorb.size)?)
        .fetch_one(&mut *tx)
        .await?
        .try_into()?;

        for p in placements {
            let block_id: Option<i64> = sqlx::query_scalar("SELECT id FROM blocks WHERE hash = $1 FOR UPDATE")
                .bind(p.block.as_bytes().as_slice())
                .fetch_optional(&mut *tx)
                .await?;
            let Some(block_id) = block_id else {
                tx.rollback().await?;
                return Err(MetadataError::Conflict(format!("unknown block {}", p.block)));
            };

            let inserted = sqlx::query(
                r#"
                INSERT INTO block_placements (block_id, xorb_id, "offset", length)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (block_id) DO NOTHING
                "#,
            )
            .bind(block_id)
            .bind(record.id)
            .bind(signed(p.offset)?)
            .bind(signed(p.length)?)
            .execute(&mut *tx)
            .await?;
            if inserted.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(MetadataError::Conflict(format!("block {} already placed", p.block)));
            }
        }

        tx.commit().await?;
        debug!(xorb = %record.xorb_id, size = record.size, "Xorb sealed");
        Ok(record)
    }

    async fn placement_for_block(&self, hash: &ContentHash) -> Result<Option<ResolvedPlacement>> {
        let row = sqlx::query_as::<_, PlacementRow>(&format!("{} WHERE b.hash = $1", PLACEMENT_SELECT))
            .bind(hash.as_bytes().as_slice())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            Ok(ResolvedPlacement {
                xorb_id: digest(&r.xorb_hash)?,
                storage_key: r.storage_key,
                offset: unsigned(r.offset),
                length: unsigned(r.length),
            })
        })
        .transpose()
    }

    async fn placement_snapshot(&self) -> Result<Vec<PlacementView>> {
        let rows = sqlx::query_as::<_, PlacementRow>(&format!("{} ORDER BY b.id", PLACEMENT_SELECT))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| match (digest(&r.block_hash), digest(&r.xorb_hash)) {
                (Ok(block), Ok(xorb_id)) => Some(PlacementView {
                    block,
                    xorb_id,
                    offset: unsigned(r.offset),
                    length: unsigned(r.length),
                }),
                (Err(e), _) | (_, Err(e)) => {
                    error!(error = %e, "Skipping placement with malformed digest");
                    None
                }
            })
            .collect())
    }

    // =========================================================================
    // SHARD OPERATIONS
    // =========================================================================

    async fn register_shard(&self, shard: NewShard) -> Result<(ShardRecord, bool)> {
        let inserted = sqlx::query_as::<_, ShardRow>(
            r#"
            INSERT INTO shards (shard_id, storage_key, size) VALUES ($1, $2, $3)
            ON CONFLICT (shard_id) DO NOTHING
            RETURNING id, shard_id, storage_key, size, created_at
            "#,
        )
        .bind(shard.shard_id.as_bytes().as_slice())
        .bind(&shard.storage_key)
        .bind(signed(shard.size)?)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(row) => Ok((row.try_into()?, true)),
            None => {
                let existing = self
                    .get_shard(&shard.shard_id)
                    .await?
                    .ok_or_else(|| MetadataError::NotFound(format!("shard {}", shard.shard_id)))?;
                Ok((existing, false))
            }
        }
    }

    async fn get_shard(&self, shard_id: &ContentHash) -> Result<Option<ShardRecord>> {
        sqlx::query_as::<_, ShardRow>(
            "SELECT id, shard_id, storage_key, size, created_at FROM shards WHERE shard_id = $1",
        )
        .bind(shard_id.as_bytes().as_slice())
        .fetch_optional(&self.pool)
        .await?
        .map(TryInto::try_into)
        .transpose()
    }

    async fn small_shards(&self, threshold: u64) -> Result<Vec<ShardRecord>> {
        sqlx::query_as::<_, ShardRow>(
            "SELECT id, shard_id, storage_key, size, created_at FROM shards WHERE size < $1 ORDER BY id",
        )
        .bind(signed(threshold)?)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TryInto::try_into)
        .collect()
    }

    async fn delete_shard(&self, shard_id: &ContentHash) -> Result<bool> {
        let result = sqlx::query("DELETE FROM shards WHERE shard_id = $1")
            .bind(shard_id.as_bytes().as_slice())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // STATISTICS
    // =========================================================================

    async fn stats(&self) -> Result<RegistryStats> {
        #[derive(FromRow)]
        struct Row {
            block_count: i64,
            block_bytes: i64,
            placed_blocks: i64,
            xorb_count: i64,
            xorb_bytes: i64,
            shard_count: i64,
            shard_bytes: i64,
            chunked_files: i64,
        }

        let row = sqlx::query_as::<_, Row>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM blocks) AS block_count,
                (SELECT COALESCE(SUM(size), 0)::BIGINT FROM blocks) AS block_bytes,
                (SELECT COUNT(*) FROM block_placements) AS placed_blocks,
                (SELECT COUNT(*) FROM xorbs) AS xorb_count,
                (SELECT COALESCE(SUM(size), 0)::BIGINT FROM xorbs) AS xorb_bytes,
                (SELECT COUNT(*) FROM shards) AS shard_count,
                (SELECT COALESCE(SUM(size), 0)::BIGINT FROM shards) AS shard_bytes,
                (SELECT COUNT(DISTINCT file_id) FROM file_layouts) AS chunked_files
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(RegistryStats {
            block_count: unsigned(row.block_count),
            block_bytes: unsigned(row.block_bytes),
            placed_blocks: unsigned(row.placed_blocks),
            xorb_count: unsigned(row.xorb_count),
            xorb_bytes: unsigned(row.xorb_bytes),
            shard_count: unsigned(row.shard_count),
            shard_bytes: unsigned(row.shard_bytes),
            chunked_files: unsigned(row.chunked_files),
        })
    }

    async fn block_size_distribution(&self) -> Result<SizeDistribution> {
        #[derive(FromRow)]
        struct Row {
            under_1mb: i64,
            mb1_to_4: i64,
            mb4_to_8: i64,
            over_8mb: i64,
        }

        let row = sqlx::query_as::<_, Row>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE size < 1048576) AS under_1mb,
                COUNT(*) FILTER (WHERE size >= 1048576 AND size < 4194304) AS mb1_to_4,
                COUNT(*) FILTER (WHERE size >= 4194304 AND size < 8388608) AS mb4_to_8,
                COUNT(*) FILTER (WHERE size >= 8388608) AS over_8mb
            FROM blocks
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(SizeDistribution {
            under_1mb: unsigned(row.under_1mb),
            mb1_to_4: unsigned(row.mb1_to_4),
            mb4_to_8: unsigned(row.mb4_to_8),
            over_8mb: unsigned(row.over_8mb),
        })
    }
}
