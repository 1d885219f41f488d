//! SQLite storage for one owner's collection
//!
//! Each chunk is a single row holding its text, metadata and vector blob, so
//! a committed row is never half-written.

use super::codec::{cosine_similarity, decode_vector, encode_vector};
use crate::error::{RagError, Result};
use crate::types::{DocumentId, EmbeddedChunk, OwnerId, ScoredChunk, StoredChunk};
use chrono::{TimeZone, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use scheduled_thread_pool::ScheduledThreadPool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// File name of the collection database inside the owner directory
pub const INDEX_FILE: &str = "index.sqlite3";

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Connections per collection, opened on demand and closed with the store
const POOL_MAX_SIZE: u32 = 2;

const META_COLLECTION: &str = "collection_name";
const META_DIMENSION: &str = "dimension";

/// Persistent store for one owner's chunks
pub struct CollectionStore {
    pool: DbPool,
    owner: OwnerId,
    db_path: PathBuf,
}

impl CollectionStore {
    /// Open the collection in `dir`, creating the directory and schema if needed.
    ///
    /// Pool maintenance runs on `workers`, which is shared by every collection.
    pub fn open(
        owner: &OwnerId,
        dir: &Path,
        workers: &Arc<ScheduledThreadPool>,
    ) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to create collection directory: {}", dir.display()),
        })?;

        let db_path = dir.join(INDEX_FILE);
        let manager = SqliteConnectionManager::file(&db_path).with_init(|conn| {
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.execute_batch("PRAGMA synchronous = NORMAL;")
        });

        let pool = Pool::builder()
            .max_size(POOL_MAX_SIZE)
            .min_idle(Some(0))
            // No reaper job: it would outlive the pool on the shared workers
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(Duration::from_secs(5))
            .thread_pool(Arc::clone(workers))
            .build(manager)
            .map_err(|e| {
                RagError::index_io(owner, format!("Failed to create connection pool: {}", e))
            })?;

        let store = Self {
            pool,
            owner: owner.clone(),
            db_path,
        };

        {
            let conn = store.conn()?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }

        store.migrate()?;
        store.conn()?.execute(
            "INSERT OR IGNORE INTO collection_meta (key, value) VALUES (?1, ?2)",
            params![META_COLLECTION, owner.collection_name()],
        )?;

        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            RagError::index_io(&self.owner, format!("Failed to get connection: {}", e))
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run schema migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::debug!(owner = %self.owner, version, "applying collection migration");
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Collection name recorded at creation
    pub fn collection_name(&self) -> Result<String> {
        let conn = self.conn()?;
        let name = conn.query_row(
            "SELECT value FROM collection_meta WHERE key = ?1",
            params![META_COLLECTION],
            |row| row.get(0),
        )?;
        Ok(name)
    }

    /// Vector dimension fixed by the first insert, if any
    pub fn dimension(&self) -> Result<Option<usize>> {
        let conn = self.conn()?;
        read_dimension(&conn)
    }

    /// Insert all chunks of one call in a single transaction.
    ///
    /// Sequence numbers continue from the document's current maximum.
    pub fn insert(
        &self,
        document_id: &DocumentId,
        source: &str,
        chunks: &[EmbeddedChunk],
    ) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let dimension = match read_dimension(&tx)? {
            Some(dimension) => dimension,
            None => {
                let dimension = chunks[0].vector.len();
                if dimension == 0 {
                    return Err(RagError::DimensionMismatch {
                        expected: 1,
                        actual: 0,
                    });
                }
                tx.execute(
                    "INSERT INTO collection_meta (key, value) VALUES (?1, ?2)",
                    params![META_DIMENSION, dimension.to_string()],
                )?;
                dimension
            }
        };

        for chunk in chunks {
            if chunk.vector.len() != dimension {
                return Err(RagError::DimensionMismatch {
                    expected: dimension,
                    actual: chunk.vector.len(),
                });
            }
            if !is_finite(&chunk.vector) {
                return Err(non_finite_vector());
            }
        }

        let next_sequence: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq) + 1, 0) FROM chunks WHERE document_id = ?1",
            params![document_id.as_str()],
            |row| row.get(0),
        )?;
        let now = Utc::now().timestamp_millis();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks
                    (chunk_uid, document_id, seq, source, text, content_hash, dimension, vector, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for (offset, chunk) in chunks.iter().enumerate() {
                stmt.execute(params![
                    uuid::Uuid::new_v4().to_string(),
                    document_id.as_str(),
                    next_sequence + offset as i64,
                    source,
                    chunk.text,
                    content_hash(&chunk.text),
                    dimension as i64,
                    encode_vector(&chunk.vector),
                    now,
                ])?;
            }
        }

        tx.commit()?;
        Ok(chunks.len())
    }

    /// Exact cosine scan, best first, ties by insertion order
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if !is_finite(query) {
            return Err(non_finite_vector());
        }

        let conn = self.conn()?;
        let Some(dimension) = read_dimension(&conn)? else {
            return Ok(Vec::new());
        };
        if query.len() != dimension {
            return Err(RagError::DimensionMismatch {
                expected: dimension,
                actual: query.len(),
            });
        }

        let mut stmt = conn.prepare(
            "SELECT id, document_id, seq, source, text, content_hash, created_at, vector
             FROM chunks
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                RawChunk {
                    id: row.get(0)?,
                    document_id: row.get(1)?,
                    seq: row.get(2)?,
                    source: row.get(3)?,
                    text: row.get(4)?,
                    content_hash: row.get(5)?,
                    created_at: row.get(6)?,
                },
                row.get::<_, Vec<u8>>(7)?,
            ))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let (raw, blob) = row?;
            let vector = decode_vector(&blob, dimension).ok_or_else(|| RagError::CorruptRecord {
                id: raw.id,
                message: "invalid vector blob".to_string(),
            })?;
            let score = cosine_similarity(query, &vector);
            hits.push(ScoredChunk {
                chunk: raw.verify()?,
                score,
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Remove every chunk of a document, returning how many were removed
    pub fn delete_document(&self, document_id: &DocumentId) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id.as_str()],
        )?;
        Ok(removed)
    }

    /// Chunks of one document in sequence order
    pub fn document_chunks(&self, document_id: &DocumentId) -> Result<Vec<StoredChunk>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, document_id, seq, source, text, content_hash, created_at
             FROM chunks
             WHERE document_id = ?1
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![document_id.as_str()], |row| {
            Ok(RawChunk {
                id: row.get(0)?,
                document_id: row.get(1)?,
                seq: row.get(2)?,
                source: row.get(3)?,
                text: row.get(4)?,
                content_hash: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;

        let chunks = rows
            .map(|row| row?.verify())
            .collect::<Result<Vec<_>>>()?;
        Ok(chunks)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Row as read from SQLite, before integrity checks
struct RawChunk {
    id: i64,
    document_id: String,
    seq: i64,
    source: String,
    text: String,
    content_hash: String,
    created_at: i64,
}

impl RawChunk {
    fn verify(self) -> Result<StoredChunk> {
        let corrupt = |message: &str| RagError::CorruptRecord {
            id: self.id,
            message: message.to_string(),
        };

        if content_hash(&self.text) != self.content_hash {
            return Err(corrupt("content hash mismatch"));
        }
        let sequence = u32::try_from(self.seq).map_err(|_| corrupt("sequence out of range"))?;
        let created_at = Utc
            .timestamp_millis_opt(self.created_at)
            .single()
            .ok_or_else(|| corrupt("invalid timestamp"))?;
        let document_id =
            DocumentId::new(self.document_id.clone()).map_err(|_| corrupt("empty document id"))?;

        Ok(StoredChunk {
            id: self.id,
            document_id,
            sequence,
            source: self.source,
            text: self.text,
            created_at,
        })
    }
}

fn is_finite(vector: &[f32]) -> bool {
    vector.iter().all(|v| v.is_finite())
}

fn non_finite_vector() -> RagError {
    RagError::Embedding {
        provider: "index".to_string(),
        message: "vector contains non-finite values".to_string(),
    }
}

fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

fn read_dimension(conn: &rusqlite::Connection) -> Result<Option<usize>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM collection_meta WHERE key = ?1",
            params![META_DIMENSION],
            |row| row.get(0),
        )
        .optional()?;

    value
        .map(|v| {
            v.parse::<usize>().map_err(|_| RagError::CorruptRecord {
                id: 0,
                message: format!("invalid stored dimension '{}'", v),
            })
        })
        .transpose()
}

/// Collection migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    CREATE TABLE collection_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        chunk_uid TEXT NOT NULL UNIQUE,
        document_id TEXT NOT NULL,
        seq INTEGER NOT NULL,
        source TEXT NOT NULL,
        text TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        dimension INTEGER NOT NULL,
        vector BLOB NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE (document_id, seq)
    );

    CREATE INDEX idx_chunks_document ON chunks(document_id);
    "#,
];
