//! Read-only access to the primary content store.
//!
//! The host application owns the `documents` table; this crate only ever
//! reads it. "Eligible" means an indexable document type that is not in
//! a transient draft state.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;

use crate::models::{SourceDocument, NON_INDEXED_TYPES, TRANSIENT_STATUS};

/// Id and modification stamp of an eligible document, in the store's
/// natural scan order.
#[derive(Debug, Clone, Copy)]
pub struct DocStamp {
    pub id: i64,
    pub modified_at: DateTime<Utc>,
}

#[async_trait]
pub trait SourceAccessor: Send + Sync {
    /// Lists every eligible document with its modification stamp.
    /// Ordering must be deterministic so repeated synchronizer ticks make
    /// forward progress without starving any document.
    async fn list_eligible(&self) -> Result<Vec<DocStamp>>;

    /// Fetches a single document, eligible or not.
    async fn get(&self, id: i64) -> Result<Option<SourceDocument>>;

    async fn count_eligible(&self) -> Result<u64>;
}

/// Resolves an attachment document to a local file for extraction.
/// Consulted only while a record is pending extraction.
pub trait AttachmentResolver: Send + Sync {
    fn path_for(&self, doc: &SourceDocument) -> Option<PathBuf>;
}

/// Resolver rooted at the configured media directory.
pub struct MediaResolver {
    root: PathBuf,
}

impl MediaResolver {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl AttachmentResolver for MediaResolver {
    fn path_for(&self, doc: &SourceDocument) -> Option<PathBuf> {
        doc.file_path.as_deref().map(|rel| self.root.join(rel))
    }
}

/// Source accessor over the shared SQLite database.
pub struct SqliteSource {
    pool: SqlitePool,
}

impl SqliteSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const ELIGIBLE_WHERE: &str = "doc_type NOT IN (?, ?) AND status <> ?";

fn doc_from_row(row: &sqlx::sqlite::SqliteRow) -> SourceDocument {
    let modified_at: i64 = row.get("modified_at");
    SourceDocument {
        id: row.get("id"),
        doc_type: row.get("doc_type"),
        status: row.get("status"),
        mime_type: row.get("mime_type"),
        modified_at: DateTime::from_timestamp(modified_at, 0).unwrap_or_default(),
        title: row.get("title"),
        body: row.get("body"),
        excerpt: row.get("excerpt"),
        override_text: row.get("override_text"),
        file_path: row.get("file_path"),
    }
}

#[async_trait]
impl SourceAccessor for SqliteSource {
    async fn list_eligible(&self) -> Result<Vec<DocStamp>> {
        let sql = format!(
            "SELECT id, modified_at FROM documents WHERE {} ORDER BY id",
            ELIGIBLE_WHERE
        );
        let rows: Vec<(i64, i64)> = sqlx::query_as(&sql)
            .bind(NON_INDEXED_TYPES[0])
            .bind(NON_INDEXED_TYPES[1])
            .bind(TRANSIENT_STATUS)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(id, ts)| DocStamp {
                id,
                modified_at: DateTime::from_timestamp(ts, 0).unwrap_or_default(),
            })
            .collect())
    }

    async fn get(&self, id: i64) -> Result<Option<SourceDocument>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(doc_from_row))
    }

    async fn count_eligible(&self) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM documents WHERE {}", ELIGIBLE_WHERE);
        let (count,): (i64,) = sqlx::query_as(&sql)
            .bind(NON_INDEXED_TYPES[0])
            .bind(NON_INDEXED_TYPES[1])
            .bind(TRANSIENT_STATUS)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
