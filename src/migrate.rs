use anyhow::Result;
use sqlx::SqlitePool;

/// Creates the schema. Idempotent; safe to run on every startup.
///
/// `documents` is the primary content store surface (owned by the host
/// application sharing this database); `index_records` and `index_fts`
/// are maintained by this crate.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY,
            doc_type TEXT NOT NULL DEFAULT 'post',
            status TEXT NOT NULL DEFAULT 'publish',
            mime_type TEXT,
            modified_at INTEGER NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            body TEXT NOT NULL DEFAULT '',
            excerpt TEXT NOT NULL DEFAULT '',
            override_text TEXT,
            file_path TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_records (
            id INTEGER PRIMARY KEY,
            doc_type TEXT NOT NULL DEFAULT 'post',
            modified_at INTEGER NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            body TEXT NOT NULL DEFAULT '',
            excerpt TEXT NOT NULL DEFAULT '',
            keywords TEXT,
            status INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so check first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='index_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE index_fts USING fts5(
                record_id UNINDEXED,
                keywords,
                title,
                body,
                excerpt
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_type ON documents(doc_type)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_type ON index_records(doc_type)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_status ON index_records(status)")
        .execute(pool)
        .await?;

    Ok(())
}
