//! The index record store contract and its SQLite implementation.
//!
//! The store guarantees atomicity at single-record granularity only:
//! there are no cross-record transactions, so a crash mid-batch leaves a
//! partially-advanced but self-consistent index that the next
//! synchronizer tick resumes.

use anyhow::Result;
use async_trait::async_trait;
use chrono::DateTime;
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};

use crate::models::{IndexRecord, RecordStatus, SearchHit};
use crate::query::QueryToken;
use crate::source::DocStamp;

#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Replaces-or-inserts by id. Last write wins; fields are never
    /// merged.
    async fn upsert(&self, record: &IndexRecord) -> Result<()>;

    async fn delete(&self, id: i64) -> Result<()>;

    /// Callers rendering search results are expected to cache this
    /// lookup; it is invoked once per rendered hit.
    async fn get_by_id(&self, id: i64) -> Result<Option<IndexRecord>>;

    /// Orphan sweep: removes every record whose id is not in `live_ids`.
    /// Returns the number removed.
    async fn delete_where_id_not_in(&self, live_ids: &HashSet<i64>) -> Result<u64>;

    async fn count_all(&self) -> Result<u64>;

    /// Selects up to `limit` documents that are absent from the index or
    /// whose source stamp is newer than the indexed one, preserving the
    /// order of `eligible`. Returns the selection and the total stale
    /// count (which may exceed the selection).
    async fn find_stale(&self, eligible: &[DocStamp], limit: u64) -> Result<(Vec<i64>, u64)>;

    /// Updates only the `keywords`/`status` pair; every other field is
    /// untouched. This is the one permitted partial mutation.
    async fn update_extraction(
        &self,
        id: i64,
        keywords: Option<&str>,
        status: RecordStatus,
    ) -> Result<()>;

    /// Per-status record counts, for the progress report.
    async fn status_counts(&self) -> Result<HashMap<i64, u64>>;

    /// Deletes every record. The recovery path for failed extractions:
    /// wiping makes everything stale, so the next ticks rebuild from
    /// scratch and re-attempt extraction.
    async fn wipe(&self) -> Result<()>;

    /// Clears extracted text of every attachment record, leaving the
    /// records in place.
    async fn clear_attachment_text(&self) -> Result<u64>;

    /// Executes a compiled token stream against this store's own
    /// full-text engine, ranked best first.
    async fn search(
        &self,
        tokens: &[QueryToken],
        doc_type: Option<&str>,
        limit: i64,
    ) -> Result<Vec<SearchHit>>;
}

/// Store over the shared SQLite database, with an FTS5 companion table
/// as the local full-text engine.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> IndexRecord {
    let modified_at: i64 = row.get("modified_at");
    let status: i64 = row.get("status");
    IndexRecord {
        id: row.get("id"),
        doc_type: row.get("doc_type"),
        modified_at: DateTime::from_timestamp(modified_at, 0).unwrap_or_default(),
        title: row.get("title"),
        body: row.get("body"),
        excerpt: row.get("excerpt"),
        keywords: row.get("keywords"),
        status: RecordStatus::from_i64(status),
    }
}

#[async_trait]
impl IndexStore for SqliteStore {
    async fn upsert(&self, record: &IndexRecord) -> Result<()> {
        // One transaction per record keeps the row and its FTS entry
        // consistent without spanning records.
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO index_records
                (id, doc_type, modified_at, title, body, excerpt, keywords, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id)
        .bind(&record.doc_type)
        .bind(record.modified_at.timestamp())
        .bind(&record.title)
        .bind(&record.body)
        .bind(&record.excerpt)
        .bind(&record.keywords)
        .bind(record.status as i64)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM index_fts WHERE record_id = ?")
            .bind(record.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO index_fts (record_id, keywords, title, body, excerpt) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(record.keywords.as_deref().unwrap_or(""))
        .bind(&record.title)
        .bind(&record.body)
        .bind(&record.excerpt)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM index_records WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM index_fts WHERE record_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<IndexRecord>> {
        let row = sqlx::query("SELECT * FROM index_records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(record_from_row))
    }

    async fn delete_where_id_not_in(&self, live_ids: &HashSet<i64>) -> Result<u64> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM index_records")
            .fetch_all(&self.pool)
            .await?;
        let mut deleted = 0u64;
        for id in ids {
            if !live_ids.contains(&id) {
                self.delete(id).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn count_all(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM index_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn find_stale(&self, eligible: &[DocStamp], limit: u64) -> Result<(Vec<i64>, u64)> {
        let rows: Vec<(i64, i64)> = sqlx::query_as("SELECT id, modified_at FROM index_records")
            .fetch_all(&self.pool)
            .await?;
        let indexed: HashMap<i64, i64> = rows.into_iter().collect();

        let mut selected = Vec::new();
        let mut total = 0u64;
        for stamp in eligible {
            let stale = match indexed.get(&stamp.id) {
                None => true,
                Some(&ts) => stamp.modified_at.timestamp() > ts,
            };
            if stale {
                total += 1;
                if (selected.len() as u64) < limit {
                    selected.push(stamp.id);
                }
            }
        }
        Ok((selected, total))
    }

    async fn update_extraction(
        &self,
        id: i64,
        keywords: Option<&str>,
        status: RecordStatus,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE index_records SET keywords = ?, status = ? WHERE id = ?")
            .bind(keywords)
            .bind(status as i64)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE index_fts SET keywords = ? WHERE record_id = ?")
            .bind(keywords.unwrap_or(""))
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn status_counts(&self) -> Result<HashMap<i64, u64>> {
        let rows: Vec<(i64, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM index_records GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(s, c)| (s, c as u64)).collect())
    }

    async fn wipe(&self) -> Result<()> {
        sqlx::query("DELETE FROM index_records")
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM index_fts")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_attachment_text(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE index_records SET keywords = NULL, status = 0 WHERE doc_type = 'attachment'",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "UPDATE index_fts SET keywords = '' WHERE record_id IN \
             (SELECT id FROM index_records WHERE doc_type = 'attachment')",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn search(
        &self,
        tokens: &[QueryToken],
        doc_type: Option<&str>,
        limit: i64,
    ) -> Result<Vec<SearchHit>> {
        let expr = fts_match_expr(tokens);
        if expr.is_empty() {
            return Ok(Vec::new());
        }

        let sql = if doc_type.is_some() {
            "SELECT r.id, r.doc_type, r.title, r.excerpt, r.modified_at, index_fts.rank AS rank \
             FROM index_fts JOIN index_records r ON r.id = index_fts.record_id \
             WHERE index_fts MATCH ? AND r.doc_type = ? ORDER BY index_fts.rank LIMIT ?"
        } else {
            "SELECT r.id, r.doc_type, r.title, r.excerpt, r.modified_at, index_fts.rank AS rank \
             FROM index_fts JOIN index_records r ON r.id = index_fts.record_id \
             WHERE index_fts MATCH ? ORDER BY index_fts.rank LIMIT ?"
        };

        let mut query = sqlx::query(sql).bind(&expr);
        if let Some(t) = doc_type {
            query = query.bind(t);
        }
        let rows = query.bind(limit).fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| {
                let modified_at: i64 = row.get("modified_at");
                let rank: f64 = row.get("rank");
                SearchHit {
                    id: row.get("id"),
                    doc_type: row.get("doc_type"),
                    title: row.get("title"),
                    excerpt: row.get("excerpt"),
                    modified_at: DateTime::from_timestamp(modified_at, 0).unwrap_or_default(),
                    // rank is bm25 (lower is better); negate so higher = better
                    score: -rank,
                }
            })
            .collect())
    }
}

/// Renders the shared token stream as an FTS5 MATCH expression for the
/// bundled executor: terms are phrase-quoted, OR runs are honored,
/// exclusions (`-term`) are dropped, and grouping parentheses are kept
/// where non-degenerate.
fn fts_match_expr(tokens: &[QueryToken]) -> String {
    let mut out = String::new();
    let mut open_positions: Vec<usize> = Vec::new();

    fn needs_joiner(out: &str) -> bool {
        !out.is_empty() && !out.ends_with('(')
    }

    for token in tokens {
        match token {
            QueryToken::Term { text, optional } => {
                let mut term = text.as_str();
                if let Some(first) = term.chars().next() {
                    match first {
                        '-' => continue,
                        '+' | '~' | '@' => term = &term[1..],
                        _ => {}
                    }
                }
                // Phrase-quote everything; FTS5 treats bare punctuation
                // as syntax otherwise.
                let inner = term.replace('"', "");
                if inner.trim().is_empty() {
                    continue;
                }
                if needs_joiner(&out) {
                    out.push_str(if *optional { " OR " } else { " AND " });
                }
                out.push('"');
                out.push_str(&inner);
                out.push('"');
            }
            QueryToken::Open => {
                if needs_joiner(&out) {
                    out.push_str(" AND ");
                }
                open_positions.push(out.len());
                out.push('(');
            }
            QueryToken::Close => {
                if let Some(pos) = open_positions.pop() {
                    if out.ends_with('(') {
                        // Empty group: erase it along with its joiner.
                        out.truncate(pos);
                        if out.ends_with(" AND ") {
                            out.truncate(out.len() - 5);
                        }
                    } else {
                        out.push(')');
                    }
                }
            }
        }
    }

    // Close any groups an unbalanced input left open.
    while let Some(pos) = open_positions.pop() {
        if out.ends_with('(') {
            out.truncate(pos);
            if out.ends_with(" AND ") {
                out.truncate(out.len() - 5);
            }
        } else {
            out.push(')');
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::tokenize;

    #[test]
    fn terms_become_quoted_and_joined() {
        assert_eq!(fts_match_expr(&tokenize("foo bar")), r#""foo" AND "bar""#);
    }

    #[test]
    fn or_runs_are_honored() {
        assert_eq!(fts_match_expr(&tokenize("foo OR bar")), r#""foo" OR "bar""#);
    }

    #[test]
    fn groups_are_kept() {
        assert_eq!(
            fts_match_expr(&tokenize("(foo OR bar) baz")),
            r#"("foo" OR "bar") AND "baz""#
        );
    }

    #[test]
    fn exclusions_are_dropped() {
        assert_eq!(fts_match_expr(&tokenize("foo -bar")), r#""foo""#);
    }

    #[test]
    fn phrases_keep_their_words_together() {
        assert_eq!(fts_match_expr(&tokenize("\"foo bar\"")), r#""foo bar""#);
    }

    #[test]
    fn empty_group_is_erased() {
        assert_eq!(fts_match_expr(&tokenize("foo () bar")), r#""foo" AND "bar""#);
    }

    #[test]
    fn unbalanced_open_is_closed() {
        assert_eq!(
            fts_match_expr(&tokenize("(foo bar")),
            r#"("foo" AND "bar")"#
        );
    }

    #[test]
    fn stray_close_is_ignored() {
        assert_eq!(fts_match_expr(&tokenize("foo) bar")), r#""foo" AND "bar""#);
    }
}
