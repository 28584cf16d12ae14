//! End-to-end attachment extraction through the synchronizer.
//!
//! Fixture files are written into a temporary media root and referenced
//! from seeded `documents` rows; ticks then run the full pending ->
//! extracted (or failed) lifecycle.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

use fulltext_index::config::{Config, DbConfig, ExtractConfig, IndexConfig, SyncConfig};
use fulltext_index::db;
use fulltext_index::migrate;
use fulltext_index::models::{RecordStatus, MIME_DOC, MIME_DOCX, MIME_PDF, MIME_PPTX, MIME_XLSX};
use fulltext_index::query::tokenize;
use fulltext_index::sched::Scheduler;
use fulltext_index::source::{MediaResolver, SqliteSource};
use fulltext_index::store::{IndexStore, SqliteStore};
use fulltext_index::sync::Indexer;

struct NoScheduler;

impl Scheduler for NoScheduler {
    fn schedule_once(&self, _delay: Duration) {}
}

struct TestEnv {
    pool: SqlitePool,
    indexer: Indexer,
    store: SqliteStore,
    media: TempDir,
}

async fn setup_with_extract(extract: ExtractConfig) -> TestEnv {
    let pool = db::connect_memory().await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let media = TempDir::new().unwrap();
    let cfg = Config {
        db: DbConfig {
            path: ":memory:".into(),
        },
        index: IndexConfig::default(),
        extract: ExtractConfig {
            media_root: media.path().to_path_buf(),
            ..extract
        },
        sync: SyncConfig::default(),
    };

    let indexer = Indexer::new(
        Arc::new(SqliteSource::new(pool.clone())),
        Arc::new(SqliteStore::new(pool.clone())),
        Arc::new(MediaResolver::new(media.path().to_path_buf())),
        Arc::new(NoScheduler),
        cfg,
    );

    TestEnv {
        store: SqliteStore::new(pool.clone()),
        pool,
        indexer,
        media,
    }
}

async fn setup() -> TestEnv {
    setup_with_extract(ExtractConfig::default()).await
}

async fn insert_attachment(
    pool: &SqlitePool,
    id: i64,
    mime: &str,
    file_path: Option<&str>,
    override_text: Option<&str>,
) {
    sqlx::query(
        "INSERT INTO documents \
         (id, doc_type, status, mime_type, modified_at, title, body, excerpt, override_text, file_path) \
         VALUES (?, 'attachment', 'inherit', ?, 100, ?, '', '', ?, ?)",
    )
    .bind(id)
    .bind(mime)
    .bind(format!("attachment {}", id))
    .bind(override_text)
    .bind(file_path)
    .execute(pool)
    .await
    .unwrap();
}

fn write_fixture(media: &Path, name: &str, bytes: &[u8]) {
    fs::write(media.join(name), bytes).unwrap();
}

fn build_zip(parts: &[(&str, &str)]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        for (name, content) in parts {
            writer
                .start_file(name.to_string(), SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

fn docx_with_text(text: &str) -> Vec<u8> {
    let xml = format!(
        "<?xml version=\"1.0\"?>\
         <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
         <w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
        text
    );
    build_zip(&[("word/document.xml", &xml)])
}

fn xlsx_with_strings(strings: &[&str]) -> Vec<u8> {
    let entries: String = strings
        .iter()
        .map(|s| format!("<si><t>{}</t></si>", s))
        .collect();
    let xml = format!(
        "<?xml version=\"1.0\"?>\
         <sst xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">{}</sst>",
        entries
    );
    build_zip(&[("xl/sharedStrings.xml", &xml)])
}

fn pptx_with_slide(text: &str) -> Vec<u8> {
    let xml = format!(
        "<?xml version=\"1.0\"?>\
         <p:sld xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\"\
                xmlns:p=\"http://schemas.openxmlformats.org/presentationml/2006/main\">\
         <a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>",
        text
    );
    build_zip(&[("ppt/slides/slide1.xml", &xml)])
}

/// Minimal single-page PDF drawing `phrase` with the built-in Helvetica
/// font. Body objects first, then an xref with correct byte offsets so
/// the parser accepts it.
fn pdf_with_text(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET\n", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}endstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

/// Legacy layout: payload byte length encoded at 0x21C with the fixed
/// low-byte adjustments, UTF-16LE payload at 0xA00.
fn doc_with_text(text: &str) -> Vec<u8> {
    let payload: Vec<u8> = text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    let len = payload.len();
    let mut bytes = vec![0u8; 0xA00];
    bytes[0x21C] = (len & 0xff) as u8 + 1;
    bytes[0x21D] = ((len >> 8) & 0xff) as u8 + 8;
    bytes[0x21E] = ((len >> 16) & 0xff) as u8;
    bytes[0x21F] = ((len >> 24) & 0xff) as u8;
    bytes.extend_from_slice(&payload);
    bytes
}

#[tokio::test]
async fn docx_attachment_is_extracted_and_searchable() {
    let env = setup().await;
    write_fixture(
        env.media.path(),
        "report.docx",
        &docx_with_text("quarterly revenue figures"),
    );
    insert_attachment(&env.pool, 1, MIME_DOCX, Some("report.docx"), None).await;

    let report = env.indexer.run_tick().await.unwrap();
    assert_eq!(report.extracted, 1);
    assert_eq!(report.failed, 0);

    let record = env.store.get_by_id(1).await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Ok);
    assert_eq!(record.keywords.as_deref(), Some("quarterly revenue figures"));

    let hits = env
        .store
        .search(&tokenize("revenue"), None, 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, 1);
}

#[tokio::test]
async fn legacy_doc_attachment_is_extracted() {
    let env = setup().await;
    write_fixture(
        env.media.path(),
        "memo.doc",
        &doc_with_text("internal memo contents"),
    );
    insert_attachment(&env.pool, 1, MIME_DOC, Some("memo.doc"), None).await;

    env.indexer.run_tick().await.unwrap();
    let record = env.store.get_by_id(1).await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Ok);
    assert_eq!(record.keywords.as_deref(), Some("internal memo contents"));
}

#[tokio::test]
async fn unrecognized_legacy_layout_is_marked_unsupported() {
    let env = setup().await;
    // Zero-length header means the file is not the documented layout.
    write_fixture(env.media.path(), "odd.doc", &[0u8; 0xA00]);
    insert_attachment(&env.pool, 1, MIME_DOC, Some("odd.doc"), None).await;

    let report = env.indexer.run_tick().await.unwrap();
    assert_eq!(report.failed, 1);
    let record = env.store.get_by_id(1).await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Unsupported);
    assert!(record.keywords.is_none());
}

#[tokio::test]
async fn xlsx_attachment_is_extracted() {
    let env = setup().await;
    write_fixture(
        env.media.path(),
        "sheet.xlsx",
        &xlsx_with_strings(&["budget", "forecast"]),
    );
    insert_attachment(&env.pool, 1, MIME_XLSX, Some("sheet.xlsx"), None).await;

    env.indexer.run_tick().await.unwrap();
    let record = env.store.get_by_id(1).await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Ok);
    assert_eq!(record.keywords.as_deref(), Some("budget\nforecast"));
}

#[tokio::test]
async fn pptx_attachment_is_extracted() {
    let env = setup().await;
    write_fixture(
        env.media.path(),
        "deck.pptx",
        &pptx_with_slide("roadmap highlights"),
    );
    insert_attachment(&env.pool, 1, MIME_PPTX, Some("deck.pptx"), None).await;

    env.indexer.run_tick().await.unwrap();
    let record = env.store.get_by_id(1).await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Ok);
    assert_eq!(record.keywords.as_deref(), Some("roadmap highlights"));
}

#[tokio::test]
async fn pdf_attachment_is_extracted_and_searchable() {
    let env = setup().await;
    write_fixture(
        env.media.path(),
        "paper.pdf",
        &pdf_with_text("signal phrase"),
    );
    insert_attachment(&env.pool, 1, MIME_PDF, Some("paper.pdf"), None).await;

    let report = env.indexer.run_tick().await.unwrap();
    assert_eq!(report.extracted, 1);
    let record = env.store.get_by_id(1).await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Ok);
    let keywords = record.keywords.unwrap();
    assert!(keywords.contains("signal"), "{}", keywords);

    let hits = env
        .store
        .search(&tokenize("signal"), None, 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn pdf_filter_post_processes_extracted_text() {
    let pool = db::connect_memory().await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    let media = TempDir::new().unwrap();
    let cfg = Config {
        db: DbConfig {
            path: ":memory:".into(),
        },
        index: IndexConfig::default(),
        extract: ExtractConfig {
            media_root: media.path().to_path_buf(),
            ..ExtractConfig::default()
        },
        sync: SyncConfig::default(),
    };

    let indexer = Indexer::new(
        Arc::new(SqliteSource::new(pool.clone())),
        Arc::new(SqliteStore::new(pool.clone())),
        Arc::new(MediaResolver::new(media.path().to_path_buf())),
        Arc::new(NoScheduler),
        cfg,
    )
    .with_pdf_filter(Box::new(|text| text.to_uppercase()));

    fs::write(media.path().join("paper.pdf"), pdf_with_text("quiet words")).unwrap();
    insert_attachment(&pool, 1, MIME_PDF, Some("paper.pdf"), None).await;

    let report = indexer.run_tick().await.unwrap();
    assert_eq!(report.extracted, 1);
    let record = SqliteStore::new(pool.clone())
        .get_by_id(1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, RecordStatus::Ok);
    let keywords = record.keywords.unwrap();
    assert!(keywords.contains("QUIET"), "{}", keywords);
}

#[tokio::test]
async fn corrupt_pdf_is_marked_error() {
    let env = setup().await;
    write_fixture(env.media.path(), "broken.pdf", b"not actually a pdf");
    insert_attachment(&env.pool, 1, MIME_PDF, Some("broken.pdf"), None).await;

    let report = env.indexer.run_tick().await.unwrap();
    assert_eq!(report.failed, 1);
    let record = env.store.get_by_id(1).await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Error);
}

#[tokio::test]
async fn missing_file_leaves_record_pending() {
    let env = setup().await;
    insert_attachment(&env.pool, 1, MIME_DOCX, Some("gone.docx"), None).await;

    let report = env.indexer.run_tick().await.unwrap();
    assert_eq!(report.extracted, 0);
    assert_eq!(report.failed, 0);
    let record = env.store.get_by_id(1).await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Pending);
}

#[tokio::test]
async fn override_text_takes_precedence_over_extraction() {
    let env = setup().await;
    write_fixture(
        env.media.path(),
        "report.docx",
        &docx_with_text("extracted body"),
    );
    insert_attachment(
        &env.pool,
        1,
        MIME_DOCX,
        Some("report.docx"),
        Some("curated summary"),
    )
    .await;

    let report = env.indexer.run_tick().await.unwrap();
    assert_eq!(report.extracted, 0);
    let record = env.store.get_by_id(1).await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Ok);
    assert_eq!(record.keywords.as_deref(), Some("curated summary"));
}

#[tokio::test]
async fn disabled_format_indexes_without_extraction() {
    let env = setup_with_extract(ExtractConfig {
        word: false,
        ..ExtractConfig::default()
    })
    .await;
    write_fixture(env.media.path(), "doc.docx", &docx_with_text("skipped"));
    insert_attachment(&env.pool, 1, MIME_DOCX, Some("doc.docx"), None).await;

    let report = env.indexer.run_tick().await.unwrap();
    assert_eq!(report.extracted, 0);
    let record = env.store.get_by_id(1).await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Ok);
    assert!(record.keywords.is_none());
}

#[tokio::test]
async fn failed_extraction_is_not_retried_until_rebuild() {
    let env = setup().await;
    write_fixture(env.media.path(), "broken.pdf", b"junk");
    insert_attachment(&env.pool, 1, MIME_PDF, Some("broken.pdf"), None).await;

    let r1 = env.indexer.run_tick().await.unwrap();
    assert_eq!(r1.failed, 1);

    // The document is unchanged, so nothing is stale on the next tick.
    let r2 = env.indexer.run_tick().await.unwrap();
    assert_eq!(r2.upserted, 0);
    assert_eq!(r2.failed, 0);

    // A wipe makes the record stale again and re-attempts extraction.
    env.indexer.wipe_index().await.unwrap();
    let r3 = env.indexer.run_tick().await.unwrap();
    assert_eq!(r3.failed, 1);
}

#[tokio::test]
async fn clear_attachment_text_drops_keywords_only() {
    let env = setup().await;
    write_fixture(
        env.media.path(),
        "report.docx",
        &docx_with_text("extracted words"),
    );
    insert_attachment(&env.pool, 1, MIME_DOCX, Some("report.docx"), None).await;
    sqlx::query(
        "INSERT INTO documents (id, doc_type, status, modified_at, title, body, excerpt) \
         VALUES (2, 'post', 'publish', 100, 'plain post', 'post body', '')",
    )
    .execute(&env.pool)
    .await
    .unwrap();
    env.indexer.run_tick().await.unwrap();

    let cleared = env.store.clear_attachment_text().await.unwrap();
    assert_eq!(cleared, 1);

    let attachment = env.store.get_by_id(1).await.unwrap().unwrap();
    assert!(attachment.keywords.is_none());
    assert_eq!(attachment.status, RecordStatus::Ok);
    // Non-attachment records are untouched.
    let post = env.store.get_by_id(2).await.unwrap().unwrap();
    assert_eq!(post.body, "post body");

    let hits = env
        .store
        .search(&tokenize("extracted"), None, 10)
        .await
        .unwrap();
    assert!(hits.is_empty());
}
