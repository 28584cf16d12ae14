//! Incremental index synchronization.
//!
//! Each tick processes a bounded batch: orphaned records are swept,
//! stale documents are re-indexed, and pending attachments get one
//! extraction attempt. Backlog beyond the batch budget triggers exactly
//! one coalesced follow-up tick, making the synchronizer a cooperative,
//! resumable loop rather than a single long-running pass.

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, ExtractConfig};
use crate::extract::{self, ExtractError, PdfTextFilter};
use crate::models::{
    IndexRecord, RecordStatus, SourceDocument, TickReport, MIME_DOC, MIME_DOCX, MIME_PDF,
    MIME_PPTX, MIME_XLSX,
};
use crate::sched::Scheduler;
use crate::source::{AttachmentResolver, SourceAccessor};
use crate::store::IndexStore;
use crate::textfilter;

/// Caller-supplied hook applied to every record before it is written,
/// mirroring the host's per-document index filter.
pub type RecordFilter = dyn Fn(IndexRecord) -> IndexRecord + Send + Sync;

/// What a single-document upsert did, for tick accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Indexed without an extraction attempt.
    Indexed,
    /// Extraction ran and produced text.
    Extracted,
    /// Extraction ran and failed; the failure kind is in the record.
    ExtractionFailed,
    /// Extraction is pending but the attachment file is unavailable.
    AwaitingFile,
}

/// Single entry point for all index maintenance: host-side adapters for
/// "created", "attachment added", and "attachment changed" events call
/// [`Indexer::upsert_from_source`]; the scheduled batch loop calls
/// [`Indexer::run_tick`].
pub struct Indexer {
    source: Arc<dyn SourceAccessor>,
    store: Arc<dyn IndexStore>,
    resolver: Arc<dyn AttachmentResolver>,
    scheduler: Arc<dyn Scheduler>,
    config: Config,
    record_filter: Option<Box<RecordFilter>>,
    pdf_filter: Option<Box<PdfTextFilter>>,
}

impl Indexer {
    pub fn new(
        source: Arc<dyn SourceAccessor>,
        store: Arc<dyn IndexStore>,
        resolver: Arc<dyn AttachmentResolver>,
        scheduler: Arc<dyn Scheduler>,
        config: Config,
    ) -> Self {
        Self {
            source,
            store,
            resolver,
            scheduler,
            config,
            record_filter: None,
            pdf_filter: None,
        }
    }

    /// Installs a hook applied to every record before upsert.
    pub fn with_record_filter(mut self, filter: Box<RecordFilter>) -> Self {
        self.record_filter = Some(filter);
        self
    }

    /// Installs a post-processing hook for extracted PDF text.
    pub fn with_pdf_filter(mut self, filter: Box<PdfTextFilter>) -> Self {
        self.pdf_filter = Some(filter);
        self
    }

    /// Runs one bounded synchronization batch.
    pub async fn run_tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();

        let eligible_count = self.source.count_eligible().await?;
        let limit = batch_limit(self.config.index.batch_limit, eligible_count);

        let eligible = self.source.list_eligible().await?;

        // Orphan sweep: drop records whose source document is gone or no
        // longer eligible.
        let live: HashSet<i64> = eligible.iter().map(|s| s.id).collect();
        report.deleted = self.store.delete_where_id_not_in(&live).await?;

        let (selected, total_stale) = self.store.find_stale(&eligible, limit).await?;
        let selected_count = selected.len() as u64;

        for id in selected {
            // The document may have vanished between the scan and now;
            // the next tick's sweep will pick that up.
            let Some(doc) = self.source.get(id).await? else {
                continue;
            };
            match self.upsert_from_source(&doc, None, false).await? {
                UpsertOutcome::Extracted => report.extracted += 1,
                UpsertOutcome::ExtractionFailed => report.failed += 1,
                UpsertOutcome::Indexed | UpsertOutcome::AwaitingFile => {}
            }
            report.upserted += 1;
        }

        report.remaining = total_stale.saturating_sub(selected_count);
        if report.remaining > 0 {
            self.scheduler
                .schedule_once(Duration::from_millis(self.config.sync.retick_delay_ms));
        }

        Ok(report)
    }

    /// Builds and writes the index record for one source document, then
    /// attempts extraction if the record went in pending.
    ///
    /// `override_text` beats the document's own stored override;
    /// `is_update` marks a re-save of existing content, which never
    /// re-queues extraction.
    pub async fn upsert_from_source(
        &self,
        doc: &SourceDocument,
        override_text: Option<String>,
        is_update: bool,
    ) -> Result<UpsertOutcome> {
        let keywords = override_text.or_else(|| doc.override_text.clone());
        let status = initial_status(doc, keywords.as_deref(), is_update, &self.config.extract);

        let mut record = IndexRecord {
            id: doc.id,
            doc_type: doc.doc_type.clone(),
            modified_at: doc.modified_at,
            title: self.index_text(&doc.title, false).await?,
            body: self.index_text(&doc.body, true).await?,
            excerpt: self.index_text(&doc.excerpt, true).await?,
            keywords,
            status,
        };
        if let Some(filter) = &self.record_filter {
            record = filter(record);
        }
        let status = record.status;
        let keywords = record.keywords.clone();

        self.store.upsert(&record).await?;

        if status != RecordStatus::Pending {
            return Ok(UpsertOutcome::Indexed);
        }

        // Extraction updates only the keywords/status pair; failures are
        // recorded, not retried, until an explicit rebuild.
        let Some(path) = self.resolver.path_for(doc).filter(|p| p.exists()) else {
            return Ok(UpsertOutcome::AwaitingFile);
        };
        let mime = doc.mime_type.as_deref().unwrap_or_default();
        match extract::extract_file(&path, mime, self.pdf_filter.as_deref()) {
            Ok(text) => {
                self.store
                    .update_extraction(doc.id, Some(&text), RecordStatus::Ok)
                    .await?;
                Ok(UpsertOutcome::Extracted)
            }
            Err(err) => {
                let status = failure_status(&err);
                self.store
                    .update_extraction(doc.id, keywords.as_deref(), status)
                    .await?;
                Ok(UpsertOutcome::ExtractionFailed)
            }
        }
    }

    /// Removes the record for a deleted source document.
    pub async fn delete_document(&self, id: i64) -> Result<()> {
        self.store.delete(id).await
    }

    /// Wipes the index so the following ticks rebuild it from scratch,
    /// re-attempting previously failed extractions.
    pub async fn wipe_index(&self) -> Result<()> {
        self.store.wipe().await
    }

    /// Applies the configured content transforms: block/shortcode
    /// expansion first, markup stripping second.
    async fn index_text(&self, raw: &str, expandable: bool) -> Result<String> {
        let mut text = raw.to_string();
        if expandable && self.config.index.expand_blocks {
            let mut bodies = HashMap::new();
            for id in textfilter::block_refs(&text) {
                if let Some(block) = self.source.get(id).await? {
                    bodies.insert(id, block.body);
                }
            }
            text = textfilter::expand_blocks(&text, &bodies);
        }
        if expandable && self.config.index.expand_shortcodes {
            text = textfilter::expand_shortcodes(&text);
        }
        if !self.config.index.index_html {
            text = textfilter::strip_html(&text);
        }
        Ok(text)
    }
}

/// Per-tick batch budget: caller override, else 100 while the collection
/// is small and 1000 once the backlog is known to be large.
fn batch_limit(override_limit: u64, eligible_count: u64) -> u64 {
    if override_limit > 0 {
        override_limit
    } else if eligible_count <= 2000 {
        100
    } else {
        1000
    }
}

/// New attachment-like documents with no override text enter the index
/// pending extraction, when their format's auto-extraction is enabled.
fn initial_status(
    doc: &SourceDocument,
    keywords: Option<&str>,
    is_update: bool,
    extract: &ExtractConfig,
) -> RecordStatus {
    if !doc.is_attachment() || is_update {
        return RecordStatus::Ok;
    }
    if keywords.is_some_and(|k| !k.is_empty()) {
        return RecordStatus::Ok;
    }
    let auto = match doc.mime_type.as_deref() {
        Some(MIME_PDF) => extract.pdf,
        Some(MIME_DOC) | Some(MIME_DOCX) => extract.word,
        Some(MIME_XLSX) => extract.excel,
        Some(MIME_PPTX) => extract.powerpoint,
        _ => false,
    };
    if auto {
        RecordStatus::Pending
    } else {
        RecordStatus::Ok
    }
}

fn failure_status(err: &ExtractError) -> RecordStatus {
    match err {
        ExtractError::Encrypted => RecordStatus::Encrypted,
        ExtractError::UnsupportedEncoding => RecordStatus::Unsupported,
        ExtractError::Io(_) | ExtractError::Corrupt(_) => RecordStatus::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn attachment(mime: &str) -> SourceDocument {
        SourceDocument {
            id: 1,
            doc_type: "attachment".to_string(),
            status: "inherit".to_string(),
            mime_type: Some(mime.to_string()),
            modified_at: Utc::now(),
            title: "file".to_string(),
            body: String::new(),
            excerpt: String::new(),
            override_text: None,
            file_path: Some("file.bin".to_string()),
        }
    }

    #[test]
    fn batch_limit_scales_with_backlog() {
        assert_eq!(batch_limit(0, 0), 100);
        assert_eq!(batch_limit(0, 2000), 100);
        assert_eq!(batch_limit(0, 2001), 1000);
        assert_eq!(batch_limit(25, 50_000), 25);
    }

    #[test]
    fn new_attachment_goes_pending() {
        let doc = attachment(MIME_PDF);
        let cfg = ExtractConfig::default();
        assert_eq!(
            initial_status(&doc, None, false, &cfg),
            RecordStatus::Pending
        );
    }

    #[test]
    fn override_text_skips_extraction() {
        let doc = attachment(MIME_PDF);
        let cfg = ExtractConfig::default();
        assert_eq!(
            initial_status(&doc, Some("provided"), false, &cfg),
            RecordStatus::Ok
        );
    }

    #[test]
    fn update_of_existing_content_does_not_requeue() {
        let doc = attachment(MIME_DOCX);
        let cfg = ExtractConfig::default();
        assert_eq!(initial_status(&doc, None, true, &cfg), RecordStatus::Ok);
    }

    #[test]
    fn disabled_format_stays_ok() {
        let doc = attachment(MIME_XLSX);
        let cfg = ExtractConfig {
            excel: false,
            ..ExtractConfig::default()
        };
        assert_eq!(initial_status(&doc, None, false, &cfg), RecordStatus::Ok);
    }

    #[test]
    fn non_attachment_is_never_pending() {
        let mut doc = attachment(MIME_PDF);
        doc.doc_type = "post".to_string();
        let cfg = ExtractConfig::default();
        assert_eq!(initial_status(&doc, None, false, &cfg), RecordStatus::Ok);
    }

    #[test]
    fn unknown_mime_is_never_pending() {
        let doc = attachment("application/zip");
        let cfg = ExtractConfig::default();
        assert_eq!(initial_status(&doc, None, false, &cfg), RecordStatus::Ok);
    }

    #[test]
    fn failure_kinds_map_to_status_codes() {
        assert_eq!(
            failure_status(&ExtractError::Encrypted),
            RecordStatus::Encrypted
        );
        assert_eq!(
            failure_status(&ExtractError::UnsupportedEncoding),
            RecordStatus::Unsupported
        );
        assert_eq!(
            failure_status(&ExtractError::Io("gone".into())),
            RecordStatus::Error
        );
        assert_eq!(
            failure_status(&ExtractError::Corrupt("bad".into())),
            RecordStatus::Error
        );
    }
}
