//! Core data models shared by the synchronizer, extractors, and store.
//!
//! `SourceDocument` is read from the primary content store and never
//! written by this crate; `IndexRecord` is the searchable unit the
//! synchronizer maintains.

use chrono::{DateTime, Utc};

/// Document types that are never indexed (transient host-side artifacts).
pub const NON_INDEXED_TYPES: &[&str] = &["revision", "autosave"];

/// Lifecycle state that marks a document as a placeholder, not yet content.
pub const TRANSIENT_STATUS: &str = "auto-draft";

/// Attachment MIME types the extraction engine understands.
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOC: &str = "application/msword";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

/// A content item read from the primary collection.
///
/// Owned and mutated exclusively by the host application; the index core
/// only ever reads these rows.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub id: i64,
    pub doc_type: String,
    pub status: String,
    /// Present only for binary attachments.
    pub mime_type: Option<String>,
    pub modified_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
    pub excerpt: String,
    /// Operator-supplied text that takes precedence over extraction.
    pub override_text: Option<String>,
    /// Attachment file path relative to the media root, when applicable.
    pub file_path: Option<String>,
}

impl SourceDocument {
    pub fn is_attachment(&self) -> bool {
        self.doc_type == "attachment"
    }
}

/// The persisted searchable unit, keyed by the source document id.
///
/// Replaced wholesale on sync; only the `keywords`/`status` pair is ever
/// updated in place (extraction is decoupled from the initial upsert).
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub id: i64,
    pub doc_type: String,
    pub modified_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
    pub excerpt: String,
    /// Extracted or override text; `None` while extraction is pending.
    pub keywords: Option<String>,
    pub status: RecordStatus,
}

/// Per-record extraction state machine (stored as an integer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    /// Indexed; no extraction pending.
    Ok = 0,
    /// Attachment awaiting a text-extraction pass.
    Pending = 1,
    /// PDF was encrypted/secured.
    Encrypted = 2,
    /// Legacy binary layout not recognized.
    Unsupported = 3,
    /// Any other extraction or I/O failure.
    Error = 4,
}

impl RecordStatus {
    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => RecordStatus::Pending,
            2 => RecordStatus::Encrypted,
            3 => RecordStatus::Unsupported,
            4 => RecordStatus::Error,
            _ => RecordStatus::Ok,
        }
    }

    /// Short operator-facing label shown next to affected documents.
    pub fn label(&self) -> &'static str {
        match self {
            RecordStatus::Ok => "",
            RecordStatus::Pending => "(Pending)",
            RecordStatus::Encrypted => "(Encrypted)",
            RecordStatus::Unsupported => "(Unsupported)",
            RecordStatus::Error => "(Error)",
        }
    }
}

/// A ranked hit returned by the bundled query executor.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: i64,
    pub doc_type: String,
    pub title: String,
    pub excerpt: String,
    pub modified_at: DateTime<Utc>,
    pub score: f64,
}

/// Outcome of one synchronizer tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickReport {
    /// Orphaned index records removed.
    pub deleted: u64,
    /// Records inserted or replaced this tick.
    pub upserted: u64,
    /// Extraction attempts that produced text.
    pub extracted: u64,
    /// Extraction attempts that failed (recorded in `status`).
    pub failed: u64,
    /// Stale documents left for a follow-up tick.
    pub remaining: u64,
}
