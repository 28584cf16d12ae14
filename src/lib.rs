//! # Fulltext Index
//!
//! An embeddable full-text search index maintenance engine.
//!
//! Fulltext Index keeps a searchable side index in step with a primary
//! document collection it never owns: an incremental synchronizer scans
//! for stale or orphaned records in bounded batches, binary attachments
//! (PDF, legacy and modern Word, Excel, PowerPoint) get their text
//! extracted into the index, and a query compiler turns free-form user
//! search strings into boolean-mode syntax for two engine dialects.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────┐
//! │ documents │──▶│ Synchronizer │──▶│  SQLite   │
//! │ (host-    │   │ tick + text  │   │ records + │
//! │  owned)   │   │  extraction  │   │   FTS5    │
//! └───────────┘   └──────────────┘   └────┬──────┘
//!                                         │
//!                    ┌────────────────────┤
//!                    ▼                    ▼
//!               ┌─────────┐        ┌────────────┐
//!               │   CLI   │        │   Query    │
//!               │  (fti)  │        │  compiler  │
//!               └─────────┘        └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! fti init                      # create database
//! fti sync                      # run synchronizer ticks to convergence
//! fti search "annual report"    # query the bundled FTS5 index
//! fti compile "foo OR bar"      # show the compiled boolean-mode string
//! fti status                    # index completeness report
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`source`] | Read-only access to the primary collection |
//! | [`store`] | Index record store (SQLite + FTS5) |
//! | [`sync`] | Incremental synchronizer |
//! | [`sched`] | Follow-up tick scheduling |
//! | [`extract`] | Attachment text extraction |
//! | [`textfilter`] | Markup stripping and content expansion |
//! | [`query`] | Boolean-mode query compilation |
//! | [`stats`] | Index completeness reporting |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod extract;
pub mod migrate;
pub mod models;
pub mod query;
pub mod sched;
pub mod source;
pub mod stats;
pub mod store;
pub mod sync;
pub mod textfilter;
