//! Index completeness reporting.

use anyhow::Result;
use std::sync::Arc;

use crate::models::RecordStatus;
use crate::source::SourceAccessor;
use crate::store::IndexStore;

/// Snapshot of index coverage against the source collection.
#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    pub eligible: u64,
    pub indexed: u64,
    /// Indexed record counts per extraction status, in status-code order.
    pub by_status: Vec<(RecordStatus, u64)>,
}

impl StatusReport {
    /// Whole-percent completeness, 100 when there is nothing to index.
    pub fn percent_complete(&self) -> u64 {
        if self.eligible == 0 {
            return 100;
        }
        (self.indexed.min(self.eligible) * 100) / self.eligible
    }
}

pub async fn gather(
    source: &Arc<dyn SourceAccessor>,
    store: &Arc<dyn IndexStore>,
) -> Result<StatusReport> {
    let eligible = source.count_eligible().await?;
    let indexed = store.count_all().await?;
    let counts = store.status_counts().await?;

    let mut by_status = Vec::new();
    for code in 0..=4 {
        let status = RecordStatus::from_i64(code);
        let count = counts.get(&code).copied().unwrap_or(0);
        if count > 0 {
            by_status.push((status, count));
        }
    }

    Ok(StatusReport {
        eligible,
        indexed,
        by_status,
    })
}

pub fn print_report(report: &StatusReport) {
    println!("Index status");
    println!("  Eligible documents: {}", report.eligible);
    println!("  Indexed records:    {}", report.indexed);
    println!("  Complete:           {}%", report.percent_complete());
    if !report.by_status.is_empty() {
        println!("  By extraction status:");
        for (status, count) in &report.by_status {
            println!("    {:<14} {}", status_name(*status), count);
        }
    }
}

fn status_name(status: RecordStatus) -> &'static str {
    match status {
        RecordStatus::Ok => "ok",
        RecordStatus::Pending => "pending",
        RecordStatus::Encrypted => "encrypted",
        RecordStatus::Unsupported => "unsupported",
        RecordStatus::Error => "error",
    }
}
