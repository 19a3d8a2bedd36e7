//! Run counters, the final report and per-record progress output.

use std::io::Write;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use ncr_state::{Record, RecordRef};
use serde::Serialize;
use uuid::Uuid;

use crate::reconcile::Reconciled;

/// Counters for one run. Updated only by the driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Records pulled from the cursor
    pub seen: u64,
    /// Records applied (indexed, synced or matched, exported)
    pub processed: u64,
    /// Records lost to failed chunks or per-record errors
    pub failed: u64,
    pub synced: u64,
    pub matched: u64,
    /// Synced records whose index write was lost to a skipped chunk
    pub unindexed: u64,
    pub batches: u64,
    pub pauses: u64,
    pub failed_chunks: u64,
    /// Batch currently being filled
    pub current_batch: u64,
}

/// Which pipeline operation produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Reindex,
    Sync,
    Export,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Reindex => "reindex",
            Command::Sync => "sync",
            Command::Export => "export",
        }
    }
}

/// Final summary of a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub command: Command,
    /// Kind or "ALL"
    pub selector: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub dry_run: bool,
    #[serde(flatten)]
    pub stats: RunStats,
}

impl RunReport {
    /// One-line summary in the form operators are used to.
    pub fn summary(&self) -> String {
        match self.command {
            Command::Reindex if self.dry_run => format!(
                "DRY RUN - would have reindexed {} nodes for qname \"{}\".",
                self.stats.processed, self.selector
            ),
            Command::Reindex => format!(
                "Reindexed {} nodes for qname \"{}\".",
                self.stats.processed, self.selector
            ),
            Command::Sync => format!(
                "Synced {} of {} nodes for qname \"{}\".",
                self.stats.synced + self.stats.matched,
                self.stats.seen,
                self.selector
            ),
            Command::Export => format!(
                "Exported {} of {} nodes for qname \"{}\".",
                self.stats.processed, self.stats.seen, self.selector
            ),
        }
    }

    /// `true` when anything was lost to a skipped error.
    pub fn has_failures(&self) -> bool {
        self.stats.failed > 0 || self.stats.unindexed > 0
    }
}

/// Receives per-record progress from the driver.
pub trait ProgressSink: Send + Sync {
    /// A record entered a reindex batch.
    fn record(&self, seq: u64, record: &Record);

    /// A record was reconciled during sync.
    fn reconciled(&self, seq: u64, reconciled: &Reconciled);

    /// A record failed during sync.
    fn failed(&self, seq: u64, record_ref: &RecordRef, error: &dyn std::fmt::Display);
}

/// Discards progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn record(&self, _seq: u64, _record: &Record) {}
    fn reconciled(&self, _seq: u64, _reconciled: &Reconciled) {}
    fn failed(&self, _seq: u64, _record_ref: &RecordRef, _error: &dyn std::fmt::Display) {}
}

/// Writes one numbered line per record.
///
/// ```text
/// 1. node_ref:acme:article:1, status:published, etag:9f2c..., title:Hello
/// 2. SYNCED node_ref:acme:article:2, status:draft, etag:41ab..., title:
/// 3. FAILED node_ref:acme:article:3, error:version conflict on ...
/// ```
pub struct LineProgress<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> LineProgress<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn line(&self, text: String) {
        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        // best effort
        let _ = writeln!(out, "{text}");
    }
}

fn describe(record: &Record) -> String {
    format!(
        "node_ref:{}, status:{}, etag:{}, title:{}",
        record.record_ref(),
        record.status(),
        record.etag(),
        record.title().unwrap_or_default()
    )
}

impl<W: Write + Send> ProgressSink for LineProgress<W> {
    fn record(&self, seq: u64, record: &Record) {
        self.line(format!("{seq}. {}", describe(record)));
    }

    fn reconciled(&self, seq: u64, reconciled: &Reconciled) {
        self.line(format!(
            "{seq}. {} {}",
            reconciled.outcome,
            describe(&reconciled.record)
        ));
    }

    fn failed(&self, seq: u64, record_ref: &RecordRef, error: &dyn std::fmt::Display) {
        self.line(format!("{seq}. FAILED node_ref:{record_ref}, error:{error}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::Outcome;
    use ncr_state::RecordStatus;
    use serde_json::Map;

    fn record() -> Record {
        Record::new(
            "acme:article:1".parse().unwrap(),
            RecordStatus::Published,
            Some("Hello".into()),
            Map::new(),
            1,
        )
    }

    fn report(command: Command) -> RunReport {
        RunReport {
            run_id: Uuid::new_v4(),
            command,
            selector: "ALL".into(),
            started_at: Utc::now(),
            duration_ms: 12,
            dry_run: false,
            stats: RunStats {
                seen: 250,
                processed: 240,
                failed: 10,
                synced: 5,
                matched: 235,
                batches: 3,
                ..RunStats::default()
            },
        }
    }

    #[test]
    fn progress_lines() {
        let sink = LineProgress::new(Vec::new());
        let r = record();
        sink.record(1, &r);
        sink.reconciled(
            2,
            &Reconciled {
                record_ref: r.record_ref().clone(),
                outcome: Outcome::Synced,
                record: r.clone(),
            },
        );
        sink.failed(3, r.record_ref(), &"boom");

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            format!(
                "1. node_ref:acme:article:1, status:published, etag:{}, title:Hello",
                r.etag()
            )
        );
        assert!(lines[1].starts_with("2. SYNCED node_ref:acme:article:1"));
        assert_eq!(lines[2], "3. FAILED node_ref:acme:article:1, error:boom");
    }

    #[test]
    fn summaries() {
        assert_eq!(
            report(Command::Sync).summary(),
            "Synced 240 of 250 nodes for qname \"ALL\"."
        );
        assert_eq!(
            report(Command::Reindex).summary(),
            "Reindexed 240 nodes for qname \"ALL\"."
        );
        assert!(report(Command::Reindex).has_failures());
    }

    #[test]
    fn report_serializes_flat() {
        let value = serde_json::to_value(report(Command::Export)).unwrap();
        assert_eq!(value["command"], "export");
        assert_eq!(value["seen"], 250);
        assert_eq!(value["failed"], 10);
        assert!(value["run_id"].is_string());
    }
}
