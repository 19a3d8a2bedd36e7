//! Batch cursor: one forward-only pass over the records of a set of kinds.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::StreamExt;
use ncr_state::{Context, Record, RecordKind, RecordStream, Repository, StorageError};
use tracing::debug;

use crate::error::{Result, SyncError};

/// Walks the resolved kinds in order, streaming each kind to exhaustion
/// before opening the next.
///
/// Any repository failure, on open or mid-stream, ends the cursor with
/// [`SyncError::SourceUnavailable`]; later calls return `Ok(None)`.
pub struct BatchCursor {
    repository: Arc<dyn Repository>,
    ctx: Context,
    pending: VecDeque<RecordKind>,
    current: Option<(RecordKind, RecordStream)>,
    yielded: u64,
}

impl BatchCursor {
    pub fn new(repository: Arc<dyn Repository>, kinds: Vec<RecordKind>, ctx: Context) -> Self {
        Self {
            repository,
            ctx,
            pending: kinds.into(),
            current: None,
            yielded: 0,
        }
    }

    /// Next record, or `None` once every kind is exhausted.
    pub async fn next(&mut self) -> Result<Option<Record>> {
        loop {
            if let Some((kind, stream)) = self.current.as_mut() {
                match stream.next().await {
                    Some(Ok(record)) => {
                        self.yielded += 1;
                        return Ok(Some(record));
                    }
                    Some(Err(e)) => {
                        let kind = kind.to_string();
                        self.abandon();
                        return Err(source_unavailable(kind, e));
                    }
                    None => {
                        debug!(kind = %kind, "kind exhausted");
                        self.current = None;
                    }
                }
            }

            let Some(kind) = self.pending.pop_front() else {
                return Ok(None);
            };
            debug!(kind = %kind, "opening stream");
            match self.repository.stream(&kind, &self.ctx).await {
                Ok(stream) => self.current = Some((kind, stream)),
                Err(e) => {
                    self.abandon();
                    return Err(source_unavailable(kind.to_string(), e));
                }
            }
        }
    }

    /// Kind currently being streamed.
    pub fn current_kind(&self) -> Option<&RecordKind> {
        self.current.as_ref().map(|(kind, _)| kind)
    }

    /// Records handed out so far.
    pub fn yielded(&self) -> u64 {
        self.yielded
    }

    fn abandon(&mut self) {
        self.current = None;
        self.pending.clear();
    }
}

fn source_unavailable(kind: String, err: StorageError) -> SyncError {
    let reason = match err {
        StorageError::StreamUnavailable { reason, .. } => reason,
        other => other.to_string(),
    };
    SyncError::SourceUnavailable { kind, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ncr_state::fakes::MemoryRepository;
    use ncr_state::RecordStatus;
    use serde_json::Map;

    fn kind(s: &str) -> RecordKind {
        s.parse().unwrap()
    }

    fn seed(repo: &MemoryRepository, kind: &str, count: usize) {
        for i in 0..count {
            repo.seed(
                "",
                Record::new(
                    format!("{kind}:{i:03}").parse().unwrap(),
                    RecordStatus::Published,
                    None,
                    Map::new(),
                    1,
                ),
            );
        }
    }

    #[tokio::test]
    async fn walks_kinds_in_order() {
        let repo = Arc::new(MemoryRepository::new());
        seed(&repo, "acme:article", 2);
        seed(&repo, "acme:video", 3);

        let mut cursor = BatchCursor::new(
            repo,
            vec![kind("acme:video"), kind("acme:article")],
            Context::new(),
        );
        let mut seen = Vec::new();
        while let Some(record) = cursor.next().await.unwrap() {
            seen.push(record.kind().name().to_string());
        }
        assert_eq!(seen, vec!["video", "video", "video", "article", "article"]);
        assert_eq!(cursor.yielded(), 5);
        assert!(cursor.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_failure_is_source_unavailable_and_final() {
        let repo = Arc::new(MemoryRepository::new());
        seed(&repo, "acme:article", 2);
        repo.make_unavailable(&kind("acme:video"));

        let mut cursor = BatchCursor::new(
            repo,
            vec![kind("acme:video"), kind("acme:article")],
            Context::new(),
        );
        let err = cursor.next().await.unwrap_err();
        assert!(matches!(err, SyncError::SourceUnavailable { ref kind, .. } if kind == "acme:video"));
        assert!(cursor.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mid_stream_failure_is_source_unavailable() {
        let repo = Arc::new(MemoryRepository::new());
        seed(&repo, "acme:article", 5);
        repo.fail_stream_after(&kind("acme:article"), 2);

        let mut cursor = BatchCursor::new(repo, vec![kind("acme:article")], Context::new());
        assert!(cursor.next().await.unwrap().is_some());
        assert_eq!(cursor.current_kind(), Some(&kind("acme:article")));
        assert!(cursor.next().await.unwrap().is_some());
        let err = cursor.next().await.unwrap_err();
        assert!(matches!(err, SyncError::SourceUnavailable { .. }));
    }
}
