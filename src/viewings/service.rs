//! Producer-facing operations: submit, list, recent-unseen, get.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::jobs::{Job, JobQueue};
use crate::store::Database;
use crate::viewings::model::{FutureViewing, FutureViewingInput};

/// Default page size when none (or a non-positive one) is given.
pub const DEFAULT_PAGE_SIZE: u64 = 20;
/// How far back `list_recent_unseen` looks.
pub const RECENT_WINDOW_HOURS: i64 = 24;

/// 1-based page request, already clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u64,
    pub page_size: u64,
}

impl Pagination {
    /// `page <= 0` becomes 1 and `page_size <= 0` becomes 20.
    pub fn new(page: i64, page_size: i64) -> Self {
        let page = if page <= 0 { 1 } else { page as u64 };
        let page_size = if page_size <= 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size as u64
        };
        Self { page, page_size }
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.page_size)
    }

    pub fn limit(&self) -> u64 {
        self.page_size
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE as i64)
    }
}

/// Entry point for request handlers. Cheap to clone.
#[derive(Clone)]
pub struct ViewingService {
    store: Arc<dyn Database>,
    queue: JobQueue,
}

impl ViewingService {
    pub fn new(store: Arc<dyn Database>, queue: JobQueue) -> Self {
        Self { store, queue }
    }

    /// The queue jobs are handed to.
    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Validate, persist as `Pending`, and hand generation to the worker.
    ///
    /// Returns as soon as the record is persisted. If the queue is full the
    /// job is dropped and the record stays `Pending`; the caller still gets
    /// the record.
    pub async fn submit(&self, input: FutureViewingInput) -> Result<FutureViewing> {
        input.validate()?;

        let viewing = FutureViewing::new(input.clone());
        self.store.insert_viewing(&viewing).await?;
        info!(viewing_id = %viewing.id, "Viewing created");

        let job = Job::GenerateImage {
            viewing_id: viewing.id,
            input,
        };
        if let Err(e) = self.queue.enqueue(job) {
            warn!(viewing_id = %viewing.id, error = %e, "Image generation not scheduled");
        }

        Ok(viewing)
    }

    /// Every viewing, newest first. Read-only.
    pub async fn list_all(&self, page: Pagination) -> Result<Vec<FutureViewing>> {
        let viewings = self
            .store
            .list_viewings(page.offset(), page.limit())
            .await?;
        Ok(viewings)
    }

    /// Completed viewings from the last 24 hours that nobody has seen yet.
    ///
    /// The page is selected newest first and returned oldest first. Returned
    /// records are marked seen, so no record is ever returned twice.
    pub async fn list_recent_unseen(&self, page: Pagination) -> Result<Vec<FutureViewing>> {
        let since = Utc::now() - ChronoDuration::hours(RECENT_WINDOW_HOURS);
        let mut viewings = self
            .store
            .take_recent_unseen(since, page.offset(), page.limit())
            .await?;
        viewings.reverse();
        debug!(count = viewings.len(), "Recent viewings marked seen");
        Ok(viewings)
    }

    /// Find one viewing.
    pub async fn get(&self, id: Uuid) -> Result<Option<FutureViewing>> {
        Ok(self.store.get_viewing(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use crate::artifacts::LocalArtifactSink;
    use crate::error::{Error, GenerationError, ValidationError};
    use crate::generation::{GeneratedImage, ImageGenerator};
    use crate::jobs::{JobReceiver, Worker, WorkerDeps};
    use crate::store::LibSqlBackend;
    use crate::viewings::model::ProcessingStatus;

    async fn service(capacity: usize) -> (ViewingService, JobReceiver, Arc<dyn Database>) {
        let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let (queue, receiver) = JobQueue::bounded(capacity);
        (ViewingService::new(store.clone(), queue), receiver, store)
    }

    fn input(name: &str) -> FutureViewingInput {
        FutureViewingInput::new(name, 12, "a city of floating gardens")
    }

    struct SlowGenerator;

    #[async_trait]
    impl ImageGenerator for SlowGenerator {
        fn name(&self) -> &str {
            "slow"
        }

        async fn generate(
            &self,
            _prompt: &str,
            cancel: &CancellationToken,
        ) -> std::result::Result<GeneratedImage, GenerationError> {
            tokio::select! {
                _ = cancel.cancelled() => Err(GenerationError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(200)) => Ok(GeneratedImage::Bytes(vec![1])),
            }
        }
    }

    #[test]
    fn pagination_clamps_inputs() {
        assert_eq!(Pagination::new(0, -5), Pagination::new(1, 20));
        assert_eq!(Pagination::new(-3, 0), Pagination { page: 1, page_size: 20 });
        assert_eq!(Pagination::new(2, 500).page_size, 500);
        assert_eq!(Pagination::new(i64::MAX, 20).offset(), u64::MAX);
        assert_eq!(Pagination::new(3, 10).offset(), 20);
        assert_eq!(Pagination::default().offset(), 0);
    }

    #[tokio::test]
    async fn submit_returns_pending_and_enqueues() {
        let (svc, mut rx, store) = service(10).await;

        let a = svc.submit(input("Ana")).await.unwrap();
        let b = svc.submit(input("Luis")).await.unwrap();
        assert_eq!(a.status, ProcessingStatus::Pending);
        assert_ne!(a.id, b.id);
        assert!(store.get_viewing(a.id).await.unwrap().is_some());

        let cancel = CancellationToken::new();
        assert_eq!(rx.dequeue(&cancel).await.unwrap().viewing_id(), a.id);
        assert_eq!(rx.dequeue(&cancel).await.unwrap().viewing_id(), b.id);
    }

    #[tokio::test]
    async fn invalid_input_creates_nothing() {
        let (svc, _rx, store) = service(10).await;

        let err = svc
            .submit(FutureViewingInput::new("", 12, "x"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::Required { field: "name" })
        ));
        assert!(store.list_viewings(0, 10).await.unwrap().is_empty());
        assert_eq!(svc.queue().pending(), 0);
    }

    #[tokio::test]
    async fn submit_succeeds_when_queue_full() {
        let (svc, _rx, store) = service(1).await;

        svc.submit(input("first")).await.unwrap();
        let dropped = svc.submit(input("second")).await.unwrap();

        assert_eq!(dropped.status, ProcessingStatus::Pending);
        assert_eq!(svc.queue().pending(), 1);
        let stored = store.get_viewing(dropped.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Pending);
    }

    #[tokio::test]
    async fn slow_worker_with_capacity_one_leaves_a_record_pending() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, rx, store) = service(1).await;
        let worker = Worker::new(WorkerDeps {
            store: store.clone(),
            generator: Arc::new(SlowGenerator),
            sink: Arc::new(LocalArtifactSink::with_root(dir.path(), "static/images")),
        });
        let handle = worker.spawn(rx, CancellationToken::new());

        let mut ids = Vec::new();
        for name in ["a", "b", "c"] {
            ids.push(svc.submit(input(name)).await.unwrap().id);
        }

        // Long enough for every accepted job to finish.
        tokio::time::sleep(Duration::from_millis(900)).await;
        handle.shutdown().await;

        let mut pending = 0;
        let mut completed = 0;
        for id in ids {
            match store.get_viewing(id).await.unwrap().unwrap().status {
                ProcessingStatus::Pending => pending += 1,
                ProcessingStatus::Completed => completed += 1,
                ProcessingStatus::Failed => {}
            }
        }
        assert!(pending >= 1, "expected a dropped job to leave its record pending");
        assert!(completed >= 1);
    }

    #[tokio::test]
    async fn list_all_is_read_only() {
        let (svc, _rx, store) = service(10).await;
        let v = svc.submit(input("Ana")).await.unwrap();
        store.complete_viewing(v.id, "/static/images/x.png").await.unwrap();

        let first = svc.list_all(Pagination::new(0, -5)).await.unwrap();
        let second = svc.list_all(Pagination::new(1, 20)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        assert!(!first[0].has_been_viewed);
    }

    #[tokio::test]
    async fn recent_unseen_is_oldest_first_and_returned_once() {
        let (svc, _rx, store) = service(10).await;
        let now = Utc::now();

        let mut ids = Vec::new();
        for (i, minutes_ago) in [30, 20, 10].into_iter().enumerate() {
            let v = FutureViewing::new(input(&format!("n{i}")))
                .with_created_at(now - ChronoDuration::minutes(minutes_ago));
            store.insert_viewing(&v).await.unwrap();
            store.complete_viewing(v.id, "/static/images/v.png").await.unwrap();
            ids.push(v.id);
        }
        let stale = FutureViewing::new(input("old")).with_created_at(now - ChronoDuration::hours(30));
        store.insert_viewing(&stale).await.unwrap();
        store.complete_viewing(stale.id, "/static/images/old.png").await.unwrap();

        // Page of two newest, delivered oldest first.
        let page = svc.list_recent_unseen(Pagination::new(1, 2)).await.unwrap();
        let got: Vec<Uuid> = page.iter().map(|v| v.id).collect();
        assert_eq!(got, vec![ids[1], ids[2]]);
        assert!(page.iter().all(|v| v.has_been_viewed));

        let rest = svc.list_recent_unseen(Pagination::default()).await.unwrap();
        assert_eq!(rest.iter().map(|v| v.id).collect::<Vec<_>>(), vec![ids[0]]);

        assert!(svc.list_recent_unseen(Pagination::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn far_page_is_empty_and_marks_nothing_seen() {
        let (svc, _rx, store) = service(10).await;
        let v = svc.submit(input("Ana")).await.unwrap();
        store.complete_viewing(v.id, "/static/images/a.png").await.unwrap();

        let far = Pagination::new(i64::MAX, 20);
        assert!(svc.list_all(far).await.unwrap().is_empty());
        assert!(svc.list_recent_unseen(far).await.unwrap().is_empty());

        let stored = store.get_viewing(v.id).await.unwrap().unwrap();
        assert!(!stored.has_been_viewed);
        assert_eq!(svc.list_recent_unseen(Pagination::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_finds_or_none() {
        let (svc, _rx, _store) = service(10).await;
        let v = svc.submit(input("Ana")).await.unwrap();
        assert_eq!(svc.get(v.id).await.unwrap().map(|f| f.id), Some(v.id));
        assert!(svc.get(Uuid::new_v4()).await.unwrap().is_none());
    }
}
