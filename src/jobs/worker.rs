//! Background worker: drains the job queue one job at a time.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::artifacts::ArtifactSink;
use crate::error::{Error, QueueError};
use crate::generation::ImageGenerator;
use crate::jobs::queue::{Job, JobReceiver};
use crate::store::Database;

/// Shared dependencies for job execution.
#[derive(Clone)]
pub struct WorkerDeps {
    pub store: Arc<dyn Database>,
    pub generator: Arc<dyn ImageGenerator>,
    pub sink: Arc<dyn ArtifactSink>,
}

/// Single consumer of the job queue.
///
/// Jobs run strictly one after another. A failing or panicking job marks its
/// viewing `Failed` and the loop moves on to the next one.
pub struct Worker {
    deps: WorkerDeps,
}

/// Handle to a spawned worker.
pub struct WorkerHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Cancel the worker and wait for the loop to exit.
    ///
    /// An in-flight job is interrupted and its viewing marked `Failed`.
    /// Jobs still buffered are left unprocessed and their viewings stay `Pending`.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.join().await;
    }

    /// Wait for the loop to exit without cancelling it.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            error!(error = %e, "Worker task ended abnormally");
        }
    }
}

impl Worker {
    pub fn new(deps: WorkerDeps) -> Self {
        Self { deps }
    }

    /// Start the worker loop on the runtime.
    pub fn spawn(self, receiver: JobReceiver, cancel: CancellationToken) -> WorkerHandle {
        let token = cancel.clone();
        let handle = tokio::spawn(self.run(receiver, token));
        WorkerHandle { cancel, handle }
    }

    /// Dequeue and execute jobs until cancelled or the queue closes.
    pub async fn run(self, mut receiver: JobReceiver, cancel: CancellationToken) {
        info!(generator = self.deps.generator.name(), "Worker started");
        loop {
            match receiver.dequeue(&cancel).await {
                Ok(job) => self.process(job, &cancel).await,
                Err(QueueError::Cancelled) => {
                    info!("Worker cancelled, stopping");
                    break;
                }
                Err(QueueError::Closed) => {
                    info!("Job queue closed, worker stopping");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Unexpected dequeue error");
                }
            }
        }
    }

    /// Execute one job and record its terminal status.
    async fn process(&self, job: Job, cancel: &CancellationToken) {
        let viewing_id = job.viewing_id();
        debug!(viewing_id = %viewing_id, "Processing job");

        let outcome = AssertUnwindSafe(self.execute(&job, cancel))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(image_url)) => match self.deps.store.complete_viewing(viewing_id, &image_url).await {
                Ok(true) => {
                    info!(viewing_id = %viewing_id, image_url = %image_url, "Viewing completed");
                }
                Ok(false) => {
                    warn!(viewing_id = %viewing_id, "Viewing missing or already terminal, result discarded");
                }
                Err(e) => {
                    error!(viewing_id = %viewing_id, error = %e, "Failed to record completion");
                    self.mark_failed(viewing_id).await;
                }
            },
            Ok(Err(e)) => {
                if cancel.is_cancelled() {
                    warn!(viewing_id = %viewing_id, "Job interrupted by shutdown");
                } else {
                    warn!(viewing_id = %viewing_id, error = %e, "Job failed");
                }
                self.mark_failed(viewing_id).await;
            }
            Err(panic) => {
                error!(
                    viewing_id = %viewing_id,
                    panic = %panic_message(panic.as_ref()),
                    "Job panicked"
                );
                self.mark_failed(viewing_id).await;
            }
        }
    }

    async fn execute(&self, job: &Job, cancel: &CancellationToken) -> Result<String, Error> {
        match job {
            Job::GenerateImage { viewing_id, input } => {
                let prompt = input.prompt();
                let image = self.deps.generator.generate(&prompt, cancel).await?;
                let url = self.deps.sink.store(*viewing_id, image, cancel).await?;
                Ok(url)
            }
        }
    }

    // Not raced against the token: the terminal write must land even during shutdown.
    async fn mark_failed(&self, viewing_id: Uuid) {
        match self.deps.store.fail_viewing(viewing_id).await {
            Ok(true) => {}
            Ok(false) => debug!(viewing_id = %viewing_id, "Viewing missing or already terminal"),
            Err(e) => error!(viewing_id = %viewing_id, error = %e, "Failed to record failure"),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::artifacts::LocalArtifactSink;
    use crate::error::GenerationError;
    use crate::generation::GeneratedImage;
    use crate::jobs::queue::JobQueue;
    use crate::store::LibSqlBackend;
    use crate::viewings::model::{FutureViewing, FutureViewingInput, ProcessingStatus};

    /// Fails when the prompt mentions "fail", panics on "panic", waits on "slow".
    #[derive(Default)]
    struct ScriptedGenerator {
        started: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ImageGenerator for ScriptedGenerator {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            prompt: &str,
            cancel: &CancellationToken,
        ) -> Result<GeneratedImage, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.store(true, Ordering::SeqCst);
            if prompt.contains("panic") {
                panic!("generator blew up");
            }
            if prompt.contains("fail") {
                return Err(GenerationError::RequestFailed {
                    provider: "scripted".into(),
                    reason: "boom".into(),
                });
            }
            if prompt.contains("slow") {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {}
                }
            }
            Ok(GeneratedImage::Bytes(vec![0x89, b'P', b'N', b'G']))
        }
    }

    struct Harness {
        store: Arc<dyn Database>,
        generator: Arc<ScriptedGenerator>,
        queue: JobQueue,
        handle: WorkerHandle,
        _dir: tempfile::TempDir,
    }

    async fn start(capacity: usize) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let generator = Arc::new(ScriptedGenerator::default());
        let sink = Arc::new(LocalArtifactSink::with_root(dir.path(), "static/images"));
        let (queue, receiver) = JobQueue::bounded(capacity);

        let worker = Worker::new(WorkerDeps {
            store: store.clone(),
            generator: generator.clone(),
            sink,
        });
        let handle = worker.spawn(receiver, CancellationToken::new());
        Harness {
            store,
            generator,
            queue,
            handle,
            _dir: dir,
        }
    }

    async fn submit(h: &Harness, content: &str) -> Uuid {
        let input = FutureViewingInput::new("Ana", 30, content);
        let viewing = FutureViewing::new(input.clone());
        h.store.insert_viewing(&viewing).await.unwrap();
        h.queue
            .enqueue(Job::GenerateImage {
                viewing_id: viewing.id,
                input,
            })
            .unwrap();
        viewing.id
    }

    async fn wait_for_status(store: &Arc<dyn Database>, id: Uuid, want: ProcessingStatus) -> FutureViewing {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let v = store.get_viewing(id).await.unwrap().unwrap();
            if v.status == want {
                return v;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "viewing {id} stuck in {:?}, wanted {:?}",
                v.status,
                want
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn successful_job_completes_viewing() {
        let h = start(10).await;
        let id = submit(&h, "robots planting trees").await;

        let v = wait_for_status(&h.store, id, ProcessingStatus::Completed).await;
        assert_eq!(v.image_url, Some(format!("/static/images/{id}.png")));
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn failure_does_not_stop_the_loop() {
        let h = start(10).await;
        let failed = submit(&h, "this will fail").await;
        let ok = submit(&h, "a calm ocean city").await;

        let v = wait_for_status(&h.store, failed, ProcessingStatus::Failed).await;
        assert_eq!(v.image_url, None);
        wait_for_status(&h.store, ok, ProcessingStatus::Completed).await;
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn panic_is_isolated_to_its_job() {
        let h = start(10).await;
        let bad = submit(&h, "panic please").await;
        let good = submit(&h, "gardens on mars").await;

        wait_for_status(&h.store, bad, ProcessingStatus::Failed).await;
        wait_for_status(&h.store, good, ProcessingStatus::Completed).await;
        assert_eq!(h.generator.calls.load(Ordering::SeqCst), 2);
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_fails_in_flight_and_keeps_buffered_pending() {
        let h = start(10).await;
        let in_flight = submit(&h, "slow painting").await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !h.generator.started.load(Ordering::SeqCst) {
            assert!(tokio::time::Instant::now() < deadline, "generator never started");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let buffered = submit(&h, "never processed").await;

        tokio::time::timeout(Duration::from_secs(2), h.handle.shutdown())
            .await
            .expect("worker should stop promptly");

        let v = h.store.get_viewing(in_flight).await.unwrap().unwrap();
        assert_eq!(v.status, ProcessingStatus::Failed);
        let v = h.store.get_viewing(buffered).await.unwrap().unwrap();
        assert_eq!(v.status, ProcessingStatus::Pending);
        assert_eq!(h.generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn worker_exits_when_queue_closes() {
        let h = start(4).await;
        let id = submit(&h, "last one").await;
        drop(h.queue);

        tokio::time::timeout(Duration::from_secs(2), h.handle.join())
            .await
            .expect("worker should exit after draining a closed queue");
        let v = h.store.get_viewing(id).await.unwrap().unwrap();
        assert_eq!(v.status, ProcessingStatus::Completed);
    }

    #[test]
    fn panic_message_extracts_text() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static msg");
        assert_eq!(panic_message(payload.as_ref()), "static msg");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned msg"));
        assert_eq!(panic_message(payload.as_ref()), "owned msg");
        let payload: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
