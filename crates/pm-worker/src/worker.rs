//! Job worker and in-process queue

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pm_browser::{BrowserConfig, SessionManager};
use pm_core::{Config, OperationResult};
use pm_crawler::{Dispatcher, Operations};

use crate::error::{Result, WorkerError};

/// Finished job as reported to the submitter
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub id: String,
    pub result: OperationResult,
    pub finished_at: DateTime<Utc>,
}

/// Runs jobs one at a time
pub struct JobWorker {
    dispatcher: Dispatcher,
}

impl JobWorker {
    /// The dispatcher's session manager must not be shared with the HTTP
    /// server, since it is shut down after every job.
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Worker with its own headless Chrome session manager
    pub fn from_config(config: &Config) -> Result<Self> {
        let sessions = Arc::new(SessionManager::chrome(BrowserConfig::from(&config.browser)));
        let operations = Operations::from_config(config, sessions)?;
        Ok(Self::new(Dispatcher::new(Arc::new(operations))))
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        self.dispatcher.sessions()
    }

    /// Run one job and close the browser afterwards
    pub async fn process_job(&self, payload: Value) -> OperationResult {
        let result = self.dispatcher.dispatch_json(payload).await;

        if let Err(e) = self.dispatcher.sessions().shutdown().await {
            warn!("Failed to close browser after job: {}", e);
        }

        result
    }

    /// Run a job and stamp the outcome
    pub async fn run(&self, id: String, payload: Value) -> JobOutcome {
        info!(job = %id, "Processing job");
        let result = self.process_job(payload).await;
        info!(job = %id, success = result.is_success(), "Job finished");

        JobOutcome {
            id,
            result,
            finished_at: Utc::now(),
        }
    }

    /// Start consuming a bounded queue in the background
    pub fn start(self, capacity: usize) -> WorkerHandle {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

        let handle = tokio::spawn(async move {
            info!("Job worker started (queue capacity {})", capacity.max(1));

            loop {
                tokio::select! {
                    job = rx.recv() => {
                        let Some(job) = job else { break };
                        let outcome = self.run(job.id, job.payload).await;
                        if job.reply.send(outcome).is_err() {
                            debug!("Job submitter went away before the result was ready");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Job worker received shutdown request");
                        break;
                    }
                }
            }

            info!("Job worker stopped");
        });

        WorkerHandle {
            queue: JobQueue { tx },
            shutdown_tx,
            handle,
        }
    }
}

struct Job {
    id: String,
    payload: Value,
    reply: oneshot::Sender<JobOutcome>,
}

/// Submits jobs to a running [`JobWorker`]
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
}

impl JobQueue {
    /// Enqueue a job and wait for its outcome.
    ///
    /// Waits for a free slot when the queue is full. The job id is taken from
    /// the payload's `id` field when it is a string, otherwise generated.
    pub async fn submit(&self, payload: Value) -> Result<JobOutcome> {
        let id = payload
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let (reply, outcome) = oneshot::channel();
        self.tx
            .send(Job {
                id: id.clone(),
                payload,
                reply,
            })
            .await
            .map_err(|_| WorkerError::QueueClosed)?;

        debug!(job = %id, "Job queued");
        outcome.await.map_err(|_| WorkerError::JobDropped(id))
    }
}

/// Control handle for a started worker
pub struct WorkerHandle {
    queue: JobQueue,
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn queue(&self) -> JobQueue {
        self.queue.clone()
    }

    /// Stop after the job in progress, if any
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pm_browser::testing::{FakeElement, FakeLauncher, FakePage, FakeSite};
    use pm_crawler::{ArtifactStore, BrowserExtractor, HttpFetcher};
    use serde_json::json;

    fn worker(launcher: Arc<FakeLauncher>, root: &std::path::Path) -> JobWorker {
        let sessions = Arc::new(SessionManager::new(BrowserConfig::default(), launcher));
        let extractor = BrowserExtractor::new(Arc::clone(&sessions), None);
        let fetcher = HttpFetcher::new(std::time::Duration::from_secs(1)).unwrap();
        let operations = Operations::new(
            sessions,
            Arc::new(extractor),
            Arc::new(fetcher),
            ArtifactStore::new(root, "/public"),
        );
        JobWorker::new(Dispatcher::new(Arc::new(operations)))
    }

    fn site() -> FakeSite {
        FakeSite::new().page(
            "https://example.com",
            FakePage::new().element(FakeElement::new("h1").text("Hello")),
        )
    }

    #[tokio::test]
    async fn test_process_job_closes_browser() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(FakeLauncher::new(site()));
        let worker = worker(Arc::clone(&launcher), dir.path());

        let result = worker
            .process_job(json!({"type": "verify", "url": "https://example.com", "selector": "h1"}))
            .await;
        assert!(result.is_success());
        assert_eq!(launcher.browsers_closed(), 1);

        // a failing job still closes the browser
        let result = worker
            .process_job(json!({"type": "extract", "url": "https://missing.example", "selector": "h1"}))
            .await;
        assert!(!result.is_success());
        assert_eq!(launcher.launch_count(), 2);
        assert_eq!(launcher.browsers_closed(), 2);
    }

    #[tokio::test]
    async fn test_invalid_job_does_not_launch() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(FakeLauncher::new(site()));
        let worker = worker(Arc::clone(&launcher), dir.path());

        let result = worker.process_job(json!({"url": "https://example.com"})).await;
        assert_eq!(result.error(), Some("No action type specified"));
        assert_eq!(launcher.launch_count(), 0);
        assert_eq!(launcher.browsers_closed(), 0);
    }

    #[tokio::test]
    async fn test_queue_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(FakeLauncher::new(site()));
        let handle = worker(Arc::clone(&launcher), dir.path()).start(4);
        let queue = handle.queue();

        let outcome = queue
            .submit(json!({
                "id": "job-1",
                "type": "extract",
                "url": "https://example.com",
                "selector": "h1"
            }))
            .await
            .unwrap();

        assert_eq!(outcome.id, "job-1");
        assert_eq!(outcome.result.data(), Some(&json!(["Hello"])));

        let outcome = queue
            .submit(json!({"type": "teleport", "url": "https://example.com"}))
            .await
            .unwrap();
        assert!(!outcome.id.is_empty());
        assert_eq!(outcome.result.error(), Some("Unknown action type: teleport"));

        handle.stop().await;
        let err = queue.submit(json!({"type": "wait"})).await.unwrap_err();
        assert!(matches!(err, WorkerError::QueueClosed));
    }

    #[tokio::test]
    async fn test_outcome_serialization() {
        let outcome = JobOutcome {
            id: "a".to_string(),
            result: OperationResult::failure("boom"),
            finished_at: Utc::now(),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["id"], "a");
        assert_eq!(value["result"], json!({"success": false, "error": "boom"}));
        assert!(value["finished_at"].is_string());
    }
}
