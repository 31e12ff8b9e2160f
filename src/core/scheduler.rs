//! Single-flight ingestion scheduler.
//!
//! At most one item's pipeline runs at a time. Items enqueued while one is
//! running wait in a FIFO and start, in order, once it settles. An item that
//! arrives while the scheduler is idle starts right away.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::stages::ItemPipeline;
use crate::domain::{
    EventSink, FailureDetail, ItemId, PipelineEvent, PipelineEventKind, ProcessInfo, ProcessResult,
    ProcessStatus,
};
use crate::error::Error;
use crate::library::store::ItemStore;

#[derive(Debug, Clone)]
struct Job {
    id: ItemId,
    source: String,
}

#[derive(Debug, Default)]
struct State {
    running: bool,
    queue: VecDeque<Job>,
}

struct Inner {
    pipeline: Arc<dyn ItemPipeline>,
    store: Arc<ItemStore>,
    state: Mutex<State>,
    /// `true` whenever nothing is running and the queue is empty
    idle: watch::Sender<bool>,
}

/// Handle to the scheduler. Clones share the same queue and worker.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<dyn ItemPipeline>, store: Arc<ItemStore>) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                pipeline,
                store,
                state: Mutex::new(State::default()),
                idle,
            }),
        }
    }

    /// Queue `source` for item `id`.
    ///
    /// Returns true if the pipeline started immediately, false if the item
    /// is waiting behind another one. Must be called inside a tokio runtime.
    pub fn enqueue(&self, id: ItemId, source: impl Into<String>) -> bool {
        let job = Job {
            id,
            source: source.into(),
        };

        let started = {
            let mut state = self.state();
            if !state.running && state.queue.is_empty() {
                state.running = true;
                self.inner.idle.send_replace(false);
                true
            } else {
                debug!(item_id = id, position = state.queue.len(), "Queued behind running item");
                state.queue.push_back(job.clone());
                false
            }
        };

        if started {
            let worker = self.clone();
            tokio::spawn(async move { worker.work(job).await });
        }
        started
    }

    /// Whether a pipeline is running
    pub fn is_running(&self) -> bool {
        self.state().running
    }

    /// Number of items waiting behind the running one
    pub fn queued(&self) -> usize {
        self.state().queue.len()
    }

    /// Resolve once the queue is drained and nothing is running
    pub async fn wait_idle(&self) {
        let mut idle = self.inner.idle.subscribe();
        // The sender lives in `inner`, which we hold, so this cannot fail
        let _ = idle.wait_for(|idle| *idle).await;
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Worker loop: run `job`, then keep popping until the queue is empty
    async fn work(self, mut job: Job) {
        loop {
            self.run_one(job.id, &job.source).await;

            let next = {
                let mut state = self.state();
                let next = state.queue.pop_front();
                if next.is_none() {
                    state.running = false;
                    self.inner.idle.send_replace(true);
                }
                next
            };

            match next {
                Some(next) => {
                    // Let other tasks on this runtime make progress between items
                    tokio::task::yield_now().await;
                    job = next;
                }
                None => break,
            }
        }
        debug!("Scheduler idle");
    }

    #[instrument(skip(self, source), fields(item_id = id))]
    async fn run_one(&self, id: ItemId, source: &str) {
        info!(source, "Processing item");

        let (events, mut rx) = EventSink::channel();
        let pipeline = self.inner.pipeline.clone();
        let task_source = source.to_string();

        // Run the pipeline on its own task so a panic inside it is reported
        // as a failure instead of taking the worker down
        let run = tokio::spawn(async move { pipeline.process(id, &task_source, events).await });

        let apply = async {
            while let Some(event) = rx.recv().await {
                self.apply_event(id, event).await;
            }
        };

        let (outcome, ()) = tokio::join!(run, apply);
        let outcome = outcome.unwrap_or_else(|e| Err(anyhow!("Pipeline task failed: {}", e)));

        match outcome {
            Ok(result) => self.finish(id, result).await,
            Err(err) => self.fail(id, FailureDetail::from_error(&err)).await,
        }
    }

    /// Persist a status event. Runs in send order.
    async fn apply_event(&self, id: ItemId, event: PipelineEvent) {
        match event.kind {
            PipelineEventKind::Status { status } => {
                info!(item_id = id, %status, "Status changed");
                let update = self
                    .inner
                    .store
                    .read_modify_write(id, move |item| item.viewer_data.process_status = status)
                    .await;
                self.report_store_error(id, update.err());
            }
            PipelineEventKind::StageFinished { stage, elapsed_ms } => {
                debug!(item_id = id, %stage, elapsed_ms, "Stage timing");
            }
        }
    }

    async fn finish(&self, id: ItemId, result: ProcessResult) {
        info!(item_id = id, title = %result.title, timing = ?result.process.timing, "Item complete");
        let update = self
            .inner
            .store
            .read_modify_write(id, move |item| {
                item.apply_result(result);
                item.viewer_data.process_status = ProcessStatus::Complete;
            })
            .await;
        self.report_store_error(id, update.err());
    }

    async fn fail(&self, id: ItemId, detail: FailureDetail) {
        error!(item_id = id, error = %detail.message, "Item failed");
        let update = self
            .inner
            .store
            .read_modify_write(id, move |item| {
                item.viewer_data.process_status = ProcessStatus::Error;
                item.process = Some(ProcessInfo::failed(&detail));
            })
            .await;
        self.report_store_error(id, update.err());
    }

    fn report_store_error(&self, id: ItemId, err: Option<Error>) {
        match err {
            None => {}
            Some(Error::ItemNotFound(_)) => {
                warn!(item_id = id, "Item was deleted while processing");
            }
            Some(e) => error!(item_id = id, error = %e, "Failed to persist item"),
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Scheduler")
            .field("running", &state.running)
            .field("queued", &state.queue.len())
            .finish()
    }
}
