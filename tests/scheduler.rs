//! Scheduler Integration Tests
//!
//! Single-flight execution, queue order, failure isolation and the order in
//! which status updates reach the item store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use sbbp::domain::{EventSink, ImageSet, Item, ItemId, ProcessInfo, ProcessResult, ProcessStatus};
use sbbp::{ItemPipeline, ItemStore, Scheduler};

/// Records execution order and the peak number of concurrent runs
struct RecordingPipeline {
    store: Arc<ItemStore>,
    active: AtomicUsize,
    peak: AtomicUsize,
    order: Mutex<Vec<ItemId>>,
    /// Sources containing this marker fail after downloading
    fail_marker: &'static str,
}

impl RecordingPipeline {
    fn new(store: Arc<ItemStore>) -> Self {
        Self {
            store,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            order: Mutex::new(Vec::new()),
            fail_marker: "broken",
        }
    }

    /// Poll the store until the item shows `status`
    async fn await_status(&self, id: ItemId, status: ProcessStatus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if self.store.get(id).await.map(|i| i.status()).ok() == Some(status) {
                    return;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("status never reached the store");
    }
}

#[async_trait]
impl ItemPipeline for RecordingPipeline {
    async fn process(&self, id: ItemId, source: &str, events: EventSink) -> anyhow::Result<ProcessResult> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        self.order.lock().unwrap().push(id);

        events.status(ProcessStatus::Downloading);
        self.await_status(id, ProcessStatus::Downloading).await;

        tokio::time::sleep(Duration::from_millis(20)).await;

        if source.contains(self.fail_marker) {
            self.active.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("downloader exited with code 1");
        }

        events.status(ProcessStatus::Processing);
        self.await_status(id, ProcessStatus::Processing).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(ProcessResult {
            title: format!("Video {}", id),
            original_source: source.to_string(),
            processed_path: format!("item-{}", id),
            duration: 42,
            images: ImageSet {
                interval: 10.0,
                max_index: 4,
                removed: vec![2],
            },
            summary: "short".to_string(),
            process: ProcessInfo::default(),
        })
    }
}

async fn setup(sources: &[&str]) -> (TempDir, Arc<ItemStore>, Arc<RecordingPipeline>, Scheduler) {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(ItemStore::open(temp.path().join("config.json")).await.unwrap());
    for source in sources {
        let source = source.to_string();
        store.insert_with(move |id| Item::queued(id, source)).await.unwrap();
    }
    let pipeline = Arc::new(RecordingPipeline::new(store.clone()));
    let scheduler = Scheduler::new(pipeline.clone(), store.clone());
    (temp, store, pipeline, scheduler)
}

#[tokio::test]
async fn test_single_flight_in_enqueue_order() {
    let (_temp, store, pipeline, scheduler) = setup(&["a", "b", "c"]).await;

    assert!(scheduler.enqueue(1, "a"));
    assert!(!scheduler.enqueue(2, "b"));
    assert!(!scheduler.enqueue(3, "c"));

    // Waiting items stay queued until their turn
    assert_eq!(store.get(3).await.unwrap().status(), ProcessStatus::Queued);

    scheduler.wait_idle().await;

    assert_eq!(pipeline.peak.load(Ordering::SeqCst), 1);
    assert_eq!(*pipeline.order.lock().unwrap(), vec![1, 2, 3]);
    for id in 1..=3 {
        let item = store.get(id).await.unwrap();
        assert_eq!(item.status(), ProcessStatus::Complete);
        assert_eq!(item.title, format!("Video {}", id));
        assert_eq!(item.images.max_index, 4);
    }
}

#[tokio::test]
async fn test_queue_drains_past_failure() {
    let (_temp, store, pipeline, scheduler) = setup(&["broken", "fine"]).await;

    scheduler.enqueue(1, "broken");
    scheduler.enqueue(2, "fine");
    scheduler.wait_idle().await;

    assert_eq!(*pipeline.order.lock().unwrap(), vec![1, 2]);

    let failed = store.get(1).await.unwrap();
    assert_eq!(failed.status(), ProcessStatus::Error);
    let error = failed.process.unwrap().error.unwrap();
    assert!(error.contains("downloader exited with code 1"));

    let ok = store.get(2).await.unwrap();
    assert_eq!(ok.status(), ProcessStatus::Complete);
    assert!(ok.process.unwrap().error.is_none());
}

#[tokio::test]
async fn test_idle_after_queue_drains() {
    let (_temp, _store, _pipeline, scheduler) = setup(&["a"]).await;

    // Nothing queued: resolves immediately
    scheduler.wait_idle().await;

    assert!(scheduler.enqueue(1, "a"));
    assert!(scheduler.is_running());
    scheduler.wait_idle().await;
    assert!(!scheduler.is_running());

    // Idle again, so the next item takes the fast path
    assert!(scheduler.enqueue(1, "a"));
    scheduler.wait_idle().await;
}

#[tokio::test]
async fn test_failed_item_can_be_enqueued_again() {
    let (_temp, store, _pipeline, scheduler) = setup(&["broken"]).await;

    scheduler.enqueue(1, "broken");
    scheduler.wait_idle().await;
    assert_eq!(store.get(1).await.unwrap().status(), ProcessStatus::Error);

    // Source fixed by the user, then re-enqueued explicitly
    store
        .read_modify_write(1, |item| {
            item.original_source = "repaired".to_string();
            item.viewer_data.process_status = ProcessStatus::Queued;
        })
        .await
        .unwrap();
    scheduler.enqueue(1, "repaired");
    scheduler.wait_idle().await;

    let item = store.get(1).await.unwrap();
    assert_eq!(item.status(), ProcessStatus::Complete);
    assert_eq!(item.original_source, "repaired");
}
