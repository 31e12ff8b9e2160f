//! Item library: the item list plus every processed item's files.
//!
//! # Storage Layout
//!
//! ```text
//! <data_dir>/
//! ├── config.json               # Item list (see `store`)
//! ├── worker.lock               # Held by the process running the scheduler
//! └── <dir_name_for_source>/    # One directory per processed item
//!     ├── sbbp.json
//!     ├── transcript.json
//!     └── image-00001.webp ...
//! ```
//!
//! `Library` is the CRUD surface over that layout. Enqueueing hands work to
//! the scheduler; everything else is a read or a single store update.
//!
//! Only one process at a time may run a scheduler for a data directory. It
//! proves that by holding an exclusive lock on `worker.lock`, and only the
//! holder may treat pending items as leftovers of a dead process.

pub mod layout;
pub mod store;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::adapters::Toolchain;
use crate::config::ResolvedConfig;
use crate::core::align::align_item;
use crate::core::{ItemPipeline, Scheduler, StageRunner};
use crate::domain::{
    FailureDetail, Item, ItemId, ProcessInfo, ProcessStatus, TranscriptChunk, ViewerChunk,
};
use crate::error::{Error, Result};

pub use layout::ItemDir;
pub use store::{ItemList, ItemStore, ITEM_LIST_FILE};

/// Failure recorded on items a previous process left unfinished
pub const INTERRUPTED: &str = "processing was interrupted";

/// Lock file guarding the scheduler of a data directory
pub const WORKER_LOCK_FILE: &str = "worker.lock";

pub struct Library {
    data_dir: PathBuf,
    store: Arc<ItemStore>,
    scheduler: Scheduler,
    /// Locked `worker.lock`, once this process owns the scheduler
    worker: Mutex<Option<File>>,
}

impl Library {
    /// Open the library described by `config`, processing with the
    /// configured external tools
    pub async fn open(config: &ResolvedConfig) -> Result<Self> {
        let runner = StageRunner::new(
            Toolchain::from_config(&config.tools),
            &config.data_dir,
            config.image_interval,
        );
        Self::open_with(&config.data_dir, Arc::new(runner)).await
    }

    /// Open the library in `data_dir` with a custom pipeline
    pub async fn open_with(data_dir: impl Into<PathBuf>, pipeline: Arc<dyn ItemPipeline>) -> Result<Self> {
        let data_dir = data_dir.into();
        let store = Arc::new(ItemStore::open(data_dir.join(ITEM_LIST_FILE)).await?);
        let scheduler = Scheduler::new(pipeline, store.clone());

        let worker = try_lock_worker(&data_dir.join(WORKER_LOCK_FILE))?;
        let owns_worker = worker.is_some();

        let library = Self {
            data_dir,
            store,
            scheduler,
            worker: Mutex::new(worker),
        };
        if owns_worker {
            library.recover_interrupted().await?;
        } else {
            debug!(data_dir = %library.data_dir.display(), "Another process owns the worker lock");
        }
        Ok(library)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Resolve once every queued item has settled
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
    }

    /// Items still pending from an earlier process will never finish;
    /// flag them so the user can re-enqueue them. Only the holder of the
    /// worker lock may call this.
    async fn recover_interrupted(&self) -> Result<()> {
        let detail = FailureDetail::message(INTERRUPTED);
        let recovered = self
            .store
            .modify_all(move |item| {
                if !item.status().is_pending() {
                    return false;
                }
                item.viewer_data.process_status = ProcessStatus::Error;
                item.process = Some(ProcessInfo::failed(&detail));
                true
            })
            .await?;

        if !recovered.is_empty() {
            warn!(items = ?recovered, "Marked interrupted items as failed");
        }
        Ok(())
    }

    /// Take the worker lock if this process does not hold it yet, waiting
    /// for any other process that is still processing items.
    async fn acquire_worker(&self) -> Result<()> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return Ok(());
        }

        let path = self.data_dir.join(WORKER_LOCK_FILE);
        let file = match try_lock_worker(&path)? {
            Some(file) => file,
            None => {
                info!(path = %path.display(), "Waiting for another sbbp process to finish processing");
                let file = open_worker_lock(&path)?;
                let task_path = path.clone();
                tokio::task::spawn_blocking(move || {
                    file.lock_exclusive()
                        .map(|()| file)
                        .map_err(|e| Error::io("lock", &task_path, e))
                })
                .await
                .map_err(|e| Error::io("lock", &path, std::io::Error::other(e)))??
            }
        };
        *worker = Some(file);
        drop(worker);

        self.recover_interrupted().await
    }

    /// Create an item for `source` and queue it for processing
    pub async fn enqueue(&self, source: &str) -> Result<Item> {
        self.acquire_worker().await?;

        let owned = source.to_string();
        let item = self.store.insert_with(move |id| Item::queued(id, owned)).await?;
        let started = self.scheduler.enqueue(item.id, source);
        info!(item_id = item.id, source, started, "Enqueued item");
        Ok(item)
    }

    /// Run the whole pipeline again for an existing item.
    ///
    /// Items that are already queued or processing are left as they are.
    pub async fn reprocess(&self, id: ItemId) -> Result<Item> {
        self.acquire_worker().await?;

        let current = self.store.get(id).await?;
        if current.status().is_pending() {
            info!(item_id = id, status = %current.status(), "Item already pending");
            return Ok(current);
        }

        let item = self
            .store
            .read_modify_write(id, |item| {
                item.viewer_data.process_status = ProcessStatus::Queued;
                if let Some(process) = item.process.as_mut() {
                    process.error = None;
                }
            })
            .await?;

        let started = self.scheduler.enqueue(id, item.original_source.clone());
        info!(item_id = id, started, "Re-enqueued item");
        Ok(item)
    }

    /// Remove an item from the list. Its processed files are left on disk.
    pub async fn delete(&self, id: ItemId) -> Result<Item> {
        let item = self.store.remove(id).await?;
        info!(item_id = id, "Deleted item");
        Ok(item)
    }

    pub async fn mark_read(&self, id: ItemId, read: bool) -> Result<Item> {
        self.store
            .read_modify_write(id, move |item| item.viewer_data.read = read)
            .await
    }

    pub async fn update_progress(&self, id: ItemId, progress: f64) -> Result<Item> {
        self.store
            .read_modify_write(id, move |item| item.viewer_data.progress = progress)
            .await
    }

    pub async fn get(&self, id: ItemId) -> Result<Item> {
        self.store.get(id).await
    }

    pub async fn list(&self) -> Result<Vec<Item>> {
        self.store.list().await
    }

    /// Register an already-processed directory (or a file inside one).
    ///
    /// Relative paths resolve against the data directory. Importing a
    /// directory that is already in the list, under any spelling of its
    /// path, returns the existing item.
    pub async fn import(&self, path: &Path) -> Result<Item> {
        let path = self.data_dir.join(path);
        let path = tokio::fs::canonicalize(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(path.clone()),
            _ => Error::io("resolve", &path, e),
        })?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| Error::io("read", &path, e))?;

        let dir = if metadata.is_dir() {
            path
        } else {
            path.parent().map(Path::to_path_buf).unwrap_or(path)
        };

        for item in self.store.list().await? {
            if item.processed_path.is_empty() {
                continue;
            }
            if canonical_or_raw(self.item_dir(&item).root()).await == dir {
                info!(item_id = item.id, path = %dir.display(), "Directory already imported");
                return Ok(item);
            }
        }

        let data_dir = canonical_or_raw(&self.data_dir).await;
        let mut result = ItemDir::new(&dir).load_result().await?;
        result.processed_path = relative_to(&dir, &data_dir);

        let item = self
            .store
            .insert_with(move |id| Item::from_result(id, result))
            .await?;
        info!(item_id = item.id, title = %item.title, "Imported item");
        Ok(item)
    }

    /// Re-read `sbbp.json` for an item, keeping its id and viewer data
    pub async fn refresh(&self, id: ItemId) -> Result<Item> {
        let item = self.store.get(id).await?;
        let dir = self.item_dir(&item);
        let mut result = dir.load_result().await?;
        result.processed_path = item.processed_path;

        self.store
            .read_modify_write(id, move |item| item.apply_result(result))
            .await
    }

    /// Transcript fragments of a processed item
    pub async fn transcript(&self, id: ItemId) -> Result<Vec<TranscriptChunk>> {
        let item = self.store.get(id).await?;
        self.item_dir(&item).load_transcript().await
    }

    /// Viewer chunks of a processed item, aligned on every call
    pub async fn viewer(&self, id: ItemId) -> Result<Vec<ViewerChunk>> {
        let item = self.store.get(id).await?;
        let transcript = self.item_dir(&item).load_transcript().await?;
        Ok(align_item(&item, &transcript))
    }

    /// Path of thumbnail `index` (0-based) of an item
    pub async fn image_path(&self, id: ItemId, index: usize) -> Result<PathBuf> {
        let item = self.store.get(id).await?;
        if item.status() != ProcessStatus::Complete || index > item.images.max_index {
            return Err(Error::ImageNotFound { id, index });
        }

        let path = self.item_dir(&item).image_file(index);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Ok(path),
            Ok(false) => Err(Error::NotFound(path)),
            Err(e) => Err(Error::io("read", &path, e)),
        }
    }

    pub fn item_dir(&self, item: &Item) -> ItemDir {
        ItemDir::resolve(&self.data_dir, &item.processed_path)
    }
}

/// `dir` relative to `base` when it lies inside it, else `dir` itself
fn relative_to(dir: &Path, base: &Path) -> String {
    dir.strip_prefix(base)
        .unwrap_or(dir)
        .to_string_lossy()
        .into_owned()
}

async fn canonical_or_raw(path: &Path) -> PathBuf {
    tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
}

fn open_worker_lock(path: &Path) -> Result<File> {
    std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| Error::io("open lock", path, e))
}

/// The locked worker file, or `None` while another process holds it
fn try_lock_worker(path: &Path) -> Result<Option<File>> {
    let file = open_worker_lock(path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(file)),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
        Err(e) => Err(Error::io("lock", path, e)),
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("data_dir", &self.data_dir)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
