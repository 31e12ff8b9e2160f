//! Persistent item list (`config.json`).
//!
//! Several `sbbp` processes may share one data directory, so the file is
//! the only source of truth: reads load it, and writes are a locked
//! read-modify-write of it. A failed write leaves the file as it was.

use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{Item, ItemId};
use crate::error::{Error, Result};

/// Item list file name inside the data directory
pub const ITEM_LIST_FILE: &str = "config.json";

/// Item list format version
pub const CONFIG_VERSION: u32 = 1;

/// On-disk shape of `config.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemList {
    pub version: u32,

    #[serde(default)]
    pub items: Vec<Item>,
}

impl Default for ItemList {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            items: Vec::new(),
        }
    }
}

impl ItemList {
    fn position(&self, id: ItemId) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    fn next_id(&self) -> ItemId {
        self.items.iter().map(|item| item.id).max().map_or(1, |max| max + 1)
    }
}

/// Item list shared by the scheduler and the CRUD surface.
///
/// Every mutation re-reads `config.json` under an exclusive lock on
/// `<path>.lock`, applies the change to that fresh list and renames the
/// result into place before the lock is released. Other processes sharing
/// the file therefore never lose updates or see a torn list.
#[derive(Debug)]
pub struct ItemStore {
    path: PathBuf,
    writer: Mutex<()>,
}

impl ItemStore {
    /// Open the item list at `path`, creating an empty one if it is missing
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            path: path.into(),
            writer: Mutex::new(()),
        };
        store.update(|_| Ok(((), false))).await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current items, in insertion order
    pub async fn list(&self) -> Result<Vec<Item>> {
        Ok(self.load().await?.items)
    }

    pub async fn get(&self, id: ItemId) -> Result<Item> {
        self.load()
            .await?
            .items
            .into_iter()
            .find(|item| item.id == id)
            .ok_or(Error::ItemNotFound(id))
    }

    /// Allocate the next id, build the item with it and persist it
    pub async fn insert_with<F>(&self, build: F) -> Result<Item>
    where
        F: FnOnce(ItemId) -> Item + Send + 'static,
    {
        let item = self
            .update(move |list| {
                let item = build(list.next_id());
                list.items.push(item.clone());
                Ok((item, true))
            })
            .await?;

        debug!(item_id = item.id, "Inserted item");
        Ok(item)
    }

    /// Apply `modify` to one item and persist the result atomically.
    ///
    /// Returns the item as written.
    pub async fn read_modify_write<F>(&self, id: ItemId, modify: F) -> Result<Item>
    where
        F: FnOnce(&mut Item) + Send + 'static,
    {
        self.update(move |list| {
            let pos = list.position(id).ok_or(Error::ItemNotFound(id))?;
            modify(&mut list.items[pos]);
            Ok((list.items[pos].clone(), true))
        })
        .await
    }

    /// Apply `modify` to every item; persists only if some call returned true.
    ///
    /// Returns the ids of the modified items.
    pub async fn modify_all<F>(&self, mut modify: F) -> Result<Vec<ItemId>>
    where
        F: FnMut(&mut Item) -> bool + Send + 'static,
    {
        self.update(move |list| {
            let changed: Vec<ItemId> = list
                .items
                .iter_mut()
                .filter_map(|item| modify(item).then_some(item.id))
                .collect();
            let write = !changed.is_empty();
            Ok((changed, write))
        })
        .await
    }

    /// Remove an item and return it
    pub async fn remove(&self, id: ItemId) -> Result<Item> {
        self.update(move |list| {
            let pos = list.position(id).ok_or(Error::ItemNotFound(id))?;
            Ok((list.items.remove(pos), true))
        })
        .await
    }

    async fn load(&self) -> Result<ItemList> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content).map_err(|e| Error::json(&self.path, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ItemList::default()),
            Err(e) => Err(Error::io("read", &self.path, e)),
        }
    }

    /// Run `apply` against the list on disk while holding the file lock.
    ///
    /// `apply` returns its output and whether the list must be written back.
    async fn update<T, F>(&self, apply: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut ItemList) -> Result<(T, bool)> + Send + 'static,
    {
        let _writer = self.writer.lock().await;
        let path = self.path.clone();

        let task_path = path.clone();
        tokio::task::spawn_blocking(move || update_locked(&task_path, apply))
            .await
            .map_err(|e| Error::io("write", &path, std::io::Error::other(e)))?
    }
}

fn update_locked<T, F>(path: &Path, apply: F) -> Result<T>
where
    F: FnOnce(&mut ItemList) -> Result<(T, bool)>,
{
    let dir = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| Error::io("create directory", dir, e))?;

    let lock_path = lock_path(path);
    let lock = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|e| Error::io("open lock", &lock_path, e))?;
    lock.lock_exclusive()
        .map_err(|e| Error::io("lock", &lock_path, e))?;

    let (mut list, existed) = match std::fs::read_to_string(path) {
        Ok(content) => (
            serde_json::from_str(&content).map_err(|e| Error::json(path, e))?,
            true,
        ),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => (ItemList::default(), false),
        Err(e) => return Err(Error::io("read", path, e)),
    };

    let (value, changed) = apply(&mut list)?;
    if changed || !existed {
        let content = serde_json::to_vec_pretty(&list).map_err(|e| Error::json(path, e))?;
        write_atomically(dir, path, &content)?;
    }

    // Lock released when `lock` drops
    Ok(value)
}

fn write_atomically(dir: &Path, path: &Path, content: &[u8]) -> Result<()> {
    let mut temp =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::io("create temp file in", dir, e))?;
    temp.write_all(content)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|e| Error::io("write", temp.path(), e))?;
    temp.persist(path)
        .map_err(|e| Error::io("replace", path, e.error))?;
    Ok(())
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProcessStatus;
    use tempfile::TempDir;

    async fn open_store(temp: &TempDir) -> ItemStore {
        ItemStore::open(temp.path().join(ITEM_LIST_FILE)).await.unwrap()
    }

    #[tokio::test]
    async fn test_open_creates_empty_list() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp).await;

        assert!(store.list().await.unwrap().is_empty());
        let on_disk = std::fs::read_to_string(store.path()).unwrap();
        assert!(on_disk.contains("\"version\": 1"));
    }

    #[tokio::test]
    async fn test_ids_are_max_plus_one() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp).await;

        let a = store.insert_with(|id| Item::queued(id, "a")).await.unwrap();
        let b = store.insert_with(|id| Item::queued(id, "b")).await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));

        store.remove(1).await.unwrap();
        let c = store.insert_with(|id| Item::queued(id, "c")).await.unwrap();
        assert_eq!(c.id, 3);
    }

    #[tokio::test]
    async fn test_changes_survive_reopen() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp).await;
        let item = store.insert_with(|id| Item::queued(id, "/v.mp4")).await.unwrap();

        store
            .read_modify_write(item.id, |item| {
                item.viewer_data.process_status = ProcessStatus::Processing;
            })
            .await
            .unwrap();

        let reopened = open_store(&temp).await;
        assert_eq!(
            reopened.get(item.id).await.unwrap().status(),
            ProcessStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp).await;

        let err = store.read_modify_write(42, |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::ItemNotFound(42)));
        assert!(matches!(store.remove(42).await, Err(Error::ItemNotFound(42))));
    }

    #[tokio::test]
    async fn test_failed_update_leaves_list_untouched() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp).await;
        let item = store.insert_with(|id| Item::queued(id, "a")).await.unwrap();
        let before = std::fs::read_to_string(store.path()).unwrap();

        // The lock file can no longer be opened
        let lock = lock_path(store.path());
        std::fs::remove_file(&lock).unwrap();
        std::fs::create_dir(&lock).unwrap();

        let result = store
            .read_modify_write(item.id, |item| item.title = "changed".to_string())
            .await;
        assert!(result.is_err());
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), before);
        assert_eq!(store.get(item.id).await.unwrap().title, "");
    }

    #[tokio::test]
    async fn test_two_stores_on_one_file_keep_each_others_changes() {
        let temp = TempDir::new().unwrap();
        let a = open_store(&temp).await;
        let b = open_store(&temp).await;

        let first = a.insert_with(|id| Item::queued(id, "a")).await.unwrap();
        b.read_modify_write(first.id, |item| item.viewer_data.read = true)
            .await
            .unwrap();
        let second = b.insert_with(|id| Item::queued(id, "b")).await.unwrap();

        a.read_modify_write(first.id, |item| {
            item.viewer_data.process_status = ProcessStatus::Downloading;
        })
        .await
        .unwrap();
        let third = a.insert_with(|id| Item::queued(id, "c")).await.unwrap();
        assert_eq!((first.id, second.id, third.id), (1, 2, 3));

        let reopened = open_store(&temp).await;
        let item = reopened.get(1).await.unwrap();
        assert!(item.viewer_data.read);
        assert_eq!(item.status(), ProcessStatus::Downloading);
        assert_eq!(reopened.list().await.unwrap().len(), 3);
        assert_eq!(b.get(3).await.unwrap().original_source, "c");
    }

    #[tokio::test]
    async fn test_concurrent_inserts_from_two_stores_get_distinct_ids() {
        let temp = TempDir::new().unwrap();
        let a = std::sync::Arc::new(open_store(&temp).await);
        let b = std::sync::Arc::new(open_store(&temp).await);

        let mut handles = Vec::new();
        for n in 0..10 {
            let store = if n % 2 == 0 { a.clone() } else { b.clone() };
            handles.push(tokio::spawn(async move {
                store
                    .insert_with(move |id| Item::queued(id, format!("/v{n}.mp4")))
                    .await
                    .unwrap()
                    .id
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
        assert_eq!(a.list().await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_corrupt_list_is_a_serialization_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(ITEM_LIST_FILE);
        std::fs::write(&path, "{ not json").unwrap();

        let err = ItemStore::open(&path).await.unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[tokio::test]
    async fn test_modify_all_reports_changed_ids() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp).await;
        store.insert_with(|id| Item::queued(id, "a")).await.unwrap();
        store
            .insert_with(|id| {
                let mut item = Item::queued(id, "b");
                item.viewer_data.process_status = ProcessStatus::Complete;
                item
            })
            .await
            .unwrap();

        let changed = store
            .modify_all(|item| {
                let pending = item.status().is_pending();
                if pending {
                    item.viewer_data.process_status = ProcessStatus::Error;
                }
                pending
            })
            .await
            .unwrap();

        assert_eq!(changed, vec![1]);
        assert_eq!(store.get(1).await.unwrap().status(), ProcessStatus::Error);
    }

    #[test]
    fn test_lock_path() {
        assert_eq!(
            lock_path(Path::new("/data/config.json")),
            PathBuf::from("/data/config.json.lock")
        );
    }
}
