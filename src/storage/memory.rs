use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::object::{AttrExtractor, NamespacedExtractor, Object};
use super::traits::{ListPage, Notification, StorageError, StoreOfRecord};

/// In-process store of record.
///
/// Writes get the next global revision and are fanned out, in revision order,
/// to every feed opened with [`InMemoryStore::subscribe`].
pub struct InMemoryStore {
    extractor: Arc<dyn AttrExtractor>,
    data: DashMap<String, Object>,
    revision: AtomicU64,
    /// Open feeds. Held across revision assignment so feeds see commit order.
    subscribers: Mutex<Vec<mpsc::Sender<Notification>>>,
    progress_supported: AtomicBool,
    progress_requests: AtomicU64,
}

impl InMemoryStore {
    #[must_use]
    pub fn new(extractor: Arc<dyn AttrExtractor>) -> Self {
        Self {
            extractor,
            data: DashMap::new(),
            revision: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
            progress_supported: AtomicBool::new(true),
            progress_requests: AtomicU64::new(0),
        }
    }

    /// Store keyed by a [`NamespacedExtractor`] under `prefix`.
    #[must_use]
    pub fn with_prefix(prefix: &str) -> Self {
        Self::new(Arc::new(NamespacedExtractor::new(prefix)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Object> {
        self.data.get(key).map(|r| r.value().clone())
    }

    /// Number of progress requests received so far
    #[must_use]
    pub fn progress_requests(&self) -> u64 {
        self.progress_requests.load(Ordering::SeqCst)
    }

    pub fn set_progress_supported(&self, supported: bool) {
        self.progress_supported.store(supported, Ordering::SeqCst);
    }

    /// Create or update an object. Returns the revision it was written at.
    pub async fn put(&self, object: Object) -> Result<u64, StorageError> {
        let key = self
            .extractor
            .key(&object)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let mut subscribers = self.subscribers.lock().await;
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let object = object.at_revision(revision);
        let notification = match self.data.insert(key, object.clone()) {
            Some(_) => Notification::Modified(object),
            None => Notification::Added(object),
        };
        broadcast(&mut subscribers, notification).await;
        Ok(revision)
    }

    /// Delete an object by key. Returns the deletion revision.
    pub async fn delete(&self, key: &str) -> Result<u64, StorageError> {
        let mut subscribers = self.subscribers.lock().await;
        let (_, object) = self.data.remove(key).ok_or(StorageError::NotFound)?;
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        broadcast(&mut subscribers, Notification::Deleted(object.at_revision(revision))).await;
        Ok(revision)
    }

    /// Bump the revision without a feed entry, as a write to an unwatched key would.
    pub async fn advance_revision(&self) -> u64 {
        let _subscribers = self.subscribers.lock().await;
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Open a feed: an initial Replace with the current content, then live changes.
    pub async fn subscribe(&self, buffer: usize) -> mpsc::Receiver<Notification> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let mut subscribers = self.subscribers.lock().await;
        let mut items: Vec<Object> = self.data.iter().map(|r| r.value().clone()).collect();
        items.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        let initial = Notification::Replace {
            items,
            revision: self.revision(),
        };
        if tx.send(initial).await.is_ok() {
            subscribers.push(tx);
        }
        rx
    }
}

async fn broadcast(subscribers: &mut Vec<mpsc::Sender<Notification>>, notification: Notification) {
    let mut open = Vec::with_capacity(subscribers.len());
    for tx in subscribers.drain(..) {
        if tx.send(notification.clone()).await.is_ok() {
            open.push(tx);
        } else {
            debug!("Dropping closed feed");
        }
    }
    *subscribers = open;
}

#[async_trait]
impl StoreOfRecord for InMemoryStore {
    async fn get_list(&self, prefix: &str, min_revision: u64) -> Result<ListPage, StorageError> {
        let _subscribers = self.subscribers.lock().await;
        let revision = self.revision();
        if min_revision > revision {
            return Err(StorageError::Backend(format!(
                "requested revision {min_revision} is ahead of {revision}"
            )));
        }
        let mut entries: Vec<(String, Object)> = self
            .data
            .iter()
            .filter(|r| r.key().starts_with(prefix))
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(ListPage {
            items: entries.into_iter().map(|(_, o)| o).collect(),
            revision,
        })
    }

    async fn current_revision(&self) -> Result<u64, StorageError> {
        Ok(self.revision())
    }

    async fn request_progress(&self) -> Result<(), StorageError> {
        if !self.progress_supported.load(Ordering::SeqCst) {
            return Err(StorageError::ProgressUnsupported);
        }
        self.progress_requests.fetch_add(1, Ordering::SeqCst);
        let mut subscribers = self.subscribers.lock().await;
        let revision = self.revision();
        broadcast(&mut subscribers, Notification::Bookmark(revision)).await;
        Ok(())
    }
}
