//! Watch cursor over the event ring.
//!
//! The cursor owns no lock. Each refill takes the read lock once, copies at
//! most `chunk` matching events, and releases it, so a slow consumer never
//! blocks the replication sink. If the ring overtakes a slow consumer the
//! next refill reports `TooOld` and the cursor ends.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::WatchCacheError;
use crate::event_store::ChangeEvent;
use crate::selector::SelectionPredicate;

use super::CacheCore;

pub struct EventCursor {
    core: Arc<RwLock<CacheCore>>,
    revisions: watch::Receiver<u64>,
    predicate: SelectionPredicate,
    allow_bookmarks: bool,
    /// Ring has been read through this revision
    scanned: u64,
    buffer: VecDeque<Arc<ChangeEvent>>,
    chunk: usize,
    failed: bool,
}

impl EventCursor {
    pub(super) fn new(
        core: Arc<RwLock<CacheCore>>,
        revisions: watch::Receiver<u64>,
        after: u64,
        predicate: SelectionPredicate,
        allow_bookmarks: bool,
        chunk: usize,
    ) -> Self {
        Self {
            core,
            revisions,
            predicate,
            allow_bookmarks,
            scanned: after,
            buffer: VecDeque::new(),
            chunk: chunk.max(1),
            failed: false,
        }
    }

    fn wanted(&self, event: &ChangeEvent) -> bool {
        if event.is_bookmark() {
            self.allow_bookmarks
        } else {
            event.matches(&self.predicate)
        }
    }

    fn refill(&mut self) -> Result<(), WatchCacheError> {
        let core = self.core.read();
        for event in core.events.interval(self.scanned)? {
            if self.buffer.len() >= self.chunk {
                break;
            }
            self.scanned = event.revision;
            if self.wanted(event) {
                self.buffer.push_back(event.clone());
            }
        }
        Ok(())
    }

    /// Next buffered or retained event; None when caught up.
    pub fn next_event(&mut self) -> Option<Result<Arc<ChangeEvent>, WatchCacheError>> {
        if self.failed {
            return None;
        }
        if self.buffer.is_empty() {
            if let Err(e) = self.refill() {
                self.failed = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }

    /// Like [`Self::next_event`], but waits for new commits when caught up.
    /// Returns None once `cancel` fires or the cursor has failed.
    pub async fn recv(
        &mut self,
        cancel: &CancellationToken,
    ) -> Option<Result<Arc<ChangeEvent>, WatchCacheError>> {
        loop {
            if let Some(item) = self.next_event() {
                return Some(item);
            }
            if self.failed {
                return None;
            }
            if *self.revisions.borrow_and_update() > self.scanned {
                continue;
            }
            tokio::select! {
                changed = self.revisions.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                () = cancel.cancelled() => return None,
            }
        }
    }
}

impl fmt::Debug for EventCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCursor")
            .field("scanned", &self.scanned)
            .field("buffered", &self.buffer.len())
            .field("chunk", &self.chunk)
            .field("allow_bookmarks", &self.allow_bookmarks)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

impl Iterator for EventCursor {
    type Item = Result<Arc<ChangeEvent>, WatchCacheError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event()
    }
}
