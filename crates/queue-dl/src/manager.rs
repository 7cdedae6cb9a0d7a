//! Download queue - ordering, state transitions and the worker handle

use log::{info, warn};
use reqwest::Client;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::fs::{existing_len, sanitize_file_name};
use crate::types::{
    DownloadEvent, DownloadSource, DownloadStateChanged, EventSink, QueueConfig, QueueItem,
    QueueItemView, QueueState,
};
use crate::worker;

/// Work claimed by the worker for one transfer
#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub id: String,
    pub url: String,
    pub path: PathBuf,
    /// Non-zero when resuming a partial file
    pub resume_from: u64,
    pub size: u64,
}

pub(crate) struct Shared<S> {
    items: Mutex<Vec<QueueItem<S>>>,
    /// One permit is stored when nobody waits, so a wake-up is never lost
    pub(crate) work_available: Notify,
    changed: Notify,
    pub(crate) config: QueueConfig,
    pub(crate) client: Client,
    sink: EventSink,
}

impl<S: DownloadSource> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, Vec<QueueItem<S>>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn emit(&self, event: DownloadEvent) {
        (self.sink)(event);
    }

    fn state_event(item: &QueueItem<S>) -> DownloadEvent {
        DownloadEvent::StateChanged(DownloadStateChanged {
            task_id: item.source.id(),
            state: item.state,
            error: item.error.clone(),
        })
    }

    /// Apply `f` to the item with `id` and emit its state change.
    /// Returns false when the item is gone.
    pub(crate) fn transition<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut QueueItem<S>),
    {
        let event = {
            let mut items = self.lock();
            match items.iter_mut().find(|i| i.source.id() == id) {
                Some(item) => {
                    f(item);
                    Self::state_event(item)
                }
                None => return false,
            }
        };
        self.emit(event);
        self.changed.notify_waiters();
        true
    }

    /// Mark the first pending item as downloading and hand it to the worker.
    /// Pending items without a transfer URL move to `Error` on the way.
    pub(crate) fn claim_next(&self) -> Option<Job> {
        let mut events = Vec::new();
        let mut job = None;
        {
            let mut items = self.lock();
            for item in items.iter_mut().filter(|i| i.state.is_pending()) {
                match item.source.url() {
                    Some(url) => {
                        item.state = QueueState::Downloading;
                        item.error = None;
                        events.push(Self::state_event(item));
                        job = Some(Job {
                            id: item.source.id(),
                            url,
                            path: item.local_path(),
                            resume_from: item.downloaded,
                            size: item.size,
                        });
                        break;
                    }
                    None => {
                        item.state = QueueState::Error;
                        item.error = Some("No transfer URL known for this recording".to_string());
                        events.push(Self::state_event(item));
                    }
                }
            }
        }
        for event in events {
            self.emit(event);
        }
        self.changed.notify_waiters();
        job
    }

    pub(crate) fn set_size(&self, id: &str, size: u64) {
        if let Some(item) = self.lock().iter_mut().find(|i| i.source.id() == id) {
            item.size = size;
        }
    }

    pub(crate) fn set_downloaded(&self, id: &str, downloaded: u64) {
        let source = {
            let mut items = self.lock();
            match items.iter_mut().find(|i| i.source.id() == id) {
                Some(item) => {
                    item.downloaded = downloaded;
                    if item.size < downloaded {
                        item.size = downloaded;
                    }
                    item.source.clone()
                }
                None => return,
            }
        };
        source.record_progress(downloaded);
    }

    pub(crate) fn set_move_progress(&self, id: &str, fraction: f32) {
        if let Some(item) = self.lock().iter_mut().find(|i| i.source.id() == id) {
            item.move_progress = Some(fraction);
        }
    }

    pub(crate) fn set_local_dir(&self, id: &str, dir: PathBuf) {
        if let Some(item) = self.lock().iter_mut().find(|i| i.source.id() == id) {
            item.local_dir = dir;
        }
    }

    pub(crate) fn local_path(&self, id: &str) -> Option<PathBuf> {
        self.lock()
            .iter()
            .find(|i| i.source.id() == id)
            .map(|i| i.local_path())
    }

    /// (total bytes, downloaded bytes) over unfinished items
    pub(crate) fn totals(&self) -> (u64, u64) {
        self.lock()
            .iter()
            .filter(|i| i.state.is_unfinished())
            .fold((0, 0), |(size, done), i| (size + i.size, done + i.downloaded))
    }

    fn is_settled(&self) -> bool {
        !self.lock().iter().any(|i| i.state.is_unfinished())
    }
}

struct WorkerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Ordered download queue drained by a single sequential worker.
pub struct DownloadManager<S: DownloadSource> {
    shared: Arc<Shared<S>>,
    worker: tokio::sync::Mutex<Option<WorkerHandle>>,
}

impl<S: DownloadSource> DownloadManager<S> {
    pub fn new(config: QueueConfig, client: Client, sink: EventSink) -> Self {
        Self {
            shared: Arc::new(Shared {
                items: Mutex::new(Vec::new()),
                work_available: Notify::new(),
                changed: Notify::new(),
                config,
                client,
                sink,
            }),
            worker: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    pub fn len(&self) -> usize {
        self.shared.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append sources at the end of the queue
    pub async fn enqueue(&self, sources: Vec<S>) -> Result<usize, String> {
        let position = self.len();
        self.insert(position, sources).await
    }

    /// Build a queue item, resuming from an existing partial file when present
    async fn prepare(&self, source: S) -> QueueItem<S> {
        let local_name = sanitize_file_name(&source.file_name());
        let mut item = QueueItem {
            size: source.size_hint(),
            source,
            state: QueueState::Ready,
            downloaded: 0,
            local_dir: self.shared.config.download_dir.clone(),
            local_name,
            move_progress: None,
            error: None,
        };
        match existing_len(&item.local_path()).await {
            Some(len) => {
                item.state = QueueState::Paused;
                item.downloaded = len;
                if item.size < len {
                    item.size = len;
                }
            }
            None => item.state = QueueState::Queued,
        }
        item
    }

    /// Insert sources at `position` (clamped to the queue length).
    ///
    /// Sources already in the queue are rejected; the call fails only when
    /// nothing could be inserted. Returns the number of inserted items.
    pub async fn insert(&self, position: usize, sources: Vec<S>) -> Result<usize, String> {
        let mut candidates: Vec<S> = Vec::new();
        let mut rejected: Vec<String> = Vec::new();
        {
            let items = self.shared.lock();
            for source in sources {
                let id = source.id();
                let duplicate = items.iter().any(|i| i.source.id() == id)
                    || candidates.iter().any(|c| c.id() == id);
                if duplicate {
                    rejected.push(id);
                } else {
                    candidates.push(source);
                }
            }
        }

        let mut prepared = Vec::with_capacity(candidates.len());
        for source in candidates {
            prepared.push(self.prepare(source).await);
        }

        let mut events = Vec::new();
        {
            let mut items = self.shared.lock();
            // Another caller may have queued the same source while we were preparing
            prepared.retain(|p| {
                let id = p.source.id();
                let duplicate = items.iter().any(|i| i.source.id() == id);
                if duplicate {
                    rejected.push(id);
                }
                !duplicate
            });
            let at = position.min(items.len());
            for item in &prepared {
                events.push(Shared::state_event(item));
            }
            let inserted = prepared.len();
            items.splice(at..at, prepared);
            if inserted == 0 && !rejected.is_empty() {
                return Err(format!("Already queued: {}", rejected.join(", ")));
            }
        }

        if !rejected.is_empty() {
            warn!("download: skipped already queued {}", rejected.join(", "));
        }
        let inserted = events.len();
        for event in events {
            self.shared.emit(event);
        }
        self.shared.emit(DownloadEvent::QueueChanged);
        self.shared.work_available.notify_one();
        self.shared.changed.notify_waiters();
        Ok(inserted)
    }

    /// Move the items named by `ids` so they start at `position`, in the
    /// order given. States are left untouched.
    pub fn move_items(&self, position: usize, ids: &[String]) -> Result<(), String> {
        if ids.is_empty() {
            return Ok(());
        }
        {
            let mut items = self.shared.lock();
            for id in ids {
                if !items.iter().any(|i| &i.source.id() == id) {
                    return Err(format!("Unknown queue item: {}", id));
                }
            }

            let mut moved: Vec<(usize, QueueItem<S>)> = Vec::with_capacity(ids.len());
            let mut kept = Vec::with_capacity(items.len());
            let mut before = 0;
            for (idx, item) in items.drain(..).enumerate() {
                let id = item.source.id();
                match ids.iter().position(|m| *m == id) {
                    Some(order) => {
                        if idx < position {
                            before += 1;
                        }
                        moved.push((order, item));
                    }
                    None => kept.push(item),
                }
            }
            moved.sort_by_key(|(order, _)| *order);

            let at = position.saturating_sub(before).min(kept.len());
            kept.splice(at..at, moved.into_iter().map(|(_, item)| item));
            *items = kept;
        }
        self.shared.emit(DownloadEvent::QueueChanged);
        Ok(())
    }

    /// Drop an item from the queue. The item being downloaded cannot be removed.
    pub fn remove(&self, id: &str) -> Result<(), String> {
        {
            let mut items = self.shared.lock();
            let idx = items
                .iter()
                .position(|i| i.source.id() == id)
                .ok_or_else(|| format!("Unknown queue item: {}", id))?;
            if items[idx].state == QueueState::Downloading {
                return Err(format!("Cannot remove {} while it is downloading", id));
            }
            items.remove(idx);
        }
        info!("download: removed {}", id);
        self.shared.emit(DownloadEvent::QueueChanged);
        self.shared.changed.notify_waiters();
        Ok(())
    }

    /// Put a failed or paused item back in line. A partial file on disk is
    /// resumed rather than restarted.
    pub async fn requeue(&self, id: &str) -> Result<(), String> {
        let path = {
            let items = self.shared.lock();
            let item = items
                .iter()
                .find(|i| i.source.id() == id)
                .ok_or_else(|| format!("Unknown queue item: {}", id))?;
            if !matches!(item.state, QueueState::Error | QueueState::Paused) {
                return Err(format!("Cannot requeue {} in state {}", id, item.state));
            }
            item.local_path()
        };
        let downloaded = existing_len(&path).await.unwrap_or(0);
        self.shared.transition(id, |item| {
            item.state = QueueState::Queued;
            item.downloaded = downloaded;
            item.error = None;
        });
        self.shared.work_available.notify_one();
        Ok(())
    }

    /// Drop every completed item
    pub fn clear_finished(&self) -> usize {
        let removed = {
            let mut items = self.shared.lock();
            let before = items.len();
            items.retain(|i| i.state != QueueState::Completed);
            before - items.len()
        };
        if removed > 0 {
            self.shared.emit(DownloadEvent::QueueChanged);
        }
        removed
    }

    /// Drop every item except the one currently downloading
    pub fn clear_all(&self) -> usize {
        let removed = {
            let mut items = self.shared.lock();
            let before = items.len();
            items.retain(|i| i.state == QueueState::Downloading);
            before - items.len()
        };
        if removed > 0 {
            self.shared.emit(DownloadEvent::QueueChanged);
            self.shared.changed.notify_waiters();
        }
        removed
    }

    pub fn snapshot(&self) -> Vec<QueueItemView> {
        self.shared.lock().iter().map(|i| i.view()).collect()
    }

    pub fn item(&self, id: &str) -> Option<QueueItemView> {
        self.shared
            .lock()
            .iter()
            .find(|i| i.source.id() == id)
            .map(|i| i.view())
    }

    /// (total bytes, downloaded bytes) over queued, paused and downloading items
    pub fn totals(&self) -> (u64, u64) {
        self.shared.totals()
    }

    /// Start the worker if it is not already running
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if let Some(handle) = worker.as_ref() {
            if !handle.join.is_finished() {
                return;
            }
        }
        let cancel = CancellationToken::new();
        let join = tokio::spawn(worker::run(self.shared.clone(), cancel.clone()));
        *worker = Some(WorkerHandle { cancel, join });
        info!("download: worker started");
    }

    /// Stop the worker. An in-flight transfer ends up `Paused` with its
    /// partial file left in place.
    pub async fn stop(&self) {
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            let _ = handle.join.await;
            info!("download: worker stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .map(|h| !h.join.is_finished())
            .unwrap_or(false)
    }

    /// Wait until no item is queued, paused or downloading
    pub async fn wait_until_settled(&self) {
        loop {
            let changed = self.shared.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();
            if self.shared.is_settled() {
                return;
            }
            changed.await;
        }
    }
}
