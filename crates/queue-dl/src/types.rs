//! Queue item state, event payloads and the source abstraction

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default interval between throttled progress events (about twice a second)
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Default number of rate samples kept for the moving average
pub const DEFAULT_RATE_SAMPLES: usize = 10;

/// Something the queue can fetch over HTTP.
///
/// `id` must be stable for the lifetime of the source; the queue uses it to
/// reject duplicates and to address items for reordering.
pub trait DownloadSource: Clone + Send + Sync + 'static {
    fn id(&self) -> String;

    /// Remote filename, extension included. Sanitized before use on disk.
    fn file_name(&self) -> String;

    fn url(&self) -> Option<String>;

    /// Expected size in bytes, 0 when unknown
    fn size_hint(&self) -> u64;

    /// Called after every chunk with the item's downloaded byte count
    fn record_progress(&self, _downloaded: u64) {}
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum QueueState {
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "downloading")]
    Downloading,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "error")]
    Error,
}

impl QueueState {
    /// States the worker will pick up
    pub fn is_pending(self) -> bool {
        matches!(self, QueueState::Queued | QueueState::Paused)
    }

    pub fn is_unfinished(self) -> bool {
        matches!(
            self,
            QueueState::Queued | QueueState::Paused | QueueState::Downloading
        )
    }
}

impl std::fmt::Display for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueState::Ready => write!(f, "ready"),
            QueueState::Queued => write!(f, "queued"),
            QueueState::Downloading => write!(f, "downloading"),
            QueueState::Completed => write!(f, "completed"),
            QueueState::Paused => write!(f, "paused"),
            QueueState::Error => write!(f, "error"),
        }
    }
}

/// A unit of work in the queue. Counters are independent of the source's own,
/// since the same source may be queued, removed and queued again.
#[derive(Debug, Clone)]
pub struct QueueItem<S> {
    pub source: S,
    pub state: QueueState,
    pub size: u64,
    pub downloaded: u64,
    pub local_dir: PathBuf,
    pub local_name: String,
    /// Fraction of the post-download move done, when moving across devices
    pub move_progress: Option<f32>,
    pub error: Option<String>,
}

impl<S: DownloadSource> QueueItem<S> {
    pub fn local_path(&self) -> PathBuf {
        self.local_dir.join(&self.local_name)
    }

    pub fn view(&self) -> QueueItemView {
        QueueItemView {
            task_id: self.source.id(),
            file_name: self.local_name.clone(),
            local_path: self.local_path().to_string_lossy().into_owned(),
            state: self.state,
            size: self.size,
            downloaded: self.downloaded,
            move_progress: self.move_progress,
            error: self.error.clone(),
        }
    }
}

/// Serializable snapshot of one queue item
#[derive(Debug, Clone, Serialize)]
pub struct QueueItemView {
    pub task_id: String,
    pub file_name: String,
    pub local_path: String,
    pub state: QueueState,
    pub size: u64,
    pub downloaded: u64,
    pub move_progress: Option<f32>,
    pub error: Option<String>,
}

/// State change event payload
#[derive(Debug, Clone, Serialize)]
pub struct DownloadStateChanged {
    pub task_id: String,
    pub state: QueueState,
    pub error: Option<String>,
}

/// Throttled progress event payload
#[derive(Debug, Clone, Serialize)]
pub struct DownloadProgress {
    pub total_queued: u64,
    pub total_downloaded: u64,
    pub rate: f64, // bytes per second, moving average
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadCompleted {
    pub task_id: String,
    pub local_path: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DownloadEvent {
    StateChanged(DownloadStateChanged),
    Progress(DownloadProgress),
    ItemCompleted(DownloadCompleted),
    /// Items were inserted, moved or removed
    QueueChanged,
}

/// Receives every event the queue raises, in order
pub type EventSink = Arc<dyn Fn(DownloadEvent) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub download_dir: PathBuf,
    /// Completed files are moved here when set and different from `download_dir`
    pub move_dir: Option<PathBuf>,
    pub progress_interval: Duration,
    pub rate_samples: usize,
}

impl QueueConfig {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            move_dir: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            rate_samples: DEFAULT_RATE_SAMPLES,
        }
    }
}
