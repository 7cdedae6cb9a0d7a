//! Sequential resumable HTTP download queue
//!
//! Provides the download engine behind the recording grabber:
//! - Ordered queue with insert/move/remove that never changes item state
//! - Resume from partial files via `Range: bytes=<offset>-` and append mode
//! - A single worker draining queued and paused items in queue order
//! - Throttled progress events with a moving-average transfer rate
//! - Cooperative stop that leaves the in-flight item paused

mod fs;
mod manager;
mod rate;
mod types;
mod worker;

pub use fs::sanitize_file_name;
pub use manager::DownloadManager;
pub use rate::RateTracker;
pub use types::{
    DownloadCompleted, DownloadEvent, DownloadProgress, DownloadSource, DownloadStateChanged,
    EventSink, QueueConfig, QueueItem, QueueItemView, QueueState, DEFAULT_PROGRESS_INTERVAL,
    DEFAULT_RATE_SAMPLES,
};
