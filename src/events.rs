//! Event bus shared by the remote tree, the scanners and the download queue
//!
//! Every producer holds a clone of [`EventBus`] and emits serializable
//! payloads; the single receiver returned by [`EventBus::new`] is the one
//! delivery path observers read from. Delivery order is the emission order
//! of each producer, and producers emit only after the mutation is visible.

use queue_dl::{DownloadEvent, EventSink};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Structural notifications raised by the remote tree
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TreeEvent {
    ItemInserted { parent: String, tree_path: String },
    ItemChanged { tree_path: String },
    /// Children of `tree_path` were added, removed or reordered
    StructureChanged { tree_path: String },
}

/// Which of the two scanners raised a scan event
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanSource {
    Discovery,
    Transfer,
}

impl std::fmt::Display for ScanSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanSource::Discovery => write!(f, "discovery"),
            ScanSource::Transfer => write!(f, "transfer"),
        }
    }
}

/// Scanner life-cycle states
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Idle,
    Searching,
    Connected,
    Browsing,
}

impl std::fmt::Display for ScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanState::Idle => write!(f, "idle"),
            ScanState::Searching => write!(f, "searching"),
            ScanState::Connected => write!(f, "connected"),
            ScanState::Browsing => write!(f, "browsing"),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ScanEvent {
    StateChanged {
        source: ScanSource,
        state: ScanState,
    },
    ScanStarted {
        source: ScanSource,
    },
    ScanProgress {
        source: ScanSource,
        folders: usize,
        files: usize,
    },
    ScanCompleted {
        source: ScanSource,
        folders: usize,
        files: usize,
        /// Browse or listing calls that failed and were skipped
        failures: usize,
    },
    DeviceFound {
        source: ScanSource,
        name: String,
        host: String,
    },
    DeviceLost {
        source: ScanSource,
        name: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "channel", content = "event", rename_all = "kebab-case")]
pub enum Event {
    Tree(TreeEvent),
    Scan(ScanEvent),
    Download(DownloadEvent),
}

impl From<TreeEvent> for Event {
    fn from(event: TreeEvent) -> Self {
        Event::Tree(event)
    }
}

impl From<ScanEvent> for Event {
    fn from(event: ScanEvent) -> Self {
        Event::Scan(event)
    }
}

impl From<DownloadEvent> for Event {
    fn from(event: DownloadEvent) -> Self {
        Event::Download(event)
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventBus {
    pub fn new() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue an event for delivery. Never blocks; dropped when nobody listens.
    pub fn emit(&self, event: impl Into<Event>) {
        let _ = self.tx.send(event.into());
    }

    /// Adapter handing download queue events to this bus
    pub fn download_sink(&self) -> EventSink {
        let bus = self.clone();
        Arc::new(move |event: DownloadEvent| bus.emit(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_delivered_in_emission_order() {
        let (bus, mut rx) = EventBus::new();
        bus.emit(TreeEvent::ItemChanged {
            tree_path: "/a".to_string(),
        });
        bus.emit(ScanEvent::ScanStarted {
            source: ScanSource::Transfer,
        });
        (bus.download_sink())(DownloadEvent::QueueChanged);

        assert!(matches!(rx.try_recv(), Ok(Event::Tree(TreeEvent::ItemChanged { .. }))));
        assert!(matches!(rx.try_recv(), Ok(Event::Scan(ScanEvent::ScanStarted { .. }))));
        assert!(matches!(rx.try_recv(), Ok(Event::Download(DownloadEvent::QueueChanged))));
    }

    #[test]
    fn emitting_without_listener_is_harmless() {
        let (bus, rx) = EventBus::new();
        drop(rx);
        bus.emit(TreeEvent::StructureChanged {
            tree_path: "/".to_string(),
        });
    }

    #[test]
    fn event_serializes_with_channel_tag() {
        let event: Event = ScanEvent::DeviceFound {
            source: ScanSource::Discovery,
            name: "HUMAX HDR-FOX T2".to_string(),
            host: "192.168.1.20".to_string(),
        }
        .into();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["channel"], "scan");
        assert_eq!(json["event"]["kind"], "device-found");
        assert_eq!(json["event"]["source"], "discovery");
    }
}
