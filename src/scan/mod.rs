//! Work-queue primitive shared by the discovery and transfer scanners
//!
//! A scan is a single queue of pending requests processed one at a time.
//! Handlers push follow-up requests (sub-folders, further pages) back onto
//! the queue, so at most one request is ever in flight and the scan ends
//! when the queue drains.

pub mod discovery;
pub mod transfer;

use log::debug;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::events::{EventBus, ScanEvent, ScanSource, ScanState};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Tree name of the recording whose media file stem is `stem`.
///
/// Lock removal appends `marker` to the media file only, so one trailing
/// marker is not part of a recording's identity.
pub(crate) fn recording_name<'a>(stem: &'a str, marker: &str) -> &'a str {
    match stem.strip_suffix(marker) {
        Some(base) if !marker.is_empty() && !base.is_empty() => base,
        _ => stem,
    }
}

/// Totals reported when a scan finishes
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ScanSummary {
    pub folders: usize,
    pub files: usize,
    pub failures: usize,
    pub cancelled: bool,
}

pub(crate) struct ScanRun<R> {
    source: ScanSource,
    bus: EventBus,
    pending: VecDeque<R>,
    summary: ScanSummary,
    last_progress: Instant,
}

impl<R> ScanRun<R> {
    /// Seed the queue with the first request and announce the scan
    pub(crate) fn start(source: ScanSource, bus: EventBus, seed: R) -> Self {
        bus.emit(ScanEvent::ScanStarted { source });
        Self {
            source,
            bus,
            pending: VecDeque::from([seed]),
            summary: ScanSummary::default(),
            last_progress: Instant::now(),
        }
    }

    pub(crate) fn push(&mut self, request: R) {
        self.pending.push_back(request);
    }

    pub(crate) fn next(&mut self) -> Option<R> {
        self.pending.pop_front()
    }

    pub(crate) fn folder_found(&mut self) {
        self.summary.folders += 1;
        self.report();
    }

    pub(crate) fn file_found(&mut self) {
        self.summary.files += 1;
        self.report();
    }

    /// A request failed; it is skipped, not retried
    pub(crate) fn failed(&mut self) {
        self.summary.failures += 1;
    }

    fn report(&mut self) {
        if self.last_progress.elapsed() < PROGRESS_INTERVAL {
            return;
        }
        self.last_progress = Instant::now();
        self.bus.emit(ScanEvent::ScanProgress {
            source: self.source,
            folders: self.summary.folders,
            files: self.summary.files,
        });
    }

    pub(crate) fn finish(mut self, cancelled: bool) -> ScanSummary {
        self.summary.cancelled = cancelled;
        debug!(
            "{}: scan finished ({} folders, {} files, {} failures{})",
            self.source,
            self.summary.folders,
            self.summary.files,
            self.summary.failures,
            if cancelled { ", cancelled" } else { "" }
        );
        self.bus.emit(ScanEvent::ScanCompleted {
            source: self.source,
            folders: self.summary.folders,
            files: self.summary.files,
            failures: self.summary.failures,
        });
        self.summary
    }
}

/// Current scanner state; every change is announced on the bus
pub(crate) struct StateCell {
    source: ScanSource,
    bus: EventBus,
    state: Mutex<ScanState>,
}

impl StateCell {
    pub(crate) fn new(source: ScanSource, bus: EventBus) -> Self {
        Self {
            source,
            bus,
            state: Mutex::new(ScanState::Idle),
        }
    }

    pub(crate) fn get(&self) -> ScanState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set(&self, state: ScanState) {
        {
            let mut current = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *current == state {
                return;
            }
            *current = state;
        }
        debug!("{}: state -> {}", self.source, state);
        self.bus.emit(ScanEvent::StateChanged {
            source: self.source,
            state,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::events::Event;
    use crate::scan::discovery::tests::{page, NAME};
    use crate::scan::discovery::DiscoveryScanner;
    use crate::scan::transfer::tests::{device, RECORDING};
    use crate::scan::transfer::{TransferScanner, TransferSettings};
    use crate::tree::RemoteTree;
    use crate::upnp::browse::tests::{browse_reply, didl_container, didl_item};
    use crate::upnp::description::tests::description_xml;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn queue_is_first_in_first_out() {
        let (bus, _rx) = EventBus::new();
        let mut run = ScanRun::start(ScanSource::Transfer, bus, 1);
        run.push(2);
        run.push(3);
        assert_eq!(run.next(), Some(1));
        run.push(4);
        assert_eq!(run.next(), Some(2));
        assert_eq!(run.next(), Some(3));
        assert_eq!(run.next(), Some(4));
        assert_eq!(run.next(), None);
    }

    #[test]
    fn finish_reports_totals_and_failures() {
        let (bus, mut rx) = EventBus::new();
        let mut run = ScanRun::start(ScanSource::Discovery, bus, ());
        run.folder_found();
        run.file_found();
        run.file_found();
        run.failed();
        let summary = run.finish(false);

        assert_eq!(
            summary,
            ScanSummary {
                folders: 1,
                files: 2,
                failures: 1,
                cancelled: false
            }
        );
        let mut events = Vec::new();
        while let Ok(Event::Scan(e)) = rx.try_recv() {
            events.push(e);
        }
        assert_eq!(
            events.first(),
            Some(&ScanEvent::ScanStarted {
                source: ScanSource::Discovery
            })
        );
        assert_eq!(
            events.last(),
            Some(&ScanEvent::ScanCompleted {
                source: ScanSource::Discovery,
                folders: 1,
                files: 2,
                failures: 1
            })
        );
    }

    #[test]
    fn renamed_media_keeps_its_recording_name() {
        assert_eq!(recording_name("Film_", "_"), "Film");
        assert_eq!(recording_name("Film", "_"), "Film");
        assert_eq!(recording_name("_", "_"), "_");
        assert_eq!(recording_name("Film_", ""), "Film_");
    }

    #[test]
    fn state_changes_are_emitted_once() {
        let (bus, mut rx) = EventBus::new();
        let cell = StateCell::new(ScanSource::Transfer, bus);
        cell.set(ScanState::Browsing);
        cell.set(ScanState::Browsing);
        cell.set(ScanState::Idle);
        assert_eq!(cell.get(), ScanState::Idle);

        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 2);
    }

    /// Media server listing the same recordings the fake FTP device holds
    async fn recorder_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/description.xml"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(description_xml(NAME, "/cd/control")),
            )
            .mount(&server)
            .await;
        let url = |name: &str| format!("{}/web/{}", server.uri(), name);
        page("0", 0)
            .respond_with(ResponseTemplate::new(200).set_body_string(browse_reply(
                &[
                    didl_container("0/1", "Drama"),
                    didl_item("0/5", "News", &url("News.ts"), 10),
                ],
                2,
                2,
            )))
            .mount(&server)
            .await;
        page("0/1", 0)
            .respond_with(ResponseTemplate::new(200).set_body_string(browse_reply(
                &[didl_item(
                    "0/1/1",
                    "Silent Witness (repeat)",
                    &url("Drama/Silent%20Witness_20240105_2100.ts"),
                    1000,
                )],
                1,
                1,
            )))
            .mount(&server)
            .await;
        server
    }

    async fn scan_both(discovery_first: bool) -> Arc<RemoteTree> {
        let server = recorder_server().await;
        let (bus, _rx) = EventBus::new();
        let tree = Arc::new(RemoteTree::new(bus.clone()));
        let config = AppConfig {
            device_name: NAME.to_string(),
            location: Some(format!("{}/description.xml", server.uri())),
            ..AppConfig::default()
        };
        let discovery =
            DiscoveryScanner::new(reqwest::Client::new(), tree.clone(), bus.clone(), (&config).into());
        let transfer = TransferScanner::new(device(), tree.clone(), bus, TransferSettings::from(&config));

        let cancel = CancellationToken::new();
        if discovery_first {
            discovery.scan(&cancel).await.unwrap();
            transfer.scan(&cancel).await.unwrap();
        } else {
            transfer.scan(&cancel).await.unwrap();
            discovery.scan(&cancel).await.unwrap();
        }
        tree
    }

    #[tokio::test]
    async fn both_scanners_fill_the_same_nodes_in_either_order() {
        for discovery_first in [true, false] {
            let tree = scan_both(discovery_first).await;
            assert_eq!(tree.counts(), (2, 2), "discovery first: {}", discovery_first);
            assert_eq!(tree.find("/Drama").unwrap().children().len(), 1);

            let info = tree
                .find(&format!("/Drama/{}", RECORDING))
                .unwrap()
                .file_info()
                .unwrap();
            assert!(info.seen_via_discovery && info.seen_via_transfer);
            assert!(info
                .url
                .as_deref()
                .unwrap()
                .ends_with("/web/Drama/Silent%20Witness_20240105_2100.ts"));
            assert_eq!(info.size, 1000);
            // Descriptor values win over DIDL-Lite metadata
            assert_eq!(info.title, "Silent Witness");
            assert_eq!(info.description, "The team investigate a death.");
            assert_eq!(info.duration, 3600);
            assert!(info.locked);

            let news = tree.find("/News").unwrap().file_info().unwrap();
            assert!(news.seen_via_discovery && news.seen_via_transfer);
            assert_eq!(news.description, "Evening news.");
        }
    }
}
