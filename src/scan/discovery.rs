//! UPnP discovery and ContentDirectory walk
//!
//! States run `Idle -> Searching -> Connected -> Browsing -> Idle`. Browsing
//! drains a single queue of (container, start index) requests with one
//! request in flight; a container is paged for as long as the device keeps
//! returning full pages.

use log::{debug, info, warn};
use reqwest::Client;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{recording_name, ScanRun, ScanSummary, StateCell};
use crate::config::AppConfig;
use crate::events::{EventBus, ScanEvent, ScanSource, ScanState};
use crate::tree::{NodeRef, RemoteTree};
use crate::upnp::{browse, description, ssdp, DidlItem};

#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub device_name: String,
    /// Fixed description URL; skips SSDP when set
    pub location: Option<String>,
    pub root_container: String,
    pub page_size: u32,
    pub search_window: Duration,
    pub media_ext: String,
    /// Trailing stem marker left by lock removal; not part of the tree name
    pub marker: String,
}

impl From<&AppConfig> for DiscoverySettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            device_name: config.device_name.clone(),
            location: config.location.clone(),
            root_container: config.root_container.clone(),
            page_size: config.page_size.max(1),
            search_window: config.search_window(),
            media_ext: config.media_ext.clone(),
            marker: config.rename_marker.clone(),
        }
    }
}

/// The recorder once found
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub name: String,
    pub host: String,
    pub location: String,
    pub control_url: String,
}

struct BrowseRequest {
    container: String,
    node: NodeRef,
    start: u32,
}

pub struct DiscoveryScanner {
    client: Client,
    tree: Arc<RemoteTree>,
    bus: EventBus,
    settings: DiscoverySettings,
    state: StateCell,
    device: Mutex<Option<Device>>,
}

impl DiscoveryScanner {
    pub fn new(
        client: Client,
        tree: Arc<RemoteTree>,
        bus: EventBus,
        settings: DiscoverySettings,
    ) -> Self {
        Self {
            client,
            tree,
            state: StateCell::new(ScanSource::Discovery, bus.clone()),
            bus,
            settings,
            device: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ScanState {
        self.state.get()
    }

    pub fn device(&self) -> Option<Device> {
        self.device.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Fetch a description and keep it when it is the configured device
    async fn probe(&self, location: &str) -> Result<Option<Device>, String> {
        let desc = description::fetch(&self.client, location).await?;
        if desc.friendly_name != self.settings.device_name {
            debug!("discovery: ignoring {:?} at {}", desc.friendly_name, location);
            return Ok(None);
        }
        let control_url = desc
            .control_url
            .ok_or_else(|| format!("{} has no ContentDirectory", desc.friendly_name))?;
        Ok(Some(Device {
            name: desc.friendly_name,
            host: description::host_of(location).unwrap_or_default(),
            location: location.to_string(),
            control_url,
        }))
    }

    /// Search until the device answers or `cancel` fires. Returns None when
    /// cancelled.
    pub async fn find_device(&self, cancel: &CancellationToken) -> Result<Option<Device>, String> {
        if let Some(device) = self.device() {
            return Ok(Some(device));
        }
        self.state.set(ScanState::Searching);

        let found = match &self.settings.location {
            Some(location) => match self.probe(location).await {
                Ok(Some(device)) => Some(device),
                Ok(None) => {
                    self.state.set(ScanState::Idle);
                    return Err(format!(
                        "{} is not {:?}",
                        location, self.settings.device_name
                    ));
                }
                Err(e) => {
                    self.state.set(ScanState::Idle);
                    return Err(e);
                }
            },
            None => self.search(cancel).await,
        };

        let Some(device) = found else {
            self.state.set(ScanState::Idle);
            return Ok(None);
        };
        info!("discovery: found {} at {}", device.name, device.host);
        *self.device.lock().unwrap_or_else(|e| e.into_inner()) = Some(device.clone());
        self.bus.emit(ScanEvent::DeviceFound {
            source: ScanSource::Discovery,
            name: device.name.clone(),
            host: device.host.clone(),
        });
        self.state.set(ScanState::Connected);
        Ok(Some(device))
    }

    /// Repeat SSDP searches until a matching device is probed successfully
    async fn search(&self, cancel: &CancellationToken) -> Option<Device> {
        loop {
            let responses = tokio::select! {
                _ = cancel.cancelled() => return None,
                r = ssdp::search(ssdp::MEDIA_SERVER, self.settings.search_window) => r,
            };
            match responses {
                Ok(responses) => {
                    for response in responses {
                        match self.probe(&response.location).await {
                            Ok(Some(device)) => return Some(device),
                            Ok(None) => {}
                            Err(e) => warn!("discovery: {}", e),
                        }
                    }
                }
                Err(e) => {
                    // Typically no network yet; wait a window before retrying
                    warn!("discovery: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep(self.settings.search_window) => {}
                    }
                }
            }
            if cancel.is_cancelled() {
                return None;
            }
        }
    }

    /// Browse the whole ContentDirectory of the found device
    pub async fn browse_all(&self, cancel: &CancellationToken) -> Result<ScanSummary, String> {
        let device = self
            .device()
            .ok_or_else(|| "No device to browse".to_string())?;
        self.state.set(ScanState::Browsing);

        let mut run = ScanRun::start(
            ScanSource::Discovery,
            self.bus.clone(),
            BrowseRequest {
                container: self.settings.root_container.clone(),
                node: self.tree.root(),
                start: 0,
            },
        );

        let mut cancelled = false;
        while let Some(request) = run.next() {
            if cancel.is_cancelled() {
                info!("discovery: cancelled");
                cancelled = true;
                break;
            }

            let page = match browse::browse(
                &self.client,
                &device.control_url,
                &request.container,
                request.start,
                self.settings.page_size,
            )
            .await
            {
                Ok(page) => page,
                Err(e) => {
                    // Treated as an empty page: the container is not retried
                    warn!("discovery: {}", e);
                    run.failed();
                    continue;
                }
            };

            for container in &page.containers {
                match self.tree.add_folder(&request.node, &container.title) {
                    Ok(folder) => {
                        run.folder_found();
                        run.push(BrowseRequest {
                            container: container.id.clone(),
                            node: folder,
                            start: 0,
                        });
                    }
                    Err(e) => {
                        warn!("discovery: {}", e);
                        run.failed();
                    }
                }
            }

            for item in &page.items {
                match self.add_item(&request.node, item) {
                    Ok(()) => run.file_found(),
                    Err(e) => {
                        warn!("discovery: {}", e);
                        run.failed();
                    }
                }
            }

            if page.returned >= self.settings.page_size {
                run.push(BrowseRequest {
                    start: request.start + page.returned,
                    ..request
                });
            }
        }

        let summary = run.finish(cancelled);
        self.state.set(ScanState::Idle);
        Ok(summary)
    }

    fn add_item(&self, parent: &NodeRef, item: &DidlItem) -> Result<(), String> {
        let name = item_name(item, &self.settings.media_ext, &self.settings.marker);
        let file = self.tree.add_file(parent, &name)?;
        file.with_file(|info| {
            info.seen_via_discovery = true;
            if let Some(url) = &item.url {
                info.url = Some(url.clone());
            }
            if let Some(size) = item.size {
                info.size = size;
            }
            // Descriptor values from the transfer scanner are more precise
            if info.duration == 0 {
                info.duration = item.duration.unwrap_or(0);
            }
            if info.title.is_empty() {
                info.title = item.title.clone();
            }
            if info.channel.is_empty() {
                info.channel = item.channel.clone().unwrap_or_default();
            }
            if info.description.is_empty() {
                info.description = item.description.clone().unwrap_or_default();
            }
        });
        self.tree.update_item(&file);
        Ok(())
    }

    /// Find the device if needed, then browse it
    pub async fn scan(&self, cancel: &CancellationToken) -> Result<ScanSummary, String> {
        match self.find_device(cancel).await? {
            Some(_) => self.browse_all(cancel).await,
            None => Ok(ScanSummary {
                cancelled: true,
                ..ScanSummary::default()
            }),
        }
    }

    /// Forget the device and everything learnt from it
    pub fn disconnect(&self) {
        let lost = self.device.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.tree.clear();
        if let Some(device) = lost {
            info!("discovery: lost {}", device.name);
            self.bus.emit(ScanEvent::DeviceLost {
                source: ScanSource::Discovery,
                name: device.name,
            });
        }
        self.state.set(ScanState::Idle);
    }
}

/// Tree name of a browsed item: the recording name of the media file in its
/// URL, so both scanners agree on identity, else its title.
fn item_name(item: &DidlItem, media_ext: &str, marker: &str) -> String {
    let from_url = item.url.as_deref().and_then(|url| {
        let path = url.split(|c| c == '?' || c == '#').next()?;
        let segment = path.rsplit('/').next()?;
        let decoded = urlencoding::decode(segment).ok()?;
        let split = decoded.len().checked_sub(media_ext.len())?;
        if split == 0 || !decoded.is_char_boundary(split) {
            return None;
        }
        let (stem, tail) = decoded.split_at(split);
        tail.eq_ignore_ascii_case(media_ext)
            .then(|| recording_name(stem, marker).to_string())
    });
    from_url.unwrap_or_else(|| item.title.replace('/', "_"))
}
