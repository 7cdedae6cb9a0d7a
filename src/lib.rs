//! Live inventory of a networked PVR's recordings
//!
//! Two scanners fill one [`tree::RemoteTree`]: UPnP discovery
//! ([`scan::discovery`]) and an FTP walk that also reads each recording's
//! `.hmt` descriptor ([`scan::transfer`]). Selected recordings are copied
//! locally by the resumable queue from the `queue-dl` crate, and the FTP
//! side can clear a recording's copy-protection lock. Everything observable
//! is reported through one [`events::EventBus`].

pub mod config;
pub mod download;
pub mod events;
pub mod ftp;
pub mod hmt;
pub mod scan;
pub mod tree;
pub mod upnp;

use log::{info, warn};
use reqwest::Client;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use config::AppConfig;
use download::{RecordingQueue, RecordingSource};
use events::{EventBus, EventReceiver};
use ftp::FtpClient;
use scan::discovery::{Device, DiscoveryScanner};
use scan::transfer::TransferScanner;
use scan::ScanSummary;
use tree::RemoteTree;

/// Wires the tree, both scanners and the download queue to one event bus
pub struct Recorder {
    config: AppConfig,
    bus: EventBus,
    tree: Arc<RemoteTree>,
    discovery: DiscoveryScanner,
    queue: RecordingQueue,
}

impl Recorder {
    pub fn new(config: AppConfig) -> (Self, EventReceiver) {
        let (bus, rx) = EventBus::new();
        let tree = Arc::new(RemoteTree::new(bus.clone()));
        let client = Client::new();
        let discovery =
            DiscoveryScanner::new(client.clone(), tree.clone(), bus.clone(), (&config).into());
        let queue = RecordingQueue::new(config.queue_config(), client, bus.download_sink());
        let recorder = Self {
            config,
            bus,
            tree,
            discovery,
            queue,
        };
        (recorder, rx)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn tree(&self) -> &Arc<RemoteTree> {
        &self.tree
    }

    pub fn discovery(&self) -> &DiscoveryScanner {
        &self.discovery
    }

    pub fn queue(&self) -> &RecordingQueue {
        &self.queue
    }

    /// FTP host: the configured one, else whatever discovery finds
    pub async fn device_host(&self, cancel: &CancellationToken) -> Result<String, String> {
        if let Some(host) = &self.config.host {
            return Ok(host.clone());
        }
        host_of(self.discovery.find_device(cancel).await?)
    }

    pub async fn connect_transfer(
        &self,
        cancel: &CancellationToken,
    ) -> Result<TransferScanner<FtpClient>, String> {
        let host = self.device_host(cancel).await?;
        self.connect_transfer_at(&host).await
    }

    async fn connect_transfer_at(&self, host: &str) -> Result<TransferScanner<FtpClient>, String> {
        TransferScanner::connect(host, &self.config, self.tree.clone(), self.bus.clone()).await
    }

    /// Run both scanners side by side. Each result is reported separately;
    /// one failing does not stop the other. Without a fixed host the device
    /// is searched for once, before either walk starts.
    pub async fn scan_all(
        &self,
        cancel: &CancellationToken,
    ) -> (
        Result<ScanSummary, String>,
        Result<ScanSummary, String>,
    ) {
        let found = match &self.config.host {
            Some(_) => None,
            None => Some(self.discovery.find_device(cancel).await),
        };

        let discovery = async {
            match &found {
                Some(Err(e)) => Err(e.clone()),
                Some(Ok(None)) => Ok(ScanSummary {
                    cancelled: true,
                    ..ScanSummary::default()
                }),
                _ => self.discovery.scan(cancel).await,
            }
        };
        let transfer = async {
            let host = match (&self.config.host, &found) {
                (Some(host), _) => Ok(host.clone()),
                (None, Some(Ok(device))) => host_of(device.clone()),
                (None, Some(Err(e))) => Err(e.clone()),
                (None, None) => Err("No device host".to_string()),
            };
            let scanner = match host {
                Ok(host) => self.connect_transfer_at(&host).await,
                Err(e) => Err(e),
            };
            match scanner {
                Ok(scanner) => {
                    let summary = scanner.scan(cancel).await;
                    if let Err(e) = scanner.disconnect().await {
                        warn!("ftp_scan: {}", e);
                    }
                    summary
                }
                Err(e) => Err(e),
            }
        };
        tokio::join!(discovery, transfer)
    }

    /// Queue the recordings at `tree_paths`, in the given order
    pub async fn queue_paths(&self, tree_paths: &[String]) -> Result<usize, String> {
        let mut sources = Vec::with_capacity(tree_paths.len());
        for path in tree_paths {
            let node = self
                .tree
                .find(path)
                .ok_or_else(|| format!("No recording at {}", path))?;
            let source = RecordingSource::new(node, self.tree.clone(), &self.config.media_ext)
                .ok_or_else(|| format!("{} is a folder", path))?;
            sources.push(source);
        }
        let added = self.queue.enqueue(sources).await?;
        info!("download: queued {} of {} recordings", added, tree_paths.len());
        Ok(added)
    }
}

fn host_of(found: Option<Device>) -> Result<String, String> {
    match found {
        Some(device) if !device.host.is_empty() => Ok(device.host),
        Some(device) => Err(format!("No host in {}", device.location)),
        None => Err("Device search cancelled".to_string()),
    }
}

/// Indented listing of the tree, one node per line
pub fn render_tree(tree: &RemoteTree) -> String {
    fn walk(node: &tree::NodeRef, depth: usize, out: &mut String) {
        for child in node.children() {
            let indent = "  ".repeat(depth);
            match child.file_info() {
                None => {
                    out.push_str(&format!("{}{}/\n", indent, child.name()));
                    walk(&child, depth + 1, out);
                }
                Some(info) => {
                    let mut flags = Vec::new();
                    if info.locked {
                        flags.push("locked");
                    }
                    if info.hd {
                        flags.push("HD");
                    }
                    if info.url.is_none() {
                        flags.push("no-url");
                    }
                    out.push_str(&format!(
                        "{}{} ({} bytes){}{}\n",
                        indent,
                        child.name(),
                        info.size,
                        if info.title.is_empty() {
                            String::new()
                        } else {
                            format!(" \"{}\"", info.title)
                        },
                        if flags.is_empty() {
                            String::new()
                        } else {
                            format!(" [{}]", flags.join(", "))
                        }
                    ));
                }
            }
        }
    }
    let mut out = String::new();
    walk(&tree.root(), 0, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::{Event, ScanEvent};
    use scan::discovery::tests::NAME;
    use upnp::browse::tests::browse_reply;
    use upnp::description::tests::description_xml;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn renders_folders_before_files() {
        let (bus, _rx) = EventBus::new();
        let tree = RemoteTree::new(bus);
        let drama = tree.ensure_folder("/Drama").unwrap();
        let ep = tree.add_file(&drama, "Ep1").unwrap();
        ep.with_file(|info| {
            info.size = 10;
            info.title = "Episode One".to_string();
            info.locked = true;
            info.url = Some("http://h/Ep1.ts".to_string());
        });
        tree.add_file(&tree.root(), "News").unwrap();

        assert_eq!(
            render_tree(&tree),
            "Drama/\n  Ep1 (10 bytes) \"Episode One\" [locked]\nNews (0 bytes) [no-url]\n"
        );
    }

    #[tokio::test]
    async fn queueing_unknown_or_folder_paths_fails() {
        let (recorder, _rx) = Recorder::new(AppConfig::default());
        recorder.tree().ensure_folder("/Drama").unwrap();
        assert!(recorder.queue_paths(&["/Missing".to_string()]).await.is_err());
        assert!(recorder.queue_paths(&["/Drama".to_string()]).await.is_err());
        assert!(recorder.queue().is_empty());
    }

    #[tokio::test]
    async fn scan_all_searches_for_the_device_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/description.xml"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(description_xml(NAME, "/cd/control")),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/cd/control"))
            .respond_with(ResponseTemplate::new(200).set_body_string(browse_reply(&[], 0, 0)))
            .mount(&server)
            .await;

        // Nothing listens there, so the FTP side fails straight away
        let closed_port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let config = AppConfig {
            device_name: NAME.to_string(),
            location: Some(format!("{}/description.xml", server.uri())),
            ftp_port: closed_port,
            ..AppConfig::default()
        };
        let (recorder, mut rx) = Recorder::new(config);

        let (discovery, transfer) = recorder.scan_all(&CancellationToken::new()).await;
        assert_eq!(discovery.unwrap().files, 0);
        assert!(transfer.is_err());

        let mut found = 0;
        while let Ok(event) = rx.try_recv() {
            if let Event::Scan(ScanEvent::DeviceFound { .. }) = event {
                found += 1;
            }
        }
        assert_eq!(found, 1);
    }
}
