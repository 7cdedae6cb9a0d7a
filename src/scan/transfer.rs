//! FTP walk of the recorder's video folder, and lock removal
//!
//! The walk is breadth first from the configured root. Sub-directories
//! become folders, media files become files, and each file is enriched from
//! its same-named descriptor sidecar. The connection is shared behind an
//! async mutex: the walk takes it for one directory at a time, lock removal
//! takes it for its whole sequence.

use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{recording_name, ScanRun, ScanSummary, StateCell};
use crate::config::AppConfig;
use crate::events::{EventBus, ScanSource, ScanState};
use crate::ftp::{FileTransfer, FtpClient, FtpError, FtpResult};
use crate::hmt;
use crate::tree::{join_path, NodeRef, RemoteTree};

/// Where recordings live on the device and how they are named
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub root: String,
    pub media_ext: String,
    pub sidecar_ext: String,
    /// Appended to the media stem when a lock is removed
    pub marker: String,
}

impl From<&AppConfig> for TransferSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            root: config.ftp_root.clone(),
            media_ext: config.media_ext.clone(),
            sidecar_ext: config.sidecar_ext.clone(),
            marker: config.rename_marker.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum UnlockOutcome {
    /// The descriptor was already unlocked; nothing was written
    AlreadyUnlocked,
    Unlocked { remote_name: String },
}

/// The step of lock removal that failed before anything was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnlockStep {
    Lookup,
    ChangeDirectory,
    FetchDescriptor,
    StoreDescriptor,
}

impl fmt::Display for UnlockStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnlockStep::Lookup => write!(f, "find recording"),
            UnlockStep::ChangeDirectory => write!(f, "change directory"),
            UnlockStep::FetchDescriptor => write!(f, "fetch descriptor"),
            UnlockStep::StoreDescriptor => write!(f, "store descriptor"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum UnlockError {
    /// Nothing on the device was changed
    Aborted { step: UnlockStep, message: String },
    /// The descriptor was rewritten but the media file kept its old name
    Partial { message: String },
}

impl UnlockError {
    fn aborted(step: UnlockStep, cause: impl fmt::Display) -> Self {
        UnlockError::Aborted {
            step,
            message: cause.to_string(),
        }
    }
}

impl fmt::Display for UnlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnlockError::Aborted { step, message } => write!(f, "Failed to {}: {}", step, message),
            UnlockError::Partial { message } => {
                write!(f, "Descriptor unlocked but rename failed: {}", message)
            }
        }
    }
}

impl std::error::Error for UnlockError {}

type WalkRequest = (String, NodeRef);

pub struct TransferScanner<T> {
    conn: Arc<Mutex<T>>,
    tree: Arc<RemoteTree>,
    bus: EventBus,
    settings: TransferSettings,
    state: StateCell,
}

impl TransferScanner<FtpClient> {
    /// Log in to the recorder and switch to binary mode
    pub async fn connect(
        host: &str,
        config: &AppConfig,
        tree: Arc<RemoteTree>,
        bus: EventBus,
    ) -> Result<Self, String> {
        let mut client = FtpClient::connect(host, config.ftp_port)
            .await
            .map_err(|e| format!("Failed to connect to {}: {}", host, e))?;
        client
            .login(&config.ftp_user, &config.ftp_password)
            .await
            .map_err(|e| format!("Failed to log in to {}: {}", host, e))?;
        client
            .set_binary()
            .await
            .map_err(|e| format!("Failed to set binary mode: {}", e))?;
        Ok(Self::new(client, tree, bus, TransferSettings::from(config)))
    }
}

impl<T: FileTransfer> TransferScanner<T> {
    /// Wrap an already logged-in connection
    pub fn new(conn: T, tree: Arc<RemoteTree>, bus: EventBus, settings: TransferSettings) -> Self {
        let state = StateCell::new(ScanSource::Transfer, bus.clone());
        state.set(ScanState::Connected);
        Self {
            conn: Arc::new(Mutex::new(conn)),
            tree,
            bus,
            settings,
            state,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state.get()
    }

    pub fn tree(&self) -> &Arc<RemoteTree> {
        &self.tree
    }

    /// Device directory holding the children of the folder at `tree_path`
    fn remote_dir(&self, tree_path: &str) -> String {
        if tree_path == "/" {
            self.settings.root.clone()
        } else {
            format!("{}{}", self.settings.root.trim_end_matches('/'), tree_path)
        }
    }

    /// Walk the whole device once. Per-directory failures are skipped and
    /// counted; a connection-fatal failure ends the scan with an error.
    pub async fn scan(&self, cancel: &CancellationToken) -> Result<ScanSummary, String> {
        self.state.set(ScanState::Browsing);
        let mut run = ScanRun::start(
            ScanSource::Transfer,
            self.bus.clone(),
            (self.settings.root.clone(), self.tree.root()),
        );

        let mut cancelled = false;
        while let Some((dir, folder)) = run.next() {
            if cancel.is_cancelled() {
                info!("ftp_scan: cancelled");
                cancelled = true;
                break;
            }

            let mut conn = self.conn.lock().await;
            let result = self.visit(&mut *conn, &dir, &folder, &mut run).await;
            drop(conn);

            if let Err(e) = result {
                run.failed();
                if e.is_connection_fatal() {
                    warn!("ftp_scan: connection lost in {}: {}", dir, e);
                    run.finish(false);
                    self.state.set(ScanState::Idle);
                    return Err(format!("Failed to scan {}: {}", dir, e));
                }
                warn!("ftp_scan: skipping {}: {}", dir, e);
            }
        }

        let summary = run.finish(cancelled);
        self.state.set(ScanState::Idle);
        Ok(summary)
    }

    /// One directory step: list it, insert what it holds, read sidecars
    async fn visit(
        &self,
        conn: &mut T,
        dir: &str,
        folder: &NodeRef,
        run: &mut ScanRun<WalkRequest>,
    ) -> FtpResult<()> {
        conn.cwd(dir).await?;
        let entries = conn.list().await?;
        debug!("ftp_scan: {} has {} entries", dir, entries.len());
        let names: HashSet<&str> = entries.iter().map(|e| e.name.as_str()).collect();

        for entry in &entries {
            if entry.is_dir() {
                match self.tree.add_folder(folder, &entry.name) {
                    Ok(child) => {
                        run.folder_found();
                        run.push((join_path(dir, &entry.name), child));
                    }
                    Err(e) => {
                        warn!("ftp_scan: {}", e);
                        run.failed();
                    }
                }
                continue;
            }

            let Some(stem) = media_stem(&entry.name, &self.settings.media_ext) else {
                continue;
            };
            let name = recording_name(stem, &self.settings.marker);
            let file = match self.tree.add_file(folder, name) {
                Ok(file) => file,
                Err(e) => {
                    warn!("ftp_scan: {}", e);
                    run.failed();
                    continue;
                }
            };
            run.file_found();

            // A renamed media file keeps the descriptor of its recording name
            let sidecar = [stem, name]
                .iter()
                .map(|base| format!("{}{}", base, self.settings.sidecar_ext))
                .find(|candidate| names.contains(candidate.as_str()));
            let descriptor = match &sidecar {
                Some(sidecar) => match conn.retrieve(sidecar).await {
                    Ok(bytes) => Some(hmt::decode(&bytes)),
                    Err(e) if e.is_connection_fatal() => return Err(e),
                    Err(e) => {
                        warn!("ftp_scan: no descriptor for {}: {}", entry.name, e);
                        run.failed();
                        None
                    }
                },
                None => None,
            };

            file.with_file(|info| {
                info.size = entry.size;
                info.remote_name = Some(entry.name.clone());
                info.seen_via_transfer = true;
                if sidecar.is_some() {
                    info.sidecar_name = sidecar.clone();
                }
                if let Some(descriptor) = &descriptor {
                    info.apply_descriptor(descriptor);
                }
            });
            self.tree.update_item(&file);
        }
        Ok(())
    }

    /// Clear the copy-protection lock of one recording and rename its media
    /// file so the device picks the change up.
    pub async fn unlock(&self, node: &NodeRef) -> Result<UnlockOutcome, UnlockError> {
        let info = node.file_info().ok_or_else(|| {
            UnlockError::aborted(
                UnlockStep::Lookup,
                format!("{} is not a recording", node.tree_path()),
            )
        })?;
        let parent = node.parent().ok_or_else(|| {
            UnlockError::aborted(
                UnlockStep::Lookup,
                format!("{} is no longer in the tree", node.tree_path()),
            )
        })?;
        let dir = self.remote_dir(parent.tree_path());
        let media = info
            .remote_name
            .clone()
            .unwrap_or_else(|| format!("{}{}", node.name(), self.settings.media_ext));
        let sidecar = info
            .sidecar_name
            .clone()
            .unwrap_or_else(|| format!("{}{}", node.name(), self.settings.sidecar_ext));

        let mut conn = self.conn.lock().await;
        conn.cwd(&dir)
            .await
            .map_err(|e| UnlockError::aborted(UnlockStep::ChangeDirectory, e))?;
        let bytes = conn
            .retrieve(&sidecar)
            .await
            .map_err(|e| UnlockError::aborted(UnlockStep::FetchDescriptor, e))?;

        let descriptor = hmt::decode(&bytes);
        if !descriptor.locked {
            drop(conn);
            info!("unlock: {} is already unlocked", node.tree_path());
            self.mark_unlocked(node, None);
            return Ok(UnlockOutcome::AlreadyUnlocked);
        }

        conn.store(&sidecar, &descriptor.clear_lock())
            .await
            .map_err(|e| UnlockError::aborted(UnlockStep::StoreDescriptor, e))?;

        let renamed = toggle_marker(&media, &self.settings.marker, &self.settings.media_ext);
        let renamed_ok = conn.rename(&media, &renamed).await;
        drop(conn);

        if let Err(e) = renamed_ok {
            warn!("unlock: {} descriptor written, rename failed: {}", node.tree_path(), e);
            self.mark_unlocked(node, None);
            return Err(UnlockError::Partial {
                message: e.to_string(),
            });
        }

        info!("unlock: {} unlocked as {}", node.tree_path(), renamed);
        self.mark_unlocked(node, Some(renamed.clone()));
        Ok(UnlockOutcome::Unlocked {
            remote_name: renamed,
        })
    }

    fn mark_unlocked(&self, node: &NodeRef, remote_name: Option<String>) {
        node.with_file(|info| {
            info.locked = false;
            if let Some(name) = remote_name {
                info.remote_name = Some(name);
            }
        });
        self.tree.update_item(node);
    }

    /// Say goodbye to the server; the scanner is unusable afterwards
    pub async fn disconnect(&self) -> Result<(), String> {
        let result = self.conn.lock().await.quit().await;
        self.state.set(ScanState::Idle);
        result.map_err(|e: FtpError| format!("Failed to close FTP session: {}", e))
    }
}

/// `name` without `ext` (case-insensitive), or None when it is not media
fn media_stem<'a>(name: &'a str, ext: &str) -> Option<&'a str> {
    let split = name.len().checked_sub(ext.len())?;
    if split == 0 || !name.is_char_boundary(split) {
        return None;
    }
    let (stem, tail) = name.split_at(split);
    tail.eq_ignore_ascii_case(ext).then_some(stem)
}

/// Add `marker` after the stem, or take it off when already there
pub(crate) fn toggle_marker(name: &str, marker: &str, ext: &str) -> String {
    let (stem, tail) = match media_stem(name, ext) {
        Some(stem) => name.split_at(stem.len()),
        None => (name, ""),
    };
    match stem.strip_suffix(marker) {
        Some(base) if !marker.is_empty() && !base.is_empty() => format!("{}{}", base, tail),
        _ => format!("{}{}{}", stem, marker, tail),
    }
}
