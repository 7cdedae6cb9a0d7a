//! Tree recordings as download queue sources

use queue_dl::{DownloadManager, DownloadSource};
use std::sync::Arc;

use crate::tree::{NodeRef, RemoteTree};

pub type RecordingQueue = DownloadManager<RecordingSource>;

/// A File node of the remote tree, queued for download
#[derive(Clone)]
pub struct RecordingSource {
    node: NodeRef,
    tree: Arc<RemoteTree>,
    media_ext: String,
}

impl RecordingSource {
    /// None when `node` is a folder
    pub fn new(node: NodeRef, tree: Arc<RemoteTree>, media_ext: &str) -> Option<Self> {
        node.is_file().then(|| Self {
            node,
            tree,
            media_ext: media_ext.to_string(),
        })
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }
}

fn percent(done: u64, size: u64) -> u64 {
    if size == 0 {
        0
    } else {
        done.min(size) * 100 / size
    }
}

impl DownloadSource for RecordingSource {
    fn id(&self) -> String {
        self.node.tree_path().to_string()
    }

    fn file_name(&self) -> String {
        self.node
            .file_info()
            .and_then(|info| info.remote_name)
            .unwrap_or_else(|| format!("{}{}", self.node.name(), self.media_ext))
    }

    fn url(&self) -> Option<String> {
        self.node.file_info().and_then(|info| info.url)
    }

    fn size_hint(&self) -> u64 {
        self.node.size()
    }

    /// Mirror progress onto the node, announcing it once per whole percent
    fn record_progress(&self, downloaded: u64) {
        let changed = self.node.with_file(|info| {
            let before = percent(info.downloaded, info.size);
            info.downloaded = downloaded;
            before != percent(downloaded, info.size)
        });
        if changed == Some(true) {
            self.tree.update_item(&self.node);
        }
    }
}
