//! Tree nodes: a folder/file sum type with shared identity fields

use serde::Serialize;
use std::cmp::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::hmt::{Descriptor, Genre, RecordingState};

pub type NodeRef = Arc<RemoteNode>;

/// Identity of a node: the folder it lives in plus its own name.
/// Fixed at creation and used for deduplication across scanners.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ItemKey {
    pub remote_path: String,
    pub remote_filename: String,
}

/// Everything either scanner learns about a recording
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileInfo {
    pub size: u64,
    pub downloaded: u64,
    /// HTTP transfer URL, known once discovery has seen the file
    pub url: Option<String>,
    /// Current media filename on the device, extension included
    pub remote_name: Option<String>,
    /// Descriptor filename on the device, when the FTP walk found one
    pub sidecar_name: Option<String>,
    pub title: String,
    pub description: String,
    pub guidance: String,
    pub channel: String,
    pub start: u32,
    pub end: u32,
    /// Seconds; informational only
    pub duration: u32,
    pub hd: bool,
    pub locked: bool,
    pub genre: Genre,
    pub state: Option<RecordingState>,
    pub seen_via_discovery: bool,
    pub seen_via_transfer: bool,
}

impl FileInfo {
    /// Copy every decoded descriptor field onto this file
    pub fn apply_descriptor(&mut self, descriptor: &Descriptor) {
        self.title = if descriptor.program_title.is_empty() {
            descriptor.recording_title.clone()
        } else {
            descriptor.program_title.clone()
        };
        self.description = descriptor.synopsis.clone();
        self.guidance = descriptor.guidance.clone();
        self.channel = descriptor.channel_name.clone();
        self.start = descriptor.start;
        self.end = descriptor.end;
        self.duration = descriptor.actual_duration();
        self.hd = descriptor.hd;
        self.locked = descriptor.locked;
        self.genre = descriptor.genre;
        self.state = Some(descriptor.state);
    }
}

#[derive(Debug)]
pub enum NodeKind {
    Folder(Mutex<Vec<NodeRef>>),
    File(Mutex<FileInfo>),
}

#[derive(Debug)]
pub struct RemoteNode {
    key: ItemKey,
    tree_path: String,
    /// Traversal only; ownership runs from the root down
    parent: Weak<RemoteNode>,
    kind: NodeKind,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn join_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}

impl RemoteNode {
    pub(crate) fn new_root() -> NodeRef {
        Arc::new(RemoteNode {
            key: ItemKey {
                remote_path: String::new(),
                remote_filename: String::new(),
            },
            tree_path: "/".to_string(),
            parent: Weak::new(),
            kind: NodeKind::Folder(Mutex::new(Vec::new())),
        })
    }

    pub(crate) fn new_child(parent: &NodeRef, name: &str, folder: bool) -> NodeRef {
        let kind = if folder {
            NodeKind::Folder(Mutex::new(Vec::new()))
        } else {
            NodeKind::File(Mutex::new(FileInfo::default()))
        };
        Arc::new(RemoteNode {
            key: ItemKey {
                remote_path: parent.tree_path.clone(),
                remote_filename: name.to_string(),
            },
            tree_path: join_path(&parent.tree_path, name),
            parent: Arc::downgrade(parent),
            kind,
        })
    }

    pub fn key(&self) -> &ItemKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.key.remote_filename
    }

    pub fn tree_path(&self) -> &str {
        &self.tree_path
    }

    pub fn parent(&self) -> Option<NodeRef> {
        self.parent.upgrade()
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, NodeKind::Folder(_))
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File(_))
    }

    /// Snapshot of the children, empty for files
    pub fn children(&self) -> Vec<NodeRef> {
        match &self.kind {
            NodeKind::Folder(children) => lock(children).clone(),
            NodeKind::File(_) => Vec::new(),
        }
    }

    pub fn child(&self, name: &str) -> Option<NodeRef> {
        match &self.kind {
            NodeKind::Folder(children) => lock(children).iter().find(|c| c.name() == name).cloned(),
            NodeKind::File(_) => None,
        }
    }

    /// File size, or the recursive sum of child sizes for a folder
    pub fn size(&self) -> u64 {
        match &self.kind {
            NodeKind::File(info) => lock(info).size,
            NodeKind::Folder(_) => self.children().iter().map(|c| c.size()).sum(),
        }
    }

    pub fn file_info(&self) -> Option<FileInfo> {
        match &self.kind {
            NodeKind::File(info) => Some(lock(info).clone()),
            NodeKind::Folder(_) => None,
        }
    }

    /// Mutate a file's fields in place. Callers must follow up with
    /// `RemoteTree::update_item` so observers hear about it.
    pub fn with_file<R>(&self, f: impl FnOnce(&mut FileInfo) -> R) -> Option<R> {
        match &self.kind {
            NodeKind::File(info) => Some(f(&mut lock(info))),
            NodeKind::Folder(_) => None,
        }
    }
}

/// Folders before files, then by name
pub(crate) fn display_order(a: &RemoteNode, b: &RemoteNode) -> Ordering {
    b.is_folder()
        .cmp(&a.is_folder())
        .then_with(|| a.name().cmp(b.name()))
}

impl PartialEq for RemoteNode {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for RemoteNode {}

impl std::hash::Hash for RemoteNode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}
