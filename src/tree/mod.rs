//! Shared model of the recorder's folders and recordings
//!
//! Both scanners insert into and enrich the same tree. Inserts are
//! idempotent per (parent, name), so whichever scanner reaches a node first
//! creates it and the other one enriches it. Each folder guards its own
//! child list, so work on unrelated folders never contends.

mod node;

pub use node::{FileInfo, ItemKey, NodeKind, NodeRef, RemoteNode};

use log::debug;
pub(crate) use node::join_path;
use node::{display_order, lock};

use crate::events::{EventBus, TreeEvent};

pub struct RemoteTree {
    root: NodeRef,
    bus: EventBus,
}

impl RemoteTree {
    pub fn new(bus: EventBus) -> Self {
        Self {
            root: RemoteNode::new_root(),
            bus,
        }
    }

    pub fn root(&self) -> NodeRef {
        self.root.clone()
    }

    fn dispatch(&self, events: Vec<TreeEvent>) {
        for event in events {
            self.bus.emit(event);
        }
    }

    /// Find or create the child `name` under `parent`. Returns the node and
    /// the events describing the insert (none when it already existed).
    fn insert_child(
        parent: &NodeRef,
        name: &str,
        folder: bool,
    ) -> Result<(NodeRef, Vec<TreeEvent>), String> {
        let children = match parent.kind() {
            NodeKind::Folder(children) => children,
            NodeKind::File(_) => {
                return Err(format!("{} is a file, not a folder", parent.tree_path()))
            }
        };
        if name.is_empty() || name.contains('/') {
            return Err(format!("Invalid name {:?} under {}", name, parent.tree_path()));
        }

        let mut children = lock(children);
        if let Some(existing) = children.iter().find(|c| c.name() == name) {
            return if existing.is_folder() == folder {
                Ok((existing.clone(), Vec::new()))
            } else {
                Err(format!(
                    "{} already exists as a {}",
                    existing.tree_path(),
                    if existing.is_folder() { "folder" } else { "file" }
                ))
            };
        }

        let node = RemoteNode::new_child(parent, name, folder);
        let at = children
            .binary_search_by(|c| display_order(c, &node))
            .unwrap_or_else(|pos| pos);
        children.insert(at, node.clone());

        let events = vec![
            TreeEvent::ItemInserted {
                parent: parent.tree_path().to_string(),
                tree_path: node.tree_path().to_string(),
            },
            TreeEvent::StructureChanged {
                tree_path: parent.tree_path().to_string(),
            },
        ];
        Ok((node, events))
    }

    pub fn add_folder(&self, parent: &NodeRef, name: &str) -> Result<NodeRef, String> {
        let (node, events) = Self::insert_child(parent, name, true)?;
        self.dispatch(events);
        Ok(node)
    }

    pub fn add_file(&self, parent: &NodeRef, name: &str) -> Result<NodeRef, String> {
        let (node, events) = Self::insert_child(parent, name, false)?;
        self.dispatch(events);
        Ok(node)
    }

    /// Announce a change to `item`, then to each ancestor up to the root
    pub fn update_item(&self, item: &NodeRef) {
        let mut events = Vec::new();
        let mut current = Some(item.clone());
        while let Some(node) = current {
            events.push(TreeEvent::ItemChanged {
                tree_path: node.tree_path().to_string(),
            });
            current = node.parent();
        }
        self.dispatch(events);
    }

    /// Look a node up by its tree path, e.g. `/Drama/Silent Witness`
    pub fn find(&self, tree_path: &str) -> Option<NodeRef> {
        let mut node = self.root.clone();
        for segment in tree_path.split('/').filter(|s| !s.is_empty()) {
            node = node.child(segment)?;
        }
        Some(node)
    }

    /// Get or create every folder along `tree_path`
    pub fn ensure_folder(&self, tree_path: &str) -> Result<NodeRef, String> {
        let mut node = self.root.clone();
        for segment in tree_path.split('/').filter(|s| !s.is_empty()) {
            node = self.add_folder(&node, segment)?;
        }
        Ok(node)
    }

    /// Remove everything below the root
    pub fn clear(&self) {
        fn empty(node: &NodeRef) {
            if let NodeKind::Folder(children) = node.kind() {
                let drained: Vec<NodeRef> = lock(children).drain(..).collect();
                for child in &drained {
                    empty(child);
                }
            }
        }
        empty(&self.root);
        debug!("tree: cleared");
        self.dispatch(vec![TreeEvent::StructureChanged {
            tree_path: self.root.tree_path().to_string(),
        }]);
    }

    /// Every file in display order, depth first
    pub fn files(&self) -> Vec<NodeRef> {
        fn collect(node: &NodeRef, out: &mut Vec<NodeRef>) {
            for child in node.children() {
                if child.is_folder() {
                    collect(&child, out);
                } else {
                    out.push(child);
                }
            }
        }
        let mut out = Vec::new();
        collect(&self.root, &mut out);
        out
    }

    /// (folders, files) below the root
    pub fn counts(&self) -> (usize, usize) {
        fn count(node: &NodeRef, totals: &mut (usize, usize)) {
            for child in node.children() {
                if child.is_folder() {
                    totals.0 += 1;
                    count(&child, totals);
                } else {
                    totals.1 += 1;
                }
            }
        }
        let mut totals = (0, 0);
        count(&self.root, &mut totals);
        totals
    }
}
