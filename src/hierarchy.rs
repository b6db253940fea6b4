use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::model::{FileEntry, HierarchyNode, NodeKind};
use crate::remote::Remote;

/// Deterministic local path for a remote file:
/// `<root>/<ancestor ids in order>/<parent id>/<file id>/<file name>`.
///
/// Pure function of its arguments; no I/O. Files may hang off any hierarchy
/// level, so the ancestor chain is variable-length and absent levels are
/// simply not present in it.
pub fn cache_path(
    root: &Path,
    ancestor_ids: &[String],
    parent_id: &str,
    file_id: &str,
    file_name: &str,
) -> PathBuf {
    let mut path = root.to_path_buf();
    for ancestor in ancestor_ids {
        path.push(ancestor);
    }
    path.push(parent_id);
    path.push(file_id);
    path.push(file_name);
    path
}

impl FileEntry {
    pub fn cache_path(&self, root: &Path) -> PathBuf {
        cache_path(root, &self.ancestor_ids, &self.parent_id, &self.id, &self.name)
    }
}

/// Local expansion state over the remote hierarchy.
///
/// Population is explicit and idempotent: `ensure_expanded` lists a node's
/// children through the remote collaborator exactly once, guarded by a
/// populated flag, and is callable from any interface layer.
#[derive(Default)]
pub struct BrowseTree {
    entries: BTreeMap<String, TreeEntry>,
    roots: Vec<String>,
    roots_populated: bool,
}

pub struct TreeEntry {
    pub node: HierarchyNode,
    pub children: Vec<String>,
    pub files: Vec<FileEntry>,
    pub populated: bool,
}

impl BrowseTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, id: &str) -> Option<&TreeEntry> {
        self.entries.get(id)
    }

    /// Top-level groups, fetched once.
    pub fn ensure_roots(&mut self, remote: &dyn Remote) -> Result<&[String]> {
        if !self.roots_populated {
            let groups = remote.list_children(None)?;
            for node in groups {
                self.roots.push(node.id.clone());
                self.insert(node);
            }
            self.roots_populated = true;
        }
        Ok(&self.roots)
    }

    /// Populate `id`'s children if not already populated, and return the
    /// entry. Container children are recorded as tree entries; file children
    /// are materialized as [`FileEntry`] values carrying their full ancestor
    /// chain.
    pub fn ensure_expanded(&mut self, remote: &dyn Remote, id: &str) -> Result<&TreeEntry> {
        if !self.entries.contains_key(id) {
            let node = remote.get_node(id)?;
            self.insert(node);
        }
        let populated = self
            .entries
            .get(id)
            .map(|e| e.populated)
            .unwrap_or(false);

        if !populated {
            let ancestors = self.ancestor_chain(remote, id)?;
            let children = remote.list_children(Some(id))?;
            let mut child_ids = Vec::new();
            let mut files = Vec::new();
            for child in children {
                if child.kind == NodeKind::File {
                    files.push(FileEntry {
                        id: child.id,
                        name: child.label,
                        parent_id: id.to_string(),
                        ancestor_ids: ancestors.clone(),
                    });
                } else {
                    child_ids.push(child.id.clone());
                    self.insert(child);
                }
            }
            let entry = self
                .entries
                .get_mut(id)
                .expect("entry inserted above");
            entry.children = child_ids;
            entry.files = files;
            entry.populated = true;
        }

        Ok(self.entries.get(id).expect("entry inserted above"))
    }

    /// Look up a file child of an expanded node.
    pub fn file(&self, parent_id: &str, file_id: &str) -> Result<&FileEntry> {
        self.entries
            .get(parent_id)
            .and_then(|e| e.files.iter().find(|f| f.id == file_id))
            .ok_or_else(|| Error::NotFound(format!("file {file_id} under {parent_id}")))
    }

    fn insert(&mut self, node: HierarchyNode) {
        self.entries.entry(node.id.clone()).or_insert(TreeEntry {
            node,
            children: Vec::new(),
            files: Vec::new(),
            populated: false,
        });
    }

    /// Ancestor ids of `id` in top-down order, excluding `id` itself. Walks
    /// parent links through already-known entries and asks the remote for
    /// any level the browse path skipped, so the chain is complete no matter
    /// how the node was reached.
    fn ancestor_chain(&self, remote: &dyn Remote, id: &str) -> Result<Vec<String>> {
        let parent_of = |node_id: &str| -> Result<Option<String>> {
            match self.entries.get(node_id) {
                Some(e) => Ok(e.node.parent_id.clone()),
                None => Ok(remote.get_node(node_id)?.parent_id),
            }
        };

        let mut chain = Vec::new();
        let mut cursor = parent_of(id)?;
        while let Some(parent_id) = cursor {
            cursor = parent_of(&parent_id)?;
            chain.push(parent_id);
        }
        chain.reverse();
        Ok(chain)
    }
}

/// Resolve a [`FileEntry`] for a bare file id by walking parent links
/// through the remote service. Used when an interface layer addresses a
/// file directly rather than through an expanded tree.
pub fn resolve_file(remote: &dyn Remote, file_id: &str) -> Result<FileEntry> {
    let node = remote.get_node(file_id)?;
    if node.kind != NodeKind::File {
        return Err(Error::NotFound(format!("file {file_id}")));
    }
    let parent_id = node
        .parent_id
        .clone()
        .ok_or_else(|| Error::NotFound(format!("parent of file {file_id}")))?;

    let mut chain = Vec::new();
    let mut cursor = remote.get_node(&parent_id)?.parent_id;
    while let Some(ancestor_id) = cursor {
        cursor = remote.get_node(&ancestor_id)?.parent_id;
        chain.push(ancestor_id);
    }
    chain.reverse();

    Ok(FileEntry {
        id: node.id,
        name: node.label,
        parent_id,
        ancestor_ids: chain,
    })
}
