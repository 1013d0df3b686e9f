//! Implementación en memoria de `GraphStore` para los tests.
//!
//! Reproduce la semántica del adaptador Neo4j (MERGE idempotente, borrado en
//! cascada por `CONTAINS`, limpieza de hashtags huérfanos) y permite simular
//! que la base de datos deja de estar disponible.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::identity::NodeId;
use crate::models::{
    CascadeCount, DirectoryNode, DriveNode, FileNode, FileRecord, GraphStats, NodeKind, NodeRef,
    TaggedFile,
};
use crate::store::{GraphStore, StoreResult};

#[derive(Default)]
struct Graph {
    drives: HashMap<NodeId, DriveNode>,
    directories: HashMap<NodeId, DirectoryNode>,
    files: HashMap<NodeId, FileNode>,
    hashtags: BTreeSet<String>,
    contains: HashSet<(NodeRef, NodeRef)>,
    has_tag: BTreeSet<(NodeId, String)>,
}

impl Graph {
    fn exists(&self, node: &NodeRef) -> bool {
        match node.kind {
            NodeKind::Drive => self.drives.contains_key(&node.id),
            NodeKind::Directory => self.directories.contains_key(&node.id),
            NodeKind::File => self.files.contains_key(&node.id),
        }
    }

    fn detach(&mut self, node: &NodeRef) {
        self.contains.retain(|(p, c)| p != node && c != node);
        if node.kind == NodeKind::File {
            self.has_tag.retain(|(f, _)| f != &node.id);
        }
    }
}

pub struct InMemoryStore {
    graph: RwLock<Graph>,
    unavailable: AtomicBool,
    failures: Mutex<HashMap<&'static str, StoreError>>,
}

#[allow(dead_code)]
impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(Graph::default()),
            unavailable: AtomicBool::new(false),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// A partir de ahora todas las operaciones fallan con `StoreError::Unavailable`.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// La operación `op` (nombre del método del puerto) falla con `err`
    /// hasta que se llame a `clear_failures`.
    pub fn fail_op(&self, op: &'static str, err: StoreError) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op, err);
    }

    pub fn clear_failures(&self) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn check_op(&self, op: &'static str) -> StoreResult<()> {
        self.check()?;
        match self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(op)
        {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("conexión rechazada".to_string()));
        }
        Ok(())
    }

    pub async fn directory(&self, id: &NodeId) -> Option<DirectoryNode> {
        self.graph.read().await.directories.get(id).cloned()
    }

    pub async fn file(&self, id: &NodeId) -> Option<FileNode> {
        self.graph.read().await.files.get(id).cloned()
    }

    pub async fn directory_ids(&self) -> Vec<NodeId> {
        self.graph.read().await.directories.keys().cloned().collect()
    }

    pub async fn file_ids(&self) -> Vec<NodeId> {
        self.graph.read().await.files.keys().cloned().collect()
    }

    pub async fn hashtags(&self) -> Vec<String> {
        self.graph.read().await.hashtags.iter().cloned().collect()
    }

    pub async fn has_contains(&self, parent: &NodeRef, child: &NodeRef) -> bool {
        self.graph
            .read()
            .await
            .contains
            .contains(&(parent.clone(), child.clone()))
    }

    /// Padres (por `CONTAINS`) de un nodo.
    pub async fn parents_of(&self, child: &NodeRef) -> Vec<NodeRef> {
        self.graph
            .read()
            .await
            .contains
            .iter()
            .filter(|(_, c)| c == child)
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Borra una relación para simular un grafo dañado.
    pub async fn drop_contains(&self, parent: &NodeRef, child: &NodeRef) {
        self.graph
            .write()
            .await
            .contains
            .remove(&(parent.clone(), child.clone()));
    }

    pub async fn node_count(&self) -> usize {
        let g = self.graph.read().await;
        g.drives.len() + g.directories.len() + g.files.len() + g.hashtags.len()
    }
}

#[async_trait]
impl GraphStore for InMemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.check_op("ping")
    }

    async fn upsert_drive(&self, drive: &DriveNode) -> StoreResult<()> {
        self.check_op("upsert_drive")?;
        self.graph
            .write()
            .await
            .drives
            .insert(drive.id.clone(), drive.clone());
        Ok(())
    }

    async fn upsert_directory(&self, dir: &DirectoryNode) -> StoreResult<()> {
        self.check_op("upsert_directory")?;
        self.graph
            .write()
            .await
            .directories
            .insert(dir.id.clone(), dir.clone());
        Ok(())
    }

    async fn upsert_file(&self, file: &FileNode) -> StoreResult<()> {
        self.check_op("upsert_file")?;
        self.graph
            .write()
            .await
            .files
            .insert(file.id.clone(), file.clone());
        Ok(())
    }

    async fn link_contains(&self, parent: &NodeRef, child: &NodeRef) -> StoreResult<()> {
        self.check_op("link_contains")?;
        let mut g = self.graph.write().await;
        if g.exists(parent) && g.exists(child) {
            g.contains.insert((parent.clone(), child.clone()));
        }
        Ok(())
    }

    async fn link_has_tag(&self, file_id: &NodeId, tag: &str) -> StoreResult<()> {
        self.check_op("link_has_tag")?;
        let mut g = self.graph.write().await;
        if g.files.contains_key(file_id) {
            g.hashtags.insert(tag.to_string());
            g.has_tag.insert((file_id.clone(), tag.to_string()));
        }
        Ok(())
    }

    async fn clear_file_tags(&self, file_id: &NodeId) -> StoreResult<()> {
        self.check_op("clear_file_tags")?;
        self.graph
            .write()
            .await
            .has_tag
            .retain(|(f, _)| f != file_id);
        Ok(())
    }

    async fn get_file(&self, file_id: &NodeId) -> StoreResult<Option<FileRecord>> {
        self.check_op("get_file")?;
        let g = self.graph.read().await;
        Ok(g.files.get(file_id).map(|file| FileRecord {
            file: file.clone(),
            hashtags: g
                .has_tag
                .iter()
                .filter(|(f, _)| f == file_id)
                .map(|(_, t)| t.clone())
                .collect(),
        }))
    }

    async fn touch_file(&self, file_id: &NodeId, last_checked: DateTime<Utc>) -> StoreResult<()> {
        self.check_op("touch_file")?;
        if let Some(file) = self.graph.write().await.files.get_mut(file_id) {
            file.last_checked = last_checked;
        }
        Ok(())
    }

    async fn find_stale_directories(&self, before: DateTime<Utc>) -> StoreResult<Vec<NodeId>> {
        self.check_op("find_stale_directories")?;
        Ok(self
            .graph
            .read()
            .await
            .directories
            .values()
            .filter(|d| d.last_checked < before)
            .map(|d| d.id.clone())
            .collect())
    }

    async fn find_stale_files(&self, before: DateTime<Utc>) -> StoreResult<Vec<NodeId>> {
        self.check_op("find_stale_files")?;
        Ok(self
            .graph
            .read()
            .await
            .files
            .values()
            .filter(|f| f.last_checked < before)
            .map(|f| f.id.clone())
            .collect())
    }

    async fn delete_directory(&self, dir_id: &NodeId) -> StoreResult<CascadeCount> {
        self.check_op("delete_directory")?;
        let mut g = self.graph.write().await;
        let root = NodeRef::directory(dir_id);
        if !g.exists(&root) {
            return Ok(CascadeCount::default());
        }

        let mut doomed = vec![root.clone()];
        let mut seen: HashSet<NodeRef> = HashSet::from([root]);
        let mut i = 0;
        while i < doomed.len() {
            let current = doomed[i].clone();
            for (p, c) in &g.contains {
                if *p == current && seen.insert(c.clone()) {
                    doomed.push(c.clone());
                }
            }
            i += 1;
        }

        let mut count = CascadeCount::default();
        for node in &doomed {
            match node.kind {
                NodeKind::Directory => {
                    if g.directories.remove(&node.id).is_some() {
                        count.directories += 1;
                    }
                }
                NodeKind::File => {
                    if g.files.remove(&node.id).is_some() {
                        count.files += 1;
                    }
                }
                NodeKind::Drive => {}
            }
            g.detach(node);
        }
        Ok(count)
    }

    async fn delete_file(&self, file_id: &NodeId) -> StoreResult<bool> {
        self.check_op("delete_file")?;
        let mut g = self.graph.write().await;
        let existed = g.files.remove(file_id).is_some();
        g.detach(&NodeRef::file(file_id));
        Ok(existed)
    }

    async fn prune_orphan_tags(&self) -> StoreResult<Vec<String>> {
        self.check_op("prune_orphan_tags")?;
        let mut g = self.graph.write().await;
        let referenced: HashSet<String> = g.has_tag.iter().map(|(_, t)| t.clone()).collect();
        let orphans: Vec<String> = g
            .hashtags
            .iter()
            .filter(|t| !referenced.contains(*t))
            .cloned()
            .collect();
        for tag in &orphans {
            g.hashtags.remove(tag);
        }
        Ok(orphans)
    }

    async fn repair_directory_links(&self) -> StoreResult<usize> {
        self.check_op("repair_directory_links")?;
        let mut g = self.graph.write().await;
        let wanted: Vec<(NodeRef, NodeRef)> = g
            .directories
            .values()
            .filter_map(|d| {
                let parent = d.parent_id.as_ref()?;
                g.directories
                    .contains_key(parent)
                    .then(|| (NodeRef::directory(parent), NodeRef::directory(&d.id)))
            })
            .collect();
        let mut created = 0;
        for edge in wanted {
            if g.contains.insert(edge) {
                created += 1;
            }
        }
        Ok(created)
    }

    async fn find_unlinked_directories(&self) -> StoreResult<Vec<NodeId>> {
        self.check_op("find_unlinked_directories")?;
        let g = self.graph.read().await;
        Ok(g.directories
            .values()
            .filter(|d| d.parent_id.is_some())
            .filter(|d| {
                let me = NodeRef::directory(&d.id);
                !g.contains.iter().any(|(_, c)| *c == me)
            })
            .map(|d| d.id.clone())
            .collect())
    }

    async fn count_nodes(&self) -> StoreResult<GraphStats> {
        self.check_op("count_nodes")?;
        let g = self.graph.read().await;
        Ok(GraphStats {
            drives: g.drives.len() as i64,
            directories: g.directories.len() as i64,
            files: g.files.len() as i64,
            hashtags: g.hashtags.len() as i64,
        })
    }

    async fn wipe(&self) -> StoreResult<()> {
        self.check_op("wipe")?;
        *self.graph.write().await = Graph::default();
        Ok(())
    }

    async fn list_hashtags(&self) -> StoreResult<Vec<String>> {
        self.check_op("list_hashtags")?;
        Ok(self.graph.read().await.hashtags.iter().cloned().collect())
    }

    async fn find_tagged_files(&self, tags: &[String], limit: usize) -> StoreResult<Vec<TaggedFile>> {
        self.check_op("find_tagged_files")?;
        let g = self.graph.read().await;
        let matching: BTreeSet<&NodeId> = g
            .has_tag
            .iter()
            .filter(|(_, t)| tags.contains(t))
            .map(|(f, _)| f)
            .collect();
        Ok(matching
            .into_iter()
            .take(limit)
            .filter_map(|id| g.files.get(id))
            .map(|file| TaggedFile {
                id: file.id.clone(),
                name: file.name.clone(),
                summary: file.summary.clone(),
                hashtags: g
                    .has_tag
                    .iter()
                    .filter(|(f, _)| *f == file.id)
                    .map(|(_, t)| t.clone())
                    .collect(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tokio_test::{assert_err, assert_ok};

    fn dir(path: &str, parent: Option<&str>, ts: DateTime<Utc>) -> DirectoryNode {
        DirectoryNode {
            id: NodeId::for_path(Path::new(path)),
            parent_id: parent.map(|p| NodeId::for_path(Path::new(p))),
            name: path.rsplit('/').next().unwrap_or_default().to_string(),
            last_checked: ts,
        }
    }

    #[tokio::test]
    async fn repair_recreates_missing_parent_links() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let root = dir("/r", None, now);
        let child = dir("/r/a", Some("/r"), now);
        assert_ok!(store.upsert_directory(&root).await);
        assert_ok!(store.upsert_directory(&child).await);

        let unlinked = assert_ok!(store.find_unlinked_directories().await);
        assert_eq!(unlinked, vec![child.id.clone()]);

        assert_eq!(assert_ok!(store.repair_directory_links().await), 1);
        assert_eq!(assert_ok!(store.repair_directory_links().await), 0);
        assert!(assert_ok!(store.find_unlinked_directories().await).is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_rejects_every_operation() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        let err = assert_err!(store.ping().await);
        assert!(err.is_unavailable());
        assert_err!(store.count_nodes().await);
        assert_err!(store.wipe().await);
    }

    #[tokio::test]
    async fn injected_failure_hits_only_its_operation() {
        let store = InMemoryStore::new();
        store.fail_op("link_has_tag", StoreError::Query("restricción".to_string()));

        let root = dir("/r", None, Utc::now());
        assert_ok!(store.upsert_directory(&root).await);
        let err = assert_err!(store.link_has_tag(&root.id, "x").await);
        assert!(!err.is_unavailable());

        store.clear_failures();
        assert_ok!(store.link_has_tag(&root.id, "x").await);
    }
}
