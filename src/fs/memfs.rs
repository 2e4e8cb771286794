//! Simple in-memory filesystem.
//!
//! All nodes live in one arena behind a mutex; a [`MemFs`] node handle is
//! just an index into it. A handle whose entry has been deleted fails every
//! operation with `NotFound`.
//!
//! Supports dead properties, batched lookups, and in-place moves. When
//! created with [`MemFs::with_acl`] every node carries an access control
//! list, inherited from its parent at creation time.
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use futures_util::FutureExt;
use http::StatusCode;
use parking_lot::Mutex;

use crate::acl::Ace;
use crate::davpath::{normalize, split};
use crate::fs::*;

type NodeId = u64;

const ROOT_ID: NodeId = 0;

#[derive(Debug)]
enum Content {
    File(Bytes),
    Dir(BTreeMap<String, NodeId>),
}

#[derive(Debug)]
struct Entry {
    parent: NodeId,
    name: String,
    content: Content,
    created: SystemTime,
    modified: SystemTime,
    version: u64,
    props: BTreeMap<String, DavProp>,
    acl: Vec<Ace>,
    owner: Option<String>,
}

impl Entry {
    fn new(parent: NodeId, name: &str, content: Content) -> Entry {
        let now = SystemTime::now();
        Entry {
            parent,
            name: name.to_string(),
            content,
            created: now,
            modified: now,
            version: 0,
            props: BTreeMap::new(),
            acl: Vec::new(),
            owner: None,
        }
    }

    fn touch(&mut self) {
        self.modified = SystemTime::now();
        self.version += 1;
    }
}

#[derive(Debug)]
struct Arena {
    entries: HashMap<NodeId, Entry>,
    next_id: NodeId,
    acl_aware: bool,
}

impl Arena {
    fn get(&self, id: NodeId) -> FsResult<&Entry> {
        self.entries.get(&id).ok_or(FsError::NotFound)
    }

    fn get_mut(&mut self, id: NodeId) -> FsResult<&mut Entry> {
        self.entries.get_mut(&id).ok_or(FsError::NotFound)
    }

    fn children(&self, id: NodeId) -> FsResult<&BTreeMap<String, NodeId>> {
        match &self.get(id)?.content {
            Content::Dir(children) => Ok(children),
            Content::File(_) => Err(FsError::Conflict),
        }
    }

    fn children_mut(&mut self, id: NodeId) -> FsResult<&mut BTreeMap<String, NodeId>> {
        match &mut self.get_mut(id)?.content {
            Content::Dir(children) => Ok(children),
            Content::File(_) => Err(FsError::Conflict),
        }
    }

    fn child(&self, id: NodeId, name: &str) -> FsResult<NodeId> {
        self.children(id)?.get(name).copied().ok_or(FsError::NotFound)
    }

    fn resolve(&self, path: &str) -> FsResult<NodeId> {
        let path = normalize(path);
        if path.is_empty() {
            return Ok(ROOT_ID);
        }
        path.split('/').try_fold(ROOT_ID, |id, name| match self.child(id, name) {
            Err(FsError::Conflict) => Err(FsError::NotFound),
            r => r,
        })
    }

    fn is_dir(&self, id: NodeId) -> bool {
        matches!(self.entries.get(&id), Some(Entry { content: Content::Dir(_), .. }))
    }

    /// Is `id` equal to, or below, `ancestor`.
    fn is_within(&self, mut id: NodeId, ancestor: NodeId) -> bool {
        loop {
            if id == ancestor {
                return true;
            }
            match self.entries.get(&id) {
                Some(e) if id != ROOT_ID => id = e.parent,
                _ => return false,
            }
        }
    }

    fn insert(&mut self, parent: NodeId, name: &str, content: Content) -> FsResult<NodeId> {
        if self.children(parent)?.contains_key(name) {
            return Err(FsError::Exists);
        }
        let mut entry = Entry::new(parent, name, content);
        let p = self.get_mut(parent)?;
        entry.acl = p.acl.clone();
        entry.owner = p.owner.clone();
        p.touch();

        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, entry);
        self.children_mut(parent)?.insert(name.to_string(), id);
        Ok(id)
    }

    fn remove(&mut self, id: NodeId) -> FsResult<()> {
        if id == ROOT_ID {
            return Err(FsError::Forbidden);
        }
        let entry = self.entries.remove(&id).ok_or(FsError::NotFound)?;
        if let Ok(children) = self.children_mut(entry.parent) {
            children.remove(&entry.name);
        }
        if let Ok(p) = self.get_mut(entry.parent) {
            p.touch();
        }
        let mut todo = match entry.content {
            Content::Dir(children) => children.into_values().collect(),
            Content::File(_) => Vec::new(),
        };
        while let Some(id) = todo.pop() {
            if let Some(Entry { content: Content::Dir(children), .. }) = self.entries.remove(&id) {
                todo.extend(children.into_values());
            }
        }
        Ok(())
    }

    /// Detach `id` and attach it again below `parent` as `name`.
    fn relink(&mut self, id: NodeId, parent: NodeId, name: &str) -> FsResult<()> {
        if self.is_within(parent, id) {
            return Err(FsError::Forbidden);
        }
        if self.children(parent)?.contains_key(name) {
            return Err(FsError::Exists);
        }
        let (old_parent, old_name) = {
            let e = self.get(id)?;
            (e.parent, e.name.clone())
        };
        self.children_mut(old_parent)?.remove(&old_name);
        self.get_mut(old_parent)?.touch();
        self.children_mut(parent)?.insert(name.to_string(), id);
        self.get_mut(parent)?.touch();
        let e = self.get_mut(id)?;
        e.parent = parent;
        e.name = name.to_string();
        Ok(())
    }
}

/// Ephemeral in-memory filesystem.
#[derive(Clone)]
pub struct MemFs {
    arena: Arc<Mutex<Arena>>,
}

impl fmt::Debug for MemFs {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let arena = self.arena.lock();
        f.debug_struct("MemFs")
            .field("entries", &arena.entries.len())
            .field("acl_aware", &arena.acl_aware)
            .finish()
    }
}

impl MemFs {
    /// Create a new, empty, filesystem.
    pub fn new() -> Arc<MemFs> {
        MemFs::build(false, Vec::new())
    }

    /// Create a filesystem where every node has an ACL. The root gets
    /// `root_acl`, new nodes copy the ACL of their parent.
    pub fn with_acl(root_acl: Vec<Ace>) -> Arc<MemFs> {
        MemFs::build(true, root_acl)
    }

    fn build(acl_aware: bool, root_acl: Vec<Ace>) -> Arc<MemFs> {
        let mut root = Entry::new(ROOT_ID, "", Content::Dir(BTreeMap::new()));
        root.acl = root_acl;
        let mut entries = HashMap::new();
        entries.insert(ROOT_ID, root);
        Arc::new(MemFs {
            arena: Arc::new(Mutex::new(Arena {
                entries,
                next_id: ROOT_ID + 1,
                acl_aware,
            })),
        })
    }

    fn node(&self, id: NodeId) -> MemNode {
        let is_dir = self.arena.lock().is_dir(id);
        MemNode {
            arena: self.arena.clone(),
            id,
            is_dir,
        }
    }

    /// Create a file at `path`. The parent must exist.
    pub async fn create_file(&self, path: &str, data: Vec<u8>) -> FsResult<()> {
        let mut arena = self.arena.lock();
        let (parent, name) = split(normalize(path));
        let parent = arena.resolve(parent).map_err(|_| FsError::Conflict)?;
        arena.insert(parent, name, Content::File(Bytes::from(data)))?;
        Ok(())
    }

    /// Create a collection at `path`. The parent must exist.
    pub async fn create_dir(&self, path: &str) -> FsResult<()> {
        let mut arena = self.arena.lock();
        let (parent, name) = split(normalize(path));
        let parent = arena.resolve(parent).map_err(|_| FsError::Conflict)?;
        arena.insert(parent, name, Content::Dir(BTreeMap::new()))?;
        Ok(())
    }

    /// Replace the ACL of the node at `path`.
    pub fn set_acl(&self, path: &str, acl: Vec<Ace>) -> FsResult<()> {
        let mut arena = self.arena.lock();
        let id = arena.resolve(path)?;
        arena.get_mut(id)?.acl = acl;
        Ok(())
    }

    /// Set the owner principal of the node at `path`. New nodes below it
    /// inherit the owner.
    pub fn set_owner(&self, path: &str, owner: Option<&str>) -> FsResult<()> {
        let mut arena = self.arena.lock();
        let id = arena.resolve(path)?;
        arena.get_mut(id)?.owner = owner.map(|s| s.to_string());
        Ok(())
    }
}

impl DavFileSystem for MemFs {
    fn root(&self) -> FsFuture<'_, DavNodeRef> {
        let node: DavNodeRef = Arc::new(self.node(ROOT_ID));
        async move { Ok(node) }.boxed()
    }
}

/// Handle to one entry of a [`MemFs`].
struct MemNode {
    arena: Arc<Mutex<Arena>>,
    id: NodeId,
    is_dir: bool,
}

impl fmt::Debug for MemNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MemNode")
            .field("id", &self.id)
            .field("is_dir", &self.is_dir)
            .finish()
    }
}

impl MemNode {
    fn handle(&self, id: NodeId, is_dir: bool) -> DavNodeRef {
        Arc::new(MemNode {
            arena: self.arena.clone(),
            id,
            is_dir,
        })
    }

    fn with_entry<T>(&self, f: impl FnOnce(&Entry) -> T) -> FsResult<T> {
        let arena = self.arena.lock();
        arena.get(self.id).map(f)
    }
}

impl DavNode for MemNode {
    fn name(&self) -> String {
        self.with_entry(|e| e.name.clone()).unwrap_or_default()
    }

    fn variant(&self) -> NodeVariant<'_> {
        if self.is_dir {
            NodeVariant::Collection(self)
        } else {
            NodeVariant::File(self)
        }
    }

    fn last_modified(&self) -> Option<SystemTime> {
        self.with_entry(|e| e.modified).ok()
    }

    fn created(&self) -> Option<SystemTime> {
        self.with_entry(|e| e.created).ok()
    }

    fn etag(&self) -> Option<String> {
        self.with_entry(|e| format!("{:x}-{:x}", self.id, e.version)).ok()
    }

    fn delete(&self) -> FsFuture<'_, ()> {
        async move { self.arena.lock().remove(self.id) }.boxed()
    }

    fn set_name<'a>(&'a self, name: &'a str) -> FsFuture<'a, ()> {
        async move {
            let mut arena = self.arena.lock();
            let parent = arena.get(self.id)?.parent;
            if self.id == ROOT_ID {
                return Err(FsError::Forbidden);
            }
            arena.relink(self.id, parent, name)
        }
        .boxed()
    }

    fn properties(&self) -> Option<&dyn DavProperties> {
        Some(self)
    }

    fn access_control(&self) -> Option<&dyn DavAccessControl> {
        if self.arena.lock().acl_aware {
            Some(self)
        } else {
            None
        }
    }
}

impl DavFileNode for MemNode {
    fn get(&self) -> FsFuture<'_, FileContent> {
        async move {
            let arena = self.arena.lock();
            match &arena.get(self.id)?.content {
                Content::File(data) => Ok(FileContent::Bytes(data.clone())),
                Content::Dir(_) => Err(FsError::Forbidden),
            }
        }
        .boxed()
    }

    fn put(&self, data: ByteStream) -> FsFuture<'_, ()> {
        async move {
            let data = FileContent::Stream(data).into_bytes().await?;
            let mut arena = self.arena.lock();
            let entry = arena.get_mut(self.id)?;
            match &mut entry.content {
                Content::File(content) => *content = data,
                Content::Dir(_) => return Err(FsError::Forbidden),
            }
            entry.touch();
            Ok(())
        }
        .boxed()
    }

    fn size(&self) -> u64 {
        self.with_entry(|e| match &e.content {
            Content::File(data) => data.len() as u64,
            Content::Dir(_) => 0,
        })
        .unwrap_or(0)
    }
}

impl DavCollection for MemNode {
    fn get_child<'a>(&'a self, name: &'a str) -> FsFuture<'a, DavNodeRef> {
        async move {
            let arena = self.arena.lock();
            let id = arena.child(self.id, name)?;
            Ok(self.handle(id, arena.is_dir(id)))
        }
        .boxed()
    }

    fn get_children(&self) -> FsFuture<'_, Vec<DavNodeRef>> {
        async move {
            let arena = self.arena.lock();
            Ok(arena
                .children(self.id)?
                .values()
                .map(|&id| self.handle(id, arena.is_dir(id)))
                .collect())
        }
        .boxed()
    }

    fn create_file<'a>(&'a self, name: &'a str, data: ByteStream) -> FsFuture<'a, ()> {
        async move {
            let data = FileContent::Stream(data).into_bytes().await?;
            self.arena.lock().insert(self.id, name, Content::File(data))?;
            Ok(())
        }
        .boxed()
    }

    fn create_directory<'a>(&'a self, name: &'a str) -> FsFuture<'a, ()> {
        async move {
            self.arena
                .lock()
                .insert(self.id, name, Content::Dir(BTreeMap::new()))?;
            Ok(())
        }
        .boxed()
    }

    fn move_target(&self) -> Option<&dyn DavMoveTarget> {
        Some(self)
    }

    fn multi_get(&self) -> Option<&dyn DavMultiGet> {
        Some(self)
    }
}

impl DavMoveTarget for MemNode {
    fn move_into<'a>(
        &'a self,
        target_name: &'a str,
        source_path: &'a str,
        _source: &'a DavNodeRef,
    ) -> FsFuture<'a, bool> {
        async move {
            let mut arena = self.arena.lock();
            let src = match arena.resolve(source_path) {
                Ok(id) => id,
                Err(FsError::NotFound) => return Ok(false),
                Err(e) => return Err(e),
            };
            arena.relink(src, self.id, target_name)?;
            Ok(true)
        }
        .boxed()
    }
}

impl DavMultiGet for MemNode {
    fn get_multiple_children<'a>(&'a self, names: &'a [String]) -> FsFuture<'a, Vec<DavNodeRef>> {
        async move {
            let arena = self.arena.lock();
            let children = arena.children(self.id)?;
            Ok(names
                .iter()
                .filter_map(|n| children.get(n))
                .map(|&id| self.handle(id, arena.is_dir(id)))
                .collect())
        }
        .boxed()
    }
}

impl DavProperties for MemNode {
    fn get_props(&self) -> FsFuture<'_, Vec<DavProp>> {
        async move { self.with_entry(|e| e.props.values().cloned().collect()) }.boxed()
    }

    fn patch_props(&self, patch: Vec<(bool, DavProp)>) -> FsFuture<'_, Vec<(StatusCode, DavProp)>> {
        async move {
            let mut arena = self.arena.lock();
            let entry = arena.get_mut(self.id)?;
            let mut result = Vec::with_capacity(patch.len());
            for (set, prop) in patch {
                if set {
                    entry.props.insert(prop.clark_name(), prop.clone());
                } else {
                    entry.props.remove(&prop.clark_name());
                }
                result.push((StatusCode::OK, prop));
            }
            entry.touch();
            Ok(result)
        }
        .boxed()
    }
}

impl DavAccessControl for MemNode {
    fn owner(&self) -> Option<String> {
        self.with_entry(|e| e.owner.clone()).ok().flatten()
    }

    fn acl(&self) -> Vec<Ace> {
        self.with_entry(|e| e.acl.clone()).unwrap_or_default()
    }

    fn set_acl(&self, acl: Vec<Ace>) -> FsFuture<'_, ()> {
        async move {
            let mut arena = self.arena.lock();
            arena.get_mut(self.id)?.acl = acl;
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::{PRINCIPAL_ALL, PRIV_READ};

    async fn root(fs: &Arc<MemFs>) -> DavNodeRef {
        fs.root().await.unwrap()
    }

    async fn child(node: &DavNodeRef, name: &str) -> FsResult<DavNodeRef> {
        node.as_collection().unwrap().get_child(name).await
    }

    #[tokio::test]
    async fn create_and_read() {
        let fs = MemFs::new();
        fs.create_dir("d").await.unwrap();
        fs.create_file("d/f", b"abc".to_vec()).await.unwrap();
        assert_eq!(fs.create_dir("d").await, Err(FsError::Exists));
        assert_eq!(fs.create_file("x/f", Vec::new()).await, Err(FsError::Conflict));
        assert_eq!(fs.create_file("d/f/g", Vec::new()).await, Err(FsError::Conflict));

        let d = child(&root(&fs).await, "d").await.unwrap();
        let f = child(&d, "f").await.unwrap();
        assert!(d.is_collection());
        assert_eq!(f.name(), "f");
        assert_eq!(f.as_file().unwrap().size(), 3);
        let data = f.as_file().unwrap().get().await.unwrap().into_bytes().await.unwrap();
        assert_eq!(&data[..], b"abc");
        assert!(d.access_control().is_none());
    }

    #[tokio::test]
    async fn put_changes_etag() {
        let fs = MemFs::new();
        fs.create_file("f", b"one".to_vec()).await.unwrap();
        let f = child(&root(&fs).await, "f").await.unwrap();
        let before = f.etag().unwrap();
        f.as_file().unwrap().put(bytes_stream("two!")).await.unwrap();
        assert_ne!(f.etag().unwrap(), before);
        assert_eq!(f.as_file().unwrap().size(), 4);
    }

    #[tokio::test]
    async fn stale_handles() {
        let fs = MemFs::new();
        fs.create_dir("d").await.unwrap();
        fs.create_file("d/f", b"abc".to_vec()).await.unwrap();
        let d = child(&root(&fs).await, "d").await.unwrap();
        let f = child(&d, "f").await.unwrap();

        d.delete().await.unwrap();
        assert_eq!(child(&root(&fs).await, "d").await.unwrap_err(), FsError::NotFound);
        assert_eq!(f.as_file().unwrap().get().await.err(), Some(FsError::NotFound));
        assert_eq!(f.delete().await, Err(FsError::NotFound));
        assert_eq!(root(&fs).await.delete().await, Err(FsError::Forbidden));
    }

    #[tokio::test]
    async fn rename_and_move() {
        let fs = MemFs::new();
        fs.create_dir("a").await.unwrap();
        fs.create_dir("a/b").await.unwrap();
        fs.create_file("a/f", Vec::new()).await.unwrap();
        let root = root(&fs).await;
        let a = child(&root, "a").await.unwrap();

        let f = child(&a, "f").await.unwrap();
        assert_eq!(f.set_name("b").await, Err(FsError::Exists));
        f.set_name("g").await.unwrap();
        assert_eq!(f.name(), "g");

        let target = root.as_collection().unwrap().move_target().unwrap();
        assert!(target.move_into("moved", "a/g", &f).await.unwrap());
        assert!(child(&root, "moved").await.is_ok());
        assert!(!target.move_into("x", "a/missing", &f).await.unwrap());

        // into its own subtree.
        let b = child(&a, "b").await.unwrap();
        let target = b.as_collection().unwrap().move_target().unwrap();
        assert_eq!(target.move_into("a", "a", &a).await, Err(FsError::Forbidden));
    }

    #[tokio::test]
    async fn multi_get_skips_missing() {
        let fs = MemFs::new();
        fs.create_file("a", Vec::new()).await.unwrap();
        fs.create_file("b", Vec::new()).await.unwrap();
        let root = root(&fs).await;
        let names = vec!["b".to_string(), "zz".to_string(), "a".to_string()];
        let nodes = root
            .as_collection()
            .unwrap()
            .multi_get()
            .unwrap()
            .get_multiple_children(&names)
            .await
            .unwrap();
        let got: Vec<String> = nodes.iter().map(|n| n.name()).collect();
        assert_eq!(got, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn dead_properties() {
        let fs = MemFs::new();
        fs.create_file("f", Vec::new()).await.unwrap();
        let f = child(&root(&fs).await, "f").await.unwrap();
        let props = f.properties().unwrap();
        let prop = DavProp {
            name: "a".to_string(),
            prefix: None,
            namespace: Some("urn:x".to_string()),
            xml: Some(b"<a xmlns=\"urn:x\">1</a>".to_vec()),
        };
        props.patch_props(vec![(true, prop.clone())]).await.unwrap();
        assert_eq!(props.get_props().await.unwrap(), vec![prop.clone()]);
        let res = props.patch_props(vec![(false, prop)]).await.unwrap();
        assert_eq!(res[0].0, StatusCode::OK);
        assert!(props.get_props().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn acl_is_inherited() {
        let fs = MemFs::with_acl(vec![Ace::new(PRINCIPAL_ALL, PRIV_READ)]);
        fs.set_owner("", Some("/principals/alice")).unwrap();
        fs.create_dir("d").await.unwrap();
        fs.create_file("d/f", Vec::new()).await.unwrap();
        let d = child(&root(&fs).await, "d").await.unwrap();
        let f = child(&d, "f").await.unwrap();
        let ac = f.access_control().unwrap();
        assert_eq!(ac.acl(), vec![Ace::new(PRINCIPAL_ALL, PRIV_READ)]);
        assert_eq!(ac.owner().as_deref(), Some("/principals/alice"));

        ac.set_acl(Vec::new()).await.unwrap();
        assert!(f.access_control().unwrap().acl().is_empty());
        assert_eq!(d.access_control().unwrap().acl().len(), 1);
    }
}
