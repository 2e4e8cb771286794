//! Path resolution on top of a tree of nodes.
//!
//! A `Tree` lives for one request. It caches every node it resolves, by
//! tree path, and evicts cached entries whenever it mutates something
//! below them (see [`Tree::mark_dirty`]). It must never be shared between
//! requests: another request may change the backend at any time.
use std::collections::HashMap;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;

use crate::davheaders::Depth;
use crate::davpath::{is_under, join, normalize, split};
use crate::fs::*;

/// Request scoped view on a node tree.
#[derive(Debug)]
pub struct Tree {
    root: DavNodeRef,
    cache: Mutex<HashMap<String, DavNodeRef>>,
}

impl Tree {
    /// Create a tree from its root collection.
    pub fn new(root: DavNodeRef) -> Tree {
        Tree {
            root,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The root collection.
    pub fn root(&self) -> &DavNodeRef {
        &self.root
    }

    fn cached(&self, path: &str) -> Option<DavNodeRef> {
        self.cache.lock().get(path).cloned()
    }

    fn cache_insert(&self, path: String, node: DavNodeRef) {
        self.cache.lock().insert(path, node);
    }

    /// Resolve a path to a node.
    ///
    /// Fails with `NotFound` if a segment does not exist, or if a segment
    /// other than the last one is not a collection.
    pub async fn get_node_for_path(&self, path: &str) -> FsResult<DavNodeRef> {
        let path = normalize(path);
        if path.is_empty() {
            return Ok(self.root.clone());
        }
        if let Some(node) = self.cached(path) {
            return Ok(node);
        }

        // start at the deepest cached ancestor.
        let segments: Vec<&str> = path.split('/').collect();
        let mut node = self.root.clone();
        let mut start = 0;
        for i in (1..segments.len()).rev() {
            if let Some(n) = self.cached(&segments[..i].join("/")) {
                node = n;
                start = i;
                break;
            }
        }

        for i in start..segments.len() {
            let child = match node.as_collection() {
                Some(coll) => coll.get_child(segments[i]).await?,
                None => return Err(FsError::NotFound),
            };
            self.cache_insert(segments[..=i].join("/"), child.clone());
            node = child;
        }
        Ok(node)
    }

    /// Like `get_node_for_path`, but `NotFound` becomes `None`.
    pub async fn lookup(&self, path: &str) -> FsResult<Option<DavNodeRef>> {
        match self.get_node_for_path(path).await {
            Ok(node) => Ok(Some(node)),
            Err(FsError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Does a node exist at `path`. Never fails.
    pub async fn node_exists(&self, path: &str) -> bool {
        let path = normalize(path);
        if path.is_empty() {
            return true;
        }
        let (parent, name) = split(path);
        let parent = match self.lookup(parent).await {
            Ok(Some(p)) => p,
            _ => return false,
        };
        match parent.as_collection() {
            Some(coll) => coll.child_exists(name).await.unwrap_or(false),
            None => false,
        }
    }

    /// Children of the collection at `path`. Each child is cached.
    pub async fn get_children(&self, path: &str) -> FsResult<Vec<DavNodeRef>> {
        let path = normalize(path);
        let node = self.get_node_for_path(path).await?;
        let coll = node.as_collection().ok_or(FsError::NotFound)?;
        let children = coll.get_children().await?;
        let mut cache = self.cache.lock();
        for child in &children {
            cache.insert(join(path, &child.name()), child.clone());
        }
        Ok(children)
    }

    /// Evict `path` and everything below it from the cache.
    pub fn mark_dirty(&self, path: &str) {
        let path = normalize(path);
        let mut cache = self.cache.lock();
        if path.is_empty() {
            cache.clear();
        } else {
            cache.retain(|p, _| !is_under(p, path));
        }
    }

    /// Resolve the parent collection of `path`.
    async fn parent_collection(&self, path: &str) -> FsResult<DavNodeRef> {
        let (parent, _) = split(path);
        let node = self.get_node_for_path(parent).await.map_err(|e| match e {
            FsError::NotFound => FsError::Conflict,
            e => e,
        })?;
        if node.is_collection() {
            Ok(node)
        } else {
            Err(FsError::Conflict)
        }
    }

    /// Copy `source` to `destination`. The destination must not exist.
    pub async fn copy(&self, source: &str, destination: &str, depth: Depth) -> FsResult<()> {
        let (source, destination) = (normalize(source), normalize(destination));
        trace!("tree: copy {source:?} -> {destination:?} ({depth:?})");
        let src = self.get_node_for_path(source).await?;
        let dst_parent = self.parent_collection(destination).await?;
        let (dst_dir, dst_name) = split(destination);

        let mut handled = false;
        if let Some(target) = dst_parent.as_collection().and_then(|c| c.copy_target()) {
            handled = target.copy_into(dst_name, source, &src, depth).await?;
        }
        if !handled {
            copy_node(src, dst_parent.clone(), dst_name.to_string(), depth).await?;
        }
        self.mark_dirty(dst_dir);
        Ok(())
    }

    /// Move `source` to `destination`. The destination must not exist.
    pub async fn move_node(&self, source: &str, destination: &str) -> FsResult<()> {
        let (source, destination) = (normalize(source), normalize(destination));
        trace!("tree: move {source:?} -> {destination:?}");
        let (src_dir, _) = split(source);
        let (dst_dir, dst_name) = split(destination);

        let result = if src_dir == dst_dir {
            let node = self.get_node_for_path(source).await?;
            node.set_name(dst_name).await
        } else {
            self.move_between(source, destination).await
        };
        self.mark_dirty(src_dir);
        self.mark_dirty(dst_dir);
        result
    }

    async fn move_between(&self, source: &str, destination: &str) -> FsResult<()> {
        let src = self.get_node_for_path(source).await?;
        let dst_parent = self.parent_collection(destination).await?;
        let (_, dst_name) = split(destination);

        if let Some(target) = dst_parent.as_collection().and_then(|c| c.move_target()) {
            if target.move_into(dst_name, source, &src).await? {
                return Ok(());
            }
        }
        self.copy(source, destination, Depth::Infinity).await?;
        self.delete(source).await
    }

    /// Delete the node at `path`.
    pub async fn delete(&self, path: &str) -> FsResult<()> {
        let path = normalize(path);
        trace!("tree: delete {path:?}");
        if path.is_empty() {
            return Err(FsError::Forbidden);
        }
        let node = self.get_node_for_path(path).await?;
        let result = node.delete().await;
        let (parent, _) = split(path);
        self.mark_dirty(parent);
        result
    }

    /// Resolve many paths at once. Paths that do not resolve are left out.
    ///
    /// Siblings are fetched with one call if their parent supports it.
    pub async fn get_multiple_nodes(&self, paths: &[String]) -> FsResult<HashMap<String, DavNodeRef>> {
        let mut by_parent: HashMap<&str, Vec<String>> = HashMap::new();
        for path in paths {
            let (parent, name) = split(path);
            by_parent.entry(parent).or_default().push(name.to_string());
        }

        let mut result = HashMap::new();
        for (parent, names) in by_parent {
            let parent_node = match self.lookup(parent).await? {
                Some(p) => p,
                None => continue,
            };
            if let Some(multi) = parent_node.as_collection().and_then(|c| c.multi_get()) {
                for child in multi.get_multiple_children(&names).await? {
                    let path = join(parent, &child.name());
                    self.cache_insert(path.clone(), child.clone());
                    result.insert(path, child);
                }
            } else {
                for name in names {
                    let path = join(parent, &name);
                    if let Some(node) = self.lookup(&path).await? {
                        result.insert(path, node);
                    }
                }
            }
        }
        Ok(result)
    }
}

/// Generic copy: recreate `source` below `dest_parent`, and its children
/// down to `depth`, then copy the dead properties.
fn copy_node(
    source: DavNodeRef,
    dest_parent: DavNodeRef,
    dest_name: String,
    depth: Depth,
) -> BoxFuture<'static, FsResult<()>> {
    async move {
        let parent = dest_parent.as_collection().ok_or(FsError::Conflict)?;
        match source.variant() {
            NodeVariant::File(file) => {
                let content = file.get().await?;
                parent.create_file(&dest_name, content.into_stream()).await?;
            }
            NodeVariant::Collection(_) => {
                parent.create_directory(&dest_name).await?;
            }
        }
        let dest = parent.get_child(&dest_name).await?;

        if let Some(coll) = source.as_collection() {
            if !depth.is_zero() {
                for child in coll.get_children().await? {
                    let name = child.name();
                    copy_node(child, dest.clone(), name, depth.decrement()).await?;
                }
            }
        }

        if let (Some(src_props), Some(dst_props)) = (source.properties(), dest.properties()) {
            let props = src_props.get_props().await?;
            if !props.is_empty() {
                let patch = props.into_iter().map(|p| (true, p)).collect();
                dst_props.patch_props(patch).await?;
            }
        }
        Ok(())
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemFs;
    use std::sync::Arc;

    async fn tree(fs: &Arc<MemFs>) -> Tree {
        Tree::new(fs.root().await.unwrap())
    }

    async fn sample() -> Arc<MemFs> {
        let fs = MemFs::new();
        fs.create_dir("dir").await.unwrap();
        fs.create_file("dir/a.txt", b"hello".to_vec()).await.unwrap();
        fs.create_dir("dir/sub").await.unwrap();
        fs.create_file("dir/sub/b.txt", b"world".to_vec()).await.unwrap();
        fs.create_dir("dir/sub/deeper").await.unwrap();
        fs
    }

    async fn read(tree: &Tree, path: &str) -> Vec<u8> {
        let node = tree.get_node_for_path(path).await.unwrap();
        let content = node.as_file().unwrap().get().await.unwrap();
        content.into_bytes().await.unwrap().to_vec()
    }

    async fn names(tree: &Tree, path: &str) -> Vec<String> {
        let mut v: Vec<String> = tree
            .get_children(path)
            .await
            .unwrap()
            .iter()
            .map(|n| n.name())
            .collect();
        v.sort();
        v
    }

    #[tokio::test]
    async fn resolve() {
        let fs = sample().await;
        let tree = tree(&fs).await;
        assert!(tree.get_node_for_path("").await.unwrap().is_collection());
        assert!(tree.get_node_for_path("/dir/sub/").await.unwrap().is_collection());
        assert!(tree.get_node_for_path("dir/a.txt").await.unwrap().is_file());
        assert_eq!(tree.get_node_for_path("dir/nope").await.unwrap_err(), FsError::NotFound);
        // a file in the middle of a path.
        assert_eq!(
            tree.get_node_for_path("dir/a.txt/x").await.unwrap_err(),
            FsError::NotFound
        );
        assert!(tree.node_exists("dir/sub/b.txt").await);
        assert!(!tree.node_exists("dir/a.txt/x").await);
        assert!(!tree.node_exists("nope/x").await);
        assert!(tree.node_exists("").await);
    }

    #[tokio::test]
    async fn cache_is_evicted_on_mutation() {
        let fs = sample().await;
        let tree = tree(&fs).await;
        assert!(tree.get_node_for_path("dir/sub/b.txt").await.unwrap().is_file());
        assert!(tree.cached("dir/sub/b.txt").is_some());

        tree.delete("dir/sub").await.unwrap();
        assert!(tree.cached("dir/sub").is_none());
        assert!(tree.cached("dir/sub/b.txt").is_none());

        // same path, different kind of node.
        fs.create_dir("dir/sub").await.unwrap();
        fs.create_dir("dir/sub/b.txt").await.unwrap();
        assert!(tree.get_node_for_path("dir/sub/b.txt").await.unwrap().is_collection());

        tree.mark_dirty("");
        assert!(tree.cached("dir").is_none());
    }

    #[tokio::test]
    async fn children_are_cached() {
        let fs = sample().await;
        let tree = tree(&fs).await;
        assert_eq!(names(&tree, "dir").await, vec!["a.txt", "sub"]);
        assert!(tree.cached("dir/a.txt").is_some());
        assert!(tree.cached("dir/sub").is_some());
        // restartable.
        assert_eq!(names(&tree, "dir").await, vec!["a.txt", "sub"]);
    }

    #[tokio::test]
    async fn copy_depth() {
        let fs = sample().await;
        let tree = tree(&fs).await;

        tree.copy("dir", "zero", Depth::ZERO).await.unwrap();
        assert!(names(&tree, "zero").await.is_empty());

        tree.copy("dir", "one", Depth::ONE).await.unwrap();
        assert_eq!(names(&tree, "one").await, vec!["a.txt", "sub"]);
        assert!(names(&tree, "one/sub").await.is_empty());

        tree.copy("dir", "all", Depth::Infinity).await.unwrap();
        assert_eq!(names(&tree, "all/sub").await, vec!["b.txt", "deeper"]);
        assert!(tree.get_node_for_path("all/sub/deeper").await.unwrap().is_collection());
        assert_eq!(read(&tree, "all/sub/b.txt").await, b"world");
        assert_eq!(read(&tree, "all/a.txt").await, b"hello");

        // source untouched.
        assert_eq!(names(&tree, "dir/sub").await, vec!["b.txt", "deeper"]);
    }

    #[tokio::test]
    async fn copy_keeps_dead_properties() {
        let fs = sample().await;
        let tree = tree(&fs).await;
        let prop = DavProp {
            name: "color".to_string(),
            prefix: Some("X".to_string()),
            namespace: Some("http://example.com/".to_string()),
            xml: Some(b"<X:color xmlns:X=\"http://example.com/\">red</X:color>".to_vec()),
        };
        let node = tree.get_node_for_path("dir/a.txt").await.unwrap();
        node.properties()
            .unwrap()
            .patch_props(vec![(true, prop.clone())])
            .await
            .unwrap();

        tree.copy("dir/a.txt", "b.txt", Depth::Infinity).await.unwrap();
        let copy = tree.get_node_for_path("b.txt").await.unwrap();
        assert_eq!(copy.properties().unwrap().get_props().await.unwrap(), vec![prop]);
    }

    #[tokio::test]
    async fn copy_needs_parent() {
        let fs = sample().await;
        let tree = tree(&fs).await;
        assert_eq!(
            tree.copy("dir", "nope/x", Depth::Infinity).await.unwrap_err(),
            FsError::Conflict
        );
        assert_eq!(
            tree.copy("dir", "dir/a.txt/x", Depth::Infinity).await.unwrap_err(),
            FsError::Conflict
        );
    }

    #[tokio::test]
    async fn move_rename_and_reparent() {
        let fs = sample().await;
        let tree = tree(&fs).await;

        // same parent: rename.
        tree.move_node("dir/a.txt", "dir/c.txt").await.unwrap();
        assert!(!tree.node_exists("dir/a.txt").await);
        assert_eq!(read(&tree, "dir/c.txt").await, b"hello");

        // different parent.
        tree.create_root_dir("other").await;
        tree.move_node("dir/sub", "other/sub").await.unwrap();
        assert!(!tree.node_exists("dir/sub").await);
        assert!(tree.get_node_for_path("dir/sub/b.txt").await.is_err());
        assert_eq!(read(&tree, "other/sub/b.txt").await, b"world");
    }

    #[tokio::test]
    async fn multiple_nodes() {
        let fs = sample().await;
        let tree = tree(&fs).await;
        let paths = vec![
            "dir/a.txt".to_string(),
            "dir/sub".to_string(),
            "dir/sub/b.txt".to_string(),
            "dir/missing".to_string(),
            "missing/x".to_string(),
        ];
        let nodes = tree.get_multiple_nodes(&paths).await.unwrap();
        let mut keys: Vec<&String> = nodes.keys().collect();
        keys.sort();
        assert_eq!(keys, vec!["dir/a.txt", "dir/sub", "dir/sub/b.txt"]);
        assert!(nodes["dir/sub"].is_collection());
    }

    impl Tree {
        async fn create_root_dir(&self, name: &str) {
            self.root.as_collection().unwrap().create_directory(name).await.unwrap();
            self.mark_dirty("");
        }
    }
}
