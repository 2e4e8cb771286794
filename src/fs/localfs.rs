//! Local filesystem access.
//!
//! Serves a directory. Nodes are snapshots of the metadata taken when they
//! were looked up; they are only meant to live for one request.
use std::fmt;
#[cfg(unix)]
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_stream::stream;
use bytes::BytesMut;
use futures_util::{FutureExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::davheaders::Depth;
use crate::davpath::{join, normalize};
use crate::fs::*;

const READ_BUF_SIZE: usize = 65536;

/// Local Filesystem implementation.
#[derive(Debug, Clone)]
pub struct LocalFs {
    inner: Arc<LocalFsInner>,
}

#[derive(Debug)]
struct LocalFsInner {
    basedir: PathBuf,
    public: bool,
}

impl LocalFs {
    /// Create a new LocalFs DavFileSystem, serving "base".
    ///
    /// If "public" is set to true, all files and directories created will be
    /// publically readable (mode 644/755), otherwise they will be private
    /// (mode 600/700). Umask still overrides this.
    pub fn new(base: impl Into<PathBuf>, public: bool) -> Arc<LocalFs> {
        Arc::new(LocalFs {
            inner: Arc::new(LocalFsInner {
                basedir: base.into(),
                public,
            }),
        })
    }
}

impl LocalFsInner {
    fn abs_path(&self, tree_path: &str) -> PathBuf {
        let mut pathbuf = self.basedir.clone();
        for seg in normalize(tree_path).split('/').filter(|s| !s.is_empty()) {
            pathbuf.push(seg);
        }
        pathbuf
    }

    async fn node(self: &Arc<Self>, tree_path: String) -> FsResult<DavNodeRef> {
        let meta = tokio::fs::metadata(self.abs_path(&tree_path)).await?;
        Ok(Arc::new(LocalNode {
            fs: self.clone(),
            path: tree_path,
            meta,
        }))
    }

    // write a file from a stream, creating it if `create_new`.
    async fn write_file(&self, tree_path: &str, mut data: ByteStream, create_new: bool) -> FsResult<()> {
        let mut opt = tokio::fs::OpenOptions::new();
        opt.write(true);
        if create_new {
            opt.create_new(true);
        } else {
            opt.truncate(true);
        }
        #[cfg(unix)]
        opt.mode(if self.public { 0o644 } else { 0o600 });
        let mut file = opt.open(self.abs_path(tree_path)).await?;
        while let Some(chunk) = data.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        let p_from = self.abs_path(from);
        let p_to = self.abs_path(to);
        match tokio::fs::rename(&p_from, &p_to).await {
            Ok(()) => Ok(()),
            // webdav allows a rename from a directory to a file.
            #[cfg(unix)]
            Err(e) if e.raw_os_error() == Some(libc::ENOTDIR) && p_from.is_dir() => {
                let _ = tokio::fs::remove_file(&p_to).await;
                Ok(tokio::fs::rename(p_from, p_to).await?)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl DavFileSystem for LocalFs {
    fn root(&self) -> FsFuture<'_, DavNodeRef> {
        async move { self.inner.node(String::new()).await }.boxed()
    }
}

struct LocalNode {
    fs: Arc<LocalFsInner>,
    path: String,
    meta: std::fs::Metadata,
}

impl fmt::Debug for LocalNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LocalNode").field("path", &self.path).finish()
    }
}

impl DavNode for LocalNode {
    fn name(&self) -> String {
        self.path.rsplit('/').next().unwrap_or_default().to_string()
    }

    fn variant(&self) -> NodeVariant<'_> {
        if self.meta.is_dir() {
            NodeVariant::Collection(self)
        } else {
            NodeVariant::File(self)
        }
    }

    fn last_modified(&self) -> Option<SystemTime> {
        self.meta.modified().ok()
    }

    fn created(&self) -> Option<SystemTime> {
        self.meta.created().ok()
    }

    // same as the default apache etag.
    fn etag(&self) -> Option<String> {
        let modified = self.meta.modified().ok()?;
        let t = modified.duration_since(UNIX_EPOCH).ok()?;
        let t = t.as_secs() * 1000000 + t.subsec_nanos() as u64 / 1000;
        #[cfg(unix)]
        if self.meta.is_file() {
            Some(format!("{:x}-{:x}-{:x}", self.meta.ino(), self.meta.len(), t))
        } else {
            Some(format!("{:x}-{:x}", self.meta.ino(), t))
        }
        #[cfg(not(unix))]
        if self.meta.is_file() {
            Some(format!("{:x}-{:x}", self.meta.len(), t))
        } else {
            Some(format!("{:x}", t))
        }
    }

    fn delete(&self) -> FsFuture<'_, ()> {
        async move {
            trace!("FS: delete {:?}", self.path);
            if self.path.is_empty() {
                return Err(FsError::Forbidden);
            }
            let path = self.fs.abs_path(&self.path);
            if self.meta.is_dir() {
                Ok(tokio::fs::remove_dir_all(path).await?)
            } else {
                Ok(tokio::fs::remove_file(path).await?)
            }
        }
        .boxed()
    }

    fn set_name<'a>(&'a self, name: &'a str) -> FsFuture<'a, ()> {
        async move {
            if self.path.is_empty() {
                return Err(FsError::Forbidden);
            }
            let parent = self.path.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
            let to = join(parent, name);
            trace!("FS: rename {:?} {:?}", self.path, to);
            self.fs.rename(&self.path, &to).await
        }
        .boxed()
    }
}

impl DavFileNode for LocalNode {
    fn get(&self) -> FsFuture<'_, FileContent> {
        async move {
            let mut file = tokio::fs::File::open(self.fs.abs_path(&self.path)).await?;
            let s = stream! {
                loop {
                    let mut buf = BytesMut::with_capacity(READ_BUF_SIZE);
                    match file.read_buf(&mut buf).await {
                        Ok(0) => break,
                        Ok(_) => yield Ok(buf.freeze()),
                        Err(e) => {
                            debug!("read failed {e}");
                            yield Err(FsError::from(e));
                            break;
                        }
                    }
                }
            };
            Ok(FileContent::Stream(Box::pin(s)))
        }
        .boxed()
    }

    fn put(&self, data: ByteStream) -> FsFuture<'_, ()> {
        async move { self.fs.write_file(&self.path, data, false).await }.boxed()
    }

    fn size(&self) -> u64 {
        self.meta.len()
    }
}

impl DavCollection for LocalNode {
    fn get_child<'a>(&'a self, name: &'a str) -> FsFuture<'a, DavNodeRef> {
        async move {
            if name.is_empty() || name.contains('/') {
                return Err(FsError::NotFound);
            }
            self.fs.node(join(&self.path, name)).await
        }
        .boxed()
    }

    fn get_children(&self) -> FsFuture<'_, Vec<DavNodeRef>> {
        async move {
            trace!("FS: read_dir {:?}", self.path);
            let mut read_dir = tokio::fs::read_dir(self.fs.abs_path(&self.path)).await?;
            let mut children: Vec<DavNodeRef> = Vec::new();
            while let Some(entry) = read_dir.next_entry().await? {
                let name = match entry.file_name().into_string() {
                    Ok(name) => name,
                    Err(name) => {
                        debug!("skipping non-utf8 name {name:?}");
                        continue;
                    }
                };
                // follow symlinks, skip dangling ones.
                match self.fs.node(join(&self.path, &name)).await {
                    Ok(node) => children.push(node),
                    Err(e) => debug!("skipping {name:?}: {e}"),
                }
            }
            children.sort_by_key(|c| c.name());
            Ok(children)
        }
        .boxed()
    }

    fn create_file<'a>(&'a self, name: &'a str, data: ByteStream) -> FsFuture<'a, ()> {
        async move {
            let path = join(&self.path, name);
            trace!("FS: create_file {path:?}");
            self.fs.write_file(&path, data, true).await
        }
        .boxed()
    }

    fn create_directory<'a>(&'a self, name: &'a str) -> FsFuture<'a, ()> {
        async move {
            let path = join(&self.path, name);
            trace!("FS: create_dir {path:?}");
            #[allow(unused_mut)]
            let mut dir = tokio::fs::DirBuilder::new();
            #[cfg(unix)]
            dir.mode(if self.fs.public { 0o755 } else { 0o700 });
            Ok(dir.create(self.fs.abs_path(&path)).await?)
        }
        .boxed()
    }

    fn copy_target(&self) -> Option<&dyn DavCopyTarget> {
        Some(self)
    }

    fn move_target(&self) -> Option<&dyn DavMoveTarget> {
        Some(self)
    }
}

impl DavCopyTarget for LocalNode {
    // Files only; collections are copied node by node.
    fn copy_into<'a>(
        &'a self,
        target_name: &'a str,
        source_path: &'a str,
        source: &'a DavNodeRef,
        _depth: Depth,
    ) -> FsFuture<'a, bool> {
        async move {
            if !source.is_file() {
                return Ok(false);
            }
            let from = self.fs.abs_path(source_path);
            let to = self.fs.abs_path(&join(&self.path, target_name));
            if let Err(e) = tokio::fs::copy(&from, &to).await {
                debug!("copy({from:?}, {to:?}) failed: {e}");
                return Err(e.into());
            }
            Ok(true)
        }
        .boxed()
    }
}

impl DavMoveTarget for LocalNode {
    fn move_into<'a>(
        &'a self,
        target_name: &'a str,
        source_path: &'a str,
        _source: &'a DavNodeRef,
    ) -> FsFuture<'a, bool> {
        async move {
            let to = join(&self.path, target_name);
            match self.fs.rename(source_path, &to).await {
                Ok(()) => Ok(true),
                // across a mount point, fall back to copy + delete.
                Err(FsError::IsRemote) => Ok(false),
                Err(e) => Err(e),
            }
        }
        .boxed()
    }
}
