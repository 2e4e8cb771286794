//! Contains the node traits that a backend has to implement.
//!
//! A backend exposes a tree of [`DavNode`]s through [`DavFileSystem::root`].
//! Every node is either a file or a collection ([`NodeVariant`]). Optional
//! capabilities (dead properties, access control, optimized copy/move,
//! batched child lookup) are queried through methods returning `Option`,
//! so a backend only implements what it supports.
//!
//! Nodes are owned by the backend. The [`Tree`](crate::tree::Tree) only
//! holds on to them for the duration of a single request.
use std::error::Error;
use std::fmt::Debug;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use futures_util::{future, stream, Future, FutureExt, Stream, StreamExt};
use http::StatusCode;

use crate::acl::Ace;
use crate::davheaders::Depth;

#[cfg(any(docsrs, feature = "localfs"))]
pub(crate) mod localfs;
#[cfg(any(docsrs, feature = "memfs"))]
pub(crate) mod memfs;

#[cfg(any(docsrs, feature = "localfs"))]
pub use localfs::LocalFs;
#[cfg(any(docsrs, feature = "memfs"))]
pub use memfs::MemFs;

/// Errors generated by a filesystem implementation.
///
/// These are more result-codes than errors, really.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// Operation not implemented (501)
    NotImplemented,
    /// Something went wrong (500)
    GeneralFailure,
    /// tried to create something, but it existed (405 / 412) (yes, 405. RFC4918 says so)
    Exists,
    /// File / Directory not found (404)
    NotFound,
    /// Not allowed (403)
    Forbidden,
    /// Parent collection missing, or not a collection (409)
    Conflict,
    /// Out of space (507)
    InsufficientStorage,
    /// Symbolic link loop detected (ELOOP) (508)
    LoopDetected,
    /// The path is too long (ENAMETOOLONG) (414)
    PathTooLong,
    /// The file being PUT is too large (413)
    TooLarge,
    /// Trying to MOVE over a mount boundary (EXDEV) (502)
    IsRemote,
}

/// The Result type.
pub type FsResult<T> = std::result::Result<T, FsError>;

/// Future returned by almost all of the node methods.
pub type FsFuture<'a, T> = Pin<Box<dyn Future<Output = FsResult<T>> + Send + 'a>>;

/// Stream of file content.
pub type ByteStream = Pin<Box<dyn Stream<Item = FsResult<Bytes>> + Send>>;

/// Shared reference to a node.
pub type DavNodeRef = Arc<dyn DavNode>;

/// The root of a tree of nodes.
pub trait DavFileSystem: Debug + Send + Sync {
    /// Return the root collection. Called once per request.
    fn root(&self) -> FsFuture<'_, DavNodeRef>;
}

/// The two kinds of node.
pub enum NodeVariant<'a> {
    File(&'a dyn DavFileNode),
    Collection(&'a dyn DavCollection),
}

/// One entry in the tree.
pub trait DavNode: Debug + Send + Sync {
    /// Name of this node (the last path segment). The root has an empty name.
    fn name(&self) -> String;

    /// File or collection.
    fn variant(&self) -> NodeVariant<'_>;

    /// Last modification time.
    fn last_modified(&self) -> Option<SystemTime>;

    /// Creation time.
    fn created(&self) -> Option<SystemTime> {
        None
    }

    /// Entity tag, without the quotes.
    ///
    /// The default is derived from the modification time and the size.
    fn etag(&self) -> Option<String> {
        let t = self.last_modified()?.duration_since(UNIX_EPOCH).ok()?;
        let t = t.as_secs() * 1000000 + t.subsec_nanos() as u64 / 1000;
        match self.variant() {
            NodeVariant::File(f) => Some(format!("{:x}-{:x}", f.size(), t)),
            NodeVariant::Collection(_) => Some(format!("{:x}", t)),
        }
    }

    /// Remove this node (and everything below it).
    fn delete(&self) -> FsFuture<'_, ()>;

    /// Rename this node within its parent collection.
    fn set_name<'a>(&'a self, name: &'a str) -> FsFuture<'a, ()>;

    /// Dead property storage, if supported.
    fn properties(&self) -> Option<&dyn DavProperties> {
        None
    }

    /// Access control, if supported.
    fn access_control(&self) -> Option<&dyn DavAccessControl> {
        None
    }
}

impl dyn DavNode {
    pub fn is_collection(&self) -> bool {
        matches!(self.variant(), NodeVariant::Collection(_))
    }

    pub fn is_file(&self) -> bool {
        matches!(self.variant(), NodeVariant::File(_))
    }

    pub fn as_collection(&self) -> Option<&dyn DavCollection> {
        match self.variant() {
            NodeVariant::Collection(c) => Some(c),
            NodeVariant::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&dyn DavFileNode> {
        match self.variant() {
            NodeVariant::File(f) => Some(f),
            NodeVariant::Collection(_) => None,
        }
    }
}

/// Content returned by [`DavFileNode::get`].
pub enum FileContent {
    Bytes(Bytes),
    Stream(ByteStream),
}

impl FileContent {
    /// Turn the content into a stream.
    pub fn into_stream(self) -> ByteStream {
        match self {
            FileContent::Bytes(b) => Box::pin(stream::once(future::ready(Ok(b)))),
            FileContent::Stream(s) => s,
        }
    }

    /// Read all of the content.
    pub async fn into_bytes(self) -> FsResult<Bytes> {
        match self {
            FileContent::Bytes(b) => Ok(b),
            FileContent::Stream(mut s) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = s.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

/// Helper: a stream that yields one chunk.
pub fn bytes_stream(b: impl Into<Bytes>) -> ByteStream {
    FileContent::Bytes(b.into()).into_stream()
}

/// A node with byte content.
pub trait DavFileNode: Send + Sync {
    /// Read the content.
    fn get(&self) -> FsFuture<'_, FileContent>;

    /// Replace the content.
    fn put(&self, data: ByteStream) -> FsFuture<'_, ()>;

    /// Size in bytes.
    fn size(&self) -> u64;

    /// Mime type. The default guesses from the name.
    fn content_type(&self) -> Option<String> {
        None
    }
}

/// A node with children.
pub trait DavCollection: Send + Sync {
    /// Look up a child, fails with `NotFound`.
    fn get_child<'a>(&'a self, name: &'a str) -> FsFuture<'a, DavNodeRef>;

    /// All children.
    fn get_children(&self) -> FsFuture<'_, Vec<DavNodeRef>>;

    /// Create a new file.
    fn create_file<'a>(&'a self, name: &'a str, data: ByteStream) -> FsFuture<'a, ()>;

    /// Create a new, empty, collection.
    fn create_directory<'a>(&'a self, name: &'a str) -> FsFuture<'a, ()>;

    /// Does a child exist.
    fn child_exists<'a>(&'a self, name: &'a str) -> FsFuture<'a, bool> {
        async move {
            match self.get_child(name).await {
                Ok(_) => Ok(true),
                Err(FsError::NotFound) => Ok(false),
                Err(e) => Err(e),
            }
        }
        .boxed()
    }

    /// Optimized copy into this collection, if supported.
    fn copy_target(&self) -> Option<&dyn DavCopyTarget> {
        None
    }

    /// Optimized move into this collection, if supported.
    fn move_target(&self) -> Option<&dyn DavMoveTarget> {
        None
    }

    /// Batched child lookup, if supported.
    fn multi_get(&self) -> Option<&dyn DavMultiGet> {
        None
    }
}

/// A collection that can copy nodes into itself without help.
pub trait DavCopyTarget: Send + Sync {
    /// Copy `source` (found at tree path `source_path`) into this collection
    /// as `target_name`. Returns `false` to fall back to a generic copy.
    fn copy_into<'a>(
        &'a self,
        target_name: &'a str,
        source_path: &'a str,
        source: &'a DavNodeRef,
        depth: Depth,
    ) -> FsFuture<'a, bool>;
}

/// A collection that can move nodes into itself without help.
pub trait DavMoveTarget: Send + Sync {
    /// Move `source` (found at tree path `source_path`) into this collection
    /// as `target_name`. Returns `false` to fall back to copy + delete.
    fn move_into<'a>(
        &'a self,
        target_name: &'a str,
        source_path: &'a str,
        source: &'a DavNodeRef,
    ) -> FsFuture<'a, bool>;
}

/// A collection that can fetch several children at once.
pub trait DavMultiGet: Send + Sync {
    /// Children that do not exist are left out of the result.
    fn get_multiple_children<'a>(&'a self, names: &'a [String]) -> FsFuture<'a, Vec<DavNodeRef>>;
}

/// A webdav "dead property".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavProp {
    /// Name of the property.
    pub name: String,
    /// XML prefix.
    pub prefix: Option<String>,
    /// XML namespace.
    pub namespace: Option<String>,
    /// Value of the property as raw XML.
    pub xml: Option<Vec<u8>>,
}

impl DavProp {
    /// "{namespace}name".
    pub fn clark_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{{{}}}{}", ns, self.name),
            None => self.name.clone(),
        }
    }
}

/// Dead property storage of a node.
pub trait DavProperties: Send + Sync {
    /// All stored properties, with their values.
    fn get_props(&self) -> FsFuture<'_, Vec<DavProp>>;

    /// Set (`true`) or remove (`false`) properties. Returns a status per
    /// property.
    fn patch_props(&self, patch: Vec<(bool, DavProp)>) -> FsFuture<'_, Vec<(StatusCode, DavProp)>>;
}

/// A node that carries an ACL.
pub trait DavAccessControl: Send + Sync {
    /// Principal uri of the owner.
    fn owner(&self) -> Option<String>;

    /// Principal uri of the group.
    fn group(&self) -> Option<String> {
        None
    }

    /// The access control list, in order.
    fn acl(&self) -> Vec<Ace>;

    /// Replace the access control list.
    fn set_acl(&self, acl: Vec<Ace>) -> FsFuture<'_, ()>;
}

impl std::fmt::Display for FsError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Error for FsError {
    fn description(&self) -> &str {
        "DavFileSystem error"
    }
    fn cause(&self) -> Option<&dyn Error> {
        None
    }
}

impl From<&io::Error> for FsError {
    fn from(e: &io::Error) -> Self {
        use io::ErrorKind;
        if let Some(errno) = e.raw_os_error() {
            // specific errors.
            #[cfg(all(unix, feature = "libc"))]
            match errno {
                libc::EMLINK | libc::ENOSPC | libc::EDQUOT => return FsError::InsufficientStorage,
                libc::EFBIG => return FsError::TooLarge,
                libc::EACCES | libc::EPERM => return FsError::Forbidden,
                libc::ENOTEMPTY | libc::EEXIST => return FsError::Exists,
                libc::ELOOP => return FsError::LoopDetected,
                libc::ENAMETOOLONG => return FsError::PathTooLong,
                libc::ENOTDIR => return FsError::Conflict,
                libc::EISDIR => return FsError::Forbidden,
                libc::EROFS => return FsError::Forbidden,
                libc::ENOENT => return FsError::NotFound,
                libc::ENOSYS => return FsError::NotImplemented,
                libc::EXDEV => return FsError::IsRemote,
                _ => {}
            }
            #[cfg(not(all(unix, feature = "libc")))]
            let _ = errno;
        }
        match e.kind() {
            ErrorKind::NotFound => FsError::NotFound,
            ErrorKind::PermissionDenied => FsError::Forbidden,
            ErrorKind::AlreadyExists => FsError::Exists,
            _ => FsError::GeneralFailure,
        }
    }
}

impl From<io::Error> for FsError {
    fn from(e: io::Error) -> Self {
        (&e).into()
    }
}

impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        let kind = match e {
            FsError::NotFound => io::ErrorKind::NotFound,
            FsError::Forbidden => io::ErrorKind::PermissionDenied,
            FsError::Exists => io::ErrorKind::AlreadyExists,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}
