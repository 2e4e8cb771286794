//! ## WebDAV tree, locking and access-control engine
//!
//! This crate implements the server side of [`Webdav`] (RFC4918) together
//! with [`WebDAV-ACL`] (RFC3744). A [`DavHandler`] takes an `http::Request`,
//! checks the privileges of the current principal, validates locks and the
//! `If` header, mutates a tree of nodes and encodes the result as an
//! `http::Response`.
//!
//! Supported methods are OPTIONS, GET, HEAD, PUT, DELETE, MKCOL, COPY, MOVE,
//! PROPFIND, PROPPATCH, LOCK, UNLOCK, ACL and REPORT.
//!
//! ## Backend interfaces.
//!
//! - a [filesystem][fs::DavFileSystem] hands out the root of a tree of
//!   [nodes][fs::DavNode]. Dead properties, access control lists, optimized
//!   copy and move and batched lookups are optional node capabilities.
//! - a [locksystem][ls::DavLockSystem] stores lock records. Without one the
//!   handler does not advertise DAV class 2.
//! - [`acl::AclConfig`] holds the privilege hierarchy, admin principals,
//!   group membership and the ACL used for nodes that carry none.
//!
//! Requests and responses use the `http` and `http_body` types, so the
//! handler plugs into hyper and similar servers directly.
//!
//! ## Backends.
//!
//! - [`LocalFs`](fs::LocalFs): a directory on the local filesystem.
//! - [`MemFs`](fs::MemFs): an in-memory tree with dead properties and ACLs.
//! - [`MemLs`](ls::MemLs): locks kept in memory.
//! - [`FileLs`](ls::FileLs): locks kept in a file that several processes share.
//!
//! ## Example.
//!
//! Serve /tmp over [hyper]. Every request runs as principal `/principals/admin`,
//! which the default ACL lets read and write.
//!
//! ```no_run
//! use std::convert::Infallible;
//! use dav_engine::{DavHandler, FileSystem, LockSystem};
//!
//! #[tokio::main]
//! async fn main() {
//!     let dir = "/tmp";
//!     let addr = ([127, 0, 0, 1], 4918).into();
//!
//!     let dav_server = DavHandler::builder(FileSystem::local(dir, false))
//!         .locksystem(LockSystem::Mem)
//!         .principal("/principals/admin")
//!         .build();
//!
//!     let make_service = hyper::service::make_service_fn(move |_| {
//!         let dav_server = dav_server.clone();
//!         async move {
//!             let func = move |req| {
//!                 let dav_server = dav_server.clone();
//!                 async move {
//!                     Ok::<_, Infallible>(dav_server.handle(req).await)
//!                 }
//!             };
//!             Ok::<_, Infallible>(hyper::service::service_fn(func))
//!         }
//!     });
//!
//!     println!("Serving {} on {}", dir, addr);
//!     let _ = hyper::Server::bind(&addr)
//!         .serve(make_service)
//!         .await
//!         .map_err(|e| eprintln!("server error: {}", e));
//! }
//! ```
//!
//! [`Webdav`]: https://tools.ietf.org/html/rfc4918
//! [`WebDAV-ACL`]: https://tools.ietf.org/html/rfc3744
//! [hyper]: https://hyper.rs/

#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod conditional;
mod davhandler;
mod errors;
mod util;
mod xmltree_ext;

pub mod acl;
pub mod body;
pub mod davheaders;
pub mod davpath;
pub mod fs;
pub mod ls;
pub mod tree;

use crate::errors::DavResult;

pub use crate::davhandler::{DavBuilder, DavHandler, FileSystem, LockSystem};
pub use crate::errors::{DavCondition, DavError};
pub use crate::util::DavMethod;
