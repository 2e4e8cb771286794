//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::{self, buf::Buf};
use futures_util::stream::Stream;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::acl::{AclConfig, AclError};
use crate::body::{Body, StreamBody};
use crate::conditional::if_header_match;
use crate::davheaders;
use crate::davpath::{self, DavPath};
use crate::errors::{DavCondition, DavError};
use crate::fs::*;
use crate::ls::*;
use crate::tree::Tree;
use crate::util::{dav_method, DavMethod};
use crate::xmltree_ext;
use crate::DavResult;

pub(crate) mod handle_acl;
pub(crate) mod handle_copymove;
pub(crate) mod handle_delete;
pub(crate) mod handle_gethead;
pub(crate) mod handle_lock;
pub(crate) mod handle_mkcol;
pub(crate) mod handle_options;
pub(crate) mod handle_props;
pub(crate) mod handle_put;
pub(crate) mod handle_report;

// Request bodies of anything but PUT are parsed in memory.
const MAX_XML_BODY_SIZE: usize = 65536;
const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024 * 1024;
const DEFAULT_MAX_LOCK_TIMEOUT: Duration = Duration::from_secs(86400);

/// Configuration of the handler.
#[derive(Clone)]
pub struct DavBuilder {
    /// Prefix to be stripped off when handling request.
    prefix: String,
    /// Filesystem backend.
    fs: FileSystem,
    /// Locksystem backend.
    ls: Option<LockSystem>,
    /// Set of allowed methods (Defaults to "all methods")
    allow: DavMethod,
    /// Principal is webdav speak for "user", used to give locks an owner
    /// and to evaluate ACLs.
    principal: Option<String>,
    /// Does GET on a directory return indexes.
    autoindex: Option<bool>,
    /// Maximum size of a PUT body in bytes.
    max_body_size: usize,
    /// Upper bound (and default) of lock timeouts.
    max_lock_timeout: Duration,
    /// Access control configuration.
    acl: AclConfig,
    /// Send a `Server:` header with our version.
    expose_version: bool,
}

/// File system backend.
#[derive(Clone)]
pub enum FileSystem {
    #[cfg(any(docsrs, feature = "memfs"))]
    Mem,
    #[cfg(any(docsrs, feature = "localfs"))]
    Local {
        /// Path to the root directory.
        base: PathBuf,
        /// Create files world readable.
        public: bool,
    },
    /// Any other backend.
    Custom(Arc<dyn DavFileSystem>),
}

impl FileSystem {
    /// Serve a local directory
    #[cfg(any(docsrs, feature = "localfs"))]
    pub fn local(path: impl Into<PathBuf>, public: bool) -> Self {
        FileSystem::Local {
            base: path.into(),
            public,
        }
    }

    fn build(self) -> Arc<dyn DavFileSystem> {
        match self {
            #[cfg(any(docsrs, feature = "memfs"))]
            FileSystem::Mem => crate::fs::memfs::MemFs::new(),
            #[cfg(any(docsrs, feature = "localfs"))]
            FileSystem::Local { base, public } => crate::fs::localfs::LocalFs::new(base, public),
            FileSystem::Custom(fs) => fs,
        }
    }
}

/// Lock system backend.
#[derive(Default, Clone, Debug)]
pub enum LockSystem {
    #[default]
    Mem,
    /// Locks in a file, shared between processes.
    #[cfg(any(docsrs, feature = "localfs"))]
    File(PathBuf),
}

impl LockSystem {
    fn build(self) -> Arc<dyn DavLockSystem> {
        match self {
            LockSystem::Mem => MemLs::new(),
            #[cfg(any(docsrs, feature = "localfs"))]
            LockSystem::File(path) => FileLs::new(path),
        }
    }
}

impl DavBuilder {
    /// Create a new configuration builder.
    pub fn new(fs: FileSystem) -> DavBuilder {
        Self {
            prefix: String::new(),
            fs,
            ls: None,
            allow: DavMethod::all(),
            principal: None,
            autoindex: None,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_lock_timeout: DEFAULT_MAX_LOCK_TIMEOUT,
            acl: AclConfig::default(),
            expose_version: false,
        }
    }

    /// Use the configuration that was built to generate a DavConfig.
    pub fn build(self) -> DavHandler {
        self.into()
    }

    /// Prefix to be stripped off before translating the rest of
    /// the request path to a tree path.
    pub fn strip_prefix(self, prefix: impl Into<String>) -> Self {
        let mut this = self;
        this.prefix = prefix.into();
        this
    }

    /// Set the locksystem to use.
    pub fn locksystem(self, ls: LockSystem) -> Self {
        let mut this = self;
        this.ls = Some(ls);
        this
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(self, allow: DavMethod) -> Self {
        let mut this = self;
        this.allow = allow;
        this
    }

    /// Set the name of the "webdav principal". This will be the owner of any created locks.
    pub fn principal(self, principal: impl Into<String>) -> Self {
        let mut this = self;
        this.principal = Some(principal.into());
        this
    }

    /// Does a GET on a directory produce a directory index.
    pub fn autoindex(self, autoindex: bool) -> Self {
        let mut this = self;
        this.autoindex = Some(autoindex);
        this
    }

    /// Maximum size of a PUT body in bytes.
    pub fn max_body_size(self, size: usize) -> Self {
        let mut this = self;
        this.max_body_size = size;
        this
    }

    /// Maximum lock timeout. Locks requested without a timeout, with an
    /// infinite timeout, or with a longer one get this value.
    pub fn max_lock_timeout(self, timeout: Duration) -> Self {
        let mut this = self;
        this.max_lock_timeout = timeout;
        this
    }

    /// Access control configuration.
    pub fn acl(self, acl: AclConfig) -> Self {
        let mut this = self;
        this.acl = acl;
        this
    }

    /// Add a `Server: dav-engine/<version>` header to every response.
    pub fn expose_version(self, expose: bool) -> Self {
        let mut this = self;
        this.expose_version = expose;
        this
    }
}

/// The webdav handler struct.
///
/// The `new` and `build` etc methods are used to instantiate a handler.
///
/// The `handle` and `handle_with` methods are the methods that do the actual work.
#[derive(Clone)]
pub struct DavHandler {
    pub(crate) prefix: Arc<String>,
    pub(crate) fs: Arc<dyn DavFileSystem>,
    pub(crate) ls: Option<Arc<dyn DavLockSystem>>,
    pub(crate) allow: DavMethod,
    pub(crate) principal: Option<Arc<String>>,
    pub(crate) autoindex: Option<bool>,
    pub(crate) max_body_size: usize,
    pub(crate) max_lock_timeout: Duration,
    pub(crate) acl: Arc<AclConfig>,
    pub(crate) expose_version: bool,
}

impl From<DavBuilder> for DavHandler {
    fn from(cfg: DavBuilder) -> Self {
        Self {
            prefix: Arc::new(cfg.prefix),
            fs: cfg.fs.build(),
            ls: cfg.ls.map(|ls| ls.build()),
            allow: cfg.allow,
            principal: cfg.principal.map(Arc::new),
            autoindex: cfg.autoindex,
            max_body_size: cfg.max_body_size,
            max_lock_timeout: cfg.max_lock_timeout,
            acl: Arc::new(cfg.acl),
            expose_version: cfg.expose_version,
        }
    }
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder(fs: FileSystem) -> DavBuilder {
        DavBuilder::new(fs)
    }

    /// Handle a webdav request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        self.handle_inner(req).await
    }

    /// Handle a webdav request, overriding parts of the config.
    ///
    /// For example, the `principal` can be set for this request, after
    /// the http server has authenticated the user.
    pub async fn handle_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        prefix: Option<String>,
        principal: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        let mut this = self.clone();
        if let Some(prefix) = prefix {
            this.prefix = Arc::new(format!(
                "{}/{}",
                this.prefix.strip_suffix('/').unwrap_or(&this.prefix),
                prefix.strip_prefix('/').unwrap_or(&prefix)
            ));
        }
        if let Some(principal) = principal {
            this.principal = Some(Arc::new(principal));
        }
        this.handle_inner(req).await
    }

    /// Handles a request with a `Stream` body instead of a `HttpBody`.
    /// Used with webserver frameworks that have not
    /// opted to use the `http_body` crate just yet.
    #[doc(hidden)]
    pub async fn handle_stream<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: Stream<Item = Result<ReqData, ReqError>>,
    {
        let req = {
            let (parts, body) = req.into_parts();
            Request::from_parts(parts, StreamBody::new(body))
        };
        self.handle_inner(req).await
    }
}

impl DavHandler {
    // helper.
    pub(crate) fn path(&self, req: &Request<()>) -> DavResult<DavPath> {
        Ok(DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?)
    }

    pub(crate) fn principal(&self) -> Option<&str> {
        self.principal.as_deref().map(|s| s.as_str())
    }

    // href of a tree path.
    pub(crate) fn href(&self, tree_path: &str) -> String {
        DavPath::from_tree_path(tree_path, &self.prefix).with_prefix()
    }

    // See if this is a collection and if so, if we have
    // to fixup the path by adding a slash at the end.
    pub(crate) fn fixpath(&self, res: &mut Response<Body>, path: &mut DavPath, node: &DavNodeRef) {
        if node.is_collection() && !path.is_collection() {
            path.add_slash();
            let newloc = path.with_prefix();
            res.headers_mut()
                .typed_insert(davheaders::ContentLocation(newloc));
        }
    }

    /// Check that the current principal holds `privileges` on `tree_path`.
    pub(crate) async fn check_acl(
        &self,
        tree: &Tree,
        tree_path: &str,
        privileges: &[&str],
        recursive: bool,
    ) -> DavResult<()> {
        let res = self
            .acl
            .check_privilege(tree, tree_path, self.principal(), privileges, recursive)
            .await;
        match res {
            Ok(()) => Ok(()),
            Err(AclError::NeedPrivileges { path, privileges }) => Err(DavError::Condition(
                StatusCode::FORBIDDEN,
                DavCondition::NeedPrivileges {
                    href: self.href(&path),
                    privileges,
                },
            )),
            Err(AclError::Fs(e)) => Err(e.into()),
        }
    }

    /// Check privileges on the parent collection of `path`, which must
    /// exist and be a collection (409 otherwise).
    pub(crate) async fn check_parent_acl(
        &self,
        tree: &Tree,
        path: &DavPath,
        privileges: &[&str],
    ) -> DavResult<()> {
        let tree_path = path.as_tree_path();
        let (parent, _) = davpath::split(&tree_path);
        match tree.lookup(parent).await? {
            Some(p) if p.is_collection() => {}
            _ => return Err(StatusCode::CONFLICT.into()),
        }
        self.check_acl(tree, parent, privileges, false).await
    }

    /// Evaluate the `If:` header, if present. Returns the lock tokens that
    /// were submitted and are valid.
    pub(crate) async fn if_tokens(
        &self,
        tree: &Tree,
        req: &Request<()>,
        path: &DavPath,
    ) -> DavResult<Vec<String>> {
        let hdr = match req.headers().typed_try_get::<davheaders::If>() {
            Ok(Some(hdr)) => hdr,
            Ok(None) => return Ok(Vec::new()),
            Err(_) => return Err(StatusCode::BAD_REQUEST.into()),
        };
        let (ok, tokens) = if_header_match(tree, self.ls.as_deref(), &hdr, path).await?;
        if !ok {
            debug!("if header {hdr} does not match");
            return Err(StatusCode::PRECONDITION_FAILED.into());
        }
        Ok(tokens)
    }

    /// Fail with 423 if `path` is locked and a token was not submitted.
    pub(crate) async fn check_locks(&self, path: &DavPath, deep: bool, tokens: &[String]) -> DavResult<()> {
        if let Some(ls) = &self.ls {
            ls.check(path, self.principal(), false, deep, tokens).await?;
        }
        Ok(())
    }

    /// Remove the locks at and below `path`.
    pub(crate) async fn delete_locks(&self, path: &DavPath) -> DavResult<()> {
        if let Some(ls) = &self.ls {
            ls.delete(path).await?;
        }
        Ok(())
    }

    // drain request body and return length.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        pin_utils::pin_mut!(body);
        while let Some(res) = body.data().await {
            let mut buf = res.map_err(|_| {
                DavError::IoError(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "UnexpectedEof",
                ))
            })?;
            while buf.has_remaining() {
                if data.len() + buf.remaining() > max_size {
                    return Err(StatusCode::PAYLOAD_TOO_LARGE.into());
                }
                let b = buf.chunk();
                let l = b.len();
                data.extend_from_slice(b);
                buf.advance(l);
            }
        }
        Ok(data)
    }

    fn error_response(&self, err: &DavError) -> Response<Body> {
        let mut resp = Response::builder().status(err.statuscode());
        if err.must_close() {
            resp = resp.header("connection", "close");
        }
        let body = match err.condition().map(|c| xmltree_ext::to_xml_bytes(&c.to_element())) {
            Some(Ok(xml)) => {
                resp = resp
                    .header("content-type", "application/xml; charset=utf-8")
                    .header("content-length", xml.len().to_string());
                Body::from(xml)
            }
            _ => {
                resp = resp.header("content-length", "0");
                Body::empty()
            }
        };
        resp.body(body).unwrap_or_else(|_| {
            let mut r = Response::new(Body::empty());
            *r.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            r
        })
    }

    // internal dispatcher.
    async fn handle_inner<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        // Turn any DavError results into a HTTP error response.
        let mut resp = match self.handle2(req).await {
            Ok(resp) => {
                debug!("== END REQUEST result {}", resp.status());
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                if err.statuscode().is_server_error() {
                    warn!("request failed: {err}");
                }
                self.error_response(&err)
            }
        };
        if self.expose_version {
            let server = format!("dav-engine/{}", env!("CARGO_PKG_VERSION"));
            if let Ok(v) = server.parse() {
                resp.headers_mut().insert("server", v);
            }
        }
        resp
    }

    // internal dispatcher part 2.
    async fn handle2<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        // debug when running the webdav litmus tests.
        if log_enabled!(log::Level::Debug) {
            if let Some(t) = req.headers().typed_get::<davheaders::XLitmus>() {
                debug!("X-Litmus: {:?}", t);
            }
        }

        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return Err(e);
            }
        };

        // see if method is allowed.
        if !self.allow.contains(method) {
            debug!(
                "method {} not allowed on request {}",
                req.method(),
                req.uri()
            );
            return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
        }

        // make sure the request path is valid.
        let path = DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?;

        // Not all methods accept a body.
        let max_size = if method == DavMethod::PUT {
            self.max_body_size
        } else {
            MAX_XML_BODY_SIZE
        };
        let body_data = self.read_request(body, max_size).await?;
        if !DavMethod::WEBDAV_BODY.contains(method) && !body_data.is_empty() {
            return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
        }

        debug!("== START REQUEST {:?} {}", method, path);

        // every request gets its own view on the tree.
        let tree = Tree::new(self.fs.root().await?);

        match req.method().as_str() {
            "OPTIONS" => self.handle_options(&req, &tree).await,
            "PROPFIND" => self.handle_propfind(&req, &tree, &body_data).await,
            "PROPPATCH" => self.handle_proppatch(&req, &tree, &body_data).await,
            "MKCOL" => self.handle_mkcol(&req, &tree).await,
            "DELETE" => self.handle_delete(&req, &tree).await,
            "LOCK" => self.handle_lock(&req, &tree, &body_data).await,
            "UNLOCK" => self.handle_unlock(&req, &tree).await,
            "HEAD" | "GET" => self.handle_get(&req, &tree).await,
            "COPY" | "MOVE" => self.handle_copymove(&req, &tree, method).await,
            "PUT" => self.handle_put(&req, &tree, body_data).await,
            "ACL" => self.handle_acl(&req, &tree, &body_data).await,
            "REPORT" => self.handle_report(&req, &tree, &body_data).await,
            _ => Err(DavError::UnknownDavMethod),
        }
    }
}
