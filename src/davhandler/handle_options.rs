use headers::HeaderMapExt;
use http::{HeaderValue, Request, Response};

use crate::acl::PRIV_READ;
use crate::body::Body;
use crate::tree::Tree;
use crate::util::{dav_method, method_names, DavMethod};
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_options(&self, req: &Request<()>, tree: &Tree) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        let path = self.path(req)?;
        let method = dav_method(req.method()).unwrap_or(DavMethod::OPTIONS);
        let is_star = path.is_star() && method == DavMethod::OPTIONS;

        let node = if is_star {
            None
        } else {
            tree.lookup(&path.as_tree_path()).await?
        };
        if node.is_some() {
            self.check_acl(tree, &path.as_tree_path(), &[PRIV_READ], false)
                .await?;
        }

        // Only advertise class 2 if there is a locksystem.
        let dav = if self.ls.is_some() {
            "1, 2, 3, access-control"
        } else {
            "1, 3, access-control"
        };
        let h = res.headers_mut();
        h.insert("DAV", HeaderValue::from_static(dav));
        h.insert("MS-Author-Via", HeaderValue::from_static("DAV"));
        h.typed_insert(headers::ContentLength(0));

        let mut allowed = DavMethod::OPTIONS;
        match &node {
            None if !is_star => {
                allowed |= DavMethod::MKCOL | DavMethod::PUT | DavMethod::LOCK;
            }
            _ => {
                let is_file = node.as_ref().map(|n| n.is_file()).unwrap_or(false);
                if is_file || is_star {
                    allowed |= DavMethod::HEAD | DavMethod::GET | DavMethod::PUT;
                }
                allowed |= DavMethod::PROPFIND
                    | DavMethod::PROPPATCH
                    | DavMethod::COPY
                    | DavMethod::LOCK
                    | DavMethod::UNLOCK
                    | DavMethod::ACL
                    | DavMethod::REPORT;
                if !path.is_root() {
                    allowed |= DavMethod::MOVE | DavMethod::DELETE;
                }
            }
        }
        if self.ls.is_none() {
            allowed.remove(DavMethod::LOCK | DavMethod::UNLOCK);
        }
        allowed &= self.allow;

        let a = method_names(allowed).join(", ");
        if let Ok(a) = a.parse() {
            res.headers_mut().insert("allow", a);
        }
        Ok(res)
    }
}
