use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::acl::{PRIV_BIND, PRIV_READ, PRIV_UNBIND};
use crate::body::Body;
use crate::davheaders::{self, Depth};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::tree::Tree;
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavHandler {
    /// Parse the Destination: header into a path below our prefix.
    fn destination(&self, req: &Request<()>) -> DavResult<DavPath> {
        let dest = match req.headers().typed_get::<davheaders::Destination>() {
            Some(d) => d.0,
            None => return Err(DavError::Status(StatusCode::BAD_REQUEST)),
        };
        let dest_path = if dest.starts_with('/') {
            dest
        } else {
            let url = url::Url::parse(&dest).map_err(|_| DavError::Status(StatusCode::BAD_REQUEST))?;
            if let (Some(host), Some(req_host)) = (url.host_str(), req.uri().host()) {
                if !host.eq_ignore_ascii_case(req_host) {
                    return Err(DavError::Status(StatusCode::BAD_GATEWAY));
                }
            }
            url.path().to_string()
        };
        Ok(DavPath::from_str_and_prefix(&dest_path, &self.prefix)?)
    }

    pub(crate) async fn handle_copymove(
        &self,
        req: &Request<()>,
        tree: &Tree,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        let is_move = method == DavMethod::MOVE;
        let path = self.path(req)?;
        let dest = self.destination(req)?;
        let (src_tp, dst_tp) = (path.as_tree_path(), dest.as_tree_path());

        // source must exist.
        let node = tree.get_node_for_path(&src_tp).await?;

        if path == dest {
            return Err(DavError::Status(StatusCode::FORBIDDEN));
        }
        if path.is_ancestor_of(&dest) || (is_move && path.is_root()) {
            return Err(DavError::Status(StatusCode::FORBIDDEN));
        }
        // overwriting an ancestor would delete the source first.
        if dest.is_ancestor_of(&path) {
            debug!("{method:?} {path} -> {dest}: destination is an ancestor");
            return Err(DavError::Status(StatusCode::FORBIDDEN));
        }

        // COPY defaults to infinity, MOVE must be infinity.
        let depth = match davheaders::depth(req.headers(), Depth::Infinity) {
            Depth::Infinity => Depth::Infinity,
            Depth::Finite(0) if !is_move => Depth::ZERO,
            Depth::Finite(1) if !is_move && !node.is_collection() => Depth::ZERO,
            _ => return Err(DavError::Status(StatusCode::BAD_REQUEST)),
        };

        let overwrite = req
            .headers()
            .typed_get::<davheaders::Overwrite>()
            .map_or(true, |o| o.0);
        let dest_exists = tree.node_exists(&dst_tp).await;

        // access control.
        if is_move {
            self.check_parent_acl(tree, &path, &[PRIV_UNBIND]).await?;
        } else {
            self.check_acl(tree, &src_tp, &[PRIV_READ], !depth.is_zero()).await?;
        }
        if dest_exists {
            self.check_parent_acl(tree, &dest, &[PRIV_BIND, PRIV_UNBIND]).await?;
        } else {
            self.check_parent_acl(tree, &dest, &[PRIV_BIND]).await?;
        }

        // locks.
        let tokens = self.if_tokens(tree, req, &path).await?;
        if is_move {
            self.check_locks(&path, true, &tokens).await?;
        }
        self.check_locks(&dest, true, &tokens).await?;

        if dest_exists {
            if !overwrite {
                debug!("{method:?} {path} -> {dest}: destination exists");
                return Err(DavError::Status(StatusCode::PRECONDITION_FAILED));
            }
            tree.delete(&dst_tp).await?;
            self.delete_locks(&dest).await?;
        }

        if is_move {
            tree.move_node(&src_tp, &dst_tp).await?;
            self.delete_locks(&path).await?;
        } else {
            tree.copy(&src_tp, &dst_tp, depth).await?;
        }

        let mut res = Response::new(Body::empty());
        *res.status_mut() = if dest_exists {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        };
        res.headers_mut().typed_insert(headers::ContentLength(0));
        Ok(res)
    }
}
