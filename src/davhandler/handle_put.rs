use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::acl::{PRIV_BIND, PRIV_WRITE_CONTENT};
use crate::body::Body;
use crate::conditional::http_preconditions;
use crate::davpath;
use crate::errors::DavError;
use crate::fs::*;
use crate::tree::Tree;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_put(
        &self,
        req: &Request<()>,
        tree: &Tree,
        body: Vec<u8>,
    ) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        let tree_path = path.as_tree_path();
        if path.is_root() || path.is_collection() {
            return Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED));
        }
        // partial PUT is not supported.
        if req.headers().contains_key("content-range") {
            return Err(DavError::Status(StatusCode::NOT_IMPLEMENTED));
        }

        let node = tree.lookup(&tree_path).await?;
        match &node {
            Some(n) if n.is_collection() => {
                return Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED));
            }
            Some(_) => {
                self.check_acl(tree, &tree_path, &[PRIV_WRITE_CONTENT], false)
                    .await?
            }
            None => self.check_parent_acl(tree, &path, &[PRIV_BIND]).await?,
        }

        let tokens = self.if_tokens(tree, req, &path).await?;
        self.check_locks(&path, false, &tokens).await?;

        if let Some(status) = http_preconditions(req.method(), req.headers(), node.as_ref()) {
            return Err(DavError::Status(status));
        }

        let len = body.len();
        let status = match &node {
            Some(n) => {
                let file = n.as_file().ok_or(DavError::Status(StatusCode::METHOD_NOT_ALLOWED))?;
                file.put(bytes_stream(body)).await?;
                tree.mark_dirty(&tree_path);
                StatusCode::NO_CONTENT
            }
            None => {
                let (parent, name) = davpath::split(&tree_path);
                let parent = tree.get_node_for_path(parent).await?;
                let coll = parent.as_collection().ok_or(DavError::Status(StatusCode::CONFLICT))?;
                coll.create_file(name, bytes_stream(body)).await?;
                tree.mark_dirty(&tree_path);
                StatusCode::CREATED
            }
        };
        debug!("PUT {path}: {len} bytes, {status}");

        let mut res = Response::new(Body::empty());
        *res.status_mut() = status;
        res.headers_mut().typed_insert(headers::ContentLength(0));
        if let Ok(Some(n)) = tree.lookup(&tree_path).await {
            if let Some(etag) = n.etag() {
                if let Ok(v) = format!("\"{etag}\"").parse() {
                    res.headers_mut().insert("etag", v);
                }
            }
        }
        Ok(res)
    }
}
