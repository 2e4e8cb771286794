use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::acl::PRIV_UNBIND;
use crate::body::Body;
use crate::conditional::http_preconditions;
use crate::davheaders::{self, Depth};
use crate::errors::DavError;
use crate::tree::Tree;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_delete(&self, req: &Request<()>, tree: &Tree) -> DavResult<Response<Body>> {
        // RFC4918 9.6.1 DELETE on collection must be depth infinity.
        if davheaders::depth(req.headers(), Depth::Infinity) != Depth::Infinity {
            return Err(DavError::Status(StatusCode::BAD_REQUEST));
        }

        let path = self.path(req)?;
        if path.is_root() {
            return Err(DavError::Status(StatusCode::FORBIDDEN));
        }
        let tree_path = path.as_tree_path();
        let node = tree.get_node_for_path(&tree_path).await?;

        self.check_parent_acl(tree, &path, &[PRIV_UNBIND]).await?;

        let tokens = self.if_tokens(tree, req, &path).await?;
        self.check_locks(&path, true, &tokens).await?;

        if let Some(status) = http_preconditions(req.method(), req.headers(), Some(&node)) {
            return Err(DavError::Status(status));
        }

        tree.delete(&tree_path).await?;
        self.delete_locks(&path).await?;

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::NO_CONTENT;
        res.headers_mut().typed_insert(headers::ContentLength(0));
        Ok(res)
    }
}
