use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::acl::PRIV_BIND;
use crate::body::Body;
use crate::davpath;
use crate::errors::DavError;
use crate::tree::Tree;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_mkcol(&self, req: &Request<()>, tree: &Tree) -> DavResult<Response<Body>> {
        let mut path = self.path(req)?;
        let tree_path = path.as_tree_path();

        // existing resource, including the root.
        if tree.node_exists(&tree_path).await {
            return Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED));
        }
        self.check_parent_acl(tree, &path, &[PRIV_BIND]).await?;

        let tokens = self.if_tokens(tree, req, &path).await?;
        self.check_locks(&path, false, &tokens).await?;

        let (parent, name) = davpath::split(&tree_path);
        let parent = tree.get_node_for_path(parent).await?;
        let coll = parent
            .as_collection()
            .ok_or(DavError::Status(StatusCode::CONFLICT))?;
        coll.create_directory(name).await?;
        tree.mark_dirty(&tree_path);
        trace!("MKCOL {path}");

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::CREATED;
        res.headers_mut().typed_insert(headers::ContentLength(0));
        if !path.is_collection() {
            path.add_slash();
        }
        if let Ok(loc) = path.with_prefix().parse() {
            res.headers_mut().insert("location", loc);
        }
        Ok(res)
    }
}
