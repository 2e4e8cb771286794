use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::acl::{self, PRIV_WRITE_ACL};
use crate::body::Body;
use crate::errors::{DavCondition, DavError};
use crate::tree::Tree;
use crate::xmltree_ext::{self, ElementExt};
use crate::DavResult;

impl crate::DavHandler {
    /// RFC3744 ACL method: replace the access control list of a resource.
    pub(crate) async fn handle_acl(
        &self,
        req: &Request<()>,
        tree: &Tree,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        let tree_path = path.as_tree_path();
        let node = tree.get_node_for_path(&tree_path).await?;

        self.check_acl(tree, &tree_path, &[PRIV_WRITE_ACL], false).await?;
        let tokens = self.if_tokens(tree, req, &path).await?;
        self.check_locks(&path, false, &tokens).await?;

        let ac = match node.access_control() {
            Some(ac) => ac,
            None => {
                debug!("ACL {path}: node has no access control");
                return Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED));
            }
        };

        let root = xmltree_ext::parse_xml(xmldata)?;
        if !root.is_dav("acl") {
            return Err(DavError::XmlParseError);
        }
        let forbidden = |c: DavCondition| DavError::Condition(StatusCode::FORBIDDEN, c);
        let new_acl = acl::parse_acl(&root).map_err(forbidden)?;
        self.acl
            .validate_acl(&new_acl, &ac.acl())
            .map_err(forbidden)?;

        debug!("ACL {path}: {} entries", new_acl.len());
        ac.set_acl(new_acl).await?;
        tree.mark_dirty(&tree_path);

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::OK;
        res.headers_mut().typed_insert(headers::ContentLength(0));
        Ok(res)
    }
}
