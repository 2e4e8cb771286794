use http::{Request, Response, StatusCode};

use crate::acl::PRIV_READ;
use crate::body::Body;
use crate::errors::{DavCondition, DavError};
use crate::tree::Tree;
use crate::xmltree_ext::{self, ElementExt};
use crate::DavResult;

impl crate::DavHandler {
    // No report types are supported, but the request must still make sense.
    pub(crate) async fn handle_report(
        &self,
        req: &Request<()>,
        tree: &Tree,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let root = xmltree_ext::parse_xml(xmldata)?;
        let path = self.path(req)?;
        let tree_path = path.as_tree_path();
        tree.get_node_for_path(&tree_path).await?;
        self.check_acl(tree, &tree_path, &[PRIV_READ], false).await?;

        debug!("REPORT {path}: unsupported report {}", root.clark_name());
        Err(DavError::Condition(
            StatusCode::FORBIDDEN,
            DavCondition::SupportedReport,
        ))
    }
}
