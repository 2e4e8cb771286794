use std::cmp::Ordering;

use headers::HeaderMapExt;
use htmlescape::encode_minimal;
use http::{status::StatusCode, Request, Response};

use crate::acl::PRIV_READ;
use crate::body::Body;
use crate::conditional::http_preconditions;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::tree::Tree;
use crate::util::systemtime_to_httpdate;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_get(&self, req: &Request<()>, tree: &Tree) -> DavResult<Response<Body>> {
        let head = req.method() == http::Method::HEAD;
        let mut path = self.path(req)?;
        let tree_path = path.as_tree_path();

        let node = tree.get_node_for_path(&tree_path).await?;
        self.check_acl(tree, &tree_path, &[PRIV_READ], false).await?;

        let mut res = Response::new(Body::empty());
        if node.is_collection() {
            if self.autoindex != Some(true) {
                debug!("GET on collection {path} without autoindex");
                return Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED));
            }
            self.fixpath(&mut res, &mut path, &node);
            return self.handle_autoindex(tree, &path, res, head).await;
        }

        if let Some(status) = http_preconditions(req.method(), req.headers(), Some(&node)) {
            let mut res = Response::new(Body::empty());
            *res.status_mut() = status;
            return Ok(res);
        }

        let file = node.as_file().ok_or(DavError::Status(StatusCode::METHOD_NOT_ALLOWED))?;
        let len = file.size();
        let content_type = file.content_type().unwrap_or_else(|| {
            mime_guess::from_path(node.name())
                .first_or_octet_stream()
                .to_string()
        });

        let h = res.headers_mut();
        h.typed_insert(headers::ContentLength(len));
        h.typed_insert(headers::AcceptRanges::bytes());
        if let Ok(ct) = content_type.parse() {
            h.insert("content-type", ct);
        }
        if let Some(etag) = node.etag() {
            if let Ok(v) = format!("\"{etag}\"").parse() {
                h.insert("etag", v);
            }
        }
        if let Some(m) = node.last_modified() {
            if let Ok(v) = systemtime_to_httpdate(m).parse() {
                h.insert("last-modified", v);
            }
        }

        if head {
            return Ok(res);
        }
        *res.body_mut() = Body::from(file.get().await?);
        Ok(res)
    }

    async fn handle_autoindex(
        &self,
        tree: &Tree,
        path: &DavPath,
        mut res: Response<Body>,
        head: bool,
    ) -> DavResult<Response<Body>> {
        let tree_path = path.as_tree_path();
        let mut entries = Vec::new();
        for child in tree.get_children(&tree_path).await? {
            let name = child.name();
            if self.acl.hide_nodes_from_listings {
                let child_path = crate::davpath::join(&tree_path, &name);
                let missing = self.acl.missing_privileges(&child, self.principal(), &[PRIV_READ]);
                if !missing.is_empty() {
                    trace!("autoindex: hiding {child_path}");
                    continue;
                }
            }
            entries.push(child);
        }
        // collections first, then by name.
        entries.sort_by(|a, b| match (a.is_collection(), b.is_collection()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => a.name().cmp(&b.name()),
        });

        let title = encode_minimal(&path.with_prefix());
        let mut w = String::new();
        w.push_str("<html><head>");
        w.push_str(&format!("<title>Index of {title}</title>"));
        w.push_str("<style>table { border-collapse: collapse; } ");
        w.push_str("td, th { padding: 0.2em 1em; text-align: left; }</style>");
        w.push_str("</head><body>");
        w.push_str(&format!("<h1>Index of {title}</h1>"));
        w.push_str("<table><tr><th>Name</th><th>Last modified</th><th>Size</th></tr>");
        if !path.is_root() {
            w.push_str("<tr><td><a href=\"..\">Parent Directory</a></td><td></td><td></td></tr>");
        }
        for child in &entries {
            let mut href = path.join(&child.name());
            let mut name = encode_minimal(&child.name());
            if child.is_collection() {
                href.add_slash();
                name.push('/');
            }
            let modified = child
                .last_modified()
                .map(systemtime_to_httpdate)
                .unwrap_or_default();
            let size = match child.as_file() {
                Some(f) => f.size().to_string(),
                None => String::new(),
            };
            w.push_str(&format!(
                "<tr><td><a href=\"{}\">{}</a></td><td>{}</td><td>{}</td></tr>",
                encode_minimal(&href.with_prefix()),
                name,
                modified,
                size
            ));
        }
        w.push_str("</table></body></html>\n");

        let h = res.headers_mut();
        h.insert(
            "content-type",
            http::HeaderValue::from_static("text/html; charset=utf-8"),
        );
        h.typed_insert(headers::ContentLength(w.len() as u64));
        if !head {
            *res.body_mut() = Body::from(w);
        }
        Ok(res)
    }
}
