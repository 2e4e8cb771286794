use std::collections::HashMap;
use std::time::SystemTime;

use http::{Request, Response, StatusCode};
use xmltree::Element;

use crate::acl::{self, PRIV_READ, PRIV_READ_ACL, PRIV_READ_CUPS, PRIV_WRITE_PROPERTIES};
use crate::body::Body;
use crate::davheaders::{self, Depth};
use crate::davpath::{self, DavPath};
use crate::errors::{DavCondition, DavError};
use crate::fs::*;
use crate::tree::Tree;
use crate::util::{systemtime_to_httpdate, systemtime_to_rfc3339};
use crate::xmltree_ext::{self, ElementExt, NS_CALDAV_URI, NS_CARDDAV_URI};
use crate::DavResult;

use super::handle_lock::activelock_element;

// live properties returned by allprop.
const ALLPROP: &[&str] = &[
    "{DAV:}resourcetype",
    "{DAV:}getlastmodified",
    "{DAV:}creationdate",
    "{DAV:}getetag",
    "{DAV:}getcontentlength",
    "{DAV:}getcontenttype",
    "{DAV:}lockdiscovery",
    "{DAV:}supportedlock",
];

// live properties only returned when asked for.
const ACL_PROPS: &[&str] = &[
    "{DAV:}owner",
    "{DAV:}acl",
    "{DAV:}current-user-privilege-set",
    "{DAV:}supported-privilege-set",
    "{DAV:}acl-restrictions",
    "{DAV:}current-user-principal",
];

fn is_live(name: &str) -> bool {
    ALLPROP.contains(&name) || ACL_PROPS.contains(&name)
}

// What a PROPFIND asks for.
#[derive(Debug, PartialEq)]
enum PropfindMode {
    AllProp(Vec<String>),
    PropName,
    Prop(Vec<String>),
}

fn parse_propfind(xmldata: &[u8]) -> DavResult<PropfindMode> {
    // An empty body means allprop.
    if xmldata.is_empty() {
        return Ok(PropfindMode::AllProp(Vec::new()));
    }
    let root = xmltree_ext::parse_xml(xmldata)?;
    if !root.is_dav("propfind") {
        return Err(DavError::XmlParseError);
    }
    let names = |e: &Element| e.child_elems().map(|p| p.clark_name()).collect::<Vec<_>>();
    if root.dav_child("allprop").is_some() {
        let include = root.dav_child("include").map(names).unwrap_or_default();
        return Ok(PropfindMode::AllProp(include));
    }
    if root.dav_child("propname").is_some() {
        return Ok(PropfindMode::PropName);
    }
    match root.dav_child("prop") {
        Some(prop) => Ok(PropfindMode::Prop(names(prop))),
        None => Err(DavError::XmlParseError),
    }
}

// Property values of one resource, grouped by status in order of appearance.
#[derive(Default)]
struct PropStats(Vec<(StatusCode, Vec<Element>)>);

impl PropStats {
    fn add(&mut self, status: StatusCode, elem: Element) {
        match self.0.iter_mut().find(|(s, _)| *s == status) {
            Some((_, v)) => v.push(elem),
            None => self.0.push((status, vec![elem])),
        }
    }

    fn into_response(self, href: String) -> Element {
        let mut response = Element::new2("D:response");
        response.push_elem(Element::new2("D:href").text(href));
        for (status, props) in self.0 {
            let mut propstat = Element::new2("D:propstat");
            let mut prop = Element::new2("D:prop");
            let mut error = None;
            for p in props {
                if status == StatusCode::FORBIDDEN && is_live(&p.clark_name()) {
                    error = Some(DavCondition::CannotModifyProtectedProperty);
                }
                prop.push_elem(p);
            }
            propstat.push_elem(prop);
            propstat.push_elem(status_element(status));
            if let Some(c) = error {
                propstat.push_elem(c.to_element());
            }
            response.push_elem(propstat);
        }
        response
    }
}

fn status_element(status: StatusCode) -> Element {
    Element::new2("D:status").text(format!("HTTP/1.1 {status}"))
}

fn multistatus() -> Element {
    Element::new2("D:multistatus")
        .ns("D", "DAV:")
        .ns("C", NS_CALDAV_URI)
        .ns("CR", NS_CARDDAV_URI)
}

fn multistatus_response(ms: &Element) -> DavResult<Response<Body>> {
    let xml = xmltree_ext::to_xml_bytes(ms)?;
    let mut res = Response::new(Body::from(xml));
    *res.status_mut() = StatusCode::MULTI_STATUS;
    res.headers_mut().insert(
        "content-type",
        http::HeaderValue::from_static("application/xml; charset=utf-8"),
    );
    Ok(res)
}

// Dead property value as an element.
fn dead_prop_element(prop: &DavProp) -> Element {
    prop.xml
        .as_deref()
        .and_then(|xml| xmltree_ext::parse_xml(xml).ok())
        .unwrap_or_else(|| xmltree_ext::from_clark(&prop.clark_name()))
}

impl crate::DavHandler {
    pub(crate) async fn handle_propfind(
        &self,
        req: &Request<()>,
        tree: &Tree,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let depth = davheaders::depth(req.headers(), Depth::Infinity);
        let mut path = self.path(req)?;
        let tree_path = path.as_tree_path();
        let node = tree.get_node_for_path(&tree_path).await?;
        self.check_acl(tree, &tree_path, &[PRIV_READ], false).await?;

        let mode = parse_propfind(xmldata)?;
        trace!("PROPFIND {path} depth {depth:?} {mode:?}");

        let mut ms = multistatus();
        let now = SystemTime::now();

        // (tree path, node, depth left, readable)
        let mut todo = vec![(tree_path, node.clone(), depth, true)];
        while let Some((tp, n, depth, readable)) = todo.pop() {
            let href = self.node_href(&tp, &n);
            if !readable {
                let mut response = Element::new2("D:response");
                response.push_elem(Element::new2("D:href").text(href));
                response.push_elem(status_element(StatusCode::FORBIDDEN));
                ms.push_elem(response);
                continue;
            }
            let stats = self.propfind_node(&tp, &n, &mode, now).await?;
            ms.push_elem(stats.into_response(href));

            if !n.is_collection() || depth.is_zero() {
                continue;
            }
            let children = tree.get_children(&tp).await?;
            for child in children.into_iter().rev() {
                let cp = davpath::join(&tp, &child.name());
                let readable = self
                    .acl
                    .missing_privileges(&child, self.principal(), &[PRIV_READ])
                    .is_empty();
                if !readable && self.acl.hide_nodes_from_listings {
                    continue;
                }
                todo.push((cp, child, depth.decrement(), readable));
            }
        }

        let mut res = multistatus_response(&ms)?;
        self.fixpath(&mut res, &mut path, &node);
        Ok(res)
    }

    // href of a node, collections end in a slash.
    fn node_href(&self, tree_path: &str, node: &DavNodeRef) -> String {
        let mut p = DavPath::from_tree_path(tree_path, &self.prefix);
        if node.is_collection() {
            p.add_slash();
        }
        p.with_prefix()
    }

    async fn propfind_node(
        &self,
        tree_path: &str,
        node: &DavNodeRef,
        mode: &PropfindMode,
        now: SystemTime,
    ) -> DavResult<PropStats> {
        let dead: Vec<DavProp> = match node.properties() {
            Some(p) => p.get_props().await?,
            None => Vec::new(),
        };
        let mut stats = PropStats::default();

        match mode {
            PropfindMode::PropName => {
                for name in ALLPROP.iter().chain(ACL_PROPS) {
                    if self.live_prop(tree_path, node, name, now).await.is_ok() {
                        stats.add(StatusCode::OK, xmltree_ext::from_clark(name));
                    }
                }
                for p in dead.iter().filter(|p| !is_live(&p.clark_name())) {
                    stats.add(StatusCode::OK, xmltree_ext::from_clark(&p.clark_name()));
                }
            }
            PropfindMode::AllProp(include) => {
                for name in ALLPROP {
                    if let Ok(e) = self.live_prop(tree_path, node, name, now).await {
                        stats.add(StatusCode::OK, e);
                    }
                }
                for p in dead.iter().filter(|p| !is_live(&p.clark_name())) {
                    stats.add(StatusCode::OK, dead_prop_element(p));
                }
                for name in include.iter().filter(|n| ACL_PROPS.contains(&n.as_str())) {
                    match self.live_prop(tree_path, node, name, now).await {
                        Ok(e) => stats.add(StatusCode::OK, e),
                        Err(status) => stats.add(status, xmltree_ext::from_clark(name)),
                    }
                }
            }
            PropfindMode::Prop(names) => {
                let dead: HashMap<String, &DavProp> =
                    dead.iter().map(|p| (p.clark_name(), p)).collect();
                for name in names {
                    if is_live(name) {
                        match self.live_prop(tree_path, node, name, now).await {
                            Ok(e) => stats.add(StatusCode::OK, e),
                            Err(status) => stats.add(status, xmltree_ext::from_clark(name)),
                        }
                    } else if let Some(p) = dead.get(name) {
                        stats.add(StatusCode::OK, dead_prop_element(p));
                    } else {
                        stats.add(StatusCode::NOT_FOUND, xmltree_ext::from_clark(name));
                    }
                }
            }
        }
        Ok(stats)
    }

    // Value of a live property, or the status to report for it.
    async fn live_prop(
        &self,
        tree_path: &str,
        node: &DavNodeRef,
        name: &str,
        now: SystemTime,
    ) -> Result<Element, StatusCode> {
        let (_, local) = xmltree_ext::parse_clark(name);
        let mut elem = Element::new2(&format!("D:{local}"));
        let allowed = |privilege: &str| {
            self.acl
                .missing_privileges(node, self.principal(), &[privilege])
                .is_empty()
        };
        match local {
            "resourcetype" => {
                if node.is_collection() {
                    elem.push_elem(Element::new2("D:collection"));
                }
            }
            "getlastmodified" => {
                let t = node.last_modified().ok_or(StatusCode::NOT_FOUND)?;
                elem = elem.text(systemtime_to_httpdate(t));
            }
            "creationdate" => {
                let t = node.created().ok_or(StatusCode::NOT_FOUND)?;
                elem = elem.text(systemtime_to_rfc3339(t));
            }
            "getetag" => {
                let etag = node.etag().ok_or(StatusCode::NOT_FOUND)?;
                elem = elem.text(format!("\"{etag}\""));
            }
            "getcontentlength" => {
                let file = node.as_file().ok_or(StatusCode::NOT_FOUND)?;
                elem = elem.text(file.size().to_string());
            }
            "getcontenttype" => {
                let file = node.as_file().ok_or(StatusCode::NOT_FOUND)?;
                let ct = file.content_type().unwrap_or_else(|| {
                    mime_guess::from_path(node.name())
                        .first_or_octet_stream()
                        .to_string()
                });
                elem = elem.text(ct);
            }
            "lockdiscovery" => {
                let ls = self.ls.as_ref().ok_or(StatusCode::NOT_FOUND)?;
                let path = DavPath::from_tree_path(tree_path, &self.prefix);
                let locks = ls
                    .get_locks(&path, false)
                    .await
                    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
                for lock in &locks {
                    elem.push_elem(activelock_element(lock, now));
                }
            }
            "supportedlock" => {
                if self.ls.is_none() {
                    return Err(StatusCode::NOT_FOUND);
                }
                for scope in ["D:exclusive", "D:shared"] {
                    let mut entry = Element::new2("D:lockentry");
                    let mut lockscope = Element::new2("D:lockscope");
                    lockscope.push_elem(Element::new2(scope));
                    entry.push_elem(lockscope);
                    let mut locktype = Element::new2("D:locktype");
                    locktype.push_elem(Element::new2("D:write"));
                    entry.push_elem(locktype);
                    elem.push_elem(entry);
                }
            }
            "owner" => {
                let (_, owner) = self.acl.node_acl(node);
                if let Some(owner) = owner {
                    elem.push_elem(Element::new2("D:href").text(owner));
                }
            }
            "acl" => {
                if !allowed(PRIV_READ_ACL) {
                    return Err(StatusCode::FORBIDDEN);
                }
                let (acl, _) = self.acl.node_acl(node);
                elem = acl::acl_to_element(&acl);
            }
            "current-user-privilege-set" => {
                if !allowed(PRIV_READ_CUPS) {
                    return Err(StatusCode::FORBIDDEN);
                }
                let privileges = self.acl.current_user_privileges(node, self.principal());
                elem = acl::privilege_set_element("D:current-user-privilege-set", &privileges);
            }
            "supported-privilege-set" => elem = self.acl.privileges.to_element(),
            "acl-restrictions" => elem = acl::acl_restrictions_element(),
            "current-user-principal" => match self.principal() {
                Some(p) => elem.push_elem(Element::new2("D:href").text(p)),
                None => elem.push_elem(Element::new2("D:unauthenticated")),
            },
            _ => return Err(StatusCode::NOT_FOUND),
        }
        Ok(elem)
    }

    pub(crate) async fn handle_proppatch(
        &self,
        req: &Request<()>,
        tree: &Tree,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let mut path = self.path(req)?;
        let tree_path = path.as_tree_path();
        let node = tree.get_node_for_path(&tree_path).await?;

        self.check_acl(tree, &tree_path, &[PRIV_WRITE_PROPERTIES], false)
            .await?;
        let tokens = self.if_tokens(tree, req, &path).await?;
        self.check_locks(&path, false, &tokens).await?;

        // parse the set / remove instructions, in document order.
        let root = xmltree_ext::parse_xml(xmldata)?;
        if !root.is_dav("propertyupdate") {
            return Err(DavError::XmlParseError);
        }
        let mut patch = Vec::new();
        for elem in root.child_elems() {
            let set = match elem {
                e if e.is_dav("set") => true,
                e if e.is_dav("remove") => false,
                _ => continue,
            };
            let prop = elem.dav_child("prop").ok_or(DavError::XmlParseError)?;
            for p in prop.child_elems() {
                let xml = if set {
                    Some(xmltree_ext::to_fragment_bytes(p)?)
                } else {
                    None
                };
                patch.push((
                    set,
                    DavProp {
                        name: p.name.clone(),
                        prefix: p.prefix.clone(),
                        namespace: p.namespace.clone(),
                        xml,
                    },
                ));
            }
        }

        let mut stats = PropStats::default();
        let props = node.properties();
        let failed = props.is_none() || patch.iter().any(|(_, p)| is_live(&p.clark_name()));

        if failed {
            // all or nothing.
            for (_, p) in &patch {
                let name = p.clark_name();
                let status = if props.is_none() || is_live(&name) {
                    StatusCode::FORBIDDEN
                } else {
                    StatusCode::FAILED_DEPENDENCY
                };
                stats.add(status, xmltree_ext::from_clark(&name));
            }
        } else if let Some(props) = props {
            for (status, p) in props.patch_props(patch).await? {
                stats.add(status, xmltree_ext::from_clark(&p.clark_name()));
            }
            tree.mark_dirty(&tree_path);
        }

        let mut ms = multistatus();
        ms.push_elem(stats.into_response(self.node_href(&tree_path, &node)));
        let mut res = multistatus_response(&ms)?;
        self.fixpath(&mut res, &mut path, &node);
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn propfind_modes() {
        assert_eq!(parse_propfind(b"").unwrap(), PropfindMode::AllProp(vec![]));
        let body = br#"<D:propfind xmlns:D="DAV:"><D:propname/></D:propfind>"#;
        assert_eq!(parse_propfind(body).unwrap(), PropfindMode::PropName);
        let body = br#"<D:propfind xmlns:D="DAV:" xmlns:X="urn:x">
            <D:prop><D:getetag/><X:color/></D:prop></D:propfind>"#;
        assert_eq!(
            parse_propfind(body).unwrap(),
            PropfindMode::Prop(vec!["{DAV:}getetag".to_string(), "{urn:x}color".to_string()])
        );
        let body = br#"<D:propfind xmlns:D="DAV:"><D:allprop/>
            <D:include><D:acl/></D:include></D:propfind>"#;
        assert_eq!(
            parse_propfind(body).unwrap(),
            PropfindMode::AllProp(vec!["{DAV:}acl".to_string()])
        );
        assert!(parse_propfind(b"<foo/>").is_err());
    }

    #[test]
    fn propstats_group_by_status() {
        let mut stats = PropStats::default();
        stats.add(StatusCode::OK, Element::new2("D:getetag"));
        stats.add(StatusCode::NOT_FOUND, Element::new2("D:displayname"));
        stats.add(StatusCode::OK, Element::new2("D:resourcetype"));
        let ms = {
            let mut ms = multistatus();
            ms.push_elem(stats.into_response("/a".to_string()));
            ms
        };
        let xml = String::from_utf8(xmltree_ext::to_xml_bytes(&ms).unwrap()).unwrap();
        assert_eq!(xml.matches("<D:propstat>").count(), 2);
        assert!(xml.contains("HTTP/1.1 200 OK"));
        assert!(xml.contains("HTTP/1.1 404 Not Found"));
    }
}
