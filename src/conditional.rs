//! Conditional requests: the WebDAV `If:` header and the HTTP preconditions.
use std::collections::HashMap;

use headers::HeaderMapExt;
use http::{HeaderMap, Method, StatusCode};

use crate::davheaders::{If, IfItem, IfList};
use crate::davpath::DavPath;
use crate::errors::DavResult;
use crate::fs::DavNodeRef;
use crate::ls::DavLockSystem;
use crate::tree::Tree;

/// What an `If:` header can observe about one resource.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct ResourceState {
    /// Entity tag, unquoted. `None` if the resource does not exist.
    pub etag: Option<String>,
    /// Tokens of the active locks that apply to the resource.
    pub tokens: Vec<String>,
}

/// The resource a list applies to. `None` if the tag cannot be mapped
/// into our url space.
fn resource_path(list: &IfList, request: &DavPath) -> Option<DavPath> {
    let tag = match &list.resource_tag {
        None => return Some(request.clone()),
        Some(tag) => tag,
    };
    let path = if tag.starts_with('/') {
        tag.to_string()
    } else {
        url::Url::parse(tag).ok()?.path().to_string()
    };
    DavPath::from_str_and_prefix(&path, request.prefix()).ok()
}

fn list_holds(list: &IfList, state: &ResourceState) -> bool {
    list.conditions.iter().all(|c| {
        let hit = match &c.item {
            IfItem::StateToken(t) => state.tokens.iter().any(|tok| tok == t),
            IfItem::ETag(e) => state.etag.as_deref() == Some(e.as_str()),
        };
        hit != c.not
    })
}

/// Evaluate an `If:` header against a snapshot of resource states.
///
/// Lists are grouped by resource. Every group must contain at least one
/// list whose conditions all hold. Returns the outcome and the submitted
/// state tokens that belong to an active lock on their resource.
pub(crate) fn evaluate_if(
    hdr: &If,
    request: &DavPath,
    states: &HashMap<DavPath, ResourceState>,
) -> (bool, Vec<String>) {
    let missing = ResourceState::default();
    let mut groups: HashMap<Option<DavPath>, bool> = HashMap::new();
    let mut valid: Vec<String> = Vec::new();

    for list in &hdr.0 {
        let resource = resource_path(list, request);
        let state = resource
            .as_ref()
            .and_then(|r| states.get(r))
            .unwrap_or(&missing);

        let holds = list_holds(list, state);
        *groups.entry(resource).or_insert(false) |= holds;

        for c in list.conditions.iter().filter(|c| !c.not) {
            if let IfItem::StateToken(t) = &c.item {
                if state.tokens.contains(t) && !valid.contains(t) {
                    valid.push(t.clone());
                }
            }
        }
    }
    (groups.values().all(|ok| *ok), valid)
}

/// Look up the state of every resource an `If:` header mentions, then
/// evaluate it.
pub(crate) async fn if_header_match(
    tree: &Tree,
    ls: Option<&dyn DavLockSystem>,
    hdr: &If,
    request: &DavPath,
) -> DavResult<(bool, Vec<String>)> {
    let mut states = HashMap::new();
    for list in &hdr.0 {
        let path = match resource_path(list, request) {
            Some(p) => p,
            None => continue,
        };
        if states.contains_key(&path) {
            continue;
        }
        let etag = match tree.lookup(&path.as_tree_path()).await {
            Ok(Some(node)) => node.etag(),
            _ => None,
        };
        let tokens = match ls {
            Some(ls) => ls
                .get_locks(&path, false)
                .await?
                .into_iter()
                .map(|l| l.token)
                .collect(),
            None => Vec::new(),
        };
        states.insert(path, ResourceState { etag, tokens });
    }
    let res = evaluate_if(hdr, request, &states);
    trace!("if header {hdr} -> {res:?}");
    Ok(res)
}

/// Check `If-Match`, `If-Unmodified-Since`, `If-None-Match` and
/// `If-Modified-Since`. Returns the status to answer with if one fails.
pub(crate) fn http_preconditions(
    method: &Method,
    headers: &HeaderMap,
    node: Option<&DavNodeRef>,
) -> Option<StatusCode> {
    let etag = node
        .and_then(|n| n.etag())
        .and_then(|e| format!("\"{e}\"").parse::<headers::ETag>().ok());
    let modified = node.and_then(|n| n.last_modified());
    let get_or_head = *method == Method::GET || *method == Method::HEAD;

    if let Some(im) = headers.typed_get::<headers::IfMatch>() {
        let ok = match &etag {
            Some(e) => im.precondition_passes(e),
            None => false,
        };
        if !ok {
            return Some(StatusCode::PRECONDITION_FAILED);
        }
    } else if let Some(ius) = headers.typed_get::<headers::IfUnmodifiedSince>() {
        if let Some(m) = modified {
            if !ius.precondition_passes(m) {
                return Some(StatusCode::PRECONDITION_FAILED);
            }
        }
    }

    if let Some(inm) = headers.typed_get::<headers::IfNoneMatch>() {
        let ok = match &etag {
            Some(e) => inm.precondition_passes(e),
            None => true,
        };
        if !ok {
            return Some(if get_or_head {
                StatusCode::NOT_MODIFIED
            } else {
                StatusCode::PRECONDITION_FAILED
            });
        }
    } else if get_or_head {
        if let (Some(ims), Some(m)) = (headers.typed_get::<headers::IfModifiedSince>(), modified) {
            if !ims.is_modified(m) {
                return Some(StatusCode::NOT_MODIFIED);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{DavFileSystem, MemFs};
    use http::HeaderValue;

    fn p(s: &str) -> DavPath {
        DavPath::from_str_and_prefix(s, "/dav").unwrap()
    }

    fn hdr(s: &str) -> If {
        let mut map = HeaderMap::new();
        map.insert("if", HeaderValue::from_str(s).unwrap());
        map.typed_get::<If>().unwrap()
    }

    fn states() -> HashMap<DavPath, ResourceState> {
        let mut m = HashMap::new();
        m.insert(
            p("/dav/a.txt"),
            ResourceState {
                etag: Some("e1".to_string()),
                tokens: vec!["opaquelocktoken:t1".to_string()],
            },
        );
        m.insert(
            p("/dav/b.txt"),
            ResourceState {
                etag: Some("e2".to_string()),
                tokens: Vec::new(),
            },
        );
        m
    }

    #[test]
    fn tokens_and_etags() {
        let req = p("/dav/a.txt");
        let st = states();
        let (ok, valid) = evaluate_if(&hdr("(<opaquelocktoken:t1>)"), &req, &st);
        assert!(ok);
        assert_eq!(valid, vec!["opaquelocktoken:t1"]);

        assert!(evaluate_if(&hdr("(<opaquelocktoken:t1> [\"e1\"])"), &req, &st).0);
        assert!(!evaluate_if(&hdr("(<opaquelocktoken:t1> [\"e2\"])"), &req, &st).0);
        assert!(!evaluate_if(&hdr("(<opaquelocktoken:nope>)"), &req, &st).0);
        assert!(evaluate_if(&hdr("(Not <opaquelocktoken:nope>)"), &req, &st).0);
    }

    #[test]
    fn no_lock_and_or() {
        let req = p("/dav/a.txt");
        let st = states();
        assert!(!evaluate_if(&hdr("(<DAV:no-lock>)"), &req, &st).0);
        // a bad token ORed with something that holds: true, but the bad
        // token is not valid.
        let (ok, valid) = evaluate_if(&hdr("(<opaquelocktoken:bad>) (Not <DAV:no-lock>)"), &req, &st);
        assert!(ok);
        assert!(valid.is_empty());
    }

    #[test]
    fn tagged_resources() {
        let req = p("/dav/a.txt");
        let st = states();
        let h = hdr("<http://host/dav/b.txt> ([\"e2\"]) </dav/a.txt> (<opaquelocktoken:t1>)");
        assert!(evaluate_if(&h, &req, &st).0);
        // each resource group must hold.
        let h = hdr("<http://host/dav/b.txt> ([\"zz\"]) </dav/a.txt> (<opaquelocktoken:t1>)");
        assert!(!evaluate_if(&h, &req, &st).0);
        // unknown resource: no etag, no locks.
        let h = hdr("<http://host/elsewhere> (Not [\"x\"])");
        assert!(evaluate_if(&h, &req, &st).0);
    }

    #[test]
    fn pure() {
        let req = p("/dav/a.txt");
        let st = states();
        let h = hdr("(<opaquelocktoken:t1>) (Not [\"e1\"])");
        let first = evaluate_if(&h, &req, &st);
        for _ in 0..3 {
            assert_eq!(evaluate_if(&h, &req, &st), first);
        }
        assert_eq!(st, states());
    }

    #[tokio::test]
    async fn http_conditions() {
        let fs = MemFs::new();
        fs.create_file("f", b"x".to_vec()).await.unwrap();
        let root = fs.root().await.unwrap();
        let node = root.as_collection().unwrap().get_child("f").await.unwrap();
        let etag = format!("\"{}\"", node.etag().unwrap());

        let mut h = HeaderMap::new();
        h.insert("if-match", HeaderValue::from_str(&etag).unwrap());
        assert_eq!(http_preconditions(&Method::PUT, &h, Some(&node)), None);
        assert_eq!(
            http_preconditions(&Method::PUT, &h, None),
            Some(StatusCode::PRECONDITION_FAILED)
        );

        let mut h = HeaderMap::new();
        h.insert("if-none-match", HeaderValue::from_static("*"));
        assert_eq!(
            http_preconditions(&Method::PUT, &h, Some(&node)),
            Some(StatusCode::PRECONDITION_FAILED)
        );
        assert_eq!(http_preconditions(&Method::PUT, &h, None), None);

        let mut h = HeaderMap::new();
        h.insert("if-none-match", HeaderValue::from_str(&etag).unwrap());
        assert_eq!(
            http_preconditions(&Method::GET, &h, Some(&node)),
            Some(StatusCode::NOT_MODIFIED)
        );
    }
}
