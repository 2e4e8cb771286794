use std::time::{Duration, SystemTime};

use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use xmltree::Element;

use crate::acl::{PRIV_BIND, PRIV_UNLOCK, PRIV_WRITE_CONTENT};
use crate::body::Body;
use crate::davheaders::{self, DavTimeout, Depth};
use crate::davpath::{self, DavPath};
use crate::errors::{DavCondition, DavError};
use crate::fs::*;
use crate::ls::*;
use crate::tree::Tree;
use crate::xmltree_ext::{self, ElementExt};
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_lock(
        &self,
        req: &Request<()>,
        tree: &Tree,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        // must have a locksystem or bail
        let locksystem = match self.ls {
            Some(ref ls) => ls,
            None => return Err(StatusCode::METHOD_NOT_ALLOWED.into()),
        };

        let mut path = self.path(req)?;
        let tree_path = path.as_tree_path();

        // lock refresh?
        if xmldata.is_empty() {
            return self.handle_lock_refresh(req, tree, &path).await;
        }

        // only depth 0 and infinity are allowed.
        let deep = match davheaders::depth(req.headers(), Depth::Infinity) {
            Depth::Infinity => true,
            Depth::Finite(0) => false,
            _ => return Err(DavError::Status(StatusCode::BAD_REQUEST)),
        };

        let tree_elem = xmltree_ext::parse_xml(xmldata)?;
        if !tree_elem.is_dav("lockinfo") {
            return Err(DavError::XmlParseError);
        }
        let shared = match tree_elem.dav_child("lockscope").and_then(|s| s.child_elems().next()) {
            Some(s) if s.is_dav("exclusive") => false,
            Some(s) if s.is_dav("shared") => true,
            _ => return Err(DavError::XmlParseError),
        };
        match tree_elem.dav_child("locktype").and_then(|t| t.child_elems().next()) {
            Some(t) if t.is_dav("write") => {}
            _ => return Err(DavError::XmlParseError),
        }
        let owner = tree_elem.dav_child("owner").cloned();

        let node = tree.lookup(&tree_path).await?;
        match &node {
            Some(n) => {
                // lockroot of a collection ends in a slash.
                if n.is_collection() && !path.is_collection() {
                    path.add_slash();
                }
                self.check_acl(tree, &tree_path, &[PRIV_WRITE_CONTENT], false)
                    .await?
            }
            None => self.check_parent_acl(tree, &path, &[PRIV_BIND]).await?,
        }
        self.if_tokens(tree, req, &path).await?;

        let timeout = effective_timeout(requested_timeout(req), self.max_lock_timeout);
        let lock = match locksystem
            .lock(&path, self.principal(), owner.as_ref(), Some(timeout), shared, deep)
            .await
        {
            Ok(lock) => lock,
            Err(LsError::Locked(l)) => {
                debug!("LOCK {path}: conflicts with {}", l.token);
                return Err(DavError::Condition(
                    StatusCode::LOCKED,
                    DavCondition::NoConflictingLock(vec![l.path.with_prefix()]),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        // lock on an unmapped url creates an empty resource.
        let mut status = StatusCode::OK;
        if node.is_none() {
            let (parent, name) = davpath::split(&tree_path);
            let created = async {
                let parent = tree.get_node_for_path(parent).await?;
                let coll = parent.as_collection().ok_or(FsError::Conflict)?;
                coll.create_file(name, bytes_stream(Vec::new())).await
            }
            .await;
            if let Err(e) = created {
                match locksystem.unlock(&path, &lock.token).await {
                    Ok(true) => {}
                    Ok(false) => warn!("LOCK {path}: {} vanished before release", lock.token),
                    Err(ue) => warn!("LOCK {path}: releasing {} failed: {ue:?}", lock.token),
                }
                return Err(e.into());
            }
            tree.mark_dirty(&tree_path);
            status = StatusCode::CREATED;
        }

        lock_response(&lock, status)
    }

    async fn handle_lock_refresh(
        &self,
        req: &Request<()>,
        tree: &Tree,
        path: &DavPath,
    ) -> DavResult<Response<Body>> {
        let locksystem = match self.ls {
            Some(ref ls) => ls,
            None => return Err(StatusCode::METHOD_NOT_ALLOWED.into()),
        };
        let hdr = match req.headers().typed_try_get::<davheaders::If>() {
            Ok(Some(h)) => h,
            _ => return Err(DavError::Status(StatusCode::BAD_REQUEST)),
        };
        let tokens = self.if_tokens(tree, req, path).await?;

        let timeout = effective_timeout(requested_timeout(req), self.max_lock_timeout);
        for token in hdr.positive_tokens() {
            if !tokens.iter().any(|t| t == token) {
                continue;
            }
            match locksystem.refresh(path, token, Some(timeout)).await {
                Ok(lock) => return lock_response(&lock, StatusCode::OK),
                Err(LsError::NotFound) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(DavError::Condition(
            StatusCode::PRECONDITION_FAILED,
            DavCondition::LockTokenMatchesRequestUri,
        ))
    }

    pub(crate) async fn handle_unlock(&self, req: &Request<()>, tree: &Tree) -> DavResult<Response<Body>> {
        // must have a locksystem or bail
        let locksystem = match self.ls {
            Some(ref ls) => ls,
            None => return Err(StatusCode::METHOD_NOT_ALLOWED.into()),
        };

        // Must have Lock-Token header
        let t = req
            .headers()
            .typed_get::<davheaders::LockToken>()
            .ok_or(DavError::Status(StatusCode::BAD_REQUEST))?;
        let token = t.0.trim_matches(|c| c == '<' || c == '>');

        let path = self.path(req)?;
        let not_ours = || {
            DavError::Condition(StatusCode::CONFLICT, DavCondition::LockTokenMatchesRequestUri)
        };

        // removing somebody else's lock needs the unlock privilege.
        let lock = locksystem
            .get_locks(&path, false)
            .await?
            .into_iter()
            .find(|l| l.token == token)
            .ok_or_else(not_ours)?;
        if lock.principal.is_some() && lock.principal.as_deref() != self.principal() {
            self.check_acl(tree, &path.as_tree_path(), &[PRIV_UNLOCK], false)
                .await?;
        }

        if !locksystem.unlock(&path, token).await? {
            return Err(not_ours());
        }
        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::NO_CONTENT;
        Ok(res)
    }
}

/// The Timeout: header of the request, if any.
fn requested_timeout(req: &Request<()>) -> Option<Duration> {
    let timeouts = req.headers().typed_get::<davheaders::Timeout>()?;
    match timeouts.0.first()? {
        DavTimeout::Seconds(n) => Some(Duration::from_secs(*n as u64)),
        DavTimeout::Infinite => Some(Duration::ZERO),
    }
}

fn lock_response(lock: &DavLock, status: StatusCode) -> DavResult<Response<Body>> {
    let mut prop = Element::new2("D:prop").ns("D", "DAV:");
    let mut ldis = Element::new2("D:lockdiscovery");
    ldis.push_elem(activelock_element(lock, SystemTime::now()));
    prop.push_elem(ldis);
    let xml = xmltree_ext::to_xml_bytes(&prop)?;

    let mut res = Response::new(Body::from(xml));
    *res.status_mut() = status;
    let h = res.headers_mut();
    h.typed_insert(davheaders::LockToken(lock.token.clone()));
    h.typed_insert(davheaders::Timeout(vec![timeout_value(lock)]));
    h.insert(
        "content-type",
        http::HeaderValue::from_static("application/xml; charset=utf-8"),
    );
    Ok(res)
}

fn timeout_value(lock: &DavLock) -> DavTimeout {
    match lock.timeout {
        Some(d) => DavTimeout::Seconds(d.as_secs().min(u32::MAX as u64) as u32),
        None => DavTimeout::Infinite,
    }
}

/// `<D:activelock>` for a lock, as in LOCK responses and lockdiscovery.
pub(crate) fn activelock_element(lock: &DavLock, now: SystemTime) -> Element {
    let mut actlock = Element::new2("D:activelock");

    let mut elem = Element::new2("D:lockscope");
    elem.push_elem(match lock.shared {
        false => Element::new2("D:exclusive"),
        true => Element::new2("D:shared"),
    });
    actlock.push_elem(elem);

    let mut elem = Element::new2("D:locktype");
    elem.push_elem(Element::new2("D:write"));
    actlock.push_elem(elem);

    actlock.push_elem(
        Element::new2("D:depth").text(if lock.deep { "infinity" } else { "0" }),
    );

    if let Some(owner) = &lock.owner {
        actlock.push_elem(owner.clone());
    }

    let timeout = match lock.remaining(now) {
        Some(d) => format!("Second-{}", d.as_secs()),
        None => "Infinite".to_string(),
    };
    actlock.push_elem(Element::new2("D:timeout").text(timeout));

    let mut elem = Element::new2("D:locktoken");
    elem.push_elem(Element::new2("D:href").text(lock.token.clone()));
    actlock.push_elem(elem);

    let mut elem = Element::new2("D:lockroot");
    elem.push_elem(Element::new2("D:href").text(lock.path.with_prefix()));
    actlock.push_elem(elem);

    actlock
}
