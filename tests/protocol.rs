use futures_util::StreamExt;
use http::{HeaderMap, Request, StatusCode};

use dav_engine::acl::{Ace, PRIV_ALL};
use dav_engine::body::Body;
use dav_engine::fs::MemFs;
use dav_engine::{DavHandler, DavMethod, FileSystem, LockSystem};

const ALICE: &str = "/principals/alice";
const BOB: &str = "/principals/bob";

const LOCKINFO: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:exclusive/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner><D:href>mailto:alice@example.com</D:href></D:owner>
</D:lockinfo>"#;

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

fn handler() -> DavHandler {
    DavHandler::builder(FileSystem::Mem)
        .locksystem(LockSystem::Mem)
        .principal(ALICE)
        .build()
}

fn request(method: &str, path: &str, headers: &[(&str, &str)], body: &str) -> Request<Body> {
    let mut req = Request::builder().method(method).uri(path);
    for (k, v) in headers {
        req = req.header(*k, *v);
    }
    req.body(Body::from(body.to_string())).unwrap()
}

async fn reply(resp: http::Response<Body>) -> Reply {
    let (parts, mut body) = resp.into_parts();
    let mut data = Vec::new();
    while let Some(chunk) = body.next().await {
        data.extend_from_slice(&chunk.unwrap());
    }
    Reply {
        status: parts.status,
        headers: parts.headers,
        body: String::from_utf8(data).unwrap(),
    }
}

async fn send(dav: &DavHandler, method: &str, path: &str, headers: &[(&str, &str)], body: &str) -> Reply {
    reply(dav.handle(request(method, path, headers, body)).await).await
}

async fn send_as(dav: &DavHandler, principal: &str, method: &str, path: &str, body: &str) -> Reply {
    let req = request(method, path, &[], body);
    reply(dav.handle_with(req, None, Some(principal.to_string())).await).await
}

async fn lock(dav: &DavHandler, path: &str) -> String {
    let r = send(dav, "LOCK", path, &[("Timeout", "Second-3600")], LOCKINFO).await;
    assert!(r.status.is_success(), "LOCK {path}: {}", r.status);
    let token = r.headers["lock-token"].to_str().unwrap();
    token.trim_matches(|c| c == '<' || c == '>').to_string()
}

#[tokio::test]
async fn lock_conflict() {
    let dav = handler();
    let r = send(&dav, "LOCK", "/a.txt", &[("Timeout", "Second-3600")], LOCKINFO).await;
    assert_eq!(r.status, StatusCode::CREATED);
    let token = r.headers["lock-token"].to_str().unwrap();
    assert!(token.starts_with("<opaquelocktoken:"));
    assert_eq!(r.headers["timeout"], "Second-3600");
    assert!(r.body.contains("<D:lockdiscovery>"));
    assert!(r.body.contains("mailto:alice@example.com"));

    let r = send(&dav, "LOCK", "/a.txt", &[], LOCKINFO).await;
    assert_eq!(r.status, StatusCode::LOCKED);
    assert!(r.body.contains("no-conflicting-lock"));
}

#[tokio::test]
async fn put_needs_lock_token() {
    let dav = handler();
    let token = lock(&dav, "/a.txt").await;

    let r = send(&dav, "PUT", "/a.txt", &[], "hello").await;
    assert_eq!(r.status, StatusCode::LOCKED);
    assert!(r.body.contains("lock-token-submitted"));

    let hdr = format!("(<{token}>)");
    let r = send(&dav, "PUT", "/a.txt", &[("If", &hdr)], "hello").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);

    let r = send(&dav, "GET", "/a.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body, "hello");
}

#[tokio::test]
async fn if_header_with_unknown_token_fails() {
    let dav = handler();
    lock(&dav, "/a.txt").await;
    let r = send(
        &dav,
        "PUT",
        "/a.txt",
        &[("If", "(<opaquelocktoken:00000000-0000-0000-0000-000000000000>)")],
        "x",
    )
    .await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn mkcol_twice() {
    let dav = handler();
    let r = send(&dav, "MKCOL", "/dir", &[], "").await;
    assert_eq!(r.status, StatusCode::CREATED);
    let r = send(&dav, "MKCOL", "/dir", &[], "").await;
    assert_eq!(r.status, StatusCode::METHOD_NOT_ALLOWED);
    let r = send(&dav, "MKCOL", "/missing/dir", &[], "").await;
    assert_eq!(r.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn copy_collection() {
    let dav = handler();
    send(&dav, "MKCOL", "/dir", &[], "").await;
    let r = send(&dav, "PUT", "/dir/child.txt", &[], "child content").await;
    assert_eq!(r.status, StatusCode::CREATED);

    let r = send(
        &dav,
        "COPY",
        "/dir",
        &[("Destination", "http://localhost/dir2"), ("Depth", "infinity")],
        "",
    )
    .await;
    assert_eq!(r.status, StatusCode::CREATED);
    let r = send(&dav, "GET", "/dir2/child.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body, "child content");

    // destination exists now.
    let r = send(
        &dav,
        "COPY",
        "/dir",
        &[("Destination", "/dir2"), ("Overwrite", "F")],
        "",
    )
    .await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);
    let r = send(&dav, "COPY", "/dir", &[("Destination", "/dir2")], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn move_and_delete() {
    let dav = handler();
    send(&dav, "PUT", "/a", &[], "a").await;
    let r = send(&dav, "MOVE", "/a", &[("Destination", "/b")], "").await;
    assert_eq!(r.status, StatusCode::CREATED);
    assert_eq!(send(&dav, "GET", "/a", &[], "").await.status, StatusCode::NOT_FOUND);
    assert_eq!(send(&dav, "GET", "/b", &[], "").await.body, "a");

    let r = send(&dav, "MOVE", "/b", &[("Destination", "/b")], "").await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);

    assert_eq!(send(&dav, "DELETE", "/b", &[], "").await.status, StatusCode::NO_CONTENT);
    assert_eq!(send(&dav, "DELETE", "/b", &[], "").await.status, StatusCode::NOT_FOUND);
    assert_eq!(send(&dav, "DELETE", "/", &[], "").await.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn copymove_onto_ancestor() {
    let dav = handler();
    send(&dav, "MKCOL", "/dir", &[], "").await;
    send(&dav, "PUT", "/dir/keep.txt", &[], "keep").await;
    send(&dav, "PUT", "/dir/child.txt", &[], "child").await;

    let hdrs = [("Destination", "/dir"), ("Overwrite", "T")];
    let r = send(&dav, "MOVE", "/dir/child.txt", &hdrs, "").await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);
    let r = send(&dav, "COPY", "/dir/keep.txt", &hdrs, "").await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);

    // nothing was deleted.
    assert_eq!(send(&dav, "GET", "/dir/keep.txt", &[], "").await.body, "keep");
    assert_eq!(send(&dav, "GET", "/dir/child.txt", &[], "").await.body, "child");
}

#[tokio::test]
async fn move_checks_source_and_destination_locks() {
    let dav = handler();
    send(&dav, "PUT", "/src.txt", &[], "src").await;
    let src_token = lock(&dav, "/src.txt").await;
    let r = send(&dav, "MOVE", "/src.txt", &[("Destination", "/moved.txt")], "").await;
    assert_eq!(r.status, StatusCode::LOCKED);
    assert_eq!(send(&dav, "GET", "/src.txt", &[], "").await.body, "src");

    let hdr = format!("<{src_token}>");
    send(&dav, "UNLOCK", "/src.txt", &[("Lock-Token", &hdr)], "").await;

    // depth-infinity lock on the destination collection.
    send(&dav, "MKCOL", "/dst", &[], "").await;
    let dst_token = lock(&dav, "/dst").await;
    let r = send(&dav, "MOVE", "/src.txt", &[("Destination", "/dst/src.txt")], "").await;
    assert_eq!(r.status, StatusCode::LOCKED);

    let tagged = format!("</dst> (<{dst_token}>)");
    let r = send(
        &dav,
        "MOVE",
        "/src.txt",
        &[("Destination", "/dst/src.txt"), ("If", &tagged)],
        "",
    )
    .await;
    assert_eq!(r.status, StatusCode::CREATED);
    assert_eq!(send(&dav, "GET", "/dst/src.txt", &[], "").await.body, "src");
}

#[tokio::test]
async fn lock_timeout_is_clamped() {
    let dav = handler();
    let r = send(&dav, "LOCK", "/a.txt", &[("Timeout", "Infinite")], LOCKINFO).await;
    assert_eq!(r.status, StatusCode::CREATED);
    assert_eq!(r.headers["timeout"], "Second-86400");
    assert!(r.body.contains("<D:timeout>Second-86"));

    let r = send(&dav, "LOCK", "/b.txt", &[("Timeout", "Second-999999")], LOCKINFO).await;
    assert_eq!(r.status, StatusCode::CREATED);
    assert_eq!(r.headers["timeout"], "Second-86400");
}

#[tokio::test]
async fn unrecognized_depth_uses_default() {
    let dav = handler();
    send(&dav, "MKCOL", "/dir", &[], "").await;
    send(&dav, "PUT", "/dir/child.txt", &[], "x").await;
    let r = send(&dav, "PROPFIND", "/dir", &[("Depth", "bogus")], "").await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert!(r.body.contains("/dir/child.txt"));
}

#[tokio::test]
async fn unlock_unknown_token() {
    let dav = handler();
    lock(&dav, "/a.txt").await;
    let r = send(
        &dav,
        "UNLOCK",
        "/a.txt",
        &[("Lock-Token", "<opaquelocktoken:never-issued>")],
        "",
    )
    .await;
    assert_eq!(r.status, StatusCode::CONFLICT);
    assert!(r.body.contains("lock-token-matches-request-uri"));
}

#[tokio::test]
async fn delete_with_locked_descendant() {
    let dav = handler();
    send(&dav, "MKCOL", "/dir", &[], "").await;
    send(&dav, "PUT", "/dir/child.txt", &[], "x").await;
    let token = lock(&dav, "/dir/child.txt").await;

    let r = send(&dav, "DELETE", "/dir", &[], "").await;
    assert_eq!(r.status, StatusCode::LOCKED);

    let hdr = format!("<{token}>");
    let r = send(&dav, "UNLOCK", "/dir/child.txt", &[("Lock-Token", &hdr)], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);

    let r = send(&dav, "DELETE", "/dir", &[], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn lock_refresh() {
    let dav = handler();
    let token = lock(&dav, "/a.txt").await;
    let hdr = format!("(<{token}>)");
    let r = send(&dav, "LOCK", "/a.txt", &[("If", &hdr), ("Timeout", "Second-60")], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.headers["timeout"], "Second-60");
    assert!(r.body.contains(&token));

    // no If header.
    let r = send(&dav, "LOCK", "/a.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn propfind_multistatus() {
    let dav = handler();
    send(&dav, "MKCOL", "/dir", &[], "").await;
    send(&dav, "PUT", "/dir/f.txt", &[], "12345").await;

    let body = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:" xmlns:X="urn:example">
  <D:prop><D:getcontentlength/><D:resourcetype/><X:missing/></D:prop>
</D:propfind>"#;
    let r = send(&dav, "PROPFIND", "/dir/", &[("Depth", "1")], body).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert_eq!(r.body.matches("<D:response>").count(), 2);
    assert!(r.body.contains("<D:href>/dir/</D:href>"));
    assert!(r.body.contains("<D:href>/dir/f.txt</D:href>"));
    assert!(r.body.contains("<D:getcontentlength>5</D:getcontentlength>"));
    assert!(r.body.contains("<D:collection"));
    assert!(r.body.contains("HTTP/1.1 404 Not Found"));

    let r = send(&dav, "PROPFIND", "/dir", &[("Depth", "0")], "").await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert_eq!(r.body.matches("<D:response>").count(), 1);
    assert!(r.body.contains("getlastmodified"));
    assert!(!r.body.contains("current-user-privilege-set"));

    let r = send(&dav, "PROPFIND", "/nope", &[], "").await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn proppatch_dead_properties() {
    let dav = handler();
    send(&dav, "PUT", "/f", &[], "x").await;

    let body = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propertyupdate xmlns:D="DAV:" xmlns:X="urn:example">
  <D:set><D:prop><X:color>red</X:color></D:prop></D:set>
</D:propertyupdate>"#;
    let r = send(&dav, "PROPPATCH", "/f", &[], body).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert!(r.body.contains("HTTP/1.1 200 OK"));

    let body = r#"<D:propfind xmlns:D="DAV:" xmlns:X="urn:example"><D:prop><X:color/></D:prop></D:propfind>"#;
    let r = send(&dav, "PROPFIND", "/f", &[("Depth", "0")], body).await;
    assert!(r.body.contains(">red<"));

    // a protected property fails the whole update.
    let body = r#"<D:propertyupdate xmlns:D="DAV:" xmlns:X="urn:example">
  <D:set><D:prop><X:color>blue</X:color><D:getetag>x</D:getetag></D:prop></D:set>
</D:propertyupdate>"#;
    let r = send(&dav, "PROPPATCH", "/f", &[], body).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert!(r.body.contains("HTTP/1.1 403 Forbidden"));
    assert!(r.body.contains("HTTP/1.1 424 Failed Dependency"));
    assert!(r.body.contains("cannot-modify-protected-property"));

    let body = r#"<D:propfind xmlns:D="DAV:" xmlns:X="urn:example"><D:prop><X:color/></D:prop></D:propfind>"#;
    let r = send(&dav, "PROPFIND", "/f", &[("Depth", "0")], body).await;
    assert!(r.body.contains(">red<"));
}

#[tokio::test]
async fn acl_denial_and_grant() {
    let fs = MemFs::with_acl(vec![Ace::new(ALICE, PRIV_ALL)]);
    fs.create_file("f", b"secret".to_vec()).await.unwrap();
    let dav = DavHandler::builder(FileSystem::Custom(fs))
        .locksystem(LockSystem::Mem)
        .build();

    let r = send_as(&dav, BOB, "GET", "/f", "").await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);
    assert!(r.body.contains("need-privileges"));
    assert!(r.body.contains("<D:href>/f</D:href>"));

    let r = send_as(&dav, BOB, "PUT", "/g", "x").await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);

    let acl = format!(
        r#"<D:acl xmlns:D="DAV:">
  <D:ace><D:principal><D:href>{ALICE}</D:href></D:principal>
    <D:grant><D:privilege><D:all/></D:privilege></D:grant></D:ace>
  <D:ace><D:principal><D:href>{BOB}</D:href></D:principal>
    <D:grant><D:privilege><D:read/></D:privilege></D:grant></D:ace>
</D:acl>"#
    );
    let r = send_as(&dav, BOB, "ACL", "/f", &acl).await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);
    let r = send_as(&dav, ALICE, "ACL", "/f", &acl).await;
    assert_eq!(r.status, StatusCode::OK);

    let r = send_as(&dav, BOB, "GET", "/f", "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body, "secret");
}

#[tokio::test]
async fn acl_rejects_deny() {
    let fs = MemFs::with_acl(vec![Ace::new(ALICE, PRIV_ALL)]);
    let dav = DavHandler::builder(FileSystem::Custom(fs)).build();
    let acl = format!(
        r#"<D:acl xmlns:D="DAV:"><D:ace><D:principal><D:href>{BOB}</D:href></D:principal>
    <D:deny><D:privilege><D:read/></D:privilege></D:deny></D:ace></D:acl>"#
    );
    let r = send_as(&dav, ALICE, "ACL", "/", &acl).await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);
    assert!(r.body.contains("grant-only"));
}

#[tokio::test]
async fn unauthenticated_is_denied() {
    let dav = DavHandler::builder(FileSystem::Mem).build();
    let r = send(&dav, "PROPFIND", "/", &[("Depth", "0")], "").await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn methods_and_options() {
    let dav = DavHandler::builder(FileSystem::Mem)
        .principal(ALICE)
        .methods(DavMethod::WEBDAV_RO)
        .expose_version(true)
        .build();
    let r = send(&dav, "PUT", "/f", &[], "x").await;
    assert_eq!(r.status, StatusCode::METHOD_NOT_ALLOWED);
    let r = send(&dav, "FROB", "/", &[], "").await;
    assert_eq!(r.status, StatusCode::NOT_IMPLEMENTED);

    let r = send(&dav, "OPTIONS", "/", &[], "").await;
    assert_eq!(r.status, StatusCode::OK);
    let allow = r.headers["allow"].to_str().unwrap();
    assert!(allow.contains("PROPFIND"));
    assert!(!allow.contains("PUT"));
    assert!(r.headers["dav"].to_str().unwrap().contains("access-control"));
    assert!(r.headers["server"].to_str().unwrap().starts_with("dav-engine/"));
}

#[tokio::test]
async fn report_is_unsupported() {
    let dav = handler();
    let body = r#"<C:calendar-query xmlns:C="urn:ietf:params:xml:ns:caldav"/>"#;
    let r = send(&dav, "REPORT", "/", &[], body).await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);
    assert!(r.body.contains("supported-report"));
    let r = send(&dav, "REPORT", "/", &[], "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
}
