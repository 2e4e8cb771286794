use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use headers::Header;
use http::method::InvalidMethod;
use time::format_description::well_known::Rfc3339;
use time::macros::offset;

use crate::errors::DavError;
use crate::DavResult;

bitflags! {
    /// A set of HTTP / WebDAV methods.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DavMethod: u32 {
        const HEAD = 0x0001;
        const GET = 0x0002;
        const PUT = 0x0004;
        const OPTIONS = 0x0010;
        const PROPFIND = 0x0020;
        const PROPPATCH = 0x0040;
        const MKCOL = 0x0080;
        const COPY = 0x0100;
        const MOVE = 0x0200;
        const DELETE = 0x0400;
        const LOCK = 0x0800;
        const UNLOCK = 0x1000;
        const ACL = 0x2000;
        const REPORT = 0x4000;

        const HTTP_RO = Self::HEAD.bits() | Self::GET.bits() | Self::OPTIONS.bits();
        const HTTP_RW = Self::HTTP_RO.bits() | Self::PUT.bits();
        const WEBDAV_RO = Self::HTTP_RO.bits() | Self::PROPFIND.bits() | Self::REPORT.bits();
        const WEBDAV_BODY = Self::PUT.bits()
            | Self::PROPFIND.bits() | Self::PROPPATCH.bits() | Self::LOCK.bits()
            | Self::ACL.bits() | Self::REPORT.bits();
    }
}
impl DavMethod {
    pub const WEBDAV_RW: Self = Self::all();
}

// translate method into our own enum that has webdav methods as well.
pub fn dav_method(m: &http::Method) -> DavResult<DavMethod> {
    let m = match *m {
        http::Method::HEAD => DavMethod::HEAD,
        http::Method::GET => DavMethod::GET,
        http::Method::PUT => DavMethod::PUT,
        http::Method::DELETE => DavMethod::DELETE,
        http::Method::OPTIONS => DavMethod::OPTIONS,
        _ => match m.as_str() {
            "PROPFIND" => DavMethod::PROPFIND,
            "PROPPATCH" => DavMethod::PROPPATCH,
            "MKCOL" => DavMethod::MKCOL,
            "COPY" => DavMethod::COPY,
            "MOVE" => DavMethod::MOVE,
            "LOCK" => DavMethod::LOCK,
            "UNLOCK" => DavMethod::UNLOCK,
            "ACL" => DavMethod::ACL,
            "REPORT" => DavMethod::REPORT,
            _ => {
                return Err(DavError::UnknownDavMethod);
            }
        },
    };
    Ok(m)
}

// for external use.
impl std::convert::TryFrom<&http::Method> for DavMethod {
    type Error = InvalidMethod;

    fn try_from(value: &http::Method) -> Result<Self, Self::Error> {
        dav_method(value).map_err(|_| {
            // A trick to get at the value of http::method::InvalidMethod.
            match http::method::Method::from_bytes(b"") {
                Err(e) => e,
                Ok(_) => unreachable!(),
            }
        })
    }
}

/// Method names for the `Allow` header, in a fixed order.
pub(crate) fn method_names(methods: DavMethod) -> Vec<&'static str> {
    [
        (DavMethod::OPTIONS, "OPTIONS"),
        (DavMethod::GET, "GET"),
        (DavMethod::HEAD, "HEAD"),
        (DavMethod::PUT, "PUT"),
        (DavMethod::DELETE, "DELETE"),
        (DavMethod::MKCOL, "MKCOL"),
        (DavMethod::COPY, "COPY"),
        (DavMethod::MOVE, "MOVE"),
        (DavMethod::PROPFIND, "PROPFIND"),
        (DavMethod::PROPPATCH, "PROPPATCH"),
        (DavMethod::LOCK, "LOCK"),
        (DavMethod::UNLOCK, "UNLOCK"),
        (DavMethod::ACL, "ACL"),
        (DavMethod::REPORT, "REPORT"),
    ]
    .into_iter()
    .filter(|(m, _)| methods.contains(*m))
    .map(|(_, name)| name)
    .collect()
}

pub fn systemtime_to_offsetdatetime(t: SystemTime) -> time::OffsetDateTime {
    match t.duration_since(UNIX_EPOCH) {
        Ok(t) => time::OffsetDateTime::from_unix_timestamp(t.as_secs() as i64)
            .unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
            .to_offset(offset!(UTC)),
        Err(_) => time::OffsetDateTime::UNIX_EPOCH.to_offset(offset!(UTC)),
    }
}

pub fn systemtime_to_httpdate(t: SystemTime) -> String {
    let d = headers::Date::from(t);
    let mut v = Vec::new();
    d.encode(&mut v);
    v.first()
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}

pub fn systemtime_to_rfc3339(t: SystemTime) -> String {
    // 1996-12-19T16:39:57Z
    systemtime_to_offsetdatetime(t)
        .format(&Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_rfc3339() {
        assert!(systemtime_to_rfc3339(UNIX_EPOCH) == "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_httpdate() {
        let t = UNIX_EPOCH + Duration::from_secs(784111777);
        assert_eq!(systemtime_to_httpdate(t), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn methods() {
        let m = http::Method::from_bytes(b"REPORT").unwrap();
        assert_eq!(dav_method(&m).unwrap(), DavMethod::REPORT);
        let m = http::Method::from_bytes(b"BREW").unwrap();
        assert!(dav_method(&m).is_err());
        assert_eq!(
            method_names(DavMethod::HTTP_RO),
            vec!["OPTIONS", "GET", "HEAD"]
        );
    }
}
