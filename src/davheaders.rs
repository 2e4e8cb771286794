//! Typed WebDAV request/response headers, for use with `headers::HeaderMapExt`.
use std::fmt;

use headers::{Header, HeaderMapExt};
use http::header::{HeaderName, HeaderValue};
use regex::Regex;

lazy_static! {
    static ref DEPTH: HeaderName = HeaderName::from_static("depth");
    static ref TIMEOUT: HeaderName = HeaderName::from_static("timeout");
    static ref OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
    static ref DESTINATION: HeaderName = HeaderName::from_static("destination");
    static ref LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
    static ref IF: HeaderName = HeaderName::from_static("if");
    static ref CONTENT_LOCATION: HeaderName = HeaderName::from_static("content-location");
    static ref X_LITMUS: HeaderName = HeaderName::from_static("x-litmus");
    static ref RE_SECOND: Regex = Regex::new(r"(?i)^second-(\d+)$").unwrap();
}

fn one<'i, I>(values: &mut I) -> Result<&'i HeaderValue, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let v = values.next().ok_or_else(headers::Error::invalid)?;
    if values.next().is_some() {
        return Err(headers::Error::invalid());
    }
    Ok(v)
}

fn one_str<'i, I>(values: &mut I) -> Result<&'i str, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    one(values)?.to_str().map_err(|_| headers::Error::invalid())
}

fn encode_str<E: Extend<HeaderValue>>(s: &str, values: &mut E) {
    if let Ok(v) = HeaderValue::from_str(s) {
        values.extend(std::iter::once(v));
    }
}

/// Depth: header, and the depth of tree operations.
///
/// The header only carries `0`, `1` and `infinity`; tree operations
/// count down from any finite depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Finite(u32),
    Infinity,
}

impl Depth {
    pub const ZERO: Depth = Depth::Finite(0);
    pub const ONE: Depth = Depth::Finite(1);

    /// Depth for the next level down. Infinity stays infinite.
    pub fn decrement(self) -> Depth {
        match self {
            Depth::Finite(n) => Depth::Finite(n.saturating_sub(1)),
            Depth::Infinity => Depth::Infinity,
        }
    }

    pub fn is_zero(self) -> bool {
        self == Depth::ZERO
    }
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one_str(values)?.trim() {
            "0" => Ok(Depth::ZERO),
            "1" => Ok(Depth::ONE),
            s if s.eq_ignore_ascii_case("infinity") => Ok(Depth::Infinity),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let s = match self {
            Depth::Infinity => "infinity".to_string(),
            Depth::Finite(n) => n.to_string(),
        };
        encode_str(&s, values);
    }
}

/// Read the Depth: header. Missing or unrecognized values give `default`.
pub(crate) fn depth(headers: &http::HeaderMap, default: Depth) -> Depth {
    headers.typed_get::<Depth>().unwrap_or(default)
}

/// One entry of the Timeout: header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DavTimeout {
    Seconds(u32),
    Infinite,
}

/// Timeout: header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeout(pub Vec<DavTimeout>);

impl Header for Timeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let mut v = Vec::new();
        for value in values {
            let value = value.to_str().map_err(|_| headers::Error::invalid())?;
            for word in value.split(',').map(|w| w.trim()) {
                if word.eq_ignore_ascii_case("infinite") {
                    v.push(DavTimeout::Infinite);
                } else if let Some(caps) = RE_SECOND.captures(word) {
                    // out of range values are clamped.
                    let secs = caps[1].parse::<u64>().unwrap_or(u64::MAX);
                    v.push(DavTimeout::Seconds(secs.min(u32::MAX as u64) as u32));
                } else {
                    return Err(headers::Error::invalid());
                }
            }
        }
        if v.is_empty() {
            return Err(headers::Error::invalid());
        }
        Ok(Timeout(v))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let s: Vec<String> = self
            .0
            .iter()
            .map(|t| match t {
                DavTimeout::Seconds(n) => format!("Second-{n}"),
                DavTimeout::Infinite => "Infinite".to_string(),
            })
            .collect();
        encode_str(&s.join(", "), values);
    }
}

/// Overwrite: header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one_str(values)?.trim() {
            "T" | "t" => Ok(Overwrite(true)),
            "F" | "f" => Ok(Overwrite(false)),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(if self.0 { "T" } else { "F" }, values);
    }
}

/// Destination: header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination(pub String);

impl Header for Destination {
    fn name() -> &'static HeaderName {
        &DESTINATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one_str(values)?.trim();
        if s.is_empty() {
            return Err(headers::Error::invalid());
        }
        Ok(Destination(s.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(&self.0, values);
    }
}

/// Lock-Token: header. Holds the token without the angle brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

impl Header for LockToken {
    fn name() -> &'static HeaderName {
        &LOCK_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one_str(values)?.trim();
        let s = s
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .ok_or_else(headers::Error::invalid)?;
        Ok(LockToken(s.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(&format!("<{}>", self.0), values);
    }
}

/// Content-Location: header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLocation(pub String);

impl Header for ContentLocation {
    fn name() -> &'static HeaderName {
        &CONTENT_LOCATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        Ok(ContentLocation(one_str(values)?.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(&self.0, values);
    }
}

/// X-Litmus: header, sent by the litmus test suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XLitmus(pub String);

impl Header for XLitmus {
    fn name() -> &'static HeaderName {
        &X_LITMUS
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        Ok(XLitmus(one_str(values)?.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(&self.0, values);
    }
}

/// The thing a condition in an If: header tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfItem {
    /// A state token, usually `opaquelocktoken:...`.
    StateToken(String),
    /// An entity tag, with quotes and weak marker removed.
    ETag(String),
}

/// One, possibly negated, condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfCondition {
    pub not: bool,
    pub item: IfItem,
}

/// A parenthesized list of conditions, all of which must hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfList {
    /// Resource tag; `None` means the request uri.
    pub resource_tag: Option<String>,
    pub conditions: Vec<IfCondition>,
}

/// If: header (RFC4918 section 10.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct If(pub Vec<IfList>);

impl If {
    /// All state tokens mentioned without a `Not`.
    pub fn positive_tokens(&self) -> impl Iterator<Item = &str> {
        self.0.iter().flat_map(|l| {
            l.conditions.iter().filter_map(|c| match (&c.item, c.not) {
                (IfItem::StateToken(t), false) => Some(t.as_str()),
                _ => None,
            })
        })
    }
}

pub(crate) fn strip_etag(s: &str) -> String {
    let s = s.trim();
    let s = s.strip_prefix("W/").unwrap_or(s);
    s.trim_matches('"').to_string()
}

// Read up to (not including) `end`, return the text and the rest after `end`.
fn read_until(s: &str, end: char) -> Option<(&str, &str)> {
    let idx = s.find(end)?;
    Some((&s[..idx], &s[idx + end.len_utf8()..]))
}

fn parse_if(mut s: &str) -> Option<If> {
    let mut lists = Vec::new();
    let mut tag: Option<String> = None;

    loop {
        s = s.trim_start();
        if s.is_empty() {
            break;
        }
        if let Some(rest) = s.strip_prefix('<') {
            let (url, rest) = read_until(rest, '>')?;
            tag = Some(url.to_string());
            s = rest;
            continue;
        }
        let mut rest = s.strip_prefix('(')?;
        let mut conditions = Vec::new();
        loop {
            rest = rest.trim_start();
            if let Some(r) = rest.strip_prefix(')') {
                rest = r;
                break;
            }
            let mut not = false;
            if rest.get(..3).map_or(false, |w| w.eq_ignore_ascii_case("not")) {
                not = true;
                rest = rest[3..].trim_start();
            }
            let item = if let Some(r) = rest.strip_prefix('<') {
                let (token, r) = read_until(r, '>')?;
                rest = r;
                IfItem::StateToken(token.to_string())
            } else if let Some(r) = rest.strip_prefix('[') {
                let (etag, r) = read_until(r, ']')?;
                rest = r;
                IfItem::ETag(strip_etag(etag))
            } else {
                return None;
            };
            conditions.push(IfCondition { not, item });
        }
        if conditions.is_empty() {
            return None;
        }
        lists.push(IfList {
            resource_tag: tag.clone(),
            conditions,
        });
        s = rest;
    }

    if lists.is_empty() {
        None
    } else {
        Some(If(lists))
    }
}

impl Header for If {
    fn name() -> &'static HeaderName {
        &IF
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one_str(values)?;
        parse_if(s).ok_or_else(headers::Error::invalid)
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(&self.to_string(), values);
    }
}

impl fmt::Display for If {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut tag: Option<&String> = None;
        let mut first = true;
        for list in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            if list.resource_tag.as_ref() != tag {
                if let Some(t) = &list.resource_tag {
                    write!(f, "<{t}> ")?;
                }
                tag = list.resource_tag.as_ref();
            }
            f.write_str("(")?;
            for (i, c) in list.conditions.iter().enumerate() {
                if i > 0 {
                    f.write_str(" ")?;
                }
                if c.not {
                    f.write_str("Not ")?;
                }
                match &c.item {
                    IfItem::StateToken(t) => write!(f, "<{t}>")?,
                    IfItem::ETag(e) => write!(f, "[\"{e}\"]")?,
                }
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;

    fn headers(name: &str, value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
        h
    }

    #[test]
    fn depth_header() {
        assert_eq!(depth(&headers("depth", "0"), Depth::Infinity), Depth::ZERO);
        assert_eq!(depth(&headers("depth", "Infinity"), Depth::ZERO), Depth::Infinity);
        // unrecognized values fall back to the default.
        assert_eq!(depth(&headers("depth", "2"), Depth::ONE), Depth::ONE);
        assert_eq!(depth(&HeaderMap::new(), Depth::Infinity), Depth::Infinity);
        assert_eq!(Depth::Finite(2).decrement(), Depth::ONE);
        assert_eq!(Depth::Infinity.decrement(), Depth::Infinity);
    }

    #[test]
    fn timeout_header() {
        let h = headers("timeout", "Second-3600, Infinite");
        assert_eq!(
            h.typed_get::<Timeout>(),
            Some(Timeout(vec![DavTimeout::Seconds(3600), DavTimeout::Infinite]))
        );
        assert_eq!(headers("timeout", "Minute-5").typed_get::<Timeout>(), None);
    }

    #[test]
    fn lock_token_header() {
        let h = headers("lock-token", "<opaquelocktoken:abc>");
        assert_eq!(
            h.typed_get::<LockToken>(),
            Some(LockToken("opaquelocktoken:abc".to_string()))
        );
        assert_eq!(headers("lock-token", "abc").typed_get::<LockToken>(), None);
    }

    #[test]
    fn if_header_untagged() {
        let h = headers(
            "if",
            r#"(<opaquelocktoken:a> ["etag1"]) (Not <DAV:no-lock> [W/"etag2"])"#,
        );
        let hdr = h.typed_get::<If>().unwrap();
        assert_eq!(hdr.0.len(), 2);
        assert_eq!(hdr.0[0].resource_tag, None);
        assert_eq!(
            hdr.0[0].conditions,
            vec![
                IfCondition {
                    not: false,
                    item: IfItem::StateToken("opaquelocktoken:a".to_string())
                },
                IfCondition {
                    not: false,
                    item: IfItem::ETag("etag1".to_string())
                },
            ]
        );
        assert!(hdr.0[1].conditions[0].not);
        assert_eq!(hdr.0[1].conditions[1].item, IfItem::ETag("etag2".to_string()));
        assert_eq!(hdr.positive_tokens().collect::<Vec<_>>(), vec!["opaquelocktoken:a"]);
    }

    #[test]
    fn if_header_tagged() {
        let h = headers(
            "if",
            "<http://host/a> (<opaquelocktoken:1>) (<opaquelocktoken:2>) </b> (<opaquelocktoken:3>)",
        );
        let hdr = h.typed_get::<If>().unwrap();
        assert_eq!(hdr.0.len(), 3);
        assert_eq!(hdr.0[0].resource_tag.as_deref(), Some("http://host/a"));
        assert_eq!(hdr.0[1].resource_tag.as_deref(), Some("http://host/a"));
        assert_eq!(hdr.0[2].resource_tag.as_deref(), Some("/b"));
    }

    #[test]
    fn if_header_invalid() {
        assert_eq!(headers("if", "(").typed_get::<If>(), None);
        assert_eq!(headers("if", "()").typed_get::<If>(), None);
        assert_eq!(headers("if", "<x>").typed_get::<If>(), None);
        assert_eq!(headers("if", "(token)").typed_get::<If>(), None);
    }
}
