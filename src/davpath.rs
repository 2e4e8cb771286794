//! Utility module to handle the path part of an URL as a tree path.
//!
//! A [`DavPath`] is the decoded path of a request, minus the prefix that
//! was configured on the handler. The engine itself works on *tree paths*:
//! `/`-delimited strings without a leading or trailing slash, where the
//! root of the tree is the empty string.
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

// Characters that must be escaped in a path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Path information relative to a prefix.
#[derive(Clone)]
pub struct DavPath {
    segments: Vec<String>,
    prefix: String,
    collection: bool,
    star: bool,
}

/// Error returned by the `DavPath` constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// cannot parse
    InvalidPath,
    /// outside of prefix
    PrefixMismatch,
    /// too many dotdots
    ForbiddenPath,
    /// contains NUL or other illegal bytes
    IllegalPath,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ParseError::InvalidPath => "invalid path",
            ParseError::PrefixMismatch => "path outside of prefix",
            ParseError::ForbiddenPath => "path escapes the root",
            ParseError::IllegalPath => "illegal characters in path",
        };
        f.write_str(s)
    }
}

impl std::error::Error for ParseError {}

fn normalize_prefix(prefix: &str) -> String {
    let p = prefix.trim_end_matches('/');
    if p.is_empty() {
        String::new()
    } else if p.starts_with('/') {
        p.to_string()
    } else {
        format!("/{p}")
    }
}

impl DavPath {
    /// Parse an url path without a prefix.
    pub fn new(src: &str) -> Result<DavPath, ParseError> {
        DavPath::from_str_and_prefix(src, "")
    }

    /// Parse the path of an `http::Uri`, stripping `prefix`.
    pub fn from_uri_and_prefix(uri: &http::Uri, prefix: &str) -> Result<DavPath, ParseError> {
        DavPath::from_str_and_prefix(uri.path(), prefix)
    }

    /// Parse an url path (percent-encoded), stripping `prefix`.
    pub fn from_str_and_prefix(src: &str, prefix: &str) -> Result<DavPath, ParseError> {
        let prefix = normalize_prefix(prefix);
        let src = src.split('?').next().unwrap_or_default();

        if src == "*" {
            return Ok(DavPath {
                segments: Vec::new(),
                prefix,
                collection: true,
                star: true,
            });
        }
        if !src.starts_with('/') {
            return Err(ParseError::InvalidPath);
        }

        let rest = match src.strip_prefix(prefix.as_str()) {
            Some(r) if r.is_empty() || r.starts_with('/') => r,
            _ => return Err(ParseError::PrefixMismatch),
        };

        let mut segments: Vec<String> = Vec::new();
        for raw in rest.split('/') {
            let seg = percent_decode_str(raw)
                .decode_utf8()
                .map_err(|_| ParseError::InvalidPath)?;
            if seg.contains('\0') || seg.contains('/') {
                return Err(ParseError::IllegalPath);
            }
            match seg.as_ref() {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(ParseError::ForbiddenPath);
                    }
                }
                s => segments.push(s.to_string()),
            }
        }

        let collection = segments.is_empty() || rest.ends_with('/');
        Ok(DavPath {
            segments,
            prefix,
            collection,
            star: false,
        })
    }

    /// Build a path from a normalized tree path.
    pub fn from_tree_path(path: &str, prefix: &str) -> DavPath {
        DavPath {
            segments: normalize(path)
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect(),
            prefix: normalize_prefix(prefix),
            collection: normalize(path).is_empty(),
            star: false,
        }
    }

    /// The normalized tree path: no leading or trailing slash, root is "".
    pub fn as_tree_path(&self) -> String {
        self.segments.join("/")
    }

    /// Is this the OPTIONS `*` path.
    pub fn is_star(&self) -> bool {
        self.star
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Did the url end in a slash.
    pub fn is_collection(&self) -> bool {
        self.collection
    }

    /// Mark the path as a collection (url ends in a slash).
    pub fn add_slash(&mut self) {
        self.collection = true;
    }

    /// Last segment of the path, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    /// Parent collection. The parent of the root is the root.
    pub fn parent(&self) -> DavPath {
        let mut segments = self.segments.clone();
        segments.pop();
        DavPath {
            segments,
            prefix: self.prefix.clone(),
            collection: true,
            star: false,
        }
    }

    /// Path of a member of this collection.
    pub fn join(&self, name: &str) -> DavPath {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        DavPath {
            segments,
            prefix: self.prefix.clone(),
            collection: false,
            star: false,
        }
    }

    /// True if `other` is strictly below this path.
    pub fn is_ancestor_of(&self, other: &DavPath) -> bool {
        other.segments.len() > self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// The prefix that was stripped off.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Url-encoded path without the prefix.
    pub fn as_url_string(&self) -> String {
        let mut s = String::from("/");
        let encoded: Vec<String> = self
            .segments
            .iter()
            .map(|seg| utf8_percent_encode(seg, PATH_SEGMENT).to_string())
            .collect();
        s.push_str(&encoded.join("/"));
        if self.collection && !self.segments.is_empty() {
            s.push('/');
        }
        s
    }

    /// Url-encoded path including the prefix, as used in `href` elements.
    pub fn with_prefix(&self) -> String {
        format!("{}{}", self.prefix, self.as_url_string())
    }

    /// Relative filesystem path.
    pub fn as_rel_ospath(&self) -> PathBuf {
        self.segments.iter().collect()
    }
}

// The trailing slash is presentation only.
impl PartialEq for DavPath {
    fn eq(&self, other: &DavPath) -> bool {
        self.segments == other.segments && self.star == other.star
    }
}

impl Eq for DavPath {}

impl Hash for DavPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.segments.hash(state);
        self.star.hash(state);
    }
}

impl fmt::Display for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.with_prefix())
    }
}

impl fmt::Debug for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.with_prefix())
    }
}

/// Strip leading and trailing slashes off a tree path.
pub fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

/// Split a tree path into (parent, name). The root splits into ("", "").
pub fn split(path: &str) -> (&str, &str) {
    let path = normalize(path);
    match path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    }
}

/// Join a tree path and a member name.
pub fn join(parent: &str, name: &str) -> String {
    let parent = normalize(parent);
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// True if tree path `path` is `prefix` or lies below it.
pub fn is_under(path: &str, prefix: &str) -> bool {
    let (path, prefix) = (normalize(path), normalize(prefix));
    prefix.is_empty()
        || path == prefix
        || (path.len() > prefix.len()
            && path.starts_with(prefix)
            && path.as_bytes()[prefix.len()] == b'/')
}
