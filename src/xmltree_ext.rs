//! Small helpers on top of `xmltree::Element`.
//!
//! Elements are built with short prefixed names ("D:href"), and identified
//! by their clark name ("{DAV:}href") when parsed.
use xml::writer::EmitterConfig;
use xmltree::{Element, Namespace, XMLNode};

use crate::errors::{DavError, DavResult};

pub(crate) const NS_DAV_URI: &str = "DAV:";
pub(crate) const NS_CALDAV_URI: &str = "urn:ietf:params:xml:ns:caldav";
pub(crate) const NS_CARDDAV_URI: &str = "urn:ietf:params:xml:ns:carddav";

fn prefix_to_ns(prefix: &str) -> Option<&'static str> {
    match prefix {
        "D" => Some(NS_DAV_URI),
        "C" => Some(NS_CALDAV_URI),
        "CR" => Some(NS_CARDDAV_URI),
        _ => None,
    }
}

fn ns_to_prefix(ns: &str) -> &'static str {
    match ns {
        NS_DAV_URI => "D",
        NS_CALDAV_URI => "C",
        NS_CARDDAV_URI => "CR",
        _ => "X",
    }
}

pub(crate) trait ElementExt {
    /// Builder: "D:name" gets prefix "D" and namespace "DAV:".
    fn new2(n: &str) -> Self;
    /// Builder: declare a namespace on this element.
    fn ns(self, prefix: &str, namespace: &str) -> Self;
    /// Builder: set the text content.
    fn text<T: Into<String>>(self, t: T) -> Self;
    /// Append a child element.
    fn push_elem(&mut self, e: Element);
    /// Iterate over child elements, skipping text and comments.
    fn child_elems(&self) -> Box<dyn Iterator<Item = &Element> + '_>;
    /// Is this `{DAV:}name`.
    fn is_dav(&self, name: &str) -> bool;
    /// First child `{DAV:}name`.
    fn dav_child(&self, name: &str) -> Option<&Element>;
    /// "{namespace}name".
    fn clark_name(&self) -> String;
}

impl ElementExt for Element {
    fn new2(n: &str) -> Element {
        match n.split_once(':') {
            Some((prefix, name)) => {
                let mut e = Element::new(name);
                e.prefix = Some(prefix.to_string());
                e.namespace = prefix_to_ns(prefix).map(|s| s.to_string());
                e
            }
            None => Element::new(n),
        }
    }

    fn ns(mut self, prefix: &str, namespace: &str) -> Element {
        let mut ns = self.namespaces.take().unwrap_or_else(Namespace::empty);
        ns.put(prefix, namespace);
        self.namespaces = Some(ns);
        self
    }

    fn text<T: Into<String>>(mut self, t: T) -> Element {
        self.children.push(XMLNode::Text(t.into()));
        self
    }

    fn push_elem(&mut self, e: Element) {
        self.children.push(XMLNode::Element(e));
    }

    fn child_elems(&self) -> Box<dyn Iterator<Item = &Element> + '_> {
        Box::new(self.children.iter().filter_map(|n| match n {
            XMLNode::Element(e) => Some(e),
            _ => None,
        }))
    }

    fn is_dav(&self, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(NS_DAV_URI)
    }

    fn dav_child(&self, name: &str) -> Option<&Element> {
        self.child_elems().find(|e| e.is_dav(name))
    }

    fn clark_name(&self) -> String {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => format!("{{{}}}{}", ns, self.name),
            _ => self.name.clone(),
        }
    }
}

/// Split "{ns}name" into its parts.
pub(crate) fn parse_clark(clark: &str) -> (Option<&str>, &str) {
    if let Some(rest) = clark.strip_prefix('{') {
        if let Some((ns, name)) = rest.split_once('}') {
            return (Some(ns), name);
        }
    }
    (None, clark)
}

/// Build an empty element from a clark name.
pub(crate) fn from_clark(clark: &str) -> Element {
    let (ns, name) = parse_clark(clark);
    let mut e = Element::new(name);
    if let Some(ns) = ns {
        let prefix = ns_to_prefix(ns);
        e.prefix = Some(prefix.to_string());
        e.namespace = Some(ns.to_string());
        if prefix == "X" {
            e = e.ns(prefix, ns);
        }
    }
    e
}

/// Parse a request body.
pub(crate) fn parse_xml(body: &[u8]) -> DavResult<Element> {
    let e = Element::parse(body)?;
    Ok(e)
}

/// Serialize an element as a complete document.
pub(crate) fn to_xml_bytes(e: &Element) -> Result<Vec<u8>, xmltree::Error> {
    let mut buf = Vec::new();
    let config = EmitterConfig::new()
        .perform_indent(false)
        .write_document_declaration(true);
    e.write_with_config(&mut buf, config)?;
    Ok(buf)
}

/// Serialize an element as a fragment (no xml declaration).
pub(crate) fn to_fragment_bytes(e: &Element) -> DavResult<Vec<u8>> {
    let mut buf = Vec::new();
    let config = EmitterConfig::new()
        .perform_indent(false)
        .write_document_declaration(false);
    e.write_with_config(&mut buf, config)
        .map_err(DavError::XmlWriterError)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clark() {
        assert_eq!(parse_clark("{DAV:}read"), (Some("DAV:"), "read"));
        assert_eq!(parse_clark("plain"), (None, "plain"));
        let e = from_clark("{http://example.com/ns}color");
        assert_eq!(e.clark_name(), "{http://example.com/ns}color");
        assert_eq!(Element::new2("D:prop").clark_name(), "{DAV:}prop");
    }

    #[test]
    fn parse_dav_children() {
        let xml = br#"<?xml version="1.0"?>
            <d:propfind xmlns:d="DAV:"><d:prop><d:getetag/></d:prop></d:propfind>"#;
        let e = parse_xml(xml).unwrap();
        assert!(e.is_dav("propfind"));
        let prop = e.dav_child("prop").unwrap();
        assert_eq!(prop.child_elems().count(), 1);
        assert!(prop.dav_child("getetag").is_some());
    }
}
