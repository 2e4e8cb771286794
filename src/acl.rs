//! Access control (RFC3744).
//!
//! Only positive grants are supported: an ACL is an ordered list of
//! [`Ace`]s, and a privilege that is not granted is denied. Privileges form
//! a hierarchy ([`PrivilegeMap`]): granting an aggregate privilege grants
//! everything below it.
use std::collections::{HashMap, HashSet};

use xmltree::Element;

use crate::davpath;
use crate::errors::DavCondition;
use crate::fs::{DavNodeRef, FsError};
use crate::tree::Tree;
use crate::xmltree_ext::{self, ElementExt};

pub const PRIV_ALL: &str = "{DAV:}all";
pub const PRIV_READ: &str = "{DAV:}read";
pub const PRIV_WRITE: &str = "{DAV:}write";
pub const PRIV_WRITE_CONTENT: &str = "{DAV:}write-content";
pub const PRIV_WRITE_PROPERTIES: &str = "{DAV:}write-properties";
pub const PRIV_BIND: &str = "{DAV:}bind";
pub const PRIV_UNBIND: &str = "{DAV:}unbind";
pub const PRIV_UNLOCK: &str = "{DAV:}unlock";
pub const PRIV_READ_ACL: &str = "{DAV:}read-acl";
pub const PRIV_WRITE_ACL: &str = "{DAV:}write-acl";
pub const PRIV_READ_CUPS: &str = "{DAV:}read-current-user-privilege-set";
pub const PRIV_READ_FREE_BUSY: &str = "{urn:ietf:params:xml:ns:caldav}read-free-busy";

/// Pseudo principal: everybody.
pub const PRINCIPAL_ALL: &str = "{DAV:}all";
/// Pseudo principal: any authenticated user.
pub const PRINCIPAL_AUTHENTICATED: &str = "{DAV:}authenticated";
/// Pseudo principal: requests without a user.
pub const PRINCIPAL_UNAUTHENTICATED: &str = "{DAV:}unauthenticated";
/// Pseudo principal: the owner of the node.
pub const PRINCIPAL_OWNER: &str = "{DAV:}owner";

/// Access control entry: `principal` is granted `privilege`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ace {
    /// Principal uri, or one of the `PRINCIPAL_*` pseudo principals.
    pub principal: String,
    /// Privilege in clark notation, e.g. `{DAV:}write`.
    pub privilege: String,
    /// Protected entries cannot be removed with the ACL method.
    pub protected: bool,
}

impl Ace {
    pub fn new(principal: impl Into<String>, privilege: impl Into<String>) -> Ace {
        Ace {
            principal: principal.into(),
            privilege: privilege.into(),
            protected: false,
        }
    }

    /// Builder: mark as protected.
    pub fn protected(mut self) -> Ace {
        self.protected = true;
        self
    }
}

/// One entry of the privilege hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegeInfo {
    pub name: String,
    pub parent: Option<String>,
    /// Abstract privileges cannot be granted in an ACE.
    pub is_abstract: bool,
    pub description: String,
}

/// The privilege hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegeMap {
    privileges: Vec<PrivilegeInfo>,
}

impl PrivilegeMap {
    /// A hierarchy with just a root privilege.
    pub fn new(root: &str, description: &str) -> PrivilegeMap {
        PrivilegeMap {
            privileges: vec![PrivilegeInfo {
                name: root.to_string(),
                parent: None,
                is_abstract: false,
                description: description.to_string(),
            }],
        }
    }

    /// Builder: add a privilege below `parent`.
    pub fn add(mut self, name: &str, parent: &str, is_abstract: bool, description: &str) -> Self {
        self.privileges.push(PrivilegeInfo {
            name: name.to_string(),
            parent: Some(parent.to_string()),
            is_abstract,
            description: description.to_string(),
        });
        self
    }

    /// The RFC3744 hierarchy, plus CalDAV read-free-busy.
    pub fn rfc3744() -> PrivilegeMap {
        PrivilegeMap::new(PRIV_ALL, "Any operation")
            .add(PRIV_READ, PRIV_ALL, false, "Read")
            .add(PRIV_READ_ACL, PRIV_READ, false, "Read ACL")
            .add(PRIV_READ_CUPS, PRIV_READ, true, "Read current user privilege set")
            .add(PRIV_READ_FREE_BUSY, PRIV_READ, false, "Read free/busy information")
            .add(PRIV_WRITE, PRIV_ALL, false, "Write")
            .add(PRIV_WRITE_PROPERTIES, PRIV_WRITE, false, "Write properties")
            .add(PRIV_WRITE_CONTENT, PRIV_WRITE, false, "Write content")
            .add(PRIV_BIND, PRIV_WRITE, false, "Add new members")
            .add(PRIV_UNBIND, PRIV_WRITE, false, "Remove members")
            .add(PRIV_WRITE_ACL, PRIV_ALL, false, "Write ACL")
            .add(PRIV_UNLOCK, PRIV_ALL, false, "Unlock resources locked by others")
    }

    pub fn get(&self, name: &str) -> Option<&PrivilegeInfo> {
        self.privileges.iter().find(|p| p.name == name)
    }

    pub fn is_supported(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_abstract(&self, name: &str) -> bool {
        self.get(name).map(|p| p.is_abstract).unwrap_or(false)
    }

    fn children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a PrivilegeInfo> + 'a {
        self.privileges
            .iter()
            .filter(move |p| p.parent.as_deref() == Some(name))
    }

    /// `name` and everything it aggregates.
    pub fn descendants(&self, name: &str) -> Vec<&str> {
        let mut result = Vec::new();
        let mut todo = match self.get(name) {
            Some(p) => vec![p.name.as_str()],
            None => return result,
        };
        while let Some(n) = todo.pop() {
            result.push(n);
            todo.extend(self.children(n).map(|c| c.name.as_str()));
        }
        result
    }

    /// Walk up from `name` to the first privilege that is not abstract.
    pub fn get_concrete_privilege(&self, name: &str) -> Option<&str> {
        let mut p = self.get(name)?;
        while p.is_abstract {
            p = self.get(p.parent.as_deref()?)?;
        }
        Some(p.name.as_str())
    }

    /// Everything granted by a set of privileges.
    pub fn expand<'a>(&self, granted: impl IntoIterator<Item = &'a str>) -> HashSet<String> {
        let mut set = HashSet::new();
        for g in granted {
            for d in self.descendants(g) {
                set.insert(d.to_string());
            }
        }
        set
    }

    /// Is `required` satisfied by the expanded set `effective`.
    ///
    /// An abstract privilege is satisfied by any concrete privilege below it.
    pub fn satisfies(&self, effective: &HashSet<String>, required: &str) -> bool {
        if effective.contains(required) {
            return true;
        }
        self.is_abstract(required)
            && self
                .descendants(required)
                .into_iter()
                .any(|d| !self.is_abstract(d) && effective.contains(d))
    }

    /// `<D:supported-privilege-set>`.
    pub fn to_element(&self) -> Element {
        let mut set = Element::new2("D:supported-privilege-set");
        if let Some(root) = self.privileges.iter().find(|p| p.parent.is_none()) {
            set.push_elem(self.supported_privilege(root));
        }
        set
    }

    fn supported_privilege(&self, p: &PrivilegeInfo) -> Element {
        let mut sp = Element::new2("D:supported-privilege");
        let mut privilege = Element::new2("D:privilege");
        privilege.push_elem(xmltree_ext::from_clark(&p.name));
        sp.push_elem(privilege);
        if p.is_abstract {
            sp.push_elem(Element::new2("D:abstract"));
        }
        sp.push_elem(Element::new2("D:description").text(p.description.clone()));
        for child in self.children(&p.name) {
            sp.push_elem(self.supported_privilege(child));
        }
        sp
    }
}

impl Default for PrivilegeMap {
    fn default() -> Self {
        PrivilegeMap::rfc3744()
    }
}

/// Failure of a privilege check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclError {
    /// The principal lacks `privileges` on tree path `path`.
    NeedPrivileges { path: String, privileges: Vec<String> },
    Fs(FsError),
}

impl From<FsError> for AclError {
    fn from(e: FsError) -> Self {
        AclError::Fs(e)
    }
}

/// Access control configuration, passed to the handler.
#[derive(Debug, Clone)]
pub struct AclConfig {
    /// ACL used for nodes that do not carry one.
    pub default_acl: Vec<Ace>,
    /// Principals that are granted everything.
    pub admin_principals: Vec<String>,
    /// Principal -> groups it is a member of.
    pub group_membership: HashMap<String, Vec<String>>,
    /// Leave unreadable nodes out of PROPFIND listings instead of
    /// reporting 403 for their properties.
    pub hide_nodes_from_listings: bool,
    pub privileges: PrivilegeMap,
}

impl Default for AclConfig {
    fn default() -> Self {
        AclConfig {
            default_acl: vec![Ace::new(PRINCIPAL_AUTHENTICATED, PRIV_ALL).protected()],
            admin_principals: Vec::new(),
            group_membership: HashMap::new(),
            hide_nodes_from_listings: false,
            privileges: PrivilegeMap::rfc3744(),
        }
    }
}

impl AclConfig {
    pub fn new() -> AclConfig {
        AclConfig::default()
    }

    /// Set the ACL for nodes without one.
    pub fn default_acl(mut self, acl: Vec<Ace>) -> Self {
        self.default_acl = acl;
        self
    }

    /// Add a principal that bypasses all checks.
    pub fn admin(mut self, principal: impl Into<String>) -> Self {
        self.admin_principals.push(principal.into());
        self
    }

    /// Make `principal` a member of `group`.
    pub fn group(mut self, principal: impl Into<String>, group: impl Into<String>) -> Self {
        self.group_membership
            .entry(principal.into())
            .or_default()
            .push(group.into());
        self
    }

    pub fn hide_nodes_from_listings(mut self, hide: bool) -> Self {
        self.hide_nodes_from_listings = hide;
        self
    }

    pub fn privileges(mut self, privileges: PrivilegeMap) -> Self {
        self.privileges = privileges;
        self
    }

    /// Every principal the current user counts as, for a node with `owner`.
    pub fn current_principals(&self, principal: Option<&str>, owner: Option<&str>) -> Vec<String> {
        let mut v = vec![PRINCIPAL_ALL.to_string()];
        match principal {
            Some(p) => {
                v.push(PRINCIPAL_AUTHENTICATED.to_string());
                v.push(p.to_string());
                if owner == Some(p) {
                    v.push(PRINCIPAL_OWNER.to_string());
                }
                // groups, and groups of groups.
                let mut todo = vec![p.to_string()];
                while let Some(member) = todo.pop() {
                    for g in self.group_membership.get(&member).into_iter().flatten() {
                        if !v.contains(g) {
                            v.push(g.clone());
                            todo.push(g.clone());
                        }
                    }
                }
            }
            None => v.push(PRINCIPAL_UNAUTHENTICATED.to_string()),
        }
        v
    }

    /// The ACL and owner of a node.
    pub fn node_acl(&self, node: &DavNodeRef) -> (Vec<Ace>, Option<String>) {
        match node.access_control() {
            Some(ac) => (ac.acl(), ac.owner()),
            None => (self.default_acl.clone(), None),
        }
    }

    fn is_admin(&self, principal: Option<&str>) -> bool {
        principal
            .map(|p| self.admin_principals.iter().any(|a| a == p))
            .unwrap_or(false)
    }

    /// All privileges the current user holds on `node`, expanded.
    pub fn current_user_privileges(
        &self,
        node: &DavNodeRef,
        principal: Option<&str>,
    ) -> HashSet<String> {
        if self.is_admin(principal) {
            return self.privileges.expand([PRIV_ALL]);
        }
        let (acl, owner) = self.node_acl(node);
        let principals = self.current_principals(principal, owner.as_deref());
        let granted = acl
            .iter()
            .filter(|ace| principals.contains(&ace.principal))
            .map(|ace| ace.privilege.as_str());
        self.privileges.expand(granted)
    }

    /// The subset of `required` that the current user does not hold.
    pub fn missing_privileges(
        &self,
        node: &DavNodeRef,
        principal: Option<&str>,
        required: &[&str],
    ) -> Vec<String> {
        let effective = self.current_user_privileges(node, principal);
        required
            .iter()
            .filter(|r| !self.privileges.satisfies(&effective, r))
            .map(|r| r.to_string())
            .collect()
    }

    /// Check that the current user holds `required` on the node at `path`.
    ///
    /// With `recursive`, every node below `path` is checked as well.
    pub async fn check_privilege(
        &self,
        tree: &Tree,
        path: &str,
        principal: Option<&str>,
        required: &[&str],
        recursive: bool,
    ) -> Result<(), AclError> {
        let node = tree.get_node_for_path(path).await?;
        self.check_node(&node, path, principal, required)?;
        if !recursive || !node.is_collection() {
            return Ok(());
        }
        let mut todo = vec![davpath::normalize(path).to_string()];
        while let Some(dir) = todo.pop() {
            for child in tree.get_children(&dir).await? {
                let child_path = davpath::join(&dir, &child.name());
                self.check_node(&child, &child_path, principal, required)?;
                if child.is_collection() {
                    todo.push(child_path);
                }
            }
        }
        Ok(())
    }

    fn check_node(
        &self,
        node: &DavNodeRef,
        path: &str,
        principal: Option<&str>,
        required: &[&str],
    ) -> Result<(), AclError> {
        let missing = self.missing_privileges(node, principal, required);
        if missing.is_empty() {
            Ok(())
        } else {
            debug!("acl: {principal:?} lacks {missing:?} on {path:?}");
            Err(AclError::NeedPrivileges {
                path: davpath::normalize(path).to_string(),
                privileges: missing,
            })
        }
    }

    /// Validate a new ACL for a node that currently has `old`.
    pub fn validate_acl(&self, new: &[Ace], old: &[Ace]) -> Result<(), DavCondition> {
        for ace in new {
            if !self.privileges.is_supported(&ace.privilege) {
                return Err(DavCondition::NotSupportedPrivilege);
            }
            if self.privileges.is_abstract(&ace.privilege) {
                return Err(DavCondition::NoAbstract);
            }
        }
        let kept = old
            .iter()
            .filter(|a| a.protected)
            .all(|p| new.iter().any(|n| n.principal == p.principal && n.privilege == p.privilege));
        if !kept {
            return Err(DavCondition::NoAceConflict);
        }
        Ok(())
    }
}

fn principal_element(principal: &str) -> Element {
    let mut e = Element::new2("D:principal");
    match principal {
        PRINCIPAL_ALL => e.push_elem(Element::new2("D:all")),
        PRINCIPAL_AUTHENTICATED => e.push_elem(Element::new2("D:authenticated")),
        PRINCIPAL_UNAUTHENTICATED => e.push_elem(Element::new2("D:unauthenticated")),
        PRINCIPAL_OWNER => {
            let mut prop = Element::new2("D:property");
            prop.push_elem(Element::new2("D:owner"));
            e.push_elem(prop);
        }
        href => e.push_elem(Element::new2("D:href").text(href)),
    }
    e
}

/// `<D:acl>` property value.
pub(crate) fn acl_to_element(acl: &[Ace]) -> Element {
    let mut e = Element::new2("D:acl");
    for ace in acl {
        let mut a = Element::new2("D:ace");
        a.push_elem(principal_element(&ace.principal));
        let mut grant = Element::new2("D:grant");
        let mut privilege = Element::new2("D:privilege");
        privilege.push_elem(xmltree_ext::from_clark(&ace.privilege));
        grant.push_elem(privilege);
        a.push_elem(grant);
        if ace.protected {
            a.push_elem(Element::new2("D:protected"));
        }
        e.push_elem(a);
    }
    e
}

/// `<D:current-user-privilege-set>` property value.
pub(crate) fn privilege_set_element(name: &str, privileges: &HashSet<String>) -> Element {
    let mut sorted: Vec<&String> = privileges.iter().collect();
    sorted.sort();
    let mut e = Element::new2(name);
    for p in sorted {
        let mut privilege = Element::new2("D:privilege");
        privilege.push_elem(xmltree_ext::from_clark(p));
        e.push_elem(privilege);
    }
    e
}

/// `<D:acl-restrictions>` property value.
pub(crate) fn acl_restrictions_element() -> Element {
    let mut e = Element::new2("D:acl-restrictions");
    e.push_elem(Element::new2("D:grant-only"));
    e.push_elem(Element::new2("D:no-invert"));
    e
}

/// Parse the body of an ACL request.
pub(crate) fn parse_acl(root: &Element) -> Result<Vec<Ace>, DavCondition> {
    let mut acl = Vec::new();
    for ace in root.child_elems().filter(|e| e.is_dav("ace")) {
        if ace.dav_child("deny").is_some() {
            return Err(DavCondition::GrantOnly);
        }
        if ace.dav_child("invert").is_some() {
            return Err(DavCondition::NoInvert);
        }
        let principal = ace
            .dav_child("principal")
            .and_then(|p| p.child_elems().next())
            .ok_or(DavCondition::RecognizedPrincipal)?;
        let principal = if principal.is_dav("href") {
            principal
                .get_text()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .ok_or(DavCondition::RecognizedPrincipal)?
        } else if principal.is_dav("all") {
            PRINCIPAL_ALL.to_string()
        } else if principal.is_dav("authenticated") {
            PRINCIPAL_AUTHENTICATED.to_string()
        } else if principal.is_dav("unauthenticated") {
            PRINCIPAL_UNAUTHENTICATED.to_string()
        } else if principal.is_dav("property")
            && principal.child_elems().any(|p| p.is_dav("owner"))
        {
            PRINCIPAL_OWNER.to_string()
        } else {
            return Err(DavCondition::RecognizedPrincipal);
        };
        let protected = ace.dav_child("protected").is_some();
        let grant = ace
            .dav_child("grant")
            .ok_or(DavCondition::NotSupportedPrivilege)?;
        for privilege in grant.child_elems().filter(|e| e.is_dav("privilege")) {
            for p in privilege.child_elems() {
                acl.push(Ace {
                    principal: principal.clone(),
                    privilege: p.clark_name(),
                    protected,
                });
            }
        }
    }
    Ok(acl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{DavFileSystem, MemFs};
    use crate::xmltree_ext::parse_xml;

    fn set(v: &[&str]) -> HashSet<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn hierarchy() {
        let map = PrivilegeMap::rfc3744();
        let d = map.descendants(PRIV_WRITE);
        assert!(d.contains(&PRIV_WRITE_CONTENT));
        assert!(d.contains(&PRIV_BIND));
        assert!(!d.contains(&PRIV_READ));
        assert_eq!(map.get_concrete_privilege(PRIV_READ_CUPS), Some(PRIV_READ));
        assert_eq!(map.get_concrete_privilege(PRIV_BIND), Some(PRIV_BIND));
        assert_eq!(map.get_concrete_privilege("{DAV:}bogus"), None);
    }

    #[test]
    fn aggregate_and_abstract() {
        let map = PrivilegeMap::rfc3744();
        let eff = map.expand([PRIV_WRITE]);
        assert!(map.satisfies(&eff, PRIV_WRITE_CONTENT));
        assert!(!map.satisfies(&eff, PRIV_READ));

        // an abstract privilege is satisfied by a concrete one below it.
        let map = PrivilegeMap::new("{DAV:}all", "all")
            .add("{X:}abstract", "{DAV:}all", true, "")
            .add("{X:}a", "{X:}abstract", false, "")
            .add("{X:}b", "{X:}abstract", false, "");
        assert!(map.satisfies(&set(&["{X:}b"]), "{X:}abstract"));
        assert!(!map.satisfies(&set(&[]), "{X:}abstract"));
    }

    #[tokio::test]
    async fn default_deny() {
        let fs = MemFs::with_acl(Vec::new());
        fs.create_file("f", b"x".to_vec()).await.unwrap();
        let tree = Tree::new(fs.root().await.unwrap());
        let cfg = AclConfig::new();
        for principal in [None, Some("/principals/alice")] {
            for privilege in [PRIV_READ, PRIV_WRITE, PRIV_ALL, PRIV_UNLOCK] {
                let res = cfg
                    .check_privilege(&tree, "f", principal, &[privilege], false)
                    .await;
                assert!(
                    matches!(res, Err(AclError::NeedPrivileges { .. })),
                    "{principal:?} {privilege}"
                );
            }
        }
    }

    #[tokio::test]
    async fn grants_and_groups() {
        let fs = MemFs::with_acl(vec![
            Ace::new("/principals/alice", PRIV_READ),
            Ace::new("/principals/editors", PRIV_WRITE),
        ]);
        fs.create_file("f", b"x".to_vec()).await.unwrap();
        let tree = Tree::new(fs.root().await.unwrap());
        let cfg = AclConfig::new().group("/principals/bob", "/principals/editors");

        let alice = Some("/principals/alice");
        let bob = Some("/principals/bob");
        assert!(cfg.check_privilege(&tree, "f", alice, &[PRIV_READ], false).await.is_ok());
        assert!(cfg.check_privilege(&tree, "f", alice, &[PRIV_WRITE_CONTENT], false).await.is_err());
        assert!(cfg.check_privilege(&tree, "f", bob, &[PRIV_WRITE_CONTENT], false).await.is_ok());
        assert_eq!(
            cfg.check_privilege(&tree, "f", bob, &[PRIV_READ, PRIV_BIND], false).await,
            Err(AclError::NeedPrivileges {
                path: "f".to_string(),
                privileges: vec![PRIV_READ.to_string()],
            })
        );

        let admin = AclConfig::new().admin("/principals/root");
        assert!(admin
            .check_privilege(&tree, "f", Some("/principals/root"), &[PRIV_WRITE_ACL], false)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn recursive_check() {
        let fs = MemFs::with_acl(vec![Ace::new(PRINCIPAL_ALL, PRIV_READ)]);
        fs.create_dir("d").await.unwrap();
        fs.create_dir("d/e").await.unwrap();
        fs.create_file("d/e/secret", b"x".to_vec()).await.unwrap();
        fs.set_acl("d/e/secret", Vec::new()).unwrap();
        let tree = Tree::new(fs.root().await.unwrap());
        let cfg = AclConfig::new();

        assert!(cfg.check_privilege(&tree, "d", None, &[PRIV_READ], false).await.is_ok());
        match cfg.check_privilege(&tree, "d", None, &[PRIV_READ], true).await {
            Err(AclError::NeedPrivileges { path, .. }) => assert_eq!(path, "d/e/secret"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn owner_and_default_acl() {
        let cfg = AclConfig::new();
        let p = cfg.current_principals(Some("/p/a"), Some("/p/a"));
        assert!(p.contains(&PRINCIPAL_OWNER.to_string()));
        assert!(p.contains(&PRINCIPAL_AUTHENTICATED.to_string()));
        let p = cfg.current_principals(None, None);
        assert!(p.contains(&PRINCIPAL_UNAUTHENTICATED.to_string()));
        assert!(!p.contains(&PRINCIPAL_AUTHENTICATED.to_string()));
    }

    #[test]
    fn parse_and_validate() {
        let xml = br#"<D:acl xmlns:D="DAV:">
            <D:ace><D:principal><D:href>/principals/alice</D:href></D:principal>
              <D:grant><D:privilege><D:read/></D:privilege><D:privilege><D:write/></D:privilege></D:grant></D:ace>
            <D:ace><D:principal><D:property><D:owner/></D:property></D:principal>
              <D:grant><D:privilege><D:all/></D:privilege></D:grant></D:ace>
            </D:acl>"#;
        let acl = parse_acl(&parse_xml(xml).unwrap()).unwrap();
        assert_eq!(
            acl,
            vec![
                Ace::new("/principals/alice", PRIV_READ),
                Ace::new("/principals/alice", PRIV_WRITE),
                Ace::new(PRINCIPAL_OWNER, PRIV_ALL),
            ]
        );
        let cfg = AclConfig::new();
        assert_eq!(cfg.validate_acl(&acl, &[]), Ok(()));
        assert_eq!(
            cfg.validate_acl(&[Ace::new(PRINCIPAL_ALL, PRIV_READ_CUPS)], &[]),
            Err(DavCondition::NoAbstract)
        );
        assert_eq!(
            cfg.validate_acl(&[Ace::new(PRINCIPAL_ALL, "{DAV:}fly")], &[]),
            Err(DavCondition::NotSupportedPrivilege)
        );
        let old = vec![Ace::new(PRINCIPAL_ALL, PRIV_READ).protected()];
        assert_eq!(cfg.validate_acl(&acl, &old), Err(DavCondition::NoAceConflict));

        let deny = br#"<D:acl xmlns:D="DAV:"><D:ace><D:principal><D:all/></D:principal>
            <D:deny><D:privilege><D:read/></D:privilege></D:deny></D:ace></D:acl>"#;
        assert_eq!(
            parse_acl(&parse_xml(deny).unwrap()),
            Err(DavCondition::GrantOnly)
        );
    }
}
