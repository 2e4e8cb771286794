//! Contains the structs and traits that define a `locksystem` backend.
//!
//! The lock algorithms (conflict detection, lazy expiry, token checks) live
//! in [`LockTable`]. A locksystem stores a `LockTable` somewhere and makes
//! every operation on it atomic: [`MemLs`] keeps it behind a mutex,
//! [`FileLs`] in a file guarded by an exclusive advisory lock, so that
//! several processes can share it.
//!
//! Expired locks are never reported. They are dropped from the table the
//! next time it is read.
use std::fmt::Debug;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::{Duration, SystemTime};

use uuid::Uuid;
use xmltree::Element;

use crate::davpath::DavPath;

#[cfg(any(docsrs, feature = "localfs"))]
pub(crate) mod filels;
pub(crate) mod memls;

#[cfg(any(docsrs, feature = "localfs"))]
pub use filels::FileLs;
pub use memls::MemLs;

/// Type of the locks returned by DavLockSystem methods.
#[derive(Debug, Clone, PartialEq)]
pub struct DavLock {
    /// Token, `opaquelocktoken:<uuid>`.
    pub token: String,
    /// Path of the locked resource.
    pub path: DavPath,
    /// Principal that created the lock.
    pub principal: Option<String>,
    /// Owner as supplied by the client (`<D:owner>`).
    pub owner: Option<Element>,
    /// When the lock expires.
    pub timeout_at: Option<SystemTime>,
    /// Timeout as granted.
    pub timeout: Option<Duration>,
    /// Shared or exclusive.
    pub shared: bool,
    /// Depth infinity.
    pub deep: bool,
    /// Creation (or last refresh) time.
    pub created: SystemTime,
}

impl DavLock {
    /// Has the lock expired at `now`.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        matches!(self.timeout_at, Some(t) if t <= now)
    }

    /// Does this lock cover `path` (the locked resource itself, or a
    /// member of a depth-infinity lock).
    pub fn covers(&self, path: &DavPath) -> bool {
        self.path == *path || (self.deep && self.path.is_ancestor_of(path))
    }

    /// Seconds left before expiry.
    pub fn remaining(&self, now: SystemTime) -> Option<Duration> {
        self.timeout_at
            .map(|t| t.duration_since(now).unwrap_or(Duration::ZERO))
    }
}

/// Lock storage errors.
#[derive(Debug)]
pub enum LsError {
    /// A conflicting lock, or a lock whose token was not submitted.
    Locked(DavLock),
    /// No lock with that token applies to the path.
    NotFound,
    /// Storage failure.
    Io(io::Error),
}

impl From<io::Error> for LsError {
    fn from(e: io::Error) -> Self {
        LsError::Io(e)
    }
}

pub type LsResult<T> = Result<T, LsError>;

/// Future returned by the DavLockSystem methods.
pub type LsFuture<'a, T> = Pin<Box<dyn Future<Output = LsResult<T>> + Send + 'a>>;

/// The trait that defines a locksystem.
///
/// Every method must be atomic with respect to the others, also across
/// processes if the storage is shared.
pub trait DavLockSystem: Debug + Send + Sync {
    /// Lock a node. Fails with `LsError::Locked` and the conflicting lock.
    fn lock<'a>(
        &'a self,
        path: &'a DavPath,
        principal: Option<&'a str>,
        owner: Option<&'a Element>,
        timeout: Option<Duration>,
        shared: bool,
        deep: bool,
    ) -> LsFuture<'a, DavLock>;

    /// Unlock a node. Returns `false` if no lock with `token` applies to `path`.
    fn unlock<'a>(&'a self, path: &'a DavPath, token: &'a str) -> LsFuture<'a, bool>;

    /// Refresh a lock. Fails with `LsError::NotFound`.
    fn refresh<'a>(
        &'a self,
        path: &'a DavPath,
        token: &'a str,
        timeout: Option<Duration>,
    ) -> LsFuture<'a, DavLock>;

    /// Check if a write to `path` is allowed with the `submitted_tokens`.
    ///
    /// With `deep`, locks on members of `path` are checked as well. Fails
    /// with `LsError::Locked` and the first lock that is not satisfied.
    fn check<'a>(
        &'a self,
        path: &'a DavPath,
        principal: Option<&'a str>,
        ignore_principal: bool,
        deep: bool,
        submitted_tokens: &'a [String],
    ) -> LsFuture<'a, ()>;

    /// Every active lock that applies to `path`, including locks inherited
    /// from depth-infinity ancestors. With `include_children`, locks on
    /// members of `path` too.
    fn get_locks<'a>(&'a self, path: &'a DavPath, include_children: bool) -> LsFuture<'a, Vec<DavLock>>;

    /// Remove all locks at or below `path`.
    fn delete<'a>(&'a self, path: &'a DavPath) -> LsFuture<'a, ()>;
}

/// Generate a new lock token.
pub fn new_token() -> String {
    format!("opaquelocktoken:{}", Uuid::new_v4().hyphenated())
}

/// The timeout a lock actually gets.
///
/// No timeout, a zero timeout (infinite) or one above `max` all become
/// `max`.
pub fn effective_timeout(requested: Option<Duration>, max: Duration) -> Duration {
    match requested {
        Some(d) if !d.is_zero() && d <= max => d,
        _ => max,
    }
}

/// The lock records and the algorithms that work on them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LockTable {
    locks: Vec<DavLock>,
}

impl LockTable {
    pub fn new() -> LockTable {
        LockTable::default()
    }

    /// Build a table from stored records.
    pub fn from_locks(locks: Vec<DavLock>) -> LockTable {
        LockTable { locks }
    }

    /// All records, including expired ones.
    pub fn records(&self) -> &[DavLock] {
        &self.locks
    }

    /// Drop expired locks. Returns how many were dropped.
    pub fn purge_expired(&mut self, now: SystemTime) -> usize {
        let before = self.locks.len();
        self.locks.retain(|l| !l.is_expired(now));
        let n = before - self.locks.len();
        if n > 0 {
            trace!("ls: purged {n} expired lock(s)");
        }
        n
    }

    /// Active locks that apply to `path`, optionally also locks below it.
    pub fn get_locks(&mut self, path: &DavPath, include_children: bool, now: SystemTime) -> Vec<DavLock> {
        self.purge_expired(now);
        self.locks
            .iter()
            .filter(|l| l.covers(path) || (include_children && path.is_ancestor_of(&l.path)))
            .cloned()
            .collect()
    }

    /// Create a new lock.
    ///
    /// Exclusive locks conflict with any other lock on the same resource;
    /// shared locks only with exclusive ones. A deep lock also conflicts
    /// with locks below it.
    #[allow(clippy::too_many_arguments)]
    pub fn lock(
        &mut self,
        path: &DavPath,
        principal: Option<&str>,
        owner: Option<&Element>,
        timeout: Option<Duration>,
        shared: bool,
        deep: bool,
        now: SystemTime,
    ) -> LsResult<DavLock> {
        for l in self.get_locks(path, deep, now) {
            if !l.shared || !shared {
                debug!("ls: lock {path:?} conflicts with {}", l.token);
                return Err(LsError::Locked(l));
            }
        }
        let lock = DavLock {
            token: new_token(),
            path: path.clone(),
            principal: principal.map(|s| s.to_string()),
            owner: owner.cloned(),
            timeout_at: timeout.map(|d| now + d),
            timeout,
            shared,
            deep,
            created: now,
        };
        trace!("ls: lock {} created on {path:?}", lock.token);
        self.locks.push(lock.clone());
        Ok(lock)
    }

    /// Remove the lock with `token`, if it applies to `path`.
    pub fn unlock(&mut self, path: &DavPath, token: &str, now: SystemTime) -> bool {
        self.purge_expired(now);
        match self
            .locks
            .iter()
            .position(|l| l.token == token && l.covers(path))
        {
            Some(idx) => {
                self.locks.remove(idx);
                trace!("ls: unlocked {token} on {path:?}");
                true
            }
            None => false,
        }
    }

    /// Restart the timeout of the lock with `token`.
    pub fn refresh(
        &mut self,
        path: &DavPath,
        token: &str,
        timeout: Option<Duration>,
        now: SystemTime,
    ) -> LsResult<DavLock> {
        self.purge_expired(now);
        let lock = self
            .locks
            .iter_mut()
            .find(|l| l.token == token && l.covers(path))
            .ok_or(LsError::NotFound)?;
        lock.timeout = timeout;
        lock.timeout_at = timeout.map(|d| now + d);
        Ok(lock.clone())
    }

    /// Is a write to `path` allowed with `submitted_tokens`.
    pub fn check(
        &mut self,
        path: &DavPath,
        principal: Option<&str>,
        ignore_principal: bool,
        deep: bool,
        submitted_tokens: &[String],
        now: SystemTime,
    ) -> LsResult<()> {
        for l in self.get_locks(path, deep, now) {
            let submitted = submitted_tokens.iter().any(|t| *t == l.token);
            let same_owner = ignore_principal
                || l.principal.is_none()
                || principal.is_none()
                || l.principal.as_deref() == principal;
            if !(submitted && same_owner) {
                return Err(LsError::Locked(l));
            }
        }
        Ok(())
    }

    /// Remove all locks at or below `path`.
    pub fn delete(&mut self, path: &DavPath) {
        self.locks
            .retain(|l| !(l.path == *path || path.is_ancestor_of(&l.path)));
    }
}
