//! Simple in-memory locksystem.
//!
//! Locks are lost when the process exits, and are not shared between
//! processes.
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures_util::{future, FutureExt};
use parking_lot::Mutex;
use xmltree::Element;

use crate::davpath::DavPath;
use crate::ls::*;

/// Ephemeral in-memory locksystem.
#[derive(Debug, Clone, Default)]
pub struct MemLs(Arc<Mutex<LockTable>>);

impl MemLs {
    /// Create a new "memls" locksystem.
    pub fn new() -> Arc<MemLs> {
        Arc::new(MemLs::default())
    }

    fn with_table<T>(&self, f: impl FnOnce(&mut LockTable, SystemTime) -> T) -> T {
        let mut table = self.0.lock();
        f(&mut table, SystemTime::now())
    }
}

impl DavLockSystem for MemLs {
    fn lock<'a>(
        &'a self,
        path: &'a DavPath,
        principal: Option<&'a str>,
        owner: Option<&'a Element>,
        timeout: Option<Duration>,
        shared: bool,
        deep: bool,
    ) -> LsFuture<'a, DavLock> {
        let res = self.with_table(|t, now| t.lock(path, principal, owner, timeout, shared, deep, now));
        future::ready(res).boxed()
    }

    fn unlock<'a>(&'a self, path: &'a DavPath, token: &'a str) -> LsFuture<'a, bool> {
        let res = self.with_table(|t, now| t.unlock(path, token, now));
        future::ready(Ok(res)).boxed()
    }

    fn refresh<'a>(
        &'a self,
        path: &'a DavPath,
        token: &'a str,
        timeout: Option<Duration>,
    ) -> LsFuture<'a, DavLock> {
        let res = self.with_table(|t, now| t.refresh(path, token, timeout, now));
        future::ready(res).boxed()
    }

    fn check<'a>(
        &'a self,
        path: &'a DavPath,
        principal: Option<&'a str>,
        ignore_principal: bool,
        deep: bool,
        submitted_tokens: &'a [String],
    ) -> LsFuture<'a, ()> {
        let res = self.with_table(|t, now| {
            t.check(path, principal, ignore_principal, deep, submitted_tokens, now)
        });
        future::ready(res).boxed()
    }

    fn get_locks<'a>(&'a self, path: &'a DavPath, include_children: bool) -> LsFuture<'a, Vec<DavLock>> {
        let res = self.with_table(|t, now| t.get_locks(path, include_children, now));
        future::ready(Ok(res)).boxed()
    }

    fn delete<'a>(&'a self, path: &'a DavPath) -> LsFuture<'a, ()> {
        self.with_table(|t, _| t.delete(path));
        future::ready(Ok(())).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    #[tokio::test]
    async fn lock_cycle() {
        let ls = MemLs::new();
        let t = Some(Duration::from_secs(60));
        let lock = ls.lock(&p("/a"), Some("/p/u"), None, t, false, false).await.unwrap();
        assert!(matches!(
            ls.lock(&p("/a"), Some("/p/u"), None, t, false, false).await,
            Err(LsError::Locked(_))
        ));
        assert_eq!(ls.get_locks(&p("/a"), false).await.unwrap(), vec![lock.clone()]);
        assert!(ls.check(&p("/a"), Some("/p/u"), false, false, &[lock.token.clone()]).await.is_ok());
        assert!(!ls.unlock(&p("/a"), "opaquelocktoken:bogus").await.unwrap());
        assert!(ls.unlock(&p("/a"), &lock.token).await.unwrap());
        assert!(ls.get_locks(&p("/a"), false).await.unwrap().is_empty());
    }
}
