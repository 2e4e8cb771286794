//! Locksystem that keeps its locks in a file.
//!
//! Every operation opens the file, takes an exclusive `flock(2)` on it,
//! reads the table, applies the change and writes the table back. Several
//! processes can use the same file.
use std::fs::{File, OpenOptions};
use std::io;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::FutureExt;
use xmltree::{Element, XMLNode};

use crate::davpath::DavPath;
use crate::ls::*;
use crate::xmltree_ext::{self, ElementExt};

/// Lock file backed locksystem.
#[derive(Debug, Clone)]
pub struct FileLs {
    path: Arc<PathBuf>,
}

impl FileLs {
    /// Use (and create, if needed) the lock file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Arc<FileLs> {
        Arc::new(FileLs {
            path: Arc::new(path.into()),
        })
    }

    /// Run `f` on the table, atomically.
    fn with_table<'a, T, F>(&'a self, f: F) -> LsFuture<'a, T>
    where
        T: Send + 'static,
        F: FnOnce(&mut LockTable, SystemTime) -> LsResult<T> + Send + 'static,
    {
        let path = self.path.clone();
        async move {
            tokio::task::spawn_blocking(move || transaction(&path, f))
                .await
                .map_err(|e| LsError::Io(io::Error::new(io::ErrorKind::Other, e)))?
        }
        .boxed()
    }
}

fn transaction<T>(
    path: &Path,
    f: impl FnOnce(&mut LockTable, SystemTime) -> LsResult<T>,
) -> LsResult<T> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)?;
    flock(&file)?;

    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    let mut table = if data.is_empty() {
        LockTable::new()
    } else {
        decode_table(&data)?
    };
    let before = table.clone();

    let result = f(&mut table, SystemTime::now());

    // expired locks are purged on reads too, so write whenever anything changed.
    if table != before {
        let data = encode_table(&table)?;
        file.seek(SeekFrom::Start(0))?;
        file.set_len(0)?;
        file.write_all(&data)?;
        file.sync_data()?;
    }
    // closing the file releases the lock.
    result
}

#[cfg(unix)]
fn flock(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn flock(_file: &File) -> io::Result<()> {
    Ok(())
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("lock file: {msg}"))
}

fn nanos(t: SystemTime) -> String {
    t.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos()
        .to_string()
}

fn encode_lock(lock: &DavLock) -> Element {
    let mut e = Element::new("lock");
    let mut attr = |k: &str, v: String| {
        e.attributes.insert(k.to_string(), v);
    };
    attr("token", lock.token.clone());
    attr("href", lock.path.with_prefix());
    attr("prefix", lock.path.prefix().to_string());
    attr("shared", lock.shared.to_string());
    attr("deep", lock.deep.to_string());
    attr("created", nanos(lock.created));
    if let Some(p) = &lock.principal {
        attr("principal", p.clone());
    }
    if let Some(t) = lock.timeout {
        attr("timeout", t.as_nanos().to_string());
    }
    if let Some(t) = lock.timeout_at {
        attr("timeout-at", nanos(t));
    }
    if let Some(owner) = &lock.owner {
        e.push_elem(owner.clone());
    }
    e
}

fn decode_lock(e: &Element) -> io::Result<DavLock> {
    let attr = |k: &str| e.attributes.get(k).map(|s| s.as_str());
    let req = |k: &str| attr(k).ok_or_else(|| invalid(&format!("missing {k}")));
    let num = |v: &str| v.parse::<u64>().map_err(|_| invalid("bad number"));
    let time = |v: &str| num(v).map(|n| UNIX_EPOCH + Duration::from_nanos(n));

    let path = DavPath::from_str_and_prefix(req("href")?, req("prefix")?)
        .map_err(|_| invalid("bad href"))?;
    let owner = e.children.iter().find_map(|n| match n {
        XMLNode::Element(o) => Some(o.clone()),
        _ => None,
    });
    Ok(DavLock {
        token: req("token")?.to_string(),
        path,
        principal: attr("principal").map(|s| s.to_string()),
        owner,
        timeout_at: attr("timeout-at").map(time).transpose()?,
        timeout: attr("timeout").map(num).transpose()?.map(Duration::from_nanos),
        shared: req("shared")? == "true",
        deep: req("deep")? == "true",
        created: time(req("created")?)?,
    })
}

fn encode_table(table: &LockTable) -> io::Result<Vec<u8>> {
    let mut root = Element::new("locks");
    for lock in table.records() {
        root.push_elem(encode_lock(lock));
    }
    xmltree_ext::to_xml_bytes(&root).map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

fn decode_table(data: &[u8]) -> io::Result<LockTable> {
    let root = Element::parse(data).map_err(|e| invalid(&e.to_string()))?;
    let locks = root
        .child_elems()
        .map(decode_lock)
        .collect::<io::Result<Vec<_>>>()?;
    Ok(LockTable::from_locks(locks))
}

impl DavLockSystem for FileLs {
    fn lock<'a>(
        &'a self,
        path: &'a DavPath,
        principal: Option<&'a str>,
        owner: Option<&'a Element>,
        timeout: Option<Duration>,
        shared: bool,
        deep: bool,
    ) -> LsFuture<'a, DavLock> {
        let (path, principal, owner) = (path.clone(), principal.map(|s| s.to_string()), owner.cloned());
        self.with_table(move |t, now| {
            t.lock(&path, principal.as_deref(), owner.as_ref(), timeout, shared, deep, now)
        })
    }

    fn unlock<'a>(&'a self, path: &'a DavPath, token: &'a str) -> LsFuture<'a, bool> {
        let (path, token) = (path.clone(), token.to_string());
        self.with_table(move |t, now| Ok(t.unlock(&path, &token, now)))
    }

    fn refresh<'a>(
        &'a self,
        path: &'a DavPath,
        token: &'a str,
        timeout: Option<Duration>,
    ) -> LsFuture<'a, DavLock> {
        let (path, token) = (path.clone(), token.to_string());
        self.with_table(move |t, now| t.refresh(&path, &token, timeout, now))
    }

    fn check<'a>(
        &'a self,
        path: &'a DavPath,
        principal: Option<&'a str>,
        ignore_principal: bool,
        deep: bool,
        submitted_tokens: &'a [String],
    ) -> LsFuture<'a, ()> {
        let (path, principal, tokens) = (
            path.clone(),
            principal.map(|s| s.to_string()),
            submitted_tokens.to_vec(),
        );
        self.with_table(move |t, now| {
            t.check(&path, principal.as_deref(), ignore_principal, deep, &tokens, now)
        })
    }

    fn get_locks<'a>(&'a self, path: &'a DavPath, include_children: bool) -> LsFuture<'a, Vec<DavLock>> {
        let path = path.clone();
        self.with_table(move |t, now| Ok(t.get_locks(&path, include_children, now)))
    }

    fn delete<'a>(&'a self, path: &'a DavPath) -> LsFuture<'a, ()> {
        let path = path.clone();
        self.with_table(move |t, _| {
            t.delete(&path);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> DavPath {
        DavPath::from_str_and_prefix(s, "/dav").unwrap()
    }

    fn temp_file() -> PathBuf {
        std::env::temp_dir().join(format!("dav-engine-locks-{}.xml", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn shared_between_instances() {
        let file = temp_file();
        let a = FileLs::new(&file);
        let b = FileLs::new(&file);
        let owner = Element::new2("D:owner").ns("D", "DAV:").text("someone");
        let lock = a
            .lock(&p("/dav/d/"), Some("/p/u"), Some(&owner), Some(Duration::from_secs(60)), false, true)
            .await
            .unwrap();

        assert!(matches!(
            b.lock(&p("/dav/d/x"), None, None, None, true, false).await,
            Err(LsError::Locked(l)) if l.token == lock.token
        ));
        let locks = b.get_locks(&p("/dav/d/x"), false).await.unwrap();
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].path, lock.path);
        assert_eq!(locks[0].path.with_prefix(), "/dav/d/");
        assert_eq!(locks[0].timeout_at, lock.timeout_at);
        assert_eq!(locks[0].principal.as_deref(), Some("/p/u"));
        assert!(locks[0].owner.is_some());

        assert!(b.unlock(&p("/dav/d/"), &lock.token).await.unwrap());
        assert!(a.get_locks(&p("/dav/d/"), true).await.unwrap().is_empty());
        let _ = std::fs::remove_file(&file);
    }

    #[tokio::test]
    async fn concurrent_locks_one_winner() {
        let file = temp_file();
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let ls = FileLs::new(&file);
            tasks.push(tokio::spawn(async move {
                ls.lock(&p("/dav/f"), None, None, None, false, false).await.is_ok()
            }));
        }
        let mut won = 0;
        for t in tasks {
            if t.await.unwrap() {
                won += 1;
            }
        }
        assert_eq!(won, 1);
        let _ = std::fs::remove_file(&file);
    }
}
