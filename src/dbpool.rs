//! Reference-counted opener for the embedded KV databases backing the ACME
//! server core (component C9, spec §4.9). Prevents two ACME handlers sharing
//! a CA id from opening the same `sled` database twice, which `sled` itself
//! forbids (a single process may hold a given database path open only once).

use crate::error::{PkiError, Result};
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

struct Entry {
    db: sled::Db,
    refcount: usize,
}

#[derive(Default)]
pub struct DbPool {
    entries: Mutex<HashMap<String, Entry>>,
}

impl DbPool {
    pub fn new() -> Arc<DbPool> {
        Arc::new(DbPool::default())
    }

    /// Open `key`'s database via `factory` if not already open, otherwise
    /// hand back a new reference to the existing handle.
    pub fn load_or_new(
        self: &Arc<Self>,
        key: &str,
        factory: impl FnOnce() -> Result<sled::Db>,
    ) -> Result<PooledDb> {
        let mut entries = self.entries.lock().expect("dbpool mutex poisoned");
        let db = match entries.get_mut(key) {
            Some(entry) => {
                entry.refcount += 1;
                entry.db.clone()
            }
            None => {
                let db = factory()?;
                entries.insert(
                    key.to_string(),
                    Entry {
                        db: db.clone(),
                        refcount: 1,
                    },
                );
                db
            }
        };
        Ok(PooledDb {
            pool: self.clone(),
            key: key.to_string(),
            db,
        })
    }

    fn release(&self, key: &str) {
        let mut entries = self.entries.lock().expect("dbpool mutex poisoned");
        if let Some(entry) = entries.get_mut(key) {
            entry.refcount -= 1;
            if entry.refcount == 0 {
                entries.remove(key);
            }
        }
    }
}

/// A checked-out handle to a pooled `sled::Db`; releasing the last handle
/// for a key drops the pool's reference, which closes the database once
/// `sled`'s own internal handles are dropped too.
pub struct PooledDb {
    pool: Arc<DbPool>,
    key: String,
    db: sled::Db,
}

impl Deref for PooledDb {
    type Target = sled::Db;
    fn deref(&self) -> &sled::Db {
        &self.db
    }
}

impl Drop for PooledDb {
    fn drop(&mut self) {
        self.pool.release(&self.key);
    }
}

pub fn open_factory(path: std::path::PathBuf) -> impl FnOnce() -> Result<sled::Db> {
    move || sled::open(&path).map_err(|e| PkiError::Storage(format!("opening {path:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_checkout_shares_the_same_database() {
        let dir = tempfile::tempdir().unwrap();
        let pool = DbPool::new();
        let path = dir.path().join("db");
        let a = pool.load_or_new("ca1", open_factory(path.clone())).unwrap();
        let b = pool.load_or_new("ca1", open_factory(path.clone())).unwrap();
        a.insert("k", "v").unwrap();
        assert_eq!(b.get("k").unwrap().unwrap(), "v".as_bytes());
    }

    #[test]
    fn last_drop_closes_the_entry() {
        let dir = tempfile::tempdir().unwrap();
        let pool = DbPool::new();
        let path = dir.path().join("db");
        let a = pool.load_or_new("ca1", open_factory(path.clone())).unwrap();
        drop(a);
        assert!(pool.entries.lock().unwrap().is_empty());
    }
}
