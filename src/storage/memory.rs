//! In-process `Storage` backend used by this crate's own tests. Locks are
//! real `tokio::sync::Mutex`es keyed by name, so concurrent rotation tests
//! (spec §8 "at-most-one-rotation") exercise genuine mutual exclusion rather
//! than a fake that always succeeds.

use super::{KeyInfo, Lock, Storage};
use crate::error::{PkiError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[derive(Default)]
pub struct MemoryStorage {
    data: RwLock<HashMap<String, (Vec<u8>, OffsetDateTime)>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryLock {
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl Lock for MemoryLock {
    async fn unlock(self: Box<Self>) {}
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load(&self, key: &str) -> Result<Vec<u8>> {
        self.data
            .read()
            .await
            .get(key)
            .map(|(v, _)| v.clone())
            .ok_or_else(|| PkiError::NotExist(key.to_string()))
    }

    async fn store(&self, key: &str, value: &[u8]) -> Result<()> {
        self.data
            .write()
            .await
            .insert(key.to_string(), (value.to_vec(), OffsetDateTime::now_utc()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut data = self.data.write().await;
        if data.remove(key).is_some() {
            Ok(())
        } else {
            Err(PkiError::NotExist(key.to_string()))
        }
    }

    async fn exists(&self, key: &str) -> bool {
        self.data.read().await.contains_key(key)
    }

    async fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<String>> {
        let data = self.data.read().await;
        let mut keys: Vec<String> = data
            .keys()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| {
                recursive || {
                    let rest = &k[prefix.len()..];
                    !rest.trim_start_matches('/').contains('/')
                }
            })
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn stat(&self, key: &str) -> Result<KeyInfo> {
        self.data
            .read()
            .await
            .get(key)
            .map(|(v, modified)| KeyInfo {
                size: v.len() as u64,
                modified: *modified,
            })
            .ok_or_else(|| PkiError::NotExist(key.to_string()))
    }

    async fn lock(&self, name: &str) -> Result<Box<dyn Lock>> {
        let mutex = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = mutex.lock_owned().await;
        Ok(Box::new(MemoryLock { _guard: guard }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_load_round_trips() {
        let s = MemoryStorage::new();
        s.store("a/b", b"hello").await.unwrap();
        assert_eq!(s.load("a/b").await.unwrap(), b"hello");
        assert!(s.exists("a/b").await);
    }

    #[tokio::test]
    async fn missing_key_is_not_exist() {
        let s = MemoryStorage::new();
        let err = s.load("nope").await.unwrap_err();
        assert!(err.is_not_exist());
    }

    #[tokio::test]
    async fn list_respects_recursive_flag() {
        let s = MemoryStorage::new();
        s.store("p/a", b"1").await.unwrap();
        s.store("p/sub/b", b"2").await.unwrap();
        let shallow = s.list("p/", false).await.unwrap();
        assert_eq!(shallow, vec!["p/a".to_string()]);
        let deep = s.list("p/", true).await.unwrap();
        assert_eq!(deep.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_lock_acquisition_is_serialized() {
        let storage = Arc::new(MemoryStorage::new());
        let counter = Arc::new(tokio::sync::Mutex::new(0u32));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let storage = storage.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let lock = storage.lock("ca/local/lock").await.unwrap();
                let mut c = counter.lock().await;
                let seen = *c;
                *c += 1;
                drop(c);
                tokio::task::yield_now().await;
                lock.unlock().await;
                seen
            }));
        }
        let mut seen = Vec::new();
        for h in handles {
            seen.push(h.await.unwrap());
        }
        seen.sort();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }
}
