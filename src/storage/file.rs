//! Single-host filesystem `Storage` backend (spec §6 default implementation).
//! Writes are atomic via write-temp-then-rename; locks are advisory files
//! carrying an owner PID and an expiry timestamp so a crashed holder doesn't
//! wedge the subsystem forever.

use super::{KeyInfo, Lock, Storage};
use crate::error::{PkiError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;

const LOCK_TTL: Duration = Duration::from_secs(30);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);
const LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.contains("..") {
            return Err(PkiError::Storage(format!("invalid key: {key}")));
        }
        Ok(self.root.join(key))
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.root.join(".locks").join(format!("{name}.lock"))
    }
}

#[derive(Serialize, Deserialize)]
struct LockRecord {
    pid: u32,
    #[serde(with = "time::serde::rfc3339")]
    acquired_at: OffsetDateTime,
}

impl LockRecord {
    fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() - self.acquired_at > LOCK_TTL
    }
}

struct FileLock {
    path: PathBuf,
}

#[async_trait]
impl Lock for FileLock {
    async fn unlock(self: Box<Self>) {
        let path = self.path.clone();
        let _ = tokio::task::spawn_blocking(move || std::fs::remove_file(&path)).await;
    }
}

fn try_acquire(path: &Path) -> std::io::Result<bool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let record = LockRecord {
        pid: std::process::id(),
        acquired_at: OffsetDateTime::now_utc(),
    };
    let bytes = serde_json::to_vec(&record).expect("LockRecord always serializes");

    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(mut f) => {
            use std::io::Write;
            f.write_all(&bytes)?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            if let Ok(existing) = std::fs::read(path) {
                if let Ok(record) = serde_json::from_slice::<LockRecord>(&existing) {
                    if record.is_expired() {
                        let _ = std::fs::remove_file(path);
                        return try_acquire(path);
                    }
                }
            }
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn load(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        tokio::task::spawn_blocking(move || std::fs::read(&path))
            .await
            .map_err(|e| PkiError::Storage(e.to_string()))?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => PkiError::NotExist(key.to_string()),
                _ => PkiError::Storage(e.to_string()),
            })
    }

    async fn store(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let value = value.to_vec();
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut tmp = path.clone();
            tmp.set_extension(format!(
                "{}.tmp.{}",
                path.extension().and_then(|e| e.to_str()).unwrap_or(""),
                std::process::id()
            ));
            std::fs::write(&tmp, &value)?;
            std::fs::rename(&tmp, &path)
        })
        .await
        .map_err(|e| PkiError::Storage(e.to_string()))?
        .map_err(|e| PkiError::Storage(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        tokio::task::spawn_blocking(move || std::fs::remove_file(&path))
            .await
            .map_err(|e| PkiError::Storage(e.to_string()))?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => PkiError::NotExist(key.to_string()),
                _ => PkiError::Storage(e.to_string()),
            })
    }

    async fn exists(&self, key: &str) -> bool {
        match self.path_for(key) {
            Ok(path) => path.exists(),
            Err(_) => false,
        }
    }

    async fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<String>> {
        let base = self.path_for(prefix)?;
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            if !base.is_dir() {
                return out;
            }
            let walker: Box<dyn Iterator<Item = PathBuf>> = if recursive {
                Box::new(walkdir(&base))
            } else {
                Box::new(
                    std::fs::read_dir(&base)
                        .into_iter()
                        .flatten()
                        .filter_map(|e| e.ok())
                        .map(|e| e.path()),
                )
            };
            for path in walker {
                if path.is_file() {
                    if let Ok(rel) = path.strip_prefix(&root) {
                        out.push(rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"));
                    }
                }
            }
            out.sort();
            out
        })
        .await
        .map_err(|e| PkiError::Storage(e.to_string()))
    }

    async fn stat(&self, key: &str) -> Result<KeyInfo> {
        let path = self.path_for(key)?;
        let key = key.to_string();
        tokio::task::spawn_blocking(move || std::fs::metadata(&path))
            .await
            .map_err(|e| PkiError::Storage(e.to_string()))?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => PkiError::NotExist(key.clone()),
                _ => PkiError::Storage(e.to_string()),
            })
            .map(|meta| KeyInfo {
                size: meta.len(),
                modified: meta
                    .modified()
                    .ok()
                    .map(OffsetDateTime::from)
                    .unwrap_or_else(OffsetDateTime::now_utc),
            })
    }

    async fn lock(&self, name: &str) -> Result<Box<dyn Lock>> {
        let path = self.lock_path(name);
        let deadline = tokio::time::Instant::now() + LOCK_ACQUIRE_TIMEOUT;
        loop {
            let p = path.clone();
            let acquired = tokio::task::spawn_blocking(move || try_acquire(&p))
                .await
                .map_err(|e| PkiError::Storage(e.to_string()))?
                .map_err(|e| PkiError::Storage(e.to_string()))?;
            if acquired {
                return Ok(Box::new(FileLock { path }));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(PkiError::Storage(format!("timed out acquiring lock {name}")));
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }
}

fn walkdir(dir: &Path) -> impl Iterator<Item = PathBuf> {
    let mut stack = vec![dir.to_path_buf()];
    let mut files = Vec::new();
    while let Some(d) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&d) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_load_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let s = FileStorage::new(dir.path());
        s.store("ca/root/cert.pem", b"-----BEGIN CERTIFICATE-----")
            .await
            .unwrap();
        assert!(s.exists("ca/root/cert.pem").await);
        assert_eq!(
            s.load("ca/root/cert.pem").await.unwrap(),
            b"-----BEGIN CERTIFICATE-----"
        );
        s.delete("ca/root/cert.pem").await.unwrap();
        assert!(!s.exists("ca/root/cert.pem").await);
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let s = FileStorage::new(dir.path());
        assert!(s.store("../escape", b"x").await.is_err());
    }

    #[tokio::test]
    async fn stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let s = FileStorage::new(dir.path());
        let lock_path = s.lock_path("ca/local");
        std::fs::create_dir_all(lock_path.parent().unwrap()).unwrap();
        let stale = LockRecord {
            pid: u32::MAX,
            acquired_at: OffsetDateTime::now_utc() - Duration::from_secs(3600),
        };
        std::fs::write(&lock_path, serde_json::to_vec(&stale).unwrap()).unwrap();
        let lock = s.lock("ca/local").await.unwrap();
        lock.unlock().await;
    }

    #[tokio::test]
    async fn second_lock_waits_for_first_to_release() {
        let dir = tempfile::tempdir().unwrap();
        let s = std::sync::Arc::new(FileStorage::new(dir.path()));
        let first = s.lock("ca/local").await.unwrap();
        let s2 = s.clone();
        let handle = tokio::spawn(async move { s2.lock("ca/local").await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        first.unlock().await;
        let second = handle.await.unwrap().unwrap();
        second.unlock().await;
    }
}
