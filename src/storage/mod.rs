//! The Storage interface consumed by this subsystem (spec §6): atomic
//! key/value storage plus distributed exclusive locks. Everything above this
//! module (`Ca`, `PkiApp`, the STEK provider, the ACME database pool)
//! depends only on the `Storage` trait, never on a concrete backend, the
//! same way the teacher's `storage` module hid `TransactionStore` behind
//! free functions so callers never touched `rusqlite` directly.
//!
//! Two reference backends ship here: `memory` (for tests) and `file` (a
//! default, single-host implementation good enough to run this subsystem
//! standalone). The host platform is free to swap in a real distributed
//! backend (etcd, Redis, a shared filesystem) behind the same trait.

pub mod file;
pub mod memory;

use crate::error::{PkiError, Result};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy)]
pub struct KeyInfo {
    pub size: u64,
    pub modified: time::OffsetDateTime,
}

/// Held exclusively while in scope; the backend is responsible for honoring
/// automatic expiry if the holder crashes (spec §6). Callers release the
/// lock via `unlock`; backends should make release idempotent since a
/// cancelled caller may never reach it.
#[async_trait]
pub trait Lock: Send + Sync {
    async fn unlock(self: Box<Self>);
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn load(&self, key: &str) -> Result<Vec<u8>>;
    async fn store(&self, key: &str, value: &[u8]) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> bool;
    async fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<String>>;
    async fn stat(&self, key: &str) -> Result<KeyInfo>;
    async fn lock(&self, name: &str) -> Result<Box<dyn Lock>>;
}

/// Delete `key`, logging (not failing) on anything but `NotExist`, used by
/// the load-or-generate rollback path (spec §4.3 step 3: "If either store
/// fails, delete the partial write").
pub async fn delete_best_effort(storage: &dyn Storage, key: &str) {
    if let Err(e) = storage.delete(key).await {
        if !e.is_not_exist() {
            tracing::warn!(key, error = %e, "failed to clean up partial write");
        }
    }
}

pub fn not_exist(key: impl Into<String>) -> PkiError {
    PkiError::NotExist(key.into())
}
