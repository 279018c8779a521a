//! Embedded KV access for the ACME server core (spec §4.7, §4.9, §6). Each
//! CA gets its own `sled` database under `<app-data>/acme_server/<safe-ca-id>/db`,
//! opened through the reference-counted database pool so two handlers for
//! the same CA never try to open the path twice.

use crate::config::sanitize_id;
use crate::dbpool::{open_factory, DbPool, PooledDb};
use crate::error::{PkiError, Result};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

const NONCE_TTL: Duration = Duration::minutes(5);

pub struct AcmeDb {
    db: PooledDb,
}

fn sled_err(e: sled::Error) -> PkiError {
    PkiError::Storage(format!("acme db: {e}"))
}

impl AcmeDb {
    pub fn open(pool: &Arc<DbPool>, app_data_dir: &Path, ca_id: &str) -> Result<Self> {
        let safe = sanitize_id(ca_id);
        let path = app_data_dir.join("acme_server").join(&safe).join("db");
        let db = pool.load_or_new(&safe, open_factory(path))?;
        Ok(AcmeDb { db })
    }

    fn tree(&self, name: &str) -> Result<sled::Tree> {
        self.db.open_tree(name).map_err(sled_err)
    }

    pub fn put<T: Serialize>(&self, tree: &str, key: &str, value: &T) -> Result<()> {
        let t = self.tree(tree)?;
        let bytes = serde_json::to_vec(value)
            .map_err(|e| PkiError::Storage(format!("serializing {tree}/{key}: {e}")))?;
        t.insert(key.as_bytes(), bytes).map_err(sled_err)?;
        t.flush().map_err(sled_err)?;
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, tree: &str, key: &str) -> Result<Option<T>> {
        let t = self.tree(tree)?;
        match t.get(key.as_bytes()).map_err(sled_err)? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| PkiError::Storage(format!("deserializing {tree}/{key}: {e}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Compare-and-swap a record; `Ok(false)` means `expected` was stale,
    /// callers map that to the ACME conflict semantics in spec §5.
    pub fn cas<T: Serialize>(&self, tree: &str, key: &str, expected: &T, new: &T) -> Result<bool> {
        let t = self.tree(tree)?;
        let expected_bytes = serde_json::to_vec(expected)
            .map_err(|e| PkiError::Storage(format!("serializing {tree}/{key}: {e}")))?;
        let new_bytes = serde_json::to_vec(new)
            .map_err(|e| PkiError::Storage(format!("serializing {tree}/{key}: {e}")))?;
        match t.compare_and_swap(key.as_bytes(), Some(expected_bytes), Some(new_bytes)) {
            Ok(Ok(())) => {
                t.flush().map_err(sled_err)?;
                Ok(true)
            }
            Ok(Err(_)) => Ok(false),
            Err(e) => Err(sled_err(e)),
        }
    }

    /// Issue a single-use nonce, valid for 5 minutes (spec §4.7).
    pub fn issue_nonce(&self) -> Result<String> {
        let rng = SystemRandom::new();
        let mut raw = [0u8; 16];
        rng.fill(&mut raw)
            .map_err(|_| PkiError::Storage("failed to generate nonce entropy".into()))?;
        let nonce = {
            use base64::engine::general_purpose::URL_SAFE_NO_PAD;
            use base64::Engine;
            URL_SAFE_NO_PAD.encode(raw)
        };
        let expiry = (OffsetDateTime::now_utc() + NONCE_TTL).unix_timestamp();
        let t = self.tree("nonces")?;
        t.insert(nonce.as_bytes(), &expiry.to_be_bytes()).map_err(sled_err)?;
        Ok(nonce)
    }

    /// Consume a presented nonce exactly once (spec §4.7, §5 "nonces are
    /// strictly single-use"); a nonce may only be removed, never re-inserted.
    pub fn consume_nonce(&self, nonce: &str) -> Result<bool> {
        let t = self.tree("nonces")?;
        let Some(bytes) = t.remove(nonce.as_bytes()).map_err(sled_err)? else {
            return Ok(false);
        };
        let expiry_bytes: [u8; 8] = bytes
            .as_ref()
            .try_into()
            .map_err(|_| PkiError::Storage("corrupted nonce record".into()))?;
        let expiry = i64::from_be_bytes(expiry_bytes);
        Ok(OffsetDateTime::now_utc().unix_timestamp() < expiry)
    }

    pub fn next_id(&self) -> Result<String> {
        Ok(uuid::Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, AcmeDb) {
        let dir = tempfile::tempdir().unwrap();
        let pool = DbPool::new();
        let db = AcmeDb::open(&pool, dir.path(), "local").unwrap();
        (dir, db)
    }

    #[test]
    fn put_then_get_round_trips() {
        let (_dir, db) = test_db();
        db.put("accounts", "acct-1", &serde_json::json!({"id": "acct-1"})).unwrap();
        let value: serde_json::Value = db.get("accounts", "acct-1").unwrap().unwrap();
        assert_eq!(value["id"], "acct-1");
    }

    #[test]
    fn nonce_is_single_use() {
        let (_dir, db) = test_db();
        let nonce = db.issue_nonce().unwrap();
        assert!(db.consume_nonce(&nonce).unwrap());
        assert!(!db.consume_nonce(&nonce).unwrap());
    }

    #[test]
    fn cas_fails_on_stale_expected_value() {
        let (_dir, db) = test_db();
        db.put("orders", "o1", &1u32).unwrap();
        assert!(!db.cas("orders", "o1", &2u32, &3u32).unwrap());
        assert!(db.cas("orders", "o1", &1u32, &3u32).unwrap());
        let value: u32 = db.get("orders", "o1").unwrap().unwrap();
        assert_eq!(value, 3);
    }
}
