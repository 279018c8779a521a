//! Distributed TLS session-ticket key rotation (component C6, spec §4.6).
//! Shares the CA entity's locking discipline: one storage lock guards the
//! single `stek/stek.bin` blob across every process pointed at the same
//! storage, so rotation is totally ordered cluster-wide (spec §5, §8
//! "STEK monotonicity").

use crate::config::StekConfig;
use crate::error::{PkiError, Result};
use crate::storage::Storage;
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio::sync::{oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

const STEK_KEY: &str = "stek/stek.bin";
const STEK_LOCK: &str = "stek_check";
const FRAME_VERSION: u8 = 1;
const KEY_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StekBundle {
    pub keys: Vec<[u8; KEY_LEN]>,
    pub last_rotation: OffsetDateTime,
    pub next_rotation: OffsetDateTime,
}

/// Encode as: version byte, u32 (BE) key count, N×32-byte keys,
/// `last_rotation`/`next_rotation` as i64 (BE) unix seconds.
fn encode_bundle(bundle: &StekBundle) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 4 + bundle.keys.len() * KEY_LEN + 16);
    out.push(FRAME_VERSION);
    out.extend_from_slice(&(bundle.keys.len() as u32).to_be_bytes());
    for key in &bundle.keys {
        out.extend_from_slice(key);
    }
    out.extend_from_slice(&bundle.last_rotation.unix_timestamp().to_be_bytes());
    out.extend_from_slice(&bundle.next_rotation.unix_timestamp().to_be_bytes());
    out
}

fn decode_bundle(bytes: &[u8]) -> Result<StekBundle> {
    if bytes.is_empty() || bytes[0] != FRAME_VERSION {
        return Err(PkiError::CorruptedCa("unrecognized STEK frame version".into()));
    }
    let mut pos = 1usize;
    let count_bytes: [u8; 4] = bytes
        .get(pos..pos + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| PkiError::CorruptedCa("truncated STEK frame".into()))?;
    let count = u32::from_be_bytes(count_bytes) as usize;
    pos += 4;

    let mut keys = Vec::with_capacity(count);
    for _ in 0..count {
        let key: [u8; KEY_LEN] = bytes
            .get(pos..pos + KEY_LEN)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| PkiError::CorruptedCa("truncated STEK key".into()))?;
        keys.push(key);
        pos += KEY_LEN;
    }

    let last_bytes: [u8; 8] = bytes
        .get(pos..pos + 8)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| PkiError::CorruptedCa("truncated STEK timestamp".into()))?;
    pos += 8;
    let next_bytes: [u8; 8] = bytes
        .get(pos..pos + 8)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| PkiError::CorruptedCa("truncated STEK timestamp".into()))?;

    let last_rotation = OffsetDateTime::from_unix_timestamp(i64::from_be_bytes(last_bytes))
        .map_err(|e| PkiError::CorruptedCa(e.to_string()))?;
    let next_rotation = OffsetDateTime::from_unix_timestamp(i64::from_be_bytes(next_bytes))
        .map_err(|e| PkiError::CorruptedCa(e.to_string()))?;

    Ok(StekBundle {
        keys,
        last_rotation,
        next_rotation,
    })
}

fn random_key() -> Result<[u8; KEY_LEN]> {
    let rng = SystemRandom::new();
    let mut key = [0u8; KEY_LEN];
    rng.fill(&mut key)
        .map_err(|_| PkiError::Storage("failed to generate STEK entropy".into()))?;
    Ok(key)
}

/// Load the bundle, create one if missing, rotate if due. Must be called
/// under `STEK_LOCK`.
async fn load_or_rotate(storage: &dyn Storage, config: &StekConfig) -> Result<StekBundle> {
    let now = OffsetDateTime::now_utc();
    let interval = Duration::seconds(config.rotation_interval_secs);

    let existing = match storage.load(STEK_KEY).await {
        Ok(bytes) => Some(decode_bundle(&bytes)?),
        Err(e) if e.is_not_exist() => None,
        Err(e) => return Err(e),
    };

    let bundle = match existing {
        None => StekBundle {
            keys: vec![random_key()?],
            last_rotation: now,
            next_rotation: now + interval,
        },
        Some(bundle) if now >= bundle.next_rotation => {
            let mut keys = bundle.keys;
            keys.insert(0, random_key()?);
            keys.truncate(config.key_count.max(1));
            StekBundle {
                keys,
                last_rotation: now,
                next_rotation: now + interval,
            }
        }
        Some(bundle) => return Ok(bundle),
    };

    storage.store(STEK_KEY, &encode_bundle(&bundle)).await?;
    Ok(bundle)
}

pub struct StekProvider {
    storage: Arc<dyn Storage>,
    config: StekConfig,
    state: RwLock<StekBundle>,
    tx: watch::Sender<Arc<Vec<[u8; KEY_LEN]>>>,
}

impl StekProvider {
    /// Arms the rotation timer and returns the provider along with a
    /// receiver streaming every subsequent key set (spec §4.6 `next`).
    pub async fn initialize(
        storage: Arc<dyn Storage>,
        config: StekConfig,
    ) -> Result<(Arc<StekProvider>, watch::Receiver<Arc<Vec<[u8; KEY_LEN]>>>)> {
        let guard = storage.lock(STEK_LOCK).await?;
        let bundle = load_or_rotate(storage.as_ref(), &config).await;
        guard.unlock().await;
        let bundle = bundle?;

        let (tx, rx) = watch::channel(Arc::new(bundle.keys.clone()));
        let provider = Arc::new(StekProvider {
            storage,
            config,
            state: RwLock::new(bundle),
            tx,
        });
        Ok((provider, rx))
    }

    pub async fn current_keys(&self) -> Arc<Vec<[u8; KEY_LEN]>> {
        Arc::new(self.state.read().await.keys.clone())
    }

    /// Background rotation task (spec §4.6 `next`, §9 "Timer+channel
    /// rotation"): one absolute-deadline timer per provider; on tick,
    /// re-enter the locked rotation path and push the result; `done` closing
    /// ends the task.
    pub fn spawn(self: Arc<Self>, done: oneshot::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut done = done;
            loop {
                let deadline = self.state.read().await.next_rotation;
                let now = OffsetDateTime::now_utc();
                let wait = (deadline - now).max(Duration::ZERO);
                let sleep = tokio::time::sleep(wait.unsigned_abs());
                tokio::select! {
                    _ = sleep => {
                        match self.rotate_once().await {
                            Ok(bundle) => {
                                let _ = self.tx.send(Arc::new(bundle.keys.clone()));
                                info!("STEK rotated");
                            }
                            Err(e) => warn!(error = %e, "STEK rotation failed, retrying next tick"),
                        }
                    }
                    _ = &mut done => {
                        info!("STEK rotation task stopping");
                        break;
                    }
                }
            }
        })
    }

    async fn rotate_once(&self) -> Result<StekBundle> {
        let guard = self.storage.lock(STEK_LOCK).await?;
        let bundle = load_or_rotate(self.storage.as_ref(), &self.config).await;
        guard.unlock().await;
        let bundle = bundle?;
        *self.state.write().await = bundle.clone();
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn bundle_round_trips_through_binary_frame() {
        let bundle = StekBundle {
            keys: vec![[1u8; KEY_LEN], [2u8; KEY_LEN]],
            last_rotation: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
            next_rotation: OffsetDateTime::from_unix_timestamp(1_700_086_400).unwrap(),
        };
        let encoded = encode_bundle(&bundle);
        let decoded = decode_bundle(&encoded).unwrap();
        assert_eq!(decoded, bundle);
    }

    #[tokio::test]
    async fn initialize_creates_bundle_when_missing() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let (provider, rx) = StekProvider::initialize(storage, StekConfig::default())
            .await
            .unwrap();
        assert_eq!(rx.borrow().len(), 1);
        assert_eq!(provider.current_keys().await.len(), 1);
    }

    #[tokio::test]
    async fn rotation_prepends_and_caps_key_list() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut config = StekConfig::default();
        config.key_count = 2;
        config.rotation_interval_secs = -1; // already due
        let (provider, _rx) = StekProvider::initialize(storage, config).await.unwrap();
        let before = provider.current_keys().await;
        let after = provider.rotate_once().await.unwrap();
        assert_eq!(after.keys.len(), 2);
        assert_eq!(after.keys[1], before[0]);
    }
}
