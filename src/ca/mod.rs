//! The CA entity (component C3): owns one named Certificate Authority's
//! root+intermediate material, persists it through `Storage`, and exposes the
//! signer used by the admin API and the ACME server core.
//!
//! In-memory material lives behind `tokio::sync::RwLock<Arc<CaState>>` rather
//! than locking individual fields: readers clone the `Arc` and never block a
//! writer, and rotation swaps the whole snapshot in one atomic replace (spec
//! §4.3, §5 "guarded by a read-write lock; readers are short, writers occur
//! only during rotation").

use crate::config::{render_template, sanitize_id, CaConfig};
use crate::crypto::{self, Cert, CertInfo, KeyType};
use crate::error::{PkiError, Result};
use crate::storage::{self, Storage};
use crate::trust;
use rcgen::KeyPair;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{info, instrument, warn};

const DEFAULT_NAME: &str = "Caddy Local Authority";
const DEFAULT_ROOT_CN_TEMPLATE: &str = "{pki.ca.name} - {year} {pki.ca.cert.key_type} Root";
const DEFAULT_INTERMEDIATE_CN_TEMPLATE: &str =
    "{pki.ca.name} - {year} {pki.ca.cert.key_type} Intermediate";

struct CaState {
    root_cert: Cert,
    root_key: Arc<KeyPair>,
    intermediate_cert: Cert,
    intermediate_key: Arc<KeyPair>,
}

pub struct Ca {
    id: String,
    safe_id: String,
    config: CaConfig,
    storage: Arc<dyn Storage>,
    state: tokio::sync::RwLock<Arc<CaState>>,
}

fn root_key_path(safe_id: &str) -> String {
    format!("pki/authorities/{safe_id}/root.key")
}
fn root_cert_path(safe_id: &str) -> String {
    format!("pki/authorities/{safe_id}/root.crt")
}
fn intermediate_key_path(safe_id: &str) -> String {
    format!("pki/authorities/{safe_id}/intermediate.key")
}
fn intermediate_cert_path(safe_id: &str) -> String {
    format!("pki/authorities/{safe_id}/intermediate.crt")
}
fn lock_name(safe_id: &str) -> String {
    format!("ca/{safe_id}/lock")
}

impl Ca {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> String {
        self.config.name.clone().unwrap_or_else(|| DEFAULT_NAME.to_string())
    }

    pub fn root_common_name(&self) -> String {
        let template = self
            .config
            .root_common_name
            .clone()
            .unwrap_or_else(|| DEFAULT_ROOT_CN_TEMPLATE.to_string());
        render_template(
            &template,
            &self.display_name(),
            self.config.key_type,
            OffsetDateTime::now_utc().year(),
        )
    }

    pub fn intermediate_common_name(&self) -> String {
        let template = self
            .config
            .intermediate_common_name
            .clone()
            .unwrap_or_else(|| DEFAULT_INTERMEDIATE_CN_TEMPLATE.to_string());
        render_template(
            &template,
            &self.display_name(),
            self.config.key_type,
            OffsetDateTime::now_utc().year(),
        )
    }

    /// Load-or-generate both tiers for `config.id`, under the per-CA storage
    /// lock, per spec §4.3. Idempotent: repeated calls against the same
    /// storage state observe it rather than regenerating.
    #[instrument(skip_all, fields(ca = %config.id))]
    pub async fn provision(storage: Arc<dyn Storage>, config: CaConfig) -> Result<Ca> {
        let safe_id = sanitize_id(&config.id);
        let guard = storage.lock(&lock_name(&safe_id)).await?;

        let root_lifetime = Duration::days(config.root_lifetime_days);
        let intermediate_lifetime = Duration::days(config.intermediate_lifetime_days);

        let root_common_name_template = config
            .root_common_name
            .clone()
            .unwrap_or_else(|| DEFAULT_ROOT_CN_TEMPLATE.to_string());
        let display_name = config.name.clone().unwrap_or_else(|| DEFAULT_NAME.to_string());
        let root_cn = render_template(
            &root_common_name_template,
            &display_name,
            config.key_type,
            OffsetDateTime::now_utc().year(),
        );

        let (root_cert, root_key) = load_or_generate_root(
            &storage,
            &safe_id,
            &config,
            &root_cn,
            root_lifetime,
        )
        .await?;

        let intermediate_common_name_template = config
            .intermediate_common_name
            .clone()
            .unwrap_or_else(|| DEFAULT_INTERMEDIATE_CN_TEMPLATE.to_string());
        let intermediate_cn = render_template(
            &intermediate_common_name_template,
            &display_name,
            config.key_type,
            OffsetDateTime::now_utc().year(),
        );

        let (intermediate_cert, intermediate_key) = load_or_generate_intermediate(
            &storage,
            &safe_id,
            &config,
            &intermediate_cn,
            intermediate_lifetime,
            &root_cert,
            &root_key,
        )
        .await?;

        guard.unlock().await;

        info!(ca = %config.id, "CA provisioned");

        Ok(Ca {
            id: config.id.clone(),
            safe_id,
            config,
            storage,
            state: tokio::sync::RwLock::new(Arc::new(CaState {
                root_cert,
                root_key: Arc::new(root_key),
                intermediate_cert,
                intermediate_key: Arc::new(intermediate_key),
            })),
        })
    }

    pub async fn root_certificate(&self) -> Cert {
        self.state.read().await.root_cert.clone()
    }

    pub async fn intermediate_certificate(&self) -> Cert {
        self.state.read().await.intermediate_cert.clone()
    }

    pub async fn intermediate_signer(&self) -> Arc<KeyPair> {
        self.state.read().await.intermediate_key.clone()
    }

    pub async fn root_signer(&self) -> Arc<KeyPair> {
        self.state.read().await.root_key.clone()
    }

    /// The certificate that ACME leaves should be signed with (spec §4.3
    /// `sign_with_root`).
    pub async fn signing_cert_and_key(&self) -> (Cert, Arc<KeyPair>) {
        let state = self.state.read().await;
        if self.config.sign_with_root {
            (state.root_cert.clone(), state.root_key.clone())
        } else {
            (state.intermediate_cert.clone(), state.intermediate_key.clone())
        }
    }

    /// Install the root into local trust stores; no-op per spec §4.3 if
    /// `install_trust == false` or the root is already trusted.
    pub async fn install_root(&self) {
        if self.config.install_trust == Some(false) {
            return;
        }
        let root = self.root_certificate().await;
        if trust::is_trusted(&root) {
            info!(ca = %self.id, "root certificate is already trusted");
            return;
        }
        trust::install(&root, trust::Options::default());
    }

    /// `true` iff `remaining_life < ratio * total_life` (spec §4.3, §8).
    pub fn needs_renewal(&self, info: &CertInfo) -> bool {
        let ratio = self.config.effective_renewal_window_ratio();
        let total = info.total_life().whole_seconds() as f64;
        let remaining = info.remaining_life(OffsetDateTime::now_utc()).whole_seconds() as f64;
        remaining < ratio * total
    }

    #[instrument(skip(self), fields(ca = %self.id))]
    pub async fn renew_root(&self) -> Result<()> {
        let guard = self.storage.lock(&lock_name(&self.safe_id)).await?;

        let current = self.state.read().await.clone();
        let current_info = current.root_cert.info()?;
        if !self.needs_renewal(&current_info) {
            guard.unlock().await;
            return Ok(());
        }

        let root_cn = self.root_common_name();
        let (new_root_cert, new_root_key) = crypto::generate_root(
            &root_cn,
            Duration::days(self.config.root_lifetime_days),
            self.config.key_type,
        )?;
        persist_pair(
            &self.storage,
            &root_cert_path(&self.safe_id),
            &root_key_path(&self.safe_id),
            new_root_cert.pem.as_bytes(),
            new_root_key.serialize_pem().as_bytes(),
        )
        .await?;

        {
            let mut state = self.state.write().await;
            *state = Arc::new(CaState {
                root_cert: new_root_cert,
                root_key: Arc::new(new_root_key),
                intermediate_cert: current.intermediate_cert.clone(),
                intermediate_key: current.intermediate_key.clone(),
            });
        }

        guard.unlock().await;
        info!(ca = %self.id, "root certificate rotated");
        Ok(())
    }

    #[instrument(skip(self), fields(ca = %self.id))]
    pub async fn renew_intermediate(&self) -> Result<()> {
        self.regenerate_intermediate(false).await
    }

    /// Regenerate the intermediate against the current root regardless of
    /// its remaining lifetime. Used after a root rotation (spec §4.4: "on
    /// root rotation, rotate intermediate too") since the old intermediate
    /// no longer chains to the new root's key even though its own lifetime
    /// clock hasn't expired.
    #[instrument(skip(self), fields(ca = %self.id))]
    pub async fn rechain_intermediate(&self) -> Result<()> {
        self.regenerate_intermediate(true).await
    }

    async fn regenerate_intermediate(&self, force: bool) -> Result<()> {
        let guard = self.storage.lock(&lock_name(&self.safe_id)).await?;

        let current = self.state.read().await.clone();
        let current_info = current.intermediate_cert.info()?;
        if !force && !self.needs_renewal(&current_info) {
            guard.unlock().await;
            return Ok(());
        }

        let intermediate_cn = self.intermediate_common_name();
        let (new_cert, new_key) = crypto::generate_intermediate(
            &intermediate_cn,
            &current.root_cert,
            &current.root_key,
            Duration::days(self.config.intermediate_lifetime_days),
            self.config.key_type,
        )?;
        persist_pair(
            &self.storage,
            &intermediate_cert_path(&self.safe_id),
            &intermediate_key_path(&self.safe_id),
            new_cert.pem.as_bytes(),
            new_key.serialize_pem().as_bytes(),
        )
        .await?;

        {
            let mut state = self.state.write().await;
            *state = Arc::new(CaState {
                root_cert: current.root_cert.clone(),
                root_key: current.root_key.clone(),
                intermediate_cert: new_cert,
                intermediate_key: Arc::new(new_key),
            });
        }

        guard.unlock().await;
        info!(ca = %self.id, "intermediate certificate rotated");
        Ok(())
    }
}

async fn persist_pair(
    storage: &Arc<dyn Storage>,
    cert_path: &str,
    key_path: &str,
    cert_pem: &[u8],
    key_pem: &[u8],
) -> Result<()> {
    if let Err(e) = storage.store(cert_path, cert_pem).await {
        return Err(e);
    }
    if let Err(e) = storage.store(key_path, key_pem).await {
        storage::delete_best_effort(storage.as_ref(), cert_path).await;
        return Err(e);
    }
    Ok(())
}

async fn load_or_generate_root(
    storage: &Arc<dyn Storage>,
    safe_id: &str,
    config: &CaConfig,
    common_name: &str,
    lifetime: Duration,
) -> Result<(Cert, KeyPair)> {
    if let Some(external) = &config.external_root {
        let der = crypto::pem_decode_cert(&external.cert_pem)?;
        let cert = Cert::from_der(der);
        let key = crypto::pem_decode_key(&external.key_pem)?;
        let info = cert.info()?;
        if !info.is_ca || info.subject != info.issuer {
            return Err(PkiError::CorruptedCa(format!(
                "external root for {safe_id} is not a self-signed CA"
            )));
        }
        return Ok((cert, key));
    }

    let cert_path = root_cert_path(safe_id);
    let key_path = root_key_path(safe_id);

    match storage.load(&cert_path).await {
        Ok(cert_pem) => {
            let der = crypto::pem_decode_cert(std::str::from_utf8(&cert_pem).map_err(|e| {
                PkiError::CorruptedCa(format!("root.crt for {safe_id} is not valid utf8: {e}"))
            })?)?;
            let cert = Cert::from_der(der);
            let info = cert.info()?;
            if !info.is_ca || info.subject != info.issuer {
                return Err(PkiError::CorruptedCa(format!(
                    "stored root for {safe_id} fails self-signed/IsCA invariant"
                )));
            }
            let key_pem = storage.load(&key_path).await?;
            let key = crypto::pem_decode_key(std::str::from_utf8(&key_pem).map_err(|e| {
                PkiError::CorruptedCa(format!("root.key for {safe_id} is not valid utf8: {e}"))
            })?)?;
            Ok((cert, key))
        }
        Err(e) if e.is_not_exist() => {
            let (cert, key) = crypto::generate_root(common_name, lifetime, config.key_type)?;
            persist_pair(
                storage,
                &cert_path,
                &key_path,
                cert.pem.as_bytes(),
                key.serialize_pem().as_bytes(),
            )
            .await?;
            Ok((cert, key))
        }
        Err(e) => Err(e),
    }
}

async fn load_or_generate_intermediate(
    storage: &Arc<dyn Storage>,
    safe_id: &str,
    config: &CaConfig,
    common_name: &str,
    lifetime: Duration,
    root_cert: &Cert,
    root_key: &KeyPair,
) -> Result<(Cert, KeyPair)> {
    if let Some(external) = &config.external_intermediate {
        let der = crypto::pem_decode_cert(&external.cert_pem)?;
        let cert = Cert::from_der(der);
        let key = crypto::pem_decode_key(&external.key_pem)?;
        crypto::verify_keys_match(&cert, &key)?;
        let info = cert.info()?;
        let root_info = root_cert.info()?;
        if info.issuer != root_info.subject {
            return Err(PkiError::CorruptedCa(format!(
                "external intermediate for {safe_id} is not issued by its root"
            )));
        }
        return Ok((cert, key));
    }

    let cert_path = intermediate_cert_path(safe_id);
    let key_path = intermediate_key_path(safe_id);

    match storage.load(&cert_path).await {
        Ok(cert_pem) => {
            let der = crypto::pem_decode_cert(std::str::from_utf8(&cert_pem).map_err(|e| {
                PkiError::CorruptedCa(format!(
                    "intermediate.crt for {safe_id} is not valid utf8: {e}"
                ))
            })?)?;
            let cert = Cert::from_der(der);
            let key_pem = storage.load(&key_path).await?;
            let key = crypto::pem_decode_key(std::str::from_utf8(&key_pem).map_err(|e| {
                PkiError::CorruptedCa(format!(
                    "intermediate.key for {safe_id} is not valid utf8: {e}"
                ))
            })?)?;
            crypto::verify_keys_match(&cert, &key)?;
            let info = cert.info()?;
            let root_info = root_cert.info()?;
            if info.issuer != root_info.subject {
                warn!(ca = %safe_id, "stored intermediate issuer does not match root subject");
                return Err(PkiError::CorruptedCa(format!(
                    "intermediate for {safe_id} does not chain to its root"
                )));
            }
            Ok((cert, key))
        }
        Err(e) if e.is_not_exist() => {
            let (cert, key) =
                crypto::generate_intermediate(common_name, root_cert, root_key, lifetime, config.key_type)?;
            persist_pair(
                storage,
                &cert_path,
                &key_path,
                cert.pem.as_bytes(),
                key.serialize_pem().as_bytes(),
            )
            .await?;
            Ok((cert, key))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    fn test_config() -> CaConfig {
        CaConfig {
            id: "test".to_string(),
            root_lifetime_days: 1,
            intermediate_lifetime_days: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn provision_generates_chained_material() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let ca = Ca::provision(storage, test_config()).await.unwrap();
        let root = ca.root_certificate().await;
        let intermediate = ca.intermediate_certificate().await;
        let root_info = root.info().unwrap();
        let inter_info = intermediate.info().unwrap();
        assert!(root_info.is_ca);
        assert_eq!(root_info.subject, root_info.issuer);
        assert_eq!(inter_info.issuer, root_info.subject);
        crypto::verify_keys_match(&intermediate, &ca.intermediate_signer().await).unwrap();
    }

    #[tokio::test]
    async fn provision_is_idempotent_over_existing_storage() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let first = Ca::provision(storage.clone(), test_config()).await.unwrap();
        let second = Ca::provision(storage, test_config()).await.unwrap();
        assert_eq!(
            first.root_certificate().await.der,
            second.root_certificate().await.der
        );
    }

    #[tokio::test]
    async fn needs_renewal_uses_effective_ratio() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut cfg = test_config();
        cfg.intermediate_lifetime_days = 10;
        let ca = Ca::provision(storage, cfg).await.unwrap();
        let info = ca.intermediate_certificate().await.info().unwrap();
        assert!(!ca.needs_renewal(&info));
    }

    #[tokio::test]
    async fn renew_intermediate_rechains_to_same_root() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut cfg = test_config();
        cfg.intermediate_lifetime_days = 0;
        let ca = Ca::provision(storage, cfg).await.unwrap();
        let before = ca.intermediate_certificate().await;
        ca.renew_intermediate().await.unwrap();
        let after = ca.intermediate_certificate().await;
        assert_ne!(before.der, after.der);
        let root = ca.root_certificate().await;
        assert_eq!(after.info().unwrap().issuer, root.info().unwrap().subject);
    }
}
