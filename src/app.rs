//! The PKI app (component C4, spec §4.4): owns the map of configured CAs,
//! provisions the default CA when none are configured, drives the
//! startup trust-store install, and runs the maintenance loop that keeps
//! every CA's material renewed.

use crate::acme::AcmeServer;
use crate::ca::Ca;
use crate::config::{CaConfig, PkiConfig};
use crate::dbpool::DbPool;
use crate::error::Result;
use crate::stek::StekProvider;
use crate::storage::Storage;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct PkiApp {
    storage: Arc<dyn Storage>,
    cas: RwLock<HashMap<String, Arc<Ca>>>,
    config: PkiConfig,
    dbpool: Arc<DbPool>,
    maintenance: Mutex<Option<(JoinHandle<()>, oneshot::Sender<()>)>>,
    stek: RwLock<Option<Arc<StekProvider>>>,
    stek_task: Mutex<Option<(JoinHandle<()>, oneshot::Sender<()>)>>,
    acme: RwLock<Option<Arc<AcmeServer>>>,
}

impl PkiApp {
    /// Provision every configured CA, or the default `local` CA if none are
    /// configured (spec §4.4 "Provision").
    pub async fn provision(storage: Arc<dyn Storage>, config: PkiConfig) -> Result<Arc<PkiApp>> {
        let configs = if config.cas.is_empty() {
            vec![CaConfig::default()]
        } else {
            config.cas.clone()
        };

        let mut cas = HashMap::new();
        for ca_config in configs {
            let id = ca_config.id.clone();
            let ca = Ca::provision(storage.clone(), ca_config).await?;
            cas.insert(id, Arc::new(ca));
        }

        Ok(Arc::new(PkiApp {
            storage,
            cas: RwLock::new(cas),
            config,
            dbpool: DbPool::new(),
            maintenance: Mutex::new(None),
            stek: RwLock::new(None),
            stek_task: Mutex::new(None),
            acme: RwLock::new(None),
        }))
    }

    pub async fn ca(&self, id: &str) -> Option<Arc<Ca>> {
        self.cas.read().await.get(id).cloned()
    }

    /// `GET /pki/ca/local` lazily provisions the default CA the first time
    /// it's requested (spec §4.5); any other unconfigured id stays 404.
    pub async fn ca_or_provision_default(&self, id: &str) -> Result<Option<Arc<Ca>>> {
        if let Some(ca) = self.ca(id).await {
            return Ok(Some(ca));
        }
        if id != "local" {
            return Ok(None);
        }
        let ca = Arc::new(Ca::provision(self.storage.clone(), CaConfig::default()).await?);
        self.cas.write().await.insert(id.to_string(), ca.clone());
        Ok(Some(ca))
    }

    /// Best-effort root install for every configured CA, an initial renewal
    /// pass, then spawn the maintenance task, the STEK rotation task, and the
    /// embedded ACME server (spec §4.4 "Start").
    pub async fn start(self: &Arc<Self>) {
        let cas: Vec<Arc<Ca>> = self.cas.read().await.values().cloned().collect();
        if self.config.install_trust {
            for ca in &cas {
                ca.install_root().await;
            }
        }
        self.renew_all().await;

        let (tx, rx) = oneshot::channel();
        let app = self.clone();
        let handle = tokio::spawn(async move { app.maintenance_loop(rx).await });
        *self.maintenance.lock().await = Some((handle, tx));

        match StekProvider::initialize(self.storage.clone(), self.config.stek.clone()).await {
            Ok((provider, _rx)) => {
                let (stek_tx, stek_rx) = oneshot::channel();
                let stek_handle = provider.clone().spawn(stek_rx);
                *self.stek.write().await = Some(provider);
                *self.stek_task.lock().await = Some((stek_handle, stek_tx));
            }
            Err(e) => warn!(error = %e, "failed to initialize STEK provider"),
        }

        let app_data_dir = PathBuf::from(&self.config.app_data_dir);
        match AcmeServer::new(self.clone(), &self.dbpool, &app_data_dir, self.config.acme.clone()).await {
            Ok(server) => *self.acme.write().await = Some(Arc::new(server)),
            Err(e) => warn!(error = %e, "failed to initialize embedded ACME server"),
        }
    }

    /// Cancel the maintenance and STEK rotation tasks and wait for both to
    /// exit (spec §4.4 "Stop").
    pub async fn stop(&self) {
        if let Some((handle, tx)) = self.maintenance.lock().await.take() {
            let _ = tx.send(());
            let _ = handle.await;
        }
        if let Some((handle, tx)) = self.stek_task.lock().await.take() {
            let _ = tx.send(());
            let _ = handle.await;
        }
    }

    pub async fn acme_server(&self) -> Option<Arc<AcmeServer>> {
        self.acme.read().await.clone()
    }

    pub async fn stek_keys(&self) -> Option<Arc<Vec<[u8; 32]>>> {
        let stek = self.stek.read().await.clone()?;
        Some(stek.current_keys().await)
    }

    async fn maintenance_loop(self: Arc<Self>, mut done: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(
            self.config.maintenance_interval_secs.max(1),
        ));
        ticker.tick().await; // first tick fires immediately; we already ran an initial pass
        loop {
            tokio::select! {
                _ = ticker.tick() => self.renew_all().await,
                _ = &mut done => {
                    info!("PKI maintenance loop stopping");
                    break;
                }
            }
        }
    }

    /// One maintenance pass over every CA (spec §4.4): intermediate first,
    /// then root; a root rotation re-chains the intermediate. Failures are
    /// logged and the offending CA is skipped, never crashing the process.
    async fn renew_all(&self) {
        let cas: Vec<Arc<Ca>> = self.cas.read().await.values().cloned().collect();
        for ca in cas {
            if let Err(e) = self.renew_one(&ca).await {
                warn!(ca = ca.id(), error = %e, "renewal pass failed, will retry next tick");
            }
        }
    }

    async fn renew_one(&self, ca: &Ca) -> Result<()> {
        let intermediate_info = ca.intermediate_certificate().await.info()?;
        if ca.needs_renewal(&intermediate_info) {
            ca.renew_intermediate().await?;
        }

        let root_info = ca.root_certificate().await.info()?;
        if ca.needs_renewal(&root_info) {
            ca.renew_root().await?;
            ca.rechain_intermediate().await?;
        }
        Ok(())
    }
}
