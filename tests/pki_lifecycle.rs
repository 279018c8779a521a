use std::sync::Arc;

use pki_authority::app::PkiApp;
use pki_authority::config::PkiConfig;
use pki_authority::storage::memory::MemoryStorage;
use pki_authority::storage::Storage;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn app_start_provisions_and_stop_halts_maintenance() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let mut config = PkiConfig::default();
    config.install_trust = false; // never touch the host's real trust store in tests
    config.maintenance_interval_secs = 1;

    let app = PkiApp::provision(storage, config).await.expect("provision");
    app.start().await;

    let ca = app.ca("local").await.expect("default CA provisioned");
    let root = ca.root_certificate().await;
    let intermediate = ca.intermediate_certificate().await;
    let root_info = root.info().unwrap();
    let inter_info = intermediate.info().unwrap();
    assert!(root_info.is_ca);
    assert_eq!(inter_info.issuer, root_info.subject);

    app.stop().await;
}

#[tokio::test]
async fn unconfigured_ca_id_lazily_provisions_only_local() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let config = PkiConfig::default();
    let app = PkiApp::provision(storage, config).await.expect("provision");

    assert!(app.ca_or_provision_default("local").await.unwrap().is_some());
    assert!(app.ca_or_provision_default("nonexistent").await.unwrap().is_none());
}
