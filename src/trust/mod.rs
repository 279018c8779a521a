//! Trust-store installer (component C2).
//!
//! Generalizes the teacher's `platform` module (which only *detected* macOS
//! keychain trust and shelled out to `networksetup`/`netsh` for an HTTP
//! proxy) into install/uninstall across the OS-native store plus a
//! best-effort Firefox NSS DB and Java `cacerts` store, per spec §4.2/§6.
//! Every backend failure is caught and categorized; none is fatal to the
//! caller, which logs and continues (spec §4.3's `install_root`).

mod java;
mod linux;
mod mac;
mod nss;
mod noop;
mod windows;

use crate::crypto::Cert;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone)]
pub enum Error {
    #[error("permission denied installing into {store}")]
    PermissionDenied { store: &'static str },

    #[error("{store} is unavailable on this host")]
    StoreUnavailable { store: &'static str },

    #[error("{store}: {message}")]
    Unknown { store: &'static str, message: String },
}

/// Which stores an install/uninstall call should touch. Defaults to all
/// three, matching spec §6's `{system, firefox, java}` selection set.
#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub system: bool,
    pub firefox: bool,
    pub java: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            system: true,
            firefox: true,
            java: true,
        }
    }
}

trait Backend {
    fn name(&self) -> &'static str;
    fn is_installed(&self, cert: &Cert) -> Result<bool, Error>;
    fn install(&self, cert: &Cert) -> Result<(), Error>;
    fn uninstall(&self, cert: &Cert) -> Result<(), Error>;
}

fn backends() -> Vec<Box<dyn Backend>> {
    let mut v: Vec<Box<dyn Backend>> = Vec::new();

    #[cfg(target_os = "macos")]
    v.push(Box::new(mac::MacSystemStore));
    #[cfg(target_os = "windows")]
    v.push(Box::new(windows::WindowsSystemStore));
    #[cfg(target_os = "linux")]
    v.push(Box::new(linux::LinuxSystemStore));
    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    v.push(Box::new(noop::NoopSystemStore));

    v
}

/// True if `cert` already appears trusted in the OS-native store. `install`
/// is a no-op when this is already true (spec §4.2).
pub fn is_trusted(cert: &Cert) -> bool {
    backends()
        .iter()
        .any(|b| b.is_installed(cert).unwrap_or(false))
}

/// Install `cert` into the selected stores, logging and continuing past any
/// individual backend failure.
pub fn install(cert: &Cert, opts: Options) {
    if opts.system {
        for backend in backends() {
            match backend.is_installed(cert) {
                Ok(true) => {
                    tracing::info!(store = backend.name(), "root certificate is already trusted");
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(store = backend.name(), error = %e, "could not check trust state");
                }
            }
            match backend.install(cert) {
                Ok(()) => tracing::info!(store = backend.name(), "installed root certificate"),
                Err(e) => warn!(store = backend.name(), error = %e, "failed to install root certificate"),
            }
        }
    }
    if opts.firefox {
        match nss::install_firefox(cert) {
            Ok(()) => debug!("installed root certificate into Firefox NSS DB"),
            Err(e) => debug!(error = %e, "skipping Firefox NSS DB install"),
        }
    }
    if opts.java {
        match java::install_java(cert) {
            Ok(()) => debug!("installed root certificate into Java cacerts"),
            Err(e) => debug!(error = %e, "skipping Java cacerts install"),
        }
    }
}

/// Uninstall `cert` from the selected stores. Best-effort, same as `install`.
pub fn uninstall(cert: &Cert, opts: Options) {
    if opts.system {
        for backend in backends() {
            match backend.uninstall(cert) {
                Ok(()) => tracing::info!(store = backend.name(), "uninstalled root certificate"),
                Err(e) => warn!(store = backend.name(), error = %e, "failed to uninstall root certificate"),
            }
        }
    }
    if opts.firefox {
        let _ = nss::uninstall_firefox(cert);
    }
    if opts.java {
        let _ = java::uninstall_java(cert);
    }
}

/// Uninstall a root certificate given only a file path (CLI `untrust --cert`,
/// spec §6), parsing it first.
pub fn uninstall_file(path: &std::path::Path, opts: Options) -> Result<(), Error> {
    let pem = std::fs::read_to_string(path).map_err(|e| Error::Unknown {
        store: "file",
        message: e.to_string(),
    })?;
    let der = crate::crypto::pem_decode_cert(&pem).map_err(|e| Error::Unknown {
        store: "file",
        message: e.to_string(),
    })?;
    uninstall(&Cert::from_der(der), opts);
    Ok(())
}
