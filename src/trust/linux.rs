//! Linux system store backend. The teacher had no Linux adapter (its
//! `platform` module fell back to `noop` on Linux); this one prefers the
//! `trust` CLI (p11-kit) when present and otherwise drops a PEM file into
//! the Debian/RHEL-style CA directory and runs the matching update tool.

use super::{Backend, Error};
use crate::crypto::Cert;
use std::path::Path;
use std::process::Command;

const ANCHOR_PATH: &str = "/usr/local/share/ca-certificates/pki-authority-root.crt";

fn unknown(message: String) -> Error {
    Error::Unknown {
        store: "linux-ca-store",
        message,
    }
}

fn have(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

pub struct LinuxSystemStore;

impl Backend for LinuxSystemStore {
    fn name(&self) -> &'static str {
        "linux-ca-store"
    }

    fn is_installed(&self, _cert: &Cert) -> Result<bool, Error> {
        Ok(Path::new(ANCHOR_PATH).exists())
    }

    fn install(&self, cert: &Cert) -> Result<(), Error> {
        if have("trust") {
            let output = Command::new("trust")
                .args(["anchor", "--store"])
                .arg("/dev/stdin")
                .output();
            // `trust anchor --store` historically takes a file path rather
            // than stdin on some distros; fall back to the file-based path
            // below on any failure instead of treating this as fatal.
            if let Ok(out) = output {
                if out.status.success() {
                    return Ok(());
                }
            }
        }
        std::fs::write(ANCHOR_PATH, &cert.pem).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                Error::PermissionDenied {
                    store: "linux-ca-store",
                }
            } else {
                unknown(e.to_string())
            }
        })?;
        if have("update-ca-certificates") {
            let status = Command::new("update-ca-certificates")
                .status()
                .map_err(|e| unknown(e.to_string()))?;
            if !status.success() {
                return Err(unknown(format!("update-ca-certificates exited with {status}")));
            }
            Ok(())
        } else {
            Err(Error::StoreUnavailable {
                store: "linux-ca-store",
            })
        }
    }

    fn uninstall(&self, _cert: &Cert) -> Result<(), Error> {
        if Path::new(ANCHOR_PATH).exists() {
            std::fs::remove_file(ANCHOR_PATH).map_err(|e| unknown(e.to_string()))?;
            if have("update-ca-certificates") {
                let _ = Command::new("update-ca-certificates").arg("--fresh").status();
            }
        }
        Ok(())
    }
}
