//! macOS system keychain backend, extending the teacher's
//! `platform::mac::MacProxyAdapter` (which only ran `security find-certificate`
//! to detect trust) with install/uninstall via `security add-trusted-cert` /
//! `security delete-certificate`.

use super::{Backend, Error};
use crate::crypto::Cert;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

const SYSTEM_KEYCHAIN: &str = "/Library/Keychains/System.keychain";

pub struct MacSystemStore;

impl MacSystemStore {
    fn write_pem(cert: &Cert) -> Result<NamedTempFile, Error> {
        let mut f = NamedTempFile::new().map_err(|e| unknown(e.to_string()))?;
        f.write_all(cert.pem.as_bytes())
            .map_err(|e| unknown(e.to_string()))?;
        Ok(f)
    }
}

fn unknown(message: String) -> Error {
    Error::Unknown {
        store: "macos-keychain",
        message,
    }
}

impl Backend for MacSystemStore {
    fn name(&self) -> &'static str {
        "macos-keychain"
    }

    fn is_installed(&self, cert: &Cert) -> Result<bool, Error> {
        let info = cert.info().map_err(|e| unknown(e.to_string()))?;
        let status = Command::new("security")
            .args(["find-certificate", "-c", &info.subject, "-a", "-Z", SYSTEM_KEYCHAIN])
            .output()
            .map_err(|e| unknown(e.to_string()))?;
        Ok(status.status.success())
    }

    fn install(&self, cert: &Cert) -> Result<(), Error> {
        let file = Self::write_pem(cert)?;
        let output = Command::new("security")
            .args([
                "add-trusted-cert",
                "-d",
                "-r",
                "trustRoot",
                "-k",
                SYSTEM_KEYCHAIN,
            ])
            .arg(file.path())
            .output()
            .map_err(|e| unknown(e.to_string()))?;
        if output.status.success() {
            Ok(())
        } else if output.status.code() == Some(1) {
            Err(Error::PermissionDenied {
                store: "macos-keychain",
            })
        } else {
            Err(unknown(String::from_utf8_lossy(&output.stderr).into_owned()))
        }
    }

    fn uninstall(&self, cert: &Cert) -> Result<(), Error> {
        let info = cert.info().map_err(|e| unknown(e.to_string()))?;
        let output = Command::new("security")
            .args(["delete-certificate", "-c", &info.subject, SYSTEM_KEYCHAIN])
            .output()
            .map_err(|e| unknown(e.to_string()))?;
        if output.status.success() {
            Ok(())
        } else {
            // Already absent is an acceptable outcome for uninstall.
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("not find") {
                Ok(())
            } else {
                Err(unknown(stderr.into_owned()))
            }
        }
    }
}
