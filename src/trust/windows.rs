//! Windows system store backend, extending the teacher's
//! `platform::windows::WindowsProxyAdapter` (`certutil`/`netsh` shell-outs)
//! with install/uninstall via `certutil -addstore` / `certutil -delstore`.

use super::{Backend, Error};
use crate::crypto::Cert;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

fn unknown(message: String) -> Error {
    Error::Unknown {
        store: "windows-root-store",
        message,
    }
}

pub struct WindowsSystemStore;

impl Backend for WindowsSystemStore {
    fn name(&self) -> &'static str {
        "windows-root-store"
    }

    fn is_installed(&self, cert: &Cert) -> Result<bool, Error> {
        let info = cert.info().map_err(|e| unknown(e.to_string()))?;
        let query = format!("Root {}", info.subject);
        let output = Command::new("certutil")
            .args(["-store", "-user", "Root", &query])
            .output()
            .map_err(|e| unknown(e.to_string()))?;
        Ok(output.status.success())
    }

    fn install(&self, cert: &Cert) -> Result<(), Error> {
        let mut file = NamedTempFile::new().map_err(|e| unknown(e.to_string()))?;
        file.write_all(cert.pem.as_bytes())
            .map_err(|e| unknown(e.to_string()))?;
        let status = Command::new("certutil")
            .args(["-addstore", "-f", "Root"])
            .arg(file.path())
            .status()
            .map_err(|e| unknown(e.to_string()))?;
        if status.success() {
            Ok(())
        } else if status.code() == Some(5) {
            Err(Error::PermissionDenied {
                store: "windows-root-store",
            })
        } else {
            Err(unknown(format!("certutil exited with {status}")))
        }
    }

    fn uninstall(&self, cert: &Cert) -> Result<(), Error> {
        let info = cert.info().map_err(|e| unknown(e.to_string()))?;
        let status = Command::new("certutil")
            .args(["-delstore", "Root", &info.serial_hex])
            .status()
            .map_err(|e| unknown(e.to_string()))?;
        if status.success() {
            Ok(())
        } else {
            // Not present is acceptable for uninstall, mirroring the
            // teacher's `disable_system_proxy` tolerance of netsh's
            // "nothing to reset" exit codes.
            Ok(())
        }
    }
}
