//! Best-effort Java `cacerts` installer (spec §4.2/§6). Uses the `keytool`
//! bundled with any JRE/JDK found via `JAVA_HOME`, same shell-out pattern as
//! the rest of this module.

use crate::crypto::Cert;
use std::path::PathBuf;
use std::process::Command;

const DEFAULT_STOREPASS: &str = "changeit";

fn cacerts_path() -> anyhow::Result<PathBuf> {
    let home = std::env::var("JAVA_HOME").map_err(|_| anyhow::anyhow!("JAVA_HOME not set"))?;
    let path = PathBuf::from(home).join("lib/security/cacerts");
    if path.exists() {
        Ok(path)
    } else {
        Err(anyhow::anyhow!("no cacerts file under JAVA_HOME"))
    }
}

pub fn install_java(cert: &Cert) -> anyhow::Result<()> {
    let info = cert.info()?;
    let cacerts = cacerts_path()?;
    let mut tmp = tempfile::NamedTempFile::new()?;
    std::io::Write::write_all(&mut tmp, cert.pem.as_bytes())?;
    let output = Command::new("keytool")
        .args(["-importcert", "-noprompt", "-alias"])
        .arg(&info.serial_hex)
        .args(["-keystore"])
        .arg(&cacerts)
        .args(["-storepass", DEFAULT_STOREPASS, "-file"])
        .arg(tmp.path())
        .output()?;
    if output.status.success() {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "keytool -importcert failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ))
    }
}

pub fn uninstall_java(cert: &Cert) -> anyhow::Result<()> {
    let info = cert.info()?;
    let cacerts = cacerts_path()?;
    let _ = Command::new("keytool")
        .args(["-delete", "-noprompt", "-alias"])
        .arg(&info.serial_hex)
        .args(["-keystore"])
        .arg(&cacerts)
        .args(["-storepass", DEFAULT_STOREPASS])
        .status();
    Ok(())
}
