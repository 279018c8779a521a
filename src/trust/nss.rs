//! Best-effort Firefox NSS DB installer (spec §4.2/§6). Firefox keeps its
//! own trust store independent of the OS; `certutil` here is the NSS tool of
//! the same name as Windows' certificate `certutil`; we shell out to it the
//! same way the teacher's platform adapters shell out to OS tools.

use crate::crypto::Cert;
use std::path::PathBuf;
use std::process::Command;

fn profile_dirs() -> Vec<PathBuf> {
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };
    let candidates = [
        home.join(".mozilla/firefox"),
        home.join("Library/Application Support/Firefox/Profiles"),
        home.join("AppData/Roaming/Mozilla/Firefox/Profiles"),
    ];
    candidates
        .into_iter()
        .filter(|p| p.is_dir())
        .flat_map(|base| {
            std::fs::read_dir(&base)
                .into_iter()
                .flatten()
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
        })
        .collect()
}

pub fn install_firefox(cert: &Cert) -> anyhow::Result<()> {
    let info = cert.info()?;
    let profiles = profile_dirs();
    if profiles.is_empty() {
        anyhow::bail!("no Firefox profile directories found");
    }
    for profile in profiles {
        let db = format!("sql:{}", profile.display());
        let mut tmp = tempfile::NamedTempFile::new()?;
        std::io::Write::write_all(&mut tmp, cert.pem.as_bytes())?;
        let _ = Command::new("certutil")
            .args(["-A", "-n", &info.subject, "-t", "C,,", "-i"])
            .arg(tmp.path())
            .args(["-d", &db])
            .status();
    }
    Ok(())
}

pub fn uninstall_firefox(cert: &Cert) -> anyhow::Result<()> {
    let info = cert.info()?;
    for profile in profile_dirs() {
        let db = format!("sql:{}", profile.display());
        let _ = Command::new("certutil")
            .args(["-D", "-n", &info.subject, "-d", &db])
            .status();
    }
    Ok(())
}
