//! Fallback backend for platforms with no known trust-store integration,
//! mirroring the teacher's `platform::noop::NoopProxyAdapter`.

use super::{Backend, Error};
use crate::crypto::Cert;

pub struct NoopSystemStore;

impl Backend for NoopSystemStore {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn is_installed(&self, _cert: &Cert) -> Result<bool, Error> {
        Ok(false)
    }

    fn install(&self, _cert: &Cert) -> Result<(), Error> {
        Err(Error::StoreUnavailable { store: "noop" })
    }

    fn uninstall(&self, _cert: &Cert) -> Result<(), Error> {
        Err(Error::StoreUnavailable { store: "noop" })
    }
}
