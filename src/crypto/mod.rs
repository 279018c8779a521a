//! Certificate and key primitives (component C1).
//!
//! Generation goes through `rcgen`; parsing of stored/foreign material goes
//! through `rustls-pemfile` + `x509-parser`, the same pairing the teacher
//! repo's `control::caclient` module uses for the mirror operation (parsing
//! certificates handed back by an external CA rather than one we mint
//! ourselves).

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose, PublicKeyData,
};
use rustls_pemfile::Item;
use std::io::Cursor;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported key or certificate format")]
    UnsupportedFormat,

    #[error("malformed PEM: {0}")]
    MalformedPem(String),

    #[error("unknown key type")]
    UnknownKeyType,

    #[error("certificate public key does not match signer")]
    MismatchedKey,

    #[error("rcgen error: {0}")]
    Rcgen(#[from] rcgen::Error),

    #[error("x509 parse error: {0}")]
    X509(String),
}

/// Key algorithms this crate can *generate*. `rcgen` cannot synthesize RSA
/// keypairs itself, so RSA is parse/import-only (an externally supplied CA
/// keypair may use it; see `Ca`'s external-keypair path).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyType {
    EcdsaP256,
    EcdsaP384,
    Ed25519,
}

impl Default for KeyType {
    fn default() -> Self {
        KeyType::EcdsaP256
    }
}

impl KeyType {
    pub fn label(&self) -> &'static str {
        match self {
            KeyType::EcdsaP256 => "ECC",
            KeyType::EcdsaP384 => "ECC",
            KeyType::Ed25519 => "Ed25519",
        }
    }

    fn rcgen_alg(&self) -> &'static rcgen::SignatureAlgorithm {
        match self {
            KeyType::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            KeyType::EcdsaP384 => &rcgen::PKCS_ECDSA_P384_SHA384,
            KeyType::Ed25519 => &rcgen::PKCS_ED25519,
        }
    }

    fn generate(&self) -> Result<KeyPair, Error> {
        Ok(KeyPair::generate_for(self.rcgen_alg())?)
    }
}

/// A generated or loaded certificate together with its DER bytes, kept
/// alongside the PEM for cheap re-serialization.
#[derive(Debug, Clone)]
pub struct Cert {
    pub der: Vec<u8>,
    pub pem: String,
}

impl Cert {
    pub fn from_der(der: Vec<u8>) -> Self {
        let pem = pem_encode_cert(&der);
        Cert { der, pem }
    }

    pub fn info(&self) -> Result<CertInfo, Error> {
        parse_cert_der(&self.der)
    }
}

/// Owned summary of the fields this crate needs out of a parsed certificate.
/// Kept separate from `Cert` because `x509_parser::X509Certificate` borrows
/// from the DER bytes it was parsed from and isn't convenient to store.
#[derive(Debug, Clone)]
pub struct CertInfo {
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    pub subject: String,
    pub issuer: String,
    pub is_ca: bool,
    pub serial_hex: String,
    pub spki_der: Vec<u8>,
}

impl CertInfo {
    pub fn total_life(&self) -> Duration {
        self.not_after - self.not_before
    }

    pub fn remaining_life(&self, now: OffsetDateTime) -> Duration {
        self.not_after - now
    }
}

pub fn parse_cert_der(der: &[u8]) -> Result<CertInfo, Error> {
    let (_, cert) =
        x509_parser::parse_x509_certificate(der).map_err(|e| Error::X509(e.to_string()))?;
    let not_before = x509_time_to_offset(cert.validity().not_before)?;
    let not_after = x509_time_to_offset(cert.validity().not_after)?;
    Ok(CertInfo {
        not_before,
        not_after,
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        is_ca: cert.basic_constraints().ok().flatten().map(|b| b.value.ca).unwrap_or(false),
        serial_hex: cert.raw_serial_as_string(),
        spki_der: cert.public_key().raw.to_vec(),
    })
}

fn x509_time_to_offset(t: x509_parser::time::ASN1Time) -> Result<OffsetDateTime, Error> {
    OffsetDateTime::from_unix_timestamp(t.timestamp())
        .map_err(|e| Error::X509(format!("invalid timestamp: {e}")))
}

/// Build the `CertificateParams` shared by root and intermediate templates.
/// `max_path_len` is 3 for root, 2 for intermediate, per spec §4.1.
fn ca_template(
    common_name: &str,
    lifetime: Duration,
    max_path_len: u8,
) -> Result<CertificateParams, Error> {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(max_path_len));
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

    let now = OffsetDateTime::now_utc();
    let now = OffsetDateTime::from_unix_timestamp(now.unix_timestamp()).unwrap_or(now);
    params.not_before = now;
    params.not_after = now + lifetime;
    Ok(params)
}

/// Generate a self-signed root CA certificate (spec §4.1/§4.3).
pub fn generate_root(
    common_name: &str,
    lifetime: Duration,
    key_type: KeyType,
) -> Result<(Cert, KeyPair), Error> {
    let params = ca_template(common_name, lifetime, 3)?;
    let key_pair = key_type.generate()?;
    let cert = params.self_signed(&key_pair)?;
    Ok((Cert::from_der(cert.der().to_vec()), key_pair))
}

/// Generate an intermediate CA certificate signed by `root_signer`, chained
/// to `root_cert` (spec §4.1/§4.3).
pub fn generate_intermediate(
    common_name: &str,
    root_cert: &Cert,
    root_signer: &KeyPair,
    lifetime: Duration,
    key_type: KeyType,
) -> Result<(Cert, KeyPair), Error> {
    let params = ca_template(common_name, lifetime, 2)?;
    let key_pair = key_type.generate()?;
    // Reconstruct the rcgen `Certificate` handle for the root from its PEM,
    // the same way the teacher's `CertManager::new` reloads a CA from disk.
    let root_params = CertificateParams::from_ca_cert_pem(&root_cert.pem)?;
    let root_ca = root_params.self_signed(root_signer)?;
    let cert = params.signed_by(&key_pair, &root_ca, root_signer)?;
    Ok((Cert::from_der(cert.der().to_vec()), key_pair))
}

/// Verify that `cert`'s public key matches `signer`'s, across RSA, ECDSA and
/// Ed25519 families (spec §4.1, `MismatchedKey`).
pub fn verify_keys_match(cert: &Cert, signer: &KeyPair) -> Result<(), Error> {
    let info = cert.info()?;
    if info.spki_der == signer.public_key_der() {
        Ok(())
    } else {
        Err(Error::MismatchedKey)
    }
}

pub fn pem_encode_cert(der: &[u8]) -> String {
    pem_encode_block("CERTIFICATE", der)
}

/// Minimal PEM (RFC 7468) writer: base64 the body, wrap at 64 columns,
/// bracket with the named `BEGIN`/`END` markers. `rustls-pemfile` only reads
/// PEM, so encoding is hand-rolled rather than adding a second PEM crate.
fn pem_encode_block(label: &str, der: &[u8]) -> String {
    use base64::Engine;
    let body = base64::engine::general_purpose::STANDARD.encode(der);
    let mut out = String::with_capacity(body.len() + body.len() / 64 + 64);
    out.push_str("-----BEGIN ");
    out.push_str(label);
    out.push_str("-----\n");
    for chunk in body.as_bytes().chunks(64) {
        out.push_str(std::str::from_utf8(chunk).expect("base64 output is ascii"));
        out.push('\n');
    }
    out.push_str("-----END ");
    out.push_str(label);
    out.push_str("-----\n");
    out
}

/// Decode a single PEM certificate block into DER.
pub fn pem_decode_cert(pem: &str) -> Result<Vec<u8>, Error> {
    let mut reader = std::io::BufReader::new(Cursor::new(pem.as_bytes()));
    match rustls_pemfile::read_one(&mut reader).map_err(|e| Error::MalformedPem(e.to_string()))? {
        Some(Item::X509Certificate(der)) => Ok(der.to_vec()),
        Some(_) => Err(Error::UnsupportedFormat),
        None => Err(Error::MalformedPem("empty PEM".into())),
    }
}

/// Decode every concatenated `CERTIFICATE` block in `pem` into DER, in order
/// (used for the intermediate+root chain response, spec §4.5/§4.7).
pub fn pem_decode_chain(pem: &str) -> Result<Vec<Vec<u8>>, Error> {
    let mut reader = std::io::BufReader::new(Cursor::new(pem.as_bytes()));
    let items: Result<Vec<_>, _> = rustls_pemfile::read_all(&mut reader).collect();
    items
        .map_err(|e| Error::MalformedPem(e.to_string()))?
        .into_iter()
        .filter_map(|item| match item {
            Item::X509Certificate(der) => Some(Ok(der.to_vec())),
            _ => None,
        })
        .collect()
}

/// Encode a chain of DER certificates as concatenated PEM blocks, in the
/// order given (e.g. leaf, intermediate[, root]).
pub fn pem_encode_chain<'a>(ders: impl IntoIterator<Item = &'a [u8]>) -> String {
    let mut out = String::new();
    for der in ders {
        out.push_str(&pem_encode_cert(der));
    }
    out
}

/// Decode a private key in PKCS#1, PKCS#8 or SEC1 form.
pub fn pem_decode_key(pem: &str) -> Result<KeyPair, Error> {
    KeyPair::from_pem(pem).map_err(|_| Error::UnknownKeyType)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_self_signed_ca() {
        let (cert, _key) = generate_root("Test Root", Duration::days(3650), KeyType::EcdsaP256).unwrap();
        let info = cert.info().unwrap();
        assert!(info.is_ca);
        assert_eq!(info.subject, info.issuer);
    }

    #[test]
    fn intermediate_chains_to_root_and_keys_match() {
        let (root_cert, root_key) =
            generate_root("Test Root", Duration::days(3650), KeyType::EcdsaP256).unwrap();
        let (inter_cert, inter_key) = generate_intermediate(
            "Test Intermediate",
            &root_cert,
            &root_key,
            Duration::days(7),
            KeyType::EcdsaP256,
        )
        .unwrap();

        let root_info = root_cert.info().unwrap();
        let inter_info = inter_cert.info().unwrap();
        assert_eq!(inter_info.issuer, root_info.subject);
        assert!(inter_info.not_after <= root_info.not_after);
        verify_keys_match(&inter_cert, &inter_key).unwrap();

        let (unrelated_cert, _unrelated_key) =
            generate_root("Unrelated", Duration::days(1), KeyType::EcdsaP256).unwrap();
        let _ = unrelated_cert; // silence unused in case of refactors
        let (_other_cert, other_key) =
            generate_root("Other", Duration::days(1), KeyType::EcdsaP256).unwrap();
        assert!(verify_keys_match(&inter_cert, &other_key).is_err());
    }

    #[test]
    fn pem_round_trip() {
        let (cert, _key) = generate_root("Round Trip", Duration::days(1), KeyType::EcdsaP256).unwrap();
        let der = pem_decode_cert(&cert.pem).unwrap();
        assert_eq!(der, cert.der);
    }

    #[test]
    fn chain_round_trip_preserves_order() {
        let (root, _rk) = generate_root("R", Duration::days(1), KeyType::EcdsaP256).unwrap();
        let (leaf, _lk) = generate_root("L", Duration::days(1), KeyType::EcdsaP256).unwrap();
        let pem = pem_encode_chain([leaf.der.as_slice(), root.der.as_slice()]);
        let decoded = pem_decode_chain(&pem).unwrap();
        assert_eq!(decoded, vec![leaf.der.clone(), root.der.clone()]);
    }
}
