//! JWS Flattened JSON verification and JWK thumbprints (RFC 7638), the
//! low-level crypto the ACME server core needs beyond certificate signing
//! (spec §4.7 "All requests are JWS-protected"). Built directly on `ring`
//! rather than a JOSE crate, since the pack has no dependency that speaks
//! ACME's flattened-JWS shape.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::signature::{self, UnparsedPublicKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kty")]
pub enum Jwk {
    #[serde(rename = "EC")]
    Ec { crv: String, x: String, y: String },
    #[serde(rename = "OKP")]
    Okp { crv: String, x: String },
    #[serde(rename = "RSA")]
    Rsa { n: String, e: String },
}

#[derive(Debug)]
pub enum JoseError {
    Malformed(String),
    BadSignature,
    UnsupportedAlg(String),
}

impl Jwk {
    /// RFC 7638 thumbprint: SHA-256 over the canonical JSON of only the
    /// required members, lexicographically ordered by key name.
    pub fn thumbprint(&self) -> String {
        let canonical = match self {
            Jwk::Ec { crv, x, y } => {
                format!(r#"{{"crv":"{crv}","kty":"EC","x":"{x}","y":"{y}"}}"#)
            }
            Jwk::Okp { crv, x } => format!(r#"{{"crv":"{crv}","kty":"OKP","x":"{x}"}}"#),
            Jwk::Rsa { n, e } => format!(r#"{{"e":"{e}","kty":"RSA","n":"{n}"}}"#),
        };
        let digest = ring::digest::digest(&ring::digest::SHA256, canonical.as_bytes());
        URL_SAFE_NO_PAD.encode(digest.as_ref())
    }

    fn verify(&self, alg: &str, msg: &[u8], sig: &[u8]) -> Result<(), JoseError> {
        if alg == "RS256" {
            let Jwk::Rsa { n, e } = self else {
                return Err(JoseError::Malformed("alg/jwk mismatch".into()));
            };
            let public_key_der = rsa_public_key_der(&decode_b64url(n)?, &decode_b64url(e)?);
            return UnparsedPublicKey::new(&signature::RSA_PKCS1_2048_8192_SHA256, &public_key_der)
                .verify(msg, sig)
                .map_err(|_| JoseError::BadSignature);
        }

        let (expected_crv, verify_alg): (&str, &dyn signature::VerificationAlgorithm) = match alg
        {
            "ES256" => ("P-256", &signature::ECDSA_P256_SHA256_FIXED),
            "ES384" => ("P-384", &signature::ECDSA_P384_SHA384_FIXED),
            "EdDSA" => ("Ed25519", &signature::ED25519),
            other => return Err(JoseError::UnsupportedAlg(other.to_string())),
        };

        let public_key_bytes = match self {
            Jwk::Ec { crv, x, y } if crv == expected_crv => {
                let mut point = vec![0x04u8];
                point.extend(decode_b64url(x)?);
                point.extend(decode_b64url(y)?);
                point
            }
            Jwk::Okp { crv, x } if crv == expected_crv => decode_b64url(x)?,
            _ => return Err(JoseError::Malformed("alg/jwk mismatch".into())),
        };

        UnparsedPublicKey::new(verify_alg, &public_key_bytes)
            .verify(msg, sig)
            .map_err(|_| JoseError::BadSignature)
    }
}

/// DER-encode `SEQUENCE { INTEGER modulus, INTEGER exponent }`, the
/// `RSAPublicKey` form `ring`'s RSA verification algorithms expect, not the
/// `SubjectPublicKeyInfo` wrapper. JWK `n`/`e` arrive as unsigned
/// big-endian magnitudes with no leading zero byte, so a high bit in the
/// leading byte needs one prepended to keep the DER INTEGER non-negative.
fn rsa_public_key_der(n: &[u8], e: &[u8]) -> Vec<u8> {
    fn der_integer(bytes: &[u8]) -> Vec<u8> {
        let mut value = bytes.to_vec();
        if value.first().is_some_and(|b| *b & 0x80 != 0) {
            value.insert(0, 0x00);
        }
        let mut out = vec![0x02u8];
        push_der_len(&mut out, value.len());
        out.extend(value);
        out
    }
    fn push_der_len(out: &mut Vec<u8>, len: usize) {
        if len < 0x80 {
            out.push(len as u8);
        } else {
            let len_bytes = len.to_be_bytes();
            let significant = &len_bytes[len_bytes.iter().position(|b| *b != 0).unwrap_or(len_bytes.len() - 1)..];
            out.push(0x80 | significant.len() as u8);
            out.extend_from_slice(significant);
        }
    }

    let modulus = der_integer(n);
    let exponent = der_integer(e);
    let mut body = Vec::with_capacity(modulus.len() + exponent.len());
    body.extend(modulus);
    body.extend(exponent);

    let mut out = vec![0x30u8];
    push_der_len(&mut out, body.len());
    out.extend(body);
    out
}

fn decode_b64url(s: &str) -> Result<Vec<u8>, JoseError> {
    URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|e| JoseError::Malformed(format!("invalid base64url: {e}")))
}

#[derive(Debug, Deserialize)]
pub struct FlattenedJws {
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub struct ProtectedHeader {
    pub alg: String,
    pub nonce: String,
    pub url: String,
    #[serde(default)]
    pub jwk: Option<Jwk>,
    #[serde(default)]
    pub kid: Option<String>,
}

pub struct VerifiedRequest {
    pub protected: ProtectedHeader,
    pub payload: Vec<u8>,
    pub jwk: Jwk,
}

/// Decode and parse the protected header without verifying anything,
/// callers need this up front to consume the nonce before the signature
/// check runs, since a replayed nonce must be rejected even on a request
/// whose signature turns out to be invalid.
pub fn decode_protected_header(jws: &FlattenedJws) -> Result<ProtectedHeader, JoseError> {
    let header_json = decode_b64url(&jws.protected)?;
    serde_json::from_slice(&header_json)
        .map_err(|e| JoseError::Malformed(format!("invalid protected header: {e}")))
}

/// Verify a flattened JWS against `expected_url`, resolving `kid` requests
/// to a JWK via `lookup_kid` (spec §4.7: "exactly one of jwk/kid", "url
/// header matches the request URL", "signature verifies").
pub fn verify(
    jws: &FlattenedJws,
    expected_url: &str,
    lookup_kid: impl FnOnce(&str) -> Option<Jwk>,
) -> Result<VerifiedRequest, JoseError> {
    let protected = decode_protected_header(jws)?;

    if protected.url != expected_url {
        return Err(JoseError::Malformed("url header mismatch".into()));
    }

    let jwk = match (&protected.jwk, &protected.kid) {
        (Some(jwk), None) => jwk.clone(),
        (None, Some(kid)) => {
            lookup_kid(kid).ok_or_else(|| JoseError::Malformed("unknown kid".into()))?
        }
        _ => return Err(JoseError::Malformed("exactly one of jwk/kid required".into())),
    };

    let signing_input = format!("{}.{}", jws.protected, jws.payload);
    let signature_bytes = decode_b64url(&jws.signature)?;
    jwk.verify(&protected.alg, signing_input.as_bytes(), &signature_bytes)?;

    let payload = decode_b64url(&jws.payload)?;
    Ok(VerifiedRequest {
        protected,
        payload,
        jwk,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::SystemRandom;
    use ring::signature::{EcdsaKeyPair, KeyPair};

    fn p256_jwk_and_keypair() -> (Jwk, EcdsaKeyPair) {
        let rng = SystemRandom::new();
        let pkcs8 =
            EcdsaKeyPair::generate_pkcs8(&signature::ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
                .unwrap();
        let keypair = EcdsaKeyPair::from_pkcs8(
            &signature::ECDSA_P256_SHA256_FIXED_SIGNING,
            pkcs8.as_ref(),
            &rng,
        )
        .unwrap();
        let point = keypair.public_key().as_ref();
        // Uncompressed SEC1 point: 0x04 || X(32) || Y(32).
        let x = URL_SAFE_NO_PAD.encode(&point[1..33]);
        let y = URL_SAFE_NO_PAD.encode(&point[33..65]);
        (
            Jwk::Ec {
                crv: "P-256".to_string(),
                x,
                y,
            },
            keypair,
        )
    }

    #[test]
    fn verifies_a_well_formed_es256_jws() {
        let (jwk, keypair) = p256_jwk_and_keypair();
        let protected = serde_json::json!({
            "alg": "ES256",
            "nonce": "abc123",
            "url": "https://example.test/acme/new-account",
            "jwk": jwk,
        });
        let protected_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&protected).unwrap());
        let payload_b64 = URL_SAFE_NO_PAD.encode(b"{}");
        let signing_input = format!("{protected_b64}.{payload_b64}");
        let rng = SystemRandom::new();
        let sig = keypair.sign(&rng, signing_input.as_bytes()).unwrap();
        let jws = FlattenedJws {
            protected: protected_b64,
            payload: payload_b64,
            signature: URL_SAFE_NO_PAD.encode(sig.as_ref()),
        };

        let verified =
            verify(&jws, "https://example.test/acme/new-account", |_| None).unwrap();
        assert_eq!(verified.protected.nonce, "abc123");
        assert_eq!(verified.payload, b"{}");
    }

    #[test]
    fn rejects_url_mismatch() {
        let (jwk, keypair) = p256_jwk_and_keypair();
        let protected = serde_json::json!({
            "alg": "ES256",
            "nonce": "abc123",
            "url": "https://example.test/acme/new-account",
            "jwk": jwk,
        });
        let protected_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&protected).unwrap());
        let payload_b64 = URL_SAFE_NO_PAD.encode(b"{}");
        let signing_input = format!("{protected_b64}.{payload_b64}");
        let rng = SystemRandom::new();
        let sig = keypair.sign(&rng, signing_input.as_bytes()).unwrap();
        let jws = FlattenedJws {
            protected: protected_b64,
            payload: payload_b64,
            signature: URL_SAFE_NO_PAD.encode(sig.as_ref()),
        };

        let err = verify(&jws, "https://example.test/acme/new-order", |_| None).unwrap_err();
        assert!(matches!(err, JoseError::Malformed(_)));
    }

    #[test]
    fn thumbprint_is_stable_for_same_key() {
        let (jwk, _keypair) = p256_jwk_and_keypair();
        assert_eq!(jwk.thumbprint(), jwk.thumbprint());
    }
}
