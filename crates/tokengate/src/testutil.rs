//! Shared test utilities: key pair generation, token minting, an
//! in-memory JWKS fetcher, and a fixed clock.
//!
//! Feature-gated behind `testutil` to keep key generation out of
//! production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! tokengate = { path = ".", features = ["testutil"] }
//! ```

use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use p256::{ecdsa::signature::Signer as _, elliptic_curve::sec1::ToEncodedPoint};
use parking_lot::Mutex;
use rand_core::OsRng;
use rsa::{
    RsaPrivateKey,
    pkcs1v15::SigningKey as RsaSigningKey,
    signature::{SignatureEncoding, Signer as _},
    traits::PublicKeyParts,
};
use sha2::Sha256;

use crate::{
    clock::Clock,
    error::{Result, VerifyError},
    fetch::JwksFetcher,
    jwk::{Jwk, Jwks},
};

/// Generate an RSA-2048 key pair and its public JWK.
///
/// RSA key generation is slow in debug builds; generate once per test and
/// reuse where possible.
///
/// # Panics
///
/// Panics if key generation fails (out of entropy).
#[must_use]
pub fn generate_rsa_keypair(kid: &str) -> (RsaPrivateKey, Jwk) {
    let private_key = RsaPrivateKey::new(&mut OsRng, 2048).expect("RSA key generation");
    let public_key = private_key.to_public_key();
    let jwk = Jwk {
        kty: "RSA".into(),
        use_: Some("sig".into()),
        alg: None,
        kid: Some(kid.to_owned()),
        n: Some(URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be())),
        e: Some(URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be())),
        crv: None,
        x: None,
        y: None,
        extra: serde_json::Map::new(),
    };
    (private_key, jwk)
}

/// Generate a P-256 key pair and its public JWK.
#[must_use]
pub fn generate_es256_keypair(kid: &str) -> (p256::ecdsa::SigningKey, Jwk) {
    let signing_key = p256::ecdsa::SigningKey::random(&mut OsRng);
    let point = signing_key.verifying_key().to_encoded_point(false);
    let jwk = Jwk {
        kty: "EC".into(),
        use_: Some("sig".into()),
        alg: None,
        kid: Some(kid.to_owned()),
        n: None,
        e: None,
        crv: Some("P-256".into()),
        x: point.x().map(|x| URL_SAFE_NO_PAD.encode(x)),
        y: point.y().map(|y| URL_SAFE_NO_PAD.encode(y)),
        extra: serde_json::Map::new(),
    };
    (signing_key, jwk)
}

/// Generate an Ed25519 key pair and its public JWK.
#[must_use]
pub fn generate_ed25519_keypair(kid: &str) -> (ed25519_dalek::SigningKey, Jwk) {
    let signing_key = ed25519_dalek::SigningKey::generate(&mut OsRng);
    let jwk = Jwk {
        kty: "OKP".into(),
        use_: Some("sig".into()),
        alg: None,
        kid: Some(kid.to_owned()),
        n: None,
        e: None,
        crv: Some("Ed25519".into()),
        x: Some(URL_SAFE_NO_PAD.encode(signing_key.verifying_key().to_bytes())),
        y: None,
        extra: serde_json::Map::new(),
    };
    (signing_key, jwk)
}

fn compact(header: &serde_json::Value, payload: &serde_json::Value) -> String {
    let header_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(header).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).expect("payload json"));
    format!("{header_b64}.{payload_b64}")
}

/// Mint an RS256-signed token over the given header and payload JSON.
///
/// # Panics
///
/// Panics if serialization fails.
#[must_use]
pub fn sign_rs256(
    key: &RsaPrivateKey,
    header: &serde_json::Value,
    payload: &serde_json::Value,
) -> String {
    let message = compact(header, payload);
    let signing_key = RsaSigningKey::<Sha256>::new(key.clone());
    let signature = signing_key.sign(message.as_bytes());
    format!("{message}.{}", URL_SAFE_NO_PAD.encode(signature.to_vec()))
}

/// Mint an ES256-signed token (raw `r ‖ s` signature form).
///
/// # Panics
///
/// Panics if serialization fails.
#[must_use]
pub fn sign_es256(
    key: &p256::ecdsa::SigningKey,
    header: &serde_json::Value,
    payload: &serde_json::Value,
) -> String {
    let message = compact(header, payload);
    let signature: p256::ecdsa::Signature = key.sign(message.as_bytes());
    format!("{message}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()))
}

/// Mint an EdDSA(Ed25519)-signed token.
///
/// # Panics
///
/// Panics if serialization fails.
#[must_use]
pub fn sign_eddsa(
    key: &ed25519_dalek::SigningKey,
    header: &serde_json::Value,
    payload: &serde_json::Value,
) -> String {
    use ed25519_dalek::Signer as _;
    let message = compact(header, payload);
    let signature = key.sign(message.as_bytes());
    format!("{message}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()))
}

/// Build a compact token from arbitrary header and payload JSON with a
/// junk signature. Useful for testing rejection of malformed or attack
/// tokens (`alg: "none"`, algorithm confusion).
///
/// # Panics
///
/// Panics if serialization fails.
#[must_use]
pub fn craft_raw_jwt(header: &serde_json::Value, payload: &serde_json::Value) -> String {
    format!("{}.{}", compact(header, payload), URL_SAFE_NO_PAD.encode(b"junk-signature"))
}

/// Assemble a JWKS from public keys.
#[must_use]
pub fn jwks_of(keys: &[Jwk]) -> Jwks {
    Jwks { keys: keys.to_vec(), extra: serde_json::Map::new() }
}

/// In-memory [`JwksFetcher`] with programmable responses and a call
/// counter.
#[derive(Default)]
pub struct MockJwksFetcher {
    responses: Mutex<HashMap<String, std::result::Result<Vec<u8>, String>>>,
    calls: AtomicUsize,
}

impl MockJwksFetcher {
    /// An empty fetcher; every fetch fails until a response is set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve this JWKS for `uri`.
    pub fn set_jwks(&self, uri: &str, jwks: &Jwks) {
        let body = serde_json::to_vec(jwks).expect("jwks json");
        self.responses.lock().insert(uri.to_owned(), Ok(body));
    }

    /// Fail fetches of `uri` with a transport error.
    pub fn set_failure(&self, uri: &str, message: &str) {
        self.responses.lock().insert(uri.to_owned(), Err(message.to_owned()));
    }

    /// Number of fetches performed.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JwksFetcher for MockJwksFetcher {
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().get(uri) {
            Some(Ok(body)) => Ok(body.clone()),
            Some(Err(message)) => Err(VerifyError::fetch(uri, message.clone())),
            None => Err(VerifyError::fetch(uri, "no response configured")),
        }
    }
}

/// A [`Clock`] pinned to a fixed instant.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_seconds(&self) -> i64 {
        self.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keypairs_are_unique() {
        let (_, a) = generate_es256_keypair("a");
        let (_, b) = generate_es256_keypair("b");
        assert_ne!(a.x, b.x);
    }

    #[test]
    fn test_signed_token_has_three_parts() {
        let (key, _) = generate_es256_keypair("k1");
        let token = sign_es256(
            &key,
            &serde_json::json!({"alg": "ES256", "kid": "k1"}),
            &serde_json::json!({"iss": "https://issuer.example"}),
        );
        assert_eq!(token.split('.').count(), 3);
    }

    #[tokio::test]
    async fn test_mock_fetcher_counts_calls() {
        let fetcher = MockJwksFetcher::new();
        let (_, jwk) = generate_es256_keypair("k1");
        fetcher.set_jwks("https://a/jwks.json", &jwks_of(std::slice::from_ref(&jwk)));

        assert!(fetcher.fetch("https://a/jwks.json").await.is_ok());
        assert!(fetcher.fetch("https://unknown/jwks.json").await.is_err());
        assert_eq!(fetcher.calls(), 2);
    }
}
