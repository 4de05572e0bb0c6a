//! Attack-vector tests: algorithm substitution and confusion, downgrade
//! attempts, payload tampering, signature stripping, key pinning, kid
//! flooding, and cross-implementation EdDSA verification.
#![allow(clippy::expect_used, clippy::panic)]

use std::sync::{Arc, OnceLock};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rsa::signature::{SignatureEncoding, Signer as _};
use serde_json::json;
use sha2::Sha512;
use tokengate::{
    ClaimCheck, IssuerConfig, Jwk, JwksCache, JwtVerifier, TimedPenaltyBox, VerifyError,
    testutil::{
        FixedClock, MockJwksFetcher, craft_raw_jwt, generate_ed25519_keypair,
        generate_es256_keypair, generate_rsa_keypair, jwks_of, sign_rs256,
    },
};

const NOW: i64 = 1_700_000_000;
const ISSUER: &str = "https://issuer.example";
const JWKS_URI: &str = "https://issuer.example/.well-known/jwks.json";

fn rsa_keypair() -> &'static (rsa::RsaPrivateKey, Jwk) {
    static KEYPAIR: OnceLock<(rsa::RsaPrivateKey, Jwk)> = OnceLock::new();
    KEYPAIR.get_or_init(|| generate_rsa_keypair("k1"))
}

fn verifier_over(keys: &[Jwk]) -> (JwtVerifier, Arc<MockJwksFetcher>) {
    let fetcher = Arc::new(MockJwksFetcher::new());
    fetcher.set_jwks(JWKS_URI, &jwks_of(keys));
    let cache = Arc::new(JwksCache::new(
        Arc::clone(&fetcher) as Arc<dyn tokengate::JwksFetcher>,
        Arc::new(TimedPenaltyBox::default()),
    ));
    let verifier = JwtVerifier::new(IssuerConfig {
        issuer: ISSUER.into(),
        audience: Some(ClaimCheck::eq("svc")),
        ..IssuerConfig::default()
    })
    .expect("verifier")
    .with_jwks_cache(cache)
    .with_clock(Arc::new(FixedClock(NOW)));
    (verifier, fetcher)
}

fn standard_claims() -> serde_json::Value {
    json!({"iss": ISSUER, "aud": "svc", "sub": "user-1", "exp": NOW + 3600})
}

// ===========================================================================
// Algorithm substitution: `alg: none` and symmetric downgrades
// ===========================================================================

#[tokio::test]
async fn alg_none_rejected() {
    let (_, jwk) = rsa_keypair().clone();
    let (verifier, _) = verifier_over(&[jwk]);

    let token = craft_raw_jwt(&json!({"alg": "none", "kid": "k1"}), &standard_claims());
    let result = verifier.verify(&token).await;
    assert!(
        matches!(&result, Err(VerifyError::InvalidSignature(msg)) if msg.contains("security")),
        "got {result:?}"
    );
}

#[tokio::test]
async fn symmetric_downgrade_rejected() {
    let (_, jwk) = rsa_keypair().clone();
    let (verifier, _) = verifier_over(&[jwk]);

    for alg in ["HS256", "HS384", "HS512"] {
        let token = craft_raw_jwt(&json!({"alg": alg, "kid": "k1"}), &standard_claims());
        let result = verifier.verify(&token).await;
        assert!(
            matches!(&result, Err(VerifyError::InvalidSignature(msg)) if msg.contains("security")),
            "expected security rejection for {alg}, got {result:?}"
        );
    }
}

// ===========================================================================
// Algorithm pinning: JWK alg wins over the token header
// ===========================================================================

#[tokio::test]
async fn jwk_pinned_algorithm_beats_header() {
    let (key, mut jwk) = rsa_keypair().clone();
    jwk.alg = Some("RS256".into());
    let (verifier, _) = verifier_over(&[jwk]);

    // A *correct* RS512 signature over the token, against a key pinned to
    // RS256: rejected without running the primitive.
    let header_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&json!({"alg": "RS512", "kid": "k1"})).unwrap());
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&standard_claims()).unwrap());
    let message = format!("{header_b64}.{payload_b64}");
    let signing_key = rsa::pkcs1v15::SigningKey::<Sha512>::new(key);
    let signature = signing_key.sign(message.as_bytes());
    let token = format!("{message}.{}", URL_SAFE_NO_PAD.encode(signature.to_vec()));

    let result = verifier.verify(&token).await;
    assert!(
        matches!(&result, Err(VerifyError::InvalidSignature(msg)) if msg.contains("does not match")),
        "got {result:?}"
    );
}

// ===========================================================================
// Algorithm confusion: EC header against an RSA key and vice versa
// ===========================================================================

#[tokio::test]
async fn family_confusion_rejected() {
    let (_, rsa_jwk) = rsa_keypair().clone();
    let (ec_key, _) = generate_es256_keypair("k1");
    let (verifier, _) = verifier_over(&[rsa_jwk]);

    // ES256-signed token whose kid resolves to an RSA key.
    let token = tokengate::testutil::sign_es256(
        &ec_key,
        &json!({"alg": "ES256", "kid": "k1"}),
        &standard_claims(),
    );
    let result = verifier.verify(&token).await;
    assert!(matches!(result, Err(VerifyError::InvalidSignature(_))), "got {result:?}");
}

// ===========================================================================
// Tampering
// ===========================================================================

#[tokio::test]
async fn tampered_payload_rejected() {
    let (key, jwk) = rsa_keypair().clone();
    let (verifier, _) = verifier_over(&[jwk]);

    let token = sign_rs256(&key, &json!({"alg": "RS256", "kid": "k1"}), &standard_claims());
    let mut parts = token.split('.');
    let (header, _payload, signature) = (
        parts.next().expect("header"),
        parts.next().expect("payload"),
        parts.next().expect("signature"),
    );

    // Swap in an elevated payload under the original signature.
    let mut claims = standard_claims();
    claims["sub"] = json!("admin");
    let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
    let forged = format!("{header}.{forged_payload}.{signature}");

    let result = verifier.verify(&forged).await;
    assert!(matches!(result, Err(VerifyError::InvalidSignature(_))), "got {result:?}");
}

#[tokio::test]
async fn stripped_signature_rejected() {
    let (key, jwk) = rsa_keypair().clone();
    let (verifier, _) = verifier_over(&[jwk]);

    let token = sign_rs256(&key, &json!({"alg": "RS256", "kid": "k1"}), &standard_claims());
    let stripped = token.rsplit_once('.').expect("compact form").0;

    // "header.payload" and "header.payload." are both structurally
    // invalid; neither reaches key lookup.
    let result = verifier.verify(stripped).await;
    assert!(matches!(result, Err(VerifyError::JwtParse(_))), "got {result:?}");
    let result = verifier.verify(&format!("{stripped}.")).await;
    assert!(matches!(result, Err(VerifyError::JwtParse(_))), "got {result:?}");
}

// ===========================================================================
// kid handling
// ===========================================================================

#[tokio::test]
async fn missing_kid_rejected() {
    let (key, jwk) = rsa_keypair().clone();
    let (verifier, _) = verifier_over(&[jwk]);

    let token = sign_rs256(&key, &json!({"alg": "RS256"}), &standard_claims());
    let result = verifier.verify(&token).await;
    assert!(matches!(result, Err(VerifyError::WithoutValidKid)), "got {result:?}");
}

#[tokio::test]
async fn kid_flood_bounded_by_penalty_box() {
    let (key, jwk) = rsa_keypair().clone();
    let (verifier, fetcher) = verifier_over(&[jwk]);

    // An attacker cycles through fabricated kids. Only the first miss may
    // fetch; the rest fail fast while the URI is boxed.
    for attempt in 0..20 {
        let token = sign_rs256(
            &key,
            &json!({"alg": "RS256", "kid": format!("forged-{attempt}")}),
            &standard_claims(),
        );
        let result = verifier.verify(&token).await;
        match attempt {
            0 => assert!(matches!(result, Err(VerifyError::KidNotFound { .. })), "got {result:?}"),
            _ => assert!(
                matches!(result, Err(VerifyError::WaitPeriodNotYetEnded { .. })),
                "attempt {attempt} got {result:?}"
            ),
        }
    }
    assert_eq!(fetcher.calls(), 1, "flood must be capped at one fetch per wait period");
}

#[tokio::test]
async fn duplicate_kid_first_match_wins() {
    // Two keys share a kid; the first entry is the wrong key, so a token
    // signed under the second must fail. First-match is the contract.
    let (key, right_jwk) = rsa_keypair().clone();
    let (_, mut wrong_jwk) = generate_es256_keypair("k1");
    wrong_jwk.kty = "RSA".into();
    wrong_jwk.crv = None;
    wrong_jwk.x = None;
    wrong_jwk.y = None;
    wrong_jwk.n = Some(URL_SAFE_NO_PAD.encode(b"not-the-right-modulus"));
    wrong_jwk.e = Some(URL_SAFE_NO_PAD.encode(b"\x01\x00\x01"));

    let (verifier, _) = verifier_over(&[wrong_jwk, right_jwk]);
    let token = sign_rs256(&key, &json!({"alg": "RS256", "kid": "k1"}), &standard_claims());
    let result = verifier.verify(&token).await;
    assert!(matches!(result, Err(VerifyError::InvalidSignature(_))), "got {result:?}");
}

// ===========================================================================
// Cross-implementation EdDSA: token minted by jsonwebtoken, verified here
// ===========================================================================

/// Wrap a raw Ed25519 private key in PKCS#8 DER for jsonwebtoken.
fn ed25519_pkcs8(signing_key: &ed25519_dalek::SigningKey) -> Vec<u8> {
    let mut pkcs8_der = vec![
        0x30, 0x2e, // SEQUENCE, 46 bytes
        0x02, 0x01, 0x00, // INTEGER version 0
        0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
        0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
        0x04, 0x22, // OCTET STRING, 34 bytes
        0x04, 0x20, // OCTET STRING, 32 bytes (the actual key)
    ];
    pkcs8_der.extend_from_slice(&signing_key.to_bytes());
    pkcs8_der
}

#[tokio::test]
async fn eddsa_token_from_independent_implementation() {
    let (signing_key, jwk) = generate_ed25519_keypair("ed1");
    let (verifier, _) = verifier_over(&[jwk]);

    let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::EdDSA);
    header.kid = Some("ed1".into());
    let encoding_key = jsonwebtoken::EncodingKey::from_ed_der(&ed25519_pkcs8(&signing_key));
    let token = jsonwebtoken::encode(&header, &standard_claims(), &encoding_key)
        .expect("encode test JWT");

    let payload = verifier.verify(&token).await.expect("verify");
    assert_eq!(payload.str_claim("sub"), Some("user-1"));
}
