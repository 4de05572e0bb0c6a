//! Fuzz target for JWT decomposition.
//!
//! Feeds both raw byte strings and structured JWT-like inputs through
//! [`tokengate::decompose`]. Every outcome must be `Ok(...)` or a typed
//! error — never a panic.

#![no_main]

use arbitrary::Arbitrary;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use libfuzzer_sys::fuzz_target;

/// Structured input assembled into a plausible three-part token, reaching
/// deeper paths than raw bytes alone.
#[derive(Debug, Arbitrary)]
struct FuzzedToken {
    /// Algorithm string for the header.
    alg: Option<String>,
    /// Optional key ID in the header.
    kid: Option<String>,
    /// Issuer claim.
    iss: String,
    /// Audience claim (string form).
    aud: String,
    /// Expiration timestamp.
    exp: Option<u64>,
    /// Signature bytes.
    signature: Vec<u8>,
    /// Raw bytes tried as a complete token as well.
    raw: Vec<u8>,
}

fn build_token(input: &FuzzedToken) -> String {
    let mut header = serde_json::Map::new();
    if let Some(ref alg) = input.alg {
        header.insert("alg".to_string(), serde_json::Value::String(alg.clone()));
    }
    if let Some(ref kid) = input.kid {
        header.insert("kid".to_string(), serde_json::Value::String(kid.clone()));
    }

    let mut payload = serde_json::Map::new();
    payload.insert("iss".to_string(), serde_json::Value::String(input.iss.clone()));
    payload.insert("aud".to_string(), serde_json::Value::String(input.aud.clone()));
    if let Some(exp) = input.exp {
        payload.insert("exp".to_string(), serde_json::Value::Number(exp.into()));
    }

    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap_or_default()),
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap_or_default()),
        URL_SAFE_NO_PAD.encode(&input.signature),
    )
}

fuzz_target!(|input: FuzzedToken| {
    // Structured: valid-ish compact serialization.
    let token = build_token(&input);
    if let Ok(jwt) = tokengate::decompose(&token) {
        // Accessors must be total on whatever decomposed.
        let _ = jwt.payload.audiences();
        let _ = jwt.payload.expiration();
        let _ = jwt.header.valid_kid();
        let _ = jwt.signed_input();
    }

    // Raw: arbitrary bytes as a token string.
    if let Ok(raw) = std::str::from_utf8(&input.raw) {
        let _ = tokengate::decompose(raw);
    }
});
