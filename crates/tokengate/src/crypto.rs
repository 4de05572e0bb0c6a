//! Signature verification dispatch.
//!
//! Chooses a verifier from `(alg, kty, crv)`, converts the JWK into the
//! primitive's native key material, and runs the verification primitive
//! over `header_b64.payload_b64` and the raw signature bytes.
//!
//! # Security
//!
//! - `none` and the symmetric HS* algorithms are always rejected, before
//!   any other check (RFC 8725 §3.1).
//! - If the JWK pins an `alg`, the token header must use exactly that
//!   algorithm, even if the presented signature would verify under
//!   another one.
//! - Primitive failures surface uniformly as
//!   [`VerifyError::InvalidSignature`]; cryptographic library details
//!   never reach the error surface.

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rsa::{BigUint, Pkcs1v15Sign, Pss, RsaPublicKey};
use sha2::{Digest, Sha256, Sha384, Sha512};
use signature::Verifier;

use crate::{
    error::{Result, VerifyError},
    jwk::Jwk,
    jwt::DecomposedJwt,
};

/// Algorithms that are never accepted, whatever the configuration.
///
/// `none` means no signature at all; HS* are symmetric and have no place
/// in a public-key verification pipeline.
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// JWS signature algorithms this crate can verify.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JwtSignatureAlgorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256.
    Rs256,
    /// RSASSA-PKCS1-v1_5 with SHA-384.
    Rs384,
    /// RSASSA-PKCS1-v1_5 with SHA-512.
    Rs512,
    /// RSASSA-PSS with SHA-256 (MGF1-SHA-256, salt length 32).
    Ps256,
    /// RSASSA-PSS with SHA-384 (MGF1-SHA-384, salt length 48).
    Ps384,
    /// RSASSA-PSS with SHA-512 (MGF1-SHA-512, salt length 64).
    Ps512,
    /// ECDSA over P-256 with SHA-256.
    Es256,
    /// ECDSA over P-384 with SHA-384.
    Es384,
    /// ECDSA over P-521 with SHA-512.
    Es512,
    /// EdDSA over Ed25519 or Ed448.
    EdDsa,
}

/// Every supported algorithm; the default allowed set.
pub const ALL_ALGORITHMS: &[JwtSignatureAlgorithm] = &[
    JwtSignatureAlgorithm::Rs256,
    JwtSignatureAlgorithm::Rs384,
    JwtSignatureAlgorithm::Rs512,
    JwtSignatureAlgorithm::Ps256,
    JwtSignatureAlgorithm::Ps384,
    JwtSignatureAlgorithm::Ps512,
    JwtSignatureAlgorithm::Es256,
    JwtSignatureAlgorithm::Es384,
    JwtSignatureAlgorithm::Es512,
    JwtSignatureAlgorithm::EdDsa,
];

impl JwtSignatureAlgorithm {
    /// The JWS `alg` string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rs256 => "RS256",
            Self::Rs384 => "RS384",
            Self::Rs512 => "RS512",
            Self::Ps256 => "PS256",
            Self::Ps384 => "PS384",
            Self::Ps512 => "PS512",
            Self::Es256 => "ES256",
            Self::Es384 => "ES384",
            Self::Es512 => "ES512",
            Self::EdDsa => "EdDSA",
        }
    }

    /// Parse a JWS `alg` string. `None` for anything unsupported,
    /// including the forbidden algorithms.
    #[must_use]
    pub fn parse(alg: &str) -> Option<Self> {
        ALL_ALGORITHMS.iter().copied().find(|candidate| candidate.as_str() == alg)
    }

    /// The JWK key type this algorithm verifies with.
    #[must_use]
    pub fn key_type(self) -> &'static str {
        match self {
            Self::Rs256 | Self::Rs384 | Self::Rs512 | Self::Ps256 | Self::Ps384 | Self::Ps512 => {
                "RSA"
            },
            Self::Es256 | Self::Es384 | Self::Es512 => "EC",
            Self::EdDsa => "OKP",
        }
    }
}

impl fmt::Display for JwtSignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verify the token's signature against the given JWK.
///
/// `allowed` narrows the acceptable algorithms; `None` allows all of
/// [`ALL_ALGORITHMS`].
///
/// # Errors
///
/// - [`VerifyError::InvalidSignature`] on forbidden, unsupported, or
///   disallowed algorithms, JWK `alg` pinning mismatches, JWK-family
///   mismatches, malformed key material or signatures, and signature
///   mismatches.
/// - [`VerifyError::JwkValidation`] if the JWK declares a non-signature
///   `use` or lacks the family-specific required fields.
pub(crate) fn verify_token_signature(
    jwt: &DecomposedJwt,
    jwk: &Jwk,
    allowed: Option<&[JwtSignatureAlgorithm]>,
) -> Result<()> {
    let alg_str = jwt.header.alg.as_str();
    if FORBIDDEN_ALGORITHMS.contains(&alg_str) {
        return Err(VerifyError::signature(format!(
            "algorithm {alg_str:?} is not allowed for security reasons"
        )));
    }
    let Some(alg) = JwtSignatureAlgorithm::parse(alg_str) else {
        return Err(VerifyError::signature(format!("unsupported algorithm {alg_str:?}")));
    };
    if let Some(allowed) = allowed
        && !allowed.contains(&alg)
    {
        return Err(VerifyError::signature(format!(
            "algorithm {alg_str} is not in the set of allowed algorithms {allowed:?}"
        )));
    }

    // A JWK pinned to an algorithm only ever verifies that algorithm.
    if let Some(jwk_alg) = jwk.alg.as_deref()
        && !jwk_alg.is_empty()
        && jwk_alg != alg_str
    {
        return Err(VerifyError::signature(format!(
            "token algorithm {alg_str} does not match the JWK algorithm {jwk_alg}"
        )));
    }

    jwk.assert_signature_use()?;

    if jwk.kty != alg.key_type() {
        return Err(VerifyError::signature(format!(
            "algorithm {alg_str} requires kty {}, JWK has kty {:?}",
            alg.key_type(),
            jwk.kty
        )));
    }

    let message = jwt.signed_input();
    let message = message.as_bytes();
    let signature = jwt.signature.as_slice();

    match alg {
        JwtSignatureAlgorithm::Rs256
        | JwtSignatureAlgorithm::Rs384
        | JwtSignatureAlgorithm::Rs512
        | JwtSignatureAlgorithm::Ps256
        | JwtSignatureAlgorithm::Ps384
        | JwtSignatureAlgorithm::Ps512 => verify_rsa(alg, jwk, message, signature),
        JwtSignatureAlgorithm::Es256 | JwtSignatureAlgorithm::Es384
        | JwtSignatureAlgorithm::Es512 => verify_ecdsa(alg, jwk, message, signature),
        JwtSignatureAlgorithm::EdDsa => verify_eddsa(jwk, message, signature),
    }
}

/// The uniform failure for anything the primitives reject.
fn signature_invalid() -> VerifyError {
    VerifyError::signature("signature verification failed")
}

/// Decode a required base64url JWK field.
fn decode_field(jwk: &Jwk, field: &str, value: Option<&str>) -> Result<Vec<u8>> {
    let value = value.ok_or_else(|| {
        VerifyError::JwkValidation(format!("{} JWK is missing the {field} field", jwk.kty))
    })?;
    URL_SAFE_NO_PAD.decode(value).map_err(|_| {
        VerifyError::signature(format!("JWK field {field} is not valid base64url"))
    })
}

fn verify_rsa(
    alg: JwtSignatureAlgorithm,
    jwk: &Jwk,
    message: &[u8],
    signature: &[u8],
) -> Result<()> {
    let n = decode_field(jwk, "n", jwk.n.as_deref())?;
    let e = decode_field(jwk, "e", jwk.e.as_deref())?;
    let key = RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
        .map_err(|_| VerifyError::signature("invalid RSA public key"))?;

    let result = match alg {
        JwtSignatureAlgorithm::Rs256 => {
            key.verify(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(message), signature)
        },
        JwtSignatureAlgorithm::Rs384 => {
            key.verify(Pkcs1v15Sign::new::<Sha384>(), &Sha384::digest(message), signature)
        },
        JwtSignatureAlgorithm::Rs512 => {
            key.verify(Pkcs1v15Sign::new::<Sha512>(), &Sha512::digest(message), signature)
        },
        // PSS with MGF1 over the same hash and salt length equal to the
        // hash length, per RFC 7518 §3.5.
        JwtSignatureAlgorithm::Ps256 => {
            key.verify(Pss::new::<Sha256>(), &Sha256::digest(message), signature)
        },
        JwtSignatureAlgorithm::Ps384 => {
            key.verify(Pss::new::<Sha384>(), &Sha384::digest(message), signature)
        },
        JwtSignatureAlgorithm::Ps512 => {
            key.verify(Pss::new::<Sha512>(), &Sha512::digest(message), signature)
        },
        _ => return Err(signature_invalid()),
    };
    result.map_err(|_| signature_invalid())
}

/// Field element size in bytes per curve.
fn curve_field_len(alg: JwtSignatureAlgorithm) -> usize {
    match alg {
        JwtSignatureAlgorithm::Es256 => 32,
        JwtSignatureAlgorithm::Es384 => 48,
        _ => 66,
    }
}

/// Left-pad `bytes` with zeros to `len`. Values longer than `len` are
/// returned unchanged (and will fail downstream parsing).
fn left_pad(bytes: &[u8], len: usize) -> Vec<u8> {
    if bytes.len() >= len {
        return bytes.to_vec();
    }
    let mut padded = vec![0u8; len - bytes.len()];
    padded.extend_from_slice(bytes);
    padded
}

/// Normalize an ECDSA signature to raw `r ‖ s` of the curve's expected
/// length. Accepts the exact raw form, DER, and zero-left-padded short
/// variants. DER input is signalled by returning `None` so the caller can
/// use the curve's DER parser.
fn normalize_ecdsa_signature(signature: &[u8], expected_len: usize) -> Result<Option<Vec<u8>>> {
    if signature.len() == expected_len {
        return Ok(Some(signature.to_vec()));
    }
    if signature.first() == Some(&0x30) {
        return Ok(None);
    }
    if signature.len() < expected_len {
        return Ok(Some(left_pad(signature, expected_len)));
    }
    Err(VerifyError::signature(format!(
        "malformed ECDSA signature of {} bytes (expected {expected_len})",
        signature.len()
    )))
}

fn verify_ecdsa(
    alg: JwtSignatureAlgorithm,
    jwk: &Jwk,
    message: &[u8],
    signature: &[u8],
) -> Result<()> {
    let expected_crv = match alg {
        JwtSignatureAlgorithm::Es256 => "P-256",
        JwtSignatureAlgorithm::Es384 => "P-384",
        _ => "P-521",
    };
    let crv = jwk
        .crv
        .as_deref()
        .ok_or_else(|| VerifyError::JwkValidation("EC JWK is missing the crv field".into()))?;
    if crv != expected_crv {
        return Err(VerifyError::signature(format!(
            "algorithm {alg} requires curve {expected_crv}, JWK has crv {crv:?}"
        )));
    }

    let field_len = curve_field_len(alg);
    let x = decode_field(jwk, "x", jwk.x.as_deref())?;
    let y = decode_field(jwk, "y", jwk.y.as_deref())?;
    if x.len() > field_len || y.len() > field_len {
        return Err(VerifyError::signature("invalid EC public key coordinates"));
    }

    // Uncompressed SEC1 point: 0x04 ‖ x ‖ y, coordinates padded to the
    // field size.
    let mut point = Vec::with_capacity(1 + 2 * field_len);
    point.push(0x04);
    point.extend_from_slice(&left_pad(&x, field_len));
    point.extend_from_slice(&left_pad(&y, field_len));

    let raw = normalize_ecdsa_signature(signature, 2 * field_len)?;

    match alg {
        JwtSignatureAlgorithm::Es256 => {
            let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&point)
                .map_err(|_| signature_invalid())?;
            let sig = match raw {
                Some(raw) => p256::ecdsa::Signature::from_slice(&raw),
                None => p256::ecdsa::Signature::from_der(signature),
            }
            .map_err(|_| signature_invalid())?;
            key.verify(message, &sig).map_err(|_| signature_invalid())
        },
        JwtSignatureAlgorithm::Es384 => {
            let key = p384::ecdsa::VerifyingKey::from_sec1_bytes(&point)
                .map_err(|_| signature_invalid())?;
            let sig = match raw {
                Some(raw) => p384::ecdsa::Signature::from_slice(&raw),
                None => p384::ecdsa::Signature::from_der(signature),
            }
            .map_err(|_| signature_invalid())?;
            key.verify(message, &sig).map_err(|_| signature_invalid())
        },
        _ => {
            let key = p521::ecdsa::VerifyingKey::from_sec1_bytes(&point)
                .map_err(|_| signature_invalid())?;
            let sig = match raw {
                Some(raw) => p521::ecdsa::Signature::from_slice(&raw),
                None => p521::ecdsa::Signature::from_der(signature),
            }
            .map_err(|_| signature_invalid())?;
            key.verify(message, &sig).map_err(|_| signature_invalid())
        },
    }
}

fn verify_eddsa(jwk: &Jwk, message: &[u8], signature: &[u8]) -> Result<()> {
    let crv = jwk
        .crv
        .as_deref()
        .ok_or_else(|| VerifyError::JwkValidation("OKP JWK is missing the crv field".into()))?;
    let x = decode_field(jwk, "x", jwk.x.as_deref())?;

    match crv {
        "Ed25519" => {
            let key: [u8; 32] = x.as_slice().try_into().map_err(|_| signature_invalid())?;
            let key =
                ed25519_dalek::VerifyingKey::from_bytes(&key).map_err(|_| signature_invalid())?;
            let sig =
                ed25519_dalek::Signature::try_from(signature).map_err(|_| signature_invalid())?;
            key.verify(message, &sig).map_err(|_| signature_invalid())
        },
        "Ed448" => {
            let key: [u8; 57] = x.as_slice().try_into().map_err(|_| signature_invalid())?;
            let key =
                ed448_goldilocks::VerifyingKey::from_bytes(&key).map_err(|_| signature_invalid())?;
            let sig =
                ed448_goldilocks::Signature::try_from(signature).map_err(|_| signature_invalid())?;
            key.verify_raw(&sig, message).map_err(|_| signature_invalid())
        },
        other => Err(VerifyError::signature(format!(
            "unsupported OKP curve {other:?} (expected Ed25519 or Ed448)"
        ))),
    }
}
