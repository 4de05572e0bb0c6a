//! JWK and JWKS models (RFC 7517) with structural validation.
//!
//! The parser is tolerant of unknown fields but strict about the types of
//! the fields it knows: every recognized JWK field value is a string.
//! Family-specific requirements (RSA `n`/`e`, EC `crv`/`x`/`y`, OKP
//! `crv`/`x`) are asserted by the signature dispatcher when a key is
//! actually used, so a set may contain keys this crate cannot verify with
//! without failing parsing outright.

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, VerifyError},
    jwt::JsonObject,
};

/// Key types this crate understands.
pub const SUPPORTED_KEY_TYPES: &[&str] = &["RSA", "EC", "OKP"];

/// A JSON Web Key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type: `RSA`, `EC`, or `OKP`.
    pub kty: String,
    /// Intended key use. When present it must be `sig`.
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>,
    /// Algorithm the key is pinned to, e.g. `RS256`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Key ID. Only keys with a non-empty `kid` are addressable by the
    /// cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// RSA modulus, base64url.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA public exponent, base64url.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// Curve name for EC (`P-256`, `P-384`, `P-521`) and OKP (`Ed25519`,
    /// `Ed448`) keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// EC x coordinate or OKP public key, base64url.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// EC y coordinate, base64url.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    /// Unrecognized fields, retained as-is.
    #[serde(flatten)]
    pub extra: JsonObject,
}

impl Jwk {
    /// Refine arbitrary parsed JSON into a [`Jwk`].
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::JwkValidation`] if the value is not an
    /// object, a recognized field has a non-string value, or `kty` is
    /// missing, empty, or unsupported.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let jwk: Self = serde_json::from_value(value)
            .map_err(|e| VerifyError::JwkValidation(format!("not a valid JWK: {e}")))?;
        jwk.validate()?;
        Ok(jwk)
    }

    /// Structural validation shared by [`Jwk::from_value`] and
    /// [`Jwks::parse`].
    pub(crate) fn validate(&self) -> Result<()> {
        if self.kty.is_empty() {
            return Err(VerifyError::JwkValidation("kty must not be empty".into()));
        }
        if !SUPPORTED_KEY_TYPES.contains(&self.kty.as_str()) {
            return Err(VerifyError::JwkValidation(format!(
                "unsupported kty {:?} (expected one of {SUPPORTED_KEY_TYPES:?})",
                self.kty
            )));
        }
        Ok(())
    }

    /// The `kid`, if present as a non-empty string.
    #[must_use]
    pub fn valid_kid(&self) -> Option<&str> {
        self.kid.as_deref().filter(|kid| !kid.is_empty())
    }

    /// Assert this key is usable for signature verification: when a `use`
    /// is declared it must be `sig`.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::JwkValidation`] on any other declared use.
    pub fn assert_signature_use(&self) -> Result<()> {
        match self.use_.as_deref() {
            None | Some("sig") => Ok(()),
            Some(other) => Err(VerifyError::JwkValidation(format!(
                "JWK use is {other:?}, expected \"sig\""
            ))),
        }
    }
}

/// A JSON Web Key Set: an ordered sequence of JWKs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys, in document order.
    pub keys: Vec<Jwk>,
    /// Unrecognized fields, retained as-is.
    #[serde(flatten)]
    pub extra: JsonObject,
}

impl Jwks {
    /// Parse and validate a JWKS document.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::JwksValidation`] if the bytes are not a JSON
    /// object with a `keys` array, or any entry fails [`Jwk`] structural
    /// validation.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let jwks: Self = serde_json::from_slice(bytes)
            .map_err(|e| VerifyError::JwksValidation(format!("not a valid JWKS: {e}")))?;
        for key in &jwks.keys {
            key.validate().map_err(|e| VerifyError::JwksValidation(e.to_string()))?;
        }
        Ok(jwks)
    }

    /// Look up a key by `kid`.
    ///
    /// `kid` collisions within a set are legal but ambiguous; the first
    /// match wins.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|key| key.valid_kid() == Some(kid))
    }
}

/// A [`Jwk`] guaranteed to carry a non-empty `kid`.
///
/// This is the only form the cache hands out: without a `kid` a key is not
/// addressable. The inner key is read-only and may be retained across
/// verification calls.
#[derive(Clone, Debug, PartialEq)]
pub struct JwkWithKid {
    jwk: Jwk,
}

impl JwkWithKid {
    /// Wrap a key, requiring a non-empty `kid`.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::JwkValidation`] if the key has no usable
    /// `kid`.
    pub fn new(jwk: Jwk) -> Result<Self> {
        if jwk.valid_kid().is_none() {
            return Err(VerifyError::JwkValidation("JWK has no usable kid".into()));
        }
        Ok(Self { jwk })
    }

    /// The key ID.
    #[must_use]
    pub fn kid(&self) -> &str {
        self.jwk.valid_kid().unwrap_or_default()
    }

    /// The wrapped key.
    #[must_use]
    pub fn jwk(&self) -> &Jwk {
        &self.jwk
    }
}

impl std::ops::Deref for JwkWithKid {
    type Target = Jwk;

    fn deref(&self) -> &Jwk {
        &self.jwk
    }
}
