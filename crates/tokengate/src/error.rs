//! Error types for token verification.
//!
//! Every failure mode of the pipeline is a variant of [`VerifyError`].
//! The five claim-validation variants (`Expired`, `NotBefore`,
//! `InvalidIssuer`, `InvalidAudience`, `InvalidClaim`) are the only ones
//! that may carry the decomposed token; it is attached exclusively after
//! signature verification has succeeded, and only when the verifier was
//! configured with `include_raw_jwt_in_errors`.

use thiserror::Error;

use crate::jwt::DecomposedJwt;

/// Verification and configuration errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]` — new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
///
/// The enum is `Clone` so that callers sharing a single in-flight JWKS
/// fetch can each observe the same failure.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum VerifyError {
    /// Invalid or missing verifier configuration.
    #[error("Invalid verifier configuration: {0}")]
    ParameterValidation(String),

    /// Malformed JWT - cannot be decomposed.
    #[error("Invalid token format: {0}")]
    JwtParse(String),

    /// A JWKS document failed structural validation.
    #[error("Invalid JWKS: {0}")]
    JwksValidation(String),

    /// A single JWK failed structural validation.
    #[error("Invalid JWK: {0}")]
    JwkValidation(String),

    /// The token header has no usable `kid`.
    #[error("Token header does not contain a valid kid claim")]
    WithoutValidKid,

    /// No key with the token's `kid` exists in the (refreshed) JWKS.
    #[error("Key with kid {kid} not found in the JWKS")]
    KidNotFound {
        /// Key ID that was not found.
        kid: String,
    },

    /// The JWKS for this URI has not been cached yet.
    #[error("No JWKS cached for {uri}")]
    JwksNotInCache {
        /// JWKS URI that has no cached entry.
        uri: String,
    },

    /// A recent lookup for this URI failed and its back-off period has not
    /// elapsed.
    #[error("Wait period for {uri} not yet ended after a failed key lookup")]
    WaitPeriodNotYetEnded {
        /// JWKS URI that is in the penalty box.
        uri: String,
    },

    /// Signature verification failed. Also covers algorithm and JWK-family
    /// mismatches; cryptographic library details are never exposed.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// The token has expired (`exp` plus grace is in the past).
    #[error("Token expired: {message}")]
    Expired {
        /// Human-readable description including the `exp` value.
        message: String,
        /// Decomposed token, attached only after signature verification.
        raw_jwt: Option<Box<DecomposedJwt>>,
    },

    /// The token is not yet valid (`nbf` minus grace is in the future).
    #[error("Token not yet valid: {message}")]
    NotBefore {
        /// Human-readable description including the `nbf` value.
        message: String,
        /// Decomposed token, attached only after signature verification.
        raw_jwt: Option<Box<DecomposedJwt>>,
    },

    /// The `iss` claim does not match any configured issuer.
    #[error("Invalid issuer: {message}")]
    InvalidIssuer {
        /// Human-readable description of the mismatch.
        message: String,
        /// Decomposed token, attached only after signature verification.
        raw_jwt: Option<Box<DecomposedJwt>>,
    },

    /// The `aud` claim does not match the configured audience.
    #[error("Invalid audience: {message}")]
    InvalidAudience {
        /// Human-readable description of the mismatch.
        message: String,
        /// Decomposed token, attached only after signature verification.
        raw_jwt: Option<Box<DecomposedJwt>>,
    },

    /// A claim other than the ones above failed validation.
    #[error("Invalid claim: {message}")]
    InvalidClaim {
        /// Human-readable description of the failing claim.
        message: String,
        /// Decomposed token, attached only after signature verification.
        raw_jwt: Option<Box<DecomposedJwt>>,
    },

    /// The JWKS endpoint could not be fetched. Kept distinct from the
    /// validation errors so the cache layer never caches a failure.
    #[error("Failed to fetch JWKS from {uri}: {message}")]
    Fetch {
        /// JWKS URI that failed to fetch.
        uri: String,
        /// Transport-level failure description.
        message: String,
    },
}

impl VerifyError {
    /// Shorthand for a [`VerifyError::JwtParse`].
    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Self::JwtParse(message.into())
    }

    /// Shorthand for a [`VerifyError::InvalidSignature`].
    pub(crate) fn signature(message: impl Into<String>) -> Self {
        Self::InvalidSignature(message.into())
    }

    /// Shorthand for a [`VerifyError::Expired`] without an attached token.
    pub(crate) fn expired(message: impl Into<String>) -> Self {
        Self::Expired { message: message.into(), raw_jwt: None }
    }

    /// Shorthand for a [`VerifyError::NotBefore`] without an attached token.
    pub(crate) fn not_before(message: impl Into<String>) -> Self {
        Self::NotBefore { message: message.into(), raw_jwt: None }
    }

    /// Shorthand for a [`VerifyError::InvalidIssuer`] without an attached token.
    pub(crate) fn invalid_issuer(message: impl Into<String>) -> Self {
        Self::InvalidIssuer { message: message.into(), raw_jwt: None }
    }

    /// Shorthand for a [`VerifyError::InvalidAudience`] without an attached token.
    pub(crate) fn invalid_audience(message: impl Into<String>) -> Self {
        Self::InvalidAudience { message: message.into(), raw_jwt: None }
    }

    /// Shorthand for a [`VerifyError::InvalidClaim`] without an attached token.
    pub(crate) fn invalid_claim(message: impl Into<String>) -> Self {
        Self::InvalidClaim { message: message.into(), raw_jwt: None }
    }

    /// Shorthand for a [`VerifyError::Fetch`].
    pub(crate) fn fetch(uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch { uri: uri.into(), message: message.into() }
    }

    /// Whether this error is a claim-validation failure.
    ///
    /// Only claim errors may carry the decomposed token.
    #[must_use]
    pub fn is_claim_error(&self) -> bool {
        matches!(
            self,
            Self::Expired { .. }
                | Self::NotBefore { .. }
                | Self::InvalidIssuer { .. }
                | Self::InvalidAudience { .. }
                | Self::InvalidClaim { .. }
        )
    }

    /// Attach the decomposed token to a claim error.
    ///
    /// Non-claim errors are returned unchanged: a signature failure never
    /// carries token content.
    pub(crate) fn with_raw_jwt(self, jwt: &DecomposedJwt) -> Self {
        let attached = Some(Box::new(jwt.clone()));
        match self {
            Self::Expired { message, .. } => Self::Expired { message, raw_jwt: attached },
            Self::NotBefore { message, .. } => Self::NotBefore { message, raw_jwt: attached },
            Self::InvalidIssuer { message, .. } => {
                Self::InvalidIssuer { message, raw_jwt: attached }
            },
            Self::InvalidAudience { message, .. } => {
                Self::InvalidAudience { message, raw_jwt: attached }
            },
            Self::InvalidClaim { message, .. } => Self::InvalidClaim { message, raw_jwt: attached },
            other => other,
        }
    }

    /// The decomposed token attached to this error, if any.
    #[must_use]
    pub fn raw_jwt(&self) -> Option<&DecomposedJwt> {
        match self {
            Self::Expired { raw_jwt, .. }
            | Self::NotBefore { raw_jwt, .. }
            | Self::InvalidIssuer { raw_jwt, .. }
            | Self::InvalidAudience { raw_jwt, .. }
            | Self::InvalidClaim { raw_jwt, .. } => raw_jwt.as_deref(),
            _ => None,
        }
    }
}

/// Result type alias for verification operations.
pub type Result<T> = std::result::Result<T, VerifyError>;
