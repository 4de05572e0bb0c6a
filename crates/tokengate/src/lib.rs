//! # tokengate
//!
//! Verification of JWTs issued by third-party identity providers — AWS
//! Cognito, AWS Application Load Balancer, and any issuer publishing a
//! JWKS over HTTPS.
//!
//! This crate provides:
//! - **Token decomposition**: compact-serialization parsing with typed
//!   header/payload views
//! - **JWKS acquisition**: cached, single-flight fetching with a
//!   penalty-box back-off against endpoint flooding
//! - **Signature verification**: RS/PS 256-512, ES256/384/512, and EdDSA
//!   (Ed25519/Ed448) dispatched from the JWK
//! - **Claim validation**: issuer, audience/client, ALB signer, `exp` and
//!   `nbf` with grace, Cognito `token_use`/`scope`, and a user hook
//!
//! Symmetric algorithms (HS256 and friends) and `none` are always
//! rejected. Token issuance, key storage, JWE, and revocation are out of
//! scope.
//!
//! ## Example
//!
//! ```no_run
//! use tokengate::{ClaimCheck, IssuerConfig, JwtVerifier};
//!
//! # async fn example() -> Result<(), tokengate::VerifyError> {
//! let verifier = JwtVerifier::new(IssuerConfig {
//!     issuer: "https://issuer.example".into(),
//!     audience: Some(ClaimCheck::eq("my-api")),
//!     ..IssuerConfig::default()
//! })?;
//!
//! let token = "eyJhbGciOiJSUzI1NiIsImtpZCI6ImsxIn0...";
//! let payload = verifier.verify(token).await?;
//! println!("verified subject: {:?}", payload.str_claim("sub"));
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// AWS Application Load Balancer verifier.
pub mod alb;
/// JWKS cache with single-flight fetching.
pub mod cache;
/// Claim expectations and the validation pipeline.
pub mod claims;
/// Wall-clock abstraction.
pub mod clock;
/// Amazon Cognito user pool verifier.
pub mod cognito;
/// Signature verification dispatch.
pub mod crypto;
/// Error types.
pub mod error;
/// JWKS document retrieval.
pub mod fetch;
/// JWK and JWKS models.
pub mod jwk;
/// JWT decomposition.
pub mod jwt;
/// Per-URI back-off gate.
pub mod penalty;
/// Test helpers (feature `testutil`).
#[cfg(feature = "testutil")]
pub mod testutil;
/// The verification pipeline and the generic verifier.
pub mod verifier;

// Re-export key types for convenience
pub use alb::{AlbConfig, AlbJwtVerifier};
pub use cache::{DEFAULT_JWKS_CACHE_CAPACITY, JwksCache};
pub use claims::{ClaimCheck, CustomCheckContext, CustomClaimCheck, TokenUse, TokenUseCheck};
pub use clock::{Clock, SystemClock};
pub use cognito::{CognitoConfig, CognitoJwtVerifier};
pub use crypto::{ALL_ALGORITHMS, FORBIDDEN_ALGORITHMS, JwtSignatureAlgorithm};
pub use error::{Result, VerifyError};
pub use fetch::{DEFAULT_MAX_RESPONSE_BYTES, HttpsJwksFetcher, JwksFetcher};
pub use jwk::{Jwk, JwkWithKid, Jwks};
pub use jwt::{DecomposedJwt, JsonObject, JwtHeader, JwtPayload, decompose};
pub use penalty::{DEFAULT_WAIT_PERIOD, PenaltyBox, TimedPenaltyBox};
pub use verifier::{IssuerConfig, JwtVerifier, VerifyOverrides};
