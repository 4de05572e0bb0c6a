//! AWS Application Load Balancer verifier.
//!
//! ALB user-claims tokens are ES256-signed and carry two extra header
//! claims: `signer` (the ARN of the load balancer) and `client` (the OIDC
//! client ID). Both are validated *after* signature verification, against
//! the configured `alb_arn` and `client_id` expectations. Either can be
//! [`ClaimCheck::Disabled`] explicitly; leaving one unconfigured is a
//! configuration error surfaced at verify time.

use std::sync::Arc;

use crate::{
    cache::JwksCache,
    claims::{ClaimCheck, CustomClaimCheck, IssuerKind},
    clock::Clock,
    crypto::JwtSignatureAlgorithm,
    error::{Result, VerifyError},
    jwk::Jwks,
    jwt::JwtPayload,
    verifier::{IssuerConfig, IssuerEntry, VerifierBase, VerifyOverrides, well_known_jwks_uri},
};

/// Configuration for one ALB issuer.
#[derive(Clone, Default)]
pub struct AlbConfig {
    /// Expected `iss` claim value. Required.
    pub issuer: String,
    /// Expected `signer` header claim (load balancer ARN).
    pub alb_arn: Option<ClaimCheck>,
    /// Expected `client` header claim (OIDC client ID).
    pub client_id: Option<ClaimCheck>,
    /// Key endpoint. Defaults to `<issuer>/.well-known/jwks.json`.
    pub jwks_uri: Option<String>,
    /// Clock-skew slack applied symmetrically to `exp` and `nbf`.
    pub grace_seconds: u64,
    /// Allowed signature algorithms. Defaults to ES256 only.
    pub algorithms: Option<Vec<JwtSignatureAlgorithm>>,
    /// User-supplied check, run last in the pipeline.
    pub custom_check: Option<Arc<dyn CustomClaimCheck>>,
    /// Attach the decomposed token to claim errors.
    pub include_raw_jwt_in_errors: bool,
}

impl std::fmt::Debug for AlbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlbConfig")
            .field("issuer", &self.issuer)
            .field("alb_arn", &self.alb_arn)
            .field("client_id", &self.client_id)
            .field("jwks_uri", &self.jwks_uri)
            .field("grace_seconds", &self.grace_seconds)
            .field("algorithms", &self.algorithms)
            .field("has_custom_check", &self.custom_check.is_some())
            .finish_non_exhaustive()
    }
}

fn entry_for(config: AlbConfig) -> Result<IssuerEntry> {
    let jwks_uri =
        config.jwks_uri.clone().unwrap_or_else(|| well_known_jwks_uri(&config.issuer));
    let algorithms =
        config.algorithms.clone().or(Some(vec![JwtSignatureAlgorithm::Es256]));

    IssuerEntry::with_kind(
        IssuerConfig {
            issuer: config.issuer,
            jwks_uri: Some(jwks_uri.clone()),
            audience: None,
            client_id: config.client_id,
            grace_seconds: config.grace_seconds,
            algorithms,
            custom_check: config.custom_check,
            include_raw_jwt_in_errors: config.include_raw_jwt_in_errors,
        },
        IssuerKind::Alb { alb_arn: config.alb_arn },
        jwks_uri,
    )
}

/// Verifier for JWTs issued by an AWS Application Load Balancer.
///
/// # Example
///
/// ```no_run
/// use tokengate::{AlbConfig, AlbJwtVerifier, ClaimCheck};
///
/// # async fn example(token: &str) -> Result<(), tokengate::VerifyError> {
/// let verifier = AlbJwtVerifier::new(AlbConfig {
///     issuer: "https://auth.example".into(),
///     alb_arn: Some(ClaimCheck::eq(
///         "arn:aws:elasticloadbalancing:eu-west-1:123456789012:loadbalancer/app/web/abc",
///     )),
///     client_id: Some(ClaimCheck::eq("client-xyz")),
///     ..AlbConfig::default()
/// })?;
///
/// let payload = verifier.verify(token).await?;
/// println!("sub: {:?}", payload.str_claim("sub"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AlbJwtVerifier {
    base: VerifierBase,
}

impl AlbJwtVerifier {
    /// Create a verifier for one ALB issuer.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::ParameterValidation`] on an empty issuer or
    /// an unusable default fetcher.
    pub fn new(config: AlbConfig) -> Result<Self> {
        Self::multi(vec![config])
    }

    /// Create a verifier over several ALB issuers.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new); additionally rejects an empty issuer set.
    pub fn multi(configs: Vec<AlbConfig>) -> Result<Self> {
        let entries = configs.into_iter().map(entry_for).collect::<Result<Vec<_>>>()?;
        Ok(Self { base: VerifierBase::new(entries)? })
    }

    /// Share a JWKS cache with other verifiers.
    #[must_use]
    pub fn with_jwks_cache(mut self, cache: Arc<JwksCache>) -> Self {
        self.base.set_cache(cache);
        self
    }

    /// Replace the clock used for `exp`/`nbf` validation.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.base.set_clock(clock);
        self
    }

    /// Verify an ALB JWT, fetching keys when needed.
    ///
    /// # Errors
    ///
    /// Any [`VerifyError`] from the pipeline. A `signer`/`client` header
    /// mismatch surfaces as [`VerifyError::InvalidClaim`].
    pub async fn verify(&self, token: &str) -> Result<JwtPayload> {
        self.base.verify(token, None).await
    }

    /// [`verify`](Self::verify) with per-call overrides.
    ///
    /// # Errors
    ///
    /// See [`verify`](Self::verify).
    pub async fn verify_with(
        &self,
        token: &str,
        overrides: &VerifyOverrides,
    ) -> Result<JwtPayload> {
        self.base.verify(token, Some(overrides)).await
    }

    /// Verify against the cached keys only (no fetching, no await).
    ///
    /// # Errors
    ///
    /// [`VerifyError::JwksNotInCache`] when the issuer's keys have not
    /// been loaded yet, otherwise as [`verify`](Self::verify).
    pub fn verify_sync(&self, token: &str) -> Result<JwtPayload> {
        self.base.verify_sync(token, None)
    }

    /// [`verify_sync`](Self::verify_sync) with per-call overrides.
    ///
    /// # Errors
    ///
    /// See [`verify_sync`](Self::verify_sync).
    pub fn verify_sync_with(
        &self,
        token: &str,
        overrides: &VerifyOverrides,
    ) -> Result<JwtPayload> {
        self.base.verify_sync(token, Some(overrides))
    }

    /// Prefetch the keys of every configured issuer.
    ///
    /// # Errors
    ///
    /// The first fetch or validation error encountered.
    pub async fn hydrate(&self) -> Result<()> {
        self.base.hydrate().await
    }

    /// Seed the key cache without fetching (single-issuer verifiers).
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::ParameterValidation`] when more than one
    /// issuer is configured.
    pub fn cache_jwks(&self, jwks: Jwks) -> Result<()> {
        self.base.cache_jwks(jwks)
    }

    /// Seed the key cache for one configured issuer.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::ParameterValidation`] for an unknown
    /// issuer.
    pub fn cache_jwks_for(&self, issuer: &str, jwks: Jwks) -> Result<()> {
        self.base.cache_jwks_for(issuer, jwks)
    }

    /// The JWKS cache backing this verifier.
    #[must_use]
    pub fn jwks_cache(&self) -> Arc<JwksCache> {
        Arc::clone(self.base.cache())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithms_default_to_es256() {
        let entry = entry_for(AlbConfig {
            issuer: "https://auth.example".into(),
            ..AlbConfig::default()
        })
        .unwrap();
        assert_eq!(entry.config.algorithms, Some(vec![JwtSignatureAlgorithm::Es256]));
        assert_eq!(entry.jwks_uri, "https://auth.example/.well-known/jwks.json");
    }

    #[test]
    fn test_empty_issuer_rejected() {
        assert!(matches!(
            AlbJwtVerifier::new(AlbConfig::default()),
            Err(VerifyError::ParameterValidation(_))
        ));
    }

    #[test]
    fn test_verifier_construction() {
        let verifier = AlbJwtVerifier::new(AlbConfig {
            issuer: "https://auth.example".into(),
            alb_arn: Some(ClaimCheck::eq("arn:aws:elb/alb1")),
            client_id: Some(ClaimCheck::Disabled),
            ..AlbConfig::default()
        });
        assert!(verifier.is_ok());
    }
}
