//! Amazon Cognito user pool verifier.
//!
//! Fixes the issuer to
//! `https://cognito-idp.<region>.amazonaws.com/<userPoolId>` (the region
//! is the part of the user pool ID before the underscore), derives the
//! JWKS URI from it, pins the algorithm set to RS256 (the only algorithm
//! Cognito signs with), and layers the Cognito-specific claim rules on
//! the shared pipeline: the client expectation is matched against `aud`
//! on ID tokens and `client_id` on access tokens, `token_use` must be
//! `id` or `access`, and access-token scopes must overlap the configured
//! set when one is given.

use std::sync::Arc;

use crate::{
    cache::JwksCache,
    claims::{ClaimCheck, CustomClaimCheck, IssuerKind, TokenUseCheck},
    clock::Clock,
    crypto::JwtSignatureAlgorithm,
    error::{Result, VerifyError},
    jwk::Jwks,
    jwt::JwtPayload,
    verifier::{IssuerConfig, IssuerEntry, VerifierBase, VerifyOverrides},
};

/// Configuration for one Cognito user pool.
///
/// `client_id` and `token_use` are mandatory expectations: they must be
/// configured here or supplied in per-call overrides, with
/// [`ClaimCheck::Disabled`] / [`TokenUseCheck::Disabled`] as the explicit
/// opt-outs.
#[derive(Clone, Default)]
pub struct CognitoConfig {
    /// User pool ID, `<region>_<id>`.
    pub user_pool_id: String,
    /// Expected app client. Matched against `aud` (ID tokens) or
    /// `client_id` (access tokens).
    pub client_id: Option<ClaimCheck>,
    /// Which token variety to accept.
    pub token_use: Option<TokenUseCheck>,
    /// OAuth scopes; access tokens must carry at least one of them.
    pub scopes: Option<Vec<String>>,
    /// Clock-skew slack applied symmetrically to `exp` and `nbf`.
    pub grace_seconds: u64,
    /// JWKS endpoint override. Defaults to the pool's well-known URI.
    pub jwks_uri: Option<String>,
    /// Allowed signature algorithms. Defaults to RS256 only.
    pub algorithms: Option<Vec<JwtSignatureAlgorithm>>,
    /// User-supplied check, run last in the pipeline.
    pub custom_check: Option<Arc<dyn CustomClaimCheck>>,
    /// Attach the decomposed token to claim errors.
    pub include_raw_jwt_in_errors: bool,
}

impl std::fmt::Debug for CognitoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CognitoConfig")
            .field("user_pool_id", &self.user_pool_id)
            .field("client_id", &self.client_id)
            .field("token_use", &self.token_use)
            .field("scopes", &self.scopes)
            .field("grace_seconds", &self.grace_seconds)
            .field("jwks_uri", &self.jwks_uri)
            .field("algorithms", &self.algorithms)
            .field("has_custom_check", &self.custom_check.is_some())
            .finish_non_exhaustive()
    }
}

/// The issuer URL Cognito uses for a user pool.
///
/// # Errors
///
/// Returns [`VerifyError::ParameterValidation`] if the pool ID is not of
/// the form `<region>_<id>`.
pub fn issuer_for_user_pool(user_pool_id: &str) -> Result<String> {
    let Some((region, pool)) = user_pool_id.split_once('_') else {
        return Err(VerifyError::ParameterValidation(format!(
            "user pool ID {user_pool_id:?} is not of the form <region>_<id>"
        )));
    };
    if region.is_empty() || pool.is_empty() {
        return Err(VerifyError::ParameterValidation(format!(
            "user pool ID {user_pool_id:?} is not of the form <region>_<id>"
        )));
    }
    Ok(format!("https://cognito-idp.{region}.amazonaws.com/{user_pool_id}"))
}

fn entry_for(config: CognitoConfig) -> Result<IssuerEntry> {
    let issuer = issuer_for_user_pool(&config.user_pool_id)?;
    let jwks_uri = config
        .jwks_uri
        .clone()
        .unwrap_or_else(|| format!("{issuer}/.well-known/jwks.json"));
    let algorithms =
        config.algorithms.clone().or(Some(vec![JwtSignatureAlgorithm::Rs256]));

    let kind = IssuerKind::Cognito { token_use: config.token_use, scopes: config.scopes.clone() };
    IssuerEntry::with_kind(
        IssuerConfig {
            issuer,
            jwks_uri: Some(jwks_uri.clone()),
            audience: None,
            client_id: config.client_id,
            grace_seconds: config.grace_seconds,
            algorithms,
            custom_check: config.custom_check,
            include_raw_jwt_in_errors: config.include_raw_jwt_in_errors,
        },
        kind,
        jwks_uri,
    )
}

/// Verifier for JWTs issued by Amazon Cognito user pools.
///
/// # Example
///
/// ```no_run
/// use tokengate::{ClaimCheck, CognitoConfig, CognitoJwtVerifier, TokenUse, TokenUseCheck};
///
/// # async fn example(token: &str) -> Result<(), tokengate::VerifyError> {
/// let verifier = CognitoJwtVerifier::new(CognitoConfig {
///     user_pool_id: "eu-west-1_AaBbCcDdE".into(),
///     client_id: Some(ClaimCheck::eq("26p45601famvtj5dcqif3nvtm7")),
///     token_use: Some(TokenUseCheck::Expect(TokenUse::Access)),
///     ..CognitoConfig::default()
/// })?;
///
/// let payload = verifier.verify(token).await?;
/// println!("username: {:?}", payload.str_claim("username"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CognitoJwtVerifier {
    base: VerifierBase,
}

impl CognitoJwtVerifier {
    /// Create a verifier for one user pool.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::ParameterValidation`] on a malformed user
    /// pool ID or an unusable default fetcher.
    pub fn new(config: CognitoConfig) -> Result<Self> {
        Self::multi(vec![config])
    }

    /// Create a verifier over several user pools; tokens are routed by
    /// their `iss` claim.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new); additionally rejects an empty pool set and
    /// duplicate `(pool, client_id)` pairs.
    pub fn multi(configs: Vec<CognitoConfig>) -> Result<Self> {
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

    /// Verify a Cognito JWT, fetching the pool's JWKS when needed.
    ///
    /// # Errors
    ///
    /// Any [`VerifyError`] from the pipeline.
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

    /// Verify against the cached JWKS only (no fetching, no await).
    ///
    /// # Errors
    ///
    /// [`VerifyError::JwksNotInCache`] when the pool's JWKS has not been
    /// loaded yet, otherwise as [`verify`](Self::verify).
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

    /// Prefetch the JWKS of every configured pool.
    ///
    /// # Errors
    ///
    /// The first fetch or validation error encountered.
    pub async fn hydrate(&self) -> Result<()> {
        self.base.hydrate().await
    }

    /// Seed the JWKS cache without fetching (single-pool verifiers).
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::ParameterValidation`] when more than one
    /// pool is configured.
    pub fn cache_jwks(&self, jwks: Jwks) -> Result<()> {
        self.base.cache_jwks(jwks)
    }

    /// Seed the JWKS cache for one configured pool.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::ParameterValidation`] for an unknown pool.
    pub fn cache_jwks_for(&self, user_pool_id: &str, jwks: Jwks) -> Result<()> {
        let issuer = issuer_for_user_pool(user_pool_id)?;
        self.base.cache_jwks_for(&issuer, jwks)
    }

    /// The JWKS cache backing this verifier.
    #[must_use]
    pub fn jwks_cache(&self) -> Arc<JwksCache> {
        Arc::clone(self.base.cache())
    }
}
