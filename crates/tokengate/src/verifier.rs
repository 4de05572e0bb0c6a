//! The verification pipeline and the generic JWKS-issuer verifier.
//!
//! [`VerifierBase`] orchestrates the seven-step pipeline: decompose,
//! route to an issuer configuration, merge per-call overrides, obtain the
//! JWK, verify the signature, validate claims, run the custom hook. The
//! public verifiers ([`JwtVerifier`] here, the Cognito and ALB verifiers
//! in their own modules) are thin shells around it that differ only in
//! how issuer entries are built and which expectations are mandatory.
//!
//! A verifier is created once and reused; its caches live as long as the
//! verifier, and one [`JwksCache`] may be shared between several
//! verifiers.

use std::sync::Arc;

use crate::{
    cache::JwksCache,
    claims::{
        ClaimCheck, CustomCheckContext, CustomClaimCheck, EffectiveConfig, IssuerKind,
        TokenUseCheck, validate_claims,
    },
    clock::{Clock, SystemClock},
    crypto::{JwtSignatureAlgorithm, verify_token_signature},
    error::{Result, VerifyError},
    fetch::HttpsJwksFetcher,
    jwk::Jwks,
    jwt::{DecomposedJwt, JwtPayload, decompose},
    penalty::TimedPenaltyBox,
};

/// Configuration of a single issuer for the generic [`JwtVerifier`].
///
/// `audience`/`client_id` expectations follow the `Option<ClaimCheck>`
/// convention: `None` means "not configured" (it must then be supplied in
/// per-call overrides, or verification fails with a parameter error) and
/// `ClaimCheck::Disabled` opts out of the check explicitly.
#[derive(Clone, Default)]
pub struct IssuerConfig {
    /// Expected `iss` claim value. Required.
    pub issuer: String,
    /// JWKS endpoint. Defaults to `<issuer>/.well-known/jwks.json`.
    pub jwks_uri: Option<String>,
    /// Expected `aud` claim.
    pub audience: Option<ClaimCheck>,
    /// Expected `client_id` claim.
    pub client_id: Option<ClaimCheck>,
    /// Clock-skew slack applied symmetrically to `exp` and `nbf`.
    pub grace_seconds: u64,
    /// Allowed signature algorithms. Defaults to all supported.
    pub algorithms: Option<Vec<JwtSignatureAlgorithm>>,
    /// User-supplied check, run last in the pipeline.
    pub custom_check: Option<Arc<dyn CustomClaimCheck>>,
    /// Attach the decomposed token to claim errors (never to signature
    /// errors).
    pub include_raw_jwt_in_errors: bool,
}

impl std::fmt::Debug for IssuerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuerConfig")
            .field("issuer", &self.issuer)
            .field("jwks_uri", &self.jwks_uri)
            .field("audience", &self.audience)
            .field("client_id", &self.client_id)
            .field("grace_seconds", &self.grace_seconds)
            .field("algorithms", &self.algorithms)
            .field("has_custom_check", &self.custom_check.is_some())
            .field("include_raw_jwt_in_errors", &self.include_raw_jwt_in_errors)
            .finish()
    }
}

/// Per-call overrides, merged onto the issuer configuration resolved for
/// the token. Identical shape to the configs minus `issuer`/`jwks_uri`.
/// The specialization-specific fields (`token_use`, `scopes`, `alb_arn`)
/// only take effect with the matching verifier.
#[derive(Clone, Default)]
pub struct VerifyOverrides {
    /// Replace the expected `aud` claim.
    pub audience: Option<ClaimCheck>,
    /// Replace the expected `client_id` (Cognito: client expectation).
    pub client_id: Option<ClaimCheck>,
    /// Replace the clock-skew slack.
    pub grace_seconds: Option<u64>,
    /// Replace the allowed signature algorithms.
    pub algorithms: Option<Vec<JwtSignatureAlgorithm>>,
    /// Replace the custom check.
    pub custom_check: Option<Arc<dyn CustomClaimCheck>>,
    /// Replace the raw-JWT-attachment setting.
    pub include_raw_jwt_in_errors: Option<bool>,
    /// Cognito only: replace the `token_use` expectation.
    pub token_use: Option<TokenUseCheck>,
    /// Cognito only: replace the expected scopes.
    pub scopes: Option<Vec<String>>,
    /// ALB only: replace the expected signer ARN.
    pub alb_arn: Option<ClaimCheck>,
}

impl std::fmt::Debug for VerifyOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifyOverrides")
            .field("audience", &self.audience)
            .field("client_id", &self.client_id)
            .field("grace_seconds", &self.grace_seconds)
            .field("algorithms", &self.algorithms)
            .field("has_custom_check", &self.custom_check.is_some())
            .field("include_raw_jwt_in_errors", &self.include_raw_jwt_in_errors)
            .field("token_use", &self.token_use)
            .field("scopes", &self.scopes)
            .field("alb_arn", &self.alb_arn)
            .finish()
    }
}

/// Derive the conventional JWKS URI from an issuer.
pub(crate) fn well_known_jwks_uri(issuer: &str) -> String {
    format!("{}/.well-known/jwks.json", issuer.trim_end_matches('/'))
}

/// One configured issuer, resolved to its JWKS URI and claim rules.
pub(crate) struct IssuerEntry {
    pub(crate) config: IssuerConfig,
    pub(crate) kind: IssuerKind,
    pub(crate) jwks_uri: String,
}

impl IssuerEntry {
    /// Entry for the generic verifier; the JWKS URI falls back to the
    /// well-known location under the issuer.
    pub(crate) fn generic(config: IssuerConfig) -> Result<Self> {
        let jwks_uri =
            config.jwks_uri.clone().unwrap_or_else(|| well_known_jwks_uri(&config.issuer));
        Self::with_kind(config, IssuerKind::Generic, jwks_uri)
    }

    /// Entry with specialization-specific claim rules.
    pub(crate) fn with_kind(
        config: IssuerConfig,
        kind: IssuerKind,
        jwks_uri: String,
    ) -> Result<Self> {
        if config.issuer.is_empty() {
            return Err(VerifyError::ParameterValidation("issuer must not be empty".into()));
        }
        if jwks_uri.is_empty() {
            return Err(VerifyError::ParameterValidation("jwks_uri must not be empty".into()));
        }
        Ok(Self { config, kind, jwks_uri })
    }

    /// Merge per-call overrides onto this entry's configuration and check
    /// that every mandatory expectation has been provided.
    fn effective(&self, overrides: Option<&VerifyOverrides>) -> Result<EffectiveConfig> {
        let config = &self.config;
        let mut kind = self.kind.clone();
        let mut effective = EffectiveConfig {
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            client_id: config.client_id.clone(),
            grace_seconds: config.grace_seconds,
            algorithms: config.algorithms.clone(),
            custom_check: config.custom_check.clone(),
            include_raw_jwt_in_errors: config.include_raw_jwt_in_errors,
            kind: IssuerKind::Generic,
        };

        if let Some(overrides) = overrides {
            if let Some(audience) = &overrides.audience {
                effective.audience = Some(audience.clone());
            }
            if let Some(client_id) = &overrides.client_id {
                effective.client_id = Some(client_id.clone());
            }
            if let Some(grace_seconds) = overrides.grace_seconds {
                effective.grace_seconds = grace_seconds;
            }
            if let Some(algorithms) = &overrides.algorithms {
                effective.algorithms = Some(algorithms.clone());
            }
            if let Some(custom_check) = &overrides.custom_check {
                effective.custom_check = Some(Arc::clone(custom_check));
            }
            if let Some(include) = overrides.include_raw_jwt_in_errors {
                effective.include_raw_jwt_in_errors = include;
            }
            match &mut kind {
                IssuerKind::Cognito { token_use, scopes } => {
                    if let Some(value) = overrides.token_use {
                        *token_use = Some(value);
                    }
                    if let Some(value) = &overrides.scopes {
                        *scopes = Some(value.clone());
                    }
                },
                IssuerKind::Alb { alb_arn } => {
                    if let Some(value) = &overrides.alb_arn {
                        *alb_arn = Some(value.clone());
                    }
                },
                IssuerKind::Generic => {},
            }
        }

        match &kind {
            IssuerKind::Generic => {
                if effective.audience.is_none() && effective.client_id.is_none() {
                    return Err(VerifyError::ParameterValidation(
                        "an audience or client_id expectation must be configured or passed per \
                         call; use ClaimCheck::Disabled to opt out"
                            .into(),
                    ));
                }
            },
            IssuerKind::Cognito { token_use, .. } => {
                if effective.client_id.is_none() {
                    return Err(VerifyError::ParameterValidation(
                        "a client_id expectation must be configured or passed per call; use \
                         ClaimCheck::Disabled to opt out"
                            .into(),
                    ));
                }
                if token_use.is_none() {
                    return Err(VerifyError::ParameterValidation(
                        "a token_use expectation must be configured or passed per call; use \
                         TokenUseCheck::Disabled to accept both"
                            .into(),
                    ));
                }
            },
            IssuerKind::Alb { alb_arn } => {
                if alb_arn.is_none() {
                    return Err(VerifyError::ParameterValidation(
                        "an alb_arn expectation must be configured or passed per call; use \
                         ClaimCheck::Disabled to opt out"
                            .into(),
                    ));
                }
                if effective.client_id.is_none() {
                    return Err(VerifyError::ParameterValidation(
                        "a client_id expectation must be configured or passed per call; use \
                         ClaimCheck::Disabled to opt out"
                            .into(),
                    ));
                }
            },
        }

        effective.kind = kind;
        Ok(effective)
    }

    /// Whether this entry's expectations match the token, used to
    /// disambiguate multiple configurations sharing one issuer.
    fn matches_token(&self, jwt: &DecomposedJwt) -> bool {
        let audiences = jwt.payload.audiences().unwrap_or_default();
        match &self.kind {
            IssuerKind::Generic => {
                let aud_ok = self
                    .config
                    .audience
                    .as_ref()
                    .is_some_and(|check| check.accepts_any(&audiences));
                let client_ok = self
                    .config
                    .client_id
                    .as_ref()
                    .is_some_and(|check| check.accepts(jwt.payload.client_id()));
                aud_ok || client_ok
            },
            IssuerKind::Cognito { .. } => self.config.client_id.as_ref().is_some_and(|check| {
                check.accepts_any(&audiences) || check.accepts(jwt.payload.client_id())
            }),
            IssuerKind::Alb { alb_arn } => {
                alb_arn.as_ref().is_some_and(|check| check.accepts(jwt.header.signer.as_deref()))
            },
        }
    }
}

/// Shared pipeline behind every verifier flavor.
pub(crate) struct VerifierBase {
    entries: Vec<IssuerEntry>,
    cache: Arc<JwksCache>,
    clock: Arc<dyn Clock>,
}

impl VerifierBase {
    /// Build a verifier over a non-empty issuer set, wiring up the
    /// default HTTPS fetcher and penalty box.
    pub(crate) fn new(entries: Vec<IssuerEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(VerifyError::ParameterValidation(
                "at least one issuer must be configured".into(),
            ));
        }
        for (index, entry) in entries.iter().enumerate() {
            for other in &entries[index + 1..] {
                if entry.config.issuer == other.config.issuer
                    && entry.config.audience == other.config.audience
                    && entry.config.client_id == other.config.client_id
                {
                    return Err(VerifyError::ParameterValidation(format!(
                        "duplicate issuer configuration for {:?}: audience/client_id \
                         expectations must differ so tokens can be routed",
                        entry.config.issuer
                    )));
                }
            }
        }

        let cache = Arc::new(JwksCache::new(
            Arc::new(HttpsJwksFetcher::new()?),
            Arc::new(TimedPenaltyBox::default()),
        ));
        Ok(Self { entries, cache, clock: Arc::new(SystemClock) })
    }

    pub(crate) fn set_cache(&mut self, cache: Arc<JwksCache>) {
        self.cache = cache;
    }

    pub(crate) fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    pub(crate) fn cache(&self) -> &Arc<JwksCache> {
        &self.cache
    }

    /// Resolve the issuer configuration for a decomposed token.
    fn route(&self, jwt: &DecomposedJwt) -> Result<&IssuerEntry> {
        if self.entries.len() == 1 {
            return Ok(&self.entries[0]);
        }
        let Some(iss) = jwt.payload.issuer() else {
            return Err(VerifyError::invalid_issuer(
                "multi-issuer verification requires a string iss claim".to_owned(),
            ));
        };

        let mut candidates = self.entries.iter().filter(|entry| entry.config.issuer == iss);
        let Some(first) = candidates.next() else {
            return Err(VerifyError::invalid_issuer(format!(
                "no issuer configuration for {iss:?}"
            )));
        };
        match candidates.next() {
            None => Ok(first),
            // Several configurations share this issuer: route by
            // audience/client/signer expectation.
            Some(second) => [first, second]
                .into_iter()
                .chain(candidates)
                .find(|entry| entry.matches_token(jwt))
                .ok_or_else(|| {
                    VerifyError::invalid_issuer(format!(
                        "no configuration for issuer {iss:?} matches the token's \
                         audience/client"
                    ))
                }),
        }
    }

    /// Asynchronous verification; may fetch the JWKS.
    pub(crate) async fn verify(
        &self,
        token: &str,
        overrides: Option<&VerifyOverrides>,
    ) -> Result<JwtPayload> {
        let jwt = decompose(token)?;
        let entry = self.route(&jwt)?;
        let effective = entry.effective(overrides)?;

        let jwk = self.cache.get_jwk(&entry.jwks_uri, &jwt).await?;
        verify_token_signature(&jwt, jwk.jwk(), effective.algorithms.as_deref())?;

        let mut outcome = validate_claims(&jwt, &effective, self.clock.now_seconds());
        if outcome.is_ok()
            && let Some(check) = &effective.custom_check
        {
            let ctx = CustomCheckContext {
                header: &jwt.header,
                payload: &jwt.payload,
                jwk: jwk.jwk(),
            };
            outcome = check.check_async(&ctx).await;
        }
        Self::seal(outcome, &effective, jwt)
    }

    /// Synchronous verification; requires the JWK to already be cached
    /// (seed with [`hydrate`](Self::hydrate) or `cache_jwks`). Custom
    /// checks run through their synchronous entry point.
    pub(crate) fn verify_sync(
        &self,
        token: &str,
        overrides: Option<&VerifyOverrides>,
    ) -> Result<JwtPayload> {
        let jwt = decompose(token)?;
        let entry = self.route(&jwt)?;
        let effective = entry.effective(overrides)?;

        let jwk = self.cache.get_cached_jwk(&entry.jwks_uri, &jwt)?;
        verify_token_signature(&jwt, jwk.jwk(), effective.algorithms.as_deref())?;

        let mut outcome = validate_claims(&jwt, &effective, self.clock.now_seconds());
        if outcome.is_ok()
            && let Some(check) = &effective.custom_check
        {
            let ctx = CustomCheckContext {
                header: &jwt.header,
                payload: &jwt.payload,
                jwk: jwk.jwk(),
            };
            outcome = check.check(&ctx);
        }
        Self::seal(outcome, &effective, jwt)
    }

    /// Post-claim-validation policy: claim errors pick up the decomposed
    /// token when configured to, everything else passes through, and a
    /// success returns the payload. Reached only after the signature
    /// verified, so attaching the token never exposes unauthenticated
    /// content.
    fn seal(
        outcome: Result<()>,
        effective: &EffectiveConfig,
        jwt: DecomposedJwt,
    ) -> Result<JwtPayload> {
        match outcome {
            Ok(()) => Ok(jwt.payload),
            Err(error) if effective.include_raw_jwt_in_errors && error.is_claim_error() => {
                Err(error.with_raw_jwt(&jwt))
            },
            Err(error) => Err(error),
        }
    }

    /// Prefetch the JWKS of every configured issuer.
    pub(crate) async fn hydrate(&self) -> Result<()> {
        for entry in &self.entries {
            self.cache.get_jwks(&entry.jwks_uri).await?;
        }
        Ok(())
    }

    /// Seed the cache for the single configured issuer.
    pub(crate) fn cache_jwks(&self, jwks: Jwks) -> Result<()> {
        if self.entries.len() > 1 {
            return Err(VerifyError::ParameterValidation(
                "multiple issuers are configured; use cache_jwks_for".into(),
            ));
        }
        self.cache.add_jwks(&self.entries[0].jwks_uri, jwks);
        Ok(())
    }

    /// Seed the cache for one of the configured issuers.
    pub(crate) fn cache_jwks_for(&self, issuer: &str, jwks: Jwks) -> Result<()> {
        let entry = self
            .entries
            .iter()
            .find(|entry| entry.config.issuer == issuer)
            .ok_or_else(|| {
                VerifyError::ParameterValidation(format!(
                    "no issuer configuration for {issuer:?}"
                ))
            })?;
        self.cache.add_jwks(&entry.jwks_uri, jwks);
        Ok(())
    }
}

impl std::fmt::Debug for VerifierBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifierBase")
            .field("issuers", &self.entries.len())
            .field("cache", &self.cache)
            .finish()
    }
}

/// Verifier for any issuer that publishes a JWKS over HTTPS.
///
/// # Example
///
/// ```no_run
/// use tokengate::{ClaimCheck, IssuerConfig, JwtVerifier};
///
/// # async fn example(token: &str) -> Result<(), tokengate::VerifyError> {
/// let verifier = JwtVerifier::new(IssuerConfig {
///     issuer: "https://issuer.example".into(),
///     audience: Some(ClaimCheck::eq("my-api")),
///     ..IssuerConfig::default()
/// })?;
///
/// let payload = verifier.verify(token).await?;
/// println!("subject: {:?}", payload.str_claim("sub"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct JwtVerifier {
    base: VerifierBase,
}

impl JwtVerifier {
    /// Create a single-issuer verifier.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::ParameterValidation`] on an empty issuer or
    /// an unusable default fetcher.
    pub fn new(config: IssuerConfig) -> Result<Self> {
        Self::multi(vec![config])
    }

    /// Create a multi-issuer verifier; tokens are routed by their `iss`
    /// claim and, for issuers configured more than once, by audience or
    /// client expectations.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::ParameterValidation`] on an empty issuer
    /// set, an empty issuer value, or duplicate
    /// `(issuer, audience/client_id)` pairs.
    pub fn multi(configs: Vec<IssuerConfig>) -> Result<Self> {
        let entries =
            configs.into_iter().map(IssuerEntry::generic).collect::<Result<Vec<_>>>()?;
        Ok(Self { base: VerifierBase::new(entries)? })
    }

    /// Share a JWKS cache (and with it, fetcher and penalty box) with
    /// other verifiers.
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

    /// Verify a token, fetching the JWKS when needed.
    ///
    /// # Errors
    ///
    /// Any [`VerifyError`] from the pipeline; the token is rejected
    /// unless every step succeeds.
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

    /// Verify a token against the cached JWKS only (no fetching, no
    /// await) — for hot paths that cannot cross an IO boundary.
    ///
    /// # Errors
    ///
    /// [`VerifyError::JwksNotInCache`] when the issuer's JWKS has not
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

    /// Prefetch the JWKS of every configured issuer so
    /// [`verify_sync`](Self::verify_sync) works from the first request.
    ///
    /// # Errors
    ///
    /// The first fetch or validation error encountered.
    pub async fn hydrate(&self) -> Result<()> {
        self.base.hydrate().await
    }

    /// Seed the JWKS cache without fetching (single-issuer verifiers).
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::ParameterValidation`] when more than one
    /// issuer is configured.
    pub fn cache_jwks(&self, jwks: Jwks) -> Result<()> {
        self.base.cache_jwks(jwks)
    }

    /// Seed the JWKS cache for one configured issuer.
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
