//! Claim validation: expectation types and the post-signature pipeline.
//!
//! Claim checks run only after signature verification has succeeded. The
//! order is fixed: issuer, audience/client, ALB header claims, `exp`,
//! `nbf`, Cognito `token_use`/`scope`, then the user-supplied hook (which
//! the verifier invokes last so it can be asynchronous).

use async_trait::async_trait;

use crate::{
    crypto::JwtSignatureAlgorithm,
    error::{Result, VerifyError},
    jwk::Jwk,
    jwt::{DecomposedJwt, JwtHeader, JwtPayload},
};

/// An expectation for a string-valued claim.
///
/// `Disabled` switches the check off explicitly (the caller opted out);
/// this is distinct from *not configuring* the check at all, which the
/// verifier treats as a configuration error for mandatory expectations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimCheck {
    /// Accept any value, including an absent claim.
    Disabled,
    /// Accept if the claim matches one of these values.
    OneOf(Vec<String>),
}

impl ClaimCheck {
    /// Expect exactly this value.
    pub fn eq(value: impl Into<String>) -> Self {
        Self::OneOf(vec![value.into()])
    }

    /// Expect one of these values.
    pub fn any_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::OneOf(values.into_iter().map(Into::into).collect())
    }

    /// Whether a single claim value satisfies this expectation.
    #[must_use]
    pub fn accepts(&self, value: Option<&str>) -> bool {
        match self {
            Self::Disabled => true,
            Self::OneOf(expected) => {
                value.is_some_and(|value| expected.iter().any(|e| e == value))
            },
        }
    }

    /// Whether any of several claim values satisfies this expectation
    /// (array-valued `aud`: one overlapping element suffices).
    #[must_use]
    pub fn accepts_any(&self, values: &[&str]) -> bool {
        match self {
            Self::Disabled => true,
            Self::OneOf(expected) => {
                values.iter().any(|value| expected.iter().any(|e| e == value))
            },
        }
    }

    fn expected_values(&self) -> String {
        match self {
            Self::Disabled => "<disabled>".to_owned(),
            Self::OneOf(expected) => format!("{expected:?}"),
        }
    }
}

/// Which Cognito token variety a verifier accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenUse {
    /// ID tokens (`token_use: "id"`).
    Id,
    /// Access tokens (`token_use: "access"`).
    Access,
}

impl TokenUse {
    /// The claim value for this variety.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Access => "access",
        }
    }
}

/// Expectation for the Cognito `token_use` claim.
///
/// Even when `Disabled`, the claim must still be `"id"` or `"access"` —
/// disabling only removes the restriction to one variety.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenUseCheck {
    /// Accept both ID and access tokens.
    Disabled,
    /// Accept only the given variety.
    Expect(TokenUse),
}

/// Specialization-specific claim rules, resolved per issuer entry.
#[derive(Clone, Debug)]
pub(crate) enum IssuerKind {
    Generic,
    Cognito { token_use: Option<TokenUseCheck>, scopes: Option<Vec<String>> },
    Alb { alb_arn: Option<ClaimCheck> },
}

/// The issuer configuration a single verification call runs against,
/// after per-call overrides have been merged in.
#[derive(Clone)]
pub(crate) struct EffectiveConfig {
    pub(crate) issuer: String,
    pub(crate) audience: Option<ClaimCheck>,
    pub(crate) client_id: Option<ClaimCheck>,
    pub(crate) grace_seconds: u64,
    pub(crate) algorithms: Option<Vec<JwtSignatureAlgorithm>>,
    pub(crate) custom_check: Option<std::sync::Arc<dyn CustomClaimCheck>>,
    pub(crate) include_raw_jwt_in_errors: bool,
    pub(crate) kind: IssuerKind,
}

/// Everything a custom check may inspect.
pub struct CustomCheckContext<'a> {
    /// The verified token's header.
    pub header: &'a JwtHeader,
    /// The verified token's payload.
    pub payload: &'a JwtPayload,
    /// The JWK the signature verified against.
    pub jwk: &'a Jwk,
}

/// User-supplied claim check, invoked last in the pipeline.
///
/// Implement [`check`](Self::check) for synchronous rules; override
/// [`check_async`](Self::check_async) when the rule needs to await
/// (external lookups). The synchronous verification path only ever calls
/// `check`; the asynchronous path calls `check_async`, which defaults to
/// delegating to `check`.
#[async_trait]
pub trait CustomClaimCheck: Send + Sync {
    /// Synchronous check. Any error is propagated to the caller as-is.
    ///
    /// # Errors
    ///
    /// Implementations return whatever [`VerifyError`] fits the rule;
    /// [`VerifyError::InvalidClaim`] is the conventional choice.
    fn check(&self, ctx: &CustomCheckContext<'_>) -> Result<()>;

    /// Asynchronous check, used by `verify`. Defaults to [`check`](Self::check).
    ///
    /// # Errors
    ///
    /// See [`check`](Self::check).
    async fn check_async(&self, ctx: &CustomCheckContext<'_>) -> Result<()> {
        self.check(ctx)
    }
}

/// Run the claim pipeline (steps 1–6; the custom hook is step 7 and runs
/// in the verifier).
pub(crate) fn validate_claims(jwt: &DecomposedJwt, cfg: &EffectiveConfig, now: i64) -> Result<()> {
    validate_issuer(&jwt.payload, &cfg.issuer)?;

    match &cfg.kind {
        IssuerKind::Generic => {
            if let Some(check) = &cfg.audience {
                validate_audience(&jwt.payload, check)?;
            }
            if let Some(check) = &cfg.client_id {
                validate_client_id_claim(&jwt.payload, check)?;
            }
        },
        IssuerKind::Cognito { .. } => {
            if let Some(check) = &cfg.client_id {
                validate_cognito_client(&jwt.payload, check)?;
            }
        },
        IssuerKind::Alb { alb_arn } => {
            validate_alb_headers(&jwt.header, alb_arn.as_ref(), cfg.client_id.as_ref())?;
        },
    }

    let grace = i64::try_from(cfg.grace_seconds).unwrap_or(i64::MAX);
    validate_expiration(&jwt.payload, grace, now)?;
    validate_not_before(&jwt.payload, grace, now)?;

    if let IssuerKind::Cognito { token_use, scopes } = &cfg.kind {
        if let Some(check) = token_use {
            validate_token_use(&jwt.payload, *check)?;
        }
        if let Some(scopes) = scopes {
            validate_scopes(&jwt.payload, scopes)?;
        }
    }

    Ok(())
}

fn validate_issuer(payload: &JwtPayload, expected: &str) -> Result<()> {
    match payload.issuer() {
        Some(iss) if iss == expected => Ok(()),
        other => Err(VerifyError::invalid_issuer(format!(
            "expected issuer {expected:?}, token has {other:?}"
        ))),
    }
}

fn validate_audience(payload: &JwtPayload, check: &ClaimCheck) -> Result<()> {
    if matches!(check, ClaimCheck::Disabled) {
        return Ok(());
    }
    let audiences = payload.audiences().unwrap_or_default();
    if check.accepts_any(&audiences) {
        Ok(())
    } else {
        Err(VerifyError::invalid_audience(format!(
            "expected one of {}, token has aud {:?}",
            check.expected_values(),
            payload.get("aud"),
        )))
    }
}

fn validate_client_id_claim(payload: &JwtPayload, check: &ClaimCheck) -> Result<()> {
    if check.accepts(payload.client_id()) {
        Ok(())
    } else {
        Err(VerifyError::invalid_claim(format!(
            "expected client_id of {}, token has {:?}",
            check.expected_values(),
            payload.get("client_id"),
        )))
    }
}

/// Cognito carries the client in `aud` on ID tokens and in `client_id` on
/// access tokens. With an unusable `token_use` claim either location is
/// accepted here; the `token_use` check itself rejects the token later in
/// the pipeline.
fn validate_cognito_client(payload: &JwtPayload, check: &ClaimCheck) -> Result<()> {
    match payload.token_use() {
        Some("id") => validate_audience(payload, check),
        Some("access") => validate_client_id_claim(payload, check),
        _ => {
            let audiences = payload.audiences().unwrap_or_default();
            if check.accepts_any(&audiences) || check.accepts(payload.client_id()) {
                Ok(())
            } else {
                Err(VerifyError::invalid_claim(format!(
                    "expected client of {}, token matches in neither aud nor client_id",
                    check.expected_values(),
                )))
            }
        },
    }
}

fn validate_alb_headers(
    header: &JwtHeader,
    alb_arn: Option<&ClaimCheck>,
    client_id: Option<&ClaimCheck>,
) -> Result<()> {
    if let Some(check) = alb_arn
        && !check.accepts(header.signer.as_deref())
    {
        return Err(VerifyError::invalid_claim(format!(
            "expected ALB ARN of {}, token header has signer {:?}",
            check.expected_values(),
            header.signer,
        )));
    }
    if let Some(check) = client_id
        && !check.accepts(header.client.as_deref())
    {
        return Err(VerifyError::invalid_claim(format!(
            "expected client of {}, token header has client {:?}",
            check.expected_values(),
            header.client,
        )));
    }
    Ok(())
}

fn validate_expiration(payload: &JwtPayload, grace: i64, now: i64) -> Result<()> {
    let Some(exp_claim) = payload.get("exp") else {
        return Err(VerifyError::invalid_claim("missing exp claim"));
    };
    let Some(exp) = exp_claim.as_i64() else {
        return Err(VerifyError::invalid_claim(format!(
            "exp claim must be a number, token has {exp_claim:?}"
        )));
    };
    if now > exp.saturating_add(grace) {
        return Err(VerifyError::expired(format!("token expired at {exp} (now {now})")));
    }
    Ok(())
}

fn validate_not_before(payload: &JwtPayload, grace: i64, now: i64) -> Result<()> {
    let Some(nbf_claim) = payload.get("nbf") else {
        return Ok(());
    };
    let Some(nbf) = nbf_claim.as_i64() else {
        return Err(VerifyError::invalid_claim(format!(
            "nbf claim must be a number, token has {nbf_claim:?}"
        )));
    };
    if now.saturating_add(grace) < nbf {
        return Err(VerifyError::not_before(format!(
            "token not valid before {nbf} (now {now})"
        )));
    }
    Ok(())
}

fn validate_token_use(payload: &JwtPayload, check: TokenUseCheck) -> Result<()> {
    let claim = payload.token_use();
    if !matches!(claim, Some("id") | Some("access")) {
        return Err(VerifyError::invalid_claim(format!(
            "token_use claim must be \"id\" or \"access\", token has {:?}",
            payload.get("token_use"),
        )));
    }
    if let TokenUseCheck::Expect(expected) = check
        && claim != Some(expected.as_str())
    {
        return Err(VerifyError::invalid_claim(format!(
            "expected token_use {:?}, token has {claim:?}",
            expected.as_str(),
        )));
    }
    Ok(())
}

fn validate_scopes(payload: &JwtPayload, expected: &[String]) -> Result<()> {
    let granted = payload.scopes();
    if granted.iter().any(|scope| expected.iter().any(|e| e == scope)) {
        Ok(())
    } else {
        Err(VerifyError::invalid_claim(format!(
            "expected scope to include one of {expected:?}, token has {:?}",
            payload.get("scope"),
        )))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn payload(value: serde_json::Value) -> JwtPayload {
        match value {
            serde_json::Value::Object(map) => JwtPayload(map),
            _ => panic!("payload must be an object"),
        }
    }

    fn generic_config() -> EffectiveConfig {
        EffectiveConfig {
            issuer: "https://issuer.example".into(),
            audience: Some(ClaimCheck::eq("svc")),
            client_id: None,
            grace_seconds: 0,
            algorithms: None,
            custom_check: None,
            include_raw_jwt_in_errors: false,
            kind: IssuerKind::Generic,
        }
    }

    fn jwt_with(header: serde_json::Value, body: serde_json::Value) -> DecomposedJwt {
        use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
        let token = format!(
            "{}.{}.AA",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap()),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&body).unwrap()),
        );
        crate::jwt::decompose(&token).unwrap()
    }

    fn base_claims() -> serde_json::Value {
        json!({"iss": "https://issuer.example", "aud": "svc", "exp": NOW + 60})
    }

    #[test]
    fn test_valid_claims_pass() {
        let jwt = jwt_with(json!({"alg": "RS256"}), base_claims());
        assert!(validate_claims(&jwt, &generic_config(), NOW).is_ok());
    }

    #[test]
    fn test_wrong_issuer() {
        let mut claims = base_claims();
        claims["iss"] = json!("https://evil.example");
        let jwt = jwt_with(json!({"alg": "RS256"}), claims);
        assert!(matches!(
            validate_claims(&jwt, &generic_config(), NOW),
            Err(VerifyError::InvalidIssuer { .. })
        ));
    }

    #[test]
    fn test_missing_or_non_string_issuer() {
        let jwt = jwt_with(json!({"alg": "RS256"}), json!({"aud": "svc", "exp": NOW + 60}));
        assert!(matches!(
            validate_claims(&jwt, &generic_config(), NOW),
            Err(VerifyError::InvalidIssuer { .. })
        ));

        let mut claims = base_claims();
        claims["iss"] = json!(42);
        let jwt = jwt_with(json!({"alg": "RS256"}), claims);
        assert!(matches!(
            validate_claims(&jwt, &generic_config(), NOW),
            Err(VerifyError::InvalidIssuer { .. })
        ));
    }

    #[test]
    fn test_audience_list_semantics() {
        let mut cfg = generic_config();
        cfg.audience = Some(ClaimCheck::any_of(["a", "b"]));

        for (aud, ok) in [
            (json!("a"), true),
            (json!("b"), true),
            (json!(["b", "c"]), true),
            (json!("c"), false),
            (json!(["c", "d"]), false),
        ] {
            let mut claims = base_claims();
            claims["aud"] = aud.clone();
            let jwt = jwt_with(json!({"alg": "RS256"}), claims);
            let result = validate_claims(&jwt, &cfg, NOW);
            assert_eq!(result.is_ok(), ok, "aud {aud:?} expected ok={ok}, got {result:?}");
            if !ok {
                assert!(matches!(result, Err(VerifyError::InvalidAudience { .. })));
            }
        }
    }

    #[test]
    fn test_audience_missing_or_wrongly_typed() {
        let mut claims = base_claims();
        claims.as_object_mut().unwrap().remove("aud");
        let jwt = jwt_with(json!({"alg": "RS256"}), claims);
        assert!(matches!(
            validate_claims(&jwt, &generic_config(), NOW),
            Err(VerifyError::InvalidAudience { .. })
        ));

        let mut claims = base_claims();
        claims["aud"] = json!(17);
        let jwt = jwt_with(json!({"alg": "RS256"}), claims);
        assert!(matches!(
            validate_claims(&jwt, &generic_config(), NOW),
            Err(VerifyError::InvalidAudience { .. })
        ));
    }

    #[test]
    fn test_audience_check_disabled() {
        let mut cfg = generic_config();
        cfg.audience = Some(ClaimCheck::Disabled);
        let mut claims = base_claims();
        claims.as_object_mut().unwrap().remove("aud");
        let jwt = jwt_with(json!({"alg": "RS256"}), claims);
        assert!(validate_claims(&jwt, &cfg, NOW).is_ok());
    }

    #[test]
    fn test_generic_client_id_claim() {
        let mut cfg = generic_config();
        cfg.audience = None;
        cfg.client_id = Some(ClaimCheck::eq("client-1"));

        let mut claims = base_claims();
        claims["client_id"] = json!("client-1");
        let jwt = jwt_with(json!({"alg": "RS256"}), claims);
        assert!(validate_claims(&jwt, &cfg, NOW).is_ok());

        let mut claims = base_claims();
        claims["client_id"] = json!("other");
        let jwt = jwt_with(json!({"alg": "RS256"}), claims);
        assert!(matches!(
            validate_claims(&jwt, &cfg, NOW),
            Err(VerifyError::InvalidClaim { .. })
        ));
    }

    #[test]
    fn test_expiration_grace_boundary() {
        let mut cfg = generic_config();
        cfg.grace_seconds = 5;

        let mut claims = base_claims();
        claims["exp"] = json!(NOW - 5);
        let jwt = jwt_with(json!({"alg": "RS256"}), claims);
        assert!(validate_claims(&jwt, &cfg, NOW).is_ok(), "exp = now - grace must verify");

        let mut claims = base_claims();
        claims["exp"] = json!(NOW - 6);
        let jwt = jwt_with(json!({"alg": "RS256"}), claims);
        assert!(matches!(
            validate_claims(&jwt, &cfg, NOW),
            Err(VerifyError::Expired { .. })
        ));
    }

    #[test]
    fn test_expiration_required_and_numeric() {
        let mut claims = base_claims();
        claims.as_object_mut().unwrap().remove("exp");
        let jwt = jwt_with(json!({"alg": "RS256"}), claims);
        assert!(matches!(
            validate_claims(&jwt, &generic_config(), NOW),
            Err(VerifyError::InvalidClaim { .. })
        ));

        let mut claims = base_claims();
        claims["exp"] = json!("tomorrow");
        let jwt = jwt_with(json!({"alg": "RS256"}), claims);
        assert!(matches!(
            validate_claims(&jwt, &generic_config(), NOW),
            Err(VerifyError::InvalidClaim { .. })
        ));
    }

    #[test]
    fn test_not_before_grace_boundary() {
        let mut cfg = generic_config();
        cfg.grace_seconds = 5;

        let mut claims = base_claims();
        claims["nbf"] = json!(NOW + 5);
        let jwt = jwt_with(json!({"alg": "RS256"}), claims);
        assert!(validate_claims(&jwt, &cfg, NOW).is_ok(), "nbf = now + grace must verify");

        let mut claims = base_claims();
        claims["nbf"] = json!(NOW + 6);
        let jwt = jwt_with(json!({"alg": "RS256"}), claims);
        assert!(matches!(
            validate_claims(&jwt, &cfg, NOW),
            Err(VerifyError::NotBefore { .. })
        ));
    }

    #[test]
    fn test_cognito_id_token_client_in_aud() {
        let mut cfg = generic_config();
        cfg.audience = None;
        cfg.client_id = Some(ClaimCheck::eq("client-1"));
        cfg.kind = IssuerKind::Cognito {
            token_use: Some(TokenUseCheck::Expect(TokenUse::Id)),
            scopes: None,
        };

        let mut claims = base_claims();
        claims["aud"] = json!("client-1");
        claims["token_use"] = json!("id");
        let jwt = jwt_with(json!({"alg": "RS256"}), claims);
        assert!(validate_claims(&jwt, &cfg, NOW).is_ok());
    }

    #[test]
    fn test_cognito_access_token_client_in_client_id() {
        let mut cfg = generic_config();
        cfg.audience = None;
        cfg.client_id = Some(ClaimCheck::eq("client-1"));
        cfg.kind = IssuerKind::Cognito {
            token_use: Some(TokenUseCheck::Expect(TokenUse::Access)),
            scopes: Some(vec!["orders/read".into()]),
        };

        let mut claims = base_claims();
        claims.as_object_mut().unwrap().remove("aud");
        claims["client_id"] = json!("client-1");
        claims["token_use"] = json!("access");
        claims["scope"] = json!("orders/read orders/write");
        let jwt = jwt_with(json!({"alg": "RS256"}), claims);
        assert!(validate_claims(&jwt, &cfg, NOW).is_ok());
    }

    #[test]
    fn test_cognito_token_use_mismatch() {
        let mut cfg = generic_config();
        cfg.audience = None;
        cfg.client_id = Some(ClaimCheck::Disabled);
        cfg.kind = IssuerKind::Cognito {
            token_use: Some(TokenUseCheck::Expect(TokenUse::Id)),
            scopes: None,
        };

        let mut claims = base_claims();
        claims["token_use"] = json!("access");
        claims["client_id"] = json!("client-1");
        let jwt = jwt_with(json!({"alg": "RS256"}), claims);
        assert!(matches!(
            validate_claims(&jwt, &cfg, NOW),
            Err(VerifyError::InvalidClaim { .. })
        ));
    }

    #[test]
    fn test_cognito_token_use_must_be_known() {
        let mut cfg = generic_config();
        cfg.audience = None;
        cfg.client_id = Some(ClaimCheck::Disabled);
        cfg.kind = IssuerKind::Cognito { token_use: Some(TokenUseCheck::Disabled), scopes: None };

        let mut claims = base_claims();
        claims["token_use"] = json!("refresh");
        let jwt = jwt_with(json!({"alg": "RS256"}), claims);
        assert!(matches!(
            validate_claims(&jwt, &cfg, NOW),
            Err(VerifyError::InvalidClaim { .. })
        ));
    }

    #[test]
    fn test_cognito_scope_intersection() {
        let mut cfg = generic_config();
        cfg.audience = None;
        cfg.client_id = Some(ClaimCheck::Disabled);
        cfg.kind = IssuerKind::Cognito {
            token_use: Some(TokenUseCheck::Disabled),
            scopes: Some(vec!["a".into(), "b".into()]),
        };

        let mut claims = base_claims();
        claims["token_use"] = json!("access");
        claims["scope"] = json!("c d");
        let jwt = jwt_with(json!({"alg": "RS256"}), claims);
        assert!(matches!(
            validate_claims(&jwt, &cfg, NOW),
            Err(VerifyError::InvalidClaim { .. })
        ));
    }

    #[test]
    fn test_alb_signer_and_client_headers() {
        let mut cfg = generic_config();
        cfg.audience = None;
        cfg.client_id = Some(ClaimCheck::eq("client-xyz"));
        cfg.kind = IssuerKind::Alb { alb_arn: Some(ClaimCheck::eq("arn:aws:elb/alb1")) };

        let ok = jwt_with(
            json!({"alg": "ES256", "signer": "arn:aws:elb/alb1", "client": "client-xyz"}),
            base_claims(),
        );
        assert!(validate_claims(&ok, &cfg, NOW).is_ok());

        let wrong_signer = jwt_with(
            json!({"alg": "ES256", "signer": "arn:aws:elb/other", "client": "client-xyz"}),
            base_claims(),
        );
        assert!(matches!(
            validate_claims(&wrong_signer, &cfg, NOW),
            Err(VerifyError::InvalidClaim { .. })
        ));

        let wrong_client = jwt_with(
            json!({"alg": "ES256", "signer": "arn:aws:elb/alb1", "client": "intruder"}),
            base_claims(),
        );
        assert!(matches!(
            validate_claims(&wrong_client, &cfg, NOW),
            Err(VerifyError::InvalidClaim { .. })
        ));
    }

    #[test]
    fn test_claim_check_helpers() {
        let check = ClaimCheck::any_of(["a", "b"]);
        assert!(check.accepts(Some("a")));
        assert!(!check.accepts(Some("c")));
        assert!(!check.accepts(None));
        assert!(check.accepts_any(&["x", "b"]));
        assert!(!check.accepts_any(&[]));

        assert!(ClaimCheck::Disabled.accepts(None));
        assert!(ClaimCheck::Disabled.accepts_any(&[]));
    }
}
