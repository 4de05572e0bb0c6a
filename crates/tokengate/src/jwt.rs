//! JWT decomposition and typed views over header and payload.
//!
//! [`decompose`] splits a compact-serialization token into its three
//! segments, base64url-decodes them, and JSON-parses header and payload.
//! The original base64url segments are retained because the signature is
//! computed over `header_b64.payload_b64`, and the raw signature bytes are
//! kept unvalidated — per-algorithm length rules live in the signature
//! dispatcher.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, VerifyError};

/// A parsed JSON object (header extras, payload claims).
pub type JsonObject = Map<String, Value>;

/// Typed view over a JWT header.
///
/// `alg` is the only mandatory field. The ALB-specific `signer` and
/// `client` header claims are surfaced here because the ALB verifier
/// validates them; everything else lands in `extra`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JwtHeader {
    /// Signature algorithm, e.g. `RS256`. Always a non-empty string.
    pub alg: String,
    /// Key ID selecting the JWK to verify against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Token type, usually `JWT`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    /// ALB only: ARN of the load balancer that signed the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<String>,
    /// ALB only: OIDC client ID the load balancer authenticated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    /// Unrecognized header fields, retained as-is.
    #[serde(flatten)]
    pub extra: JsonObject,
}

impl JwtHeader {
    /// The `kid`, if present as a non-empty string.
    #[must_use]
    pub fn valid_kid(&self) -> Option<&str> {
        self.kid.as_deref().filter(|kid| !kid.is_empty())
    }
}

/// The payload (claims set) of a JWT.
///
/// Deliberately loosely typed: claim-validation rules decide which type
/// mismatches are claim errors rather than parse errors, so the payload is
/// kept as the raw JSON object with typed accessors on top. Unknown claims
/// are preserved and returned to the caller on success.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JwtPayload(pub JsonObject);

impl JwtPayload {
    /// Raw claim lookup.
    #[must_use]
    pub fn get(&self, claim: &str) -> Option<&Value> {
        self.0.get(claim)
    }

    /// A claim as `&str`, if present and a string.
    #[must_use]
    pub fn str_claim(&self, claim: &str) -> Option<&str> {
        self.get(claim).and_then(Value::as_str)
    }

    /// A claim as seconds-since-epoch, if present and an integer.
    #[must_use]
    pub fn num_claim(&self, claim: &str) -> Option<i64> {
        self.get(claim).and_then(Value::as_i64)
    }

    /// The `iss` claim.
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.str_claim("iss")
    }

    /// The `aud` claim values. A string audience yields one element; an
    /// array audience yields its string elements. `None` if the claim is
    /// absent or of a non-string, non-array type.
    #[must_use]
    pub fn audiences(&self) -> Option<Vec<&str>> {
        match self.get("aud")? {
            Value::String(aud) => Some(vec![aud.as_str()]),
            Value::Array(entries) => {
                Some(entries.iter().filter_map(Value::as_str).collect())
            },
            _ => None,
        }
    }

    /// The `exp` claim (seconds since epoch).
    #[must_use]
    pub fn expiration(&self) -> Option<i64> {
        self.num_claim("exp")
    }

    /// The `nbf` claim (seconds since epoch).
    #[must_use]
    pub fn not_before(&self) -> Option<i64> {
        self.num_claim("nbf")
    }

    /// The Cognito `token_use` claim (`"id"` or `"access"`).
    #[must_use]
    pub fn token_use(&self) -> Option<&str> {
        self.str_claim("token_use")
    }

    /// The `client_id` claim (Cognito access tokens).
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.str_claim("client_id")
    }

    /// The `scope` claim split on whitespace.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.str_claim("scope").map(|s| s.split_whitespace().collect()).unwrap_or_default()
    }
}

/// A JWT decomposed into its three segments.
///
/// `header_b64` and `payload_b64` are the original base64url segments; the
/// signed input is `{header_b64}.{payload_b64}` and recomposing
/// `{header_b64}.{payload_b64}.{base64url(signature)}` yields the original
/// token.
#[derive(Clone, Debug, PartialEq)]
pub struct DecomposedJwt {
    /// Parsed header.
    pub header: JwtHeader,
    /// Parsed payload (claims set).
    pub payload: JwtPayload,
    /// Raw signature bytes. Length is validated per algorithm by the
    /// signature dispatcher, not here.
    pub signature: Vec<u8>,
    /// Original base64url header segment.
    pub header_b64: String,
    /// Original base64url payload segment.
    pub payload_b64: String,
}

impl DecomposedJwt {
    /// The byte string the signature was computed over.
    #[must_use]
    pub fn signed_input(&self) -> String {
        format!("{}.{}", self.header_b64, self.payload_b64)
    }
}

/// Decompose a compact-serialization JWT.
///
/// # Errors
///
/// Returns [`VerifyError::JwtParse`] if the token does not consist of
/// exactly three non-empty dot-separated parts, a part is not valid
/// base64url, header or payload is not a JSON object, or the header `alg`
/// is missing, not a string, or empty.
pub fn decompose(token: &str) -> Result<DecomposedJwt> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(VerifyError::parse("token must consist of 3 parts separated by dots"));
    };
    if header_b64.is_empty() || payload_b64.is_empty() || signature_b64.is_empty() {
        return Err(VerifyError::parse("token parts must not be empty"));
    }

    let header = decode_json_object(header_b64, "header")?;
    let header: JwtHeader = serde_json::from_value(Value::Object(header))
        .map_err(|e| VerifyError::parse(format!("invalid header: {e}")))?;
    if header.alg.is_empty() {
        return Err(VerifyError::parse("header alg claim must not be empty"));
    }

    let payload = JwtPayload(decode_json_object(payload_b64, "payload")?);

    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|e| VerifyError::parse(format!("signature is not valid base64url: {e}")))?;

    Ok(DecomposedJwt {
        header,
        payload,
        signature,
        header_b64: header_b64.to_owned(),
        payload_b64: payload_b64.to_owned(),
    })
}

fn decode_json_object(segment: &str, part: &str) -> Result<JsonObject> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| VerifyError::parse(format!("{part} is not valid base64url: {e}")))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| VerifyError::parse(format!("{part} is not valid JSON: {e}")))?;
    match value {
        Value::Object(object) => Ok(object),
        _ => Err(VerifyError::parse(format!("{part} is not a JSON object"))),
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
    use serde_json::json;

    /// A structurally valid token with a throwaway signature.
    pub(crate) fn minimal_token() -> String {
        let header = URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(&json!({"alg": "RS256", "kid": "k1"})).expect("json"));
        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&json!({"iss": "https://issuer.example", "aud": "svc"}))
                .expect("json"),
        );
        let signature = URL_SAFE_NO_PAD.encode(b"sig");
        format!("{header}.{payload}.{signature}")
    }
}
