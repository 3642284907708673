//! JWT issuance, verification and unverified decoding.
//!
//! Built on `jsonwebtoken` for the signature layer; claim validation is done
//! here so error codes and metadata stay under this crate's control. The
//! `secureData` claim is encrypted at issuance with a key derived from the
//! signing secret (or an explicit encryption key) and the token's `jti`.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use error_types::{codes, AuthError, AuthResult};

use crate::{config, scope, ttl};

pub fn is_rsa(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512
    )
}

/// Audience claim: a single permission string or an ordered sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Audience::One(value) => vec![value.clone()],
            Audience::Many(values) => values.clone(),
        }
    }
}

impl From<Vec<String>> for Audience {
    fn from(values: Vec<String>) -> Self {
        Audience::Many(values)
    }
}

/// Token claims: the reserved fields plus an open extension map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(rename = "rateLimit", skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    /// Opaque application data; ciphertext after issuance when encryption
    /// is active.
    #[serde(rename = "secureData", skip_serializing_if = "Option::is_none")]
    pub secure_data: Option<String>,
    /// On refresh tokens: the options used to mint the companion access
    /// token, so refresh alone can regenerate an equivalent pair.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    pub fn scope(&self) -> Vec<String> {
        self.aud.as_ref().map(Audience::to_vec).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Defaults to HS256.
    pub algorithm: Option<Algorithm>,
    /// TTL string or bare seconds; rejected when it parses to zero or less.
    pub expiration: Option<String>,
    pub kid: Option<String>,
    pub encryption_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    pub algorithm: Option<Algorithm>,
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub audience: Option<Vec<String>>,
    pub encryption_key: Option<String>,
}

/// Sign `claims` into a compact JWT.
///
/// `jti` is generated when absent and `iss` defaults to the configured
/// issuer, so every issued token is individually revocable and attributable.
pub fn create(mut claims: Claims, secret: &str, opts: &CreateOptions) -> AuthResult<String> {
    let algorithm = opts.algorithm.unwrap_or(Algorithm::HS256);

    let jti = claims
        .jti
        .get_or_insert_with(|| Uuid::new_v4().to_string())
        .clone();
    if claims.iss.is_none() {
        claims.iss = Some(config::default_jwt_issuer());
    }

    if let Some(raw) = &opts.expiration {
        let ttl = ttl::parse_ttl(raw)?;
        if ttl <= 0 {
            return Err(AuthError::internal(
                codes::INVALID_EXPIRATION,
                format!("Token expiration `{raw}` must be positive."),
            ));
        }
        claims.exp = Some(ttl::unix_now() + ttl);
    }

    if let Some(plaintext) = claims.secure_data.take() {
        if is_rsa(algorithm) && opts.encryption_key.is_none() {
            // The RSA signing key is not a shared secret, so there is
            // nothing to derive an encryption key from.
            tracing::warn!("dropping secureData: RSA tokens require an explicit encryption key");
        } else {
            let material = opts.encryption_key.as_deref().unwrap_or(secret);
            let key = crypto_core::aes::derive_key(material, &jti);
            let ciphertext = crypto_core::aes::encrypt(&key, &plaintext).map_err(|err| {
                AuthError::internal(
                    codes::SIGNING_ERROR,
                    format!("secureData encryption failed: {err}"),
                )
            })?;
            claims.secure_data = Some(ciphertext);
        }
    }

    let mut header = Header::new(algorithm);
    header.kid = opts.kid.clone();

    let encoding_key = encoding_key(algorithm, secret)?;
    jsonwebtoken::encode(&header, &claims, &encoding_key).map_err(|err| {
        AuthError::internal(codes::SIGNING_ERROR, format!("Failed to sign token: {err}"))
    })
}

/// Verify signature and claims, returning the decoded (and, when possible,
/// decrypted) payload.
pub fn verify(token: &str, secret: &str, opts: &VerifyOptions) -> AuthResult<Claims> {
    let algorithm = opts.algorithm.unwrap_or(Algorithm::HS256);
    let decoding_key = decoding_key(algorithm, secret)?;

    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data =
        jsonwebtoken::decode::<Claims>(token, &decoding_key, &validation).map_err(|err| {
            match err.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => AuthError::forbidden(
                    codes::INVALID_TOKEN_SIGNATURE,
                    "Token signature verification failed.",
                ),
                ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidKeyFormat => AuthError::internal(
                    codes::MISSING_KEY,
                    format!("Verification key is not usable: {err}"),
                ),
                _ => AuthError::forbidden(codes::INVALID_TOKEN, "The provided token is malformed."),
            }
        })?;
    let mut claims = data.claims;

    // Decryption failures are not fatal: the ciphertext stays in place and
    // downstream consumers decide what to do with it.
    if let Some(ciphertext) = claims.secure_data.clone() {
        let material = match (&opts.encryption_key, is_rsa(algorithm)) {
            (Some(key), _) => Some(key.as_str()),
            (None, false) => Some(secret),
            (None, true) => None,
        };
        if let (Some(material), Some(jti)) = (material, claims.jti.as_deref()) {
            let key = crypto_core::aes::derive_key(material, jti);
            match crypto_core::aes::decrypt(&key, &ciphertext) {
                Ok(plaintext) => claims.secure_data = Some(plaintext),
                Err(_) => {
                    tracing::warn!("failed to decrypt secureData; leaving ciphertext in place")
                }
            }
        }
    }

    if let Some(exp) = claims.exp {
        let now = ttl::unix_now();
        if now > exp {
            return Err(AuthError::forbidden(
                codes::EXPIRED_TOKEN,
                "The provided token has expired.",
            )
            .with_meta(json!({ "currentTime": now, "expirationTime": exp })));
        }
    }

    if let Some(expected) = opts.issuer.as_deref().filter(|iss| !iss.is_empty()) {
        if claims.iss.as_deref() != Some(expected) {
            return Err(AuthError::forbidden(
                codes::INVALID_TOKEN_ISSUER,
                format!("Token issuer is not `{expected}`."),
            ));
        }
    }

    if let Some(expected) = opts.audience.as_ref().filter(|aud| !aud.is_empty()) {
        let held = claims.scope();
        scope::validate(expected, &held)
            .map_err(|reason| AuthError::forbidden(codes::INVALID_TOKEN_PERMISSIONS, reason))?;
    }

    if let Some(expected) = opts.subject.as_deref().filter(|sub| !sub.is_empty()) {
        if claims.sub.as_deref() != Some(expected) {
            return Err(AuthError::forbidden(
                codes::INVALID_TOKEN_SUBJECT,
                format!("Token subject is not `{expected}`."),
            ));
        }
    }

    Ok(claims)
}

#[derive(Debug, Clone)]
pub struct DecodedToken {
    pub header: Header,
    pub claims: Claims,
    pub signature: String,
}

/// Decode without verification. Used to read `kid` before key selection and
/// to re-read already-validated tokens in downstream flows.
pub fn decode(token: &str) -> AuthResult<DecodedToken> {
    let mut segments = token.split('.');
    let (header, payload, signature) = match (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) {
        (Some(h), Some(p), Some(s), None) if !h.is_empty() && !p.is_empty() => (h, p, s),
        _ => return Err(malformed()),
    };

    let header: Header =
        serde_json::from_slice(&crypto_core::b64::decode_url(header).map_err(|_| malformed())?)
            .map_err(|_| malformed())?;
    let claims: Claims =
        serde_json::from_slice(&crypto_core::b64::decode_url(payload).map_err(|_| malformed())?)
            .map_err(|_| malformed())?;

    Ok(DecodedToken {
        header,
        claims,
        signature: signature.to_string(),
    })
}

fn malformed() -> AuthError {
    AuthError::forbidden(codes::INVALID_TOKEN, "The provided token is malformed.")
}

fn encoding_key(algorithm: Algorithm, secret: &str) -> AuthResult<EncodingKey> {
    if is_rsa(algorithm) {
        EncodingKey::from_rsa_pem(secret.as_bytes()).map_err(|err| {
            AuthError::internal(
                codes::MISSING_KEY,
                format!("RSA private key is not valid PEM: {err}"),
            )
        })
    } else {
        Ok(EncodingKey::from_secret(secret.as_bytes()))
    }
}

fn decoding_key(algorithm: Algorithm, secret: &str) -> AuthResult<DecodingKey> {
    if is_rsa(algorithm) {
        DecodingKey::from_rsa_pem(secret.as_bytes()).map_err(|err| {
            AuthError::internal(
                codes::MISSING_KEY,
                format!("RSA public key is not valid PEM: {err}"),
            )
        })
    } else {
        Ok(DecodingKey::from_secret(secret.as_bytes()))
    }
}
