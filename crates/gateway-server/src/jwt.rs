//! Bearer JWT verification against a remote JWKS URL (spec §6).
//!
//! Deliberately narrower than full OIDC discovery: the JWKS URL is
//! given directly in configuration rather than resolved from a
//! `.well-known/openid-configuration` document, because the gateway
//! has exactly one trusted issuer, not a pluggable provider list.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;

use gateway_error::{GatewayError, Result};

use crate::config::JwtConfig;

/// How long a fetched JWKS document is trusted before being refetched.
const JWKS_CACHE_TTL: Duration = Duration::from_secs(300);

/// One entry of a JSON Web Key Set.
#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kty: String,
    kid: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    alg: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

struct CachedJwks {
    jwks: Jwks,
    fetched_at: Instant,
}

impl CachedJwks {
    fn is_expired(&self) -> bool {
        self.fetched_at.elapsed() > JWKS_CACHE_TTL
    }
}

/// Verifies bearer tokens against a cached remote JWKS document.
pub struct JwtVerifier {
    config: JwtConfig,
    http: reqwest::Client,
    cache: RwLock<Option<CachedJwks>>,
}

impl JwtVerifier {
    /// Build a verifier from configuration. Performs no network I/O until
    /// the first token is verified.
    #[must_use]
    pub fn new(config: JwtConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            cache: RwLock::new(None),
        })
    }

    /// Verify `token`, returning its claims as a flat map for `RequestContext`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Unauthenticated` if the token is malformed,
    /// its signature does not verify, the `kid` is unknown, or the
    /// `aud`/`iss` claims do not match configuration.
    pub async fn verify(&self, token: &str) -> Result<HashMap<String, JsonValue>> {
        let header = decode_header(token)
            .map_err(|e| GatewayError::unauthenticated(format!("malformed JWT header: {e}")))?;
        let kid = header.kid.as_deref();

        let jwk = self.find_key(kid).await?;
        let decoding_key = jwk_to_decoding_key(&jwk)?;

        let mut validation = Validation::new(header.alg);
        if let Some(aud) = &self.config.audience {
            validation.set_audience(&[aud]);
        } else {
            validation.validate_aud = false;
        }
        if let Some(iss) = &self.config.issuer {
            validation.set_issuer(&[iss]);
        }

        let data = decode::<HashMap<String, JsonValue>>(token, &decoding_key, &validation)
            .map_err(|e| GatewayError::unauthenticated(format!("JWT verification failed: {e}")))?;
        Ok(data.claims)
    }

    async fn find_key(&self, kid: Option<&str>) -> Result<Jwk> {
        {
            let guard = self.cache.read().await;
            if let Some(cached) = guard.as_ref() {
                if !cached.is_expired() {
                    if let Some(jwk) = select_key(&cached.jwks, kid) {
                        return Ok(jwk);
                    }
                }
            }
        }

        let jwks = self.fetch_jwks().await?;
        let found = select_key(&jwks, kid)
            .ok_or_else(|| GatewayError::unauthenticated("no matching key in JWKS for token kid"))?;
        *self.cache.write().await = Some(CachedJwks { jwks, fetched_at: Instant::now() });
        Ok(found)
    }

    async fn fetch_jwks(&self) -> Result<Jwks> {
        let response = self
            .http
            .get(&self.config.jwks_url)
            .send()
            .await
            .map_err(|e| GatewayError::unauthenticated(format!("JWKS fetch failed: {e}")))?;
        response
            .json::<Jwks>()
            .await
            .map_err(|e| GatewayError::unauthenticated(format!("JWKS response was not valid: {e}")))
    }
}

fn select_key(jwks: &Jwks, kid: Option<&str>) -> Option<Jwk> {
    match kid {
        Some(kid) => jwks.keys.iter().find(|k| k.kid.as_deref() == Some(kid)).cloned(),
        None => jwks.keys.first().cloned(),
    }
}

fn jwk_to_decoding_key(jwk: &Jwk) -> Result<DecodingKey> {
    if jwk.kty != "RSA" {
        return Err(GatewayError::unauthenticated(format!("unsupported key type: {}", jwk.kty)));
    }
    let n = jwk.n.as_deref().ok_or_else(|| GatewayError::unauthenticated("JWK missing modulus"))?;
    let e = jwk.e.as_deref().ok_or_else(|| GatewayError::unauthenticated("JWK missing exponent"))?;
    DecodingKey::from_rsa_components(n, e).map_err(|e| GatewayError::unauthenticated(format!("invalid JWK: {e}")))
}

/// Algorithms accepted when a JWK carries no explicit `alg` hint.
#[allow(dead_code)]
const DEFAULT_ALGORITHMS: &[Algorithm] = &[Algorithm::RS256];
