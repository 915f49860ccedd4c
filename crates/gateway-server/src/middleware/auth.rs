//! Bearer/JWT authentication middleware.
//!
//! Three credential shapes are accepted (spec §6): the static admin
//! token, the static client token, or a JWT verified against a remote
//! JWKS. Whichever matches determines the [`RequestContext`] handed to
//! every downstream handler.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use gateway_core::context::{RequestContext, Source};

use crate::jwt::JwtVerifier;

/// Shared state for the auth middleware.
#[derive(Clone)]
pub struct AuthState {
    admin_token: Arc<String>,
    client_token: Arc<String>,
    jwt: Option<Arc<JwtVerifier>>,
}

impl AuthState {
    /// Build auth state from the two static tokens and an optional JWT verifier.
    #[must_use]
    pub fn new(admin_token: String, client_token: String, jwt: Option<Arc<JwtVerifier>>) -> Self {
        Self { admin_token: Arc::new(admin_token), client_token: Arc::new(client_token), jwt }
    }

    /// Resolve a bearer token string into a [`RequestContext`], consulting
    /// the static tokens first and falling back to JWT verification.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Unauthenticated` if the token matches
    /// neither static token and either no JWT verifier is configured or
    /// verification fails.
    pub async fn authenticate(&self, token: &str, source: Source, cache: bool) -> gateway_error::Result<RequestContext> {
        if !self.admin_token.is_empty() && constant_time_compare(token, &self.admin_token) {
            return Ok(RequestContext::admin(source, cache));
        }
        if !self.client_token.is_empty() && constant_time_compare(token, &self.client_token) {
            return Ok(RequestContext::client(std::collections::HashMap::new(), source, cache));
        }
        if let Some(jwt) = &self.jwt {
            let claims = jwt.verify(token).await?;
            return Ok(RequestContext::client(claims, source, cache));
        }
        Err(gateway_error::GatewayError::unauthenticated("token matched neither static token nor a configured JWT issuer"))
    }
}

/// Authenticate an HTTP request, reading `Authorization`, `X-Starbase-Source`
/// and `X-Starbase-Cache`, and inject the resulting [`RequestContext`] as a
/// request extension for handlers to extract.
pub async fn auth_middleware(State(state): State<AuthState>, mut request: Request<Body>, next: Next) -> Response {
    let token = match bearer_token(&request) {
        Some(token) => token,
        None => {
            return (StatusCode::UNAUTHORIZED, [(header::WWW_AUTHENTICATE, "Bearer")], "missing Authorization header")
                .into_response();
        }
    };

    let source = Source::from_header(header_str(&request, "x-starbase-source"));
    let cache = header_str(&request, "x-starbase-cache") == Some("true");

    match state.authenticate(&token, source, cache).await {
        Ok(context) => {
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

fn bearer_token(request: &Request<Body>) -> Option<String> {
    let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::to_string)
}

fn header_str<'a>(request: &'a Request<Body>, name: &str) -> Option<&'a str> {
    request.headers().get(name)?.to_str().ok()
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AuthState {
        AuthState::new("admin-secret".to_string(), "client-secret".to_string(), None)
    }

    #[tokio::test]
    async fn admin_token_yields_admin_role() {
        let ctx = state().authenticate("admin-secret", Source::Internal, false).await.unwrap();
        assert!(ctx.is_admin());
    }

    #[tokio::test]
    async fn client_token_yields_client_role() {
        let ctx = state().authenticate("client-secret", Source::Internal, false).await.unwrap();
        assert!(!ctx.is_admin());
    }

    #[tokio::test]
    async fn unknown_token_without_jwt_is_rejected() {
        let err = state().authenticate("nope", Source::Internal, false).await.unwrap_err();
        assert!(matches!(err, gateway_error::GatewayError::Unauthenticated { .. }));
    }

    #[test]
    fn constant_time_compare_rejects_mismatched_lengths() {
        assert!(!constant_time_compare("short", "longer-token"));
    }
}
