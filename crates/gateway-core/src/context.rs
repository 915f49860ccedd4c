//! Per-request caller identity and feature flags.
//!
//! `RequestContext` is built once at the transport layer (from the
//! bearer token or verified JWT claims plus request headers) and then
//! passed by value down through every pipeline stage.

use std::collections::HashMap;

use serde_json::Value;

/// Caller role, established by which token authenticated the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Bypasses the allowlist gate entirely (still subject to RLS).
    Admin,
    /// Subject to both the allowlist gate and RLS.
    Client,
}

/// Where the statement should be dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Route through the operation queue to the embedded storage executor.
    Internal,
    /// Route to the configured external adapter (Postgres/MySQL/remote SQLite).
    External,
}

impl Source {
    /// Parse the `X-Starbase-Source` header value, defaulting to `Internal`.
    #[must_use]
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some("external") => Self::External,
            _ => Self::Internal,
        }
    }
}

/// Caller identity and per-request feature flags threaded through the pipeline.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Caller role determined by which bearer token matched.
    pub role: Role,
    /// Verified claims (from the admin/client token config or a JWT).
    pub claims: HashMap<String, Value>,
    /// Whether this statement should run against the embedded store or an external adapter.
    pub source: Source,
    /// Whether cache lookup/store should be attempted for this request (`X-Starbase-Cache`).
    pub cache: bool,
}

impl RequestContext {
    /// Construct a context for an admin-authenticated request.
    #[must_use]
    pub fn admin(source: Source, cache: bool) -> Self {
        Self { role: Role::Admin, claims: HashMap::new(), source, cache }
    }

    /// Construct a context for a client-authenticated request with the given claims.
    #[must_use]
    pub fn client(claims: HashMap<String, Value>, source: Source, cache: bool) -> Self {
        Self { role: Role::Client, claims, source, cache }
    }

    /// Resolve `context.<key>()` references used in RLS policy values.
    ///
    /// `context.id()` is a special case that maps to the `sub` claim.
    #[must_use]
    pub fn resolve_claim(&self, key: &str) -> Option<&Value> {
        if key == "id" {
            self.claims.get("sub")
        } else {
            self.claims.get(key)
        }
    }

    /// True when this context is allowed to bypass the allowlist gate.
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_context_bypasses_allowlist() {
        let ctx = RequestContext::admin(Source::Internal, true);
        assert!(ctx.is_admin());
    }

    #[test]
    fn id_resolves_to_sub_claim() {
        let mut claims = HashMap::new();
        claims.insert("sub".to_string(), Value::String("user-42".to_string()));
        let ctx = RequestContext::client(claims, Source::External, false);
        assert_eq!(ctx.resolve_claim("id"), Some(&Value::String("user-42".to_string())));
    }

    #[test]
    fn source_from_header_defaults_internal() {
        assert_eq!(Source::from_header(None), Source::Internal);
        assert_eq!(Source::from_header(Some("external")), Source::External);
        assert_eq!(Source::from_header(Some("bogus")), Source::Internal);
    }
}
