//! CORS layer matching the exact preflight surface in spec §6.

use axum::http::{HeaderName, Method, header};
use tower_http::cors::{Any, CorsLayer};

/// Build the CORS layer: allow-origin `*`, `GET, POST, OPTIONS`, and the
/// four headers the gateway reads or accepts.
#[must_use]
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-starbase-source"),
            HeaderName::from_static("x-data-source"),
        ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_layer_builds() {
        let _layer = cors_layer();
    }
}
