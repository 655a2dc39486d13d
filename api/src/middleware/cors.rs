use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;

/// Build a CORS layer from a comma-separated origin list
/// (`TRAX_CORS_ORIGINS`, default `http://localhost:3000`).
///
/// - Methods: GET, POST, OPTIONS
/// - Headers: Authorization, Content-Type
/// - Credentials: allowed
/// - Max age: 3600s
pub fn build_cors_layer(origins_csv: &str) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(parse_origins(origins_csv))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("authorization"),
            HeaderName::from_static("content-type"),
        ])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600))
}

fn parse_origins(origins_csv: &str) -> Vec<HeaderValue> {
    let mut seen: Vec<String> = Vec::new();
    for origin in origins_csv.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !seen.iter().any(|existing| existing.eq_ignore_ascii_case(origin)) {
            seen.push(origin.to_string());
        }
    }
    seen.into_iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring unparsable CORS origin");
                None
            }
        })
        .collect()
}
