use chatmux_config::{CorsConfig, Wildcard};
use http::Method;
use http::header::HeaderName;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

/// Build a Tower CORS layer from configuration
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let mut layer = CorsLayer::new();

    layer = match &config.origins {
        Wildcard::Any => layer.allow_origin(AllowOrigin::any()),
        Wildcard::List(origins) => {
            let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            layer.allow_origin(origins)
        }
    };

    layer = match &config.methods {
        Wildcard::Any => layer.allow_methods(AllowMethods::any()),
        Wildcard::List(methods) => {
            let methods: Vec<Method> = methods.iter().filter_map(|m| m.parse().ok()).collect();
            layer.allow_methods(methods)
        }
    };

    layer = match &config.headers {
        Wildcard::Any => layer.allow_headers(AllowHeaders::any()),
        Wildcard::List(headers) => {
            let headers: Vec<HeaderName> = headers.iter().filter_map(|h| h.parse().ok()).collect();
            layer.allow_headers(headers)
        }
    };

    // Let browser clients see the truncation flag and retry hints
    layer = layer.expose_headers([
        HeaderName::from_static("x-context-truncated"),
        http::header::RETRY_AFTER,
    ]);

    if let Some(duration) = config.max_age_duration() {
        layer = layer.max_age(duration);
    }

    layer
}
