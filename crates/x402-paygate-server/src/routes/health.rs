use actix_web::{web, HttpRequest, HttpResponse};

use crate::metrics::metrics_output;
use crate::state::AppState;

/// GET /health
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "protocol": "x402",
        "service": "x402-paygate",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /metrics - bearer-token gated unless X402_PUBLIC_METRICS is set
pub async fn metrics(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    match &state.config.metrics_token {
        Some(expected) => {
            let header = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok());
            if !x402::security::bearer_matches(header, expected.as_bytes()) {
                return HttpResponse::Unauthorized().json(serde_json::json!({
                    "error": "unauthorized",
                    "message": "Valid Bearer token required for /metrics"
                }));
            }
        }
        None if state.config.public_metrics => {}
        None => {
            return HttpResponse::NotFound().json(serde_json::json!({
                "error": "not_found",
                "message": "Metrics are disabled"
            }));
        }
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics_output())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics));
}
