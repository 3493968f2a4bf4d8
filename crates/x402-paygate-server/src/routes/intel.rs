use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use x402::PAYMENT_RESPONSE_HEADER;

use crate::error::GatewayError;
use crate::middleware::{has_payment_header, require_payment};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IntelQuery {
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAnalysis {
    pub risk_score: u8,
    pub risk_level: &'static str,
    pub sniper_count: u8,
    pub top10_holders_percent: u8,
}

impl TokenAnalysis {
    /// Placeholder scoring: random figures in the published ranges.
    fn sample() -> Self {
        let mut rng = rand::rng();
        let risk_score = rng.random_range(0..100u8);
        Self {
            risk_score,
            risk_level: risk_level(risk_score),
            sniper_count: rng.random_range(0..50u8),
            top10_holders_percent: rng.random_range(20..80u8),
        }
    }
}

fn risk_level(score: u8) -> &'static str {
    match score {
        0..=33 => "LOW",
        34..=66 => "MEDIUM",
        _ => "HIGH",
    }
}

/// GET|POST /api/intel?token=...
///
/// The token check runs before verification when a payment is attached, so
/// a request that could never be served does not consume the payment.
pub async fn intel(
    req: HttpRequest,
    query: web::Query<IntelQuery>,
    body: Option<web::Json<IntelQuery>>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let token = query
        .into_inner()
        .token
        .or_else(|| body.and_then(|b| b.into_inner().token))
        .filter(|t| !t.trim().is_empty());

    if token.is_none() && has_payment_header(&req) {
        return missing_token();
    }

    let grant = match require_payment(&req, &state) {
        Ok(grant) => grant,
        Err(resp) => return resp,
    };

    let Some(token) = token else {
        return missing_token();
    };

    let mut resp = HttpResponse::Ok();
    if let Some(grant) = grant {
        tracing::info!(
            settlement_id = %grant.settlement_id,
            payer = %grant.payer,
            "serving paid intel request"
        );
        resp.insert_header((PAYMENT_RESPONSE_HEADER, grant.receipt));
    }
    resp.json(serde_json::json!({
        "token": token,
        "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "analysis": TokenAnalysis::sample(),
    }))
}

fn missing_token() -> HttpResponse {
    GatewayError::BadRequest("Token address required".to_string()).error_response()
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/intel", web::get().to(intel))
        .route("/api/intel", web::post().to(intel));
}
