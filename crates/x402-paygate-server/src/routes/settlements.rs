use actix_web::{web, HttpResponse};
use x402::SettlementStatus;

use crate::error::GatewayError;
use crate::state::AppState;

/// GET /settlements/{id} - read-only status poll
///
/// Overdue pending records are failed before being returned, so a client
/// polling past the deadline always sees a terminal status.
pub async fn get_settlement(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let settlement_id = path.into_inner();
    let record = state
        .tracker()
        .poll(&settlement_id)?
        .ok_or_else(|| GatewayError::SettlementNotFound(settlement_id.clone()))?;

    let mut resp = HttpResponse::Ok();
    if record.status == SettlementStatus::Pending {
        resp.insert_header(("Retry-After", x402::DEFAULT_RETRY_AFTER_SECONDS.to_string()));
    }
    Ok(resp.json(record))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/settlements/{id}", web::get().to(get_settlement));
}
