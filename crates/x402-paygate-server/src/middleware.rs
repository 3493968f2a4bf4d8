use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, ResponseError};
use alloy::primitives::Address;
use x402::{
    PaymentReceipt, PaymentRequiredBody, PaymentRequirementsDocument, VerificationResult,
    PAYMENT_HEADER, PAYMENT_RESPONSE_HEADER,
};

use crate::error::GatewayError;
use crate::metrics::{REQUESTS_TOTAL, STORE_FAILURES, VERIFICATIONS_TOTAL, VERIFICATION_LATENCY};
use crate::state::AppState;

/// Access granted for one request.
#[derive(Debug, Clone)]
pub struct PaymentGrant {
    pub settlement_id: String,
    pub payer: Address,
    /// Value for the `X-Payment-Response` header
    pub receipt: String,
}

/// True when the request carries an `X-Payment` header at all.
pub fn has_payment_header(req: &HttpRequest) -> bool {
    req.headers().contains_key(PAYMENT_HEADER)
}

/// Initial 402: the requirements document in the body and echoed as JSON in
/// `X-Payment-Response`.
pub fn payment_required_response(document: PaymentRequirementsDocument) -> HttpResponse {
    let mut resp = HttpResponse::PaymentRequired();
    match document.to_header_value() {
        Ok(header) => {
            resp.insert_header((PAYMENT_RESPONSE_HEADER, header));
        }
        Err(e) => tracing::warn!("failed to encode requirements header: {}", e),
    }
    resp.json(PaymentRequiredBody::new(document))
}

/// Gate a request behind payment for its path.
///
/// Returns `Ok(None)` when the path has no price, `Ok(Some(grant))` when the
/// payment was accepted, or `Err(response)` to return to the client as is.
pub fn require_payment(
    req: &HttpRequest,
    state: &AppState,
) -> Result<Option<PaymentGrant>, HttpResponse> {
    let path = req.path();
    if !state.publisher.is_priced(path) {
        return Ok(None);
    }
    // Matched route pattern, not the raw path, to bound label cardinality
    let endpoint = req.match_pattern().unwrap_or_else(|| "unknown".to_string());
    let count = |status: StatusCode| {
        REQUESTS_TOTAL
            .with_label_values(&[endpoint.as_str(), status.as_str()])
            .inc();
    };

    let document = state
        .publisher
        .build_requirements(path)
        .map_err(|e| GatewayError::from(e).error_response())?;

    let Some(raw) = req.headers().get(PAYMENT_HEADER) else {
        count(StatusCode::PAYMENT_REQUIRED);
        return Err(payment_required_response(document));
    };
    // Non-ASCII header bytes decode as nothing and are rejected as malformed.
    let header = raw.to_str().unwrap_or("");

    let timer = VERIFICATION_LATENCY.start_timer();
    let verified = state.verifier.verify_header(header, &document);
    timer.observe_duration();

    let (proof, result) = match verified {
        Ok(v) => v,
        Err(e) => {
            STORE_FAILURES.inc();
            VERIFICATIONS_TOTAL.with_label_values(&["store_error"]).inc();
            let resp = GatewayError::from(e).error_response();
            count(resp.status());
            return Err(resp);
        }
    };
    VERIFICATIONS_TOTAL
        .with_label_values(&[result.label()])
        .inc();

    match result {
        VerificationResult::Accepted {
            settlement_id,
            payer,
        } => {
            let network = proof
                .map(|p| p.network)
                .unwrap_or_else(|| state.config.network.clone());
            // The settlement is already redeemed; a failed lookup only costs
            // the receipt its transaction hash.
            let transaction = match state.tracker().lookup(&settlement_id) {
                Ok(record) => record.and_then(|r| r.transaction),
                Err(e) => {
                    STORE_FAILURES.inc();
                    tracing::warn!(
                        settlement_id = %settlement_id,
                        error = %e,
                        "settlement lookup for receipt failed"
                    );
                    None
                }
            };
            let receipt = PaymentReceipt {
                success: true,
                settlement_id: settlement_id.clone(),
                network,
                payer,
                transaction,
            }
            .to_header_value(state.receipt_key.as_deref())
            .map_err(|e| GatewayError::from(e).error_response())?;
            count(StatusCode::OK);
            Ok(Some(PaymentGrant {
                settlement_id,
                payer,
                receipt,
            }))
        }
        VerificationResult::Rejected { reason, detail } => {
            let status =
                StatusCode::from_u16(reason.http_status()).unwrap_or(StatusCode::PAYMENT_REQUIRED);
            count(status);
            let mut body = PaymentRequiredBody::new(document);
            body.error = "Payment Rejected".to_string();
            body.reason = Some(reason.code().to_string());
            body.message = Some(detail);
            Err(HttpResponse::build(status).json(body))
        }
        VerificationResult::Pending {
            settlement_id,
            retry_after,
        } => {
            count(StatusCode::PAYMENT_REQUIRED);
            let mut body = PaymentRequiredBody::new(document);
            body.error = "Payment Pending".to_string();
            body.message = Some("Settlement is awaiting on-chain confirmation".to_string());
            body.settlement_id = Some(settlement_id);
            Err(HttpResponse::PaymentRequired()
                .insert_header(("Retry-After", retry_after.to_string()))
                .json(body))
        }
    }
}
