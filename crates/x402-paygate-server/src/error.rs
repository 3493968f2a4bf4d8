use actix_web::{HttpResponse, ResponseError};
use x402::X402Error;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Settlement store unreachable or corrupt. Access is never granted.
    #[error("settlement store unavailable: {0}")]
    StoreUnavailable(String),

    /// Unknown settlement id
    #[error("settlement not found: {0}")]
    SettlementNotFound(String),

    /// Required request parameter missing or invalid
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<X402Error> for GatewayError {
    fn from(e: X402Error) -> Self {
        match e {
            X402Error::StoreError(msg) => GatewayError::StoreUnavailable(msg),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl ResponseError for GatewayError {
    fn error_response(&self) -> HttpResponse {
        match self {
            GatewayError::StoreUnavailable(msg) => {
                tracing::error!("Settlement store failure: {}", msg);
                HttpResponse::ServiceUnavailable()
                    .insert_header(("Retry-After", "5"))
                    .json(serde_json::json!({
                        "error": "service_unavailable",
                        "message": "Payment verification is temporarily unavailable"
                    }))
            }
            GatewayError::SettlementNotFound(id) => {
                HttpResponse::NotFound().json(serde_json::json!({
                    "error": "settlement_not_found",
                    "message": format!("Settlement '{}' not found", id)
                }))
            }
            GatewayError::BadRequest(msg) => HttpResponse::BadRequest().json(serde_json::json!({
                "error": msg
            })),
            GatewayError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An internal error occurred"
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;
    use actix_web::http::StatusCode;

    #[actix_rt::test]
    async fn test_store_failure_is_503_without_details() {
        let err = GatewayError::from(X402Error::StoreError("disk I/O error at /var/db".into()));
        let resp = err.error_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = to_bytes(resp.into_body()).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("/var/db"));
        assert!(text.contains("service_unavailable"));
    }

    #[test]
    fn test_other_core_errors_are_internal() {
        let err = GatewayError::from(X402Error::ConfigError("bad price".into()));
        assert_eq!(
            err.error_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_missing_token_is_400() {
        let err = GatewayError::BadRequest("Token address required".into());
        assert_eq!(err.error_response().status(), StatusCode::BAD_REQUEST);
    }
}
