//! HTTP client for a remote facilitator's `/settle` endpoint.
//!
//! The gateway never talks to the chain itself: confirmation of
//! `exact-onchain` settlements is delegated to the facilitator.

use std::time::Duration;

use serde::Serialize;

use crate::confirmation::{ConfirmationSource, ConfirmationStatus};
use crate::response::SettleResponse;
use crate::tracker::SettlementRecord;
use crate::X402Error;

/// Body posted to `{facilitator}/settle`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SettleRequest<'a> {
    settlement_id: &'a str,
    scheme: &'a str,
    network: &'a str,
    payer: alloy::primitives::Address,
    pay_to: alloy::primitives::Address,
    amount: &'a str,
    reference: alloy::primitives::FixedBytes<32>,
    resource: &'a str,
}

/// Facilitator-backed [`ConfirmationSource`].
#[derive(Clone)]
pub struct FacilitatorClient {
    http: reqwest::Client,
    settle_url: String,
    hmac_secret: Option<Vec<u8>>,
}

impl FacilitatorClient {
    pub fn new(facilitator_url: &str, hmac_secret: Option<Vec<u8>>) -> Result<Self, X402Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| X402Error::HttpError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_http_client(http, facilitator_url, hmac_secret))
    }

    pub fn with_http_client(
        http: reqwest::Client,
        facilitator_url: &str,
        hmac_secret: Option<Vec<u8>>,
    ) -> Self {
        Self {
            http,
            settle_url: format!("{}/settle", facilitator_url.trim_end_matches('/')),
            hmac_secret,
        }
    }

    /// POST the settlement to the facilitator, signing the body with HMAC
    /// when a shared secret is configured.
    pub async fn settle(&self, record: &SettlementRecord) -> Result<SettleResponse, X402Error> {
        let body = SettleRequest {
            settlement_id: &record.settlement_id,
            scheme: &record.scheme,
            network: &record.network,
            payer: record.payer,
            pay_to: record.recipient,
            amount: &record.amount,
            reference: record.reference,
            resource: &record.resource,
        };
        let body_bytes = serde_json::to_vec(&body)?;

        let mut request = self
            .http
            .post(&self.settle_url)
            .header("Content-Type", "application/json");
        if let Some(secret) = &self.hmac_secret {
            let sig = crate::hmac::compute_hmac(secret, &body_bytes);
            request = request.header("X-Facilitator-Auth", sig);
        }

        let resp = request
            .body(body_bytes)
            .send()
            .await
            .map_err(|e| X402Error::HttpError(format!("facilitator request failed: {e}")))?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(X402Error::HttpError(
                "facilitator authentication failed".to_string(),
            ));
        }
        if resp.status().is_server_error() {
            return Err(X402Error::HttpError(format!(
                "facilitator returned {}",
                resp.status()
            )));
        }

        resp.json::<SettleResponse>()
            .await
            .map_err(|e| X402Error::HttpError(format!("facilitator response parse failed: {e}")))
    }
}

/// Map a facilitator answer onto a confirmation status.
pub fn interpret_settle_response(resp: SettleResponse) -> ConfirmationStatus {
    if resp.success && !resp.pending {
        return ConfirmationStatus::Confirmed {
            transaction: resp.transaction,
        };
    }
    match resp.error_reason {
        Some(reason) if !resp.pending => ConfirmationStatus::Rejected { reason },
        _ => ConfirmationStatus::Unknown,
    }
}

impl ConfirmationSource for FacilitatorClient {
    async fn check(&self, record: &SettlementRecord) -> Result<ConfirmationStatus, X402Error> {
        let resp = self.settle(record).await?;
        Ok(interpret_settle_response(resp))
    }
}

impl std::fmt::Debug for FacilitatorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacilitatorClient")
            .field("settle_url", &self.settle_url)
            .field("hmac_secret", &self.hmac_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
