use std::time::{Duration, Instant};

use alloy::primitives::FixedBytes;
use x402::{
    PaymentProof, PaymentReceipt, PaymentRequiredBody, PaymentRequirement, PaymentSigner,
    SettlementRecord, SettlementStatus, X402Error, PAYMENT_HEADER, PAYMENT_RESPONSE_HEADER,
    RECEIPT_KEY_PURPOSE, SCHEME_EXACT, SCHEME_EXACT_ONCHAIN,
};

const DEFAULT_MAX_SETTLEMENT_WAIT: Duration = Duration::from_secs(330);
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// HTTP client that pays for 402-gated resources.
///
/// On a 402 it picks a requirement matching its scheme, signs a proof with
/// the wrapped [`PaymentSigner`] and retries with an `X-Payment` header. A
/// `Payment Pending` answer is waited out by polling the gateway's
/// `/settlements/{id}` endpoint, then the same proof is presented again.
///
/// With a receipt secret configured, `X-Payment-Response` receipts must
/// carry a valid HMAC or the fetch fails.
pub struct X402Client {
    http: reqwest::Client,
    signer: PaymentSigner,
    max_settlement_wait: Duration,
    receipt_key: Option<Vec<u8>>,
}

impl X402Client {
    pub fn new(signer: PaymentSigner) -> Result<Self, X402Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| X402Error::HttpError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_http_client(signer, http))
    }

    /// Create a client with a custom reqwest::Client.
    pub fn with_http_client(signer: PaymentSigner, http: reqwest::Client) -> Self {
        Self {
            http,
            signer,
            max_settlement_wait: DEFAULT_MAX_SETTLEMENT_WAIT,
            receipt_key: None,
        }
    }

    /// Give up waiting on a pending settlement after `wait`.
    pub fn with_max_settlement_wait(mut self, wait: Duration) -> Self {
        self.max_settlement_wait = wait;
        self
    }

    /// Authenticate receipts with the gateway's `FACILITATOR_SHARED_SECRET`.
    pub fn with_receipt_secret(mut self, secret: &[u8]) -> Self {
        self.receipt_key = Some(x402::hmac::derive_key(secret, RECEIPT_KEY_PURPOSE));
        self
    }

    pub fn signer(&self) -> &PaymentSigner {
        &self.signer
    }

    /// Request `url`, paying with the `exact` scheme if asked to.
    pub async fn fetch(
        &self,
        url: &str,
        method: reqwest::Method,
    ) -> Result<(reqwest::Response, Option<PaymentReceipt>), X402Error> {
        self.fetch_with(url, method, SCHEME_EXACT, |req| self.signer.create_proof(req))
            .await
    }

    /// Request `url`, paying with an already broadcast `exact-onchain`
    /// transfer identified by `tx_hash`.
    pub async fn fetch_onchain(
        &self,
        url: &str,
        method: reqwest::Method,
        tx_hash: FixedBytes<32>,
    ) -> Result<(reqwest::Response, Option<PaymentReceipt>), X402Error> {
        self.fetch_with(url, method, SCHEME_EXACT_ONCHAIN, |req| {
            self.signer.create_onchain_proof(req, tx_hash)
        })
        .await
    }

    async fn fetch_with<F>(
        &self,
        url: &str,
        method: reqwest::Method,
        scheme: &str,
        make_proof: F,
    ) -> Result<(reqwest::Response, Option<PaymentReceipt>), X402Error>
    where
        F: FnOnce(&PaymentRequirement) -> Result<PaymentProof, X402Error>,
    {
        let resp = self
            .http
            .request(method.clone(), url)
            .send()
            .await
            .map_err(|e| X402Error::HttpError(format!("request failed: {e}")))?;

        if resp.status() != reqwest::StatusCode::PAYMENT_REQUIRED {
            return Ok((resp, None));
        }

        let body_402: PaymentRequiredBody = resp
            .json()
            .await
            .map_err(|e| X402Error::HttpError(format!("failed to parse 402 body: {e}")))?;
        let requirement = select_requirement(&body_402, scheme)?;
        tracing::info!(
            amount = %requirement.max_amount_required,
            network = %requirement.network,
            pay_to = %requirement.pay_to,
            "payment required"
        );

        let header = make_proof(requirement)?.encode_header()?;
        let started = Instant::now();

        loop {
            let resp = self
                .http
                .request(method.clone(), url)
                .header(PAYMENT_HEADER, &header)
                .send()
                .await
                .map_err(|e| X402Error::HttpError(format!("paid request failed: {e}")))?;

            if resp.status() != reqwest::StatusCode::PAYMENT_REQUIRED {
                let receipt = self.read_receipt(&resp)?;
                return Ok((resp, receipt));
            }

            let retry_after = retry_after(&resp);
            let body: PaymentRequiredBody = resp
                .json()
                .await
                .map_err(|e| X402Error::HttpError(format!("failed to parse 402 body: {e}")))?;

            let Some(settlement_id) = body.settlement_id else {
                return Err(X402Error::InvalidPayment(format!(
                    "payment rejected: {} ({})",
                    body.reason.unwrap_or_else(|| "unknown".to_string()),
                    body.message.unwrap_or_default()
                )));
            };

            let remaining = self
                .max_settlement_wait
                .checked_sub(started.elapsed())
                .ok_or_else(|| {
                    X402Error::HttpError(format!("settlement {settlement_id} still pending"))
                })?;
            tracing::info!(settlement_id = %settlement_id, "payment pending, waiting for confirmation");
            self.wait_for_settlement(url, &settlement_id, retry_after, remaining)
                .await?;
        }
    }

    fn read_receipt(
        &self,
        resp: &reqwest::Response,
    ) -> Result<Option<PaymentReceipt>, X402Error> {
        let Some(value) = resp
            .headers()
            .get(PAYMENT_RESPONSE_HEADER)
            .and_then(|v| v.to_str().ok())
        else {
            return Ok(None);
        };
        match &self.receipt_key {
            Some(key) => PaymentReceipt::from_signed_header_value(value, key).map(Some),
            None => Ok(PaymentReceipt::from_header_value(value).ok()),
        }
    }

    /// Poll `/settlements/{id}` on the gateway serving `resource_url` until
    /// the settlement leaves Pending.
    pub async fn wait_for_settlement(
        &self,
        resource_url: &str,
        settlement_id: &str,
        interval: Duration,
        max_wait: Duration,
    ) -> Result<SettlementRecord, X402Error> {
        let poll_url = settlement_url(resource_url, settlement_id)?;
        let interval = interval.max(MIN_POLL_INTERVAL);
        let deadline = Instant::now() + max_wait;

        loop {
            let resp = self
                .http
                .get(poll_url.as_str())
                .send()
                .await
                .map_err(|e| X402Error::HttpError(format!("settlement poll failed: {e}")))?;
            if !resp.status().is_success() {
                return Err(X402Error::HttpError(format!(
                    "settlement poll returned {}",
                    resp.status()
                )));
            }
            let record: SettlementRecord = resp
                .json()
                .await
                .map_err(|e| X402Error::HttpError(format!("invalid settlement record: {e}")))?;

            match record.status {
                SettlementStatus::Confirmed => return Ok(record),
                SettlementStatus::Failed => {
                    return Err(X402Error::InvalidPayment(format!(
                        "settlement {} failed: {}",
                        settlement_id,
                        record.failure_reason.as_deref().unwrap_or("unknown")
                    )))
                }
                SettlementStatus::Pending => {}
            }

            if Instant::now() + interval > deadline {
                return Err(X402Error::HttpError(format!(
                    "settlement {settlement_id} still pending"
                )));
            }
            tokio::time::sleep(interval).await;
        }
    }
}

/// First requirement in `accepts` using `scheme`.
pub fn select_requirement<'a>(
    body: &'a PaymentRequiredBody,
    scheme: &str,
) -> Result<&'a PaymentRequirement, X402Error> {
    body.document
        .accepts
        .iter()
        .find(|r| r.scheme == scheme)
        .ok_or_else(|| {
            X402Error::UnsupportedScheme(format!(
                "no '{scheme}' requirement in {:?}",
                body.document
                    .accepts
                    .iter()
                    .map(|r| &r.scheme)
                    .collect::<Vec<_>>()
            ))
        })
}

/// Settlement polling URL on the same origin as `resource_url`.
pub fn settlement_url(resource_url: &str, settlement_id: &str) -> Result<url::Url, X402Error> {
    let mut url = url::Url::parse(resource_url)
        .map_err(|e| X402Error::ConfigError(format!("invalid URL '{resource_url}': {e}")))?;
    url.set_path(&format!("/settlements/{settlement_id}"));
    url.set_query(None);
    Ok(url)
}

fn retry_after(resp: &reqwest::Response) -> Duration {
    let secs = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(x402::DEFAULT_RETRY_AFTER_SECONDS);
    Duration::from_secs(secs)
}
