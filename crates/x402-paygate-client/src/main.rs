//! `x402-pay`: request a paid endpoint, pay on 402 and print the result.
//!
//! Environment:
//! - `SERVER_URL` (default `http://localhost:3402`)
//! - `TOKEN` token address to query (default wrapped SOL)
//! - `EVM_PRIVATE_KEY` payer key; a throwaway key is generated when unset
//! - `X402_TX_HASH` pay with `exact-onchain` using this broadcast transfer;
//!   without it the client pays with `exact`, which the gateway only accepts
//!   when `exact` is enabled
//! - `X402_RECEIPT_SECRET` the gateway's `FACILITATOR_SHARED_SECRET`, to
//!   authenticate payment receipts

use alloy::primitives::FixedBytes;
use alloy::signers::local::PrivateKeySigner;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use x402_paygate_client::{PaymentSigner, X402Client, X402Error};

const DEFAULT_SERVER_URL: &str = "http://localhost:3402";
const DEFAULT_TOKEN: &str = "So11111111111111111111111111111111111111112";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), X402Error> {
    let server = std::env::var("SERVER_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
    let token = std::env::var("TOKEN").unwrap_or_else(|_| DEFAULT_TOKEN.to_string());
    let endpoint = format!("{}/api/intel?token={}", server.trim_end_matches('/'), token);

    let signer = match std::env::var("EVM_PRIVATE_KEY") {
        Ok(key) => key
            .trim()
            .parse::<PrivateKeySigner>()
            .map_err(|e| X402Error::ConfigError(format!("invalid EVM_PRIVATE_KEY: {e}")))?,
        Err(_) => {
            tracing::warn!("EVM_PRIVATE_KEY not set; signing with a throwaway key");
            PrivateKeySigner::random()
        }
    };
    let mut client = X402Client::new(PaymentSigner::new(signer))?;
    if let Ok(secret) = std::env::var("X402_RECEIPT_SECRET") {
        client = client.with_receipt_secret(secret.trim().as_bytes());
    }
    tracing::info!(payer = %client.signer().address(), "requesting {}", endpoint);

    let (resp, receipt) = match std::env::var("X402_TX_HASH") {
        Ok(hash) => {
            let tx_hash: FixedBytes<32> = hash
                .trim()
                .parse()
                .map_err(|e| X402Error::ConfigError(format!("invalid X402_TX_HASH: {e}")))?;
            client
                .fetch_onchain(&endpoint, reqwest::Method::GET, tx_hash)
                .await?
        }
        Err(_) => client.fetch(&endpoint, reqwest::Method::GET).await?,
    };

    let status = resp.status();
    if let Some(receipt) = &receipt {
        tracing::info!(
            settlement_id = %receipt.settlement_id,
            network = %receipt.network,
            "payment settled"
        );
    }

    let data: serde_json::Value = resp
        .json()
        .await
        .map_err(|e| X402Error::HttpError(format!("invalid response body: {e}")))?;
    if !status.is_success() {
        return Err(X402Error::HttpError(format!("server returned {status}: {data}")));
    }

    let analysis = &data["analysis"];
    println!("Token:   {}", data["token"].as_str().unwrap_or_default());
    println!(
        "Risk:    {}/100 ({})",
        analysis["riskScore"],
        analysis["riskLevel"].as_str().unwrap_or_default()
    );
    println!("Snipers: {}", analysis["sniperCount"]);
    println!("Top 10 holders: {}%", analysis["top10HoldersPercent"]);
    Ok(())
}
