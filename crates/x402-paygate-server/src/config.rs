use std::env;

use alloy::primitives::Address;
use url::Url;
use x402::{
    PublisherConfig, RequirementsPublisher, SchemeRegistry, DEFAULT_ASSET, DEFAULT_CHAIN_ID,
    DEFAULT_FACILITATOR_URL, DEFAULT_MAX_TIMEOUT_SECONDS, DEFAULT_NETWORK, TOKEN_DECIMALS,
};

const DEFAULT_PORT: u16 = 3402;
const DEFAULT_PRICE_TABLE: &str = "/api/intel=100000=YUREI Token Intelligence";
const DEFAULT_SCHEMES: &str = "exact-onchain";
const DEFAULT_DB_PATH: &str = "./x402-settlements.db";
const DEFAULT_RATE_LIMIT_RPM: u64 = 60;
const DEFAULT_CONFIRMATION_POLL_MS: u64 = 2_000;
const DEFAULT_RETENTION_SECONDS: u64 = 3_600;

/// `SETTLEMENT_DB_PATH` value selecting the non-persistent store.
pub const IN_MEMORY_DB: &str = ":memory:";

/// One priced resource from `PRICE_TABLE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceRoute {
    pub path: String,
    pub price: String,
    pub description: Option<String>,
}

#[derive(Clone)]
pub struct GatewayConfig {
    pub port: u16,
    /// Recipient of every payment
    pub receiver_wallet: Address,
    pub network: String,
    pub chain_id: u64,
    pub asset: Address,
    pub facilitator_url: String,
    /// HMAC shared secret for facilitator auth (None = dev mode)
    pub hmac_secret: Option<Vec<u8>>,
    pub prices: Vec<PriceRoute>,
    pub accepted_schemes: Vec<String>,
    pub max_timeout_seconds: u64,
    /// SQLite path, or [`IN_MEMORY_DB`]
    pub settlement_db_path: String,
    pub rate_limit_rpm: u64,
    pub allowed_origins: Vec<String>,
    /// Bearer token required for /metrics
    pub metrics_token: Option<String>,
    /// Serve /metrics without a token when none is configured
    pub public_metrics: bool,
    pub confirmation_poll_ms: u64,
    pub settlement_retention_seconds: u64,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("port", &self.port)
            .field("receiver_wallet", &self.receiver_wallet)
            .field("network", &self.network)
            .field("chain_id", &self.chain_id)
            .field("asset", &self.asset)
            .field("facilitator_url", &self.facilitator_url)
            .field(
                "hmac_secret",
                &self.hmac_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("prices", &self.prices)
            .field("accepted_schemes", &self.accepted_schemes)
            .field("max_timeout_seconds", &self.max_timeout_seconds)
            .field("settlement_db_path", &self.settlement_db_path)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field("allowed_origins", &self.allowed_origins)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("public_metrics", &self.public_metrics)
            .field("confirmation_poll_ms", &self.confirmation_poll_ms)
            .field(
                "settlement_retention_seconds",
                &self.settlement_retention_seconds,
            )
            .finish()
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let flag = |key: &str| {
            var(key)
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false)
        };

        let wallet = var("RECEIVER_WALLET").ok_or(ConfigError::MissingRequired("RECEIVER_WALLET"))?;
        let receiver_wallet: Address = wallet
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(wallet.clone()))?;
        if receiver_wallet == Address::ZERO {
            return Err(ConfigError::InvalidAddress(
                "RECEIVER_WALLET must not be the zero address".to_string(),
            ));
        }

        let asset = match var("ASSET_ADDRESS") {
            Some(a) => a
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidAddress(a.clone()))?,
            None => DEFAULT_ASSET,
        };

        let facilitator_url =
            var("FACILITATOR_URL").unwrap_or_else(|| DEFAULT_FACILITATOR_URL.to_string());
        Url::parse(&facilitator_url)
            .map_err(|_| ConfigError::InvalidUrl(facilitator_url.clone()))?;

        let hmac_secret = var("FACILITATOR_SHARED_SECRET").map(String::into_bytes);
        let insecure_no_hmac = flag("X402_INSECURE_NO_HMAC");

        match &hmac_secret {
            Some(secret) if secret.len() < 32 => tracing::warn!(
                "FACILITATOR_SHARED_SECRET is too short ({} bytes, minimum 32); \
                 use `openssl rand -hex 32` to generate one",
                secret.len()
            ),
            Some(_) => {}
            None if insecure_no_hmac => tracing::warn!(
                "X402_INSECURE_NO_HMAC=true: facilitator requests and receipts are \
                 UNAUTHENTICATED. Do not use this in production"
            ),
            None => return Err(ConfigError::MissingRequired("FACILITATOR_SHARED_SECRET")),
        }

        let allowed_origins = var("ALLOWED_ORIGINS")
            .map(|s| split_list(&s, ','))
            .unwrap_or_else(|| {
                vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:5173".to_string(),
                ]
            });
        if allowed_origins.iter().any(|o| o == "*") && !insecure_no_hmac {
            return Err(ConfigError::InvalidUrl(
                "wildcard CORS origin '*' is not allowed in production".to_string(),
            ));
        }

        let max_timeout_seconds = parse_num(&var, "MAX_TIMEOUT_SECONDS", DEFAULT_MAX_TIMEOUT_SECONDS)?;
        if max_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_TIMEOUT_SECONDS",
                value: "0".to_string(),
            });
        }

        let metrics_token = var("METRICS_TOKEN");
        let public_metrics = flag("X402_PUBLIC_METRICS");
        if metrics_token.is_none() && !public_metrics {
            tracing::info!("METRICS_TOKEN not set; /metrics is disabled");
        }

        let config = Self {
            port: parse_num(&var, "PORT", DEFAULT_PORT)?,
            receiver_wallet,
            network: var("NETWORK_ID").unwrap_or_else(|| DEFAULT_NETWORK.to_string()),
            chain_id: parse_num(&var, "CHAIN_ID", DEFAULT_CHAIN_ID)?,
            asset,
            facilitator_url,
            hmac_secret,
            prices: parse_price_table(
                &var("PRICE_TABLE").unwrap_or_else(|| DEFAULT_PRICE_TABLE.to_string()),
            )?,
            accepted_schemes: split_list(
                &var("ACCEPTED_SCHEMES").unwrap_or_else(|| DEFAULT_SCHEMES.to_string()),
                ',',
            ),
            max_timeout_seconds,
            settlement_db_path: var("SETTLEMENT_DB_PATH")
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            rate_limit_rpm: parse_num(&var, "RATE_LIMIT_RPM", DEFAULT_RATE_LIMIT_RPM)?,
            allowed_origins,
            metrics_token,
            public_metrics,
            confirmation_poll_ms: parse_num(
                &var,
                "CONFIRMATION_POLL_MS",
                DEFAULT_CONFIRMATION_POLL_MS,
            )?,
            settlement_retention_seconds: parse_num(
                &var,
                "SETTLEMENT_RETENTION_SECONDS",
                DEFAULT_RETENTION_SECONDS,
            )?,
        };

        // `exact` grants access on a valid signature alone; nothing settles it.
        if config.schemes()?.iter().any(|s| !s.requires_confirmation()) {
            if !insecure_no_hmac && !flag("X402_ALLOW_UNSETTLED_EXACT") {
                return Err(ConfigError::InvalidScheme(
                    "'exact' is never settled; use exact-onchain or set \
                     X402_ALLOW_UNSETTLED_EXACT=true for development"
                        .to_string(),
                ));
            }
            tracing::warn!(
                "ACCEPTED_SCHEMES includes 'exact': payments are accepted without \
                 settlement. Do not use this in production"
            );
        }

        // Fail at startup, not on the first request.
        config.publisher()?;
        Ok(config)
    }

    pub fn schemes(&self) -> Result<SchemeRegistry, ConfigError> {
        SchemeRegistry::from_names(&self.accepted_schemes, &self.network, self.chain_id)
            .map_err(|e| ConfigError::InvalidScheme(e.to_string()))
    }

    pub fn publisher(&self) -> Result<RequirementsPublisher, ConfigError> {
        let mut prices = PublisherConfig::new(self.receiver_wallet)
            .with_asset(self.asset, TOKEN_DECIMALS)
            .with_max_timeout_seconds(self.max_timeout_seconds);
        for route in &self.prices {
            prices = prices
                .with_price(&route.path, &route.price, route.description.as_deref())
                .map_err(|e| ConfigError::InvalidPrice(e.to_string()))?;
        }
        Ok(RequirementsPublisher::new(prices, self.schemes()?))
    }

    /// Terminal settlements are kept at least as long as a proof stays fresh,
    /// so a purged id can never be presented again successfully.
    pub fn effective_retention_seconds(&self) -> u64 {
        self.settlement_retention_seconds
            .max(self.max_timeout_seconds + x402::MAX_CLOCK_SKEW_SECONDS)
    }
}

fn split_list(raw: &str, sep: char) -> Vec<String> {
    raw.split(sep)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_num<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        None => Ok(default),
    }
}

/// Parse `PATH=PRICE[=DESCRIPTION]` entries separated by commas.
pub fn parse_price_table(raw: &str) -> Result<Vec<PriceRoute>, ConfigError> {
    let routes = split_list(raw, ',')
        .into_iter()
        .map(|entry| {
            let mut parts = entry.splitn(3, '=');
            let path = parts.next().unwrap_or_default().trim();
            let price = parts.next().map(str::trim).unwrap_or_default();
            if !path.starts_with('/') || price.is_empty() {
                return Err(ConfigError::InvalidPrice(format!(
                    "expected PATH=PRICE, got '{entry}'"
                )));
            }
            Ok(PriceRoute {
                path: path.to_string(),
                price: price.to_string(),
                description: parts
                    .next()
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(String::from),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if routes.is_empty() {
        return Err(ConfigError::InvalidPrice("PRICE_TABLE is empty".to_string()));
    }
    Ok(routes)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid price: {0}")]
    InvalidPrice(String),

    #[error("invalid scheme configuration: {0}")]
    InvalidScheme(String),

    #[error("invalid value for {name}: '{value}'")]
    InvalidValue { name: &'static str, value: String },
}
