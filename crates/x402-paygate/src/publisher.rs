use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, U256};

use crate::scheme::SchemeRegistry;
use crate::{
    PaymentRequirement, PaymentRequirementsDocument, X402Error, DEFAULT_ASSET,
    DEFAULT_MAX_TIMEOUT_SECONDS, TOKEN_DECIMALS,
};

/// Price of one protected resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceEntry {
    /// Amount in the asset's smallest unit.
    pub amount: U256,
    pub description: Option<String>,
    pub mime_type: Option<String>,
}

/// Static pricing configuration, immutable once the gateway starts.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub pay_to: Address,
    pub asset: Address,
    pub asset_decimals: u32,
    pub max_timeout_seconds: u64,
    prices: HashMap<String, PriceEntry>,
}

impl PublisherConfig {
    /// Empty price table paying `pay_to` in pathUSD.
    pub fn new(pay_to: Address) -> Self {
        Self {
            pay_to,
            asset: DEFAULT_ASSET,
            asset_decimals: TOKEN_DECIMALS,
            max_timeout_seconds: DEFAULT_MAX_TIMEOUT_SECONDS,
            prices: HashMap::new(),
        }
    }

    pub fn with_asset(mut self, asset: Address, decimals: u32) -> Self {
        self.asset = asset;
        self.asset_decimals = decimals;
        self
    }

    pub fn with_max_timeout_seconds(mut self, seconds: u64) -> Self {
        self.max_timeout_seconds = seconds;
        self
    }

    /// Price a resource path. `price` is either raw units (`"100000"`) or a
    /// dollar amount (`"$0.10"`, `"0.10"`).
    pub fn with_price(
        mut self,
        path: &str,
        price: &str,
        description: Option<&str>,
    ) -> Result<Self, X402Error> {
        let amount = parse_price(price, self.asset_decimals)?;
        if amount.is_zero() {
            return Err(X402Error::ConfigError(format!(
                "price for '{path}' must be non-zero"
            )));
        }
        self.prices.insert(
            path.to_string(),
            PriceEntry {
                amount,
                description: description.map(String::from),
                mime_type: Some("application/json".to_string()),
            },
        );
        Ok(self)
    }

    pub fn price(&self, path: &str) -> Option<&PriceEntry> {
        self.prices.get(path)
    }

    pub fn priced_paths(&self) -> impl Iterator<Item = &str> {
        self.prices.keys().map(String::as_str)
    }
}

/// Builds requirements documents from the price table and accepted schemes.
#[derive(Debug, Clone)]
pub struct RequirementsPublisher {
    config: Arc<PublisherConfig>,
    schemes: SchemeRegistry,
}

impl RequirementsPublisher {
    pub fn new(config: PublisherConfig, schemes: SchemeRegistry) -> Self {
        Self {
            config: Arc::new(config),
            schemes,
        }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    pub fn is_priced(&self, path: &str) -> bool {
        self.config.price(path).is_some()
    }

    /// One requirement per accepted scheme, in registry order.
    ///
    /// Fails with [`X402Error::ConfigError`] when `path` has no price; callers
    /// treat that as "not payment-gated".
    pub fn build_requirements(&self, path: &str) -> Result<PaymentRequirementsDocument, X402Error> {
        let entry = self
            .config
            .price(path)
            .ok_or_else(|| X402Error::ConfigError(format!("no price configured for '{path}'")))?;

        let accepts = self
            .schemes
            .iter()
            .map(|scheme| PaymentRequirement {
                scheme: scheme.scheme.clone(),
                network: scheme.network.clone(),
                max_amount_required: entry.amount.to_string(),
                resource: path.to_string(),
                description: entry.description.clone(),
                mime_type: entry.mime_type.clone(),
                pay_to: self.config.pay_to,
                max_timeout_seconds: self.config.max_timeout_seconds,
                asset: self.config.asset,
                extra: serde_json::Map::new(),
            })
            .collect();

        PaymentRequirementsDocument::new(accepts)
    }
}

/// Parse a price into the asset's smallest unit with integer-only arithmetic.
///
/// Digits only → raw units. With a `$` or a decimal point → whole units of
/// the asset, scaled by `decimals`; extra fractional digits are truncated.
pub fn parse_price(price: &str, decimals: u32) -> Result<U256, X402Error> {
    let trimmed = price.trim();
    let is_dollar = trimmed.starts_with('$') || trimmed.contains('.');
    let cleaned = trimmed.trim_start_matches('$');

    let invalid = |why: &str| X402Error::ConfigError(format!("invalid price '{price}': {why}"));

    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(invalid("expected digits"));
    }

    if !is_dollar {
        return cleaned
            .parse::<U256>()
            .map_err(|e| invalid(&e.to_string()));
    }

    let (integer_part, fractional_part) = cleaned.split_once('.').unwrap_or((cleaned, ""));
    if fractional_part.contains('.') {
        return Err(invalid("more than one decimal point"));
    }

    let digits = decimals as usize;
    let mut frac: String = fractional_part.chars().take(digits).collect();
    while frac.len() < digits {
        frac.push('0');
    }

    let integer = if integer_part.is_empty() {
        U256::ZERO
    } else {
        integer_part
            .parse::<U256>()
            .map_err(|e| invalid(&e.to_string()))?
    };
    let fractional = if frac.is_empty() {
        U256::ZERO
    } else {
        frac.parse::<U256>().map_err(|e| invalid(&e.to_string()))?
    };

    let multiplier = U256::from(10u64).pow(U256::from(decimals));
    integer
        .checked_mul(multiplier)
        .and_then(|v| v.checked_add(fractional))
        .ok_or_else(|| invalid("overflow"))
}
