//! Accepted payment schemes and the rules each one is verified under.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    X402Error, DEFAULT_CHAIN_ID, DEFAULT_NETWORK, DEFAULT_RETRY_AFTER_SECONDS,
    EIP712_DOMAIN_NAME, EIP712_DOMAIN_VERSION, SCHEME_EXACT, SCHEME_EXACT_ONCHAIN,
};

/// When a verified payment may unlock the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SettlementMode {
    /// The signed authorization is final; access is granted on verification.
    Immediate,
    /// Access waits until the referenced transfer is confirmed on-chain.
    OnChain,
}

/// One accepted scheme on one network, with its signing domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemeConfig {
    pub scheme: String,
    pub network: String,
    pub chain_id: u64,
    pub eip712_domain_name: String,
    pub eip712_domain_version: String,
    pub settlement: SettlementMode,
    /// Back-off suggested to clients while a settlement is pending.
    pub retry_after_seconds: u64,
}

impl SchemeConfig {
    fn with_mode(scheme: &str, network: &str, chain_id: u64, settlement: SettlementMode) -> Self {
        Self {
            scheme: scheme.to_string(),
            network: network.to_string(),
            chain_id,
            eip712_domain_name: EIP712_DOMAIN_NAME.to_string(),
            eip712_domain_version: EIP712_DOMAIN_VERSION.to_string(),
            settlement,
            retry_after_seconds: DEFAULT_RETRY_AFTER_SECONDS,
        }
    }

    /// `exact`: signed authorization, accepted immediately.
    pub fn exact(network: &str, chain_id: u64) -> Self {
        Self::with_mode(SCHEME_EXACT, network, chain_id, SettlementMode::Immediate)
    }

    /// `exact-onchain`: signed reference to a transfer that must confirm first.
    pub fn exact_onchain(network: &str, chain_id: u64) -> Self {
        Self::with_mode(
            SCHEME_EXACT_ONCHAIN,
            network,
            chain_id,
            SettlementMode::OnChain,
        )
    }

    /// Look up a built-in scheme by name.
    pub fn by_name(name: &str, network: &str, chain_id: u64) -> Result<Self, X402Error> {
        match name {
            SCHEME_EXACT => Ok(Self::exact(network, chain_id)),
            SCHEME_EXACT_ONCHAIN => Ok(Self::exact_onchain(network, chain_id)),
            other => Err(X402Error::UnsupportedScheme(other.to_string())),
        }
    }

    /// Built-in scheme for a CAIP-2 `eip155:<chain id>` network.
    pub fn for_network(name: &str, network: &str) -> Result<Self, X402Error> {
        Self::by_name(name, network, chain_id_from_network(network)?)
    }

    pub fn requires_confirmation(&self) -> bool {
        self.settlement == SettlementMode::OnChain
    }
}

/// Chain id of a CAIP-2 `eip155:<id>` network identifier.
pub fn chain_id_from_network(network: &str) -> Result<u64, X402Error> {
    network
        .strip_prefix("eip155:")
        .and_then(|id| id.parse::<u64>().ok())
        .ok_or_else(|| X402Error::UnsupportedScheme(format!("unsupported network '{network}'")))
}

/// Ordered, immutable set of accepted schemes. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SchemeRegistry {
    schemes: Arc<Vec<SchemeConfig>>,
}

impl SchemeRegistry {
    /// Build a registry; rejects an empty list and duplicate scheme/network pairs.
    pub fn new(schemes: Vec<SchemeConfig>) -> Result<Self, X402Error> {
        if schemes.is_empty() {
            return Err(X402Error::ConfigError(
                "at least one payment scheme must be accepted".to_string(),
            ));
        }
        for (i, s) in schemes.iter().enumerate() {
            if schemes[..i]
                .iter()
                .any(|o| o.scheme == s.scheme && o.network == s.network)
            {
                return Err(X402Error::ConfigError(format!(
                    "scheme '{}' on '{}' registered twice",
                    s.scheme, s.network
                )));
            }
        }
        Ok(Self {
            schemes: Arc::new(schemes),
        })
    }

    /// Registry of built-in schemes by name, all on the same network.
    pub fn from_names<S: AsRef<str>>(
        names: &[S],
        network: &str,
        chain_id: u64,
    ) -> Result<Self, X402Error> {
        let schemes = names
            .iter()
            .map(|n| SchemeConfig::by_name(n.as_ref(), network, chain_id))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(schemes)
    }

    pub fn find(&self, scheme: &str, network: &str) -> Option<&SchemeConfig> {
        self.schemes
            .iter()
            .find(|s| s.scheme == scheme && s.network == network)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SchemeConfig> {
        self.schemes.iter()
    }
}

impl Default for SchemeRegistry {
    /// `exact` on Tempo Moderato.
    fn default() -> Self {
        Self {
            schemes: Arc::new(vec![SchemeConfig::exact(DEFAULT_NETWORK, DEFAULT_CHAIN_ID)]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_names_preserves_order() {
        let registry =
            SchemeRegistry::from_names(&["exact-onchain", "exact"], "eip155:1", 1).unwrap();
        let names: Vec<_> = registry.iter().map(|s| s.scheme.as_str()).collect();
        assert_eq!(names, vec!["exact-onchain", "exact"]);
        assert!(registry
            .find("exact-onchain", "eip155:1")
            .unwrap()
            .requires_confirmation());
        assert!(!registry.find("exact", "eip155:1").unwrap().requires_confirmation());
    }

    #[test]
    fn test_unknown_scheme_name() {
        let err = SchemeRegistry::from_names(&["upto"], "eip155:1", 1).unwrap_err();
        assert!(matches!(err, X402Error::UnsupportedScheme(_)));
    }

    #[test]
    fn test_rejects_empty_and_duplicates() {
        assert!(SchemeRegistry::new(vec![]).is_err());
        assert!(SchemeRegistry::from_names(&["exact", "exact"], "eip155:1", 1).is_err());
    }

    #[test]
    fn test_chain_id_from_network() {
        assert_eq!(chain_id_from_network("eip155:42431").unwrap(), 42431);
        assert!(chain_id_from_network("solana:devnet").is_err());
        assert!(chain_id_from_network("eip155:").is_err());
    }

    #[test]
    fn test_find_requires_network_match() {
        let registry = SchemeRegistry::default();
        assert!(registry.find("exact", DEFAULT_NETWORK).is_some());
        assert!(registry.find("exact", "solana:devnet").is_none());
    }
}
