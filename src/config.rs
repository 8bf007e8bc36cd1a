use crate::domain::services::{SoaTimers, TtlPolicy};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Settings consumed by the resolution engine and response assembler.
#[derive(Debug, Deserialize, Clone)]
pub struct DnsConfig {
    /// Served domain suffix (e.g., "consul")
    pub domain: String,
    /// Optional second served domain
    pub alt_domain: Option<String>,
    /// Default TTL for node lookups
    pub node_ttl: u32,
    /// Default TTL for service-type lookups
    pub service_ttl: u32,
    /// Per-service TTLs; `db*` matches by prefix
    pub service_ttl_overrides: HashMap<String, u32>,
    pub soa: SoaTimers,
    /// Maximum alias hops before a question fails as a loop
    pub max_alias_depth: usize,
    /// Deadline for resolving one question, alias hops included
    pub request_timeout: Duration,
    /// Maximum answers sent to UDP clients without EDNS (0 = unlimited)
    pub udp_answer_limit: usize,
    /// Maximum address records per answer (0 = unlimited)
    pub a_record_limit: usize,
    pub disable_compression: bool,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            domain: "consul".to_string(),
            alt_domain: None,
            node_ttl: 0,
            service_ttl: 0,
            service_ttl_overrides: HashMap::new(),
            soa: SoaTimers::default(),
            max_alias_depth: 10,
            request_timeout: Duration::from_secs(2),
            udp_answer_limit: 3,
            a_record_limit: 0,
            disable_compression: false,
        }
    }
}

impl DnsConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.domain.trim_matches('.').is_empty() {
            return Err(ConfigError::MissingDomain);
        }
        if self.max_alias_depth == 0 {
            return Err(ConfigError::ZeroAliasDepth);
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy {
            node_ttl: self.node_ttl,
            service_ttl: self.service_ttl,
            service_overrides: self.service_ttl_overrides.clone(),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("dns domain is required")]
    MissingDomain,
    #[error("max_alias_depth must be at least 1")]
    ZeroAliasDepth,
    #[error("request_timeout must be non-zero")]
    ZeroTimeout,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub listen_addr: String,
    /// Datacenter of the local catalog
    pub datacenter: String,
    /// JSON seed file for the in-memory catalog
    pub catalog_path: Option<String>,
    /// Seed reload interval (0 = load once)
    pub catalog_reload_secs: u64,
    pub debug: bool,
    pub dns: DnsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8600".to_string(),
            datacenter: "dc1".to_string(),
            catalog_path: None,
            catalog_reload_secs: 0,
            debug: false,
            dns: DnsConfig::default(),
        }
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse `web=30,db*=10` into a TTL override map; malformed pairs are skipped.
fn parse_ttl_overrides(raw: &str) -> HashMap<String, u32> {
    raw.split(',')
        .filter_map(|pair| {
            let (name, ttl) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), ttl.trim().parse().ok()?))
        })
        .collect()
}

pub fn load_config() -> anyhow::Result<Config> {
    let defaults = DnsConfig::default();

    let listen_addr = std::env::var("SERVICE_DNS_LISTEN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8600".to_string());

    let datacenter = std::env::var("SERVICE_DNS_DATACENTER")
        .unwrap_or_else(|_| "dc1".to_string());

    let catalog_path = std::env::var("SERVICE_DNS_CATALOG_PATH").ok();

    let catalog_reload_secs = env_parse("SERVICE_DNS_CATALOG_RELOAD_SECS", 0);

    let debug = env_flag("SERVICE_DNS_DEBUG") || std::env::var("DEBUG").is_ok();

    // DNS engine settings
    let domain = std::env::var("SERVICE_DNS_DOMAIN")
        .unwrap_or_else(|_| defaults.domain.clone());

    let alt_domain = std::env::var("SERVICE_DNS_ALT_DOMAIN").ok();

    let service_ttl_overrides = std::env::var("SERVICE_DNS_SERVICE_TTL_OVERRIDES")
        .map(|v| parse_ttl_overrides(&v))
        .unwrap_or_default();

    let soa = SoaTimers {
        refresh: env_parse("SERVICE_DNS_SOA_REFRESH", defaults.soa.refresh),
        retry: env_parse("SERVICE_DNS_SOA_RETRY", defaults.soa.retry),
        expire: env_parse("SERVICE_DNS_SOA_EXPIRE", defaults.soa.expire),
        min_ttl: env_parse("SERVICE_DNS_SOA_MIN_TTL", defaults.soa.min_ttl),
    };

    let request_timeout = Duration::from_millis(env_parse(
        "SERVICE_DNS_REQUEST_TIMEOUT_MS",
        defaults.request_timeout.as_millis() as u64,
    ));

    let dns = DnsConfig {
        domain,
        alt_domain,
        node_ttl: env_parse("SERVICE_DNS_NODE_TTL", defaults.node_ttl),
        service_ttl: env_parse("SERVICE_DNS_SERVICE_TTL", defaults.service_ttl),
        service_ttl_overrides,
        soa,
        max_alias_depth: env_parse("SERVICE_DNS_MAX_ALIAS_DEPTH", defaults.max_alias_depth),
        request_timeout,
        udp_answer_limit: env_parse("SERVICE_DNS_UDP_ANSWER_LIMIT", defaults.udp_answer_limit),
        a_record_limit: env_parse("SERVICE_DNS_A_RECORD_LIMIT", defaults.a_record_limit),
        disable_compression: env_flag("SERVICE_DNS_DISABLE_COMPRESSION"),
    };
    dns.validate()?;

    Ok(Config {
        listen_addr,
        datacenter,
        catalog_path,
        catalog_reload_secs,
        debug,
        dns,
    })
}
