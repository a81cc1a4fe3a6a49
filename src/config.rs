//! Environment-driven configuration. Every option has a default; anything
//! malformed fails startup with a `ConfigError` instead of limping along.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::dnssec::digest::DigestType;
use crate::dnssec::ds::DigestPolicy;
use crate::dnssec::keycache::{KeyCache, DEFAULT_KEYCACHE_ENTRIES};
use crate::dnssec::nsec3::IterationPolicy;
use crate::dnssec::trust_anchor::TrustAnchorStore;
use crate::dnssec::validator::Validator;
use crate::dnssec::verify::SigVerifier;
use crate::dnssec::constants::DEFAULT_MAX_RRSIGS;
use crate::error::ConfigError;

#[derive(Clone, Debug)]
pub struct Config {
    /// Address the daemon listens on.
    pub bind_addr: SocketAddr,

    /// Recursive upstreams queried with RD+CD+DO.
    pub upstream_servers: Vec<SocketAddr>,

    /// Per-exchange upstream timeout.
    pub upstream_timeout: Duration,

    /// Upstream retry rounds after the first.
    pub max_retries: u8,

    /// Wall-clock budget for one validated `send`, sub-queries included.
    pub query_budget: Duration,

    /// Path to a zone-file-format list of DS/DNSKEY anchors.
    pub trust_anchor_file: Option<String>,

    /// NSEC3 iteration ceilings per key-size bucket.
    pub nsec3_iterations: IterationPolicy,

    /// DS digest algorithms in descending preference.
    pub digest_preference: Vec<DigestType>,

    /// Ignore weaker DS digests when stronger ones are present.
    pub harden_algo_downgrade: bool,

    /// Symmetric allowance around signature validity windows.
    pub clock_skew_seconds: u32,

    /// Cap on signature verifications per response.
    pub max_validate_rrsigs: usize,

    /// LRU bound of the key cache.
    pub keycache_max_entries: usize,

    /// Tokio worker threads; 0 keeps the runtime default.
    pub worker_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "127.0.0.1:5353".parse().unwrap(),
            upstream_servers: vec!["1.1.1.1:53".parse().unwrap(), "8.8.8.8:53".parse().unwrap()],
            upstream_timeout: Duration::from_secs(3),
            max_retries: 2,
            query_budget: Duration::from_secs(10),
            trust_anchor_file: None,
            nsec3_iterations: IterationPolicy::default(),
            digest_preference: DigestPolicy::default().preference,
            harden_algo_downgrade: false,
            clock_skew_seconds: 0,
            max_validate_rrsigs: DEFAULT_MAX_RRSIGS,
            keycache_max_entries: DEFAULT_KEYCACHE_ENTRIES,
            worker_threads: 0,
        }
    }
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Read configuration from `VORDR_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(addr) = env("VORDR_BIND_ADDR") {
            config.bind_addr = addr
                .parse()
                .map_err(|_| ConfigError::InvalidBindAddress(addr))?;
        }

        if let Some(servers) = env("VORDR_UPSTREAM_SERVERS") {
            config.upstream_servers = servers
                .split(',')
                .map(|s| {
                    let s = s.trim();
                    // Bare addresses default to port 53.
                    s.parse().or_else(|_| format!("{}:53", s).parse())
                        .map_err(|_| ConfigError::InvalidUpstreamServer(s.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            if config.upstream_servers.is_empty() {
                return Err(ConfigError::InvalidUpstreamServer(
                    "no upstream servers configured".to_string(),
                ));
            }
        }

        if let Some(timeout) = env("VORDR_UPSTREAM_TIMEOUT_MS") {
            let millis: u64 = timeout
                .parse()
                .map_err(|_| ConfigError::InvalidTimeout(timeout.clone()))?;
            if millis == 0 {
                return Err(ConfigError::InvalidTimeout(timeout));
            }
            config.upstream_timeout = Duration::from_millis(millis);
        }

        if let Some(budget) = env("VORDR_QUERY_BUDGET_MS") {
            let millis: u64 = budget
                .parse()
                .map_err(|_| ConfigError::InvalidTimeout(budget.clone()))?;
            if millis == 0 {
                return Err(ConfigError::InvalidTimeout(budget));
            }
            config.query_budget = Duration::from_millis(millis);
        }

        if let Some(retries) = env("VORDR_MAX_RETRIES") {
            config.max_retries = retries
                .parse()
                .map_err(|_| ConfigError::Parse(format!("invalid retry count: {}", retries)))?;
        }

        config.trust_anchor_file = env("VORDR_TRUST_ANCHOR_FILE");

        config.nsec3_iterations = IterationPolicy {
            max_1024: parse_iterations("VORDR_NSEC3_ITERATIONS_1024", 1024, 150)?,
            max_2048: parse_iterations("VORDR_NSEC3_ITERATIONS_2048", 2048, 500)?,
            max_4096: parse_iterations("VORDR_NSEC3_ITERATIONS_4096", 4096, 2500)?,
        };

        if let Some(preference) = env("VORDR_DIGEST_PREFERENCE") {
            config.digest_preference = preference
                .split(',')
                .map(|token| {
                    let token = token.trim();
                    token
                        .parse::<u8>()
                        .ok()
                        .and_then(DigestType::from_u8)
                        .ok_or_else(|| ConfigError::InvalidDigestPreference(token.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            if config.digest_preference.is_empty() {
                return Err(ConfigError::InvalidDigestPreference(preference));
            }
        }

        if let Some(harden) = env("VORDR_HARDEN_ALGO_DOWNGRADE") {
            config.harden_algo_downgrade = matches!(harden.as_str(), "1" | "true" | "yes");
        }

        if let Some(skew) = env("VORDR_CLOCK_SKEW_SECONDS") {
            config.clock_skew_seconds = skew
                .parse()
                .map_err(|_| ConfigError::Parse(format!("invalid clock skew: {}", skew)))?;
        }

        if let Some(max) = env("VORDR_MAX_VALIDATE_RRSIGS") {
            config.max_validate_rrsigs = max
                .parse()
                .map_err(|_| ConfigError::Parse(format!("invalid rrsig cap: {}", max)))?;
        }

        if let Some(entries) = env("VORDR_KEYCACHE_MAX_ENTRIES") {
            config.keycache_max_entries = entries
                .parse()
                .map_err(|_| ConfigError::Parse(format!("invalid key cache size: {}", entries)))?;
        }

        if let Some(threads) = env("VORDR_WORKER_THREADS") {
            config.worker_threads = threads
                .parse()
                .map_err(|_| ConfigError::Parse(format!("invalid worker threads: {}", threads)))?;
        }

        Ok(config)
    }

    /// Load the configured trust-anchor file, or an empty store when no
    /// file is configured (every query then validates INDETERMINATE).
    pub fn load_trust_anchors(&self) -> Result<Arc<TrustAnchorStore>, ConfigError> {
        let store = TrustAnchorStore::new();
        if let Some(path) = &self.trust_anchor_file {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::TrustAnchorFile {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
            let count = store.load(&content).map_err(|e| ConfigError::TrustAnchorFile {
                path: path.clone(),
                message: e.to_string(),
            })?;
            info!("{} trust anchor set(s) from {}", count, path);
        }
        Ok(Arc::new(store))
    }

    pub fn build_validator(
        &self,
        anchors: Arc<TrustAnchorStore>,
        key_cache: Arc<KeyCache>,
    ) -> Validator {
        Validator::with_policies(
            anchors,
            key_cache,
            SigVerifier::new(self.clock_skew_seconds),
            DigestPolicy {
                preference: self.digest_preference.clone(),
                harden_downgrade: self.harden_algo_downgrade,
            },
            self.nsec3_iterations,
            self.max_validate_rrsigs,
        )
    }
}

/// NSEC3 iteration ceilings live in a 16-bit wire field; configuration
/// asking for more than that is rejected outright.
fn parse_iterations(var: &str, key_size: u32, default: u16) -> Result<u16, ConfigError> {
    let Some(raw) = env(var) else {
        return Ok(default);
    };

    let value: u64 = raw
        .parse()
        .map_err(|_| ConfigError::InvalidNsec3Iterations {
            key_size,
            value: raw.clone(),
            message: "not a number".to_string(),
        })?;

    u16::try_from(value).map_err(|_| ConfigError::InvalidNsec3Iterations {
        key_size,
        value: raw,
        message: "exceeds the 16-bit iteration field".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert!(!config.upstream_servers.is_empty());
        assert_eq!(config.nsec3_iterations.max_1024, 150);
        assert_eq!(config.keycache_max_entries, DEFAULT_KEYCACHE_ENTRIES);
    }

    #[test]
    fn iteration_ceiling_rejects_oversized() {
        // Environment-variable tests run serially against process state,
        // so scope each variable tightly.
        std::env::set_var("VORDR_NSEC3_ITERATIONS_1024", "2147483647");
        let result = parse_iterations("VORDR_NSEC3_ITERATIONS_1024", 1024, 150);
        std::env::remove_var("VORDR_NSEC3_ITERATIONS_1024");
        assert!(matches!(
            result,
            Err(ConfigError::InvalidNsec3Iterations { key_size: 1024, .. })
        ));
    }

    #[test]
    fn iteration_ceiling_accepts_16bit() {
        std::env::set_var("VORDR_NSEC3_ITERATIONS_2048", "65535");
        let result = parse_iterations("VORDR_NSEC3_ITERATIONS_2048", 2048, 500);
        std::env::remove_var("VORDR_NSEC3_ITERATIONS_2048");
        assert_eq!(result.unwrap(), 65535);
    }
}
