//! Upstream endpoint and execution policy configuration.
//!
//! Every source has a built-in [`UpstreamPolicy`]. Individual values can be
//! overridden through environment variables:
//!
//! - `GEONL_<SOURCE>_URL`: base URL of the upstream
//! - `GEONL_<SOURCE>_TIMEOUT_MS`: per-attempt timeout in milliseconds
//! - `GEONL_<SOURCE>_RETRIES`: retries after the first attempt
//! - `GEONL_<SOURCE>_CONCURRENCY`: maximum in-flight requests
//! - `GEONL_RETRY_BACKOFF_MS`: pause before a retry
//! - `GEONL_BAG_API_KEY`: API key sent to the building registry
//!
//! `<SOURCE>` is the upper-case source id, e.g. `GEONL_LOCATION_SEARCH_URL`.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::SourceId;

pub const ENV_PREFIX: &str = "GEONL";

const PDOK_API: &str = "https://api.pdok.nl";
const PDOK_SERVICE: &str = "https://service.pdok.nl";
const BAG_API: &str = "https://api.bag.kadaster.nl";

const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Execution policy for one upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamPolicy {
    pub base_url: String,
    #[serde(rename = "timeout_ms", serialize_with = "serialize_millis")]
    pub timeout: Duration,
    /// Additional attempts after the first one for retryable failures.
    pub retries: u32,
    pub max_concurrency: usize,
}

impl UpstreamPolicy {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
            retries: 1,
            max_concurrency: 4,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Base URL without a trailing slash so paths can be appended directly.
    pub fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

fn default_policy(source: SourceId) -> UpstreamPolicy {
    match source {
        SourceId::LocationSearch => UpstreamPolicy::new(PDOK_API, Duration::from_secs(5)),
        SourceId::BuildingRegistry => {
            UpstreamPolicy::new(BAG_API, Duration::from_secs(10)).with_max_concurrency(2)
        }
        // Boundary geometries are large; the other WFS layers are paged by count.
        SourceId::Boundaries => UpstreamPolicy::new(PDOK_SERVICE, Duration::from_secs(30)),
        SourceId::Cadastral | SourceId::Height | SourceId::Noise | SourceId::Topography => {
            UpstreamPolicy::new(PDOK_SERVICE, Duration::from_secs(20))
        }
    }
}

fn serialize_millis<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Configuration handed to the aggregator.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatorConfig {
    upstreams: BTreeMap<SourceId, UpstreamPolicy>,
    #[serde(rename = "retry_backoff_ms", serialize_with = "serialize_millis")]
    pub retry_backoff: Duration,
    #[serde(skip)]
    pub bag_api_key: Option<String>,
    pub user_agent: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            upstreams: SourceId::ALL
                .iter()
                .map(|source| (*source, default_policy(*source)))
                .collect(),
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            bag_api_key: None,
            user_agent: user_agent(),
        }
    }
}

impl AggregatorConfig {
    /// Defaults with overrides from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults with overrides from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        for source in SourceId::ALL {
            let prefix = format!("{ENV_PREFIX}_{}", source.as_str().to_uppercase());
            let policy = config.policy_mut(source);

            if let Some(url) = lookup(&format!("{prefix}_URL")) {
                let url = url.trim();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(Error::Config {
                        key: format!("{prefix}_URL"),
                        message: format!("'{url}' is not an http(s) URL"),
                    });
                }
                policy.base_url = url.to_string();
            }
            if let Some(ms) = parse_var::<u64, _>(&lookup, &format!("{prefix}_TIMEOUT_MS"))? {
                policy.timeout = Duration::from_millis(ms);
            }
            if let Some(retries) = parse_var::<u32, _>(&lookup, &format!("{prefix}_RETRIES"))? {
                policy.retries = retries;
            }
            let concurrency_key = format!("{prefix}_CONCURRENCY");
            if let Some(cap) = parse_var::<usize, _>(&lookup, &concurrency_key)? {
                if cap == 0 {
                    return Err(Error::Config {
                        key: concurrency_key,
                        message: "must be at least 1".into(),
                    });
                }
                policy.max_concurrency = cap;
            }
        }

        if let Some(ms) = parse_var::<u64, _>(&lookup, &format!("{ENV_PREFIX}_RETRY_BACKOFF_MS"))? {
            config.retry_backoff = Duration::from_millis(ms);
        }
        config.bag_api_key = lookup(&format!("{ENV_PREFIX}_BAG_API_KEY"))
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        Ok(config)
    }

    /// Point every upstream at the same base URL. Used for local mirrors and
    /// test servers.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        for policy in self.upstreams.values_mut() {
            policy.base_url = base_url.to_string();
        }
        self
    }

    pub fn with_policy(mut self, source: SourceId, policy: UpstreamPolicy) -> Self {
        self.upstreams.insert(source, policy);
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn policy(&self, source: SourceId) -> UpstreamPolicy {
        self.upstreams
            .get(&source)
            .cloned()
            .unwrap_or_else(|| default_policy(source))
    }

    fn policy_mut(&mut self, source: SourceId) -> &mut UpstreamPolicy {
        self.upstreams
            .entry(source)
            .or_insert_with(|| default_policy(source))
    }

    pub fn policies(&self) -> impl Iterator<Item = (SourceId, &UpstreamPolicy)> {
        self.upstreams.iter().map(|(source, policy)| (*source, policy))
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|err| Error::Config {
            key: key.to_string(),
            message: format!("'{raw}': {err}"),
        }),
    }
}

fn user_agent() -> String {
    format!("geonl-lib/{version}", version = env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_cover_every_source() {
        let config = AggregatorConfig::default();
        for source in SourceId::ALL {
            let policy = config.policy(source);
            assert!(policy.base_url.starts_with("https://"));
            assert_eq!(policy.retries, 1);
            assert!(policy.max_concurrency >= 1);
        }
        assert_eq!(config.retry_backoff, Duration::from_millis(250));
        assert!(config.bag_api_key.is_none());
    }

    #[test]
    fn test_env_overrides_are_applied() {
        let config = AggregatorConfig::from_lookup(lookup(&[
            ("GEONL_NOISE_URL", "http://localhost:9000/"),
            ("GEONL_NOISE_TIMEOUT_MS", "1500"),
            ("GEONL_NOISE_RETRIES", "0"),
            ("GEONL_NOISE_CONCURRENCY", "8"),
            ("GEONL_RETRY_BACKOFF_MS", "10"),
            ("GEONL_BAG_API_KEY", " secret "),
        ]))
        .expect("config");

        let noise = config.policy(SourceId::Noise);
        assert_eq!(noise.base(), "http://localhost:9000");
        assert_eq!(noise.timeout, Duration::from_millis(1500));
        assert_eq!(noise.retries, 0);
        assert_eq!(noise.max_concurrency, 8);
        assert_eq!(config.retry_backoff, Duration::from_millis(10));
        assert_eq!(config.bag_api_key.as_deref(), Some("secret"));
        assert_eq!(config.policy(SourceId::Height).retries, 1);
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let err = AggregatorConfig::from_lookup(lookup(&[("GEONL_HEIGHT_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config { ref key, .. } if key == "GEONL_HEIGHT_TIMEOUT_MS"));

        let err = AggregatorConfig::from_lookup(lookup(&[("GEONL_CADASTRAL_CONCURRENCY", "0")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));

        let err =
            AggregatorConfig::from_lookup(lookup(&[("GEONL_BOUNDARIES_URL", "ftp://x")])).unwrap_err();
        assert!(err.to_string().contains("GEONL_BOUNDARIES_URL"));
    }

    #[test]
    fn test_serialized_policy_hides_api_key() {
        let config = AggregatorConfig {
            bag_api_key: Some("secret".into()),
            ..AggregatorConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("\"timeout_ms\""));
    }
}
