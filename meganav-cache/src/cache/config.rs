//! Configuration for the cache system

use crate::cache::types::Tag;
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the revalidating cache
///
/// Read once at startup; nothing on the hot path mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Age after which an entry is STALE but still servable
    pub soft_ttl: Duration,

    /// Age after which an entry must not be served without a successful refresh
    /// Must be >= soft_ttl when set
    pub hard_ttl: Option<Duration>,

    /// TTL jitter factor (0.0 - 1.0) applied to the soft TTL on every write
    /// Spreads revalidation of entries written together
    pub ttl_jitter: f64,

    /// Tags added to every stored entry on top of the source's own tags
    pub default_tags: Vec<Tag>,

    /// Default read policy: serve stale data while revalidating in the background
    pub allow_stale: bool,

    /// Default read policy: on a failed synchronous refresh, return the last
    /// known good value flagged as degraded instead of an error
    pub fallback_to_stale_on_error: bool,

    /// Upper bound for a single data source computation
    pub compute_timeout: Duration,

    /// How long a caller waits on someone else's in-flight refresh
    pub wait_timeout: Duration,

    /// Staleness tolerance advertised to HTTP caches when no hard TTL is set
    pub stale_while_revalidate: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            // 1 hour, matching the navigation route's revalidation period
            soft_ttl: Duration::from_secs(3600),
            hard_ttl: None,
            ttl_jitter: 0.0,
            default_tags: Vec::new(),
            allow_stale: true,
            fallback_to_stale_on_error: true,
            compute_timeout: Duration::from_secs(10),
            wait_timeout: Duration::from_secs(15),
            // 1 day
            stale_while_revalidate: Duration::from_secs(86_400),
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(hard) = self.hard_ttl {
            if hard < self.soft_ttl {
                return Err(CacheError::ConfigError(format!(
                    "hard_ttl ({:?}) must be >= soft_ttl ({:?})",
                    hard, self.soft_ttl
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err(CacheError::ConfigError(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.compute_timeout.is_zero() {
            return Err(CacheError::ConfigError(
                "compute_timeout must be greater than 0".to_string(),
            ));
        }

        if self.wait_timeout.is_zero() {
            return Err(CacheError::ConfigError(
                "wait_timeout must be greater than 0".to_string(),
            ));
        }

        if self.default_tags.iter().any(|t| t.trim().is_empty()) {
            return Err(CacheError::ConfigError(
                "default_tags must not contain empty tags".to_string(),
            ));
        }

        Ok(())
    }

    /// Calculate the soft TTL with jitter applied
    pub fn soft_ttl_with_jitter(&self) -> Duration {
        if self.ttl_jitter == 0.0 || self.soft_ttl.is_zero() {
            return self.soft_ttl;
        }

        let base_secs = self.soft_ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let mut final_secs = (base_secs + jitter).max(0.0);

        // Jitter must never push an entry past its hard deadline
        if let Some(hard) = self.hard_ttl {
            final_secs = final_secs.min(hard.as_secs_f64());
        }

        Duration::from_secs_f64(final_secs)
    }

    /// Window during which downstream caches may serve stale responses
    pub fn stale_window(&self) -> Duration {
        match self.hard_ttl {
            Some(hard) => hard.saturating_sub(self.soft_ttl),
            None => self.stale_while_revalidate,
        }
    }

    /// `Cache-Control` value expressing the soft TTL and staleness tolerance
    pub fn cache_control_header(&self) -> String {
        let max_age = self.soft_ttl.as_secs();
        format!(
            "public, max-age={}, s-maxage={}, stale-while-revalidate={}",
            max_age,
            max_age,
            self.stale_window().as_secs()
        )
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    soft_ttl: Option<Duration>,
    hard_ttl: Option<Duration>,
    ttl_jitter: Option<f64>,
    default_tags: Option<Vec<Tag>>,
    allow_stale: Option<bool>,
    fallback_to_stale_on_error: Option<bool>,
    compute_timeout: Option<Duration>,
    wait_timeout: Option<Duration>,
    stale_while_revalidate: Option<Duration>,
}

impl CacheConfigBuilder {
    /// Set soft TTL for cache entries
    pub fn soft_ttl(mut self, ttl: Duration) -> Self {
        self.soft_ttl = Some(ttl);
        self
    }

    /// Set hard TTL for cache entries
    pub fn hard_ttl(mut self, ttl: Duration) -> Self {
        self.hard_ttl = Some(ttl);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Set tags applied to every entry
    pub fn default_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        self.default_tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    /// Enable or disable stale-while-revalidate by default
    pub fn allow_stale(mut self, allow: bool) -> Self {
        self.allow_stale = Some(allow);
        self
    }

    /// Enable or disable fallback to last known good data on refresh errors
    pub fn fallback_to_stale_on_error(mut self, enable: bool) -> Self {
        self.fallback_to_stale_on_error = Some(enable);
        self
    }

    /// Set the data source compute timeout
    pub fn compute_timeout(mut self, timeout: Duration) -> Self {
        self.compute_timeout = Some(timeout);
        self
    }

    /// Set how long callers wait on an in-flight refresh
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Set the advertised stale-while-revalidate window
    pub fn stale_while_revalidate(mut self, window: Duration) -> Self {
        self.stale_while_revalidate = Some(window);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            soft_ttl: self.soft_ttl.unwrap_or(defaults.soft_ttl),
            hard_ttl: self.hard_ttl.or(defaults.hard_ttl),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            default_tags: self.default_tags.unwrap_or(defaults.default_tags),
            allow_stale: self.allow_stale.unwrap_or(defaults.allow_stale),
            fallback_to_stale_on_error: self
                .fallback_to_stale_on_error
                .unwrap_or(defaults.fallback_to_stale_on_error),
            compute_timeout: self.compute_timeout.unwrap_or(defaults.compute_timeout),
            wait_timeout: self.wait_timeout.unwrap_or(defaults.wait_timeout),
            stale_while_revalidate: self
                .stale_while_revalidate
                .unwrap_or(defaults.stale_while_revalidate),
        }
    }
}

/// Preset configurations for common use cases
impl CacheConfig {
    /// Rapidly changing data: short soft TTL, bounded staleness
    pub fn realtime() -> Self {
        Self {
            soft_ttl: Duration::from_secs(5),
            hard_ttl: Some(Duration::from_secs(60)),
            compute_timeout: Duration::from_secs(2),
            wait_timeout: Duration::from_secs(3),
            ..Default::default()
        }
    }

    /// Hourly revalidation with a day of stale tolerance
    pub fn hourly() -> Self {
        Self {
            soft_ttl: Duration::from_secs(3600),
            ttl_jitter: 0.10,
            stale_while_revalidate: Duration::from_secs(86_400),
            ..Default::default()
        }
    }

    /// Rarely changing content
    pub fn static_content() -> Self {
        Self {
            soft_ttl: Duration::from_secs(48 * 3600),
            ttl_jitter: 0.05,
            stale_while_revalidate: Duration::from_secs(7 * 86_400),
            ..Default::default()
        }
    }
}

/// Named preset selectable from deployment configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePreset {
    Realtime,
    Hourly,
    StaticContent,
}

impl CachePreset {
    pub fn config(self) -> CacheConfig {
        match self {
            CachePreset::Realtime => CacheConfig::realtime(),
            CachePreset::Hourly => CacheConfig::hourly(),
            CachePreset::StaticContent => CacheConfig::static_content(),
        }
    }
}

impl FromStr for CachePreset {
    type Err = CacheError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "realtime" => Ok(CachePreset::Realtime),
            "hourly" => Ok(CachePreset::Hourly),
            "static_content" => Ok(CachePreset::StaticContent),
            other => Err(CacheError::ConfigError(format!(
                "Unknown cache preset: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.soft_ttl, Duration::from_secs(3600));
        assert!(config.hard_ttl.is_none());
        assert!(config.allow_stale);
        assert!(config.fallback_to_stale_on_error);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let invalid_config = CacheConfig::builder()
            .soft_ttl(Duration::from_secs(60))
            .hard_ttl(Duration::from_secs(30))
            .build();
        assert!(matches!(
            invalid_config.validate(),
            Err(CacheError::ConfigError(_))
        ));

        let mut invalid_config = CacheConfig::default();
        invalid_config.ttl_jitter = 1.5;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = CacheConfig::default();
        invalid_config.compute_timeout = Duration::ZERO;
        assert!(invalid_config.validate().is_err());

        let invalid_config = CacheConfig::builder().default_tags([" "]).build();
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::builder()
            .soft_ttl(Duration::from_secs(600))
            .hard_ttl(Duration::from_secs(1200))
            .default_tags(["navigation"])
            .allow_stale(false)
            .compute_timeout(Duration::from_millis(500))
            .build();

        assert_eq!(config.soft_ttl, Duration::from_secs(600));
        assert_eq!(config.hard_ttl, Some(Duration::from_secs(1200)));
        assert_eq!(config.default_tags, vec!["navigation".to_string()]);
        assert!(!config.allow_stale);
        assert_eq!(config.compute_timeout, Duration::from_millis(500));
        assert_eq!(config.wait_timeout, CacheConfig::default().wait_timeout);
    }

    #[test]
    fn test_soft_ttl_with_jitter() {
        let config = CacheConfig {
            soft_ttl: Duration::from_secs(3600),
            ttl_jitter: 0.1,
            ..Default::default()
        };

        let ttl = config.soft_ttl_with_jitter();
        assert!(ttl.as_secs_f64() >= 3600.0 - 360.0);
        assert!(ttl.as_secs_f64() <= 3600.0 + 360.0);
    }

    #[test]
    fn test_jitter_capped_by_hard_ttl() {
        let config = CacheConfig {
            soft_ttl: Duration::from_secs(100),
            hard_ttl: Some(Duration::from_secs(100)),
            ttl_jitter: 1.0,
            ..Default::default()
        };

        for _ in 0..50 {
            assert!(config.soft_ttl_with_jitter() <= Duration::from_secs(100));
        }
    }

    #[test]
    fn test_cache_control_header() {
        let config = CacheConfig::default();
        assert_eq!(
            config.cache_control_header(),
            "public, max-age=3600, s-maxage=3600, stale-while-revalidate=86400"
        );

        let bounded = CacheConfig::builder()
            .soft_ttl(Duration::from_secs(60))
            .hard_ttl(Duration::from_secs(300))
            .build();
        assert_eq!(bounded.stale_window(), Duration::from_secs(240));
        assert!(bounded
            .cache_control_header()
            .ends_with("stale-while-revalidate=240"));
    }

    #[test]
    fn test_preset_configs() {
        let realtime = CacheConfig::realtime();
        assert_eq!(realtime.soft_ttl, Duration::from_secs(5));
        assert!(realtime.validate().is_ok());

        let hourly = CacheConfig::hourly();
        assert_eq!(hourly.soft_ttl, Duration::from_secs(3600));
        assert!(hourly.validate().is_ok());

        let static_content = CacheConfig::static_content();
        assert_eq!(static_content.soft_ttl, Duration::from_secs(48 * 3600));
    }

    #[test]
    fn test_preset_lookup_by_name() {
        let preset: CachePreset = "static-content".parse().unwrap();
        assert_eq!(preset, CachePreset::StaticContent);
        assert_eq!(
            preset.config().stale_while_revalidate,
            Duration::from_secs(7 * 86_400)
        );

        assert_eq!(
            "Realtime".parse::<CachePreset>().unwrap().config().hard_ttl,
            Some(Duration::from_secs(60))
        );
        assert!(matches!(
            "weekly".parse::<CachePreset>(),
            Err(CacheError::ConfigError(_))
        ));
    }
}
