//! Server configuration
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! `MEGANAV_*` environment variables (a `.env` file is loaded first), then
//! command-line flags applied by the binary.
//!
//! `cache.preset` (or `MEGANAV_CACHE_PRESET`) replaces the cache defaults with
//! a named [`CachePreset`]; explicit cache keys still win over the preset.

use anyhow::{Context, Result};
use meganav_cache::{CacheConfig, CachePreset};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "MEGANAV_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub cache: CacheSettings,
    pub source: SourceSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Cache knobs in wire-friendly units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<CachePreset>,
    pub soft_ttl_secs: u64,
    pub hard_ttl_secs: Option<u64>,
    pub stale_while_revalidate_secs: u64,
    pub ttl_jitter: f64,
    pub default_tags: Vec<String>,
    pub allow_stale: bool,
    pub fallback_to_stale_on_error: bool,
    pub compute_timeout_ms: u64,
    pub wait_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SourceSettings {
    /// Artificial latency added to every navigation compute
    pub latency_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl CacheSettings {
    pub fn from_preset(preset: CachePreset) -> Self {
        Self {
            preset: Some(preset),
            ..Self::from_config(&preset.config())
        }
    }

    fn from_config(defaults: &CacheConfig) -> Self {
        Self {
            preset: None,
            soft_ttl_secs: defaults.soft_ttl.as_secs(),
            hard_ttl_secs: defaults.hard_ttl.map(|ttl| ttl.as_secs()),
            stale_while_revalidate_secs: defaults.stale_while_revalidate.as_secs(),
            ttl_jitter: defaults.ttl_jitter,
            default_tags: defaults.default_tags.clone(),
            allow_stale: defaults.allow_stale,
            fallback_to_stale_on_error: defaults.fallback_to_stale_on_error,
            compute_timeout_ms: defaults.compute_timeout.as_millis() as u64,
            wait_timeout_ms: defaults.wait_timeout.as_millis() as u64,
        }
    }
}

impl AppConfig {
    /// Defaults, then `path` if given, then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_env_from(|name| std::env::var(name).ok())?;
        config.validate()?;

        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let mut doc: serde_yaml::Value = serde_yaml::from_str(raw)?;
        if doc.is_null() {
            return Ok(Self::default());
        }

        let preset = match doc.get("cache").and_then(|cache| cache.get("preset")) {
            Some(value) => Some(serde_yaml::from_value::<CachePreset>(value.clone())?),
            None => None,
        };
        if let Some(preset) = preset {
            let mut cache = serde_yaml::to_value(CacheSettings::from_preset(preset))?;
            if let (Some(base), Some(explicit)) = (
                cache.as_mapping_mut(),
                doc.get("cache").and_then(|c| c.as_mapping()),
            ) {
                for (key, value) in explicit {
                    base.insert(key.clone(), value.clone());
                }
            }
            if let Some(root) = doc.as_mapping_mut() {
                root.insert("cache".into(), cache);
            }
        }

        Ok(serde_yaml::from_value(doc)?)
    }

    /// Apply `MEGANAV_*` overrides looked up through `lookup`
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));

        if let Some(host) = var("HOST") {
            self.server.host = host;
        }
        override_parsed(&mut self.server.port, var("PORT"), "MEGANAV_PORT")?;

        if let Some(raw) = var("CACHE_PRESET") {
            let preset: CachePreset = raw
                .parse()
                .with_context(|| format!("Invalid MEGANAV_CACHE_PRESET: {}", raw))?;
            self.cache = CacheSettings::from_preset(preset);
        }

        let cache = &mut self.cache;
        override_parsed(&mut cache.soft_ttl_secs, var("SOFT_TTL_SECS"), "MEGANAV_SOFT_TTL_SECS")?;
        if let Some(raw) = var("HARD_TTL_SECS") {
            cache.hard_ttl_secs = match raw.trim() {
                "" | "none" => None,
                value => Some(
                    value
                        .parse()
                        .with_context(|| format!("Invalid MEGANAV_HARD_TTL_SECS: {}", value))?,
                ),
            };
        }
        override_parsed(
            &mut cache.stale_while_revalidate_secs,
            var("STALE_WHILE_REVALIDATE_SECS"),
            "MEGANAV_STALE_WHILE_REVALIDATE_SECS",
        )?;
        override_parsed(&mut cache.ttl_jitter, var("TTL_JITTER"), "MEGANAV_TTL_JITTER")?;
        if let Some(raw) = var("DEFAULT_TAGS") {
            cache.default_tags = raw
                .split(',')
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(String::from)
                .collect();
        }
        override_parsed(&mut cache.allow_stale, var("ALLOW_STALE"), "MEGANAV_ALLOW_STALE")?;
        override_parsed(
            &mut cache.fallback_to_stale_on_error,
            var("FALLBACK_TO_STALE"),
            "MEGANAV_FALLBACK_TO_STALE",
        )?;
        override_parsed(
            &mut cache.compute_timeout_ms,
            var("COMPUTE_TIMEOUT_MS"),
            "MEGANAV_COMPUTE_TIMEOUT_MS",
        )?;
        override_parsed(
            &mut cache.wait_timeout_ms,
            var("WAIT_TIMEOUT_MS"),
            "MEGANAV_WAIT_TIMEOUT_MS",
        )?;

        override_parsed(
            &mut self.source.latency_ms,
            var("SOURCE_LATENCY_MS"),
            "MEGANAV_SOURCE_LATENCY_MS",
        )?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.cache_config()
            .validate()
            .context("Invalid cache configuration")
    }

    /// Cache configuration derived from these settings
    pub fn cache_config(&self) -> CacheConfig {
        let settings = &self.cache;
        let mut builder = CacheConfig::builder()
            .soft_ttl(Duration::from_secs(settings.soft_ttl_secs))
            .stale_while_revalidate(Duration::from_secs(settings.stale_while_revalidate_secs))
            .ttl_jitter(settings.ttl_jitter)
            .default_tags(settings.default_tags.clone())
            .allow_stale(settings.allow_stale)
            .fallback_to_stale_on_error(settings.fallback_to_stale_on_error)
            .compute_timeout(Duration::from_millis(settings.compute_timeout_ms))
            .wait_timeout(Duration::from_millis(settings.wait_timeout_ms));

        if let Some(hard) = settings.hard_ttl_secs {
            builder = builder.hard_ttl(Duration::from_secs(hard));
        }
        builder.build()
    }

    pub fn source_latency(&self) -> Duration {
        Duration::from_millis(self.source.latency_ms)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn override_parsed<T>(target: &mut T, raw: Option<String>, name: &str) -> Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(raw) = raw {
        *target = raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: {}", name, raw))?;
    }
    Ok(())
}
