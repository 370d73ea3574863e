//! Configuration for the telemetry pipeline.
//!
//! Two builder-validated settings objects: [`TelemetrySettings`] for the
//! session/segment side and [`DeliveryConfig`] for the network delivery
//! queue. Invalid settings are rejected at `build()` time; nothing in the
//! pipeline re-validates at runtime.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Deployment environment reported in every payload envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Env {
    Prod,
    Stage,
}

impl Env {
    pub fn as_str(&self) -> &'static str {
        match self {
            Env::Prod => "prod",
            Env::Stage => "stage",
        }
    }
}

/// Host application and device description, frozen when the context is
/// created and stamped on every export. All fields are optional; empty
/// strings are sent for whatever the host does not provide.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaInfo {
    pub app_id: String,
    pub app_version: String,
    pub os_name: String,
    pub os_version: String,
    pub device_model: String,
    pub locale: String,
}

/// Per-kind caps on how many events a segment query may export.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueryLimits {
    pub motion: usize,
    pub key: usize,
    pub lifecycle: usize,
    pub resolution: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            motion: 20_000,
            key: 10_000,
            lifecycle: 100,
            resolution: 100,
        }
    }
}

/// Settings for a telemetry context.
///
/// Construct through [`TelemetrySettings::builder`].
#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    app_token: String,
    env: Env,
    max_segments: Option<u32>,
    auto_motion_amount: usize,
    auto_max_duration: Duration,
    auto_check_interval: Duration,
    query_limits: QueryLimits,
    init_segment: bool,
    meta: MetaInfo,
}

impl TelemetrySettings {
    /// Start building settings for the given application token.
    pub fn builder(app_token: impl Into<String>, env: Env) -> TelemetrySettingsBuilder {
        TelemetrySettingsBuilder {
            settings: TelemetrySettings {
                app_token: app_token.into(),
                env,
                max_segments: None,
                auto_motion_amount: 100,
                auto_max_duration: Duration::from_secs(5 * 60),
                auto_check_interval: Duration::from_secs(30),
                query_limits: QueryLimits::default(),
                init_segment: true,
                meta: MetaInfo::default(),
            },
        }
    }

    pub fn app_token(&self) -> &str {
        &self.app_token
    }

    pub fn env(&self) -> Env {
        self.env
    }

    /// Ceiling on the total number of segments opened, `None` for unlimited.
    pub fn max_segments(&self) -> Option<u32> {
        self.max_segments
    }

    /// Motion sample count that rolls a tracking segment over.
    pub fn auto_motion_amount(&self) -> usize {
        self.auto_motion_amount
    }

    /// Maximum age of a tracking segment before rollover.
    pub fn auto_max_duration(&self) -> Duration {
        self.auto_max_duration
    }

    /// Period of the tracking-mode rollover check.
    pub fn auto_check_interval(&self) -> Duration {
        self.auto_check_interval
    }

    pub fn query_limits(&self) -> QueryLimits {
        self.query_limits
    }

    /// Whether an `INIT` segment is emitted when the context starts.
    pub fn init_segment_enabled(&self) -> bool {
        self.init_segment
    }

    pub fn meta(&self) -> &MetaInfo {
        &self.meta
    }
}

/// Builder for [`TelemetrySettings`].
#[derive(Debug, Clone)]
pub struct TelemetrySettingsBuilder {
    settings: TelemetrySettings,
}

impl TelemetrySettingsBuilder {
    pub fn max_segments(mut self, max: u32) -> Self {
        self.settings.max_segments = Some(max);
        self
    }

    pub fn tracking_motion_amount(mut self, amount: usize) -> Self {
        self.settings.auto_motion_amount = amount;
        self
    }

    pub fn tracking_max_duration(mut self, duration: Duration) -> Self {
        self.settings.auto_max_duration = duration;
        self
    }

    pub fn tracking_check_interval(mut self, interval: Duration) -> Self {
        self.settings.auto_check_interval = interval;
        self
    }

    pub fn query_limits(mut self, limits: QueryLimits) -> Self {
        self.settings.query_limits = limits;
        self
    }

    pub fn disable_init_segment(mut self) -> Self {
        self.settings.init_segment = false;
        self
    }

    pub fn meta(mut self, meta: MetaInfo) -> Self {
        self.settings.meta = meta;
        self
    }

    pub fn build(self) -> Result<TelemetrySettings, ConfigError> {
        if self.settings.app_token.is_empty() {
            return Err(ConfigError::EmptyAppToken);
        }
        if self.settings.auto_motion_amount == 0 {
            return Err(ConfigError::InvalidTrackingAmount);
        }
        if self.settings.auto_check_interval.is_zero() {
            return Err(ConfigError::InvalidTrackingInterval);
        }
        Ok(self.settings)
    }
}

/// Settings for the delivery queue.
///
/// Defaults: 1s initial interval, 1.5x multiplier, 10min backoff cap,
/// 90min deadline, 0.4 randomization factor, at most 10 queued payloads.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    url: String,
    initial_interval: Duration,
    multiplier: f64,
    max_backoff: Duration,
    deadline: Duration,
    randomization_factor: f64,
    max_queued: usize,
}

impl DeliveryConfig {
    /// Start building a delivery configuration for the given endpoint.
    pub fn builder(url: impl Into<String>) -> DeliveryConfigBuilder {
        DeliveryConfigBuilder {
            config: DeliveryConfig {
                url: url.into(),
                initial_interval: Duration::from_secs(1),
                multiplier: 1.5,
                max_backoff: Duration::from_secs(10 * 60),
                deadline: Duration::from_secs(90 * 60),
                randomization_factor: 0.4,
                max_queued: 10,
            },
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn initial_interval(&self) -> Duration {
        self.initial_interval
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// How long a payload may keep retrying before it is dropped.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn randomization_factor(&self) -> f64 {
        self.randomization_factor
    }

    pub fn max_queued(&self) -> usize {
        self.max_queued
    }
}

/// Builder for [`DeliveryConfig`].
#[derive(Debug, Clone)]
pub struct DeliveryConfigBuilder {
    config: DeliveryConfig,
}

impl DeliveryConfigBuilder {
    pub fn initial_interval(mut self, interval: Duration) -> Self {
        self.config.initial_interval = interval;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.config.multiplier = multiplier;
        self
    }

    pub fn max_backoff(mut self, max: Duration) -> Self {
        self.config.max_backoff = max;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.config.deadline = deadline;
        self
    }

    pub fn randomization_factor(mut self, factor: f64) -> Self {
        self.config.randomization_factor = factor;
        self
    }

    pub fn max_queued(mut self, max: usize) -> Self {
        self.config.max_queued = max;
        self
    }

    pub fn build(self) -> Result<DeliveryConfig, ConfigError> {
        if self.config.url.is_empty() {
            return Err(ConfigError::EmptyUrl);
        }
        if self.config.multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier);
        }
        if !(0.0..1.0).contains(&self.config.randomization_factor) {
            return Err(ConfigError::InvalidRandomizationFactor);
        }
        if self.config.max_queued == 0 {
            return Err(ConfigError::InvalidQueueCap);
        }
        Ok(self.config)
    }
}

/// Configuration errors. All fail fast at build time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("app token must not be empty")]
    EmptyAppToken,
    #[error("delivery url must not be empty")]
    EmptyUrl,
    #[error("tracking motion amount must be greater than zero")]
    InvalidTrackingAmount,
    #[error("tracking check interval must be greater than zero")]
    InvalidTrackingInterval,
    #[error("backoff multiplier must be at least 1.0")]
    InvalidMultiplier,
    #[error("randomization factor must be in [0, 1)")]
    InvalidRandomizationFactor,
    #[error("delivery queue cap must be greater than zero")]
    InvalidQueueCap,
    #[error("identifier length must be greater than zero")]
    InvalidIdLength,
    #[error("identifier alphabet must contain at least two characters")]
    InvalidIdAlphabet,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = TelemetrySettings::builder("token", Env::Stage)
            .build()
            .unwrap();
        assert_eq!(settings.auto_motion_amount(), 100);
        assert_eq!(settings.auto_max_duration(), Duration::from_secs(300));
        assert_eq!(settings.auto_check_interval(), Duration::from_secs(30));
        assert_eq!(settings.max_segments(), None);
        assert!(settings.init_segment_enabled());
    }

    #[test]
    fn test_empty_app_token_rejected() {
        assert!(matches!(
            TelemetrySettings::builder("", Env::Prod).build(),
            Err(ConfigError::EmptyAppToken)
        ));
    }

    #[test]
    fn test_default_delivery_config() {
        let config = DeliveryConfig::builder("https://example.test/v1/record")
            .build()
            .unwrap();
        assert_eq!(config.initial_interval(), Duration::from_secs(1));
        assert_eq!(config.max_backoff(), Duration::from_secs(600));
        assert_eq!(config.deadline(), Duration::from_secs(5400));
        assert_eq!(config.max_queued(), 10);
        assert!((config.multiplier() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalid_delivery_config_rejected() {
        assert!(DeliveryConfig::builder("").build().is_err());
        assert!(DeliveryConfig::builder("https://x")
            .multiplier(0.5)
            .build()
            .is_err());
        assert!(DeliveryConfig::builder("https://x")
            .randomization_factor(1.0)
            .build()
            .is_err());
        assert!(DeliveryConfig::builder("https://x")
            .max_queued(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_env_wire_names() {
        assert_eq!(Env::Prod.as_str(), "prod");
        assert_eq!(Env::Stage.as_str(), "stage");
    }
}
