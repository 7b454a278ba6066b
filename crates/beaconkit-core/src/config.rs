//! Centralized Configuration Management
//!
//! This module consolidates all configuration structures used throughout the
//! SDK and provides a validating builder as the single entry point for
//! embedders.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

// ----------------------------------------------------------------------------
// Cache Configuration
// ----------------------------------------------------------------------------

/// Configuration for the beacon cache and its evictor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum age a buffered record may reach before the evictor drops it
    pub max_record_age: Duration,
    /// Target the space-based eviction shrinks the cache down to
    pub lower_memory_bound_bytes: u64,
    /// Cache size that triggers space-based eviction
    pub upper_memory_bound_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_record_age: Duration::from_millis(6_300_000), // 1 h 45 min
            lower_memory_bound_bytes: 80 * 1024 * 1024,
            upper_memory_bound_bytes: 100 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    /// Create a cache configuration with tiny bounds for testing
    pub fn testing() -> Self {
        Self {
            max_record_age: Duration::from_secs(1),
            lower_memory_bound_bytes: 500,
            upper_memory_bound_bytes: 700,
        }
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        // A zero age would make every record expire on the next evictor pass.
        if self.max_record_age < Duration::from_millis(1) {
            return Err(ConfigError::InvalidRecordAge {
                got_ms: self.max_record_age.as_millis() as u64,
            });
        }
        if self.lower_memory_bound_bytes == 0
            || self.lower_memory_bound_bytes >= self.upper_memory_bound_bytes
        {
            return Err(ConfigError::InvalidMemoryBounds {
                lower: self.lower_memory_bound_bytes,
                upper: self.upper_memory_bound_bytes,
            });
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Transport Configuration
// ----------------------------------------------------------------------------

/// Server certificate trust selection for the default transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustPolicy {
    /// Validate certificates against the platform trust store
    #[default]
    System,
    /// Accept any certificate. Only for test endpoints.
    AcceptAll,
}

/// Configuration for the HTTP transport and send pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Wall-clock budget for a single HTTP request
    pub request_timeout: Duration,
    /// Open-session send interval used until the server supplies one
    pub default_send_interval: Duration,
    /// Interval between status re-checks while capturing, and between polls
    /// while capture is off
    pub status_check_interval: Duration,
    /// Certificate trust selection for the default transport
    pub trust_policy: TrustPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            default_send_interval: Duration::from_millis(120_000),
            status_check_interval: Duration::from_millis(7_200_000), // 2 h
            trust_policy: TrustPolicy::System,
        }
    }
}

impl TransportConfig {
    /// Create a transport configuration with short intervals for testing
    pub fn testing() -> Self {
        Self {
            request_timeout: Duration::from_secs(1),
            default_send_interval: Duration::from_millis(50),
            status_check_interval: Duration::from_secs(120),
            trust_policy: TrustPolicy::AcceptAll,
        }
    }
}

// ----------------------------------------------------------------------------
// Master Configuration
// ----------------------------------------------------------------------------

/// Master configuration for a BeaconKit runtime instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeaconConfig {
    /// Ingestion endpoint URL
    pub endpoint_url: String,
    /// Application id assigned by the monitoring backend
    pub application_id: String,
    /// Stable device/visitor identifier
    pub device_id: String,
    /// Optional application version reported with every beacon
    pub application_version: Option<String>,
    /// Operating system identifier
    pub operating_system: String,
    /// Device manufacturer identifier
    pub manufacturer: String,
    /// Device model identifier
    pub model_id: String,
    /// Cache sizing and eviction
    pub cache: CacheConfig,
    /// Transport and pacing
    pub transport: TransportConfig,
}

impl BeaconConfig {
    /// Create a new builder for the mandatory identity fields
    pub fn builder(
        endpoint_url: impl Into<String>,
        application_id: impl Into<String>,
        device_id: impl Into<String>,
    ) -> BeaconConfigBuilder {
        BeaconConfigBuilder::new(endpoint_url, application_id, device_id)
    }

    /// Validate the configuration for consistency and feasibility
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint_url.trim().is_empty() {
            return Err(ConfigError::EmptyEndpointUrl);
        }
        if self.application_id.trim().is_empty() {
            return Err(ConfigError::EmptyApplicationId);
        }
        if self.device_id.trim().is_empty() {
            return Err(ConfigError::EmptyDeviceId);
        }
        self.cache.validate()
    }

    /// Create a configuration aimed at a local test endpoint
    pub fn testing() -> Self {
        Self {
            endpoint_url: "http://localhost:9999/mbeacon".into(),
            application_id: "test-app".into(),
            device_id: "test-device".into(),
            application_version: None,
            operating_system: "test-os".into(),
            manufacturer: "test".into(),
            model_id: "test-model".into(),
            cache: CacheConfig::testing(),
            transport: TransportConfig::testing(),
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Builder
// ----------------------------------------------------------------------------

/// Builder for [`BeaconConfig`] with validation at `build()` time
#[derive(Debug, Clone)]
pub struct BeaconConfigBuilder {
    config: BeaconConfig,
}

impl BeaconConfigBuilder {
    /// Create a new builder with the mandatory identity fields
    pub fn new(
        endpoint_url: impl Into<String>,
        application_id: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            config: BeaconConfig {
                endpoint_url: endpoint_url.into(),
                application_id: application_id.into(),
                device_id: device_id.into(),
                application_version: None,
                operating_system: "unknown".into(),
                manufacturer: "unknown".into(),
                model_id: "unknown".into(),
                cache: CacheConfig::default(),
                transport: TransportConfig::default(),
            },
        }
    }

    /// Set the application version reported with beacons
    pub fn with_application_version(mut self, version: impl Into<String>) -> Self {
        self.config.application_version = Some(version.into());
        self
    }

    /// Set the operating system identifier
    pub fn with_operating_system(mut self, os: impl Into<String>) -> Self {
        self.config.operating_system = os.into();
        self
    }

    /// Set the device manufacturer identifier
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.config.manufacturer = manufacturer.into();
        self
    }

    /// Set the device model identifier
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.config.model_id = model_id.into();
        self
    }

    /// Set the maximum buffered record age
    pub fn with_max_record_age(mut self, age: Duration) -> Self {
        self.config.cache.max_record_age = age;
        self
    }

    /// Set the cache memory bounds (eviction target and trigger)
    pub fn with_memory_bounds(mut self, lower_bytes: u64, upper_bytes: u64) -> Self {
        self.config.cache.lower_memory_bound_bytes = lower_bytes;
        self.config.cache.upper_memory_bound_bytes = upper_bytes;
        self
    }

    /// Set the per-request wall-clock budget
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.transport.request_timeout = timeout;
        self
    }

    /// Set the certificate trust policy for the default transport
    pub fn with_trust_policy(mut self, policy: TrustPolicy) -> Self {
        self.config.transport.trust_policy = policy;
        self
    }

    /// Build the configuration, validating it
    pub fn build(self) -> Result<BeaconConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = BeaconConfig::builder("https://ingest.example.com/mbeacon", "app-1", "dev-1")
            .build()
            .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.upper_memory_bound_bytes, 100 * 1024 * 1024);
    }

    #[test]
    fn test_empty_identity_fields_rejected() {
        assert_eq!(
            BeaconConfig::builder("", "app", "dev").build().unwrap_err(),
            ConfigError::EmptyEndpointUrl
        );
        assert_eq!(
            BeaconConfig::builder("https://x", " ", "dev")
                .build()
                .unwrap_err(),
            ConfigError::EmptyApplicationId
        );
        assert_eq!(
            BeaconConfig::builder("https://x", "app", "")
                .build()
                .unwrap_err(),
            ConfigError::EmptyDeviceId
        );
    }

    #[test]
    fn test_zero_record_age_rejected() {
        let err = BeaconConfig::builder("https://x", "app", "dev")
            .with_max_record_age(Duration::ZERO)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidRecordAge { got_ms: 0 });
    }

    #[test]
    fn test_one_millisecond_record_age_accepted() {
        let config = BeaconConfig::builder("https://x", "app", "dev")
            .with_max_record_age(Duration::from_millis(1))
            .build()
            .unwrap();
        assert_eq!(config.cache.max_record_age, Duration::from_millis(1));
    }

    #[test]
    fn test_inverted_memory_bounds_rejected() {
        let err = BeaconConfig::builder("https://x", "app", "dev")
            .with_memory_bounds(1024, 512)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidMemoryBounds {
                lower: 1024,
                upper: 512
            }
        );
    }

    #[test]
    fn test_builder_customization() {
        let config = BeaconConfig::builder("https://x", "app", "dev")
            .with_application_version("2.4.1")
            .with_operating_system("Android 14")
            .with_manufacturer("Acme")
            .with_model_id("AC-200")
            .with_trust_policy(TrustPolicy::AcceptAll)
            .build()
            .unwrap();

        assert_eq!(config.application_version.as_deref(), Some("2.4.1"));
        assert_eq!(config.operating_system, "Android 14");
        assert_eq!(config.transport.trust_policy, TrustPolicy::AcceptAll);
    }
}
