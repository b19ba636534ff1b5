//! Node manager configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{UaResult, ValidationError};

/// Tunables for one node manager.
///
/// Can be built in code (starting from `Default`) or loaded from JSON:
///
/// ```
/// use uaspace::NodeManagerConfig;
///
/// let cfg = NodeManagerConfig::from_json_str(r#"{ "namespaces": [2, 3], "max_queue_size": 50 }"#).unwrap();
/// assert_eq!(cfg.namespaces, vec![2, 3]);
/// assert_eq!(cfg.max_queue_size, 50);
/// assert_eq!(cfg.default_namespace(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeManagerConfig {
    /// Namespace indexes owned by this manager. The first one receives
    /// generated NodeIds.
    pub namespaces: Vec<u16>,
    /// Upper bound on a monitored item's queue size.
    pub max_queue_size: u32,
    /// Sampling intervals above this (in ms) are clamped to it.
    pub max_sampling_interval: f64,
    /// Upper bound on notifications drained from one item per publish.
    pub max_notifications_per_publish: usize,
    /// Maximum number of concurrently open browse continuation points.
    pub max_continuation_points: usize,
    /// Minimum aggregate processing interval (ms) used when no aggregate
    /// manager is configured.
    pub min_processing_interval: f64,
    /// Per-subscription capacity of the publish-readiness channel.
    pub ready_signal_capacity: usize,
}

impl Default for NodeManagerConfig {
    fn default() -> Self {
        Self {
            namespaces: vec![1],
            max_queue_size: 1000,
            max_sampling_interval: f64::from(i32::MAX),
            max_notifications_per_publish: usize::MAX,
            max_continuation_points: 1024,
            min_processing_interval: 100.0,
            ready_signal_capacity: 1024,
        }
    }
}

impl NodeManagerConfig {
    /// Config owning the given namespaces, defaults elsewhere.
    #[must_use]
    pub fn with_namespaces(namespaces: Vec<u16>) -> Self {
        Self {
            namespaces,
            ..Self::default()
        }
    }

    /// Namespace used for generated NodeIds.
    #[must_use]
    pub fn default_namespace(&self) -> u16 {
        self.namespaces.first().copied().unwrap_or(1)
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> UaResult<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> UaResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> UaResult<()> {
        let reason = if self.namespaces.is_empty() {
            "at least one namespace index is required"
        } else if self.max_queue_size == 0 {
            "max_queue_size must be at least 1"
        } else if self.max_notifications_per_publish == 0 {
            "max_notifications_per_publish must be at least 1"
        } else if self.max_continuation_points == 0 {
            "max_continuation_points must be at least 1"
        } else if !(self.max_sampling_interval > 0.0) {
            "max_sampling_interval must be positive"
        } else if self.min_processing_interval < 0.0 {
            "min_processing_interval must not be negative"
        } else {
            return Ok(());
        };
        Err(ValidationError::InvalidConfiguration {
            reason: reason.to_string(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_is_valid() {
        NodeManagerConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_empty_namespaces() {
        let err = NodeManagerConfig::from_json_str(r#"{ "namespaces": [] }"#).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("namespace"));
    }

    #[test]
    fn test_rejects_zero_queue() {
        let cfg = NodeManagerConfig {
            max_queue_size: 0,
            ..NodeManagerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "namespaces": [4], "max_sampling_interval": 60000.0 }}"#
        )
        .unwrap();
        let cfg = NodeManagerConfig::from_json_file(file.path()).unwrap();
        assert_eq!(cfg.namespaces, vec![4]);
        assert!((cfg.max_sampling_interval - 60000.0).abs() < f64::EPSILON);
        assert_eq!(cfg.max_queue_size, 1000);
    }

    #[test]
    fn test_malformed_json() {
        let err = NodeManagerConfig::from_json_str("{ nope").unwrap_err();
        assert!(matches!(err, crate::error::UaError::Serialization(_)));
    }
}
