//! Aggregate calculation interfaces.
//!
//! The engine only owns the filtering contract: it revises aggregate filters,
//! feeds raw values into a calculator and queues whatever processed values
//! come out. The numeric algorithms live behind [`AggregateManager`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node_id::NodeId;
use crate::value::DataValue;

/// Aggregate behaviour switches (percent thresholds are 0..=100).
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateConfiguration {
    pub use_server_capabilities_defaults: bool,
    pub treat_uncertain_as_bad: bool,
    pub percent_data_bad: u8,
    pub percent_data_good: u8,
    pub use_sloped_extrapolation: bool,
}

impl Default for AggregateConfiguration {
    fn default() -> Self {
        Self {
            use_server_capabilities_defaults: true,
            treat_uncertain_as_bad: true,
            percent_data_bad: 100,
            percent_data_good: 100,
            use_sloped_extrapolation: false,
        }
    }
}

/// Parameters a calculator is created with.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct CalculatorSpec {
    pub aggregate_type: NodeId,
    pub start_time: DateTime<Utc>,
    pub processing_interval: f64,
    /// Values hold until the next sample (no interpolation).
    pub stepped: bool,
    pub configuration: AggregateConfiguration,
}

/// Turns a raw value stream into processed values for one monitored item.
pub trait AggregateCalculator: Send {
    /// Aggregate function this calculator computes.
    fn aggregate_id(&self) -> &NodeId;

    /// Feeds one raw value. Returns false if the value was rejected
    /// (for example, out of time order).
    fn queue_raw_value(&mut self, value: &DataValue) -> bool;

    /// Next processed value, if an interval is complete. With
    /// `return_partial` an incomplete interval is also returned.
    fn get_processed_value(&mut self, return_partial: bool) -> Option<DataValue>;

    /// True once the current processing interval has ended at `now`.
    fn has_end_time_passed(&self, now: DateTime<Utc>) -> bool;
}

/// Server-wide aggregate capabilities.
pub trait AggregateManager: Send + Sync {
    /// True if the aggregate function is available.
    fn is_supported(&self, aggregate_type: &NodeId) -> bool;

    /// Smallest processing interval (ms) the server accepts.
    fn minimum_processing_interval(&self) -> f64;

    /// Configuration applied when a client asks for server defaults.
    fn default_configuration(&self) -> AggregateConfiguration {
        AggregateConfiguration::default()
    }

    /// Creates a calculator for one item; `None` if the spec cannot be served.
    fn create_calculator(&self, spec: &CalculatorSpec) -> Option<Box<dyn AggregateCalculator>>;
}
