//! Monitoring filters and the data-change comparison.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node_id::NodeId;
use crate::status::StatusCode;
use crate::value::{DataValue, Variant};

use super::aggregate::AggregateConfiguration;
use super::events::{EventFilter, EventFilterResult};

/// What counts as a change for a data-change filter.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataChangeTrigger {
    Status,
    #[default]
    StatusValue,
    StatusValueTimestamp,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadbandType {
    #[default]
    None,
    Absolute,
    /// Percent of the variable's EURange span.
    Percent,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DataChangeFilter {
    #[serde(default)]
    pub trigger: DataChangeTrigger,
    #[serde(default)]
    pub deadband_type: DeadbandType,
    #[serde(default)]
    pub deadband_value: f64,
}

impl DataChangeFilter {
    /// A filter with the given trigger and deadband.
    #[must_use]
    pub const fn new(trigger: DataChangeTrigger, deadband_type: DeadbandType, deadband_value: f64) -> Self {
        Self {
            trigger,
            deadband_type,
            deadband_value,
        }
    }

    /// Rejects negative or non-finite deadbands and percentages above 100.
    pub fn validate(&self) -> Result<(), StatusCode> {
        let v = self.deadband_value;
        let ok = match self.deadband_type {
            DeadbandType::None => true,
            DeadbandType::Absolute => v.is_finite() && v >= 0.0,
            DeadbandType::Percent => v.is_finite() && (0.0..=100.0).contains(&v),
        };
        if ok {
            Ok(())
        } else {
            Err(StatusCode::BAD_DEADBAND_FILTER_INVALID)
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateFilter {
    pub start_time: DateTime<Utc>,
    pub aggregate_type: NodeId,
    /// Milliseconds.
    pub processing_interval: f64,
    #[serde(default)]
    pub configuration: AggregateConfiguration,
}

/// Filter attached to a monitored item.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MonitoringFilter {
    #[default]
    None,
    DataChange(DataChangeFilter),
    Aggregate(AggregateFilter),
    Event(EventFilter),
    /// A filter type this server does not know.
    Unsupported { type_id: NodeId },
}

impl MonitoringFilter {
    /// True when no filter was requested.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// The data-change filter, if that is the kind.
    #[must_use]
    pub const fn data_change(&self) -> Option<&DataChangeFilter> {
        match self {
            Self::DataChange(f) => Some(f),
            _ => None,
        }
    }

    /// The aggregate filter, if that is the kind.
    #[must_use]
    pub const fn aggregate(&self) -> Option<&AggregateFilter> {
        match self {
            Self::Aggregate(f) => Some(f),
            _ => None,
        }
    }

    /// The event filter, if that is the kind.
    #[must_use]
    pub const fn event(&self) -> Option<&EventFilter> {
        match self {
            Self::Event(f) => Some(f),
            _ => None,
        }
    }
}

/// Revised filter parameters reported back to the client.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum MonitoringFilterResult {
    Aggregate {
        revised_start_time: DateTime<Utc>,
        revised_processing_interval: f64,
        revised_configuration: AggregateConfiguration,
    },
    Event(EventFilterResult),
}

/// Decides whether `value` differs enough from the last reported value.
///
/// `range` is the EURange span used for percent deadbands. Status changes
/// always qualify; NaN never equals anything.
#[must_use]
pub fn value_changed(
    value: &DataValue,
    error: Option<StatusCode>,
    last_value: Option<&DataValue>,
    last_error: Option<StatusCode>,
    filter: Option<&DataChangeFilter>,
    range: f64,
) -> bool {
    let Some(last) = last_value else {
        return true;
    };

    let status = error.unwrap_or(value.status);
    let last_status = last_error.unwrap_or(last.status);
    if status != last_status {
        return true;
    }

    let filter = filter.copied().unwrap_or_default();
    match filter.trigger {
        DataChangeTrigger::Status => return false,
        DataChangeTrigger::StatusValueTimestamp => {
            if value.source_timestamp != last.source_timestamp {
                return true;
            }
        }
        DataChangeTrigger::StatusValue => {}
    }

    let threshold = match filter.deadband_type {
        DeadbandType::None => None,
        DeadbandType::Absolute => Some(filter.deadband_value),
        DeadbandType::Percent => Some(range * filter.deadband_value / 100.0),
    };
    differs(&value.value, &last.value, threshold)
}

fn differs(a: &Variant, b: &Variant, threshold: Option<f64>) -> bool {
    match (a, b) {
        (Variant::Array(x), Variant::Array(y)) => {
            x.len() != y.len() || x.iter().zip(y).any(|(p, q)| differs(p, q, threshold))
        }
        _ => match threshold {
            Some(t) if a.is_numeric() && b.is_numeric() => match (a.as_f64(), b.as_f64()) {
                (Some(p), Some(q)) => p.is_nan() || q.is_nan() || (p - q).abs() > t,
                _ => a != b,
            },
            _ => a != b,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dv(v: f64) -> DataValue {
        DataValue::new(v)
    }

    fn percent(deadband: f64) -> DataChangeFilter {
        DataChangeFilter::new(DataChangeTrigger::StatusValue, DeadbandType::Percent, deadband)
    }

    #[test]
    fn test_first_value_always_changes() {
        assert!(value_changed(&dv(1.0), None, None, None, None, 0.0));
    }

    #[test]
    fn test_percent_deadband() {
        let f = percent(10.0);
        let base = dv(50.0);
        assert!(!value_changed(&dv(55.0), None, Some(&base), None, Some(&f), 100.0));
        assert!(!value_changed(&dv(60.0), None, Some(&base), None, Some(&f), 100.0));
        assert!(value_changed(&dv(61.0), None, Some(&base), None, Some(&f), 100.0));
    }

    #[test]
    fn test_absolute_deadband_arrays() {
        let f = DataChangeFilter::new(DataChangeTrigger::StatusValue, DeadbandType::Absolute, 1.0);
        let last = DataValue::new(vec![1.0f64, 2.0]);
        let small = DataValue::new(vec![1.5f64, 2.5]);
        let big = DataValue::new(vec![1.0f64, 3.5]);
        let longer = DataValue::new(vec![1.0f64, 2.0, 3.0]);
        assert!(!value_changed(&small, None, Some(&last), None, Some(&f), 0.0));
        assert!(value_changed(&big, None, Some(&last), None, Some(&f), 0.0));
        assert!(value_changed(&longer, None, Some(&last), None, Some(&f), 0.0));
    }

    #[test]
    fn test_nan_always_changes() {
        let nan = dv(f64::NAN);
        assert!(value_changed(&nan, None, Some(&nan), None, None, 0.0));
        let f = DataChangeFilter::new(DataChangeTrigger::StatusValue, DeadbandType::Absolute, 5.0);
        assert!(value_changed(&nan, None, Some(&nan), None, Some(&f), 0.0));
    }

    #[test]
    fn test_status_trigger_ignores_value() {
        let f = DataChangeFilter::new(DataChangeTrigger::Status, DeadbandType::None, 0.0);
        let last = dv(1.0);
        assert!(!value_changed(&dv(2.0), None, Some(&last), None, Some(&f), 0.0));
        let bad = dv(2.0).with_status(StatusCode::BAD_NO_DATA);
        assert!(value_changed(&bad, None, Some(&last), None, Some(&f), 0.0));
        assert!(value_changed(
            &dv(1.0),
            Some(StatusCode::BAD_NOT_READABLE),
            Some(&last),
            None,
            Some(&f),
            0.0
        ));
    }

    #[test]
    fn test_timestamp_trigger() {
        let f = DataChangeFilter::new(DataChangeTrigger::StatusValueTimestamp, DeadbandType::None, 0.0);
        let last = dv(1.0);
        let later = dv(1.0).with_source_timestamp(Utc::now() + chrono::Duration::seconds(1));
        assert!(value_changed(&later, None, Some(&last), None, Some(&f), 0.0));
        assert!(!value_changed(&last.clone(), None, Some(&last), None, Some(&f), 0.0));
    }

    #[test]
    fn test_deadband_validation() {
        assert!(percent(10.0).validate().is_ok());
        assert_eq!(percent(120.0).validate().unwrap_err(), StatusCode::BAD_DEADBAND_FILTER_INVALID);
        let neg = DataChangeFilter::new(DataChangeTrigger::StatusValue, DeadbandType::Absolute, -1.0);
        assert!(neg.validate().is_err());
        let nan = DataChangeFilter::new(DataChangeTrigger::StatusValue, DeadbandType::Absolute, f64::NAN);
        assert!(nan.validate().is_err());
    }
}
