//! Value types carried by variables, reads, writes and notifications.
//!
//! `Variant` covers the scalar and array values the engine needs to compare,
//! range-check and slice. `DataValue` adds status and timestamps.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::node_id::{ids, LocalizedText, NodeId, QualifiedName};
use crate::status::StatusCode;

/// Low/high limits of a numeric range (EURange, InstrumentRange).
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Range {
    pub low: f64,
    pub high: f64,
}

impl Range {
    /// A range from `low` to `high`.
    #[must_use]
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// Width of the range (`high - low`).
    #[must_use]
    pub fn span(&self) -> f64 {
        (self.high - self.low).abs()
    }

    /// True if `v` lies within the limits (inclusive).
    #[must_use]
    pub fn contains(&self, v: f64) -> bool {
        v >= self.low && v <= self.high
    }
}

/// Engineering unit description.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EuInformation {
    pub namespace_uri: String,
    pub unit_id: i32,
    pub display_name: LocalizedText,
    pub description: LocalizedText,
}

/// A dynamically typed value.
///
/// Equality follows IEEE semantics for floats, so a NaN never compares equal
/// to anything, itself included.
///
/// # Examples
///
/// ```
/// use uaspace::Variant;
///
/// assert_eq!(Variant::Int32(5).as_f64(), Some(5.0));
/// assert_ne!(Variant::Double(f64::NAN), Variant::Double(f64::NAN));
/// ```
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Variant {
    #[default]
    Empty,
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Guid(Uuid),
    ByteString(Vec<u8>),
    NodeId(NodeId),
    StatusCode(StatusCode),
    QualifiedName(QualifiedName),
    LocalizedText(LocalizedText),
    Range(Range),
    EuInformation(EuInformation),
    Array(Vec<Variant>),
}

impl Variant {
    /// True for the empty variant.
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// True for arrays.
    pub const fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    /// True for integer and floating point scalars.
    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::SByte(_)
                | Self::Byte(_)
                | Self::Int16(_)
                | Self::UInt16(_)
                | Self::Int32(_)
                | Self::UInt32(_)
                | Self::Int64(_)
                | Self::UInt64(_)
                | Self::Float(_)
                | Self::Double(_)
        )
    }

    /// Numeric view of a scalar. Strings are parsed; everything else is `None`.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::SByte(v) => Some(f64::from(*v)),
            Self::Byte(v) => Some(f64::from(*v)),
            Self::Int16(v) => Some(f64::from(*v)),
            Self::UInt16(v) => Some(f64::from(*v)),
            Self::Int32(v) => Some(f64::from(*v)),
            Self::UInt32(v) => Some(f64::from(*v)),
            Self::Int64(v) => Some(*v as f64),
            Self::UInt64(v) => Some(*v as f64),
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Elements of an array value.
    pub fn as_array(&self) -> Option<&[Variant]> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }

    /// The range, if this is one.
    pub const fn as_range(&self) -> Option<Range> {
        match self {
            Self::Range(r) => Some(*r),
            _ => None,
        }
    }

    /// The string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Built-in data type id of the value (`None` for empty and arrays of mixed type).
    pub fn data_type(&self) -> Option<NodeId> {
        Some(match self {
            Self::Empty => return None,
            Self::Boolean(_) => ids::BOOLEAN,
            Self::SByte(_) => ids::SBYTE,
            Self::Byte(_) => ids::BYTE,
            Self::Int16(_) => ids::INT16,
            Self::UInt16(_) => ids::UINT16,
            Self::Int32(_) => ids::INT32,
            Self::UInt32(_) => ids::UINT32,
            Self::Int64(_) => ids::INT64,
            Self::UInt64(_) => ids::UINT64,
            Self::Float(_) => ids::FLOAT,
            Self::Double(_) => ids::DOUBLE,
            Self::String(_) => ids::STRING,
            Self::DateTime(_) => ids::DATE_TIME,
            Self::Guid(_) => ids::GUID,
            Self::ByteString(_) => ids::BYTE_STRING,
            Self::NodeId(_) => ids::NODE_ID,
            Self::StatusCode(_) => ids::STATUS_CODE,
            Self::QualifiedName(_) => ids::QUALIFIED_NAME,
            Self::LocalizedText(_) => ids::LOCALIZED_TEXT,
            Self::Range(_) => ids::RANGE,
            Self::EuInformation(_) => ids::EU_INFORMATION,
            Self::Array(items) => {
                let first = items.first()?.data_type()?;
                if items.iter().all(|v| v.data_type().as_ref() == Some(&first)) {
                    first
                } else {
                    return None;
                }
            }
        })
    }

    /// Human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Boolean(_) => "boolean",
            Self::SByte(_) => "sbyte",
            Self::Byte(_) => "byte",
            Self::Int16(_) => "int16",
            Self::UInt16(_) => "uint16",
            Self::Int32(_) => "int32",
            Self::UInt32(_) => "uint32",
            Self::Int64(_) => "int64",
            Self::UInt64(_) => "uint64",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::DateTime(_) => "datetime",
            Self::Guid(_) => "guid",
            Self::ByteString(_) => "bytestring",
            Self::NodeId(_) => "nodeid",
            Self::StatusCode(_) => "statuscode",
            Self::QualifiedName(_) => "qualifiedname",
            Self::LocalizedText(_) => "localizedtext",
            Self::Range(_) => "range",
            Self::EuInformation(_) => "euinformation",
            Self::Array(_) => "array",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("<empty>"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::SByte(v) => write!(f, "{v}"),
            Self::Byte(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::UInt16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::UInt32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "\"{v}\""),
            Self::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            Self::Guid(v) => write!(f, "{v}"),
            Self::ByteString(v) => write!(f, "<{} bytes>", v.len()),
            Self::NodeId(v) => write!(f, "{v}"),
            Self::StatusCode(v) => write!(f, "{v}"),
            Self::QualifiedName(v) => write!(f, "{v}"),
            Self::LocalizedText(v) => write!(f, "{v}"),
            Self::Range(r) => write!(f, "[{}, {}]", r.low, r.high),
            Self::EuInformation(eu) => write!(f, "{}", eu.display_name),
            Self::Array(items) => write!(f, "<array of {}>", items.len()),
        }
    }
}

macro_rules! variant_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Variant {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

variant_from! {
    bool => Boolean,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float,
    f64 => Double,
    String => String,
    NodeId => NodeId,
    LocalizedText => LocalizedText,
    QualifiedName => QualifiedName,
    Range => Range,
    StatusCode => StatusCode,
    DateTime<Utc> => DateTime,
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl<T: Into<Variant>> From<Vec<T>> for Variant {
    fn from(v: Vec<T>) -> Self {
        Self::Array(v.into_iter().map(Into::into).collect())
    }
}

/// Which timestamps a client wants returned with values.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampsToReturn {
    Source,
    Server,
    #[default]
    Both,
    Neither,
}

impl TimestampsToReturn {
    /// True if the source timestamp is kept.
    #[must_use]
    pub const fn includes_source(self) -> bool {
        matches!(self, Self::Source | Self::Both)
    }

    /// True if the server timestamp is kept.
    #[must_use]
    pub const fn includes_server(self) -> bool {
        matches!(self, Self::Server | Self::Both)
    }
}

/// A value with quality and timestamps.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataValue {
    pub value: Variant,
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    /// A good value stamped with the current time.
    pub fn new(value: impl Into<Variant>) -> Self {
        let now = Utc::now();
        Self {
            value: value.into(),
            status: StatusCode::GOOD,
            source_timestamp: Some(now),
            server_timestamp: Some(now),
        }
    }

    /// A value-less entry carrying only a status.
    #[must_use]
    pub fn from_status(status: StatusCode) -> Self {
        Self {
            value: Variant::Empty,
            status,
            source_timestamp: None,
            server_timestamp: Some(Utc::now()),
        }
    }

    /// Replaces the status.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Replaces the source timestamp.
    #[must_use]
    pub fn with_source_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.source_timestamp = Some(ts);
        self
    }

    /// Strips the timestamps the client did not ask for.
    pub fn apply_timestamps(&mut self, timestamps: TimestampsToReturn) {
        if !timestamps.includes_source() {
            self.source_timestamp = None;
        }
        if !timestamps.includes_server() {
            self.server_timestamp = None;
        }
    }
}

/// A parsed one-dimensional index range (`"3"` or `"2:5"`).
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexRange {
    pub start: usize,
    pub end: usize,
}

impl IndexRange {
    /// Parses the textual form. Empty input means "no range".
    pub fn parse(s: &str) -> Result<Option<Self>, StatusCode> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(None);
        }
        if s.contains(',') {
            // Multi-dimensional ranges are not supported by the in-memory store.
            return Err(StatusCode::BAD_INDEX_RANGE_INVALID);
        }
        let parse = |p: &str| {
            p.parse::<usize>()
                .map_err(|_| StatusCode::BAD_INDEX_RANGE_INVALID)
        };
        match s.split_once(':') {
            Some((a, b)) => {
                let start = parse(a)?;
                let end = parse(b)?;
                if end <= start || end == usize::MAX {
                    return Err(StatusCode::BAD_INDEX_RANGE_INVALID);
                }
                Ok(Some(Self { start, end }))
            }
            None => {
                let idx = parse(s)?;
                Ok(Some(Self {
                    start: idx,
                    end: idx,
                }))
            }
        }
    }

    /// Number of elements covered.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.start).saturating_add(1)
    }

    /// Always false; a parsed range covers at least one element.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Extracts the sub-range of an array, string or byte string.
    pub fn read(&self, value: &Variant) -> Result<Variant, StatusCode> {
        match value {
            Variant::Array(items) => {
                let slice = self.clamp(items.len())?;
                Ok(Variant::Array(items[slice].to_vec()))
            }
            Variant::String(s) => {
                let chars: Vec<char> = s.chars().collect();
                let slice = self.clamp(chars.len())?;
                Ok(Variant::String(chars[slice].iter().collect()))
            }
            Variant::ByteString(b) => {
                let slice = self.clamp(b.len())?;
                Ok(Variant::ByteString(b[slice].to_vec()))
            }
            _ => Err(StatusCode::BAD_INDEX_RANGE_NO_DATA),
        }
    }

    /// Writes `patch` over the sub-range of `target`, returning the new value.
    pub fn write(&self, target: &Variant, patch: &Variant) -> Result<Variant, StatusCode> {
        match (target, patch) {
            (Variant::Array(items), Variant::Array(new_items)) => {
                if new_items.len() != self.len() || self.end >= items.len() {
                    return Err(StatusCode::BAD_INDEX_RANGE_NO_DATA);
                }
                let mut out = items.clone();
                out[self.start..=self.end].clone_from_slice(new_items);
                Ok(Variant::Array(out))
            }
            (Variant::ByteString(b), Variant::ByteString(nb)) => {
                if nb.len() != self.len() || self.end >= b.len() {
                    return Err(StatusCode::BAD_INDEX_RANGE_NO_DATA);
                }
                let mut out = b.clone();
                out[self.start..=self.end].copy_from_slice(nb);
                Ok(Variant::ByteString(out))
            }
            (Variant::Array(_) | Variant::ByteString(_), _) => Err(StatusCode::BAD_TYPE_MISMATCH),
            _ => Err(StatusCode::BAD_INDEX_RANGE_INVALID),
        }
    }

    fn clamp(&self, len: usize) -> Result<std::ops::Range<usize>, StatusCode> {
        if self.start >= len || self.end < self.start {
            return Err(StatusCode::BAD_INDEX_RANGE_NO_DATA);
        }
        Ok(self.start..self.end.saturating_add(1).min(len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nan_never_equal() {
        let nan = Variant::Double(f64::NAN);
        assert_ne!(nan, nan.clone());
        assert_ne!(Variant::Array(vec![nan.clone()]), Variant::Array(vec![nan]));
    }

    #[test]
    fn test_numeric_conversion() {
        assert_eq!(Variant::Byte(7).as_f64(), Some(7.0));
        assert_eq!(Variant::from("12.5").as_f64(), Some(12.5));
        assert_eq!(Variant::from("abc").as_f64(), None);
        assert!(Variant::Float(1.0).is_numeric());
        assert!(!Variant::Boolean(true).is_numeric());
    }

    #[test]
    fn test_array_data_type() {
        let v = Variant::from(vec![1.0f64, 2.0]);
        assert_eq!(v.data_type(), Some(ids::DOUBLE));
        let mixed = Variant::Array(vec![Variant::Int32(1), Variant::Double(2.0)]);
        assert_eq!(mixed.data_type(), None);
    }

    #[test]
    fn test_index_range_parse() {
        assert_eq!(IndexRange::parse("").unwrap(), None);
        assert_eq!(
            IndexRange::parse("2:4").unwrap(),
            Some(IndexRange { start: 2, end: 4 })
        );
        assert_eq!(
            IndexRange::parse("3").unwrap(),
            Some(IndexRange { start: 3, end: 3 })
        );
        assert_eq!(
            IndexRange::parse("4:2").unwrap_err(),
            StatusCode::BAD_INDEX_RANGE_INVALID
        );
        assert!(IndexRange::parse("1:2,0:1").is_err());
    }

    #[test]
    fn test_index_range_read_and_write() {
        let arr = Variant::from(vec![1i32, 2, 3, 4]);
        let range = IndexRange { start: 1, end: 2 };
        assert_eq!(range.read(&arr).unwrap(), Variant::from(vec![2i32, 3]));

        let patched = range.write(&arr, &Variant::from(vec![9i32, 8])).unwrap();
        assert_eq!(patched, Variant::from(vec![1i32, 9, 8, 4]));

        let out_of_bounds = IndexRange { start: 10, end: 12 };
        assert_eq!(
            out_of_bounds.read(&arr).unwrap_err(),
            StatusCode::BAD_INDEX_RANGE_NO_DATA
        );
        assert_eq!(
            IndexRange { start: 0, end: 1 }
                .read(&Variant::from("hello"))
                .unwrap(),
            Variant::from("he")
        );
    }

    #[test]
    fn test_index_range_at_usize_max() {
        assert_eq!(
            IndexRange::parse("1:18446744073709551615").unwrap_err(),
            StatusCode::BAD_INDEX_RANGE_INVALID
        );

        // Deserialized ranges skip parse; reads still clamp instead of overflowing.
        let arr = Variant::from(vec![1i32, 2, 3]);
        let wide = IndexRange { start: 1, end: usize::MAX };
        assert_eq!(wide.read(&arr).unwrap(), Variant::from(vec![2i32, 3]));
        assert_eq!(wide.len(), usize::MAX);
        assert_eq!(
            wide.write(&arr, &Variant::from(vec![0i32])).unwrap_err(),
            StatusCode::BAD_INDEX_RANGE_NO_DATA
        );
    }

    #[test]
    fn test_timestamp_filter() {
        let mut dv = DataValue::new(1.0f64);
        dv.apply_timestamps(TimestampsToReturn::Source);
        assert!(dv.source_timestamp.is_some());
        assert!(dv.server_timestamp.is_none());
        dv.apply_timestamps(TimestampsToReturn::Neither);
        assert!(dv.source_timestamp.is_none());
    }
}
