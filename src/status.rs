//! Protocol status codes.
//!
//! Per-item outcomes in batch calls are reported as `StatusCode` values rather
//! than Rust errors. The numeric values match the wire protocol so a transport
//! layer can encode them without translation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A 32-bit protocol status code.
///
/// The top two bits carry the severity (`00` good, `01` uncertain, `10` bad).
/// The low 16 bits carry info bits such as overflow or semantics-changed.
///
/// # Examples
///
/// ```
/// use uaspace::StatusCode;
///
/// assert!(StatusCode::GOOD.is_good());
/// assert!(StatusCode::BAD_NODE_ID_UNKNOWN.is_bad());
/// assert!(StatusCode::GOOD.with_overflow().is_overflow());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(u32);

macro_rules! status_codes {
    ($($name:ident = $value:expr, $text:expr;)*) => {
        impl StatusCode {
            $(
                #[allow(missing_docs)]
                pub const $name: Self = Self($value);
            )*

            /// Symbolic name of the code (ignoring info bits).
            #[must_use]
            pub fn name(self) -> &'static str {
                match self.code() {
                    $(x if x == $value => $text,)*
                    _ => "Unknown",
                }
            }
        }
    };
}

status_codes! {
    GOOD = 0x0000_0000, "Good";
    UNCERTAIN_INITIAL_VALUE = 0x4092_0000, "UncertainInitialValue";
    BAD_UNEXPECTED_ERROR = 0x8001_0000, "BadUnexpectedError";
    BAD_INTERNAL_ERROR = 0x8002_0000, "BadInternalError";
    BAD_TIMEOUT = 0x800A_0000, "BadTimeout";
    BAD_NOTHING_TO_DO = 0x800F_0000, "BadNothingToDo";
    BAD_TOO_MANY_OPERATIONS = 0x8010_0000, "BadTooManyOperations";
    BAD_USER_ACCESS_DENIED = 0x801F_0000, "BadUserAccessDenied";
    BAD_SUBSCRIPTION_ID_INVALID = 0x8028_0000, "BadSubscriptionIdInvalid";
    BAD_WAITING_FOR_INITIAL_DATA = 0x8032_0000, "BadWaitingForInitialData";
    BAD_NODE_ID_INVALID = 0x8033_0000, "BadNodeIdInvalid";
    BAD_NODE_ID_UNKNOWN = 0x8034_0000, "BadNodeIdUnknown";
    BAD_ATTRIBUTE_ID_INVALID = 0x8035_0000, "BadAttributeIdInvalid";
    BAD_INDEX_RANGE_INVALID = 0x8036_0000, "BadIndexRangeInvalid";
    BAD_INDEX_RANGE_NO_DATA = 0x8037_0000, "BadIndexRangeNoData";
    BAD_DATA_ENCODING_INVALID = 0x8038_0000, "BadDataEncodingInvalid";
    BAD_DATA_ENCODING_UNSUPPORTED = 0x8039_0000, "BadDataEncodingUnsupported";
    BAD_NOT_READABLE = 0x803A_0000, "BadNotReadable";
    BAD_NOT_WRITABLE = 0x803B_0000, "BadNotWritable";
    BAD_OUT_OF_RANGE = 0x803C_0000, "BadOutOfRange";
    BAD_NOT_SUPPORTED = 0x803D_0000, "BadNotSupported";
    BAD_NOT_FOUND = 0x803E_0000, "BadNotFound";
    BAD_NOT_IMPLEMENTED = 0x8040_0000, "BadNotImplemented";
    BAD_MONITORING_MODE_INVALID = 0x8041_0000, "BadMonitoringModeInvalid";
    BAD_MONITORED_ITEM_ID_INVALID = 0x8042_0000, "BadMonitoredItemIdInvalid";
    BAD_MONITORED_ITEM_FILTER_INVALID = 0x8043_0000, "BadMonitoredItemFilterInvalid";
    BAD_MONITORED_ITEM_FILTER_UNSUPPORTED = 0x8044_0000, "BadMonitoredItemFilterUnsupported";
    BAD_FILTER_NOT_ALLOWED = 0x8045_0000, "BadFilterNotAllowed";
    BAD_EVENT_FILTER_INVALID = 0x8047_0000, "BadEventFilterInvalid";
    BAD_CONTINUATION_POINT_INVALID = 0x804A_0000, "BadContinuationPointInvalid";
    BAD_NO_CONTINUATION_POINTS = 0x804B_0000, "BadNoContinuationPoints";
    BAD_REFERENCE_TYPE_ID_INVALID = 0x804C_0000, "BadReferenceTypeIdInvalid";
    BAD_BROWSE_DIRECTION_INVALID = 0x804D_0000, "BadBrowseDirectionInvalid";
    BAD_NODE_NOT_IN_VIEW = 0x804E_0000, "BadNodeNotInView";
    BAD_PARENT_NODE_ID_INVALID = 0x805B_0000, "BadParentNodeIdInvalid";
    BAD_NODE_ID_EXISTS = 0x805E_0000, "BadNodeIdExists";
    BAD_NODE_CLASS_INVALID = 0x805F_0000, "BadNodeClassInvalid";
    BAD_BROWSE_NAME_INVALID = 0x8060_0000, "BadBrowseNameInvalid";
    BAD_VIEW_ID_UNKNOWN = 0x806B_0000, "BadViewIdUnknown";
    BAD_NO_MATCH = 0x806F_0000, "BadNoMatch";
    BAD_HISTORY_OPERATION_INVALID = 0x8071_0000, "BadHistoryOperationInvalid";
    BAD_HISTORY_OPERATION_UNSUPPORTED = 0x8072_0000, "BadHistoryOperationUnsupported";
    BAD_WRITE_NOT_SUPPORTED = 0x8073_0000, "BadWriteNotSupported";
    BAD_TYPE_MISMATCH = 0x8074_0000, "BadTypeMismatch";
    BAD_METHOD_INVALID = 0x8075_0000, "BadMethodInvalid";
    BAD_ARGUMENTS_MISSING = 0x8076_0000, "BadArgumentsMissing";
    BAD_DEADBAND_FILTER_INVALID = 0x808E_0000, "BadDeadbandFilterInvalid";
    BAD_NO_DATA = 0x809B_0000, "BadNoData";
    BAD_INVALID_ARGUMENT = 0x80AB_0000, "BadInvalidArgument";
    BAD_AGGREGATE_NOT_SUPPORTED = 0x80D5_0000, "BadAggregateNotSupported";
    BAD_NOT_EXECUTABLE = 0x8111_0000, "BadNotExecutable";
}

impl StatusCode {
    const SEVERITY_MASK: u32 = 0xC000_0000;
    const SEVERITY_UNCERTAIN: u32 = 0x4000_0000;
    const SEVERITY_BAD: u32 = 0x8000_0000;
    const CODE_MASK: u32 = 0xFFFF_0000;

    const STRUCTURE_CHANGED: u32 = 0x0000_8000;
    const SEMANTICS_CHANGED: u32 = 0x0000_4000;
    const INFO_TYPE_DATA_VALUE: u32 = 0x0000_0400;
    const OVERFLOW: u32 = 0x0000_0080;

    /// Wrap a raw status value.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// The raw 32-bit value.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// The code with all info bits stripped.
    #[must_use]
    pub const fn code(self) -> u32 {
        self.0 & Self::CODE_MASK
    }

    /// Good severity.
    #[must_use]
    pub const fn is_good(self) -> bool {
        self.0 & Self::SEVERITY_MASK == 0
    }

    /// Uncertain severity.
    #[must_use]
    pub const fn is_uncertain(self) -> bool {
        self.0 & Self::SEVERITY_MASK == Self::SEVERITY_UNCERTAIN
    }

    /// Bad severity.
    #[must_use]
    pub const fn is_bad(self) -> bool {
        self.0 & Self::SEVERITY_BAD != 0
    }

    /// True if both codes are equal after stripping info bits.
    #[must_use]
    pub const fn same_code(self, other: Self) -> bool {
        self.code() == other.code()
    }

    /// Sets the Overflow info bit.
    #[must_use]
    pub const fn with_overflow(self) -> Self {
        Self(self.0 | Self::INFO_TYPE_DATA_VALUE | Self::OVERFLOW)
    }

    /// True if the Overflow info bit is set.
    #[must_use]
    pub const fn is_overflow(self) -> bool {
        self.0 & (Self::INFO_TYPE_DATA_VALUE | Self::OVERFLOW)
            == (Self::INFO_TYPE_DATA_VALUE | Self::OVERFLOW)
    }

    /// Sets the SemanticsChanged bit.
    #[must_use]
    pub const fn with_semantics_changed(self) -> Self {
        Self(self.0 | Self::SEMANTICS_CHANGED)
    }

    /// True if the SemanticsChanged bit is set.
    #[must_use]
    pub const fn is_semantics_changed(self) -> bool {
        self.0 & Self::SEMANTICS_CHANGED != 0
    }

    /// Sets the StructureChanged bit.
    #[must_use]
    pub const fn with_structure_changed(self) -> Self {
        Self(self.0 | Self::STRUCTURE_CHANGED)
    }

    /// True if the StructureChanged bit is set.
    #[must_use]
    pub const fn is_structure_changed(self) -> bool {
        self.0 & Self::STRUCTURE_CHANGED != 0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08X})", self.name(), self.0)
    }
}

impl From<u32> for StatusCode {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity() {
        assert!(StatusCode::GOOD.is_good());
        assert!(!StatusCode::GOOD.is_bad());
        assert!(StatusCode::UNCERTAIN_INITIAL_VALUE.is_uncertain());
        assert!(StatusCode::BAD_OUT_OF_RANGE.is_bad());
        assert!(!StatusCode::BAD_OUT_OF_RANGE.is_good());
    }

    #[test]
    fn test_info_bits_do_not_change_code() {
        let code = StatusCode::GOOD.with_overflow().with_semantics_changed();
        assert!(code.is_good());
        assert!(code.is_overflow());
        assert!(code.is_semantics_changed());
        assert!(!code.is_structure_changed());
        assert!(code.same_code(StatusCode::GOOD));
        assert_eq!(code.bits(), 0x0000_4480);
    }

    #[test]
    fn test_display_names() {
        let msg = StatusCode::BAD_NODE_ID_UNKNOWN.to_string();
        assert!(msg.contains("BadNodeIdUnknown"));
        assert!(msg.contains("0x80340000"));
        assert_eq!(StatusCode::from_bits(0x8FFF_0000).name(), "Unknown");
    }
}
