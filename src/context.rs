//! Per-request operation context supplied by the dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::StatusCode;

/// Which diagnostics a client asked to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiagnosticsMask(pub u32);

#[allow(missing_docs)]
impl DiagnosticsMask {
    pub const NONE: Self = Self(0);
    pub const OPERATION_SYMBOLIC_ID: Self = Self(0x0020);
    pub const OPERATION_LOCALIZED_TEXT: Self = Self(0x0040);
    pub const OPERATION_ADDITIONAL_INFO: Self = Self(0x0080);
    pub const OPERATION_INNER_STATUS_CODE: Self = Self(0x0100);
    pub const OPERATION_INNER_DIAGNOSTICS: Self = Self(0x0200);
    pub const OPERATION_ALL: Self = Self(0x03E0);

    /// True if any operation-level diagnostic bit is set.
    #[must_use]
    pub const fn wants_operation_diagnostics(self) -> bool {
        self.0 & Self::OPERATION_ALL.0 != 0
    }
}

/// Diagnostic detail for one operation result.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiagnosticInfo {
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<String>,
}

impl DiagnosticInfo {
    /// Diagnostic carrying only a status.
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            additional_info: None,
        }
    }

    /// Diagnostic with additional text.
    #[must_use]
    pub fn with_info(status: StatusCode, info: impl Into<String>) -> Self {
        Self {
            status,
            additional_info: Some(info.into()),
        }
    }
}

/// Operation permission checked against a node.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Browse,
    Read,
    Write,
    ReadHistory,
    Call,
    ReceiveEvents,
}

/// Caller identity and request options for one service call.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    /// Session issuing the request, if any.
    pub session_id: Option<Uuid>,
    /// Authenticated user name, `None` for anonymous.
    pub user: Option<String>,
    /// Preferred locales, most preferred first.
    pub preferred_locales: Vec<String>,
    /// Diagnostics the client wants returned.
    pub diagnostics_mask: DiagnosticsMask,
    /// Deadline supplied by the dispatcher. The core carries it for hooks but
    /// never aborts on its own.
    pub deadline: Option<DateTime<Utc>>,
}

impl OperationContext {
    /// Anonymous context with no session.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Binds the context to a session.
    #[must_use]
    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Sets the user identity used by permission hooks.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the preferred locales for localized text.
    #[must_use]
    pub fn with_locales(mut self, locales: Vec<String>) -> Self {
        self.preferred_locales = locales;
        self
    }

    /// Sets the requested diagnostics.
    #[must_use]
    pub const fn with_diagnostics(mut self, mask: DiagnosticsMask) -> Self {
        self.diagnostics_mask = mask;
        self
    }

    /// Diagnostic entry for `status` if the client asked for operation diagnostics.
    #[must_use]
    pub fn diagnostic_for(&self, status: StatusCode) -> Option<DiagnosticInfo> {
        (self.diagnostics_mask.wants_operation_diagnostics() && !status.is_good())
            .then(|| DiagnosticInfo::new(status))
    }
}
