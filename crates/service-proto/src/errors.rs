//! Errors crossing the storage and network boundaries.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for secure key storage.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyStorageError {
    /// Nothing is stored under the key.
    #[error("missing key: {0}")]
    MissingKey(String),

    /// The storage backend failed.
    #[error("secure storage failure: {0}")]
    Storage(String),
}

impl KeyStorageError {
    /// Whether the error only says the value was never stored.
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::MissingKey(_))
    }
}

/// Conditions the coordination service reports with a stable numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExactDeveloperError {
    /// 429.
    TooManyRequests,

    /// 2016.
    MissingOrInvalidAuthToken,

    /// 2018.
    EmailAlreadyUsed,

    /// 2021.
    ExchangeRateWindowTooOld,

    /// 2038.
    SessionExpired,

    /// 2045.
    InvalidChallengeSignature,

    /// 2052.
    InvalidEmail,

    /// 2062.
    RecoveryCodeNotSetUp,

    /// 2074.
    IncomingSwapAlreadyFulfilled,

    /// 4002.
    ForceUpdate,

    /// 5003.
    EmailNotRegistered,

    /// 8100.
    InvalidInvoice,

    /// 8101.
    InvoiceExpiresTooSoon,

    /// 8102.
    InvoiceAlreadyUsed,

    /// 8105.
    NoPaymentRoute,

    /// 8119.
    InvoiceUnreachableNode,

    /// 8123.
    CyclicalSwap,

    /// 8124.
    AmountLessInvoicesNotSupported,

    /// Any code not listed above.
    Default,
}

impl ExactDeveloperError {
    const CODES: [(i64, Self); 18] = [
        (429, Self::TooManyRequests),
        (2016, Self::MissingOrInvalidAuthToken),
        (2018, Self::EmailAlreadyUsed),
        (2021, Self::ExchangeRateWindowTooOld),
        (2038, Self::SessionExpired),
        (2045, Self::InvalidChallengeSignature),
        (2052, Self::InvalidEmail),
        (2062, Self::RecoveryCodeNotSetUp),
        (2074, Self::IncomingSwapAlreadyFulfilled),
        (4002, Self::ForceUpdate),
        (5003, Self::EmailNotRegistered),
        (8100, Self::InvalidInvoice),
        (8101, Self::InvoiceExpiresTooSoon),
        (8102, Self::InvoiceAlreadyUsed),
        (8105, Self::NoPaymentRoute),
        (8119, Self::InvoiceUnreachableNode),
        (8123, Self::CyclicalSwap),
        (8124, Self::AmountLessInvoicesNotSupported),
    ];

    /// Maps a service error code.
    pub fn from_code(code: i64) -> Self {
        Self::CODES
            .iter()
            .find(|(c, _)| *c == code)
            .map_or(Self::Default, |(_, kind)| *kind)
    }

    /// The code of this condition. `None` for [`Self::Default`].
    pub fn code(self) -> Option<i64> {
        Self::CODES
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(code, _)| *code)
    }
}

/// A structured error returned by the coordination service.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("service error {error_code} (status {status}): {message}")]
pub struct DeveloperError {
    /// Numeric error code.
    pub error_code: i64,

    /// User-facing message.
    pub message: String,

    /// Diagnostic message.
    #[serde(default)]
    pub developer_message: Option<String>,

    /// Server request identifier.
    #[serde(default)]
    pub request_id: i64,

    /// HTTP status.
    pub status: u16,
}

impl DeveloperError {
    /// The known condition behind [`Self::error_code`].
    pub fn kind(&self) -> ExactDeveloperError {
        ExactDeveloperError::from_code(self.error_code)
    }
}

/// Error type for calls to the coordination service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// No connectivity.
    #[error("no internet connection: {0}")]
    Internet(String),

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// The server failed to process the request.
    #[error("service failure (status {status}): {message}")]
    ServiceFailure {
        /// HTTP status.
        status: u16,

        /// Response body or reason.
        message: String,
    },

    /// A request or response could not be encoded or decoded.
    #[error("codable error: {0}")]
    Codable(String),

    /// A structured error with a code.
    #[error(transparent)]
    Developer(#[from] DeveloperError),

    /// Anything else.
    #[error("service error: {0}")]
    Default(String),
}

impl ServiceError {
    /// Whether retrying the same request may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Internet(_) | Self::Timeout | Self::ServiceFailure { .. }
        )
    }

    /// Whether this is the developer error `kind`.
    pub fn is_kind_of(&self, kind: ExactDeveloperError) -> bool {
        matches!(self, Self::Developer(e) if e.kind() == kind)
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn developer(code: i64) -> DeveloperError {
        DeveloperError {
            error_code: code,
            message: "nope".to_string(),
            developer_message: None,
            request_id: 1,
            status: 409,
        }
    }

    #[test]
    fn known_codes_map_both_ways() {
        for (code, kind) in ExactDeveloperError::CODES {
            assert_eq!(ExactDeveloperError::from_code(code), kind);
            assert_eq!(kind.code(), Some(code));
        }
        assert_eq!(
            ExactDeveloperError::from_code(1234),
            ExactDeveloperError::Default
        );
        assert_eq!(ExactDeveloperError::Default.code(), None);
    }

    #[test]
    fn classifies_transient_errors() {
        assert!(ServiceError::Timeout.is_transient());
        assert!(ServiceError::Internet("offline".into()).is_transient());
        assert!(ServiceError::ServiceFailure {
            status: 503,
            message: String::new()
        }
        .is_transient());

        assert!(!ServiceError::Codable("bad".into()).is_transient());
        assert!(!ServiceError::Developer(developer(2074)).is_transient());
        assert!(!ServiceError::Default("?".into()).is_transient());
    }

    #[test]
    fn recognizes_developer_error_kinds() {
        let err = ServiceError::from(developer(2074));
        assert!(err.is_kind_of(ExactDeveloperError::IncomingSwapAlreadyFulfilled));
        assert!(!err.is_kind_of(ExactDeveloperError::InvalidInvoice));
        assert!(!ServiceError::Timeout.is_kind_of(ExactDeveloperError::Default));
    }

    #[test]
    fn developer_error_decodes_with_defaults() {
        let json = r#"{"errorCode":8101,"message":"too soon","status":400}"#;
        let err: DeveloperError = serde_json::from_str(json).unwrap();
        assert_eq!(err.kind(), ExactDeveloperError::InvoiceExpiresTooSoon);
        assert_eq!(err.developer_message, None);
        assert_eq!(err.request_id, 0);
    }
}
