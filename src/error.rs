//! Error types
//!
//! Every failure that leaves the adapter layer is an [`AppError`], one of a
//! closed set of categories. Backends report [`StoreError`] and the auth
//! client reports [`AuthError`]; both are normalized through the tables in
//! this module before callers see them.
//!
//! # Design
//! Uses thiserror for ergonomic error definitions. Conversion into
//! [`AppError`] happens through `From`, so `?` performs the mapping.

use thiserror::Error;

/// Category of a domain error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Client is too old for the backend
    AppNeedsUpdate,
    /// Caller supplied invalid input
    BadArguments,
    /// Network is unreachable or the service is unavailable
    NetworkConnection,
    /// Path or account resolved to nothing
    NotFound,
    /// The backend rejected or aborted the operation
    OperationFailed,
    /// Caller is not allowed to perform the operation
    Permission,
    /// Payload does not match the record shape
    Parse,
    /// Operation did not complete in time
    Timeout,
    /// Anything not covered above
    Unknown,
    /// Credentials were valid but the email address is not verified
    UnverifiedEmail,
}

/// Domain error returned by every adapter operation
///
/// Each variant carries a human readable message. Use [`AppError::kind`] to
/// dispatch on the category.
///
/// # Example
/// ```
/// use firebase_data_source::{AppError, ErrorKind};
///
/// let err = AppError::from(ErrorKind::NotFound);
/// assert_eq!(err.kind(), ErrorKind::NotFound);
/// assert_eq!(err.message(), "No results found");
/// ```
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Client is too old for the backend
    #[error("{0}")]
    AppNeedsUpdate(String),

    /// Caller supplied invalid input
    #[error("{0}")]
    BadArguments(String),

    /// Network is unreachable or the service is unavailable
    #[error("{0}")]
    NetworkConnection(String),

    /// Path or account resolved to nothing
    #[error("{0}")]
    NotFound(String),

    /// The backend rejected or aborted the operation
    #[error("{0}")]
    OperationFailed(String),

    /// Caller is not allowed to perform the operation
    #[error("{0}")]
    Permission(String),

    /// Payload does not match the record shape
    #[error("{0}")]
    Parse(String),

    /// Operation did not complete in time
    #[error("{0}")]
    Timeout(String),

    /// Anything not covered above
    #[error("{0}")]
    Unknown(String),

    /// Credentials were valid but the email address is not verified
    #[error("{0}")]
    UnverifiedEmail(String),
}

impl AppError {
    /// Create an error of the given kind with a custom message
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::AppNeedsUpdate => Self::AppNeedsUpdate(message),
            ErrorKind::BadArguments => Self::BadArguments(message),
            ErrorKind::NetworkConnection => Self::NetworkConnection(message),
            ErrorKind::NotFound => Self::NotFound(message),
            ErrorKind::OperationFailed => Self::OperationFailed(message),
            ErrorKind::Permission => Self::Permission(message),
            ErrorKind::Parse => Self::Parse(message),
            ErrorKind::Timeout => Self::Timeout(message),
            ErrorKind::Unknown => Self::Unknown(message),
            ErrorKind::UnverifiedEmail => Self::UnverifiedEmail(message),
        }
    }

    /// Shorthand for a `BadArguments` error
    pub fn bad_arguments(message: impl Into<String>) -> Self {
        Self::BadArguments(message.into())
    }

    /// Shorthand for a `Parse` error
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AppNeedsUpdate(_) => ErrorKind::AppNeedsUpdate,
            Self::BadArguments(_) => ErrorKind::BadArguments,
            Self::NetworkConnection(_) => ErrorKind::NetworkConnection,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::OperationFailed(_) => ErrorKind::OperationFailed,
            Self::Permission(_) => ErrorKind::Permission,
            Self::Parse(_) => ErrorKind::Parse,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Unknown(_) => ErrorKind::Unknown,
            Self::UnverifiedEmail(_) => ErrorKind::UnverifiedEmail,
        }
    }

    /// Message carried by this error
    pub fn message(&self) -> &str {
        match self {
            Self::AppNeedsUpdate(m)
            | Self::BadArguments(m)
            | Self::NetworkConnection(m)
            | Self::NotFound(m)
            | Self::OperationFailed(m)
            | Self::Permission(m)
            | Self::Parse(m)
            | Self::Timeout(m)
            | Self::Unknown(m)
            | Self::UnverifiedEmail(m) => m,
        }
    }
}

impl From<ErrorKind> for AppError {
    fn from(kind: ErrorKind) -> Self {
        let message = match kind {
            ErrorKind::AppNeedsUpdate => "App needs to be updated",
            ErrorKind::BadArguments => "Bad arguments",
            ErrorKind::NetworkConnection => "There was a network problem",
            ErrorKind::NotFound => "No results found",
            ErrorKind::OperationFailed => "The operation failed",
            ErrorKind::Permission => "Unauthorized operation",
            ErrorKind::Parse => "The stored data does not match the record shape",
            ErrorKind::Timeout => "Timeout was thrown",
            ErrorKind::Unknown => "Unknown error",
            ErrorKind::UnverifiedEmail => "The email has not been verified yet",
        };
        Self::new(kind, message)
    }
}

/// Backend-neutral category of a store failure
///
/// Both backends translate their native codes into this enum so that a single
/// table ([`StoreErrorCode::kind`]) decides the domain category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorCode {
    /// Cached data is stale
    DataStale,
    /// Server rejected the operation
    OperationFailed,
    /// Security rules rejected the operation
    PermissionDenied,
    /// Connection dropped while the operation was in flight
    Disconnected,
    /// Session token expired
    ExpiredToken,
    /// Session token is malformed or revoked
    InvalidToken,
    /// Transaction gave up after too many conflicting attempts
    MaxRetries,
    /// A concurrent overwrite replaced the transaction
    OverriddenBySet,
    /// Service cannot be reached
    Unavailable,
    /// Callback supplied by the caller failed
    UserCodeException,
    /// Transport-level network failure
    NetworkError,
    /// Pending write was cancelled
    WriteCanceled,
    /// Request is malformed
    InvalidArgument,
    /// Document or path does not exist
    NotFound,
    /// Deadline elapsed before completion
    DeadlineExceeded,
    /// Contention aborted the operation
    Aborted,
    /// Quota exhausted
    ResourceExhausted,
    /// Request carries no valid credentials
    Unauthenticated,
    /// Unrecognized native code
    Unknown(i32),
}

impl StoreErrorCode {
    /// Create from a Realtime Database client error code
    pub fn from_database_code(code: i32) -> Self {
        match code {
            -1 => Self::DataStale,
            -2 => Self::OperationFailed,
            -3 => Self::PermissionDenied,
            -4 => Self::Disconnected,
            -6 => Self::ExpiredToken,
            -7 => Self::InvalidToken,
            -8 => Self::MaxRetries,
            -9 => Self::OverriddenBySet,
            -10 => Self::Unavailable,
            -11 => Self::UserCodeException,
            -24 => Self::NetworkError,
            -25 => Self::WriteCanceled,
            _ => Self::Unknown(code),
        }
    }

    /// Create from a canonical gRPC status code (Firestore)
    pub fn from_grpc_code(code: i32) -> Self {
        match code {
            1 => Self::WriteCanceled,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::OperationFailed,
            10 => Self::Aborted,
            14 => Self::Unavailable,
            16 => Self::Unauthenticated,
            _ => Self::Unknown(code),
        }
    }

    /// Create from the `status` string of a Google API error body
    pub fn from_grpc_status(status: &str) -> Self {
        match status {
            "CANCELLED" => Self::WriteCanceled,
            "INVALID_ARGUMENT" => Self::InvalidArgument,
            "DEADLINE_EXCEEDED" => Self::DeadlineExceeded,
            "NOT_FOUND" => Self::NotFound,
            "PERMISSION_DENIED" => Self::PermissionDenied,
            "RESOURCE_EXHAUSTED" => Self::ResourceExhausted,
            "FAILED_PRECONDITION" => Self::OperationFailed,
            "ABORTED" => Self::Aborted,
            "UNAVAILABLE" => Self::Unavailable,
            "UNAUTHENTICATED" => Self::Unauthenticated,
            _ => Self::Unknown(0),
        }
    }

    /// Create from a Realtime Database REST HTTP status
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 => Self::InvalidArgument,
            401 | 403 => Self::PermissionDenied,
            404 => Self::NotFound,
            408 | 504 => Self::DeadlineExceeded,
            412 => Self::OverriddenBySet,
            423 | 500 => Self::OperationFailed,
            429 => Self::ResourceExhausted,
            502 | 503 => Self::Unavailable,
            other => Self::Unknown(i32::from(other)),
        }
    }

    /// Domain category for this store code
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable | Self::NetworkError => ErrorKind::NetworkConnection,
            Self::PermissionDenied
            | Self::InvalidToken
            | Self::UserCodeException
            | Self::Unauthenticated => ErrorKind::Permission,
            Self::OperationFailed
            | Self::Disconnected
            | Self::ExpiredToken
            | Self::MaxRetries
            | Self::OverriddenBySet
            | Self::WriteCanceled
            | Self::Aborted
            | Self::ResourceExhausted => ErrorKind::OperationFailed,
            Self::NotFound => ErrorKind::NotFound,
            Self::DeadlineExceeded => ErrorKind::Timeout,
            Self::InvalidArgument => ErrorKind::BadArguments,
            Self::DataStale | Self::Unknown(_) => ErrorKind::Unknown,
        }
    }
}

/// Failure reported by a store backend
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message} ({code:?})")]
pub struct StoreError {
    /// Backend-neutral category
    pub code: StoreErrorCode,
    /// Message reported by the backend
    pub message: String,
}

impl StoreError {
    /// Create a store error
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Classify a transport error from the HTTP client
    pub(crate) fn from_transport(err: &reqwest::Error) -> Self {
        let code = if err.is_timeout() {
            StoreErrorCode::DeadlineExceeded
        } else if err.is_connect() || err.is_request() {
            StoreErrorCode::NetworkError
        } else if err.is_decode() || err.is_body() {
            StoreErrorCode::Disconnected
        } else {
            StoreErrorCode::Unknown(0)
        };
        Self::new(code, err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err.code.kind() {
            ErrorKind::Unknown if err.message.is_empty() => AppError::from(ErrorKind::Unknown),
            kind => AppError::new(kind, err.message),
        }
    }
}

/// Authentication errors
///
/// Maps Identity Toolkit error codes to Rust enum variants.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Password does not meet the strength policy
    #[error("Weak password")]
    WeakPassword,

    /// Email/password pair is wrong or malformed
    #[error("Invalid credentials: {0}")]
    InvalidCredential(String),

    /// Email already in use by another account
    #[error("Email already in use")]
    EmailAlreadyInUse,

    /// Operation requires a fresh sign-in
    #[error("This operation requires recent authentication")]
    RequiresRecentLogin,

    /// Network error
    #[error("Network error: {0}")]
    NetworkRequestFailed(String),

    /// User not found
    #[error("User not found")]
    UserNotFound,

    /// User account has been disabled
    #[error("User account disabled")]
    UserDisabled,

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// No signed-in user
    #[error("No user is currently signed in")]
    NoSignedInUser,

    /// Invalid API key
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Unknown error with the raw service code
    #[error("Unknown auth error: {0}")]
    Unknown(String),
}

impl AuthError {
    /// Create from Identity Toolkit REST API error code
    ///
    /// Codes may carry a trailing explanation (`"WEAK_PASSWORD : ..."`),
    /// only the leading token is matched.
    pub fn from_error_code(code: &str) -> Self {
        let token = code.split([' ', ':']).next().unwrap_or(code);
        match token {
            "WEAK_PASSWORD" => Self::WeakPassword,
            "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" | "INVALID_EMAIL" | "MISSING_PASSWORD" => {
                Self::InvalidCredential(token.to_string())
            }
            "EMAIL_EXISTS" => Self::EmailAlreadyInUse,
            "CREDENTIAL_TOO_OLD_LOGIN_AGAIN" => Self::RequiresRecentLogin,
            "EMAIL_NOT_FOUND" | "USER_NOT_FOUND" => Self::UserNotFound,
            "USER_DISABLED" => Self::UserDisabled,
            "INVALID_ID_TOKEN" | "TOKEN_EXPIRED" => Self::NoSignedInUser,
            "INVALID_API_KEY" | "API_KEY_INVALID" => Self::InvalidApiKey,
            _ => Self::Unknown(code.to_string()),
        }
    }

    /// Classify a transport error from the HTTP client
    pub(crate) fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::NetworkRequestFailed(err.to_string())
        }
    }

    /// Domain category for this auth error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::WeakPassword => ErrorKind::BadArguments,
            Self::InvalidCredential(_) => ErrorKind::Permission,
            Self::EmailAlreadyInUse | Self::RequiresRecentLogin => ErrorKind::OperationFailed,
            Self::NetworkRequestFailed(_) => ErrorKind::NetworkConnection,
            Self::UserNotFound | Self::UserDisabled => ErrorKind::NotFound,
            Self::Timeout => ErrorKind::Timeout,
            Self::NoSignedInUser | Self::InvalidApiKey | Self::Unknown(_) => ErrorKind::Unknown,
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::new(err.kind(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_messages() {
        assert_eq!(AppError::from(ErrorKind::NotFound).message(), "No results found");
        assert_eq!(
            AppError::from(ErrorKind::UnverifiedEmail).message(),
            "The email has not been verified yet"
        );
    }

    #[test]
    fn test_kind_round_trip() {
        let err = AppError::new(ErrorKind::Timeout, "slow");
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.to_string(), "slow");
        assert!(matches!(err, AppError::Timeout(_)));
    }

    #[test]
    fn test_disconnected_maps_to_operation_failed() {
        let err: AppError = StoreError::new(StoreErrorCode::from_database_code(-4), "Disconnected").into();
        assert_eq!(err.kind(), ErrorKind::OperationFailed);
    }

    #[test]
    fn test_database_code_table() {
        let kind = |code| StoreErrorCode::from_database_code(code).kind();
        assert_eq!(kind(-10), ErrorKind::NetworkConnection);
        assert_eq!(kind(-24), ErrorKind::NetworkConnection);
        assert_eq!(kind(-3), ErrorKind::Permission);
        assert_eq!(kind(-7), ErrorKind::Permission);
        assert_eq!(kind(-11), ErrorKind::Permission);
        assert_eq!(kind(-2), ErrorKind::OperationFailed);
        assert_eq!(kind(-6), ErrorKind::OperationFailed);
        assert_eq!(kind(-8), ErrorKind::OperationFailed);
        assert_eq!(kind(-9), ErrorKind::OperationFailed);
        assert_eq!(kind(-25), ErrorKind::OperationFailed);
        assert_eq!(kind(-1), ErrorKind::Unknown);
        assert_eq!(kind(-999), ErrorKind::Unknown);
    }

    #[test]
    fn test_firestore_status_table() {
        assert_eq!(StoreErrorCode::from_grpc_status("UNAVAILABLE").kind(), ErrorKind::NetworkConnection);
        assert_eq!(StoreErrorCode::from_grpc_status("PERMISSION_DENIED").kind(), ErrorKind::Permission);
        assert_eq!(StoreErrorCode::from_grpc_status("ABORTED").kind(), ErrorKind::OperationFailed);
        assert_eq!(StoreErrorCode::from_grpc_status("NOT_FOUND").kind(), ErrorKind::NotFound);
        assert_eq!(StoreErrorCode::from_grpc_status("DEADLINE_EXCEEDED").kind(), ErrorKind::Timeout);
        assert_eq!(StoreErrorCode::from_grpc_status("INTERNAL").kind(), ErrorKind::Unknown);
        assert_eq!(StoreErrorCode::from_grpc_code(14), StoreErrorCode::Unavailable);
        assert_eq!(StoreErrorCode::from_grpc_code(5), StoreErrorCode::NotFound);
    }

    #[test]
    fn test_http_status_table() {
        assert_eq!(StoreErrorCode::from_http_status(401).kind(), ErrorKind::Permission);
        assert_eq!(StoreErrorCode::from_http_status(503).kind(), ErrorKind::NetworkConnection);
        assert_eq!(StoreErrorCode::from_http_status(418), StoreErrorCode::Unknown(418));
    }

    #[test]
    fn test_auth_error_from_code() {
        assert_eq!(AuthError::from_error_code("EMAIL_NOT_FOUND"), AuthError::UserNotFound);
        assert_eq!(
            AuthError::from_error_code("WEAK_PASSWORD : Password should be at least 6 characters"),
            AuthError::WeakPassword
        );
        assert_eq!(AuthError::from_error_code("EMAIL_EXISTS"), AuthError::EmailAlreadyInUse);
    }

    #[test]
    fn test_auth_error_table() {
        let kind = |e: AuthError| AppError::from(e).kind();
        assert_eq!(kind(AuthError::WeakPassword), ErrorKind::BadArguments);
        assert_eq!(kind(AuthError::InvalidCredential("INVALID_PASSWORD".into())), ErrorKind::Permission);
        assert_eq!(kind(AuthError::EmailAlreadyInUse), ErrorKind::OperationFailed);
        assert_eq!(kind(AuthError::RequiresRecentLogin), ErrorKind::OperationFailed);
        assert_eq!(kind(AuthError::NetworkRequestFailed("down".into())), ErrorKind::NetworkConnection);
        assert_eq!(kind(AuthError::UserNotFound), ErrorKind::NotFound);
        assert_eq!(kind(AuthError::Timeout), ErrorKind::Timeout);
        assert_eq!(kind(AuthError::Unknown("QUOTA".into())), ErrorKind::Unknown);
    }

    #[test]
    fn test_error_display() {
        let err: AppError = StoreError::new(StoreErrorCode::PermissionDenied, "Permission denied").into();
        assert_eq!(format!("{}", err), "Permission denied");
    }
}
