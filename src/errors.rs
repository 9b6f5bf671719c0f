//! Control Plane Error Hierarchy
//!
//! Defines the error types for the resource control plane, categorized by
//! layer (resource semantics, watch delivery, infrastructure) and collapsed
//! into the public [`ErrorCode`] taxonomy at the transport boundary.

use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Resource semantics violations (validation, existence, ownership)
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Watch subscription failures delivered to a single consumer
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// Infrastructure-level failures (network, storage, serialization)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Hypervisor collaborator failures (node agent side)
    #[error(transparent)]
    Hypervisor(#[from] HypervisorError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A store call exceeded its request-scoped timeout
    #[error("Deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("{kind}/{id} not found")]
    NotFound { kind: String, id: String },

    #[error("{kind}/{id} already exists")]
    AlreadyExists { kind: String, id: String },

    /// Synchronous validation failure, never reaches the store
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The caller-supplied owner does not match the stored owner
    #[error("Owner mismatch on {kind}/{id}: expected {expected}, stored {actual}")]
    OwnerMismatch {
        kind: String,
        id: String,
        expected: String,
        actual: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
    /// Subscriber queue filled up; the subscriber was disconnected
    #[error("Watcher {watcher_id} overrun: queue of {capacity} events is full")]
    Overrun { watcher_id: u64, capacity: usize },

    /// Requested start revision is older than the retained history
    #[error("Revision {requested} has been compacted (oldest retained: {oldest})")]
    Compacted { requested: u64, oldest: u64 },

    /// The watch engine stopped while the subscription was live
    #[error("Watch engine closed: {0}")]
    Closed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Endpoint unavailable (HTTP 503 equivalent)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Malformed server addresses
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// gRPC transport layer errors
    #[error(transparent)]
    TonicError(#[from] Box<tonic::transport::Error>),

    /// gRPC status code errors
    #[error(transparent)]
    TonicStatusError(#[from] Box<tonic::Status>),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),

    #[error("{0}")]
    SignalSendFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Disk I/O failures
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Embedded database errors
    #[error("Embedded database error: {0}")]
    DbError(String),

    /// Persisted record could not be decoded
    #[error("Data corruption detected at {location}")]
    DataCorruption { location: String },

    /// Store is stopped or not yet started
    #[error("Store is not serving")]
    NotServing,

    /// Error type for value conversion operations
    #[error("Value convert failed")]
    Convert(#[from] ConvertError),
}

/// Error type for value conversion operations
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// This occurs when the input byte slice length doesn't match the required 8 bytes.
    #[error("invalid byte length: expected 8 bytes, received {0} bytes")]
    InvalidLength(usize),

    /// Generic conversion failure with detailed message
    #[error("conversion failure: {0}")]
    ConversionFailure(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    // Network layer
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    // Storage layer
    #[error("Storage operation failed: {0}")]
    Storage(#[from] StorageError),

    //Serialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Server failed to start: {0}")]
    ServerStartFailed(String),

    #[error("Node failed to start: {0}")]
    NodeStartFailed(String),

    #[error("Internal server error")]
    ServerUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HypervisorError {
    #[error("Domain {0} not found")]
    DomainNotFound(String),

    #[error("Storage pool {0} not found")]
    PoolNotFound(String),

    /// Unrecoverable failure reported by the backend for one operation
    #[error("Hypervisor operation {operation} failed: {message}")]
    OperationFailed { operation: &'static str, message: String },

    #[error("Hypervisor connection lost: {0}")]
    Disconnected(String),
}

/// Public error taxonomy shared by every transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    OwnerMismatch,
    Unavailable,
    DeadlineExceeded,
    WatchOverrun,
    Compacted,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "not_found",
            ErrorCode::AlreadyExists => "already_exists",
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::OwnerMismatch => "owner_mismatch",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::DeadlineExceeded => "deadline_exceeded",
            ErrorCode::WatchOverrun => "watch_overrun",
            ErrorCode::Compacted => "compacted",
            ErrorCode::Internal => "internal",
        }
    }

    /// HTTP status used by the REST front end
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::NotFound => 404,
            ErrorCode::AlreadyExists => 409,
            ErrorCode::InvalidArgument => 400,
            ErrorCode::OwnerMismatch => 412,
            ErrorCode::Unavailable => 503,
            ErrorCode::DeadlineExceeded => 504,
            ErrorCode::WatchOverrun => 429,
            ErrorCode::Compacted => 410,
            ErrorCode::Internal => 500,
        }
    }

    pub fn grpc_code(&self) -> tonic::Code {
        match self {
            ErrorCode::NotFound => tonic::Code::NotFound,
            ErrorCode::AlreadyExists => tonic::Code::AlreadyExists,
            ErrorCode::InvalidArgument => tonic::Code::InvalidArgument,
            ErrorCode::OwnerMismatch => tonic::Code::FailedPrecondition,
            ErrorCode::Unavailable => tonic::Code::Unavailable,
            ErrorCode::DeadlineExceeded => tonic::Code::DeadlineExceeded,
            ErrorCode::WatchOverrun => tonic::Code::ResourceExhausted,
            ErrorCode::Compacted => tonic::Code::OutOfRange,
            ErrorCode::Internal => tonic::Code::Internal,
        }
    }
}

impl Error {
    /// Collapses the layered error into the public taxonomy.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Resource(ResourceError::NotFound { .. }) => ErrorCode::NotFound,
            Error::Resource(ResourceError::AlreadyExists { .. }) => ErrorCode::AlreadyExists,
            Error::Resource(ResourceError::InvalidArgument(_)) => ErrorCode::InvalidArgument,
            Error::Resource(ResourceError::OwnerMismatch { .. }) => ErrorCode::OwnerMismatch,
            Error::Watch(WatchError::Overrun { .. }) => ErrorCode::WatchOverrun,
            Error::Watch(WatchError::Compacted { .. }) => ErrorCode::Compacted,
            Error::Watch(WatchError::Closed(_)) => ErrorCode::Unavailable,
            Error::System(SystemError::Storage(StorageError::NotServing)) => ErrorCode::Unavailable,
            Error::System(SystemError::Network(NetworkError::ServiceUnavailable(_))) => ErrorCode::Unavailable,
            Error::System(SystemError::Network(NetworkError::TonicError(_))) => ErrorCode::Unavailable,
            Error::System(SystemError::Network(NetworkError::TonicStatusError(status))) => {
                code_from_grpc(status.code())
            }
            Error::System(SystemError::ServerUnavailable) => ErrorCode::Unavailable,
            Error::Hypervisor(HypervisorError::Disconnected(_)) => ErrorCode::Unavailable,
            Error::Config(_) => ErrorCode::InvalidArgument,
            Error::DeadlineExceeded(_) => ErrorCode::DeadlineExceeded,
            _ => ErrorCode::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == ErrorCode::NotFound
    }
}

fn code_from_grpc(code: tonic::Code) -> ErrorCode {
    match code {
        tonic::Code::NotFound => ErrorCode::NotFound,
        tonic::Code::AlreadyExists => ErrorCode::AlreadyExists,
        tonic::Code::InvalidArgument => ErrorCode::InvalidArgument,
        tonic::Code::FailedPrecondition => ErrorCode::OwnerMismatch,
        tonic::Code::Unavailable | tonic::Code::Cancelled => ErrorCode::Unavailable,
        tonic::Code::DeadlineExceeded => ErrorCode::DeadlineExceeded,
        tonic::Code::ResourceExhausted => ErrorCode::WatchOverrun,
        tonic::Code::OutOfRange => ErrorCode::Compacted,
        _ => ErrorCode::Internal,
    }
}

// ============== Conversion Implementations ============== //
impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Error::System(SystemError::Network(e))
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::System(SystemError::Storage(e))
    }
}

impl From<ConvertError> for Error {
    fn from(e: ConvertError) -> Self {
        Error::System(SystemError::Storage(StorageError::Convert(e)))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::System(SystemError::Serialization(e))
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        NetworkError::TonicError(Box::new(err)).into()
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        StorageError::DbError(err.to_string()).into()
    }
}

impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        NetworkError::TaskFailed(err).into()
    }
}

/// Client side: rebuild a typed error from a gRPC status.
impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        let message = status.message().to_string();
        match status.code() {
            tonic::Code::InvalidArgument => ResourceError::InvalidArgument(message).into(),
            tonic::Code::DeadlineExceeded => Error::DeadlineExceeded(Duration::ZERO),
            tonic::Code::Unavailable => NetworkError::ServiceUnavailable(message).into(),
            _ => NetworkError::TonicStatusError(Box::new(status)).into(),
        }
    }
}

/// Server side: every transport failure reaches the client as a typed status.
impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        tonic::Status::new(err.code().grpc_code(), err.to_string())
    }
}
