use thiserror::Error;

use crate::util::id::{ReservationId, SliceId};

/// Stable error codes surfaced on the management plane and in update notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidArguments,
    NoSuchSlice,
    NoSuchReservation,
    NoSuchDelegation,
    NoSuchBroker,
    NoSuchActor,
    InvalidReservation,
    InvalidSlice,
    DatabaseError,
    TransportFailure,
    TransportTimeout,
    RemoteError,
    AuthenticationFailure,
    AccessDenied,
    InternalError,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("no such slice: {0}")]
    NoSuchSlice(SliceId),

    #[error("no such reservation: {0}")]
    NoSuchReservation(ReservationId),

    #[error("no such delegation: {0}")]
    NoSuchDelegation(String),

    #[error("no such broker: {0}")]
    NoSuchBroker(String),

    #[error("no such actor: {0}")]
    NoSuchActor(String),

    #[error("invalid reservation {rid}: {message}")]
    InvalidReservation { rid: ReservationId, message: String },

    #[error("invalid slice {slice_id}: {message}")]
    InvalidSlice { slice_id: SliceId, message: String },

    #[error("database failure: {0}")]
    Database(String),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("transport timeout after {0} ms")]
    TransportTimeout(u64),

    #[error("remote peer failed the request: {0}")]
    Remote(String),

    #[error("authentication failure: {0}")]
    AuthenticationFailure(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidArguments(_) => ErrorCode::InvalidArguments,
            Error::NoSuchSlice(_) => ErrorCode::NoSuchSlice,
            Error::NoSuchReservation(_) => ErrorCode::NoSuchReservation,
            Error::NoSuchDelegation(_) => ErrorCode::NoSuchDelegation,
            Error::NoSuchBroker(_) => ErrorCode::NoSuchBroker,
            Error::NoSuchActor(_) => ErrorCode::NoSuchActor,
            Error::InvalidReservation { .. } => ErrorCode::InvalidReservation,
            Error::InvalidSlice { .. } => ErrorCode::InvalidSlice,
            Error::Database(_) => ErrorCode::DatabaseError,
            Error::TransportFailure(_) => ErrorCode::TransportFailure,
            Error::TransportTimeout(_) => ErrorCode::TransportTimeout,
            Error::Remote(_) => ErrorCode::RemoteError,
            Error::AuthenticationFailure(_) => ErrorCode::AuthenticationFailure,
            Error::AccessDenied(_) => ErrorCode::AccessDenied,
            Error::Internal(_) => ErrorCode::InternalError,
        }
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
