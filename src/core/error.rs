//! Error taxonomy for handshake, connection, transfer and validation paths.
//!
//! Each component returns its own narrow error type. The session façade
//! folds them into [`SessionError`], whose `Display` output is the text shown
//! to the operator.

use thiserror::Error;

/// Failure to turn a shareable token back into a ticket.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("token is empty")]
    Empty,

    #[error("unknown token format version '{0}'")]
    UnknownVersion(char),

    #[error("token is not valid url-safe base64: {0}")]
    Base64(String),

    #[error("token payload could not be decompressed: {0}")]
    Decompress(String),

    #[error("token payload is not a valid ticket: {0}")]
    Json(String),
}

/// Failures while establishing a connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("invalid connection code: {0}")]
    InvalidToken(#[from] DecodeError),

    #[error("peer error: {0}")]
    PeerError(String),

    #[error("a connection attempt is already in progress")]
    AlreadyInProgress,

    #[error("no connection attempt is waiting for this step")]
    NotReady,
}

/// Failures on an established (or expected) channel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection is not open")]
    NotOpen,

    #[error("{0}")]
    RemoteRejected(String),

    #[error("connection error: {0}")]
    TransportError(String),

    #[error("no connection to {0}")]
    UnknownEntry(String),
}

/// Failures that block a single send path without touching the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("no file selected")]
    NoFileSelected,

    #[error("a file is already being sent on this connection")]
    TransferAlreadyInProgress,
}

/// Field-level validation failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("peer id must look like xxxxxxxx-xxxx-4xxx-yxxx-xxxxxxxxxxxx")]
    MalformedIdentifier,

    #[error("link carries neither a peer id nor a session code")]
    MalformedLink,
}

/// Umbrella error returned by [`crate::core::session::Session`] operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}
