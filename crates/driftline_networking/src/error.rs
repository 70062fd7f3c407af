//! # Sync Error Types
//!
//! Errors raised at the crate's boundaries: configuration loading, message
//! decoding, transport endpoints and connection management. Tick paths
//! never return these; they degrade instead.

use driftline_shared::ConnectionId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the synchronization layer.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration file could not be read.
    #[error("failed to read configuration {path}: {source}")]
    ConfigIo {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML for [`crate::SyncConfig`].
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration parsed but is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Received an empty datagram.
    #[error("empty message")]
    EmptyMessage,

    /// Message tag byte is not known.
    #[error("unknown message tag: {0:#04x}")]
    UnknownMessageTag(u8),

    /// Message length does not match its tag.
    #[error("message {tag:#04x} has length {actual}, expected {expected}")]
    MessageLength {
        /// Message tag.
        tag: u8,
        /// Expected total length.
        expected: usize,
        /// Actual total length.
        actual: usize,
    },

    /// Encoded message does not fit in one packet.
    #[error("message of {0} bytes exceeds the packet size")]
    MessageTooLarge(usize),

    /// Peer endpoint has been dropped.
    #[error("transport to connection {0:?} is closed")]
    TransportClosed(ConnectionId),

    /// Connection is not known to the receiver.
    #[error("unknown connection {0:?}")]
    UnknownConnection(ConnectionId),

    /// Connection id is already in use.
    #[error("connection {0:?} is already connected")]
    AlreadyConnected(ConnectionId),
}

/// Result type for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;
