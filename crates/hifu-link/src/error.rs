//! Error types for link operations

use crate::protocol::ProtocolError;
use crate::settings::SettingsError;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors that can occur while sending or receiving over the link
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Failed to send enough bytes: wrote {written} of {expected}")]
    ShortWrite { written: usize, expected: usize },

    #[error("Failed to check the receipt")]
    ReceiptMismatch { expected: String, received: String },

    #[error("Connection closed before the receipt arrived")]
    MissingAcknowledgement,

    #[error("Accept timeout")]
    AcceptTimeout,

    #[error("Receiver is not listening")]
    NotListening,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
}
