//! Plan, command and status link between a HIFU control workstation and its
//! treatment controller
//!
//! The controller ([`Server`]) pushes a treatment plan (spots grouped by
//! layer plus sonication parameters) and session commands to the workstation
//! ([`Client`]), which reports progress back with status messages. Every
//! message travels on its own TCP connection. Plan delivery is confirmed by
//! echoing the receipt embedded in the plan.

pub mod client;
pub mod command;
pub mod connection;
pub mod error;
pub mod plan;
pub mod protocol;
pub mod receipt;
pub mod server;
pub mod settings;
pub mod status;
pub mod types;

// Re-export commonly used types
pub use client::{Client, ClientStats};
pub use command::{dispatch, ClientEvent, CommandTag};
pub use connection::{ConnectionConfig, Listener};
pub use error::LinkError;
pub use plan::{AxisMaps, PlanDelivery, PlanTransfer};
pub use protocol::{Header, Message, Protocol, ProtocolError, DEFAULT_MAX_MESSAGE_SIZE};
pub use receipt::{Receipt, ReceiptIssuer};
pub use server::Server;
pub use settings::{Endpoint, LinkSettings, SettingsError, SettingsStore};
pub use status::{decode_status, encode_status};
pub use types::{
    Coordinate, GroupKey, GroupedSpotMap, Plan, SessionProgress, SonicationParameter, Spot3D,
    SpotOrder, StatusSnapshot, StatusValue,
};

/// Result type for link operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// Configuration shared by both ends of the link
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Socket options and timeouts
    pub connection: ConnectionConfig,
    /// Maximum message size in bytes
    pub max_message_size: usize,
    /// Sender name stamped on receipts
    pub server_name: String,
    /// Recipient name stamped on receipts
    pub client_name: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            server_name: "ServerName".to_string(),
            client_name: "ClientName".to_string(),
        }
    }
}
