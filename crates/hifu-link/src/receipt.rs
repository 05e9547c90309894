//! Delivery receipts for plan transfer
//!
//! The controller embeds a receipt in every PLAN message and remembers it.
//! The workstation echoes the receipt back on the same connection, and the
//! controller accepts the delivery only if the echo is byte-for-byte equal.

use chrono::{DateTime, Local, TimeZone};
use std::fmt;

/// Opaque delivery-confirmation string
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Receipt(String);

impl Receipt {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Byte-exact comparison against an echoed receipt
    pub fn matches(&self, echoed: &str) -> bool {
        self.0.as_bytes() == echoed.as_bytes()
    }
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Receipt {
    fn from(text: String) -> Self {
        Self(text)
    }
}

/// Generates receipts and counts confirmed deliveries
#[derive(Debug, Clone)]
pub struct ReceiptIssuer {
    server_name: String,
    client_name: String,
    send_count: u32,
}

impl Default for ReceiptIssuer {
    fn default() -> Self {
        Self::new("ServerName", "ClientName")
    }
}

impl ReceiptIssuer {
    pub fn new(server_name: impl Into<String>, client_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            client_name: client_name.into(),
            send_count: 1,
        }
    }

    /// Number stamped on the next receipt, starting at 1
    pub fn send_count(&self) -> u32 {
        self.send_count
    }

    /// Issue a receipt stamped with the current local time
    pub fn issue(&self) -> Receipt {
        self.issue_at(&Local::now())
    }

    pub fn issue_at<Tz>(&self, now: &DateTime<Tz>) -> Receipt
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        Receipt(format!(
            "From: {}, To: {}, Time: {}, {}, {}",
            self.server_name,
            self.client_name,
            self.send_count,
            now.format("%a %b %-d %Y"),
            now.format("%H:%M:%S"),
        ))
    }

    /// Record a confirmed delivery
    pub fn confirm(&mut self) {
        self.send_count += 1;
    }
}
