//! Capability traits for the external collaborators.
//!
//! The core never talks to the network itself. Outbound lines go through a
//! [`ChatTransport`], and permission predicates are answered by a
//! [`PermissionAuthority`]. Both are object-safe so the host can hand in
//! `Arc<dyn ...>` values per connection.

use crate::BoxFuture;
use crate::event::Sender;

/// One connection to a chat network.
pub trait ChatTransport: Send + Sync {
    /// Logical network name (e.g. "Freenode").
    fn network_name(&self) -> &str;

    /// Server address of the network (e.g. "irc.freenode.net").
    fn network_address(&self) -> &str;

    /// The bot's current nickname.
    fn bot_nickname(&self) -> String;

    /// Whether `name` denotes a channel rather than a user.
    fn is_channel_name(&self, name: &str) -> bool;

    /// Compare two names under the protocol's case mapping.
    fn casefold_eq(&self, a: &str, b: &str) -> bool;

    /// Send a line to a channel or user.
    fn send(
        &self,
        destination: &str,
        notice: bool,
        text: &str,
    ) -> BoxFuture<'_, Result<(), TransportError>>;
}

/// Answers whether a user holds a named permission.
pub trait PermissionAuthority: Send + Sync {
    /// Check `permission` for `user` on `network`. May suspend.
    fn check_permission<'a>(
        &'a self,
        network: &'a str,
        user: &'a Sender,
        permission: &'a str,
    ) -> BoxFuture<'a, bool>;
}

/// Errors from the chat transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("send to {destination} failed: {reason}")]
    SendFailed { destination: String, reason: String },

    #[error("transport disconnected")]
    Disconnected,
}
