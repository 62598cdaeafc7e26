//! Notification delivery framework with pluggable channel support.
//!
//! Each alert is fanned out by the [`dispatcher::NotificationDispatcher`] to
//! the channels its rule names. Channels are looked up by name in the
//! [`registry::SenderRegistry`] and built from configuration by a
//! [`plugin::ChannelPlugin`]. Built-in channels are webhook (HTTP POST),
//! email (SMTP) and log.

pub mod channels;
pub mod dispatcher;
pub mod error;
pub mod plugin;
pub mod registry;
pub mod utils;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use error::Result;
use fieldmon_common::types::AlertEvent;

/// A notification delivery channel that sends alert events to an external
/// service (e.g., SMTP, webhook).
///
/// Implementations make a single attempt per call; timeouts and retries are
/// applied by the dispatcher.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Delivers the alert event through this channel.
    ///
    /// # Errors
    ///
    /// Returns an error if this attempt failed.
    async fn send(&self, alert: &AlertEvent) -> Result<()>;

    /// Returns the channel type name (e.g., `"email"`, `"webhook"`).
    fn channel_name(&self) -> &str;
}
