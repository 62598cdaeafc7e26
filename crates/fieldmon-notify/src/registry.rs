use crate::error::{NotifyError, Result};
use crate::plugin::ChannelRegistry;
use crate::NotificationChannel;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Channel name -> sender, as referenced by `AlertRule::notification_channels`.
///
/// New transports plug in through [`ChannelRegistry`] or by registering a
/// sender directly; the dispatcher only sees this map.
#[derive(Default, Clone)]
pub struct SenderRegistry {
    senders: HashMap<String, Arc<dyn NotificationChannel>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `sender` under `name`, replacing any previous sender.
    pub fn register(&mut self, name: impl Into<String>, sender: Arc<dyn NotificationChannel>) {
        self.senders.insert(name.into(), sender);
    }

    /// Builds a sender through the plugin for `type_name` and registers it.
    pub fn register_from_config(
        &mut self,
        plugins: &ChannelRegistry,
        name: &str,
        type_name: &str,
        config: &Value,
    ) -> Result<()> {
        if self.senders.contains_key(name) {
            return Err(NotifyError::InvalidConfig(format!(
                "duplicate channel name '{name}'"
            )));
        }
        let sender = plugins.create_channel(type_name, name, config)?;
        self.senders.insert(name.to_string(), sender);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NotificationChannel>> {
        self.senders.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.senders.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.senders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}
