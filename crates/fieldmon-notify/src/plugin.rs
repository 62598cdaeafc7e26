use crate::error::{NotifyError, Result};
use crate::utils::redact_sensitive_json;
use crate::NotificationChannel;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Factory for creating [`NotificationChannel`] instances from JSON
/// configuration.
///
/// Each plugin is registered in the [`ChannelRegistry`] by its `name()`.
/// At startup the server validates every configured channel and
/// instantiates it through the matching plugin.
pub trait ChannelPlugin: Send + Sync {
    /// Returns the plugin type name (e.g., `"email"`, `"webhook"`).
    fn name(&self) -> &str;

    /// Validates a JSON config blob against this plugin's expected schema.
    fn validate_config(&self, config: &Value) -> Result<()>;

    /// Creates a configured channel instance from a validated JSON config.
    /// `channel_name` is the name rules use to refer to this instance.
    fn create_channel(
        &self,
        channel_name: &str,
        config: &Value,
    ) -> Result<Arc<dyn NotificationChannel>>;

    /// Returns a copy of `config` with secrets replaced by `"***"`, for logs.
    fn redact_config(&self, config: &Value) -> Value {
        redact_sensitive_json(config)
    }
}

/// Registry of available [`ChannelPlugin`]s, used to instantiate
/// notification channels from configuration.
///
/// # Examples
///
/// ```
/// use fieldmon_notify::plugin::ChannelRegistry;
///
/// let registry = ChannelRegistry::default();
/// assert!(registry.has_plugin("email"));
/// assert!(registry.has_plugin("webhook"));
/// assert!(registry.has_plugin("log"));
/// assert!(!registry.has_plugin("nonexistent"));
/// ```
pub struct ChannelRegistry {
    plugins: HashMap<String, Box<dyn ChannelPlugin>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    pub fn register(&mut self, plugin: Box<dyn ChannelPlugin>) {
        let name = plugin.name().to_string();
        self.plugins.insert(name, plugin);
    }

    pub fn validate_config(&self, type_name: &str, config: &Value) -> Result<()> {
        self.plugin(type_name)?.validate_config(config)
    }

    pub fn create_channel(
        &self,
        type_name: &str,
        channel_name: &str,
        config: &Value,
    ) -> Result<Arc<dyn NotificationChannel>> {
        let plugin = self.plugin(type_name)?;
        plugin.validate_config(config)?;
        tracing::debug!(
            channel = channel_name,
            channel_type = type_name,
            config = %plugin.redact_config(config),
            "Creating notification channel"
        );
        plugin.create_channel(channel_name, config)
    }

    fn plugin(&self, type_name: &str) -> Result<&dyn ChannelPlugin> {
        self.plugins
            .get(type_name)
            .map(|p| p.as_ref())
            .ok_or_else(|| NotifyError::UnknownChannelType(type_name.to_string()))
    }

    pub fn has_plugin(&self, type_name: &str) -> bool {
        self.plugins.contains_key(type_name)
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::channels::email::EmailPlugin));
        registry.register(Box::new(crate::channels::webhook::WebhookPlugin));
        registry.register(Box::new(crate::channels::log::LogPlugin));
        registry
    }
}
