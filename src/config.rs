//! Engine configuration and defaults.
//!
//! [`EngineConfig`] carries the connection-level limits announced in the
//! local Open and the default incoming capacity given to new sessions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default maximum frame size announced in Open.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 65_536;
/// Default highest channel number a session may use.
pub const DEFAULT_CHANNEL_MAX: u16 = u16::MAX;
/// Default highest link handle a session may use.
pub const DEFAULT_HANDLE_MAX: u32 = u32::MAX;

/// Settings applied to the connection and its sessions.
///
/// # Examples
///
/// ```
/// use amqp_engine::EngineConfig;
/// let config = EngineConfig::new("container-1")
///     .with_max_frame_size(1024)
///     .with_incoming_capacity(16 * 1024);
/// assert_eq!(config.max_frame_size, 1024);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub container_id: String,
    pub hostname: Option<String>,
    /// Largest frame payload the engine writes; `0` means unbounded.
    pub max_frame_size: u32,
    pub channel_max: u16,
    pub handle_max: u32,
    pub idle_timeout: Option<Duration>,
    /// Incoming capacity in bytes given to new sessions; `0` means unbounded.
    pub incoming_capacity: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            container_id: String::from("amqp-engine"),
            hostname: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            channel_max: DEFAULT_CHANNEL_MAX,
            handle_max: DEFAULT_HANDLE_MAX,
            idle_timeout: None,
            incoming_capacity: 0,
        }
    }
}

impl EngineConfig {
    /// Default configuration for `container_id`.
    #[must_use]
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    #[must_use]
    pub fn with_max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    #[must_use]
    pub fn with_channel_max(mut self, channel_max: u16) -> Self {
        self.channel_max = channel_max;
        self
    }

    #[must_use]
    pub fn with_handle_max(mut self, handle_max: u32) -> Self {
        self.handle_max = handle_max;
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    #[must_use]
    pub fn with_incoming_capacity(mut self, incoming_capacity: u32) -> Self {
        self.incoming_capacity = incoming_capacity;
        self
    }

    /// Check the configuration for values the engine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyContainerId`] when no container id is set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.container_id.is_empty() {
            return Err(ConfigError::EmptyContainerId);
        }
        Ok(())
    }
}
