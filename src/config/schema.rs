//! TOML configuration schema for the reconnecting client.
//!
//! [`ClientConfig`] is what callers write (in code or in a TOML file);
//! [`ClientConfig::validate`] turns it into a [`ValidatedConfig`] with
//! defaults applied and the frame codec built. Durations are written as
//! human-readable strings (`"3s"`, `"250ms"`) and parsed with `humantime`.
//!
//! ```toml
//! address = "127.0.0.1:3563"
//! conn_num = 2
//! connect_interval = "3s"
//! pending_write_num = 100
//! auto_reconnect = true
//!
//! [frame]
//! length_width = 2
//! max_len = 4096
//! byte_order = "big"
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::codec::{ByteOrder, FrameCodec, LengthWidth, DEFAULT_MAX_FRAME_LEN};
use crate::config::error::ConfigError;

/// Default number of connection slots.
pub const DEFAULT_CONN_NUM: usize = 1;

/// Default wait between reconnect attempts.
pub const DEFAULT_CONNECT_INTERVAL: Duration = Duration::from_secs(3);

/// Default outbound queue depth per connection.
pub const DEFAULT_PENDING_WRITE_NUM: usize = 100;

/// Serializes `Duration` values as humantime strings.
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        humantime::format_duration(*duration)
            .to_string()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

fn default_conn_num() -> usize {
    DEFAULT_CONN_NUM
}

fn default_connect_interval() -> Duration {
    DEFAULT_CONNECT_INTERVAL
}

fn default_pending_write_num() -> usize {
    DEFAULT_PENDING_WRITE_NUM
}

/// Frame layout shared by both ends of a connection.
///
/// `length_width` and `max_len` have no TOML default and must be written
/// out; `min_len` defaults to 0 and `byte_order` to big-endian.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FrameConfig {
    /// Width of the length field in bytes (1, 2 or 4).
    pub length_width: u8,
    /// Inclusive minimum payload length.
    #[serde(default)]
    pub min_len: u32,
    /// Inclusive maximum payload length.
    pub max_len: u32,
    /// Byte order of the length field.
    #[serde(default)]
    pub byte_order: ByteOrder,
}

impl FrameConfig {
    /// Creates a frame layout with no minimum and big-endian lengths.
    pub fn new(length_width: u8, max_len: u32) -> Self {
        Self {
            length_width,
            min_len: 0,
            max_len,
            byte_order: ByteOrder::Big,
        }
    }

    /// Sets the inclusive minimum payload length.
    #[must_use]
    pub fn with_min_len(mut self, min_len: u32) -> Self {
        self.min_len = min_len;
        self
    }

    /// Sets the byte order of the length field.
    #[must_use]
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Builds the codec described by this layout.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Frame`] for an unsupported width or unusable
    /// bounds.
    pub fn codec(&self) -> Result<FrameCodec, ConfigError> {
        let width = LengthWidth::try_from(self.length_width)?;
        Ok(FrameCodec::new(
            width,
            self.min_len,
            self.max_len,
            self.byte_order,
        )?)
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self::new(2, DEFAULT_MAX_FRAME_LEN)
    }
}

/// Settings for a [`TcpClient`](crate::client::TcpClient).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Remote `host:port` to dial.
    pub address: String,
    /// Number of independent connection slots. 0 is replaced by 1.
    #[serde(default = "default_conn_num")]
    pub conn_num: usize,
    /// Wait between a failed or finished connection and the next dial.
    #[serde(
        default = "default_connect_interval",
        with = "serde_duration"
    )]
    pub connect_interval: Duration,
    /// Outbound queue depth per connection. 0 is replaced by 100.
    #[serde(default = "default_pending_write_num")]
    pub pending_write_num: usize,
    /// Dial again after a session ends instead of terminating the slot.
    #[serde(default)]
    pub auto_reconnect: bool,
    /// Wire framing.
    pub frame: FrameConfig,
}

impl ClientConfig {
    /// Creates a configuration with default slot, interval and queue settings.
    pub fn new(address: impl Into<String>, frame: FrameConfig) -> Self {
        Self {
            address: address.into(),
            conn_num: DEFAULT_CONN_NUM,
            connect_interval: DEFAULT_CONNECT_INTERVAL,
            pending_write_num: DEFAULT_PENDING_WRITE_NUM,
            auto_reconnect: false,
            frame,
        }
    }

    /// Sets the number of connection slots.
    #[must_use]
    pub fn with_conn_num(mut self, conn_num: usize) -> Self {
        self.conn_num = conn_num;
        self
    }

    /// Sets the reconnect interval.
    #[must_use]
    pub fn with_connect_interval(mut self, interval: Duration) -> Self {
        self.connect_interval = interval;
        self
    }

    /// Sets the outbound queue depth per connection.
    #[must_use]
    pub fn with_pending_write_num(mut self, depth: usize) -> Self {
        self.pending_write_num = depth;
        self
    }

    /// Enables or disables reconnecting after a session ends.
    #[must_use]
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Applies defaults to out-of-range values and builds the frame codec.
    ///
    /// Each replaced value is logged at warn level. Frame settings are never
    /// defaulted: an invalid layout is an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingAddress`] for an empty address and
    /// [`ConfigError::Frame`] for an invalid frame layout.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let address = self.address.trim();
        if address.is_empty() {
            return Err(ConfigError::MissingAddress);
        }

        let codec = self.frame.codec()?;

        let conn_num = if self.conn_num == 0 {
            warn!(conn_num = DEFAULT_CONN_NUM, "invalid conn_num, reset to default");
            DEFAULT_CONN_NUM
        } else {
            self.conn_num
        };

        let connect_interval = if self.connect_interval.is_zero() {
            warn!(
                connect_interval = ?DEFAULT_CONNECT_INTERVAL,
                "invalid connect_interval, reset to default"
            );
            DEFAULT_CONNECT_INTERVAL
        } else {
            self.connect_interval
        };

        let pending_write_num = if self.pending_write_num == 0 {
            warn!(
                pending_write_num = DEFAULT_PENDING_WRITE_NUM,
                "invalid pending_write_num, reset to default"
            );
            DEFAULT_PENDING_WRITE_NUM
        } else {
            self.pending_write_num
        };

        Ok(ValidatedConfig {
            address: address.to_string(),
            conn_num,
            connect_interval,
            pending_write_num,
            auto_reconnect: self.auto_reconnect,
            codec,
        })
    }
}

/// Configuration with defaults applied, ready to drive dial loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedConfig {
    /// Remote `host:port` to dial.
    pub address: String,
    /// Number of connection slots, at least 1.
    pub conn_num: usize,
    /// Non-zero reconnect interval.
    pub connect_interval: Duration,
    /// Non-zero outbound queue depth.
    pub pending_write_num: usize,
    /// Dial again after a session ends.
    pub auto_reconnect: bool,
    /// Codec shared by every session.
    pub codec: FrameCodec,
}
