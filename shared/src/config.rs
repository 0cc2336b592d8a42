use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::codec::{DEFAULT_MAX_FRAME_BYTES, HEADER_LEN};

/// Port the relay listens on when none is configured.
pub const DEFAULT_PORT: u16 = 1501;

/// What the relay tells a client whose display name is already taken.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoginRejection {
    /// Log the conflict locally and drop the connection without a word.
    #[default]
    Silent,
    /// Send a `Rejected` frame before dropping the connection.
    Notify,
}

/// What happens to live connections when the relay stops.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StopPolicy {
    /// Signal every connection handler to terminate.
    #[default]
    Close,
    /// Only close the listener; connections end on their own.
    Drain,
}

/// How a full per-recipient outbound queue is handled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the oldest pending frame to make room for the new one.
    #[default]
    DropOldest,
    /// Close the slow recipient's session.
    Disconnect,
}

/// Configuration loaded by the relay binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Host/interface to bind for incoming client connections.
    pub listen_host: String,
    /// TCP port to bind for client connections.
    pub listen_port: u16,
    pub login_rejection: LoginRejection,
    pub stop_policy: StopPolicy,
    /// Frames buffered per recipient before `overflow_policy` applies.
    pub outbound_queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    /// Largest frame body accepted from or sent to a client.
    pub max_frame_bytes: usize,
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = fs::read_to_string(path_ref).with_context(|| {
            format!("Failed to read relay config from {}", path_ref.display())
        })?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse relay config {}", path_ref.display()))?;
        config.finalize();
        Ok(config)
    }

    /// Clamp tunables into their usable ranges.
    pub fn finalize(&mut self) {
        self.outbound_queue_capacity = self.outbound_queue_capacity.clamp(1, 1024);
        self.max_frame_bytes = self.max_frame_bytes.max(HEADER_LEN);
    }

    /// Return the socket address string used for binding (`host:port`).
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: DEFAULT_PORT,
            login_rejection: LoginRejection::default(),
            stop_policy: StopPolicy::default(),
            outbound_queue_capacity: 8,
            overflow_policy: OverflowPolicy::default(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Configuration loaded by the client binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub relay_ip: String,
    pub relay_port: u16,
    pub display_name: String,
    /// Write every received snapshot to `snapshot_dir` as a JPEG.
    pub save_received: bool,
    pub snapshot_dir: PathBuf,
    /// JPEG quality (1-100) for saved snapshots.
    pub jpeg_quality: u8,
    /// Largest frame body sent to or accepted from the relay; keep equal to the relay's setting.
    pub max_frame_bytes: usize,
}

impl ClientConfig {
    /// Load configuration from a JSON file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = fs::read_to_string(path_ref).with_context(|| {
            format!("Failed to read client config from {}", path_ref.display())
        })?;
        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse client config {}", path_ref.display()))?;
        let base_dir = path_ref.parent().unwrap_or_else(|| Path::new("."));
        config.finalize(base_dir)?;
        Ok(config)
    }

    /// Clamp tunables, resolve a relative `snapshot_dir` against `base_dir`
    /// and create it when received snapshots are saved.
    pub fn finalize(&mut self, base_dir: &Path) -> Result<()> {
        self.jpeg_quality = self.jpeg_quality.clamp(1, 100);
        self.max_frame_bytes = self.max_frame_bytes.max(HEADER_LEN);

        if self.snapshot_dir.is_relative() {
            self.snapshot_dir = base_dir.join(&self.snapshot_dir);
        }

        if self.save_received {
            fs::create_dir_all(&self.snapshot_dir).with_context(|| {
                format!(
                    "Failed to create snapshot directory {}",
                    self.snapshot_dir.display()
                )
            })?;
        }

        Ok(())
    }

    /// Return the address of the relay (`host:port`).
    pub fn relay_addr(&self) -> String {
        format!("{}:{}", self.relay_ip, self.relay_port)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_ip: "127.0.0.1".to_string(),
            relay_port: DEFAULT_PORT,
            display_name: "painter".to_string(),
            save_received: true,
            snapshot_dir: PathBuf::from("received"),
            jpeg_quality: 90,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}
