use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::packet::MAX_PAYLOAD_LEN;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown protocol id {0}; expected 1, 2 or 3")]
    UnknownProtocol(u8),
    #[error("window size must be at least 1")]
    ZeroWindow,
    #[error("chunk size {size} outside 1..={max}")]
    ChunkSize { size: usize, max: usize },
    #[error("{name} must be a probability in [0, 1], got {value}")]
    Probability { name: &'static str, value: f64 },
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("file name must not be empty")]
    EmptyFileName,
}

/// Retransmission strategy, persisted as its numeric protocol id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ProtocolKind {
    StopAndWait,
    SelectiveRepeat,
    GoBackN,
}

impl TryFrom<u8> for ProtocolKind {
    type Error = ConfigError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            1 => Ok(ProtocolKind::StopAndWait),
            2 => Ok(ProtocolKind::SelectiveRepeat),
            3 => Ok(ProtocolKind::GoBackN),
            other => Err(ConfigError::UnknownProtocol(other)),
        }
    }
}

impl From<ProtocolKind> for u8 {
    fn from(kind: ProtocolKind) -> Self {
        match kind {
            ProtocolKind::StopAndWait => 1,
            ProtocolKind::SelectiveRepeat => 2,
            ProtocolKind::GoBackN => 3,
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolKind::StopAndWait => f.write_str("stop-and-wait"),
            ProtocolKind::SelectiveRepeat => f.write_str("selective-repeat"),
            ProtocolKind::GoBackN => f.write_str("go-back-n"),
        }
    }
}

/// Payload compression applied before fragmentation. Both ends must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    #[default]
    Huffman,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server_ip: IpAddr,
    /// Receive port. `0` binds an ephemeral port.
    pub server_port: u16,
    pub window_size: usize,
    pub protocol: ProtocolKind,
    pub retransmit_timeout_ms: u64,
    /// The dispatcher stops after this long without any inbound datagram.
    pub idle_timeout_ms: u64,
    pub chunk_size: usize,
    /// Requested file names are resolved relative to this directory.
    pub files_dir: PathBuf,
    pub compression: Compression,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            server_port: 5000,
            window_size: 5,
            protocol: ProtocolKind::GoBackN,
            retransmit_timeout_ms: 500,
            idle_timeout_ms: 5000,
            chunk_size: 1000,
            files_dir: PathBuf::from("."),
            compression: Compression::default(),
        }
    }
}

impl ServerConfig {
    pub fn retransmit_timeout(&self) -> Duration {
        Duration::from_millis(self.retransmit_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_PAYLOAD_LEN {
            return Err(ConfigError::ChunkSize {
                size: self.chunk_size,
                max: MAX_PAYLOAD_LEN,
            });
        }
        if self.retransmit_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration("retransmit_timeout_ms"));
        }
        if self.idle_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration("idle_timeout_ms"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_ip: IpAddr,
    pub server_port: u16,
    pub client_ip: IpAddr,
    /// Receive port announced in the file request. `0` binds an ephemeral port.
    pub client_port: u16,
    pub file_name: String,
    pub loss_probability: f64,
    pub corrupt_probability: f64,
    /// Interval between file-request retries until the first data packet lands.
    pub request_retry_ms: u64,
    /// Seeds the simulated channel for reproducible runs.
    pub seed: Option<u64>,
    pub output_dir: PathBuf,
    pub compression: Compression,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            server_port: 5000,
            client_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            client_port: 6000,
            file_name: "input.txt".to_string(),
            loss_probability: 0.3,
            corrupt_probability: 0.3,
            request_retry_ms: 2000,
            seed: None,
            output_dir: PathBuf::from("."),
            compression: Compression::default(),
        }
    }
}

impl ClientConfig {
    pub fn request_retry(&self) -> Duration {
        Duration::from_millis(self.request_retry_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_probability("loss_probability", self.loss_probability)?;
        check_probability("corrupt_probability", self.corrupt_probability)?;
        if self.file_name.is_empty() {
            return Err(ConfigError::EmptyFileName);
        }
        if self.request_retry_ms == 0 {
            return Err(ConfigError::ZeroDuration("request_retry_ms"));
        }
        Ok(())
    }
}

fn check_probability(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Probability { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_ids_map_both_ways() {
        for id in 1..=3u8 {
            let kind = ProtocolKind::try_from(id).unwrap();
            assert_eq!(u8::from(kind), id);
        }
        assert_eq!(
            ProtocolKind::try_from(4u8),
            Err(ConfigError::UnknownProtocol(4))
        );
    }

    #[test]
    fn server_toml_with_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            server_ip = "127.0.0.1"
            server_port = 5000
            window_size = 3
            protocol = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.protocol, ProtocolKind::SelectiveRepeat);
        assert_eq!(config.window_size, 3);
        assert_eq!(config.retransmit_timeout(), Duration::from_millis(500));
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.compression, Compression::Huffman);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn server_toml_rejects_unknown_protocol() {
        let parsed: Result<ServerConfig, _> = toml::from_str("protocol = 7");
        assert!(parsed.is_err());
    }

    #[test]
    fn client_toml_round_trip() {
        let config: ClientConfig = toml::from_str(
            r#"
            server_ip = "127.0.0.1"
            server_port = 5000
            client_ip = "127.0.0.1"
            client_port = 6000
            file_name = "notes.txt"
            loss_probability = 0.0
            corrupt_probability = 0.1
            seed = 7
            compression = "none"
            "#,
        )
        .unwrap();

        assert_eq!(config.file_name, "notes.txt");
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.compression, Compression::None);
        assert_eq!(config.request_retry(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_catches_bad_values() {
        let server = ServerConfig {
            window_size: 0,
            ..Default::default()
        };
        assert_eq!(server.validate(), Err(ConfigError::ZeroWindow));

        let server = ServerConfig {
            chunk_size: MAX_PAYLOAD_LEN + 1,
            ..Default::default()
        };
        assert!(matches!(server.validate(), Err(ConfigError::ChunkSize { .. })));

        let client = ClientConfig {
            loss_probability: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            client.validate(),
            Err(ConfigError::Probability { name: "loss_probability", .. })
        ));

        let client = ClientConfig {
            corrupt_probability: f64::NAN,
            ..Default::default()
        };
        assert!(client.validate().is_err());
    }
}
