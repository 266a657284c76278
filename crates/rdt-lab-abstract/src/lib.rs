pub mod checksum;
pub mod config;
pub mod packet;

pub use checksum::internet_checksum;
pub use config::{ClientConfig, Compression, ConfigError, ProtocolKind, ServerConfig};
pub use packet::{
    ACK_FRAME_LEN, AckPacket, DATA_HEADER_LEN, DataPacket, FrameError, FrameKind, Inbound,
    MAX_PAYLOAD_LEN,
};
