pub mod channel;
pub mod client;
pub mod compress;
pub mod error;
pub mod files;
pub mod handler;
pub mod seq_set;
pub mod server;
pub mod store;
pub mod timer;
pub mod transport;

pub use channel::{LossyChannel, Verdict};
pub use client::{Client, TransferReport};
pub use compress::{Compressor, HuffmanCompressor, Identity, compressor_for};
pub use error::{CodecError, EngineError, Result};
pub use files::FileService;
pub use handler::{Session, SessionReport, SessionSettings};
pub use seq_set::{AckTracker, CompletionTracker, Phase, SeqSet};
pub use server::{Server, ServerSummary, SessionHandle};
pub use store::PacketStore;
pub use timer::{Timer, TimerSet};
pub use transport::{Outbound, UdpOutbound};
