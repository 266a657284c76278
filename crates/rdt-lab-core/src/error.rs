use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use rdt_lab_abstract::FrameError;
use thiserror::Error;

/// Compressed stream that does not decode under the expected format.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("compressed stream truncated: {0}")]
    Truncated(&'static str),
    #[error("code table is not a valid prefix code")]
    InvalidTable,
    #[error("bit stream ended after {decoded} of {expected} symbols")]
    ShortBitStream { decoded: usize, expected: usize },
    #[error("input of {0} bytes exceeds the 32-bit length header")]
    InputTooLarge(usize),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("failed to read {}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {}", path.display())]
    FileWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("file needs {count} packets; sequence numbers are 16 bits")]
    TooManyPackets { count: usize },
    #[error("transfer incomplete: {received} packets received, {expected:?} expected")]
    IncompleteTransfer {
        received: usize,
        expected: Option<usize>,
    },
    #[error("payload codec failed")]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("background task failed")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
