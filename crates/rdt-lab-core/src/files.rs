use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use rdt_lab_abstract::{DataPacket, MAX_PAYLOAD_LEN, ServerConfig};
use tracing::debug;

use crate::compress::{Compressor, compressor_for};
use crate::error::{EngineError, Result};

const MAX_PACKETS: usize = u16::MAX as usize + 1;

/// Turns a file on disk into the ordered packet list one session transmits.
///
/// Cheap to clone; each session gets its own handle.
#[derive(Clone)]
pub struct FileService {
    files_dir: PathBuf,
    chunk_size: usize,
    compressor: Arc<dyn Compressor>,
}

impl fmt::Debug for FileService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileService")
            .field("files_dir", &self.files_dir)
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl FileService {
    /// `chunk_size` is clamped to what a single frame can carry.
    pub fn new(
        files_dir: impl Into<PathBuf>,
        chunk_size: usize,
        compressor: Arc<dyn Compressor>,
    ) -> Self {
        Self {
            files_dir: files_dir.into(),
            chunk_size: chunk_size.clamp(1, MAX_PAYLOAD_LEN),
            compressor,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            config.files_dir.clone(),
            config.chunk_size,
            compressor_for(config.compression),
        )
    }

    pub fn resolve(&self, file_name: &str) -> PathBuf {
        self.files_dir.join(file_name)
    }

    /// Read, compress and split `file_name` into dense, final-terminated
    /// data packets. Blocking; run it off the async workers.
    pub fn prepare_file_packets(
        &self,
        file_name: &str,
        source_port: u16,
        dest_port: u16,
    ) -> Result<Vec<DataPacket>> {
        let path = self.resolve(file_name);
        let raw = std::fs::read(&path).map_err(|source| EngineError::FileRead {
            path: path.clone(),
            source,
        })?;
        let compressed = Bytes::from(self.compressor.compress(&raw)?);
        debug!(
            path = %path.display(),
            raw = raw.len(),
            compressed = compressed.len(),
            "file compressed"
        );
        self.fragment(&compressed, source_port, dest_port)
    }

    /// Split `data` into packets of at most `chunk_size` payload bytes.
    /// Empty input still yields one empty final packet.
    pub fn fragment(
        &self,
        data: &Bytes,
        source_port: u16,
        dest_port: u16,
    ) -> Result<Vec<DataPacket>> {
        let count = data.len().div_ceil(self.chunk_size).max(1);
        if count > MAX_PACKETS {
            return Err(EngineError::TooManyPackets { count });
        }

        (0..count)
            .map(|index| -> Result<DataPacket> {
                let start = index * self.chunk_size;
                let end = (start + self.chunk_size).min(data.len());
                let packet =
                    DataPacket::new(source_port, dest_port, index as u16, data.slice(start..end))?;
                Ok(packet.with_final(index + 1 == count))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::compress::{HuffmanCompressor, Identity};

    fn service(dir: &Path, compressor: Arc<dyn Compressor>) -> FileService {
        FileService::new(dir, 1000, compressor)
    }

    #[test]
    fn splits_into_dense_final_terminated_packets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("input.txt"), vec![b'x'; 2500]).unwrap();

        let packets = service(dir.path(), Arc::new(Identity))
            .prepare_file_packets("input.txt", 5000, 6000)
            .unwrap();

        let sizes: Vec<_> = packets.iter().map(|p| p.payload().len()).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
        assert!(packets.iter().enumerate().all(|(i, p)| usize::from(p.seq) == i));
        assert_eq!(
            packets.iter().map(|p| p.is_final).collect::<Vec<_>>(),
            vec![false, false, true]
        );
        assert!(packets.iter().all(|p| p.source_port == 5000 && p.dest_port == 6000));
    }

    #[test]
    fn exact_multiple_has_no_trailing_empty_packet() {
        let svc = FileService::new(".", 4, Arc::new(Identity));
        let packets = svc.fragment(&Bytes::from_static(b"abcdefgh"), 1, 2).unwrap();
        assert_eq!(packets.len(), 2);
        assert!(packets[1].is_final);
    }

    #[test]
    fn empty_file_yields_single_final_packet() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty"), b"").unwrap();

        let packets = service(dir.path(), Arc::new(Identity))
            .prepare_file_packets("empty", 5000, 6000)
            .unwrap();
        assert_eq!(packets.len(), 1);
        assert!(packets[0].is_final);
        assert!(packets[0].payload().is_empty());
    }

    #[test]
    fn payload_is_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let text = "abcabcabd".repeat(300);
        std::fs::write(dir.path().join("text"), &text).unwrap();

        let packets = service(dir.path(), Arc::new(HuffmanCompressor))
            .prepare_file_packets("text", 1, 2)
            .unwrap();
        let joined: Vec<u8> = packets.iter().flat_map(|p| p.payload().to_vec()).collect();
        assert_eq!(HuffmanCompressor.decompress(&joined).unwrap(), text.as_bytes());
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = service(dir.path(), Arc::new(Identity))
            .prepare_file_packets("absent", 1, 2)
            .unwrap_err();
        match err {
            EngineError::FileRead { path, .. } => assert!(path.ends_with("absent")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn chunk_size_is_capped_at_frame_limit() {
        let svc = FileService::new(".", 70_000, Arc::new(Identity));
        let packets = svc.fragment(&Bytes::from(vec![1u8; 70_000]), 1, 2).unwrap();

        let sizes: Vec<_> = packets.iter().map(|p| p.payload().len()).collect();
        assert_eq!(sizes, vec![MAX_PAYLOAD_LEN, 70_000 - MAX_PAYLOAD_LEN]);
        for packet in &packets {
            let decoded = DataPacket::decode(&packet.encode()).unwrap();
            assert!(!decoded.is_corrupted());
            assert_eq!(&decoded, packet);
        }
    }

    #[test]
    fn too_many_packets_is_rejected() {
        let svc = FileService::new(".", 1, Arc::new(Identity));
        let data = Bytes::from(vec![0u8; MAX_PACKETS + 1]);
        assert!(matches!(
            svc.fragment(&data, 1, 2),
            Err(EngineError::TooManyPackets { count }) if count == MAX_PACKETS + 1
        ));
    }
}
