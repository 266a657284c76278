use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use rdt_lab_abstract::DataPacket;

use crate::error::{EngineError, Result};
use crate::seq_set::CompletionTracker;

/// Client-side buffer of received payloads, deduplicated by sequence number.
#[derive(Debug, Default)]
pub struct PacketStore {
    progress: CompletionTracker,
    payloads: BTreeMap<u16, Bytes>,
}

impl PacketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `packet`'s payload. Returns `false` for a duplicate, which is
    /// left untouched.
    pub fn accept(&mut self, packet: &DataPacket) -> bool {
        if !self.progress.record(packet.seq, packet.is_final) {
            return false;
        }
        self.payloads.insert(packet.seq, packet.payload().clone());
        true
    }

    pub fn is_complete(&self) -> bool {
        self.progress.is_complete()
    }

    pub fn received(&self) -> usize {
        self.payloads.len()
    }

    /// Concatenate payloads in sequence order.
    pub fn reassemble(&self) -> Result<Bytes> {
        if !self.is_complete() {
            return Err(EngineError::IncompleteTransfer {
                received: self.received(),
                expected: self.progress.final_seq().map(|seq| usize::from(seq) + 1),
            });
        }

        let total = self.payloads.values().map(Bytes::len).sum();
        let mut out = BytesMut::with_capacity(total);
        for payload in self.payloads.values() {
            out.extend_from_slice(payload);
        }
        Ok(out.freeze())
    }
}
