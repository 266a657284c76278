//! Server-side retransmission handlers, one per client session.
//!
//! A [`Session`] owns the encoded frames of one file, the outbound path to
//! its client and the shared [`AckTracker`] the dispatcher feeds. The
//! protocol chosen at session start decides how frames are paced and
//! retransmitted; every protocol terminates once all packets are
//! acknowledged and has no other exit.

mod go_back_n;
mod selective_repeat;
mod stop_and_wait;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rdt_lab_abstract::{DataPacket, ProtocolKind, ServerConfig};
use serde::Serialize;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::seq_set::AckTracker;
use crate::transport::Outbound;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub protocol: ProtocolKind,
    pub window_size: usize,
    pub retransmit_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            protocol: config.protocol,
            window_size: config.window_size.max(1),
            retransmit_timeout: config.retransmit_timeout(),
        }
    }
}

/// Outcome of a finished session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub client: SocketAddr,
    pub protocol: ProtocolKind,
    pub packets: usize,
    pub transmissions: usize,
    pub retransmissions: usize,
    pub elapsed: Duration,
}

pub struct Session<O> {
    client: SocketAddr,
    settings: SessionSettings,
    frames: Vec<Bytes>,
    sends: Vec<u32>,
    acks: Arc<AckTracker>,
    outbound: O,
    transmissions: usize,
    retransmissions: usize,
}

impl<O: Outbound> Session<O> {
    /// Frames are encoded once here; the packet list is never touched again.
    pub fn new(
        client: SocketAddr,
        settings: SessionSettings,
        packets: &[DataPacket],
        acks: Arc<AckTracker>,
        outbound: O,
    ) -> Self {
        Self {
            client,
            settings,
            frames: packets.iter().map(DataPacket::encode).collect(),
            sends: vec![0; packets.len()],
            acks,
            outbound,
            transmissions: 0,
            retransmissions: 0,
        }
    }

    pub async fn run(mut self) -> SessionReport {
        let started = Instant::now();
        info!(
            client = %self.client,
            protocol = %self.settings.protocol,
            packets = self.frames.len(),
            window = self.settings.window_size,
            "session started"
        );

        match self.settings.protocol {
            ProtocolKind::StopAndWait => stop_and_wait::drive(&mut self).await,
            ProtocolKind::SelectiveRepeat => selective_repeat::drive(&mut self).await,
            ProtocolKind::GoBackN => go_back_n::drive(&mut self).await,
        }

        let report = SessionReport {
            client: self.client,
            protocol: self.settings.protocol,
            packets: self.frames.len(),
            transmissions: self.transmissions,
            retransmissions: self.retransmissions,
            elapsed: started.elapsed(),
        };
        info!(
            client = %report.client,
            transmissions = report.transmissions,
            retransmissions = report.retransmissions,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "session finished"
        );
        report
    }

    fn len(&self) -> usize {
        self.frames.len()
    }

    fn window(&self) -> usize {
        self.settings.window_size
    }

    fn timeout(&self) -> Duration {
        self.settings.retransmit_timeout
    }

    fn is_acked(&self, index: usize) -> bool {
        self.acks.is_acked(index as u16)
    }

    /// Transmit frame `index`. Failures are logged and otherwise treated
    /// as loss.
    async fn send(&mut self, index: usize) {
        let resend = self.sends[index] > 0;
        self.sends[index] += 1;
        self.transmissions += 1;
        if resend {
            self.retransmissions += 1;
        }
        debug!(client = %self.client, seq = index, resend, "data sent");

        if let Err(err) = self.outbound.transmit(self.frames[index].clone()).await {
            warn!(client = %self.client, seq = index, error = %err, "transmit failed");
        }
    }

    /// Suspend until a new ACK is recorded or `deadline` passes.
    async fn wait(&self, deadline: Instant) {
        tokio::select! {
            _ = self.acks.changed() => {}
            _ = sleep_until(deadline) => {}
        }
    }
}
