//! Client side of a transfer: request a file, receive it through the
//! simulated channel, acknowledge each usable packet and write the result.
//!
//! Two tasks cooperate. The receive task owns the [`PacketStore`] and pushes
//! one ACK per usable packet onto a queue; the ACK task drains that queue to
//! the server. Each stops on its own completion rule and both are joined
//! before reassembly.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rdt_lab_abstract::{AckPacket, ClientConfig, DataPacket};
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::channel::{LossyChannel, Verdict};
use crate::compress::Compressor;
use crate::error::{EngineError, Result};
use crate::seq_set::{CompletionTracker, Phase};
use crate::store::PacketStore;

const RECV_BUFFER: usize = 65_536;

/// Summary of one finished client run.
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub file_name: String,
    pub output_path: PathBuf,
    pub bytes_written: usize,
    pub packets: usize,
    pub duplicate_packets: usize,
    pub dropped: usize,
    pub corrupted: usize,
    pub acks_sent: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Default)]
struct ReceiveStats {
    duplicates: usize,
    dropped: usize,
    corrupted: usize,
}

pub struct Client {
    config: ClientConfig,
    receiver: UdpSocket,
    sender: Arc<UdpSocket>,
    local: SocketAddr,
    compressor: Arc<dyn Compressor>,
}

impl Client {
    /// Bind the fixed receive port and an ephemeral send port.
    pub async fn bind(config: ClientConfig, compressor: Arc<dyn Compressor>) -> Result<Self> {
        let receive_addr = SocketAddr::new(config.client_ip, config.client_port);
        let receiver = bind(receive_addr).await?;
        let local = receiver.local_addr()?;
        let sender = bind(SocketAddr::new(config.client_ip, 0)).await?;

        Ok(Self {
            config,
            receiver,
            sender: Arc::new(sender),
            local,
            compressor,
        })
    }

    /// The receive address announced to the server.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn output_path(&self) -> PathBuf {
        output_path(&self.config.output_dir, &self.config.file_name)
    }

    pub async fn run(self) -> Result<TransferReport> {
        let started = Instant::now();
        let server = SocketAddr::new(self.config.server_ip, self.config.server_port);
        let output_path = self.output_path();
        let Client {
            config,
            receiver,
            sender,
            local,
            compressor,
        } = self;

        let channel = LossyChannel::new(
            config.loss_probability,
            config.corrupt_probability,
            config.seed,
        );
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let first_arrival = Arc::new(Notify::new());

        info!(%server, file = %config.file_name, receive = %local, "requesting file");
        let receive_task = tokio::spawn(receive_loop(
            receiver,
            channel,
            ack_tx,
            local.port(),
            Arc::clone(&first_arrival),
        ));
        let ack_task = tokio::spawn(ack_loop(Arc::clone(&sender), server, ack_rx));

        let request =
            DataPacket::file_request(local.port(), server.port(), &config.file_name)?.encode();
        loop {
            if let Err(err) = sender.send_to(&request, server).await {
                warn!(%server, error = %err, "file request send failed");
            }
            let arrived = tokio::select! {
                _ = first_arrival.notified() => true,
                _ = sleep(config.request_retry()) => false,
            };
            if arrived || receive_task.is_finished() {
                break;
            }
            debug!(%server, "no data yet, file request resent");
        }

        let (store, stats) = receive_task.await??;
        let acks_sent = ack_task.await?;

        let compressed = store.reassemble()?;
        let data = compressor.decompress(&compressed)?;
        tokio::fs::write(&output_path, &data)
            .await
            .map_err(|source| EngineError::FileWrite {
                path: output_path.clone(),
                source,
            })?;

        let report = TransferReport {
            file_name: config.file_name,
            output_path,
            bytes_written: data.len(),
            packets: store.received(),
            duplicate_packets: stats.duplicates,
            dropped: stats.dropped,
            corrupted: stats.corrupted,
            acks_sent,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            path = %report.output_path.display(),
            bytes = report.bytes_written,
            packets = report.packets,
            dropped = report.dropped,
            corrupted = report.corrupted,
            elapsed_ms = report.elapsed_ms,
            "transfer complete"
        );
        Ok(report)
    }
}

async fn bind(addr: SocketAddr) -> Result<UdpSocket> {
    UdpSocket::bind(addr)
        .await
        .map_err(|source| EngineError::Bind { addr, source })
}

/// `output_dir/R<base name of file_name>`.
pub fn output_path(output_dir: &Path, file_name: &str) -> PathBuf {
    let base = Path::new(file_name)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(file_name);
    output_dir.join(format!("R{base}"))
}

async fn receive_loop(
    socket: UdpSocket,
    mut channel: LossyChannel,
    acks: UnboundedSender<AckPacket>,
    receive_port: u16,
    first_arrival: Arc<Notify>,
) -> Result<(PacketStore, ReceiveStats)> {
    let mut store = PacketStore::new();
    let mut stats = ReceiveStats::default();
    let mut buf = vec![0u8; RECV_BUFFER];
    let mut arrived = false;

    while !store.is_complete() {
        let (len, from) = socket.recv_from(&mut buf).await?;
        if !arrived {
            arrived = true;
            first_arrival.notify_one();
        }

        let mut packet = match DataPacket::decode(&buf[..len]) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(%from, error = %err, "malformed datagram dropped");
                continue;
            }
        };

        match channel.judge() {
            Verdict::Drop => {
                stats.dropped += 1;
                debug!(seq = packet.seq, "packet lost in channel");
                continue;
            }
            Verdict::Corrupt => packet.mark_corrupted(),
            Verdict::Deliver => {}
        }
        if packet.is_corrupted() {
            stats.corrupted += 1;
            debug!(seq = packet.seq, "corrupted packet discarded");
            continue;
        }
        if packet.is_file_request {
            debug!(%from, "unexpected file request ignored");
            continue;
        }

        if acks
            .send(AckPacket::new(packet.seq, receive_port, packet.is_final))
            .is_err()
        {
            debug!(seq = packet.seq, "ack queue closed");
        }
        if !store.accept(&packet) {
            stats.duplicates += 1;
            debug!(seq = packet.seq, "duplicate packet");
        }
    }

    Ok((store, stats))
}

/// Send queued ACKs until every sequence number through the final one has
/// been sent, or the receive side hangs up. An ACK whose send fails does not
/// count towards completion.
async fn ack_loop(
    socket: Arc<UdpSocket>,
    server: SocketAddr,
    mut queue: UnboundedReceiver<AckPacket>,
) -> usize {
    let acknowledged = CompletionTracker::new();
    let mut sent = 0;

    while let Some(ack) = queue.recv().await {
        match socket.send_to(&ack.encode(), server).await {
            Ok(_) => {
                sent += 1;
                acknowledged.record(ack.ack_number, ack.is_final);
                debug!(ack = ack.ack_number, is_final = ack.is_final, "ack sent");
            }
            Err(err) => warn!(ack = ack.ack_number, error = %err, "ack send failed"),
        }

        if acknowledged.phase() == Phase::AllSeen {
            break;
        }
    }
    sent
}
