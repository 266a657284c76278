//! The server's single receive loop.
//!
//! Every inbound datagram is classified by length. File requests spawn a
//! session task; ACKs are routed to the session keyed by the sender's IP and
//! the receive port carried in the ACK. Nothing here ever waits on a
//! session.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use rdt_lab_abstract::{AckPacket, DataPacket, Inbound, ServerConfig};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, Result};
use crate::files::FileService;
use crate::handler::{Session, SessionReport, SessionSettings};
use crate::seq_set::AckTracker;
use crate::transport::UdpOutbound;

const RECV_BUFFER: usize = 65_536;

/// Handle on a session task. `None` means the session never started.
pub type SessionHandle = JoinHandle<Option<SessionReport>>;

struct SessionEntry {
    acks: Arc<AckTracker>,
    handle: SessionHandle,
}

#[derive(Debug)]
pub struct ServerSummary {
    pub sessions_started: usize,
    /// Sessions not yet pruned when the dispatcher stopped, some possibly
    /// still transmitting.
    pub outstanding: Vec<SessionHandle>,
}

pub struct Server {
    socket: UdpSocket,
    local: SocketAddr,
    config: ServerConfig,
    settings: SessionSettings,
    files: FileService,
}

impl Server {
    pub async fn bind(config: ServerConfig, files: FileService) -> Result<Self> {
        let addr = SocketAddr::new(config.server_ip, config.server_port);
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| EngineError::Bind { addr, source })?;
        let local = socket.local_addr()?;
        Ok(Self {
            socket,
            local,
            settings: SessionSettings::from_config(&config),
            config,
            files,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Dispatch until no datagram arrives for the idle timeout.
    pub async fn run(self) -> Result<ServerSummary> {
        let idle = self.config.idle_timeout();
        let mut sessions: HashMap<SocketAddr, SessionEntry> = HashMap::new();
        let mut sessions_started = 0;
        let mut buf = vec![0u8; RECV_BUFFER];

        info!(
            addr = %self.local,
            protocol = %self.settings.protocol,
            window = self.settings.window_size,
            "server listening"
        );

        loop {
            let (len, from) = match timeout(idle, self.socket.recv_from(&mut buf)).await {
                Ok(Ok(received)) => received,
                Ok(Err(err)) => {
                    warn!(error = %err, "receive failed");
                    continue;
                }
                Err(_) => {
                    info!(idle_ms = idle.as_millis() as u64, "no traffic, dispatcher stopping");
                    break;
                }
            };

            match Inbound::decode(&buf[..len]) {
                Ok(inbound) if inbound.is_corrupted() => {
                    debug!(%from, "corrupted datagram dropped");
                }
                Ok(Inbound::Ack(ack)) => route_ack(&sessions, from, &ack),
                Ok(Inbound::Data(packet)) => {
                    if self.start_session(&mut sessions, from, &packet) {
                        sessions_started += 1;
                    }
                }
                Err(err) => warn!(%from, error = %err, "malformed datagram dropped"),
            }
        }

        Ok(ServerSummary {
            sessions_started,
            outstanding: sessions.into_values().map(|entry| entry.handle).collect(),
        })
    }

    fn start_session(
        &self,
        sessions: &mut HashMap<SocketAddr, SessionEntry>,
        from: SocketAddr,
        packet: &DataPacket,
    ) -> bool {
        let Some(file_name) = packet.file_name() else {
            debug!(%from, seq = packet.seq, "non-request data frame dropped");
            return false;
        };

        let client = SocketAddr::new(from.ip(), packet.source_port);
        sessions.retain(|_, entry| !entry.handle.is_finished());
        if sessions.contains_key(&client) {
            warn!(%client, file = file_name, "duplicate file request for live session ignored");
            return false;
        }

        let acks = Arc::new(AckTracker::new());
        let handle = tokio::spawn(run_session(
            client,
            file_name.to_string(),
            self.files.clone(),
            self.settings,
            self.config.server_ip,
            self.local.port(),
            Arc::clone(&acks),
        ));
        info!(%client, file = file_name, "file request accepted");
        sessions.insert(client, SessionEntry { acks, handle });
        true
    }
}

fn route_ack(sessions: &HashMap<SocketAddr, SessionEntry>, from: SocketAddr, ack: &AckPacket) {
    let client = SocketAddr::new(from.ip(), ack.source_port);
    match sessions.get(&client) {
        Some(entry) => {
            let fresh = entry.acks.add_ack(ack.ack_number);
            debug!(%client, ack = ack.ack_number, fresh, "ack routed");
        }
        None => debug!(%client, ack = ack.ack_number, "ack for unknown session dropped"),
    }
}

async fn run_session(
    client: SocketAddr,
    file_name: String,
    files: FileService,
    settings: SessionSettings,
    local_ip: IpAddr,
    server_port: u16,
    acks: Arc<AckTracker>,
) -> Option<SessionReport> {
    let prepared = tokio::task::spawn_blocking(move || {
        files.prepare_file_packets(&file_name, server_port, client.port())
    })
    .await;

    let packets = match prepared {
        Ok(Ok(packets)) => packets,
        Ok(Err(err)) => {
            error!(%client, error = %err, "session aborted");
            return None;
        }
        Err(err) => {
            error!(%client, error = %err, "file preparation task failed");
            return None;
        }
    };

    let outbound = match UdpOutbound::bind(local_ip, client).await {
        Ok(outbound) => outbound,
        Err(err) => {
            error!(%client, error = %err, "session aborted");
            return None;
        }
    };

    Some(Session::new(client, settings, &packets, acks, outbound).run().await)
}
