use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use tokio::net::UdpSocket;

use crate::error::{EngineError, Result};

/// Where a session's frames go. The UDP implementation sends to one fixed
/// peer; tests substitute an in-memory recorder.
pub trait Outbound: Send + Sync + 'static {
    fn transmit(&self, frame: Bytes) -> impl Future<Output = io::Result<()>> + Send;
}

/// An ephemeral UDP socket dedicated to one peer.
#[derive(Debug)]
pub struct UdpOutbound {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpOutbound {
    pub async fn bind(local_ip: IpAddr, peer: SocketAddr) -> Result<Self> {
        let local = SocketAddr::new(local_ip, 0);
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| EngineError::Bind {
                addr: local,
                source,
            })?;
        Ok(Self { socket, peer })
    }
}

impl Outbound for UdpOutbound {
    async fn transmit(&self, frame: Bytes) -> io::Result<()> {
        self.socket.send_to(&frame, self.peer).await.map(|_| ())
    }
}
