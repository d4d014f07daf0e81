//! Opening the transport to a remote peer.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpSocket, TcpStream};
use tracing::debug;

use crate::meta_addr::MetaAddr;

use super::error::PeerError;
use super::handle::SharedState;

/// Open a TCP stream to the peer, IPv6 first with an IPv4 retry for
/// IPv4-mapped addresses, under the connect deadline.
pub(crate) async fn connect(
    meta: &MetaAddr,
    timeout: Duration,
    state: &SharedState,
) -> Result<TcpStream, PeerError> {
    if state.is_closed() {
        return Err(PeerError::Closed);
    }

    let port = meta.addr.port();
    let (primary, fallback) = match meta.addr.ip() {
        IpAddr::V4(v4) => (
            SocketAddr::new(IpAddr::V6(v4.to_ipv6_mapped()), port),
            Some(SocketAddr::new(IpAddr::V4(v4), port)),
        ),
        IpAddr::V6(v6) => (
            SocketAddr::new(IpAddr::V6(v6), port),
            v6.to_ipv4()
                .map(|v4| SocketAddr::new(IpAddr::V4(v4), port)),
        ),
    };

    match attempt(primary, timeout, state).await {
        Ok(stream) => Ok(stream),
        Err(PeerError::Closed) => Err(PeerError::Closed),
        Err(error) => match fallback {
            Some(addr) => {
                debug!(%error, "IPv6 connect failed, retrying over IPv4");
                attempt(addr, timeout, state).await
            }
            None => Err(error),
        },
    }
}

async fn attempt(
    addr: SocketAddr,
    timeout: Duration,
    state: &SharedState,
) -> Result<TcpStream, PeerError> {
    let socket = if addr.is_ipv6() {
        TcpSocket::new_v6()
    } else {
        TcpSocket::new_v4()
    }?;
    socket.set_keepalive(true)?;

    tokio::select! {
        result = tokio::time::timeout(timeout, socket.connect(addr)) => {
            let stream = result.map_err(|_elapsed| PeerError::Timeout)??;
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        _ = state.shutdown.notified() => Err(PeerError::Closed),
    }
}
