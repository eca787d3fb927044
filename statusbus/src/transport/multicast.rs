use std::{
    io,
    net::{Ipv4Addr, SocketAddrV4},
};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;

/// Convenience result type.
pub type MulticastSocketResult<T> = Result<T, MulticastSocketError>;
/// Error arising from binding to a multicast address.
#[derive(Debug, Error)]
pub enum MulticastSocketError {
    #[error("not a multicast address: {0}")]
    NotMulticast(Ipv4Addr),
    #[error("io error")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct MulticastOptions {
    /// Local interface used to join the group.
    pub interface: Ipv4Addr,
    /// Deliver our own datagrams back to us. Several worker processes on
    /// one host depend on this.
    pub loopback: bool,
    pub ttl: u32,
}

impl Default for MulticastOptions {
    fn default() -> Self {
        Self {
            interface: Ipv4Addr::UNSPECIFIED,
            loopback: true,
            ttl: 1,
        }
    }
}

/// Bind a socket to `group` with SO_REUSEADDR so that every process (and
/// every topic listener within a process) on this host can receive from
/// the same group.
pub fn bind_multicast(
    group: &SocketAddrV4,
    options: &MulticastOptions,
) -> MulticastSocketResult<UdpSocket> {
    if !group.ip().is_multicast() {
        return Err(MulticastSocketError::NotMulticast(*group.ip()));
    }
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    socket.set_multicast_loop_v4(options.loopback)?;
    socket.set_multicast_ttl_v4(options.ttl)?;
    socket.join_multicast_v4(group.ip(), &options.interface)?;
    socket.bind(&SockAddr::from(*group))?;
    let std_udp_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_udp_socket)?)
}

/// A group socket whose default destination is the group itself.
pub async fn connect_multicast(
    group: &SocketAddrV4,
    options: &MulticastOptions,
) -> MulticastSocketResult<UdpSocket> {
    let socket = bind_multicast(group, options)?;
    socket.connect(group).await?;
    Ok(socket)
}
