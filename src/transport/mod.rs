//! Socket seam between the prober and the endpoint manager's UDP sockets.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;

/// Probe echo over UDP
pub mod udp;

/// OS socket handle
#[cfg(unix)]
pub type RawSocket = std::os::unix::io::RawFd;
/// OS socket handle
#[cfg(windows)]
pub type RawSocket = std::os::windows::io::RawSocket;
/// OS socket handle
#[cfg(not(any(unix, windows)))]
pub type RawSocket = i32;

/// What the prober needs from a path's socket.
#[async_trait]
pub trait PacketConn: Send + Sync {
    /// Send one datagram to `target`.
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// OS descriptor for socket options. `None` for connections that are not
    /// backed by a real transport.
    fn raw_socket(&self) -> Option<RawSocket> {
        None
    }
}

#[async_trait]
impl PacketConn for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }

    #[cfg(unix)]
    fn raw_socket(&self) -> Option<RawSocket> {
        use std::os::unix::io::AsRawFd;
        Some(self.as_raw_fd())
    }

    #[cfg(windows)]
    fn raw_socket(&self) -> Option<RawSocket> {
        use std::os::windows::io::AsRawSocket;
        Some(self.as_raw_socket())
    }
}

/// Sends directly; a blocking socket stalls the task while its send buffer
/// is full.
#[async_trait]
impl PacketConn for std::net::UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        std::net::UdpSocket::send_to(self, buf, target)
    }

    #[cfg(unix)]
    fn raw_socket(&self) -> Option<RawSocket> {
        use std::os::unix::io::AsRawFd;
        Some(self.as_raw_fd())
    }

    #[cfg(windows)]
    fn raw_socket(&self) -> Option<RawSocket> {
        use std::os::windows::io::AsRawSocket;
        Some(self.as_raw_socket())
    }
}

#[async_trait]
impl<T: PacketConn + ?Sized> PacketConn for Arc<T> {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        (**self).send_to(buf, target).await
    }

    fn raw_socket(&self) -> Option<RawSocket> {
        (**self).raw_socket()
    }
}
