//! Don't-fragment socket control.
//!
//! Exactly one platform backend is compiled in: Linux drives
//! `IP_MTU_DISCOVER`, macOS drives `IP_DONTFRAG`, and every other target gets
//! [`UnsupportedBackend`], which refuses so callers know PMTUD cannot run.

use std::fmt;
use std::net::SocketAddr;

use crate::error::{PmtudError, PmtudResult};
use crate::transport::{PacketConn, RawSocket};

#[cfg(target_os = "macos")]
mod darwin;
#[cfg(target_os = "linux")]
mod linux;
mod unsupported;

pub use unsupported::UnsupportedBackend;

#[cfg(target_os = "linux")]
pub use linux::LinuxBackend as PlatformBackend;

#[cfg(target_os = "macos")]
pub use darwin::DarwinBackend as PlatformBackend;

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub use unsupported::UnsupportedBackend as PlatformBackend;

/// Address family of the socket being marked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// IPv4
    V4,
    /// IPv6
    V6,
}

impl AddressFamily {
    /// Family of a socket address.
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => AddressFamily::V4,
            SocketAddr::V6(_) => AddressFamily::V6,
        }
    }

    /// Network name, `udp4` or `udp6`.
    pub fn network(&self) -> &'static str {
        match self {
            AddressFamily::V4 => "udp4",
            AddressFamily::V6 => "udp6",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.network())
    }
}

/// One way of toggling the don't-fragment bit on a raw socket.
pub trait DontFragment: Send + Sync + fmt::Debug {
    /// Whether this backend can ever succeed.
    fn is_capable(&self) -> bool;

    /// Set or clear DF on `socket` for the given family.
    fn set(&self, socket: RawSocket, family: AddressFamily, enable: bool) -> PmtudResult<()>;
}

static PLATFORM: PlatformBackend = PlatformBackend;

/// The backend selected for this build.
pub fn platform_backend() -> &'static PlatformBackend {
    &PLATFORM
}

/// Whether this platform should perform peer path MTU discovery.
pub fn should_pmtud() -> bool {
    PLATFORM.is_capable()
}

/// Set the don't-fragment option on `conn` with the platform backend.
pub fn set_dont_fragment<C>(conn: &C, family: AddressFamily, enable: bool) -> PmtudResult<()>
where
    C: PacketConn + ?Sized,
{
    set_dont_fragment_with(&PLATFORM, conn, family, enable)
}

/// Set the don't-fragment option on `conn` with an explicit backend.
///
/// A connection that is not backed by an OS socket is left alone and
/// reported as success; an incapable backend always reports `Unsupported`.
pub fn set_dont_fragment_with<C>(
    backend: &dyn DontFragment,
    conn: &C,
    family: AddressFamily,
    enable: bool,
) -> PmtudResult<()>
where
    C: PacketConn + ?Sized,
{
    if !backend.is_capable() {
        return Err(PmtudError::Unsupported);
    }

    match conn.raw_socket() {
        Some(socket) => backend.set(socket, family, enable),
        None => Ok(()),
    }
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn setsockopt_int(
    socket: RawSocket,
    level: libc::c_int,
    optname: libc::c_int,
    val: libc::c_int,
) -> std::io::Result<()> {
    // SAFETY: `val` outlives the call and the length matches its type.
    let rc = unsafe {
        libc::setsockopt(
            socket,
            level,
            optname,
            &val as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
