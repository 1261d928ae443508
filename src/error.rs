use std::io;
use thiserror::Error;

/// Errors produced by the path MTU discovery engine.
///
/// Only `PathExists`, `UnknownPath` and `Configuration` ever reach the
/// endpoint manager; the probe outcomes are consumed inside the prober.
#[derive(Debug, Error)]
pub enum PmtudError {
    /// The platform cannot set the don't-fragment bit
    #[error("setting don't fragment bit not supported on this OS; peer path MTU discovery disabled")]
    Unsupported,

    /// Socket option or send failure
    #[error("Socket error: {0}")]
    Socket(#[from] io::Error),

    /// Local stack refused a datagram of this wire size
    #[error("Probe of {size} bytes too large for local stack")]
    SendTooLarge {
        /// Wire size of the refused probe
        size: u16,
    },

    /// A prober for this path is already running
    #[error("Path {0} is already being probed")]
    PathExists(String),

    /// No prober for this path
    #[error("Unknown path {0}")]
    UnknownPath(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed probe datagram
    #[error("Probe codec error: {0}")]
    Codec(String),
}

/// Result type for PMTUD operations
pub type PmtudResult<T> = Result<T, PmtudError>;

impl PmtudError {
    /// Whether this error means PMTUD cannot work on this platform.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, PmtudError::Unsupported)
    }

    /// Classify a failed probe send. EMSGSIZE means the datagram can never
    /// leave this host at that size.
    pub fn from_send_error(err: io::Error, size: u16) -> Self {
        if is_message_too_large(&err) {
            PmtudError::SendTooLarge { size }
        } else {
            PmtudError::Socket(err)
        }
    }
}

#[cfg(unix)]
fn is_message_too_large(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EMSGSIZE)
}

#[cfg(windows)]
fn is_message_too_large(err: &io::Error) -> bool {
    const WSAEMSGSIZE: i32 = 10040;
    err.raw_os_error() == Some(WSAEMSGSIZE)
}

#[cfg(not(any(unix, windows)))]
fn is_message_too_large(_err: &io::Error) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_error_classification() {
        #[cfg(unix)]
        {
            let err = io::Error::from_raw_os_error(libc::EMSGSIZE);
            assert!(matches!(
                PmtudError::from_send_error(err, 9000),
                PmtudError::SendTooLarge { size: 9000 }
            ));
        }

        let err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            PmtudError::from_send_error(err, 1400),
            PmtudError::Socket(_)
        ));
    }

    #[test]
    fn test_codec_errors() {
        let err = crate::protocol::packet::ProbeHeader::from_bytes(b"PMTU").unwrap_err();
        assert!(matches!(err, PmtudError::Codec(_)));
        assert!(err.to_string().contains("too small"));
    }

    #[test]
    fn test_unsupported_message() {
        let err = PmtudError::Unsupported;
        assert!(err.is_unsupported());
        assert!(err.to_string().contains("not supported"));
    }
}
