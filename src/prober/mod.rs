//! Path prober: one state machine and one task per probed path.

use std::fmt;
use std::net::SocketAddr;

use serde::Serialize;

pub(crate) mod driver;
pub mod state;

pub use state::{
    Action, PathProbeState, PathSnapshot, Probe, ProbeFailure, ProbeLifecycle,
};

/// Identifies one network path to a peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PathId {
    /// Peer identifier as known to the endpoint manager
    pub peer: String,
    /// Local socket address
    pub local: SocketAddr,
    /// Peer's socket address
    pub remote: SocketAddr,
}

impl PathId {
    /// Path from `local` to `remote` for `peer`.
    pub fn new(peer: impl Into<String>, local: SocketAddr, remote: SocketAddr) -> Self {
        Self {
            peer: peer.into(),
            local,
            remote,
        }
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{} -> {}]", self.peer, self.local, self.remote)
    }
}
