//! Protocol constants for path MTU discovery

// Header sizes
/// IPv4 header without options
pub const IPV4_HEADER_SIZE: usize = 20;
/// IPv6 fixed header
pub const IPV6_HEADER_SIZE: usize = 40;
/// UDP header
pub const UDP_HEADER_SIZE: usize = 8;

/// Tunnel encapsulation overhead: IPv6 header (40) + UDP header (8) +
/// transport framing (32: type, receiver index, counter, auth tag).
pub const TUNNEL_HEADER_LEN: u16 = 80;

// MTU bounds
/// Tunnel MTU that every IPv6-capable path must carry.
pub const SAFE_TUN_MTU: u16 = 1280;
/// Largest tunnel MTU ever handed to the TUN device.
pub const MAX_TUN_MTU: u16 = 65529;
/// Wire equivalent of `SAFE_TUN_MTU`; assumed deliverable without probing.
pub const SAFE_WIRE_MTU: u16 = SAFE_TUN_MTU + TUNNEL_HEADER_LEN; // 1360
/// Largest wire MTU a path is ever probed for (jumbo frames).
pub const MAX_PROBED_WIRE_MTU: u16 = 9000;

// Probe datagrams
/// First bytes of every probe datagram
pub const PROBE_MAGIC: [u8; 4] = *b"PMTU";
/// Probe format version
pub const PROBE_VERSION: u8 = 1;
/// magic (4) + version (1) + kind (1) + probe id (4) + wire size (2)
pub const PROBE_HEADER_SIZE: usize = 12;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Probe datagram type
pub enum ProbeKind {
    /// Padded probe
    Probe = 0x01,
    /// Acknowledgment of a probe
    Ack = 0x02,
}

// Timeouts
/// Wait for a probe ack
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 3_000;
/// Time between re-validations of a stable path
pub const DEFAULT_REVALIDATION_INTERVAL_MS: u64 = 300_000; // 5 minutes
/// Floor for the probe timeout
pub const MIN_PROBE_TIMEOUT_MS: u64 = 100;
/// Floor for the re-validation interval
pub const MIN_REVALIDATION_INTERVAL_MS: u64 = 1_000;

// Search parameters
/// Timeouts before a size counts as too large
pub const DEFAULT_ATTEMPTS_PER_SIZE: u32 = 2;
/// Failures in a row before the search stops
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 24;
/// Search resolution in bytes
pub const DEFAULT_PROBE_GRANULARITY: u16 = 16;
