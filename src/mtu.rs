//! Wire MTU <-> tunnel MTU arithmetic.
//!
//! A wire MTU is the largest IP packet a path carries unfragmented. The
//! tunnel MTU is what the TUN device exposes once the encapsulation
//! overhead (`TUNNEL_HEADER_LEN`) has been taken off.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fragmentation::AddressFamily;
use crate::protocol::constants::{
    IPV4_HEADER_SIZE, IPV6_HEADER_SIZE, MAX_PROBED_WIRE_MTU, MAX_TUN_MTU, SAFE_TUN_MTU,
    SAFE_WIRE_MTU, TUNNEL_HEADER_LEN, UDP_HEADER_SIZE,
};

/// Maximum IP packet size (bytes) a path is believed to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WireMtu(pub u16);

/// MTU exposed to the virtual network interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TunMtu(pub u16);

impl WireMtu {
    /// Wire MTU assumed deliverable without probing
    pub const SAFE: WireMtu = WireMtu(SAFE_WIRE_MTU);
    /// Largest wire MTU ever probed for
    pub const MAX_PROBED: WireMtu = WireMtu(MAX_PROBED_WIRE_MTU);

    /// Size in bytes.
    pub const fn get(self) -> u16 {
        self.0
    }

    /// UDP payload length of a datagram that fills this wire MTU exactly.
    pub fn udp_payload_len(self, family: AddressFamily) -> usize {
        let ip_header = match family {
            AddressFamily::V4 => IPV4_HEADER_SIZE,
            AddressFamily::V6 => IPV6_HEADER_SIZE,
        };
        (self.0 as usize).saturating_sub(ip_header + UDP_HEADER_SIZE)
    }
}

impl TunMtu {
    /// Tunnel MTU every path can carry
    pub const SAFE: TunMtu = TunMtu(SAFE_TUN_MTU);
    /// Largest tunnel MTU ever configured
    pub const MAX: TunMtu = TunMtu(MAX_TUN_MTU);

    /// Size in bytes.
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for WireMtu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TunMtu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Convert a wire MTU to the tunnel MTU it allows.
///
/// Returns 0 when the wire MTU cannot even hold the tunnel headers; that
/// marks the path as unusable at tunnel level rather than an error.
pub const fn wire_to_tun(w: WireMtu) -> TunMtu {
    TunMtu(w.0.saturating_sub(TUNNEL_HEADER_LEN))
}

/// Wire MTU needed to carry a given tunnel MTU.
pub const fn tun_to_wire(t: TunMtu) -> WireMtu {
    WireMtu(t.0.saturating_add(TUNNEL_HEADER_LEN))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mtu_conversion() {
        let cases = [
            (0, 0),
            (TUNNEL_HEADER_LEN, 0),
            (TUNNEL_HEADER_LEN + 1, 1),
            (1360, 1280),
            (1500, 1420),
            (9000, 8920),
        ];

        for (w, t) in cases {
            assert_eq!(
                wire_to_tun(WireMtu(w)),
                TunMtu(t),
                "conversion of wire MTU {} to TUN MTU",
                w
            );
        }
    }

    #[test]
    fn test_conversion_is_saturating_everywhere() {
        for w in (0..=u16::MAX).step_by(97) {
            let expected = w.saturating_sub(TUNNEL_HEADER_LEN);
            assert_eq!(wire_to_tun(WireMtu(w)).get(), expected);
        }
        assert_eq!(wire_to_tun(WireMtu(u16::MAX)).get(), u16::MAX - TUNNEL_HEADER_LEN);
    }

    #[test]
    fn test_safe_constants_agree() {
        assert_eq!(tun_to_wire(TunMtu::SAFE), WireMtu::SAFE);
        assert_eq!(wire_to_tun(WireMtu::SAFE), TunMtu::SAFE);
        assert!(wire_to_tun(WireMtu::MAX_PROBED) <= TunMtu::MAX);
        assert_eq!(tun_to_wire(TunMtu(u16::MAX)), WireMtu(u16::MAX));
    }

    #[test]
    fn test_udp_payload_len() {
        assert_eq!(WireMtu(1500).udp_payload_len(AddressFamily::V4), 1472);
        assert_eq!(WireMtu(1500).udp_payload_len(AddressFamily::V6), 1452);
        assert_eq!(WireMtu(10).udp_payload_len(AddressFamily::V6), 0);
    }
}
