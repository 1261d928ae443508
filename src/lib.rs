//! Adaptive path MTU discovery for UDP mesh tunnels (lib.rs)
//!
//! Every direct path between two peers is probed with don't-fragment UDP
//! datagrams to find the largest packet it carries, and the results are
//! folded into one tunnel MTU for the virtual network interface.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
/// Prober settings and operator overrides
pub mod config;
/// Engine driving every path's prober
pub mod engine;
/// Error types
pub mod error;
/// Don't-fragment socket control
pub mod fragmentation;
/// Wire and tunnel MTU types
pub mod mtu;
/// Tunnel MTU policy
pub mod policy;
/// Per-path probing
pub mod prober;
/// Probe wire format
pub mod protocol;
/// Socket seam and probe echo
pub mod transport;

// Re-export main types
pub use config::{MtuOverrides, PmtudConfig};
pub use engine::PmtudEngine;
pub use error::{PmtudError, PmtudResult};
pub use fragmentation::{
    platform_backend, set_dont_fragment, should_pmtud, AddressFamily, DontFragment,
};
pub use mtu::{tun_to_wire, wire_to_tun, TunMtu, WireMtu};
pub use policy::{default_tun_mtu, resolve_tun_mtu, MtuPolicy};
pub use prober::{PathId, PathSnapshot, ProbeLifecycle};
pub use protocol::constants::*;
pub use transport::PacketConn;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging
///
/// `RUST_LOG` wins over `level` when set.
///
/// # Example
/// ```no_run
/// mesh_pmtud::init_logging("debug");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let mut filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    // Reduce verbosity of the runtime
    for directive in ["tokio=warn", "runtime=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(true),
        )
        .with(filter)
        .try_init();
}

/// One-line summary of the MTU settings in effect
pub fn mtu_summary(overrides: &MtuOverrides) -> String {
    format!(
        "mesh-pmtud v{} | PMTUD {} on this platform, {} | initial tunnel MTU {} | forced {}",
        VERSION,
        if should_pmtud() { "supported" } else { "unsupported" },
        if overrides.pmtud_enabled { "enabled" } else { "disabled" },
        default_tun_mtu(overrides),
        overrides
            .forced_mtu
            .map(|mtu| mtu.to_string())
            .unwrap_or_else(|| "no".to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_mtu_summary() {
        let summary = mtu_summary(&MtuOverrides {
            forced_mtu: Some(1400),
            pmtud_enabled: false,
        });
        assert!(summary.contains("disabled"));
        assert!(summary.contains("initial tunnel MTU 1400"));
        assert!(summary.contains("forced 1400"));
    }

    #[test]
    fn test_init_logging_twice() {
        init_logging("debug");
        init_logging("info");
    }
}
