//! Probe wire format.

/// Sizes, limits and defaults
pub mod constants;
/// Probe and ack datagrams
pub mod packet;
