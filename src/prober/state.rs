//! Per-path probing state machine.
//!
//! Pure and synchronous: every event goes in as a method call, and the
//! returned [`Action`] says what the driver has to do next (send a probe and
//! arm its timeout, sleep until re-validation, or nothing at all). The search
//! is a binary search over `(verified, ceiling)` with a bounded retry budget.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::PmtudConfig;
use crate::mtu::WireMtu;

/// Lifecycle of one probed path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProbeLifecycle {
    /// Created, no probe sent yet
    Idle,
    /// Searching for a larger MTU
    ProbingUp,
    /// Converged; waiting for re-validation
    Stable,
    /// Don't-fragment unsupported; pinned to the safe MTU
    Degraded,
}

/// A probe the driver must put on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    /// Matches the ack to this probe
    pub id: u32,
    /// Wire size being tested
    pub size: WireMtu,
    /// How long to wait for the ack
    pub timeout: Duration,
}

/// Why a probe did not get through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFailure {
    /// No acknowledgment before the timeout
    Timeout,
    /// The local stack refused the datagram (EMSGSIZE)
    SendTooLarge,
    /// Setting DF or sending failed for an unrelated reason
    Socket,
}

/// What the driver does after feeding an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Send this probe and wait at most `probe.timeout` for its ack
    SendProbe(Probe),
    /// Converged; re-validate after the interval or on a route change
    Revalidate {
        /// Time until the periodic re-validation
        after: Duration,
    },
    /// Nothing will ever be probed again on this path
    Halt,
    /// Stale or out-of-order event, state unchanged
    Ignore,
}

/// Read-only view of a path's probing state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PathSnapshot {
    /// Current lifecycle
    pub lifecycle: ProbeLifecycle,
    /// Largest size known to get through
    pub verified_wire_mtu: WireMtu,
    /// Smallest size known not to get through
    pub ceiling_wire_mtu: Option<WireMtu>,
    /// Size of the last probe sent
    pub last_probe_size: Option<WireMtu>,
    /// Failed probes since the last success
    pub consecutive_failures: u32,
    /// Probes sent over the path's lifetime
    pub probes_sent: u64,
    /// Whether a probe is awaiting its ack
    pub probe_outstanding: bool,
}

/// Probing state of one path
#[derive(Debug, Clone)]
pub struct PathProbeState {
    config: PmtudConfig,
    lifecycle: ProbeLifecycle,
    verified_wire_mtu: WireMtu,
    /// Smallest size known not to get through
    ceiling_wire_mtu: Option<WireMtu>,
    last_probe_size: Option<WireMtu>,
    last_probe_time: Option<Instant>,
    consecutive_failures: u32,
    attempts_at_size: u32,
    /// Previously verified size being re-tested after re-validation
    floor_check: Option<WireMtu>,
    outstanding: Option<Probe>,
    probes_sent: u64,
    next_probe_id: u32,
}

impl PathProbeState {
    /// Idle path with a random first probe id.
    pub fn new(config: PmtudConfig) -> Self {
        Self::with_first_probe_id(config, rand::random())
    }

    /// Idle path whose probe ids start at `first_probe_id`.
    pub fn with_first_probe_id(config: PmtudConfig, first_probe_id: u32) -> Self {
        Self {
            config: config.validated(),
            lifecycle: ProbeLifecycle::Idle,
            verified_wire_mtu: WireMtu::SAFE,
            ceiling_wire_mtu: None,
            last_probe_size: None,
            last_probe_time: None,
            consecutive_failures: 0,
            attempts_at_size: 0,
            floor_check: None,
            outstanding: None,
            probes_sent: 0,
            next_probe_id: first_probe_id,
        }
    }

    /// Current lifecycle.
    pub fn lifecycle(&self) -> ProbeLifecycle {
        self.lifecycle
    }

    /// Largest size known to get through.
    pub fn verified_wire_mtu(&self) -> WireMtu {
        self.verified_wire_mtu
    }

    /// Smallest size known not to get through.
    pub fn ceiling_wire_mtu(&self) -> Option<WireMtu> {
        self.ceiling_wire_mtu
    }

    /// When the last probe was issued.
    pub fn last_probe_time(&self) -> Option<Instant> {
        self.last_probe_time
    }

    /// Probe awaiting its ack, if any.
    pub fn outstanding(&self) -> Option<Probe> {
        self.outstanding
    }

    /// Read-only copy of the state.
    pub fn snapshot(&self) -> PathSnapshot {
        PathSnapshot {
            lifecycle: self.lifecycle,
            verified_wire_mtu: self.verified_wire_mtu,
            ceiling_wire_mtu: self.ceiling_wire_mtu,
            last_probe_size: self.last_probe_size,
            consecutive_failures: self.consecutive_failures,
            probes_sent: self.probes_sent,
            probe_outstanding: self.outstanding.is_some(),
        }
    }

    /// Leave `Idle`. Without don't-fragment support the path is degraded for
    /// good and nothing is ever sent.
    pub fn start(&mut self, capable: bool, now: Instant) -> Action {
        if self.lifecycle != ProbeLifecycle::Idle {
            return Action::Ignore;
        }
        if !capable {
            return self.degrade();
        }

        self.lifecycle = ProbeLifecycle::ProbingUp;
        self.continue_search(now)
    }

    /// The outstanding probe was acknowledged by the peer.
    pub fn on_ack(&mut self, probe_id: u32, now: Instant) -> Action {
        let Some(probe) = self.take_outstanding(probe_id) else {
            return Action::Ignore;
        };

        if self.floor_check == Some(probe.size) {
            self.floor_check = None;
        }
        self.verified_wire_mtu = probe.size;
        self.consecutive_failures = 0;
        self.attempts_at_size = 0;
        tracing::trace!("probe {} of {} bytes acknowledged", probe.id, probe.size);

        self.continue_search(now)
    }

    /// The outstanding probe failed.
    pub fn on_failure(&mut self, probe_id: u32, failure: ProbeFailure, now: Instant) -> Action {
        let Some(probe) = self.take_outstanding(probe_id) else {
            return Action::Ignore;
        };

        self.consecutive_failures += 1;
        match failure {
            ProbeFailure::Timeout => {
                self.attempts_at_size += 1;
                if self.attempts_at_size >= self.config.attempts_per_size {
                    self.mark_too_large(probe.size);
                }
            }
            ProbeFailure::SendTooLarge => self.mark_too_large(probe.size),
            // Says nothing about the size; the same size is retried.
            ProbeFailure::Socket => {}
        }
        tracing::trace!(
            "probe {} of {} bytes failed ({:?}), {} in a row",
            probe.id,
            probe.size,
            failure,
            self.consecutive_failures
        );

        if self.consecutive_failures >= self.config.max_consecutive_failures {
            tracing::debug!(
                "retry budget exhausted, settling at {} bytes",
                self.verified_wire_mtu
            );
            return self.settle();
        }

        self.continue_search(now)
    }

    /// Re-validation timer fired or the route changed. Only a stable path
    /// reacts; the previous verified size becomes the first thing re-tested.
    pub fn revalidate(&mut self, now: Instant) -> Action {
        if self.lifecycle != ProbeLifecycle::Stable || self.outstanding.is_some() {
            return Action::Ignore;
        }

        self.lifecycle = ProbeLifecycle::ProbingUp;
        self.ceiling_wire_mtu = None;
        self.consecutive_failures = 0;
        self.attempts_at_size = 0;
        if self.verified_wire_mtu > WireMtu::SAFE {
            self.floor_check = Some(self.verified_wire_mtu);
        }
        self.continue_search(now)
    }

    /// Don't-fragment turned out to be unsupported.
    pub fn unsupported(&mut self) -> Action {
        if self.lifecycle == ProbeLifecycle::Degraded {
            return Action::Ignore;
        }
        self.degrade()
    }

    fn take_outstanding(&mut self, probe_id: u32) -> Option<Probe> {
        match self.outstanding {
            Some(probe) if probe.id == probe_id && self.lifecycle == ProbeLifecycle::ProbingUp => {
                self.outstanding = None;
                Some(probe)
            }
            _ => None,
        }
    }

    fn mark_too_large(&mut self, size: WireMtu) {
        self.attempts_at_size = 0;
        if self.floor_check == Some(size) {
            self.floor_check = None;
            self.verified_wire_mtu = WireMtu::SAFE;
        }
        self.ceiling_wire_mtu = Some(match self.ceiling_wire_mtu {
            Some(ceiling) => ceiling.min(size),
            None => size,
        });
    }

    fn continue_search(&mut self, now: Instant) -> Action {
        match self.next_probe_size() {
            Some(size) => self.issue(size, now),
            None => self.settle(),
        }
    }

    /// Next size to try, or `None` once converged.
    fn next_probe_size(&self) -> Option<WireMtu> {
        if let Some(floor) = self.floor_check {
            return Some(floor);
        }

        let max = u32::from(self.config.max_probed_wire_mtu.get());
        let verified = u32::from(self.verified_wire_mtu.get());
        // Exclusive upper bound of the search
        let upper = match self.ceiling_wire_mtu {
            Some(ceiling) => u32::from(ceiling.get()).min(max + 1),
            None => max + 1,
        };
        if upper <= verified + 1 {
            return None;
        }

        let gap = upper - verified;
        if gap <= u32::from(self.config.granularity) {
            // Nothing has failed yet: try the top of the range outright.
            return match self.ceiling_wire_mtu {
                None => Some(self.config.max_probed_wire_mtu),
                Some(_) => None,
            };
        }

        let mid = verified + (gap + 1) / 2;
        Some(WireMtu(mid.min(max) as u16))
    }

    fn issue(&mut self, size: WireMtu, now: Instant) -> Action {
        if self.last_probe_size != Some(size) {
            self.attempts_at_size = 0;
        }

        let probe = Probe {
            id: self.next_probe_id,
            size,
            timeout: self.config.probe_timeout,
        };
        self.next_probe_id = self.next_probe_id.wrapping_add(1);
        self.outstanding = Some(probe);
        self.last_probe_size = Some(size);
        self.last_probe_time = Some(now);
        self.probes_sent += 1;
        Action::SendProbe(probe)
    }

    fn settle(&mut self) -> Action {
        self.lifecycle = ProbeLifecycle::Stable;
        self.outstanding = None;
        self.floor_check = None;
        Action::Revalidate {
            after: self.config.revalidation_interval,
        }
    }

    fn degrade(&mut self) -> Action {
        self.lifecycle = ProbeLifecycle::Degraded;
        self.verified_wire_mtu = WireMtu::SAFE;
        self.ceiling_wire_mtu = None;
        self.floor_check = None;
        self.outstanding = None;
        Action::Halt
    }
}
