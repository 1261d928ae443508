//! Tunnel MTU policy.
//!
//! Turns operator overrides and the probers' findings into the single MTU
//! the TUN device should use. The resolved value is cached behind a watch
//! channel so readers never wait on probers.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::info;

use crate::config::MtuOverrides;
use crate::mtu::{wire_to_tun, TunMtu, WireMtu};
use crate::prober::{PathId, PathSnapshot, ProbeLifecycle};

/// Clamp an operator-supplied MTU into `[0, MAX_TUN_MTU]`.
pub fn clamp_tun_mtu(mtu: i64) -> TunMtu {
    TunMtu(mtu.clamp(0, i64::from(TunMtu::MAX.get())) as u16)
}

/// Resolve the tunnel MTU.
///
/// `best_verified` is the largest verified wire MTU among paths that count
/// (stable, or verified above the safe constant); `None` when no path does.
pub fn resolve_tun_mtu(
    forced_mtu: Option<i64>,
    pmtud_enabled: bool,
    best_verified: Option<WireMtu>,
) -> TunMtu {
    if let Some(mtu) = forced_mtu {
        return clamp_tun_mtu(mtu);
    }

    match best_verified {
        Some(wire) if pmtud_enabled => wire_to_tun(wire).min(TunMtu::MAX),
        _ => TunMtu::SAFE,
    }
}

/// MTU to configure before any path has been probed.
///
/// With PMTUD on this is optimistic (the largest MTU ever probed for), which
/// is what a freshly created TUN device is sized with.
pub fn default_tun_mtu(overrides: &MtuOverrides) -> TunMtu {
    if let Some(mtu) = overrides.forced_mtu {
        return clamp_tun_mtu(mtu);
    }
    if overrides.pmtud_enabled {
        return wire_to_tun(WireMtu::MAX_PROBED);
    }
    TunMtu::SAFE
}

/// What one path contributes to the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathContribution {
    /// Where the path's prober is
    pub lifecycle: ProbeLifecycle,
    /// Largest size the path has carried
    pub verified_wire_mtu: WireMtu,
}

impl PathContribution {
    fn counts(&self) -> bool {
        self.lifecycle == ProbeLifecycle::Stable || self.verified_wire_mtu > WireMtu::SAFE
    }
}

impl From<&PathSnapshot> for PathContribution {
    fn from(snapshot: &PathSnapshot) -> Self {
        Self {
            lifecycle: snapshot.lifecycle,
            verified_wire_mtu: snapshot.verified_wire_mtu,
        }
    }
}

/// Process-wide MTU policy, shared by every prober
#[derive(Debug)]
pub struct MtuPolicy {
    overrides: MtuOverrides,
    /// Registered paths; `None` until the first report
    paths: Mutex<HashMap<PathId, Option<PathContribution>>>,
    current: watch::Sender<TunMtu>,
}

impl MtuPolicy {
    /// Policy with no paths, resolved from the overrides alone.
    pub fn new(overrides: MtuOverrides) -> Self {
        let initial = resolve_tun_mtu(overrides.forced_mtu, overrides.pmtud_enabled, None);
        let (current, _) = watch::channel(initial);
        Self {
            overrides,
            paths: Mutex::new(HashMap::new()),
            current,
        }
    }

    /// Overrides the policy was built with.
    pub fn overrides(&self) -> &MtuOverrides {
        &self.overrides
    }

    /// Last resolved tunnel MTU.
    pub fn current(&self) -> TunMtu {
        *self.current.borrow()
    }

    /// Receive every change of the resolved MTU, e.g. to apply it to the
    /// TUN device.
    pub fn subscribe(&self) -> watch::Receiver<TunMtu> {
        self.current.subscribe()
    }

    /// Start accepting reports for `path`.
    pub fn register_path(&self, path: &PathId) {
        self.paths.lock().entry(path.clone()).or_insert(None);
    }

    /// Record a path's latest state. Reports for unregistered paths (a
    /// prober racing its own teardown) are dropped.
    pub fn update_path(&self, path: &PathId, snapshot: &PathSnapshot) -> Option<TunMtu> {
        let mut paths = self.paths.lock();
        let slot = paths.get_mut(path)?;
        let contribution = PathContribution::from(snapshot);
        if *slot == Some(contribution) {
            return None;
        }
        *slot = Some(contribution);
        self.recompute(&paths)
    }

    /// Forget a path; returns the new MTU if that changed it.
    pub fn remove_path(&self, path: &PathId) -> Option<TunMtu> {
        let mut paths = self.paths.lock();
        paths.remove(path)?;
        self.recompute(&paths)
    }

    /// Largest verified wire MTU among paths that count.
    pub fn best_verified(&self) -> Option<WireMtu> {
        best_of(&self.paths.lock())
    }

    /// Number of registered paths.
    pub fn tracked_paths(&self) -> usize {
        self.paths.lock().len()
    }

    fn recompute(&self, paths: &HashMap<PathId, Option<PathContribution>>) -> Option<TunMtu> {
        let resolved = resolve_tun_mtu(
            self.overrides.forced_mtu,
            self.overrides.pmtud_enabled,
            best_of(paths),
        );

        let changed = self.current.send_if_modified(|current| {
            if *current == resolved {
                return false;
            }
            *current = resolved;
            true
        });

        if changed {
            info!("tunnel MTU now {}", resolved);
            Some(resolved)
        } else {
            None
        }
    }
}

fn best_of(paths: &HashMap<PathId, Option<PathContribution>>) -> Option<WireMtu> {
    paths
        .values()
        .flatten()
        .filter(|c| c.counts())
        .map(|c| c.verified_wire_mtu)
        .max()
}
