//! Entry point for the endpoint manager.
//!
//! The manager hands every direct UDP path to [`PmtudEngine::create_path_prober`],
//! forwards probe acknowledgments seen by the transport, and tears paths down
//! when peers go away. Each path runs in its own task; the only state the
//! paths share is the [`MtuPolicy`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{MtuOverrides, PmtudConfig};
use crate::error::{PmtudError, PmtudResult};
use crate::fragmentation::{platform_backend, AddressFamily, DontFragment};
use crate::mtu::TunMtu;
use crate::policy::MtuPolicy;
use crate::prober::driver::{PathDriver, PathEvent};
use crate::prober::{PathId, PathProbeState, PathSnapshot};
use crate::transport::PacketConn;

struct PathHandle {
    events: mpsc::UnboundedSender<PathEvent>,
    snapshot: watch::Receiver<PathSnapshot>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Path MTU discovery for every direct path of this node
pub struct PmtudEngine {
    config: PmtudConfig,
    policy: Arc<MtuPolicy>,
    backend: Arc<dyn DontFragment>,
    paths: Mutex<HashMap<PathId, PathHandle>>,
    shutdown: CancellationToken,
}

impl PmtudEngine {
    /// Engine using this platform's don't-fragment backend.
    pub fn new(config: PmtudConfig, overrides: MtuOverrides) -> Self {
        Self::with_backend(config, overrides, Arc::new(*platform_backend()))
    }

    /// Engine using an explicit don't-fragment backend.
    pub fn with_backend(
        config: PmtudConfig,
        overrides: MtuOverrides,
        backend: Arc<dyn DontFragment>,
    ) -> Self {
        let config = config.validated();

        if overrides.pmtud_enabled && !backend.is_capable() {
            warn!("path MTU discovery enabled but not supported on this platform");
        }
        info!(
            "PMTUD {} (override: {:?}), tunnel MTU {}",
            if overrides.pmtud_enabled { "enabled" } else { "disabled" },
            overrides.forced_mtu,
            crate::policy::resolve_tun_mtu(overrides.forced_mtu, overrides.pmtud_enabled, None)
        );

        Self {
            config,
            policy: Arc::new(MtuPolicy::new(overrides)),
            backend,
            paths: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Validated prober settings.
    pub fn config(&self) -> &PmtudConfig {
        &self.config
    }

    /// Shared tunnel MTU policy.
    pub fn policy(&self) -> &Arc<MtuPolicy> {
        &self.policy
    }

    /// Whether probing can work at all here.
    pub fn should_pmtud(&self) -> bool {
        self.backend.is_capable()
    }

    /// Current tunnel MTU.
    pub fn tun_mtu(&self) -> TunMtu {
        self.policy.current()
    }

    /// Changes of the tunnel MTU, for the TUN device.
    pub fn subscribe(&self) -> watch::Receiver<TunMtu> {
        self.policy.subscribe()
    }

    /// Start probing a path. Must be called from within a tokio runtime.
    ///
    /// With PMTUD disabled the path is not tracked and this is a no-op.
    pub fn create_path_prober(
        &self,
        path: PathId,
        conn: Arc<dyn PacketConn>,
        family: AddressFamily,
    ) -> PmtudResult<()> {
        if !self.policy.overrides().pmtud_enabled {
            debug!("PMTUD disabled, not probing {}", path);
            return Ok(());
        }

        let mut paths = self.paths.lock();
        if paths.contains_key(&path) {
            return Err(PmtudError::PathExists(path.to_string()));
        }

        let state = PathProbeState::new(self.config.clone());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());
        let cancel = self.shutdown.child_token();

        self.policy.register_path(&path);
        let driver = PathDriver::new(
            path.clone(),
            family,
            conn,
            self.backend.clone(),
            state,
            events_rx,
            snapshot_tx,
            self.policy.clone(),
            cancel.clone(),
        );
        let task = tokio::spawn(driver.run());

        debug!("probing {} ({})", path, family);
        paths.insert(
            path,
            PathHandle {
                events: events_tx,
                snapshot: snapshot_rx,
                cancel,
                task,
            },
        );
        Ok(())
    }

    /// Stop probing a path and drop its contribution to the policy.
    pub fn destroy_path_prober(&self, path: &PathId) -> PmtudResult<()> {
        let handle = self
            .paths
            .lock()
            .remove(path)
            .ok_or_else(|| PmtudError::UnknownPath(path.to_string()))?;

        handle.cancel.cancel();
        self.policy.remove_path(path);
        debug!("stopped probing {}", path);
        Ok(())
    }

    /// Re-validate a path right away.
    pub fn notify_route_changed(&self, path: &PathId) -> PmtudResult<()> {
        self.send_event(path, PathEvent::RouteChanged)
    }

    /// The transport saw the peer acknowledge `probe_id` on `path`.
    ///
    /// Returns false when the path is not (or no longer) probed; late acks
    /// are expected and harmless.
    pub fn report_ack(&self, path: &PathId, probe_id: u32) -> bool {
        self.send_event(path, PathEvent::Ack(probe_id)).is_ok()
    }

    /// Latest state of a probed path.
    pub fn path_snapshot(&self, path: &PathId) -> Option<PathSnapshot> {
        self.paths
            .lock()
            .get(path)
            .map(|handle| *handle.snapshot.borrow())
    }

    /// Watch a path's state as it changes.
    pub fn watch_path(&self, path: &PathId) -> Option<watch::Receiver<PathSnapshot>> {
        self.paths.lock().get(path).map(|handle| handle.snapshot.clone())
    }

    /// Paths currently probed.
    pub fn paths(&self) -> Vec<PathId> {
        self.paths.lock().keys().cloned().collect()
    }

    /// Stop every prober and wait for their tasks to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<(PathId, PathHandle)> = self.paths.lock().drain().collect();
        for (path, handle) in handles {
            self.policy.remove_path(&path);
            if let Err(e) = handle.task.await {
                warn!("prober for {} ended abnormally: {}", path, e);
            }
        }
    }

    fn send_event(&self, path: &PathId, event: PathEvent) -> PmtudResult<()> {
        let paths = self.paths.lock();
        let handle = paths
            .get(path)
            .ok_or_else(|| PmtudError::UnknownPath(path.to_string()))?;
        handle
            .events
            .send(event)
            .map_err(|_| PmtudError::UnknownPath(path.to_string()))
    }
}

impl Drop for PmtudEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
