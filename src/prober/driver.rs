//! Async task driving one path's state machine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::state::{Action, PathProbeState, PathSnapshot, Probe, ProbeFailure, ProbeLifecycle};
use super::PathId;
use crate::error::PmtudError;
use crate::fragmentation::{set_dont_fragment_with, AddressFamily, DontFragment};
use crate::policy::MtuPolicy;
use crate::protocol::packet::encode_probe;
use crate::transport::PacketConn;

/// Events delivered to a running prober
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PathEvent {
    /// The transport saw the peer acknowledge this probe id
    Ack(u32),
    /// The route underneath the path changed
    RouteChanged,
}

pub(crate) struct PathDriver {
    path: PathId,
    family: AddressFamily,
    conn: Arc<dyn PacketConn>,
    backend: Arc<dyn DontFragment>,
    state: PathProbeState,
    events: mpsc::UnboundedReceiver<PathEvent>,
    snapshot_tx: watch::Sender<PathSnapshot>,
    policy: Arc<MtuPolicy>,
    cancel: CancellationToken,
    route_changed: bool,
}

impl PathDriver {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        path: PathId,
        family: AddressFamily,
        conn: Arc<dyn PacketConn>,
        backend: Arc<dyn DontFragment>,
        state: PathProbeState,
        events: mpsc::UnboundedReceiver<PathEvent>,
        snapshot_tx: watch::Sender<PathSnapshot>,
        policy: Arc<MtuPolicy>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            path,
            family,
            conn,
            backend,
            state,
            events,
            snapshot_tx,
            policy,
            cancel,
            route_changed: false,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut action = self.state.start(self.backend.is_capable(), now());

        loop {
            self.publish();
            let next = match action {
                Action::SendProbe(probe) => self.probe(probe).await,
                Action::Revalidate { after } => self.wait_revalidation(after).await,
                Action::Halt | Action::Ignore => self.park().await,
            };
            match next {
                Some(next) => action = next,
                None => break,
            }
        }

        debug!("prober for {} stopped", self.path);
    }

    /// Send one probe and wait for it to resolve.
    async fn probe(&mut self, probe: Probe) -> Option<Action> {
        if let Err(e) =
            set_dont_fragment_with(self.backend.as_ref(), self.conn.as_ref(), self.family, true)
        {
            if e.is_unsupported() {
                warn!("{}: {}", self.path, e);
                return Some(self.state.unsupported());
            }
            warn!("{}: failed to set don't fragment: {}", self.path, e);
            return self.retry_later(probe).await;
        }

        let datagram = encode_probe(
            probe.id,
            probe.size.get(),
            probe.size.udp_payload_len(self.family),
        );
        trace!(
            "{}: probe {} at wire MTU {} ({} byte payload)",
            self.path,
            probe.id,
            probe.size,
            datagram.len()
        );

        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            sent = self.conn.send_to(&datagram, self.path.remote) => sent,
        };
        if let Err(e) = sent {
            return match PmtudError::from_send_error(e, probe.size.get()) {
                PmtudError::SendTooLarge { .. } => {
                    Some(self.state.on_failure(probe.id, ProbeFailure::SendTooLarge, now()))
                }
                e => {
                    debug!("{}: probe send failed: {}", self.path, e);
                    self.retry_later(probe).await
                }
            };
        }

        let deadline = sleep(probe.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                event = self.events.recv() => match event {
                    Some(PathEvent::Ack(id)) => match self.state.on_ack(id, now()) {
                        Action::Ignore => trace!("{}: stale ack {}", self.path, id),
                        next => return Some(next),
                    },
                    // Picked up once this probe resolves.
                    Some(PathEvent::RouteChanged) => self.route_changed = true,
                    None => return None,
                },
                _ = &mut deadline => {
                    return Some(self.state.on_failure(probe.id, ProbeFailure::Timeout, now()));
                }
            }
        }
    }

    /// Report a socket error only once the probe's timeout has elapsed.
    async fn retry_later(&mut self, probe: Probe) -> Option<Action> {
        let deadline = sleep(probe.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                event = self.events.recv() => match event {
                    Some(PathEvent::Ack(id)) => trace!("{}: stale ack {}", self.path, id),
                    Some(PathEvent::RouteChanged) => self.route_changed = true,
                    None => return None,
                },
                _ = &mut deadline => {
                    return Some(self.state.on_failure(probe.id, ProbeFailure::Socket, now()));
                }
            }
        }
    }

    async fn wait_revalidation(&mut self, after: Duration) -> Option<Action> {
        if std::mem::take(&mut self.route_changed) {
            debug!("{}: route changed while probing, re-validating", self.path);
            return Some(self.state.revalidate(now()));
        }

        let timer = sleep(after);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                event = self.events.recv() => match event {
                    Some(PathEvent::RouteChanged) => {
                        debug!("{}: route changed, re-validating", self.path);
                        return Some(self.state.revalidate(now()));
                    }
                    Some(PathEvent::Ack(id)) => trace!("{}: stale ack {}", self.path, id),
                    None => return None,
                },
                _ = &mut timer => return Some(self.state.revalidate(now())),
            }
        }
    }

    /// Nothing left to do but drain events until torn down.
    async fn park(&mut self) -> Option<Action> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                event = self.events.recv() => {
                    if event.is_none() {
                        return None;
                    }
                }
            }
        }
    }

    fn publish(&self) {
        let snapshot = self.state.snapshot();
        let previous = self.snapshot_tx.send_replace(snapshot);

        if previous.lifecycle != snapshot.lifecycle {
            match snapshot.lifecycle {
                ProbeLifecycle::Stable => info!(
                    "{}: converged at wire MTU {} after {} probes",
                    self.path, snapshot.verified_wire_mtu, snapshot.probes_sent
                ),
                ProbeLifecycle::Degraded => warn!(
                    "{}: path MTU discovery unavailable, using wire MTU {}",
                    self.path, snapshot.verified_wire_mtu
                ),
                lifecycle => debug!("{}: {:?}", self.path, lifecycle),
            }
        }

        self.policy.update_path(&self.path, &snapshot);
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}
