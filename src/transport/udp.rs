//! Probe echo over UDP.
//!
//! Both ends of a path run the same receive loop: probes are checked and
//! answered with a small ack, acks are handed back to the local prober.
//! Anything else on the socket belongs to the tunnel and is ignored here.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::engine::PmtudEngine;
use crate::error::PmtudResult;
use crate::fragmentation::AddressFamily;
use crate::mtu::WireMtu;
use crate::prober::PathId;
use crate::protocol::constants::{ProbeKind, PROBE_HEADER_SIZE, PROBE_MAGIC};
use crate::protocol::packet::{encode_ack, verify_probe_padding, ProbeHeader};
use crate::transport::PacketConn;

/// Largest datagram the echo loop reads
const RECV_BUFFER_SIZE: usize = 65_536;

/// What a received datagram turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoOutcome {
    /// Not a probe datagram
    NotProbe,
    /// A valid probe; an ack was sent back
    Answered(ProbeHeader),
    /// A probe that arrived damaged or with the wrong size
    Rejected(ProbeHeader),
    /// An acknowledgment for one of our probes
    Ack(ProbeHeader),
}

/// Expected UDP payload length of a probe for `wire_size` coming from `from`.
fn expected_probe_len(wire_size: u16, from: &SocketAddr) -> usize {
    let family = AddressFamily::of(&SocketAddr::new(from.ip().to_canonical(), from.port()));
    WireMtu(wire_size)
        .udp_payload_len(family)
        .max(PROBE_HEADER_SIZE)
}

/// Handle one datagram received on a path socket.
///
/// A probe is only acknowledged when it arrived whole: the length must match
/// the wire size it claims and the padding must be intact.
pub async fn handle_probe_datagram<C>(
    conn: &C,
    data: &[u8],
    from: SocketAddr,
) -> PmtudResult<EchoOutcome>
where
    C: PacketConn + ?Sized,
{
    if data.len() < PROBE_MAGIC.len() || data[..PROBE_MAGIC.len()] != PROBE_MAGIC {
        return Ok(EchoOutcome::NotProbe);
    }

    let header = match ProbeHeader::from_bytes(data) {
        Ok(header) => header,
        Err(e) => {
            trace!("malformed probe datagram from {}: {}", from, e);
            return Ok(EchoOutcome::NotProbe);
        }
    };

    match header.kind {
        ProbeKind::Ack => Ok(EchoOutcome::Ack(header)),
        ProbeKind::Probe => {
            let expected = expected_probe_len(header.wire_size, &from);
            if data.len() != expected || !verify_probe_padding(data) {
                debug!(
                    "rejecting probe {} from {}: {} bytes, expected {}",
                    header.probe_id,
                    from,
                    data.len(),
                    expected
                );
                return Ok(EchoOutcome::Rejected(header));
            }

            conn.send_to(&encode_ack(header.probe_id, header.wire_size), from)
                .await?;
            trace!("acked probe {} ({}) from {}", header.probe_id, header.wire_size, from);
            Ok(EchoOutcome::Answered(header))
        }
    }
}

/// Receive loop for a path socket.
///
/// `on_ack` is called for every ack received; the loop runs until `cancel`
/// fires.
pub async fn run_echo_loop<F>(
    socket: Arc<UdpSocket>,
    cancel: CancellationToken,
    mut on_ack: F,
) -> PmtudResult<()>
where
    F: FnMut(SocketAddr, ProbeHeader) + Send,
{
    let mut buffer = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        let (len, from) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            received = socket.recv_from(&mut buffer) => match received {
                Ok(received) => received,
                Err(e) => {
                    // ICMP errors from earlier sends surface here on some
                    // platforms.
                    debug!("recv on {:?} failed: {}", socket.local_addr().ok(), e);
                    continue;
                }
            },
        };

        match handle_probe_datagram(socket.as_ref(), &buffer[..len], from).await {
            Ok(EchoOutcome::Ack(header)) => on_ack(from, header),
            Ok(_) => {}
            Err(e) => warn!("failed to answer probe from {}: {}", from, e),
        }
    }
}

/// Ack handler that forwards to the engine, mapping the sender to its path.
pub fn engine_ack_handler<R>(
    engine: Arc<PmtudEngine>,
    resolve: R,
) -> impl FnMut(SocketAddr, ProbeHeader) + Send
where
    R: Fn(SocketAddr) -> Option<PathId> + Send,
{
    move |from, header| match resolve(from) {
        Some(path) => {
            if !engine.report_ack(&path, header.probe_id) {
                trace!("ack {} for untracked path {}", header.probe_id, path);
            }
        }
        None => trace!("ack {} from unknown peer {}", header.probe_id, from),
    }
}

/// Answer probes only; acks are discarded.
pub async fn run_responder(socket: Arc<UdpSocket>, cancel: CancellationToken) -> PmtudResult<()> {
    run_echo_loop(socket, cancel, |from, header| {
        trace!("ignoring ack {} from {}", header.probe_id, from)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::encode_probe;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::io;

    #[derive(Default)]
    struct RecordingConn {
        sent: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
    }

    #[async_trait]
    impl PacketConn for RecordingConn {
        async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
            self.sent.lock().push((buf.to_vec(), target));
            Ok(buf.len())
        }
    }

    fn peer_v4() -> SocketAddr {
        "192.0.2.7:41641".parse().unwrap()
    }

    #[tokio::test]
    async fn test_valid_probe_is_acked() {
        let conn = RecordingConn::default();
        let from = peer_v4();
        let probe = encode_probe(42, 1500, WireMtu(1500).udp_payload_len(AddressFamily::V4));

        let outcome = handle_probe_datagram(&conn, &probe, from).await.unwrap();
        assert_eq!(outcome, EchoOutcome::Answered(ProbeHeader::probe(42, 1500)));

        let sent = conn.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, from);
        assert_eq!(ProbeHeader::from_bytes(&sent[0].0).unwrap(), ProbeHeader::ack(42, 1500));
    }

    #[tokio::test]
    async fn test_v6_probe_length() {
        let conn = RecordingConn::default();
        let from: SocketAddr = "[2001:db8::7]:41641".parse().unwrap();
        let probe = encode_probe(1, 1400, WireMtu(1400).udp_payload_len(AddressFamily::V6));

        let outcome = handle_probe_datagram(&conn, &probe, from).await.unwrap();
        assert!(matches!(outcome, EchoOutcome::Answered(_)));

        // The IPv4 length is wrong for an IPv6 sender.
        let probe = encode_probe(2, 1400, WireMtu(1400).udp_payload_len(AddressFamily::V4));
        let outcome = handle_probe_datagram(&conn, &probe, from).await.unwrap();
        assert!(matches!(outcome, EchoOutcome::Rejected(_)));
    }

    #[tokio::test]
    async fn test_truncated_probe_rejected() {
        let conn = RecordingConn::default();
        let probe = encode_probe(9, 1500, WireMtu(1500).udp_payload_len(AddressFamily::V4));

        let outcome = handle_probe_datagram(&conn, &probe[..1000], peer_v4())
            .await
            .unwrap();
        assert_eq!(outcome, EchoOutcome::Rejected(ProbeHeader::probe(9, 1500)));
        assert!(conn.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_ack_and_foreign_traffic() {
        let conn = RecordingConn::default();

        let outcome = handle_probe_datagram(&conn, &encode_ack(5, 9000), peer_v4())
            .await
            .unwrap();
        assert_eq!(outcome, EchoOutcome::Ack(ProbeHeader::ack(5, 9000)));

        let outcome = handle_probe_datagram(&conn, b"\x04\0\0\0tunnel data", peer_v4())
            .await
            .unwrap();
        assert_eq!(outcome, EchoOutcome::NotProbe);
        assert!(conn.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_responder_answers_over_loopback() {
        let responder = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let responder_addr = responder.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_responder(responder, cancel.clone()));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let probe = encode_probe(77, 1360, WireMtu(1360).udp_payload_len(AddressFamily::V4));
        client.send_to(&probe, responder_addr).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            client.recv_from(&mut buf),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(from, responder_addr);
        assert_eq!(ProbeHeader::from_bytes(&buf[..len]).unwrap(), ProbeHeader::ack(77, 1360));

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
