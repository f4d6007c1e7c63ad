use crate::types::{Endpoint, ProbeError, ProbeOutcome};
use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tracing::debug;

/// Something that can classify one port of an endpoint.
///
/// The scheduler is generic over this so batches can be driven by synthetic
/// probes; [`TcpProber`] is the real connect-scan implementation.
pub trait Prober: Send + Sync + 'static {
    fn probe(
        &self,
        endpoint: &Endpoint,
        port: u16,
        timeout: Duration,
    ) -> impl Future<Output = ProbeOutcome> + Send;
}

/// Plain TCP connect probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

impl Prober for TcpProber {
    fn probe(
        &self,
        endpoint: &Endpoint,
        port: u16,
        timeout: Duration,
    ) -> impl Future<Output = ProbeOutcome> + Send {
        probe(endpoint, port, timeout)
    }
}

/// Attempt one TCP handshake with `endpoint` on `port`, bounded by `timeout`.
///
/// - Handshake completes: `Open`. Nothing is read or written.
/// - Connection refused (RST): `Closed`.
/// - No handshake within `timeout`: `Error(Timeout)`.
/// - Any other I/O failure: `Error(Io)`.
///
/// The stream (or the pending connect) is dropped before returning, so the
/// socket is closed on every path.
pub async fn probe(endpoint: &Endpoint, port: u16, timeout: Duration) -> ProbeOutcome {
    let addr = endpoint.socket_addr(port);
    let start = Instant::now();
    debug!(port, "scanning port");

    let outcome = match time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            drop(stream);
            ProbeOutcome::Open
        }
        Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => ProbeOutcome::Closed,
        Ok(Err(e)) => ProbeOutcome::Error(ProbeError::Io {
            message: e.to_string(),
        }),
        Err(_elapsed) => ProbeOutcome::Error(ProbeError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
    };

    debug!(
        port,
        elapsed_ms = start.elapsed().as_millis() as u64,
        outcome = %outcome,
        "finished scanning port"
    );
    outcome
}
