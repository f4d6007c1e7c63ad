use crate::ports::{PortRange, ValidationError};
use crate::probe::{Prober, TcpProber};
use crate::types::{Endpoint, ProbeError, ProbeOutcome, ScanReport, ScanResult};
use ::time::{format_description::well_known, OffsetDateTime};
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Tuning for one scan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    /// Per-probe connect timeout.
    pub timeout: Duration,
    /// Maximum number of probes in flight at once.
    pub batch_size: usize,
    /// Pause between consecutive batches.
    pub interval: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            batch_size: DEFAULT_BATCH_SIZE,
            interval: DEFAULT_INTERVAL,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.batch_size == 0 {
            return Err(ValidationError::Positive(self.batch_size.to_string()));
        }
        Ok(())
    }
}

/// Raised at the end of a run when at least one port ended in `Error`.
///
/// Not a crash: it carries the complete result, so open ports and the
/// per-port causes are all still available.
#[derive(Debug, thiserror::Error)]
#[error("exceptions occurred during port scan ({} of {} ports failed)", .report.errors.len(), .report.scanned)]
pub struct AggregateScanError {
    result: ScanResult,
    report: ScanReport,
}

impl AggregateScanError {
    fn new(result: ScanResult) -> Self {
        let report = result.report();
        Self { result, report }
    }

    pub fn open_ports(&self) -> &[u16] {
        &self.report.open_ports
    }

    pub fn errors(&self) -> &std::collections::BTreeMap<u16, ProbeError> {
        &self.report.errors
    }

    pub fn report(&self) -> &ScanReport {
        &self.report
    }

    pub fn result(&self) -> &ScanResult {
        &self.result
    }

    pub fn into_result(self) -> ScanResult {
        self.result
    }
}

/// Connect-scan `range` on `endpoint` in sequential, internally concurrent batches.
pub async fn scan(
    endpoint: &Endpoint,
    range: PortRange,
    config: &ScanConfig,
) -> Result<ScanResult, AggregateScanError> {
    scan_internal(
        Arc::new(TcpProber),
        endpoint,
        range,
        config,
        CancellationToken::new(),
    )
    .await
}

/// Variant that stops early when `cancel` fires. The returned result then
/// holds only fully settled batches and has `interrupted` set.
pub async fn scan_with_cancel(
    endpoint: &Endpoint,
    range: PortRange,
    config: &ScanConfig,
    cancel: CancellationToken,
) -> Result<ScanResult, AggregateScanError> {
    scan_internal(Arc::new(TcpProber), endpoint, range, config, cancel).await
}

/// Variant driven by a caller-supplied [`Prober`].
pub async fn scan_with_prober<P: Prober>(
    prober: Arc<P>,
    endpoint: &Endpoint,
    range: PortRange,
    config: &ScanConfig,
    cancel: CancellationToken,
) -> Result<ScanResult, AggregateScanError> {
    scan_internal(prober, endpoint, range, config, cancel).await
}

async fn scan_internal<P: Prober>(
    prober: Arc<P>,
    endpoint: &Endpoint,
    range: PortRange,
    config: &ScanConfig,
    cancel: CancellationToken,
) -> Result<ScanResult, AggregateScanError> {
    let endpoint = Arc::new(endpoint.clone());
    let batch_count = range.batch_count(config.batch_size);
    let start = Instant::now();
    let mut result = ScanResult::new();
    result.started_at = now_rfc3339();

    info!(host = %endpoint, range = %range, batch_count, "starting scan");

    for (idx, ports) in range.batches(config.batch_size).enumerate() {
        let batch_no = idx + 1;
        if cancel.is_cancelled() {
            result.interrupted = true;
            break;
        }

        let batch_start = Instant::now();
        info!(
            batch = batch_no,
            batch_count,
            first = *ports.start(),
            last = *ports.end(),
            "scanning batch"
        );

        let Some(settled) = run_batch(&prober, &endpoint, ports, config.timeout, &cancel).await
        else {
            warn!(batch = batch_no, "batch interrupted; discarding its partial outcomes");
            result.interrupted = true;
            break;
        };
        for (port, outcome) in settled {
            result.record(port, outcome);
        }

        info!(
            batch = batch_no,
            batch_count,
            elapsed_ms = batch_start.elapsed().as_millis() as u64,
            "batch finished"
        );

        // No pause after the final batch.
        if batch_no < batch_count && !config.interval.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    result.interrupted = true;
                    break;
                }
                _ = time::sleep(config.interval) => {}
            }
        }
    }

    result.finished_at = now_rfc3339();
    result.elapsed_ms = start.elapsed().as_millis() as u64;

    if result.interrupted {
        info!(
            elapsed_ms = result.elapsed_ms,
            recorded = result.len(),
            "scan interrupted"
        );
    } else {
        info!(host = %endpoint, range = %range, elapsed_ms = result.elapsed_ms, "scan finished");
    }

    if result.has_errors() {
        return Err(AggregateScanError::new(result));
    }
    Ok(result)
}

/// Probe every port of one batch concurrently and wait for all of them.
///
/// Returns `None` if `cancel` fires first; in-flight probes are aborted and
/// joined before returning so no socket outlives the batch.
async fn run_batch<P: Prober>(
    prober: &Arc<P>,
    endpoint: &Arc<Endpoint>,
    ports: RangeInclusive<u16>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Option<Vec<(u16, ProbeOutcome)>> {
    let mut set = JoinSet::new();
    let mut pending = BTreeSet::new();

    for port in ports {
        pending.insert(port);
        let prober = Arc::clone(prober);
        let endpoint = Arc::clone(endpoint);
        set.spawn(async move {
            let outcome = prober.probe(&endpoint, port, timeout).await;
            (port, outcome)
        });
    }

    let mut settled = Vec::with_capacity(pending.len());
    let mut task_failure = None;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                set.shutdown().await;
                return None;
            }
            next = set.join_next() => match next {
                Some(Ok((port, outcome))) => {
                    pending.remove(&port);
                    settled.push((port, outcome));
                }
                Some(Err(e)) => {
                    warn!(error = %e, "probe task failed");
                    task_failure = Some(e.to_string());
                }
                None => break,
            }
        }
    }

    // A task that panicked never reported its port; keep one outcome per port anyway.
    if !pending.is_empty() {
        let message = task_failure.unwrap_or_else(|| "probe task vanished".to_string());
        settled.extend(pending.into_iter().map(|port| {
            (
                port,
                ProbeOutcome::Error(ProbeError::Task {
                    message: message.clone(),
                }),
            )
        }));
    }
    Some(settled)
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    struct FixedProber;

    impl Prober for FixedProber {
        async fn probe(&self, _: &Endpoint, port: u16, _: Duration) -> ProbeOutcome {
            match port % 3 {
                0 => ProbeOutcome::Open,
                1 => ProbeOutcome::Closed,
                _ => ProbeOutcome::Error(ProbeError::Io {
                    message: format!("boom {port}"),
                }),
            }
        }
    }

    struct PanickingProber;

    impl Prober for PanickingProber {
        async fn probe(&self, _: &Endpoint, port: u16, _: Duration) -> ProbeOutcome {
            if port == 2 {
                panic!("probe exploded");
            }
            ProbeOutcome::Closed
        }
    }

    fn endpoint() -> Endpoint {
        Endpoint::new("localhost", IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    fn fast_config(batch_size: usize) -> ScanConfig {
        ScanConfig {
            timeout: Duration::from_millis(50),
            batch_size,
            interval: Duration::ZERO,
        }
    }

    #[test]
    fn zero_batch_size_is_invalid() {
        assert!(fast_config(0).validate().is_err());
        assert!(ScanConfig::default().validate().is_ok());
    }

    #[tokio::test]
    async fn errors_are_aggregated_not_fatal() {
        let range = PortRange::new(1, 9).unwrap();
        let err = scan_with_prober(
            Arc::new(FixedProber),
            &endpoint(),
            range,
            &fast_config(4),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.open_ports(), &[3, 6, 9]);
        assert_eq!(
            err.errors().keys().copied().collect::<Vec<_>>(),
            vec![2, 5, 8]
        );
        assert_eq!(err.result().len(), 9);
        assert!(!err.report().interrupted);
    }

    #[tokio::test]
    async fn panicking_probe_becomes_error_outcome() {
        let range = PortRange::new(1, 3).unwrap();
        let err = scan_with_prober(
            Arc::new(PanickingProber),
            &endpoint(),
            range,
            &fast_config(3),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        let result = err.into_result();
        assert_eq!(result.len(), 3);
        assert!(matches!(
            result.outcome(2),
            Some(ProbeOutcome::Error(ProbeError::Task { .. }))
        ));
        assert_eq!(result.outcome(1), Some(&ProbeOutcome::Closed));
    }

    #[tokio::test]
    async fn pre_cancelled_scan_records_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = scan_with_prober(
            Arc::new(FixedProber),
            &endpoint(),
            PortRange::new(1, 9).unwrap(),
            &fast_config(3),
            cancel,
        )
        .await
        .unwrap();
        assert!(result.is_empty());
        assert!(result.interrupted());
    }

    #[tokio::test]
    async fn trailing_interval_is_skipped() {
        let config = ScanConfig {
            interval: Duration::from_secs(5),
            ..fast_config(10)
        };
        let start = Instant::now();
        let result = scan_with_prober(
            Arc::new(FixedProber),
            &endpoint(),
            PortRange::new(3, 3).unwrap(),
            &config,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(result.report().open_ports, vec![3]);
        assert!(!result.started_at().is_empty());
    }
}
