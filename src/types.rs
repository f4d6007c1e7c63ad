use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Address family of a resolved target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl From<IpAddr> for AddressFamily {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }
}

/// A resolved scan target. The port is filled in per probe via [`Endpoint::socket_addr`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub family: AddressFamily,
    pub canonical_name: String,
    pub ip: IpAddr,
}

impl Endpoint {
    pub fn new(canonical_name: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            family: AddressFamily::from(ip),
            canonical_name: canonical_name.into(),
            ip,
        }
    }

    pub fn socket_addr(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.ip, port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.canonical_name, self.ip)
    }
}

/// Why a single probe failed to classify its port as open or closed.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeError {
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("{message}")]
    Io { message: String },
    /// The probe task died before reporting (panic or abort).
    #[error("probe task failed: {message}")]
    Task { message: String },
}

/// Tri-state classification of one port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Open,
    Closed,
    Error(ProbeError),
}

impl ProbeOutcome {
    pub fn is_open(&self) -> bool {
        matches!(self, ProbeOutcome::Open)
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Open => write!(f, "OPEN"),
            ProbeOutcome::Closed => write!(f, "CLOSED"),
            ProbeOutcome::Error(e) => write!(f, "ERROR ({e})"),
        }
    }
}

/// Per-port outcomes accumulated across all settled batches of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    outcomes: BTreeMap<u16, ProbeOutcome>,
    pub(crate) interrupted: bool,
    pub(crate) started_at: String,
    pub(crate) finished_at: String,
    pub(crate) elapsed_ms: u64,
}

impl ScanResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a result directly from a set of outcomes, e.g. for presentation tests.
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = (u16, ProbeOutcome)>) -> Self {
        Self {
            outcomes: outcomes.into_iter().collect(),
            ..Self::default()
        }
    }

    pub(crate) fn record(&mut self, port: u16, outcome: ProbeOutcome) {
        let prev = self.outcomes.insert(port, outcome);
        debug_assert!(prev.is_none(), "port {port} recorded twice");
    }

    /// True if the scan stopped early; only fully settled batches are present.
    pub fn interrupted(&self) -> bool {
        self.interrupted
    }

    /// RFC3339 start time.
    pub fn started_at(&self) -> &str {
        &self.started_at
    }

    pub fn finished_at(&self) -> &str {
        &self.finished_at
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn outcome(&self, port: u16) -> Option<&ProbeOutcome> {
        self.outcomes.get(&port)
    }

    /// Outcomes in ascending port order.
    pub fn outcomes(&self) -> impl Iterator<Item = (u16, &ProbeOutcome)> {
        self.outcomes.iter().map(|(p, o)| (*p, o))
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.outcomes
            .values()
            .any(|o| matches!(o, ProbeOutcome::Error(_)))
    }

    pub fn report(&self) -> ScanReport {
        ScanReport::from_result(self)
    }
}

/// How a scan ended, as seen by the presentation layer.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    Clean,
    PartialFailure,
    Interrupted,
}

/// Projection of a [`ScanResult`] handed to the presentation layer.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub open_ports: Vec<u16>,
    pub errors: BTreeMap<u16, ProbeError>,
    pub closed_count: usize,
    pub scanned: usize,
    pub interrupted: bool,
    pub started_at: String,
    pub finished_at: String,
    pub elapsed_ms: u64,
}

impl ScanReport {
    pub fn from_result(result: &ScanResult) -> Self {
        let mut open_ports = Vec::new();
        let mut errors = BTreeMap::new();
        let mut closed_count = 0;
        for (port, outcome) in result.outcomes() {
            match outcome {
                ProbeOutcome::Open => open_ports.push(port),
                ProbeOutcome::Closed => closed_count += 1,
                ProbeOutcome::Error(e) => {
                    errors.insert(port, e.clone());
                }
            }
        }
        Self {
            open_ports,
            errors,
            closed_count,
            scanned: result.len(),
            interrupted: result.interrupted,
            started_at: result.started_at.clone(),
            finished_at: result.finished_at.clone(),
            elapsed_ms: result.elapsed_ms,
        }
    }

    /// Interruption takes precedence over errors: a stopped scan is partial either way.
    pub fn completion(&self) -> Completion {
        if self.interrupted {
            Completion::Interrupted
        } else if !self.errors.is_empty() {
            Completion::PartialFailure
        } else {
            Completion::Clean
        }
    }
}

/// Diagnostic output level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl Verbosity {
    /// Default `tracing` filter directive for this level.
    pub fn filter_directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn report_projects_open_and_errors() {
        let cause = ProbeError::Io {
            message: "network unreachable".into(),
        };
        let result = ScanResult::from_outcomes([
            (1, ProbeOutcome::Open),
            (2, ProbeOutcome::Closed),
            (3, ProbeOutcome::Error(cause.clone())),
        ]);
        let report = result.report();
        assert_eq!(report.open_ports, vec![1]);
        assert_eq!(report.errors, BTreeMap::from([(3, cause)]));
        assert_eq!(report.closed_count, 1);
        assert_eq!(report.scanned, 3);
        assert_eq!(report.completion(), Completion::PartialFailure);
    }

    #[test]
    fn open_ports_are_ascending_regardless_of_insert_order() {
        let mut result = ScanResult::new();
        for port in [9000, 22, 443, 80] {
            result.record(port, ProbeOutcome::Open);
        }
        assert_eq!(result.report().open_ports, vec![22, 80, 443, 9000]);
    }

    #[test]
    fn completion_states() {
        let mut result = ScanResult::from_outcomes([(80, ProbeOutcome::Closed)]);
        assert_eq!(result.report().completion(), Completion::Clean);
        result.interrupted = true;
        assert_eq!(result.report().completion(), Completion::Interrupted);
    }

    #[test]
    fn endpoint_family_follows_address() {
        let ep = Endpoint::new("localhost", IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(ep.family, AddressFamily::Ipv6);
        assert_eq!(ep.socket_addr(8080).port(), 8080);
        assert_eq!(ep.to_string(), "localhost (::1)");
    }

    #[test]
    fn report_serializes_error_causes_by_kind() {
        let result = ScanResult::from_outcomes([
            (22, ProbeOutcome::Open),
            (23, ProbeOutcome::Error(ProbeError::Timeout { timeout_ms: 100 })),
        ]);
        let v = serde_json::to_value(result.report()).unwrap();
        assert_eq!(v["open_ports"], serde_json::json!([22]));
        assert_eq!(v["errors"]["23"]["kind"], "timeout");
        assert_eq!(v["errors"]["23"]["timeout_ms"], 100);
        assert_eq!(v["interrupted"], false);
    }

    #[test]
    fn fresh_result_exposes_read_only_metadata() {
        let result = ScanResult::new();
        assert!(!result.interrupted());
        assert_eq!(result.elapsed_ms(), 0);
        assert!(result.started_at().is_empty() && result.finished_at().is_empty());
    }
}
