use std::collections::BTreeMap;
use std::io;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use sps_rs::logging::{self, LogHandle};
use sps_rs::ports::{parse_port, parse_positive, parse_seconds, service_name, PortRange};
use sps_rs::prompt::{MenuChoice, PromptError, Prompter, BANNER};
use sps_rs::resolve::resolve_host;
use sps_rs::scanner::{self, ScanConfig, DEFAULT_BATCH_SIZE};
use sps_rs::types::{Completion, Endpoint, ScanReport, Verbosity};

/// sps-rs — scans a host for open TCP ports using plain connection initiation.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sps-rs",
    version,
    about = "Scans 'host' for open ports in range from 'start_port' to 'end_port' inclusive using TCP connection initiation, waiting for 'timeout' seconds for connection establishment.",
    long_about = None
)]
struct Cli {
    /// IP or host name to scan. If omitted, run in interactive mode.
    host: Option<String>,

    /// First port in port range to scan.
    #[arg(short = 's', long = "start-port", default_value_t = 1, value_parser = parse_port)]
    start_port: u16,

    /// Last port in port range to scan.
    #[arg(short = 'e', long = "end-port", default_value_t = 65535, value_parser = parse_port)]
    end_port: u16,

    /// Time in seconds to wait for connection establishment.
    #[arg(short = 't', long, default_value = "0.1", value_parser = parse_seconds)]
    timeout: Duration,

    /// Maximum size of a batch of concurrent port scans.
    #[arg(short = 'b', long, default_value_t = DEFAULT_BATCH_SIZE, value_parser = parse_positive)]
    batch: usize,

    /// Time interval in seconds between successive batches.
    #[arg(short = 'i', long, default_value = "1.0", value_parser = parse_seconds)]
    interval: Duration,

    /// Display additional output during execution.
    #[arg(short = 'v', long, conflicts_with = "quiet")]
    verbose: bool,

    /// Display only the result.
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Print the report as JSON instead of text.
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn verbosity(&self) -> Verbosity {
        if self.verbose {
            Verbosity::Verbose
        } else if self.quiet {
            Verbosity::Quiet
        } else {
            Verbosity::Normal
        }
    }

    /// Validate the range and tuning. Runs before the host is resolved.
    fn scan_params(&self) -> Result<(PortRange, ScanConfig)> {
        let range = PortRange::new(self.start_port, self.end_port).context("invalid port range")?;
        let config = ScanConfig {
            timeout: self.timeout,
            batch_size: self.batch,
            interval: self.interval,
        };
        config.validate().context("invalid scan configuration")?;
        Ok((range, config))
    }
}

/// What Ctrl-C acts on.
#[derive(Debug, Default)]
struct Interrupts {
    /// Token of the scan currently running, if any.
    scan: Mutex<Option<CancellationToken>>,
    /// Interactive mode only: set when Ctrl-C arrives at a prompt.
    prompt: Option<Arc<AtomicBool>>,
}

impl Interrupts {
    fn set_scan(&self, token: Option<CancellationToken>) {
        if let Ok(mut guard) = self.scan.lock() {
            *guard = token;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log = match logging::init(cli.verbosity()) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(2);
        }
    };

    let interrupts = Arc::new(Interrupts {
        prompt: cli
            .host
            .is_none()
            .then(|| Arc::new(AtomicBool::new(false))),
        ..Interrupts::default()
    });
    spawn_ctrl_c_handler(interrupts.clone());

    let res = match cli.host.as_deref() {
        Some(host) => run_once(&cli, host, &interrupts).await,
        None => run_interactive(&log, &interrupts).await,
    };
    match res {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

/// Ctrl-C stops the running scan. With no scan running, interactive mode
/// abandons the open request (a second Ctrl-C exits); CLI mode exits.
fn spawn_ctrl_c_handler(interrupts: Arc<Interrupts>) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            let token = interrupts.scan.lock().ok().and_then(|g| g.clone());
            if let Some(t) = token {
                warn!("interrupt received; stopping scan");
                t.cancel();
                continue;
            }
            match &interrupts.prompt {
                Some(flag) if !flag.swap(true, Ordering::SeqCst) => {
                    eprintln!("^C (press Enter to return to the menu)");
                }
                _ => std::process::exit(130),
            }
        }
    });
}

async fn run_once(cli: &Cli, host: &str, interrupts: &Interrupts) -> Result<ExitCode> {
    let (range, config) = cli.scan_params()?;
    let endpoint = resolve_host(host)
        .await
        .with_context(|| format!("invalid host: {host}"))?;
    run_scan(&endpoint, range, &config, cli.verbosity(), cli.json, interrupts).await
}

async fn run_interactive(log: &LogHandle, interrupts: &Interrupts) -> Result<ExitCode> {
    println!("{BANNER}");
    let stdin = io::stdin();
    let mut prompter = Prompter::new(stdin.lock(), io::stdout());
    if let Some(flag) = &interrupts.prompt {
        prompter = prompter.with_interrupt(flag.clone());
    }
    loop {
        let choice = match prompter.menu() {
            Ok(c) => c,
            Err(PromptError::Interrupted) => return Ok(ExitCode::from(130)),
            Err(e) => return Err(e.into()),
        };
        match choice {
            MenuChoice::Exit => return Ok(ExitCode::SUCCESS),
            MenuChoice::Scan => {
                let req = match prompter.scan_request().await {
                    Ok(req) => req,
                    Err(PromptError::Interrupted) => {
                        println!();
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                log.set_verbosity(req.verbosity)?;
                run_scan(&req.endpoint, req.range, &req.config, req.verbosity, false, interrupts)
                    .await?;
            }
        }
    }
}

/// Run one scan and present it. Exit code 1 signals that some ports errored.
async fn run_scan(
    endpoint: &Endpoint,
    range: PortRange,
    config: &ScanConfig,
    verbosity: Verbosity,
    json: bool,
    interrupts: &Interrupts,
) -> Result<ExitCode> {
    let cancel = CancellationToken::new();
    interrupts.set_scan(Some(cancel.clone()));
    let outcome = scanner::scan_with_cancel(endpoint, range, config, cancel).await;
    interrupts.set_scan(None);

    let (report, failure) = match &outcome {
        Ok(result) => (result.report(), None),
        Err(e) => (e.report().clone(), Some(e.to_string())),
    };

    if json {
        print_json(endpoint, range, &report)?;
    } else {
        print_report(endpoint, range, &report, failure.as_deref(), verbosity);
    }

    Ok(if failure.is_some() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

fn print_report(
    endpoint: &Endpoint,
    range: PortRange,
    report: &ScanReport,
    failure: Option<&str>,
    verbosity: Verbosity,
) {
    if let Some(msg) = failure {
        println!("{msg}");
        if verbosity != Verbosity::Quiet {
            for (port, cause) in &report.errors {
                println!("Port {port}: {cause}");
            }
        }
    }

    if report.completion() == Completion::Interrupted {
        println!(
            "Scan interrupted by user after {:.4}s; results cover {} of {} ports.",
            report.elapsed_ms as f64 / 1000.0,
            report.scanned,
            range.len()
        );
    }

    if report.open_ports.is_empty() {
        println!("No open ports found on {endpoint} in range {range}.");
        return;
    }
    println!("Open ports on {endpoint} in range {range}:");
    for &port in &report.open_ports {
        println!("{} ({})", port, service_name(port).unwrap_or("unknown"));
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    host: &'a str,
    ip: String,
    first_port: u16,
    last_port: u16,
    completion: Completion,
    services: BTreeMap<u16, &'static str>,
    #[serde(flatten)]
    report: &'a ScanReport,
}

fn print_json(endpoint: &Endpoint, range: PortRange, report: &ScanReport) -> Result<()> {
    let out = JsonReport {
        host: &endpoint.canonical_name,
        ip: endpoint.ip.to_string(),
        first_port: range.first(),
        last_port: range.last(),
        completion: report.completion(),
        services: report
            .open_ports
            .iter()
            .map(|&p| (p, service_name(p).unwrap_or("unknown")))
            .collect(),
        report,
    };
    serde_json::to_writer_pretty(io::stdout().lock(), &out).context("failed to write JSON report")?;
    println!();
    Ok(())
}
