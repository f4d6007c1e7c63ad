use crate::ports::{parse_port, parse_positive, parse_seconds, PortRange, ValidationError};
use crate::resolve::resolve_host;
use crate::scanner::{ScanConfig, DEFAULT_BATCH_SIZE, DEFAULT_INTERVAL, DEFAULT_TIMEOUT};
use crate::types::{Endpoint, Verbosity};
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const BANNER: &str = "\
*******SimplePortScanner*******
*        sps-rs               *
*******************************
Welcome to Simple Port Scanner!";

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    /// Ctrl-C arrived while a question was open; the request is abandoned.
    #[error("interrupted")]
    Interrupted,
    #[error("input closed")]
    Closed,
    #[error("terminal I/O failed: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, PromptError>;

/// Top-level menu selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Exit,
    Scan,
}

/// Everything needed to start one scan, collected interactively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub endpoint: Endpoint,
    pub range: PortRange,
    pub config: ScanConfig,
    pub verbosity: Verbosity,
}

/// Line-oriented prompter over any reader/writer pair (stdin/stdout in the binary).
#[derive(Debug)]
pub struct Prompter<R, W> {
    input: R,
    output: W,
    interrupt: Option<Arc<AtomicBool>>,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            interrupt: None,
        }
    }

    /// Watch `flag`: once set, the next answer is discarded and the current
    /// question fails with [`PromptError::Interrupted`]. The flag is cleared.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    #[cfg(test)]
    fn into_inner(self) -> (R, W) {
        (self.input, self.output)
    }

    pub fn menu(&mut self) -> Result<MenuChoice> {
        loop {
            writeln!(self.output, "Type in the number corresponding to desired action:")?;
            writeln!(self.output, "0 - Exit")?;
            writeln!(self.output, "1 - Scan host")?;
            match self.ask("Enter your choice:")?.as_str() {
                "0" => return Ok(MenuChoice::Exit),
                "1" => return Ok(MenuChoice::Scan),
                _ => writeln!(self.output, "Please enter the correct choice number.")?,
            }
        }
    }

    /// Ask for every scan parameter, re-prompting on invalid input.
    /// Empty input picks the default.
    pub async fn scan_request(&mut self) -> Result<ScanRequest> {
        let endpoint = loop {
            let host = self.ask("Enter host name or IP for scanning:")?;
            match resolve_host(&host).await {
                Ok(ep) => break ep,
                Err(e) => writeln!(self.output, "Invalid host value: {e}")?,
            }
        };

        let first = self.ask_parsed(
            "Enter the first port in scanning range (default: 1):",
            "first port",
            1,
            parse_port,
        )?;
        let range = loop {
            let last = self.ask_parsed(
                "Enter the last port in scanning range (default: 65535):",
                "last port",
                65535,
                parse_port,
            )?;
            match PortRange::new(first, last) {
                Ok(r) => break r,
                Err(e) => writeln!(self.output, "Invalid last port value: {e}")?,
            }
        };

        let timeout = self.ask_parsed(
            &format!(
                "Enter the connection timeout to use in seconds (default: {}):",
                DEFAULT_TIMEOUT.as_secs_f64()
            ),
            "timeout",
            DEFAULT_TIMEOUT,
            parse_seconds,
        )?;

        let verbosity = loop {
            let answer = self.ask(
                "Display detailed information during execution?[(Y)es/(N)o] (default: No):",
            )?;
            match answer.to_lowercase().as_str() {
                "y" | "yes" => break Verbosity::Verbose,
                "" | "n" | "no" => break Verbosity::Normal,
                _ => writeln!(
                    self.output,
                    "Please enter (Y)es or (N)o, or press [Enter] for default."
                )?,
            }
        };

        let batch_size = self.ask_parsed(
            &format!(
                "Enter the maximum size of a batch of concurrent port scans (default: {DEFAULT_BATCH_SIZE}):"
            ),
            "batch",
            DEFAULT_BATCH_SIZE,
            parse_positive,
        )?;
        let interval = self.ask_parsed(
            &format!(
                "Enter the time interval in seconds between successive batches of concurrent port scans (default: {}):",
                DEFAULT_INTERVAL.as_secs_f64()
            ),
            "interval",
            DEFAULT_INTERVAL,
            parse_seconds,
        )?;

        Ok(ScanRequest {
            endpoint,
            range,
            config: ScanConfig {
                timeout,
                batch_size,
                interval,
            },
            verbosity,
        })
    }

    fn ask_parsed<T>(
        &mut self,
        prompt: &str,
        label: &str,
        default: T,
        parse: impl Fn(&str) -> std::result::Result<T, ValidationError>,
    ) -> Result<T> {
        loop {
            let answer = self.ask(prompt)?;
            if answer.is_empty() {
                return Ok(default);
            }
            match parse(&answer) {
                Ok(v) => return Ok(v),
                Err(e) => writeln!(self.output, "Invalid {label} value: {e}")?,
            }
        }
    }

    fn ask(&mut self, prompt: &str) -> Result<String> {
        write!(self.output, "{prompt}")?;
        self.output.flush()?;
        let mut line = String::new();
        let n = self.input.read_line(&mut line)?;
        let interrupted = self
            .interrupt
            .as_ref()
            .is_some_and(|f| f.swap(false, Ordering::SeqCst));
        if interrupted {
            return Err(PromptError::Interrupted);
        }
        if n == 0 {
            return Err(PromptError::Closed);
        }
        Ok(line.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    fn prompter(input: &str) -> Prompter<Cursor<Vec<u8>>, Vec<u8>> {
        Prompter::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn menu_reprompts_on_bad_choice() {
        let mut p = prompter("7\n1\n");
        assert_eq!(p.menu().unwrap(), MenuChoice::Scan);
        let (_, out) = p.into_inner();
        assert!(String::from_utf8(out)
            .unwrap()
            .contains("Please enter the correct choice number."));
    }

    #[test]
    fn menu_errors_on_eof() {
        assert!(matches!(prompter("").menu(), Err(PromptError::Closed)));
    }

    #[tokio::test]
    async fn interrupt_abandons_request_and_next_one_starts_clean() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut p = prompter("half-typed\n127.0.0.1\n80\n90\n\n\n\n\n")
            .with_interrupt(flag.clone());

        // Ctrl-C while the host question is open: that answer is thrown away.
        flag.store(true, Ordering::SeqCst);
        assert!(matches!(
            p.scan_request().await,
            Err(PromptError::Interrupted)
        ));
        assert!(!flag.load(Ordering::SeqCst), "flag must be cleared");

        let req = p.scan_request().await.unwrap();
        assert_eq!(req.range, PortRange::new(80, 90).unwrap());
        assert_eq!(req.endpoint.canonical_name, "127.0.0.1");
    }

    #[tokio::test]
    async fn defaults_on_empty_answers() {
        let mut p = prompter("127.0.0.1\n\n\n\n\n\n\n");
        let req = p.scan_request().await.unwrap();
        assert_eq!(req.range, PortRange::FULL);
        assert_eq!(req.config, ScanConfig::default());
        assert_eq!(req.verbosity, Verbosity::Normal);
        assert_eq!(req.endpoint.canonical_name, "127.0.0.1");
    }

    #[tokio::test]
    async fn invalid_values_are_reprompted() {
        let input = "\n::1\n0\n20\n10\n30\n-1\n0.5\nmaybe\ny\n0\n5\n\n";
        let mut p = prompter(input);
        let req = p.scan_request().await.unwrap();
        assert_eq!(req.range, PortRange::new(20, 30).unwrap());
        assert_eq!(req.config.timeout, Duration::from_millis(500));
        assert_eq!(req.config.batch_size, 5);
        assert_eq!(req.config.interval, DEFAULT_INTERVAL);
        assert_eq!(req.verbosity, Verbosity::Verbose);

        let (_, out) = p.into_inner();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("Invalid host value"));
        assert!(out.contains("Invalid first port value"));
        assert!(out.contains("Invalid last port value"));
        assert!(out.contains("Invalid timeout value"));
        assert!(out.contains("Please enter (Y)es or (N)o"));
        assert!(out.contains("Invalid batch value"));
    }
}
