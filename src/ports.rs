use std::ops::RangeInclusive;
use std::time::Duration;

/// A parameter outside its accepted range. Raised before any probing starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("port must be an integer in range from 1 to 65535, got '{0}'")]
    Port(String),
    #[error("invalid port range {first}-{last} (first port > last port)")]
    Range { first: u16, last: u16 },
    #[error("time must be a non-negative number of seconds, got '{0}'")]
    Seconds(String),
    #[error("value must be a positive integer, got '{0}'")]
    Positive(String),
}

/// Inclusive, non-empty range of TCP ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    first: u16,
    last: u16,
}

impl PortRange {
    pub const FULL: PortRange = PortRange {
        first: 1,
        last: 65535,
    };

    pub fn new(first: u16, last: u16) -> Result<Self, ValidationError> {
        if first == 0 {
            return Err(ValidationError::Port(first.to_string()));
        }
        if first > last {
            return Err(ValidationError::Range { first, last });
        }
        Ok(Self { first, last })
    }

    pub fn first(&self) -> u16 {
        self.first
    }

    pub fn last(&self) -> u16 {
        self.last
    }

    pub fn len(&self) -> usize {
        (self.last - self.first) as usize + 1
    }

    /// Never true: a range holds at least one port.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn batch_count(&self, batch_size: usize) -> usize {
        let k = batch_size.max(1);
        self.len().div_ceil(k)
    }

    /// Split the range into ascending, contiguous batches of at most `batch_size` ports.
    /// A `batch_size` of zero is treated as one.
    pub fn batches(&self, batch_size: usize) -> Batches {
        Batches {
            next: self.first as u32,
            last: self.last as u32,
            size: batch_size.clamp(1, u16::MAX as usize + 1) as u32,
        }
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}-{}]", self.first, self.last)
    }
}

/// Iterator over the batches of a [`PortRange`].
#[derive(Debug, Clone)]
pub struct Batches {
    // u32 so that stepping past 65535 terminates instead of wrapping.
    next: u32,
    last: u32,
    size: u32,
}

impl Iterator for Batches {
    type Item = RangeInclusive<u16>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.last {
            return None;
        }
        let start = self.next;
        let end = (start + self.size - 1).min(self.last);
        self.next = end + 1;
        Some(start as u16..=end as u16)
    }
}

/// Parse a port number in 1..=65535.
pub fn parse_port(s: &str) -> Result<u16, ValidationError> {
    let val: u32 = s
        .trim()
        .parse()
        .map_err(|_| ValidationError::Port(s.to_string()))?;
    if val == 0 || val > 65535 {
        return Err(ValidationError::Port(s.to_string()));
    }
    Ok(val as u16)
}

/// Parse a non-negative, finite number of seconds (fractions allowed).
pub fn parse_seconds(s: &str) -> Result<Duration, ValidationError> {
    let val: f64 = s
        .trim()
        .parse()
        .map_err(|_| ValidationError::Seconds(s.to_string()))?;
    Duration::try_from_secs_f64(val).map_err(|_| ValidationError::Seconds(s.to_string()))
}

/// Parse an integer >= 1.
pub fn parse_positive(s: &str) -> Result<usize, ValidationError> {
    match s.trim().parse::<usize>() {
        Ok(v) if v >= 1 => Ok(v),
        _ => Err(ValidationError::Positive(s.to_string())),
    }
}

/// Best-effort service name for well-known TCP ports.
pub fn service_name(port: u16) -> Option<&'static str> {
    const SERVICES: &[(u16, &str)] = &[
        (20, "ftp-data"),
        (21, "ftp"),
        (22, "ssh"),
        (23, "telnet"),
        (25, "smtp"),
        (53, "domain"),
        (70, "gopher"),
        (79, "finger"),
        (80, "http"),
        (88, "kerberos"),
        (110, "pop3"),
        (111, "sunrpc"),
        (119, "nntp"),
        (135, "epmap"),
        (139, "netbios-ssn"),
        (143, "imap"),
        (179, "bgp"),
        (389, "ldap"),
        (443, "https"),
        (445, "microsoft-ds"),
        (465, "submissions"),
        (514, "shell"),
        (515, "printer"),
        (587, "submission"),
        (631, "ipp"),
        (636, "ldaps"),
        (873, "rsync"),
        (993, "imaps"),
        (995, "pop3s"),
        (1080, "socks"),
        (1433, "ms-sql-s"),
        (1521, "ncube-lm"),
        (1723, "pptp"),
        (1883, "mqtt"),
        (2049, "nfs"),
        (2375, "docker"),
        (3128, "squid-http"),
        (3260, "iscsi-target"),
        (3306, "mysql"),
        (3389, "ms-wbt-server"),
        (4369, "epmd"),
        (5060, "sip"),
        (5432, "postgresql"),
        (5672, "amqp"),
        (5900, "rfb"),
        (6379, "redis"),
        (6667, "ircd"),
        (8080, "http-alt"),
        (8443, "https-alt"),
        (9092, "kafka"),
        (9200, "elasticsearch"),
        (11211, "memcache"),
        (27017, "mongodb"),
    ];
    SERVICES
        .binary_search_by_key(&port, |(p, _)| *p)
        .ok()
        .map(|i| SERVICES[i].1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_port_bounds() {
        assert_eq!(parse_port("1").unwrap(), 1);
        assert_eq!(parse_port(" 65535 ").unwrap(), 65535);
        assert!(parse_port("0").is_err());
        assert!(parse_port("70000").is_err());
        assert!(parse_port("http").is_err());
    }

    #[test]
    fn parse_seconds_accepts_fractions() {
        assert_eq!(parse_seconds("0.5").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_seconds("0").unwrap(), Duration::ZERO);
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("NaN").is_err());
        assert!(parse_seconds("soon").is_err());
    }

    #[test]
    fn parse_positive_rejects_zero() {
        assert_eq!(parse_positive("10").unwrap(), 10);
        assert!(parse_positive("0").is_err());
        assert!(parse_positive("-3").is_err());
    }

    #[test]
    fn range_must_be_ordered() {
        assert!(PortRange::new(10, 9).is_err());
        assert!(PortRange::new(0, 9).is_err());
        let r = PortRange::new(5, 5).unwrap();
        assert_eq!(r.len(), 1);
        assert_eq!(PortRange::FULL.len(), 65535);
    }

    #[test]
    fn batches_of_ten_over_twenty_five_ports() {
        let r = PortRange::new(1, 25).unwrap();
        let got: Vec<_> = r.batches(10).collect();
        assert_eq!(got, vec![1..=10, 11..=20, 21..=25]);
        assert_eq!(r.batch_count(10), 3);
    }

    #[test]
    fn batches_reach_top_port_without_overflow() {
        let r = PortRange::new(65530, 65535).unwrap();
        let got: Vec<_> = r.batches(4).collect();
        assert_eq!(got, vec![65530..=65533, 65534..=65535]);
        let all: Vec<_> = PortRange::FULL.batches(100_000).collect();
        assert_eq!(all, vec![1..=65535]);
    }

    #[test]
    fn service_lookup() {
        assert_eq!(service_name(22), Some("ssh"));
        assert_eq!(service_name(8080), Some("http-alt"));
        assert_eq!(service_name(12345), None);
    }
}
