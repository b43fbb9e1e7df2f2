//! Running statistics for a ping run and the summary printed on shutdown.

use std::{fmt, io, time::Duration};

const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// Aggregate counters for one run.
///
/// Latencies are kept in signed nanoseconds. `min` and `max` start at the
/// opposite extremes so an empty run never reports a spurious value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statistics {
    transmitted: u64,
    received: u64,
    total_latency: i64,
    min_latency: i64,
    max_latency: i64,
}

impl Default for Statistics {
    fn default() -> Self {
        Statistics {
            transmitted: 0,
            received: 0,
            total_latency: 0,
            min_latency: i64::MAX,
            max_latency: i64::MIN,
        }
    }
}

impl Statistics {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn transmitted(&self) -> u64 {
        self.transmitted
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Records a request that made it onto the wire.
    pub fn record_transmit(&mut self) {
        self.transmitted += 1;
    }

    /// Records a matched reply.
    pub fn record_reply(&mut self, rtt: Duration) {
        debug_assert!(self.received < self.transmitted);
        let nanos = i64::try_from(rtt.as_nanos()).unwrap_or(i64::MAX);
        self.received += 1;
        self.total_latency = self.total_latency.saturating_add(nanos);
        self.min_latency = self.min_latency.min(nanos);
        self.max_latency = self.max_latency.max(nanos);
    }

    /// Share of transmitted requests that got no reply, in percent.
    /// Zero when nothing was sent.
    pub fn loss_percent(&self) -> f64 {
        if self.transmitted == 0 {
            return 0.0;
        }
        (self.transmitted - self.received) as f64 / self.transmitted as f64 * 100.0
    }

    pub fn min_ms(&self) -> f64 {
        if self.received == 0 {
            return 0.0;
        }
        self.min_latency as f64 / NANOS_PER_MILLI
    }

    pub fn max_ms(&self) -> f64 {
        if self.received == 0 {
            return 0.0;
        }
        self.max_latency as f64 / NANOS_PER_MILLI
    }

    pub fn avg_ms(&self) -> f64 {
        if self.received == 0 {
            return 0.0;
        }
        self.total_latency as f64 / self.received as f64 / NANOS_PER_MILLI
    }

    /// Summary for `address`, ready to print.
    pub fn report<'a>(&'a self, address: &'a str) -> Report<'a> {
        Report {
            address,
            stats: self,
        }
    }
}

/// Shutdown summary, rendered through [`fmt::Display`].
pub struct Report<'a> {
    address: &'a str,
    stats: &'a Statistics,
}

impl Report<'_> {
    pub fn write_to<W: io::Write>(&self, mut out: W) -> io::Result<()> {
        write!(out, "{self}")?;
        out.flush()
    }
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.stats;
        writeln!(f)?;
        writeln!(f, "--- {} ping statistics ---", self.address)?;
        writeln!(
            f,
            "{} packets transmitted, {} packets received, {:.2}% packet loss",
            s.transmitted,
            s.received,
            s.loss_percent()
        )?;
        writeln!(
            f,
            "round-trip min/max/avg = {:.3}/{:.3}/{:.3} ms",
            s.min_ms(),
            s.max_ms(),
            s.avg_ms()
        )
    }
}
