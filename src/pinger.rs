//! Contains the implementation for the Ping program.

use std::{
    io::{self, Write},
    process::id,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, trace};

use crate::{
    conn::Connection,
    icmp::{EchoReply, IcmpEcho},
    stats::Statistics,
};

/// Large enough for an IPv4 header with options plus the echoed message.
const REPLY_BUF_SIZE: usize = 1024;
/// Granularity at which a pause between probes notices a shutdown request.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// The parameters for the pinging program
#[derive(Debug, Clone)]
pub struct PingParams {
    /// host name or IPv4 address to ping, as given by the user
    pub address: String,
    /// bound on resolving the host and on waiting for each echo reply
    pub timeout: Duration,
    /// pause after each reply or timeout before the next request
    pub interval: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum PingError {
    #[error("failed to resolve {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("timed out resolving {0} after {1:?}")]
    ResolveTimeout(String, Duration),
    #[error("no IPv4 address found for {0}")]
    NoIpv4Address(String),
    #[error("raw ICMP sockets need root or CAP_NET_RAW: {0}")]
    Privilege(#[source] io::Error),
    #[error("failed to open ICMP socket: {0}")]
    Open(#[source] io::Error),
    #[error("cannot set a deadline in the past ({0:?})")]
    Deadline(Instant),
    #[error("failed to send echo request: {0}")]
    Write(#[source] io::Error),
    #[error(transparent)]
    IoError(#[from] io::Error),
}

pub type PingResult<T> = Result<T, PingError>;

/// What became of a single echo request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Replied { reply: EchoReply, rtt: Duration },
    TimedOut { seq: u16 },
}

/// Sends one echo request at a time over `C` and reports each outcome to `W`.
pub struct Pinger<C, W> {
    params: PingParams,
    conn: C,
    out: W,
    /// constant for the run, taken from the process id
    ident: u16,
    seq: u16,
    stats: Statistics,
    buf: Vec<u8>,
}

impl<C: Connection, W: Write> Pinger<C, W> {
    pub fn new(params: PingParams, conn: C, out: W) -> Self {
        Pinger {
            params,
            conn,
            out,
            ident: id() as u16,
            seq: 0,
            stats: Statistics::new(),
            buf: vec![0; REPLY_BUF_SIZE],
        }
    }

    /// Overrides the identifier derived from the process id.
    pub fn with_identifier(mut self, ident: u16) -> Self {
        self.ident = ident;
        self
    }

    /// Sequence number the next request will carry.
    pub fn sequence(&self) -> u16 {
        self.seq
    }

    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    /// Prints the `PING ...` line shown before the first request.
    pub fn banner(&mut self) -> PingResult<()> {
        writeln!(
            self.out,
            "PING {} ({}): {} data bytes",
            self.params.address,
            self.conn.remote_addr(),
            IcmpEcho::size()
        )?;
        Ok(())
    }

    /// Sends one request and waits for its reply until the timeout expires.
    ///
    /// Datagrams that are not the reply to this request (other identifiers,
    /// stale sequence numbers, our own request looped back) are skipped. A
    /// failed read counts as a timeout and drops the connection so the next
    /// probe starts on a fresh socket. Only a failed write is an error.
    pub fn probe(&mut self) -> PingResult<ProbeOutcome> {
        if !self.conn.is_live() {
            debug!(remote = %self.conn.remote_addr(), "reopening connection");
            self.conn.reopen()?;
        }

        let seq = self.seq;
        let request = IcmpEcho::new(self.ident, seq).to_bytes();
        self.conn.set_deadline(Instant::now() + self.params.timeout)?;
        let sent_at = Instant::now();
        self.conn.write(&request).map_err(PingError::Write)?;
        self.stats.record_transmit();

        let outcome = loop {
            match self.conn.read(&mut self.buf) {
                Ok(n) => match EchoReply::parse(&self.buf[..n]) {
                    Some(reply) if reply.identifier == self.ident && reply.sequence == seq => {
                        let rtt = sent_at.elapsed();
                        self.stats.record_reply(rtt);
                        break ProbeOutcome::Replied { reply, rtt };
                    }
                    Some(reply) => trace!(seq, ?reply, "ignoring echo reply for another request"),
                    None => trace!(seq, n, "ignoring datagram that is not an echo reply"),
                },
                Err(e) => {
                    debug!(seq, kind = ?e.kind(), "no reply: {e}");
                    self.conn.close();
                    break ProbeOutcome::TimedOut { seq };
                }
            }
        };

        self.seq = self.seq.wrapping_add(1);
        self.print(&outcome)?;
        Ok(outcome)
    }

    fn print(&mut self, outcome: &ProbeOutcome) -> io::Result<()> {
        match outcome {
            ProbeOutcome::Replied { reply, rtt } => writeln!(
                self.out,
                "{} bytes from {}: icmp_seq={} ttl={} time={:.3} ms",
                reply.bytes,
                self.conn.remote_addr(),
                reply.sequence,
                reply.ttl,
                rtt.as_secs_f64() * 1000.0
            ),
            ProbeOutcome::TimedOut { seq } => {
                writeln!(self.out, "Request timeout for icmp_seq {}", seq)
            }
        }
    }

    /// Probes until `shutdown` is raised, then hands back the final counters.
    ///
    /// The flag is checked between probes and while pausing, so the returned
    /// statistics include every request this loop sent.
    pub fn run(mut self, shutdown: &AtomicBool) -> PingResult<Statistics> {
        while !shutdown.load(Ordering::Acquire) {
            self.probe()?;
            self.pause(shutdown);
        }
        self.conn.close();
        self.out.flush()?;
        debug!(
            transmitted = self.stats.transmitted(),
            received = self.stats.received(),
            "probe loop stopped"
        );
        Ok(self.stats)
    }

    fn pause(&self, shutdown: &AtomicBool) {
        let until = Instant::now() + self.params.interval;
        loop {
            if shutdown.load(Ordering::Acquire) {
                return;
            }
            let now = Instant::now();
            if now >= until {
                return;
            }
            thread::sleep((until - now).min(SHUTDOWN_POLL));
        }
    }
}
