//! Raw ICMP connection used by the pinger.

use std::{
    io,
    net::{IpAddr, Ipv4Addr},
    time::{Duration, Instant},
};

use pnet::{
    packet::{
        ip::IpNextHeaderProtocols,
        ipv4::{Ipv4, MutableIpv4Packet},
        Packet,
    },
    transport::{ipv4_packet_iter, TransportChannelType, TransportReceiver, TransportSender},
};
use tracing::{debug, trace};

use crate::pinger::{PingError, PingResult};

const CHANNEL_BUF_SIZE: usize = 4096;
const TTL: u8 = 64;
/// Shortest receive timeout handed to the socket. A zero `SO_RCVTIMEO`
/// means "no timeout", and pnet truncates to whole microseconds.
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// The network side of the pinger.
///
/// Reads and writes are passed through untouched; errors come back as plain
/// [`io::Error`]s so the caller can tell a timeout from anything else.
pub trait Connection {
    /// True while the underlying socket is open.
    fn is_live(&self) -> bool;
    /// Opens a fresh socket to the same peer.
    fn reopen(&mut self) -> PingResult<()>;
    /// The peer as resolved when dialing.
    fn remote_addr(&self) -> Ipv4Addr;
    /// Bounds the next read/write pair.
    fn set_deadline(&mut self, deadline: Instant) -> PingResult<()>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
    /// Releases the socket. Safe to call on a closed connection.
    fn close(&mut self);
}

/// An IPv4 raw socket bound to the ICMP protocol.
///
/// Only datagrams sent by the dialed peer are surfaced by [`Connection::read`].
pub struct IcmpConn {
    remote: Ipv4Addr,
    channel: Option<(TransportSender, TransportReceiver)>,
    deadline: Option<Instant>,
}

impl IcmpConn {
    /// Resolves `address` and opens the socket, both bounded by `timeout`.
    pub async fn dial(address: &str, timeout: Duration) -> PingResult<Self> {
        let remote = resolve(address, timeout).await?;
        let mut conn = IcmpConn::closed(remote);
        conn.open()?;
        Ok(conn)
    }

    fn closed(remote: Ipv4Addr) -> Self {
        IcmpConn {
            remote,
            channel: None,
            deadline: None,
        }
    }

    fn open(&mut self) -> PingResult<()> {
        let proto = TransportChannelType::Layer3(IpNextHeaderProtocols::Icmp);
        let (mut tx, rx) =
            pnet::transport::transport_channel(CHANNEL_BUF_SIZE, proto).map_err(|e| {
                match e.kind() {
                    io::ErrorKind::PermissionDenied => PingError::Privilege(e),
                    _ => PingError::Open(e),
                }
            })?;
        tx.set_ttl(TTL).map_err(PingError::Open)?;
        debug!(remote = %self.remote, "opened raw icmp socket");
        self.channel = Some((tx, rx));
        Ok(())
    }

    fn remaining(&self) -> io::Result<Duration> {
        time_left(self.deadline, Instant::now())
    }
}

impl Connection for IcmpConn {
    fn is_live(&self) -> bool {
        self.channel.is_some()
    }

    fn reopen(&mut self) -> PingResult<()> {
        self.close();
        self.open()
    }

    fn remote_addr(&self) -> Ipv4Addr {
        self.remote
    }

    fn set_deadline(&mut self, deadline: Instant) -> PingResult<()> {
        if deadline <= Instant::now() {
            return Err(PingError::Deadline(deadline));
        }
        self.deadline = Some(deadline);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remote = IpAddr::V4(self.remote);
        loop {
            let timeout = self.remaining()?;
            let (_, rx) = self
                .channel
                .as_mut()
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
            match ipv4_packet_iter(rx).next_with_timeout(timeout)? {
                Some((packet, addr)) if addr == remote => {
                    let data = packet.packet();
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    return Ok(n);
                }
                Some((_, addr)) => trace!(%addr, "ignoring datagram from other host"),
                None => return Err(io::Error::from(io::ErrorKind::TimedOut)),
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.remaining()?;
        let remote = self.remote;
        let (tx, _) = self
            .channel
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        let mut ip_buf = vec![0u8; MutableIpv4Packet::minimum_packet_size() + buf.len()];
        let mut pkt = MutableIpv4Packet::new(&mut ip_buf)
            .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
        pkt.populate(&Ipv4 {
            version: 4,
            header_length: 5,
            dscp: 0,
            ecn: 0,
            total_length: (MutableIpv4Packet::minimum_packet_size() + buf.len()) as u16,
            identification: 0,
            flags: 2,
            fragment_offset: 0,
            ttl: TTL,
            next_level_protocol: IpNextHeaderProtocols::Icmp,
            checksum: 0,
            source: Ipv4Addr::UNSPECIFIED,
            destination: remote,
            options: vec![],
            payload: buf.to_vec(),
        });
        tx.send_to(pkt, IpAddr::V4(remote))?;
        Ok(buf.len())
    }

    fn close(&mut self) {
        if self.channel.take().is_some() {
            debug!(remote = %self.remote, "closed raw icmp socket");
        }
        self.deadline = None;
    }
}

/// Time left until `deadline`, never less than [`MIN_READ_TIMEOUT`] while the
/// deadline is still ahead.
fn time_left(deadline: Option<Instant>, now: Instant) -> io::Result<Duration> {
    match deadline {
        Some(deadline) if now >= deadline => Err(io::Error::from(io::ErrorKind::TimedOut)),
        Some(deadline) => Ok((deadline - now).max(MIN_READ_TIMEOUT)),
        None => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "no deadline set on icmp connection",
        )),
    }
}

/// Resolves `address` to the first IPv4 address the OS reports for it.
pub async fn resolve(address: &str, timeout: Duration) -> PingResult<Ipv4Addr> {
    if let Ok(ip) = address.parse::<Ipv4Addr>() {
        return Ok(ip);
    }
    let addrs = tokio::time::timeout(timeout, tokio::net::lookup_host((address, 0)))
        .await
        .map_err(|_| PingError::ResolveTimeout(address.to_string(), timeout))?
        .map_err(|source| PingError::Resolve {
            address: address.to_string(),
            source,
        })?;
    let ip = addrs
        .filter_map(|addr| match addr.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| PingError::NoIpv4Address(address.to_string()))?;
    debug!(%address, %ip, "resolved");
    Ok(ip)
}

#[cfg(test)]
mod test {
    use std::{
        io,
        net::Ipv4Addr,
        time::{Duration, Instant},
    };

    use super::{resolve, time_left, Connection, IcmpConn, MIN_READ_TIMEOUT};
    use crate::pinger::PingError;

    #[test]
    fn close_is_idempotent() {
        let mut conn = IcmpConn::closed(Ipv4Addr::LOCALHOST);
        assert!(!conn.is_live());
        conn.close();
        conn.close();
        assert!(!conn.is_live());
        assert_eq!(conn.remote_addr(), Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn io_on_closed_connection() {
        let mut conn = IcmpConn::closed(Ipv4Addr::LOCALHOST);
        conn.set_deadline(Instant::now() + Duration::from_secs(1)).unwrap();
        let mut buf = [0u8; 64];
        let err = conn.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        let err = conn.write(&[8, 0, 0, 0]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn expired_deadline() {
        let mut conn = IcmpConn::closed(Ipv4Addr::LOCALHOST);
        assert!(matches!(
            conn.set_deadline(Instant::now() - Duration::from_millis(1)),
            Err(PingError::Deadline(_))
        ));
        conn.set_deadline(Instant::now() + Duration::from_millis(1)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let err = conn.read(&mut [0u8; 64]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn read_timeout_never_rounds_to_zero() {
        let now = Instant::now();
        let left = time_left(Some(now + Duration::from_nanos(400)), now).unwrap();
        assert_eq!(left, MIN_READ_TIMEOUT);
        let left = time_left(Some(now + Duration::from_millis(250)), now).unwrap();
        assert_eq!(left, Duration::from_millis(250));
        let err = time_left(Some(now), now).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        let err = time_left(None, now).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn resolve_literal() {
        let ip = resolve("192.0.2.7", Duration::from_secs(1)).await.unwrap();
        assert_eq!(ip, Ipv4Addr::new(192, 0, 2, 7));
    }

    #[tokio::test]
    async fn resolve_localhost() {
        let ip = resolve("localhost", Duration::from_secs(5)).await.unwrap();
        assert!(ip.is_loopback());
    }
}
