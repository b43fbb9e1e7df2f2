//! Contains implementation for generating and decoding ICMP echo packets
//!
//! The ICMP echo protocol is specified in [RFC 792](https://www.rfc-editor.org/rfc/rfc792),
//! the checksum in [RFC 1071](https://www.rfc-editor.org/rfc/rfc1071).

use pnet::packet::{
    icmp::echo_reply::EchoReplyPacket,
    ipv4::Ipv4Packet,
};

/// Length of the fixed ICMP echo header.
pub const HEADER_LEN: usize = 8;
/// Length of the zero payload carried by every request.
pub const PAYLOAD_LEN: usize = 48;
/// Length of a serialized echo message.
pub const ECHO_LEN: usize = HEADER_LEN + PAYLOAD_LEN;
/// Length of an option-less IPv4 header.
pub const IPV4_HEADER_LEN: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IcmpType {
    EchoReply,
    EchoRequest,
    Unknown(u8),
}

impl From<u8> for IcmpType {
    fn from(value: u8) -> Self {
        match value {
            0 => IcmpType::EchoReply,
            8 => IcmpType::EchoRequest,
            _ => IcmpType::Unknown(value),
        }
    }
}

impl From<IcmpType> for u8 {
    fn from(value: IcmpType) -> Self {
        match value {
            IcmpType::EchoReply => 0,
            IcmpType::EchoRequest => 8,
            IcmpType::Unknown(x) => x,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IcmpCode {
    Zero,
    Unknown(u8),
}

impl From<u8> for IcmpCode {
    fn from(value: u8) -> Self {
        match value {
            0 => IcmpCode::Zero,
            _ => IcmpCode::Unknown(value),
        }
    }
}

impl From<IcmpCode> for u8 {
    fn from(value: IcmpCode) -> Self {
        match value {
            IcmpCode::Zero => 0,
            IcmpCode::Unknown(x) => x,
        }
    }
}

/// An ICMP echo message: the 8 byte header followed by a fixed zero payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpEcho {
    ty: IcmpType,
    code: IcmpCode,
    id: u16,
    seq: u16,
    data: [u8; PAYLOAD_LEN],
}

impl IcmpEcho {
    pub fn new(id: u16, seq: u16) -> Self {
        IcmpEcho {
            ty: IcmpType::EchoRequest,
            code: IcmpCode::Zero,
            id,
            seq,
            data: [0; PAYLOAD_LEN],
        }
    }

    /// Size of the serialized message, header included.
    pub const fn size() -> usize {
        ECHO_LEN
    }

    /// Serializes the message with a zero checksum field.
    pub fn construct_buf(&self, buf: &mut [u8]) {
        buf[0] = u8::from(self.ty);
        buf[1] = u8::from(self.code);
        buf[2..4].copy_from_slice(&[0, 0]);
        buf[4..6].copy_from_slice(&self.id.to_be_bytes());
        buf[6..8].copy_from_slice(&self.seq.to_be_bytes());
        buf[HEADER_LEN..ECHO_LEN].copy_from_slice(&self.data);
    }

    /// Wire bytes with the checksum patched in.
    pub fn to_bytes(&self) -> [u8; ECHO_LEN] {
        let mut buf = [0u8; ECHO_LEN];
        self.construct_buf(&mut buf);
        let sum = checksum(&buf);
        buf[2..4].copy_from_slice(&sum.to_be_bytes());
        buf
    }
}

/// Internet checksum over `buf`.
///
/// Odd-length buffers are summed as if padded with a trailing zero byte; the
/// pad is never written back into `buf`. Computing this over a buffer that
/// already carries its checksum yields zero.
pub fn checksum(buf: &[u8]) -> u16 {
    let mut sum = 0u32;
    let mut words = buf.chunks_exact(2);
    for word in &mut words {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
    }
    if let [last] = words.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 > 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// The fields of an echo reply datagram the pinger reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    /// ICMP bytes, i.e. the datagram minus its IPv4 header
    pub bytes: usize,
    pub ttl: u8,
    pub identifier: u16,
    pub sequence: u16,
}

impl EchoReply {
    /// Decodes a raw IPv4 datagram. Returns `None` for anything that is not a
    /// well formed ICMP echo reply with code 0.
    pub fn parse(datagram: &[u8]) -> Option<Self> {
        let ip = Ipv4Packet::new(datagram)?;
        let ihl = ip.get_header_length() as usize * 4;
        if ihl < IPV4_HEADER_LEN || ihl > datagram.len() {
            return None;
        }
        let reply = EchoReplyPacket::new(&datagram[ihl..])?;
        let ty = IcmpType::from(reply.get_icmp_type().0);
        let code = IcmpCode::from(reply.get_icmp_code().0);
        if ty != IcmpType::EchoReply || code != IcmpCode::Zero {
            return None;
        }
        Some(EchoReply {
            bytes: datagram.len() - ihl,
            ttl: ip.get_ttl(),
            identifier: reply.get_identifier(),
            sequence: reply.get_sequence_number(),
        })
    }
}
