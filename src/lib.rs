//! A ping utility: ICMP echo requests to one IPv4 host, one at a time, with
//! per-probe latency and a summary on interrupt.
//!
//! The ICMP echo protocol is specified in [RFC 792](https://www.rfc-editor.org/rfc/rfc792)

pub mod conn;
pub mod icmp;
pub mod parser;
pub mod pinger;
pub mod stats;
