use std::fmt;
use std::net::Ipv4Addr;

use crate::ipv4::Ipv4Header;

pub mod connection;
pub mod segment;
pub mod sequence;
pub mod state;

use segment::TcpSegment;

/// Identifies a connection by the 4-tuple of an inbound segment. The peer is
/// `src` and the local endpoint is `dst`; segments we emit swap the two.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ConnectionKey {
    pub src: (Ipv4Addr, u16),
    pub dst: (Ipv4Addr, u16),
}

impl ConnectionKey {
    pub fn new(src: (Ipv4Addr, u16), dst: (Ipv4Addr, u16)) -> Self {
        Self { src, dst }
    }

    /// The key of the connection an inbound segment belongs to.
    pub fn of(ip: &Ipv4Header<'_>, segment: &TcpSegment) -> Self {
        Self {
            src: (ip.source, segment.src_port),
            dst: (ip.destination, segment.dst_port),
        }
    }

    /// Remote endpoint of the connection.
    pub fn peer(&self) -> (Ipv4Addr, u16) {
        self.src
    }

    /// Local endpoint of the connection.
    pub fn local(&self) -> (Ipv4Addr, u16) {
        self.dst
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.src.0, self.src.1, self.dst.0, self.dst.1
        )
    }
}
