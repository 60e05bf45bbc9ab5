//! IPv4 datagram header extraction and outbound datagram framing.

use etherparse::{IpNumber, Ipv4HeaderSlice};
use std::net::Ipv4Addr;

use crate::error::{Error, NotIpv4, Result};

/// Time to live of every datagram this stack emits.
pub const TTL: u8 = 64;

/// IP protocol number of TCP.
pub const PROTOCOL_TCP: u8 = 6;

/// Length of an IPv4 header without options.
const MIN_HEADER_LEN: usize = 20;

/// The parts of an inbound IPv4 datagram the stack consumes.
///
/// `payload` borrows the frame it was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header<'a> {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub protocol: u8,
    pub payload: &'a [u8],
}

/// Parses `frame` as an IPv4 datagram.
///
/// Options are skipped using the IHL field, and the payload ends where the
/// total length says it does, so link padding is never treated as data.
pub fn parse(frame: &[u8]) -> std::result::Result<Ipv4Header<'_>, NotIpv4> {
    let version = frame.first().ok_or(NotIpv4::Empty)? >> 4;
    if version != 4 {
        return Err(NotIpv4::Version(version));
    }

    if frame.len() < MIN_HEADER_LEN {
        return Err(NotIpv4::Header);
    }
    let header_len = usize::from(frame[0] & 0x0F) * 4;
    if header_len < MIN_HEADER_LEN || header_len > frame.len() {
        return Err(NotIpv4::Header);
    }
    let total_len = usize::from(u16::from_be_bytes([frame[2], frame[3]]));
    if total_len < header_len || total_len > frame.len() {
        return Err(NotIpv4::TotalLength {
            total: total_len,
            available: frame.len(),
        });
    }

    let ip = Ipv4HeaderSlice::from_slice(&frame[..total_len]).map_err(|_| NotIpv4::Header)?;
    Ok(Ipv4Header {
        source: ip.source_addr(),
        destination: ip.destination_addr(),
        protocol: ip.protocol().0,
        payload: &frame[header_len..total_len],
    })
}

/// Prefixes `payload` with a fresh IPv4 header carrying TCP from `source` to
/// `destination`. Total length and header checksum are computed here.
pub fn encode(source: Ipv4Addr, destination: Ipv4Addr, payload: &[u8]) -> Result<Vec<u8>> {
    let payload_len = u16::try_from(payload.len()).map_err(|_| Error::Oversized(payload.len()))?;
    let header = etherparse::Ipv4Header::new(
        payload_len,
        TTL,
        IpNumber::TCP,
        source.octets(),
        destination.octets(),
    )
    .map_err(|_| Error::Oversized(payload.len()))?;

    let mut frame = Vec::with_capacity(header.header_len() as usize + payload.len());
    header.write(&mut frame)?;
    frame.extend_from_slice(payload);
    Ok(frame)
}
