use bitflags::bitflags;
use etherparse::{TcpHeader, TcpHeaderSlice};
use std::net::Ipv4Addr;

use crate::error::{Error, Result, TcpParseError};
use crate::ipv4::{Ipv4Header, PROTOCOL_TCP};

bitflags! {
    /// TCP control bits (RFC 793, RFC 3168, RFC 3540).
    ///
    /// NS is carried in the low bit of the data offset byte, the others in
    /// the flags byte from CWR (high) to FIN (low).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u16 {
        const FIN = 1 << 0;
        const SYN = 1 << 1;
        const RST = 1 << 2;
        const PSH = 1 << 3;
        const ACK = 1 << 4;
        const URG = 1 << 5;
        const ECE = 1 << 6;
        const CWR = 1 << 7;
        const NS = 1 << 8;
    }
}

/// TCP segment, RFC 793 Section 3.1
///
/// ```text
///    0                   1                   2                   3
///    0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///   |          Source Port          |       Destination Port        |
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///   |                        Sequence Number                        |
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///   |                    Acknowledgment Number                      |
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///   |  Data |     |N|C|E|U|A|P|R|S|F|                               |
///   | Offset| Res.|S|W|C|R|C|S|S|Y|I|            Window             |
///   |       |     | |R|E|G|K|H|T|N|N|                               |
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///   |           Checksum            |         Urgent Pointer        |
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///   |                    Options                    |    Padding    |
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///   |                             data                              |
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Segments built by the state machine leave `checksum` at zero; it is
/// computed by [`TcpSegment::serialize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TcpSegment {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    /// Header length in 32-bit words.
    pub data_offset: u8,
    pub flags: Flags,
    pub window: u16,
    pub checksum: u16,
    pub urgent: u16,
    /// Raw option bytes, a multiple of four long.
    pub options: Vec<u8>,
    pub payload: Vec<u8>,
}

impl TcpSegment {
    /// Length of a TCP header without options.
    pub const MIN_HEADER_LEN: usize = 20;

    /// Data offset of a TCP header without options.
    pub const MIN_DATA_OFFSET: u8 = 5;

    /// Creates an option-less segment with no flags set.
    pub fn new(src_port: u16, dst_port: u16, seq: u32, window: u16) -> Self {
        Self {
            src_port,
            dst_port,
            seq,
            window,
            data_offset: Self::MIN_DATA_OFFSET,
            ..Default::default()
        }
    }

    /// Parses the payload of `ip` as a TCP segment and verifies its checksum
    /// against the IPv4 pseudo-header.
    pub fn parse(ip: &Ipv4Header<'_>) -> std::result::Result<Self, TcpParseError> {
        if ip.protocol != PROTOCOL_TCP {
            return Err(TcpParseError::WrongProtocol(ip.protocol));
        }

        let raw = ip.payload;
        if raw.len() < Self::MIN_HEADER_LEN {
            return Err(TcpParseError::Truncated {
                len: raw.len(),
                needed: Self::MIN_HEADER_LEN,
            });
        }
        let data_offset = raw[12] >> 4;
        if data_offset < Self::MIN_DATA_OFFSET {
            return Err(TcpParseError::InvalidDataOffset(data_offset));
        }
        let header_len = usize::from(data_offset) * 4;
        if raw.len() < header_len {
            return Err(TcpParseError::Truncated {
                len: raw.len(),
                needed: header_len,
            });
        }

        let tcp = TcpHeaderSlice::from_slice(raw).map_err(|_| TcpParseError::Truncated {
            len: raw.len(),
            needed: header_len,
        })?;
        let payload = &raw[header_len..];

        let mut flags = Flags::empty();
        flags.set(Flags::FIN, tcp.fin());
        flags.set(Flags::SYN, tcp.syn());
        flags.set(Flags::RST, tcp.rst());
        flags.set(Flags::PSH, tcp.psh());
        flags.set(Flags::ACK, tcp.ack());
        flags.set(Flags::URG, tcp.urg());
        flags.set(Flags::ECE, tcp.ece());
        flags.set(Flags::CWR, tcp.cwr());
        flags.set(Flags::NS, tcp.ns());

        let computed = tcp
            .to_header()
            .calc_checksum_ipv4_raw(ip.source.octets(), ip.destination.octets(), payload)
            .ok();
        if computed != Some(tcp.checksum()) {
            return Err(TcpParseError::BadChecksum {
                expected: computed.unwrap_or_default(),
                actual: tcp.checksum(),
            });
        }

        Ok(Self {
            src_port: tcp.source_port(),
            dst_port: tcp.destination_port(),
            seq: tcp.sequence_number(),
            ack: tcp.acknowledgment_number(),
            data_offset,
            flags,
            window: tcp.window_size(),
            checksum: tcp.checksum(),
            urgent: tcp.urgent_pointer(),
            options: tcp.options().to_vec(),
            payload: payload.to_vec(),
        })
    }

    /// Returns `true` if every bit of `flags` is set on the segment.
    pub fn has(&self, flags: Flags) -> bool {
        self.flags.contains(flags)
    }

    /// Header length in bytes, options included.
    pub fn header_len(&self) -> usize {
        Self::MIN_HEADER_LEN + self.options.len()
    }

    /// Sequence space occupied by the segment: one for each of SYN and FIN
    /// plus the payload length.
    pub fn seq_len(&self) -> u32 {
        let mut len = self.payload.len() as u32;
        if self.has(Flags::SYN) {
            len += 1;
        }
        if self.has(Flags::FIN) {
            len += 1;
        }
        len
    }

    /// Computes the checksum over the pseudo-header for `src` → `dst`, the
    /// header with a zeroed checksum field, and the payload.
    pub fn compute_checksum(&self, src: Ipv4Addr, dst: Ipv4Addr) -> Result<u16> {
        self.to_header()?
            .calc_checksum_ipv4_raw(src.octets(), dst.octets(), &self.payload)
            .map_err(|_| Error::Oversized(self.header_len() + self.payload.len()))
    }

    /// Writes the segment in network byte order with a freshly computed
    /// checksum. The data offset is derived from the options.
    pub fn serialize(&self, src: Ipv4Addr, dst: Ipv4Addr) -> Result<Vec<u8>> {
        let mut header = self.to_header()?;
        header.checksum = self.compute_checksum(src, dst)?;

        let mut buf = Vec::with_capacity(self.header_len() + self.payload.len());
        header.write(&mut buf)?;
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    fn to_header(&self) -> Result<TcpHeader> {
        let mut header = TcpHeader::new(self.src_port, self.dst_port, self.seq, self.window);
        header.acknowledgment_number = self.ack;
        header.ns = self.has(Flags::NS);
        header.cwr = self.has(Flags::CWR);
        header.ece = self.has(Flags::ECE);
        header.urg = self.has(Flags::URG);
        header.ack = self.has(Flags::ACK);
        header.psh = self.has(Flags::PSH);
        header.rst = self.has(Flags::RST);
        header.syn = self.has(Flags::SYN);
        header.fin = self.has(Flags::FIN);
        header.urgent_pointer = self.urgent;
        header
            .set_options_raw(&self.options)
            .map_err(|_| Error::Options(self.options.len()))?;
        Ok(header)
    }
}
