//! Captured frames and checksum helpers shared by the unit tests.

use std::net::Ipv4Addr;

pub const PEER: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 1);
pub const LOCAL: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 2);

/// A SYN from 192.168.0.1:54321 to 192.168.0.2:80 as read from a TUN device:
/// seq 1000, window 64240, options MSS 1460, SACK permitted, timestamps, NOP
/// and window scale 7.
pub const SYN_FRAME: [u8; 60] = [
    0x45, 0x00, 0x00, 0x3c, 0x1c, 0x46, 0x40, 0x00, //
    0x40, 0x06, 0x9d, 0x22, 0xc0, 0xa8, 0x00, 0x01, //
    0xc0, 0xa8, 0x00, 0x02, 0xd4, 0x31, 0x00, 0x50, //
    0x00, 0x00, 0x03, 0xe8, 0x00, 0x00, 0x00, 0x00, //
    0xa0, 0x02, 0xfa, 0xf0, 0xf3, 0x50, 0x00, 0x00, //
    0x02, 0x04, 0x05, 0xb4, 0x04, 0x02, 0x08, 0x0a, //
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, //
    0x01, 0x03, 0x03, 0x07,
];

/// Folded one's complement sum of `bytes`, padding an odd tail with zero.
pub fn ones_complement_sum(bytes: &[u8]) -> u16 {
    let mut sum: u32 = bytes
        .chunks(2)
        .map(|pair| u32::from(u16::from_be_bytes([pair[0], *pair.get(1).unwrap_or(&0)])))
        .sum();
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

/// Returns `true` if the checksum field of the serialized `segment` is valid
/// for a datagram from `src` to `dst`.
pub fn tcp_checksum_valid(src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) -> bool {
    let mut pseudo = Vec::with_capacity(12 + segment.len());
    pseudo.extend_from_slice(&src.octets());
    pseudo.extend_from_slice(&dst.octets());
    pseudo.extend_from_slice(&[0, 6]);
    pseudo.extend_from_slice(&(segment.len() as u16).to_be_bytes());
    pseudo.extend_from_slice(segment);
    ones_complement_sum(&pseudo) == 0xFFFF
}

#[test]
fn captured_syn_checksum_is_valid() {
    assert_eq!(ones_complement_sum(&SYN_FRAME[..20]), 0xFFFF);
    assert!(tcp_checksum_valid(PEER, LOCAL, &SYN_FRAME[20..]));
}
