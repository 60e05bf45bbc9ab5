//! Sequence-space arithmetic and bookkeeping, RFC 793 Section 3.2/3.3.
//!
//! It is essential to remember that the actual sequence number space is
//! finite, though very large. This space ranges from 0 to 2**32 - 1.
//! Since the space is finite, all arithmetic dealing with sequence
//! numbers must be performed modulo 2**32. This unsigned arithmetic
//! preserves the relationship of sequence numbers as they cycle from
//! 2**32 - 1 to 0 again.

/// Half of the sequence space. Two numbers further apart than this have no
/// defined ordering.
const HALF: u32 = 1 << 31;

/// Returns `true` if `a` strictly precedes `b` in the modular ring, that is
/// `(b - a) mod 2**32` lies in `(0, 2**31)`.
pub fn lt(a: u32, b: u32) -> bool {
    let distance = b.wrapping_sub(a);
    distance != 0 && distance < HALF
}

/// Returns `true` if `a` precedes or equals `b`, that is `(b - a) mod 2**32`
/// lies in `[0, 2**31)`.
pub fn le(a: u32, b: u32) -> bool {
    b.wrapping_sub(a) < HALF
}

/// Returns `true` if `x` falls within `[start, start + length)` modulo
/// 2**32. A zero-length window only contains `start` itself.
pub fn in_window(x: u32, start: u32, length: u32) -> bool {
    if length == 0 {
        x == start
    } else {
        x.wrapping_sub(start) < length
    }
}

/// Send Sequence Space RFC 793 Section 3.2
///
/// ```text
///            1         2          3          4
///       ----------|----------|----------|----------
///              SND.UNA    SND.NXT    SND.UNA
///                                   +SND.WND
///
/// 1 - old sequence numbers which have been acknowledged
/// 2 - sequence numbers of unacknowledged data
/// 3 - sequence numbers allowed for new data transmission
/// 4 - future sequence numbers which are not yet allowed
/// ```
///
/// Fields:
/// - `iss`: Initial send sequence number.
/// - `una`: The oldest unacknowledged sequence number.
/// - `nxt`: The next sequence number to be sent.
/// - `wnd`: The window advertised by the peer.
/// - `up`: Indicates whether urgent data is present.
/// - `wl1`: Segment sequence number used for the last window update.
/// - `wl2`: Segment acknowledgment number used for the last window update.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SendSequenceSpace {
    pub iss: u32,
    pub una: u32,
    pub nxt: u32,
    pub wnd: u16,
    pub up: bool,
    pub wl1: u32,
    pub wl2: u32,
}

impl SendSequenceSpace {
    /// Number of sequence numbers sent but not yet acknowledged.
    pub fn in_flight(&self) -> u32 {
        self.nxt.wrapping_sub(self.una)
    }

    /// Takes `wnd` as the new send window if the segment carrying it is not
    /// older than the one that last updated the window:
    /// `SND.WL1 < SEG.SEQ or (SND.WL1 = SEG.SEQ and SND.WL2 =< SEG.ACK)`.
    ///
    /// Returns `true` if the window was updated.
    pub fn update_window(&mut self, seq: u32, ack: u32, wnd: u16) -> bool {
        if lt(self.wl1, seq) || (self.wl1 == seq && le(self.wl2, ack)) {
            self.wnd = wnd;
            self.wl1 = seq;
            self.wl2 = ack;
            true
        } else {
            false
        }
    }
}

/// Receive Sequence Space RFC 793 Section 3.2
///
/// ```text
///                1          2          3
///            ----------|----------|----------
///                   RCV.NXT    RCV.NXT
///                             +RCV.WND
///
/// 1 - old sequence numbers which have been acknowledged
/// 2 - sequence numbers allowed for new reception
/// 3 - future sequence numbers which are not yet allowed
/// ```
///
/// Fields:
/// - `irs`: Initial receive sequence number.
/// - `nxt`: The next expected sequence number to receive.
/// - `wnd`: The receive window.
/// - `up`: Indicates whether urgent data is present.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReceiveSequenceSpace {
    pub irs: u32,
    pub nxt: u32,
    pub wnd: u16,
    pub up: bool,
}

impl ReceiveSequenceSpace {
    /// Segment acceptability test, RFC 793 Section 3.3.
    ///
    /// ```text
    ///    Segment Receive  Test
    ///    Length  Window
    ///    ------- -------  -------------------------------------------
    ///       0       0     SEG.SEQ = RCV.NXT
    ///       0      >0     RCV.NXT =< SEG.SEQ < RCV.NXT+RCV.WND
    ///      >0       0     not acceptable
    ///      >0      >0     RCV.NXT =< SEG.SEQ < RCV.NXT+RCV.WND
    ///                 and RCV.NXT =< SEG.SEQ+SEG.LEN-1 < RCV.NXT+RCV.WND
    /// ```
    ///
    /// `len` counts payload octets plus one for each of SYN and FIN.
    pub fn accepts(&self, seq: u32, len: u32) -> bool {
        let wnd = u32::from(self.wnd);
        match (len, wnd) {
            (0, 0) => seq == self.nxt,
            (0, _) => in_window(seq, self.nxt, wnd),
            (_, 0) => false,
            (_, _) => {
                in_window(seq, self.nxt, wnd)
                    && in_window(seq.wrapping_add(len - 1), self.nxt, wnd)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_wraps() {
        assert!(lt(0xFFFF_FFFF, 0x0000_0001));
        assert!(lt(0xFFFF_FFF0, 0x0000_0010));
        assert!(!lt(0x0000_0001, 0xFFFF_FFFF));
        assert!(lt(1, 2));
        assert!(!lt(2, 1));
        assert!(!lt(7, 7));
        assert!(le(7, 7));
        assert!(le(0xFFFF_FFFF, 0));
        assert!(!le(1, 0));
    }

    #[test]
    fn ordering_is_undefined_at_half_distance() {
        assert!(!lt(0, HALF));
        assert!(lt(0, HALF - 1));
        assert!(!lt(HALF, 0));
        assert!(lt(HALF + 1, 0));
    }

    #[test]
    fn ordering_is_transitive_within_half_space() {
        let bases = [0u32, 1, 1000, HALF - 3, HALF, 0xFFFF_FF00, u32::MAX];
        let steps = [1u32, 7, 4096, 0x1000_0000, 0x3FFF_FFFF];
        for &a in &bases {
            for &s1 in &steps {
                for &s2 in &steps {
                    if u64::from(s1) + u64::from(s2) >= u64::from(HALF) {
                        continue;
                    }
                    let b = a.wrapping_add(s1);
                    let c = b.wrapping_add(s2);
                    assert!(lt(a, b) && lt(b, c), "{a:#x} {b:#x} {c:#x}");
                    assert!(lt(a, c), "{a:#x} {c:#x}");
                }
            }
        }
    }

    #[test]
    fn window_membership() {
        assert!(in_window(10, 10, 5));
        assert!(in_window(14, 10, 5));
        assert!(!in_window(15, 10, 5));
        assert!(!in_window(9, 10, 5));
        assert!(in_window(2, u32::MAX - 1, 5));
        assert!(!in_window(3, u32::MAX - 1, 5));
        assert!(in_window(10, 10, 0));
        assert!(!in_window(11, 10, 0));
    }

    #[test]
    fn acceptability_follows_rfc_table() {
        let recv = ReceiveSequenceSpace {
            irs: 1000,
            nxt: 1001,
            wnd: 100,
            up: false,
        };
        assert!(recv.accepts(1001, 0));
        assert!(recv.accepts(1100, 0));
        assert!(!recv.accepts(1101, 0));
        assert!(recv.accepts(1001, 100));
        assert!(!recv.accepts(1001, 101));
        assert!(!recv.accepts(1000, 10));
        assert!(!recv.accepts(5000, 1));

        let closed = ReceiveSequenceSpace { wnd: 0, ..recv };
        assert!(closed.accepts(1001, 0));
        assert!(!closed.accepts(1002, 0));
        assert!(!closed.accepts(1001, 1));
    }

    #[test]
    fn window_update_ignores_reordered_acks() {
        let mut send = SendSequenceSpace {
            wl1: 1001,
            wl2: 1,
            wnd: 100,
            ..Default::default()
        };
        assert!(send.update_window(1001, 5, 200));
        assert_eq!(send.wnd, 200);
        // older ACK number on the same segment sequence
        assert!(!send.update_window(1001, 3, 50));
        // older segment sequence
        assert!(!send.update_window(1000, 9, 50));
        assert_eq!(send.wnd, 200);
        assert!(send.update_window(1500, 5, 0));
        assert_eq!((send.wnd, send.wl1, send.wl2), (0, 1500, 5));
    }
}
