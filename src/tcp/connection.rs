use std::collections::VecDeque;
use tracing::{debug, trace, warn};

use super::segment::{Flags, TcpSegment};
use super::sequence::{le, lt, ReceiveSequenceSpace, SendSequenceSpace};
use super::state::State;
use super::ConnectionKey;
use crate::error::{Error, Result};

/// Send window assumed until the peer's first acknowledgment carries one.
const INITIAL_SEND_WINDOW: u16 = 1024;

/// Timers a connection asks its host to schedule. Firing a timer after the
/// connection left the state that armed it does nothing.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum Timer {
    /// Resend the oldest unacknowledged segment.
    Retransmit,
    /// 2MSL quiet period of `TimeWait` is over.
    TimeWait,
}

/// Everything that drives a connection's state machine.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    Segment(&'a TcpSegment),
    /// The local user closes its sending side.
    Close,
    Timer(Timer),
}

/// Result of processing one event: at most one segment to emit and at most
/// one timer to (re)arm.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[must_use]
pub struct Outcome {
    pub segment: Option<TcpSegment>,
    pub timer: Option<Timer>,
}

impl Outcome {
    fn none() -> Self {
        Self::default()
    }

    fn reply(segment: TcpSegment) -> Self {
        Self {
            segment: Some(segment),
            timer: None,
        }
    }

    fn arm(mut self, timer: Timer) -> Self {
        self.timer = Some(timer);
        self
    }
}

/// Per-connection limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Largest payload put in one segment.
    pub mss: usize,
    /// Consecutive retransmissions before the connection is aborted.
    pub max_retransmits: u8,
    /// Bytes held for sending, queued and unacknowledged together.
    pub send_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mss: 1460,
            max_retransmits: 5,
            send_buffer: 64 * 1024,
        }
    }
}

/// One TCP endpoint: its state, both sequence spaces, the bytes received
/// but not yet read, the bytes written but not yet sent, and the bytes sent
/// but not yet acknowledged.
#[derive(Debug)]
pub struct Connection {
    key: ConnectionKey,
    state: State,
    send: SendSequenceSpace,
    receive: ReceiveSequenceSpace,
    settings: Settings,
    ingress: VecDeque<u8>,
    unsent: VecDeque<u8>,
    unacked: VecDeque<u8>,
    /// The local user closed; a FIN follows the queued data.
    closed: bool,
    /// Sequence number our FIN occupies, once sent.
    fin_seq: Option<u32>,
    retransmits: u8,
}

impl Connection {
    /// A passive-open endpoint waiting for a SYN. `iss` is the initial send
    /// sequence number used once the SYN arrives.
    pub fn listen(key: ConnectionKey, iss: u32, settings: Settings) -> Self {
        Self {
            key,
            state: State::Listen,
            send: SendSequenceSpace {
                iss,
                ..Default::default()
            },
            receive: ReceiveSequenceSpace::default(),
            settings,
            ingress: VecDeque::new(),
            unsent: VecDeque::new(),
            unacked: VecDeque::new(),
            closed: false,
            fin_seq: None,
            retransmits: 0,
        }
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn send_space(&self) -> &SendSequenceSpace {
        &self.send
    }

    pub fn receive_space(&self) -> &ReceiveSequenceSpace {
        &self.receive
    }

    /// Bytes sent and not yet acknowledged.
    pub fn unacked_len(&self) -> usize {
        self.unacked.len()
    }

    /// Bytes written and waiting for the peer's window.
    pub fn unsent_len(&self) -> usize {
        self.unsent.len()
    }

    /// Bytes received in order and not yet read.
    pub fn received_len(&self) -> usize {
        self.ingress.len()
    }

    /// Copies received bytes into `buf`, returning how many were copied.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let (head, tail) = self.ingress.as_slices();
        let hread = std::cmp::min(buf.len(), head.len());
        buf[..hread].copy_from_slice(&head[..hread]);
        let tread = std::cmp::min(buf.len() - hread, tail.len());
        buf[hread..hread + tread].copy_from_slice(&tail[..tread]);
        let nread = hread + tread;
        self.ingress.drain(..nread);
        nread
    }

    /// Drains every received byte.
    pub fn take_received(&mut self) -> Vec<u8> {
        self.ingress.drain(..).collect()
    }

    /// Feeds one event to the state machine.
    ///
    /// Only a local close can fail, when the connection is already closing.
    pub fn process(&mut self, event: Event<'_>) -> Result<Outcome> {
        let outcome = match event {
            Event::Segment(segment) => Ok(self.on_segment(segment)),
            Event::Close => self.close(),
            Event::Timer(timer) => Ok(self.on_timer(timer)),
        };
        debug_assert!(
            le(self.send.una, self.send.nxt),
            "SND.UNA {} ahead of SND.NXT {}",
            self.send.una,
            self.send.nxt
        );
        outcome
    }

    /// Queues as much of `data` as the send buffer holds and emits the first
    /// segment the peer's window allows. Returns the number of bytes taken;
    /// a short count means the buffer is full and the rest must be offered
    /// again later.
    pub fn write(&mut self, data: &[u8]) -> Result<(usize, Outcome)> {
        if !matches!(self.state, State::Established | State::CloseWait) {
            return Err(Error::NotConnected(self.state));
        }

        let buffered = self.unsent.len() + self.unacked.len();
        let len = data.len().min(self.settings.send_buffer.saturating_sub(buffered));
        self.unsent.extend(&data[..len]);

        let mut outcome = Outcome::none();
        self.send_queued(&mut outcome);
        Ok((len, outcome))
    }

    /// Emits the next segment of queued data, or the pending FIN, if the
    /// peer's window allows one.
    pub fn flush(&mut self) -> Outcome {
        let mut outcome = Outcome::none();
        self.send_queued(&mut outcome);
        outcome
    }

    fn transition(&mut self, to: State) {
        debug!(key = %self.key, from = ?self.state, to = ?to, "state transition");
        self.state = to;
    }

    fn on_segment(&mut self, seg: &TcpSegment) -> Outcome {
        trace!(
            key = %self.key,
            state = ?self.state,
            flags = ?seg.flags,
            seq = seg.seq,
            ack = seg.ack,
            len = seg.payload.len(),
            "segment"
        );

        match self.state {
            // no active open: nothing can arrive for a SYN we never sent
            State::Closed | State::SynSent => Outcome::none(),
            State::Listen => self.on_listen(seg),
            State::SynReceived
            | State::Established
            | State::FinWait1
            | State::FinWait2
            | State::CloseWait
            | State::Closing
            | State::LastAck
            | State::TimeWait => self.on_synchronized(seg),
        }
    }

    fn on_listen(&mut self, seg: &TcpSegment) -> Outcome {
        // Anything but a bare SYN is dropped. A strict implementation would
        // answer an ACK with a RST.
        if !seg.has(Flags::SYN) || seg.has(Flags::ACK) || seg.has(Flags::RST) {
            return Outcome::none();
        }

        // keep track of sender's state
        self.receive = ReceiveSequenceSpace {
            irs: seg.seq,
            nxt: seg.seq.wrapping_add(1),
            wnd: seg.window,
            up: seg.has(Flags::URG),
        };

        // keep track of our state
        let iss = self.send.iss;
        self.send = SendSequenceSpace {
            iss,
            una: iss,
            nxt: iss.wrapping_add(1),
            wnd: INITIAL_SEND_WINDOW,
            up: false,
            wl1: seg.seq,
            wl2: iss,
        };

        self.transition(State::SynReceived);
        Outcome::reply(self.syn_ack()).arm(Timer::Retransmit)
    }

    fn on_synchronized(&mut self, seg: &TcpSegment) -> Outcome {
        // The peer did not see our SYN+ACK and sent its SYN again.
        if self.state == State::SynReceived && seg.has(Flags::SYN) && seg.seq == self.receive.irs {
            return Outcome::reply(self.syn_ack());
        }

        if !self.receive.accepts(seg.seq, seg.seq_len()) {
            if seg.has(Flags::RST) {
                return Outcome::none();
            }
            trace!(
                key = %self.key,
                seq = seg.seq,
                rcv_nxt = self.receive.nxt,
                "unacceptable segment"
            );
            let outcome = Outcome::reply(self.ack());
            // a retransmitted FIN restarts the quiet period
            if self.state == State::TimeWait && seg.has(Flags::FIN) {
                return outcome.arm(Timer::TimeWait);
            }
            return outcome;
        }

        if seg.has(Flags::RST) {
            debug!(key = %self.key, "connection reset by peer");
            self.transition(State::Closed);
            return Outcome::none();
        }

        if seg.has(Flags::SYN) {
            // challenge ACK (RFC 5961 Section 4.2), the segment is dropped
            return Outcome::reply(self.ack());
        }

        if !seg.has(Flags::ACK) {
            return Outcome::none();
        }

        // Only in-sequence segments are taken; the duplicate ACK tells the
        // peer where we are.
        if seg.seq_len() > 0 && seg.seq != self.receive.nxt {
            return Outcome::reply(self.ack());
        }

        let mut outcome = Outcome::none();
        if self.state == State::SynReceived {
            if seg.ack != self.send.nxt {
                // <SEQ=SEG.ACK><CTL=RST>
                return Outcome::reply(self.reset(seg.ack));
            }
            if seg.seq != self.receive.nxt {
                return Outcome::reply(self.ack());
            }
            self.send.una = seg.ack;
            self.send.wnd = seg.window;
            self.send.wl1 = seg.seq;
            self.send.wl2 = seg.ack;
            self.retransmits = 0;
            self.transition(State::Established);
        } else {
            if lt(self.send.nxt, seg.ack) {
                // acknowledges something not yet sent
                return Outcome::reply(self.ack());
            }
            if lt(self.send.una, seg.ack) {
                self.acknowledge(seg.ack);
                if self.send.in_flight() > 0 {
                    outcome.timer = Some(Timer::Retransmit);
                }
            }
            if le(self.send.una, seg.ack) {
                self.send.update_window(seg.seq, seg.ack, seg.window);
            }

            if self.fin_acked() {
                match self.state {
                    State::FinWait1 => self.transition(State::FinWait2),
                    State::Closing => {
                        self.transition(State::TimeWait);
                        outcome.timer = Some(Timer::TimeWait);
                    }
                    State::LastAck => {
                        self.transition(State::Closed);
                        return Outcome::none();
                    }
                    _ => {}
                }
            }
        }

        let mut ack_now = false;
        if !seg.payload.is_empty() {
            match self.state {
                State::Established | State::FinWait1 | State::FinWait2 => {
                    self.ingress.extend(&seg.payload);
                    self.receive.nxt = self.receive.nxt.wrapping_add(seg.payload.len() as u32);
                    ack_now = true;
                }
                _ => trace!(key = %self.key, "data after FIN ignored"),
            }
        }

        if seg.has(Flags::FIN) {
            match self.state {
                State::SynReceived | State::Established => {
                    self.receive.nxt = self.receive.nxt.wrapping_add(1);
                    self.transition(State::CloseWait);
                }
                State::FinWait1 => {
                    self.receive.nxt = self.receive.nxt.wrapping_add(1);
                    self.transition(State::Closing);
                }
                State::FinWait2 => {
                    self.receive.nxt = self.receive.nxt.wrapping_add(1);
                    self.transition(State::TimeWait);
                    outcome.timer = Some(Timer::TimeWait);
                }
                State::TimeWait => outcome.timer = Some(Timer::TimeWait),
                State::CloseWait
                | State::Closing
                | State::LastAck
                | State::Closed
                | State::Listen
                | State::SynSent => {}
            }
            ack_now = true;
        }

        // queued data carries the acknowledgment when the window allows it
        if !self.send_queued(&mut outcome) && ack_now {
            outcome.segment = Some(self.ack());
        }
        outcome
    }

    fn close(&mut self) -> Result<Outcome> {
        match self.state {
            State::Listen | State::SynSent => {
                self.transition(State::Closed);
                Ok(Outcome::none())
            }
            State::SynReceived | State::Established => {
                self.closed = true;
                self.transition(State::FinWait1);
                Ok(self.flush())
            }
            State::CloseWait => {
                self.closed = true;
                self.transition(State::LastAck);
                Ok(self.flush())
            }
            State::FinWait1
            | State::FinWait2
            | State::Closing
            | State::LastAck
            | State::TimeWait => Err(Error::Closing(self.state)),
            State::Closed => Err(Error::NotConnected(self.state)),
        }
    }

    fn on_timer(&mut self, timer: Timer) -> Outcome {
        match timer {
            Timer::TimeWait => {
                if self.state == State::TimeWait {
                    self.transition(State::Closed);
                }
                Outcome::none()
            }
            Timer::Retransmit => self.retransmit(),
        }
    }

    fn retransmit(&mut self) -> Outcome {
        let segment = match self.state {
            State::SynReceived => self.syn_ack(),
            State::Established
            | State::FinWait1
            | State::CloseWait
            | State::Closing
            | State::LastAck
                if self.send.in_flight() > 0 =>
            {
                if self.send.una == self.send.iss {
                    // closed before the handshake completed, SYN still unacked
                    self.syn_ack()
                } else {
                    self.oldest_unacked()
                }
            }
            _ => return Outcome::none(),
        };

        if self.retransmits >= self.settings.max_retransmits {
            warn!(key = %self.key, retransmits = self.retransmits, "peer unresponsive, aborting");
            let rst = self.reset(self.send.nxt);
            self.transition(State::Closed);
            return Outcome::reply(rst);
        }
        self.retransmits += 1;
        debug!(key = %self.key, seq = segment.seq, attempt = self.retransmits, "retransmit");
        Outcome::reply(segment).arm(Timer::Retransmit)
    }

    /// Drops the acknowledged bytes from the retransmission queue.
    fn acknowledge(&mut self, ack: u32) {
        let acked = ack.wrapping_sub(self.send.una) as usize;
        let drained = acked.min(self.unacked.len());
        self.unacked.drain(..drained);
        self.send.una = ack;
        self.retransmits = 0;
    }

    fn fin_acked(&self) -> bool {
        self.fin_seq.is_some_and(|fin| lt(fin, self.send.una))
    }

    fn segment(&self, flags: Flags, seq: u32, payload: Vec<u8>) -> TcpSegment {
        // flip source and destination in the response
        let mut segment = TcpSegment::new(self.key.dst.1, self.key.src.1, seq, self.receive.wnd);
        segment.flags = flags;
        if flags.contains(Flags::ACK) {
            segment.ack = self.receive.nxt;
        }
        segment.payload = payload;
        segment
    }

    /// <SEQ=SND.NXT><ACK=RCV.NXT><CTL=ACK>
    fn ack(&self) -> TcpSegment {
        self.segment(Flags::ACK, self.send.nxt, Vec::new())
    }

    fn syn_ack(&self) -> TcpSegment {
        self.segment(Flags::SYN | Flags::ACK, self.send.iss, Vec::new())
    }

    fn reset(&self, seq: u32) -> TcpSegment {
        self.segment(Flags::RST, seq, Vec::new())
    }

    /// Moves the next segment's worth of queued data into the retransmission
    /// queue and puts it in `outcome`, with the FIN once nothing is left to
    /// send. The retransmit timer is started only if nothing was in flight.
    /// Returns `false` if there was nothing to send.
    fn send_queued(&mut self, outcome: &mut Outcome) -> bool {
        if !matches!(
            self.state,
            State::Established
                | State::CloseWait
                | State::FinWait1
                | State::Closing
                | State::LastAck
        ) {
            return false;
        }

        let room = usize::from(self.send.wnd).saturating_sub(self.send.in_flight() as usize);
        let len = self.unsent.len().min(room).min(self.settings.mss);
        let fin = self.closed && self.fin_seq.is_none() && len == self.unsent.len();
        if len == 0 && !fin {
            return false;
        }

        let idle = self.send.in_flight() == 0;
        let payload: Vec<u8> = self.unsent.drain(..len).collect();
        self.unacked.extend(&payload);

        let mut flags = Flags::ACK;
        if len > 0 {
            flags |= Flags::PSH;
        }
        if fin {
            flags |= Flags::FIN;
        }
        let seq = self.send.nxt;
        outcome.segment = Some(self.segment(flags, seq, payload));
        self.send.nxt = seq.wrapping_add(len as u32);
        if fin {
            self.fin_seq = Some(self.send.nxt);
            self.send.nxt = self.send.nxt.wrapping_add(1);
        }
        if idle {
            outcome.timer = Some(Timer::Retransmit);
        }
        true
    }

    /// The oldest outstanding data, with the FIN riding along once all of it
    /// fits in one segment.
    fn oldest_unacked(&self) -> TcpSegment {
        let len = self.unacked.len().min(self.settings.mss);
        let payload: Vec<u8> = self.unacked.iter().take(len).copied().collect();
        let mut flags = Flags::ACK;
        if !payload.is_empty() {
            flags |= Flags::PSH;
        }
        if self.fin_seq.is_some() && len == self.unacked.len() {
            flags |= Flags::FIN;
        }
        self.segment(flags, self.send.una, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{LOCAL, PEER};

    fn key() -> ConnectionKey {
        ConnectionKey::new((PEER, 54321), (LOCAL, 80))
    }

    fn inbound(flags: Flags, seq: u32, ack: u32, payload: &[u8]) -> TcpSegment {
        let mut seg = TcpSegment::new(54321, 80, seq, 64240);
        seg.flags = flags;
        seg.ack = ack;
        seg.payload = payload.to_vec();
        seg
    }

    fn feed(conn: &mut Connection, seg: TcpSegment) -> Outcome {
        conn.process(Event::Segment(&seg)).unwrap()
    }

    fn listening() -> Connection {
        Connection::listen(key(), 0, Settings::default())
    }

    fn established() -> Connection {
        let mut conn = listening();
        let _ = feed(&mut conn, inbound(Flags::SYN, 1000, 0, &[]));
        let _ = feed(&mut conn, inbound(Flags::ACK, 1001, 1, &[]));
        assert_eq!(conn.state(), State::Established);
        conn
    }

    fn emitted(outcome: &Outcome) -> &TcpSegment {
        outcome.segment.as_ref().expect("no segment emitted")
    }

    #[test]
    fn syn_starts_handshake() {
        let mut conn = listening();
        let outcome = feed(&mut conn, inbound(Flags::SYN, 1000, 0, &[]));

        assert_eq!(conn.state(), State::SynReceived);
        assert_eq!(conn.receive_space().irs, 1000);
        assert_eq!(conn.receive_space().nxt, 1001);
        assert_eq!(conn.receive_space().wnd, 64240);
        assert_eq!(conn.send_space().iss, 0);
        assert_eq!(conn.send_space().una, 0);
        assert_eq!(conn.send_space().nxt, 1);

        let syn_ack = emitted(&outcome);
        assert_eq!(syn_ack.flags, Flags::SYN | Flags::ACK);
        assert_eq!((syn_ack.seq, syn_ack.ack), (0, 1001));
        assert_eq!((syn_ack.src_port, syn_ack.dst_port), (80, 54321));
        assert_eq!(outcome.timer, Some(Timer::Retransmit));
    }

    #[test]
    fn listen_drops_everything_but_syn() {
        let mut conn = listening();
        for flags in [Flags::ACK, Flags::RST, Flags::SYN | Flags::ACK, Flags::FIN] {
            let outcome = feed(&mut conn, inbound(flags, 1000, 0, &[]));
            assert_eq!(outcome, Outcome::none());
            assert_eq!(conn.state(), State::Listen);
        }
    }

    #[test]
    fn ack_completes_handshake() {
        let mut conn = listening();
        let _ = feed(&mut conn, inbound(Flags::SYN, 1000, 0, &[]));
        let outcome = feed(&mut conn, inbound(Flags::ACK, 1001, 1, &[]));

        assert_eq!(conn.state(), State::Established);
        assert_eq!(outcome.segment, None);
        assert_eq!(conn.send_space().una, 1);
        assert_eq!(conn.send_space().wnd, 64240);
        assert_eq!((conn.send_space().wl1, conn.send_space().wl2), (1001, 1));
    }

    #[test]
    fn duplicate_syn_repeats_syn_ack() {
        let mut conn = listening();
        let first = feed(&mut conn, inbound(Flags::SYN, 1000, 0, &[]));
        let again = feed(&mut conn, inbound(Flags::SYN, 1000, 0, &[]));

        assert_eq!(conn.state(), State::SynReceived);
        assert_eq!(first.segment, again.segment);
        assert_eq!(conn.send_space().nxt, 1);
    }

    #[test]
    fn bad_handshake_ack_is_reset() {
        let mut conn = listening();
        let _ = feed(&mut conn, inbound(Flags::SYN, 1000, 0, &[]));
        let outcome = feed(&mut conn, inbound(Flags::ACK, 1001, 77, &[]));

        let rst = emitted(&outcome);
        assert_eq!(rst.flags, Flags::RST);
        assert_eq!(rst.seq, 77);
        assert_eq!(conn.state(), State::SynReceived);
    }

    #[test]
    fn reset_in_syn_received_closes() {
        let mut conn = listening();
        let _ = feed(&mut conn, inbound(Flags::SYN, 1000, 0, &[]));
        let outcome = feed(&mut conn, inbound(Flags::RST, 1001, 0, &[]));

        assert_eq!(outcome.segment, None);
        assert_eq!(conn.state(), State::Closed);
    }

    #[test]
    fn delivers_in_order_data() {
        let mut conn = established();
        let outcome = feed(&mut conn, inbound(Flags::PSH | Flags::ACK, 1001, 1, b"hello"));

        let ack = emitted(&outcome);
        assert_eq!(ack.flags, Flags::ACK);
        assert_eq!((ack.seq, ack.ack), (1, 1006));
        assert_eq!(conn.receive_space().nxt, 1006);

        let mut buf = [0u8; 3];
        assert_eq!(conn.read(&mut buf), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(conn.take_received(), b"lo".to_vec());
        assert_eq!(conn.received_len(), 0);
    }

    #[test]
    fn drops_out_of_order_data_with_duplicate_ack() {
        let mut conn = established();
        let outcome = feed(&mut conn, inbound(Flags::ACK, 5000, 1, b"later"));

        assert_eq!(conn.state(), State::Established);
        assert_eq!(emitted(&outcome).ack, 1001);
        assert_eq!(conn.receive_space().nxt, 1001);
        assert_eq!(conn.received_len(), 0);
    }

    #[test]
    fn drops_out_of_window_segments() {
        let mut conn = established();
        let outcome = feed(&mut conn, inbound(Flags::ACK, 1001 + 64240, 1, b"x"));
        assert_eq!(emitted(&outcome).ack, 1001);

        // old duplicate
        let outcome = feed(&mut conn, inbound(Flags::ACK, 900, 1, b"old"));
        assert_eq!(emitted(&outcome).ack, 1001);
        assert_eq!(conn.receive_space().nxt, 1001);
    }

    #[test]
    fn reset_obeys_window() {
        let mut conn = established();
        let outcome = feed(&mut conn, inbound(Flags::RST, 90_000, 0, &[]));
        assert_eq!(outcome, Outcome::none());
        assert_eq!(conn.state(), State::Established);

        let outcome = feed(&mut conn, inbound(Flags::RST, 1001, 0, &[]));
        assert_eq!(outcome, Outcome::none());
        assert_eq!(conn.state(), State::Closed);
    }

    #[test]
    fn in_window_syn_gets_challenge_ack() {
        let mut conn = established();
        let outcome = feed(&mut conn, inbound(Flags::SYN, 1001, 0, &[]));
        assert_eq!(emitted(&outcome).flags, Flags::ACK);
        assert_eq!(conn.state(), State::Established);
    }

    #[test]
    fn simultaneous_close_passes_through_closing() {
        let mut conn = established();

        let outcome = conn.process(Event::Close).unwrap();
        assert_eq!(conn.state(), State::FinWait1);
        let fin = emitted(&outcome);
        assert!(fin.has(Flags::FIN));
        assert_eq!(fin.seq, 1);
        assert_eq!(conn.send_space().nxt, 2);

        let outcome = feed(&mut conn, inbound(Flags::FIN | Flags::ACK, 1001, 1, &[]));
        assert_eq!(conn.state(), State::Closing);
        assert_eq!(emitted(&outcome).ack, 1002);

        let outcome = feed(&mut conn, inbound(Flags::ACK, 1002, 2, &[]));
        assert_eq!(conn.state(), State::TimeWait);
        assert_eq!(outcome.timer, Some(Timer::TimeWait));

        let outcome = conn.process(Event::Timer(Timer::TimeWait)).unwrap();
        assert_eq!(outcome, Outcome::none());
        assert_eq!(conn.state(), State::Closed);
    }

    #[test]
    fn active_close_through_fin_wait_2() {
        let mut conn = established();
        let _ = conn.process(Event::Close).unwrap();

        let outcome = feed(&mut conn, inbound(Flags::ACK, 1001, 2, &[]));
        assert_eq!(conn.state(), State::FinWait2);
        assert_eq!(outcome.segment, None);

        let outcome = feed(&mut conn, inbound(Flags::FIN | Flags::ACK, 1001, 2, &[]));
        assert_eq!(conn.state(), State::TimeWait);
        assert_eq!(emitted(&outcome).ack, 1002);
        assert_eq!(outcome.timer, Some(Timer::TimeWait));
    }

    #[test]
    fn fin_acking_our_fin_skips_closing() {
        let mut conn = established();
        let _ = conn.process(Event::Close).unwrap();

        let outcome = feed(&mut conn, inbound(Flags::FIN | Flags::ACK, 1001, 2, &[]));
        assert_eq!(conn.state(), State::TimeWait);
        assert_eq!(emitted(&outcome).ack, 1002);
    }

    #[test]
    fn time_wait_acks_retransmitted_fin() {
        let mut conn = established();
        let _ = conn.process(Event::Close).unwrap();
        let _ = feed(&mut conn, inbound(Flags::FIN | Flags::ACK, 1001, 2, &[]));

        let outcome = feed(&mut conn, inbound(Flags::FIN | Flags::ACK, 1001, 2, &[]));
        assert_eq!(conn.state(), State::TimeWait);
        assert_eq!(emitted(&outcome).ack, 1002);
        assert_eq!(outcome.timer, Some(Timer::TimeWait));
    }

    #[test]
    fn passive_close_through_last_ack() {
        let mut conn = established();

        let outcome = feed(&mut conn, inbound(Flags::FIN | Flags::ACK, 1001, 1, &[]));
        assert_eq!(conn.state(), State::CloseWait);
        assert_eq!(emitted(&outcome).ack, 1002);
        assert!(conn.state().is_recv_closed());

        let outcome = conn.process(Event::Close).unwrap();
        assert_eq!(conn.state(), State::LastAck);
        assert_eq!(emitted(&outcome).flags, Flags::FIN | Flags::ACK);

        let outcome = feed(&mut conn, inbound(Flags::ACK, 1002, 2, &[]));
        assert_eq!(outcome, Outcome::none());
        assert_eq!(conn.state(), State::Closed);
    }

    #[test]
    fn fin_with_data_delivers_then_closes() {
        let mut conn = established();
        let outcome = feed(&mut conn, inbound(Flags::FIN | Flags::ACK, 1001, 1, b"bye"));

        assert_eq!(conn.state(), State::CloseWait);
        assert_eq!(emitted(&outcome).ack, 1005);
        assert_eq!(conn.take_received(), b"bye".to_vec());
    }

    #[test]
    fn close_twice_is_refused() {
        let mut conn = established();
        let _ = conn.process(Event::Close).unwrap();
        assert!(matches!(
            conn.process(Event::Close),
            Err(Error::Closing(State::FinWait1))
        ));
    }

    #[test]
    fn close_while_listening_deletes() {
        let mut conn = listening();
        let outcome = conn.process(Event::Close).unwrap();
        assert_eq!(outcome, Outcome::none());
        assert_eq!(conn.state(), State::Closed);
    }

    #[test]
    fn writes_and_drains_on_ack() {
        let mut conn = established();
        let (n, outcome) = conn.write(b"abc").unwrap();

        assert_eq!(n, 3);
        let seg = emitted(&outcome);
        assert_eq!(seg.flags, Flags::PSH | Flags::ACK);
        assert_eq!((seg.seq, seg.ack), (1, 1001));
        assert_eq!(seg.payload, b"abc".to_vec());
        assert_eq!(outcome.timer, Some(Timer::Retransmit));
        assert_eq!(conn.send_space().nxt, 4);
        assert_eq!(conn.unacked_len(), 3);

        let outcome = feed(&mut conn, inbound(Flags::ACK, 1001, 2, &[]));
        assert_eq!(conn.unacked_len(), 2);
        assert_eq!(outcome.timer, Some(Timer::Retransmit));

        let outcome = feed(&mut conn, inbound(Flags::ACK, 1001, 4, &[]));
        assert_eq!(conn.unacked_len(), 0);
        assert_eq!(outcome, Outcome::none());
    }

    fn established_with_window(window: u16) -> Connection {
        let mut conn = listening();
        let _ = feed(&mut conn, inbound(Flags::SYN, 1000, 0, &[]));
        let mut ack = inbound(Flags::ACK, 1001, 1, &[]);
        ack.window = window;
        let _ = feed(&mut conn, ack);
        conn
    }

    #[test]
    fn queued_data_is_sent_when_window_opens() {
        let mut conn = established_with_window(100);

        let (n, outcome) = conn.write(&[7u8; 300]).unwrap();
        assert_eq!(n, 300);
        assert_eq!(emitted(&outcome).payload.len(), 100);
        assert_eq!(conn.unsent_len(), 200);
        assert_eq!(conn.flush(), Outcome::none());

        let mut update = inbound(Flags::ACK, 1001, 101, &[]);
        update.window = 64000;
        let outcome = feed(&mut conn, update);
        let seg = emitted(&outcome);
        assert_eq!(seg.flags, Flags::PSH | Flags::ACK);
        assert_eq!((seg.seq, seg.ack), (101, 1001));
        assert_eq!(seg.payload, vec![7u8; 200]);
        assert_eq!(outcome.timer, Some(Timer::Retransmit));
        assert_eq!(conn.unsent_len(), 0);
        assert_eq!(conn.send_space().nxt, 301);
    }

    #[test]
    fn flush_sends_one_segment_per_call() {
        let settings = Settings {
            mss: 2,
            ..Settings::default()
        };
        let mut conn = Connection::listen(key(), 0, settings);
        let _ = feed(&mut conn, inbound(Flags::SYN, 1000, 0, &[]));
        let _ = feed(&mut conn, inbound(Flags::ACK, 1001, 1, &[]));

        let (n, outcome) = conn.write(b"abcde").unwrap();
        assert_eq!(n, 5);
        assert_eq!(emitted(&outcome).payload, b"ab".to_vec());
        assert_eq!(emitted(&conn.flush()).payload, b"cd".to_vec());
        assert_eq!(emitted(&conn.flush()).payload, b"e".to_vec());
        assert_eq!(conn.flush(), Outcome::none());
        assert_eq!(conn.unacked_len(), 5);
    }

    #[test]
    fn write_is_bounded_by_send_buffer() {
        let settings = Settings {
            send_buffer: 4,
            ..Settings::default()
        };
        let mut conn = Connection::listen(key(), 0, settings);
        let _ = feed(&mut conn, inbound(Flags::SYN, 1000, 0, &[]));
        let _ = feed(&mut conn, inbound(Flags::ACK, 1001, 1, &[]));

        let (n, _) = conn.write(b"abcdef").unwrap();
        assert_eq!(n, 4);
        let (n, outcome) = conn.write(b"ef").unwrap();
        assert_eq!(n, 0);
        assert_eq!(outcome, Outcome::none());

        let _ = feed(&mut conn, inbound(Flags::ACK, 1001, 5, &[]));
        let (n, outcome) = conn.write(b"ef").unwrap();
        assert_eq!(n, 2);
        assert_eq!(emitted(&outcome).seq, 5);
    }

    #[test]
    fn retransmit_timer_starts_only_when_idle() {
        let mut conn = established();

        let (_, first) = conn.write(b"abc").unwrap();
        let (_, second) = conn.write(b"def").unwrap();
        assert_eq!(first.timer, Some(Timer::Retransmit));
        assert_eq!(second.timer, None);
        assert_eq!(emitted(&second).seq, 4);

        // a partial ACK restarts it
        let outcome = feed(&mut conn, inbound(Flags::ACK, 1001, 4, &[]));
        assert_eq!(outcome.timer, Some(Timer::Retransmit));
    }

    #[test]
    fn fin_follows_queued_data() {
        let mut conn = established_with_window(4);
        let _ = conn.write(b"abcdef").unwrap();

        let outcome = conn.process(Event::Close).unwrap();
        assert_eq!(conn.state(), State::FinWait1);
        assert_eq!(outcome, Outcome::none());
        assert!(matches!(
            conn.write(b"x"),
            Err(Error::NotConnected(State::FinWait1))
        ));

        let mut ack = inbound(Flags::ACK, 1001, 5, &[]);
        ack.window = 4;
        let outcome = feed(&mut conn, ack);
        let seg = emitted(&outcome);
        assert_eq!(seg.flags, Flags::PSH | Flags::ACK | Flags::FIN);
        assert_eq!(seg.seq, 5);
        assert_eq!(seg.payload, b"ef".to_vec());
        assert_eq!(conn.send_space().nxt, 8);

        let _ = feed(&mut conn, inbound(Flags::ACK, 1001, 8, &[]));
        assert_eq!(conn.state(), State::FinWait2);
    }

    #[test]
    fn write_needs_open_connection() {
        let mut conn = listening();
        assert!(matches!(
            conn.write(b"x"),
            Err(Error::NotConnected(State::Listen))
        ));
    }

    #[test]
    fn stale_acks_do_not_shrink_window() {
        let mut conn = established();
        let _ = conn.write(b"abc").unwrap();

        let mut update = inbound(Flags::ACK, 1001, 4, &[]);
        update.window = 500;
        let _ = feed(&mut conn, update);
        assert_eq!(conn.send_space().wnd, 500);

        let mut reordered = inbound(Flags::ACK, 1001, 2, &[]);
        reordered.window = 50;
        let _ = feed(&mut conn, reordered);
        assert_eq!(conn.send_space().wnd, 500);
        assert_eq!(conn.send_space().wl2, 4);
    }

    #[test]
    fn ack_of_unsent_data_is_answered() {
        let mut conn = established();
        let outcome = feed(&mut conn, inbound(Flags::ACK, 1001, 40, &[]));
        assert_eq!(emitted(&outcome).seq, 1);
        assert_eq!(conn.send_space().una, 1);
    }

    #[test]
    fn retransmits_oldest_data() {
        let mut conn = established();
        let _ = conn.write(b"abc").unwrap();

        let outcome = conn.process(Event::Timer(Timer::Retransmit)).unwrap();
        let seg = emitted(&outcome);
        assert_eq!(seg.seq, 1);
        assert_eq!(seg.payload, b"abc".to_vec());
        assert_eq!(outcome.timer, Some(Timer::Retransmit));
    }

    #[test]
    fn retransmits_syn_ack_and_fin() {
        let mut conn = listening();
        let first = feed(&mut conn, inbound(Flags::SYN, 1000, 0, &[]));
        let again = conn.process(Event::Timer(Timer::Retransmit)).unwrap();
        assert_eq!(first.segment, again.segment);

        let mut conn = established();
        let _ = conn.process(Event::Close).unwrap();
        let outcome = conn.process(Event::Timer(Timer::Retransmit)).unwrap();
        let fin = emitted(&outcome);
        assert_eq!(fin.flags, Flags::FIN | Flags::ACK);
        assert_eq!(fin.seq, 1);
    }

    #[test]
    fn aborts_after_retransmit_limit() {
        let settings = Settings {
            max_retransmits: 2,
            ..Settings::default()
        };
        let mut conn = Connection::listen(key(), 0, settings);
        let _ = feed(&mut conn, inbound(Flags::SYN, 1000, 0, &[]));

        for _ in 0..2 {
            let outcome = conn.process(Event::Timer(Timer::Retransmit)).unwrap();
            assert!(emitted(&outcome).has(Flags::SYN));
        }
        let outcome = conn.process(Event::Timer(Timer::Retransmit)).unwrap();
        assert_eq!(emitted(&outcome).flags, Flags::RST);
        assert_eq!(conn.state(), State::Closed);
    }

    #[test]
    fn stale_timers_are_ignored() {
        let mut conn = established();
        let outcome = conn.process(Event::Timer(Timer::Retransmit)).unwrap();
        assert_eq!(outcome, Outcome::none());
        let outcome = conn.process(Event::Timer(Timer::TimeWait)).unwrap();
        assert_eq!(outcome, Outcome::none());
        assert_eq!(conn.state(), State::Established);
    }

    #[test]
    fn handshake_survives_sequence_wrap() {
        let mut conn = Connection::listen(key(), u32::MAX, Settings::default());
        let outcome = feed(&mut conn, inbound(Flags::SYN, u32::MAX, 0, &[]));
        assert_eq!(emitted(&outcome).ack, 0);
        assert_eq!(conn.send_space().nxt, 0);

        let _ = feed(&mut conn, inbound(Flags::ACK, 0, 0, &[]));
        assert_eq!(conn.state(), State::Established);

        let outcome = feed(&mut conn, inbound(Flags::ACK, 0, 0, b"wrap"));
        assert_eq!(emitted(&outcome).ack, 4);
    }
}
