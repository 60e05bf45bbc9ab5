//! A minimal user-space TCP/IP stack.
//!
//! Raw IPv4 frames are read from a TUN interface, parsed, and handed to
//! per-connection RFC 793 state machines that accept passive opens, transfer
//! data and close. Everything runs on one thread: a frame is fully processed
//! and its replies written before the next one is read.

use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

pub mod config;
pub mod dispatch;
pub mod error;
pub mod ipv4;
pub mod nic;
pub mod tcp;
pub mod timer;

#[cfg(test)]
mod fixtures;

pub use config::Config;
pub use dispatch::{ConnectionTable, OutboundSegment};
pub use error::{Error, NotIpv4, Result, TcpParseError};
pub use nic::Nic;
pub use tcp::{
    connection::{Connection, Event, Outcome, Settings, Timer},
    segment::{Flags, TcpSegment},
    state::State,
    ConnectionKey,
};

use ipv4::Ipv4Header;
use timer::TimerQueue;

/// Largest frame read from the interface.
const BUFFER_SIZE: usize = 1504;

/// Application side of the stack.
pub trait Handler {
    /// Called with the bytes received on a connection. The returned bytes
    /// are written back on the same connection.
    fn on_receive(&mut self, key: &ConnectionKey, data: &[u8]) -> Vec<u8> {
        let _ = (key, data);
        Vec::new()
    }

    /// Called when the peer has closed its sending side. Returning `true`
    /// closes ours.
    fn on_peer_close(&mut self, key: &ConnectionKey) -> bool {
        let _ = key;
        true
    }
}

/// The packet loop over a network interface.
pub struct Interface<N: Nic = tun_tap::Iface> {
    nic: N,
    table: ConnectionTable,
    timers: TimerQueue,
    config: Config,
    /// Handler output the connection's send buffer has not taken yet.
    backlog: HashMap<ConnectionKey, Vec<u8>>,
    /// Connections the handler closed, waiting for their backlog to drain.
    closing: HashSet<ConnectionKey>,
}

impl Interface<tun_tap::Iface> {
    /// Attaches to the TUN interface named in `config`.
    pub fn new(config: Config) -> Result<Self> {
        let nic = tun_tap::Iface::without_packet_info(&config.interface, tun_tap::Mode::Tun)?;
        info!(interface = nic.name(), "interface up");
        Ok(Self::with_nic(nic, config))
    }
}

impl<N: Nic> Interface<N> {
    pub fn with_nic(nic: N, config: Config) -> Self {
        Self {
            nic,
            table: ConnectionTable::new(&config),
            timers: TimerQueue::new(),
            config,
            backlog: HashMap::new(),
            closing: HashSet::new(),
        }
    }

    pub fn nic_mut(&mut self) -> &mut N {
        &mut self.nic
    }

    pub fn table(&self) -> &ConnectionTable {
        &self.table
    }

    /// Runs the packet loop until the interface fails.
    pub fn run<H: Handler>(&mut self, handler: &mut H) -> Result<()> {
        loop {
            self.turn(handler)?;
        }
    }

    /// One iteration of the packet loop: fires due timers, then waits for a
    /// frame until the next deadline and processes it.
    pub fn turn<H: Handler>(&mut self, handler: &mut H) -> Result<()> {
        self.fire_timers(Instant::now())?;

        let timeout = self
            .timers
            .next_deadline()
            .map(|at| at.saturating_duration_since(Instant::now()));
        if !self.nic.wait(timeout)? {
            return Ok(());
        }

        let mut buf = [0u8; BUFFER_SIZE];
        let nbytes = self.nic.recv(&mut buf[..])?;
        self.on_frame(&buf[..nbytes], handler)
    }

    /// Processes one raw frame. Frames that are not well-formed TCP over
    /// IPv4 are dropped; only interface errors are returned.
    pub fn on_frame<H: Handler>(&mut self, frame: &[u8], handler: &mut H) -> Result<()> {
        let (ip, segment) = match decode(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                trace!(len = frame.len(), error = %e, "ignoring frame");
                return Ok(());
            }
        };

        let key = ConnectionKey::of(&ip, &segment);
        let before = self.table.get(&key).map(Connection::state);
        let out = self.table.dispatch(&ip, &segment);
        self.transmit(out)?;

        let data = self.table.take_received(&key);
        if !data.is_empty() {
            let reply = handler.on_receive(&key, &data);
            if !reply.is_empty() {
                self.backlog.entry(key).or_default().extend(reply);
            }
        }

        let after = self.table.get(&key).map(Connection::state);
        if after == Some(State::CloseWait) && before != after && handler.on_peer_close(&key) {
            self.closing.insert(key);
        }

        self.pump(&key)?;
        self.schedule();
        Ok(())
    }

    /// Moves the backlog of a connection into its send buffer and sends what
    /// the peer's window allows. A pending close is issued once the backlog
    /// is empty, so the FIN follows the data.
    fn pump(&mut self, key: &ConnectionKey) -> Result<()> {
        loop {
            let mut progress = false;

            if let Some(pending) = self.backlog.remove(key) {
                match self.table.write(key, &pending) {
                    Ok((n, out)) => {
                        if n < pending.len() {
                            self.backlog.insert(*key, pending[n..].to_vec());
                        }
                        progress |= n > 0 || !out.is_empty();
                        self.transmit(out)?;
                    }
                    Err(e) => debug!(%key, error = %e, dropped = pending.len(), "write failed"),
                }
            }

            if !self.backlog.contains_key(key) && self.closing.remove(key) {
                match self.table.close(key) {
                    Ok(out) => {
                        progress = true;
                        self.transmit(out)?;
                    }
                    Err(e) => debug!(%key, error = %e, "close failed"),
                }
            }

            let out = self.table.flush(key);
            if out.is_empty() && !progress {
                return Ok(());
            }
            self.transmit(out)?;
        }
    }

    fn fire_timers(&mut self, now: Instant) -> Result<()> {
        for (key, timer) in self.timers.expired(now) {
            trace!(%key, ?timer, "timer fired");
            let out = self.table.on_timer(&key, timer);
            self.transmit(out)?;
        }
        self.schedule();
        Ok(())
    }

    fn schedule(&mut self) {
        let now = Instant::now();
        for (key, timer) in self.table.take_timers() {
            let delay = match timer {
                Timer::Retransmit => self.config.rto(),
                Timer::TimeWait => self.config.time_wait(),
            };
            self.timers.schedule(key, timer, now + delay);
        }
        for key in self.table.take_removed() {
            self.timers.cancel(&key);
            self.backlog.remove(&key);
            self.closing.remove(&key);
        }
    }

    fn transmit(&mut self, segments: Vec<OutboundSegment>) -> Result<()> {
        for out in segments {
            let frame = match out.to_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(dst = %out.destination, error = %e, "cannot encode segment");
                    continue;
                }
            };
            self.nic.send(&frame)?;
        }
        Ok(())
    }
}

/// Reads the IPv4 header and TCP segment of a raw frame.
fn decode(frame: &[u8]) -> Result<(Ipv4Header<'_>, TcpSegment)> {
    let ip = ipv4::parse(frame)?;
    let segment = TcpSegment::parse(&ip)?;
    Ok((ip, segment))
}
