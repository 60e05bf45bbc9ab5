//! The connection table: routes each inbound segment to the connection of its
//! 4-tuple, opening one passively when none exists, and removes connections
//! once they reach `Closed`.

use std::collections::{hash_map, HashMap, HashSet};
use std::net::Ipv4Addr;
use tracing::{debug, trace};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ipv4::{self, Ipv4Header};
use crate::tcp::{
    connection::{Connection, Event, Outcome, Settings, Timer},
    segment::TcpSegment,
    state::State,
    ConnectionKey,
};

/// A segment ready to be put on the wire, with the addresses of the IPv4
/// datagram that carries it.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundSegment {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub segment: TcpSegment,
}

impl OutboundSegment {
    fn reply(key: &ConnectionKey, segment: TcpSegment) -> Self {
        Self {
            source: key.local().0,
            destination: key.peer().0,
            segment,
        }
    }

    /// Serializes the segment with its checksum into a complete IPv4 frame.
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        let tcp = self.segment.serialize(self.source, self.destination)?;
        ipv4::encode(self.source, self.destination, &tcp)
    }
}

#[derive(Debug)]
pub struct ConnectionTable {
    connections: HashMap<ConnectionKey, Connection>,
    /// Local ports accepting connections; empty accepts on every port.
    ports: HashSet<u16>,
    settings: Settings,
    random_iss: bool,
    armed: Vec<(ConnectionKey, Timer)>,
    removed: Vec<ConnectionKey>,
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl ConnectionTable {
    pub fn new(config: &Config) -> Self {
        Self {
            connections: HashMap::new(),
            ports: config.ports.iter().copied().collect(),
            settings: config.settings(),
            random_iss: config.random_iss,
            armed: Vec::new(),
            removed: Vec::new(),
        }
    }

    /// Hands an inbound segment to its connection and returns what it emits.
    pub fn dispatch(&mut self, ip: &Ipv4Header<'_>, segment: &TcpSegment) -> Vec<OutboundSegment> {
        let key = ConnectionKey::of(ip, segment);

        let outcome = match self.connections.entry(key) {
            hash_map::Entry::Occupied(mut entry) => {
                let outcome = match entry.get_mut().process(Event::Segment(segment)) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        debug!(%key, error = %e, "segment rejected");
                        return Vec::new();
                    }
                };
                if entry.get().state() == State::Closed {
                    entry.remove();
                    debug!(%key, "connection removed");
                    self.removed.push(key);
                }
                outcome
            }
            hash_map::Entry::Vacant(entry) => {
                if !self.ports.is_empty() && !self.ports.contains(&key.local().1) {
                    trace!(%key, "no listener on port");
                    return Vec::new();
                }
                let iss = if self.random_iss { rand::random() } else { 0 };
                let mut conn = Connection::listen(key, iss, self.settings);
                let outcome = match conn.process(Event::Segment(segment)) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        debug!(%key, error = %e, "segment rejected");
                        return Vec::new();
                    }
                };
                // only a SYN moves a listening connection; keep nothing else
                if conn.state() != State::Listen {
                    debug!(%key, iss, "connection opened");
                    entry.insert(conn);
                }
                outcome
            }
        };

        self.collect(key, outcome)
    }

    /// Closes the local side of a connection.
    pub fn close(&mut self, key: &ConnectionKey) -> Result<Vec<OutboundSegment>> {
        self.drive(key, Event::Close)
    }

    /// Queues `data` on a connection and returns the number of bytes its
    /// send buffer took, with the first segment the peer's window allows.
    pub fn write(
        &mut self,
        key: &ConnectionKey,
        data: &[u8],
    ) -> Result<(usize, Vec<OutboundSegment>)> {
        let conn = self
            .connections
            .get_mut(key)
            .ok_or(Error::UnknownConnection(*key))?;
        let (n, outcome) = conn.write(data)?;
        Ok((n, self.collect(*key, outcome)))
    }

    /// Emits the next segment of data queued on a connection, if any fits in
    /// the peer's window.
    pub fn flush(&mut self, key: &ConnectionKey) -> Vec<OutboundSegment> {
        match self.connections.get_mut(key) {
            Some(conn) => {
                let outcome = conn.flush();
                self.collect(*key, outcome)
            }
            None => Vec::new(),
        }
    }

    /// Delivers an expired timer. Timers of connections that are gone are
    /// ignored.
    pub fn on_timer(&mut self, key: &ConnectionKey, timer: Timer) -> Vec<OutboundSegment> {
        if !self.connections.contains_key(key) {
            return Vec::new();
        }
        // a timer event never fails
        self.drive(key, Event::Timer(timer)).unwrap_or_default()
    }

    /// Drains the bytes received on a connection.
    pub fn take_received(&mut self, key: &ConnectionKey) -> Vec<u8> {
        self.connections
            .get_mut(key)
            .map(Connection::take_received)
            .unwrap_or_default()
    }

    /// Timers armed since the last call.
    pub fn take_timers(&mut self) -> Vec<(ConnectionKey, Timer)> {
        std::mem::take(&mut self.armed)
    }

    /// Connections removed since the last call.
    pub fn take_removed(&mut self) -> Vec<ConnectionKey> {
        std::mem::take(&mut self.removed)
    }

    pub fn get(&self, key: &ConnectionKey) -> Option<&Connection> {
        self.connections.get(key)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn drive(&mut self, key: &ConnectionKey, event: Event<'_>) -> Result<Vec<OutboundSegment>> {
        let conn = self
            .connections
            .get_mut(key)
            .ok_or(Error::UnknownConnection(*key))?;
        let outcome = conn.process(event)?;
        if conn.state() == State::Closed {
            self.connections.remove(key);
            debug!(%key, "connection removed");
            self.removed.push(*key);
        }
        Ok(self.collect(*key, outcome))
    }

    fn collect(&mut self, key: ConnectionKey, outcome: Outcome) -> Vec<OutboundSegment> {
        if let Some(timer) = outcome.timer {
            self.armed.push((key, timer));
        }
        outcome
            .segment
            .map(|segment| OutboundSegment::reply(&key, segment))
            .into_iter()
            .collect()
    }
}
