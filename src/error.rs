//! Error types for the stack: frame-level parse failures, which are dropped
//! by the packet loop, and the crate-wide [`Error`].

use std::{io, result};
use thiserror::Error as ThisError;

use crate::tcp::{state::State, ConnectionKey};

/// A convenience wrapper around `Result` for [`Error`].
pub type Result<T> = result::Result<T, Error>;

/// Set of errors surfaced by the stack.
///
/// Only [`Error::Io`] is fatal to the packet loop.
#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum Error {
    /// Reading from or writing to the network interface failed.
    #[error("interface I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Ipv4(#[from] NotIpv4),
    #[error(transparent)]
    Tcp(#[from] TcpParseError),
    /// The segment does not fit in a single IPv4 datagram.
    #[error("segment of {0} bytes does not fit in an IPv4 datagram")]
    Oversized(usize),
    /// The TCP options do not fit in the 40 bytes allowed by the data offset.
    #[error("TCP options of {0} bytes exceed the header space")]
    Options(usize),
    #[error("no connection for {0}")]
    UnknownConnection(ConnectionKey),
    /// The connection cannot transfer data in its current state.
    #[error("connection not open in state {0:?}")]
    NotConnected(State),
    /// A close was requested on a connection that is already closing.
    #[error("connection already closing in state {0:?}")]
    Closing(State),
}

/// A frame that cannot be read as an IPv4 datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum NotIpv4 {
    #[error("empty frame")]
    Empty,
    #[error("IP version {0} (must be 4)")]
    Version(u8),
    /// The header is truncated or its IHL is below 5 words.
    #[error("malformed IPv4 header")]
    Header,
    #[error("IPv4 total length {total} inconsistent with {available} available bytes")]
    TotalLength { total: usize, available: usize },
}

/// A datagram payload that cannot be read as a TCP segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum TcpParseError {
    #[error("IP protocol {0} is not TCP")]
    WrongProtocol(u8),
    #[error("TCP segment truncated: {len} bytes, header needs {needed}")]
    Truncated { len: usize, needed: usize },
    #[error("TCP data offset {0} below the minimum of 5 words")]
    InvalidDataOffset(u8),
    #[error("TCP checksum {actual:#06x} does not match computed {expected:#06x}")]
    BadChecksum { expected: u16, actual: u16 },
}
