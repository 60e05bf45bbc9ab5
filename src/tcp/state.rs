/// A connection progresses through a series of states during its lifetime.
/// The states are: `Listen`, `SynSent`, `SynReceived`, `Established`,
/// `FinWait1`, `FinWait2`, `CloseWait`, `Closing`, `LastAck`, `TimeWait`,
/// and the fictional state `Closed`. `Closed` is fictional because it
/// represents the state when there is no TCB, and therefore, no connection.
/// Briefly, the meanings of the states are:
///
/// - `Closed`: Represents no connection state at all. A connection that
///   reaches it is removed from the connection table.
///
/// - `Listen`: Represents waiting for a connection request from any remote
///   TCP and port.
///
/// - `SynSent`: Represents waiting for a matching connection request after
///   having sent a connection request. Only active opens pass through it,
///   and this stack performs passive opens only.
///
/// - `SynReceived`: Represents waiting for a confirming connection
///   request acknowledgment after having both received and sent a
///   connection request.
///
/// - `Established`: Represents an open connection, data received can be
///   delivered to the user. The normal state for the data transfer phase
///   of the connection.
///
/// - `FinWait1`: Represents waiting for a connection termination request
///   from the remote TCP, or an acknowledgment of the connection
///   termination request previously sent.
///
/// - `FinWait2`: Represents waiting for a connection termination request
///   from the remote TCP.
///
/// - `CloseWait`: Represents waiting for a connection termination request
///   from the local user.
///
/// - `Closing`: Represents waiting for a connection termination request
///   acknowledgment from the remote TCP.
///
/// - `LastAck`: Represents waiting for an acknowledgment of the
///   connection termination request previously sent to the remote TCP
///   (which includes an acknowledgment of its connection termination
///   request).
///
/// - `TimeWait`: Represents waiting for enough time to pass to be sure
///   the remote TCP received the acknowledgment of its connection
///   termination request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    #[default]
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

impl State {
    /// Any state in which both sequence spaces have been synchronized.
    pub fn is_synchronized(&self) -> bool {
        !matches!(self, Self::Closed | Self::Listen | Self::SynSent)
    }

    /// Any state after receiving FIN: the peer will send no more data.
    pub fn is_recv_closed(&self) -> bool {
        matches!(
            self,
            Self::CloseWait | Self::Closing | Self::LastAck | Self::TimeWait | Self::Closed
        )
    }
}
