use std::fmt::{Display, Formatter};

/// The reason a connection was killed. Every `send` that is still incomplete when its
///  connection is killed fails with this reason.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum DisconnectReason {
    /// A connection request was not accepted within the configured timeout
    HandshakeTimeout,
    /// Too many consecutive keepalive pings went unanswered
    KeepaliveExhausted,
    /// The remote peer signalled that its connection state is out of sync with ours
    RemoteReset,
    /// The remote peer closed the connection
    RemoteDisconnect,
    /// The remote peer sent more out-of-order chunks than the reassembly buffer accepts
    ReassemblyOverflow,
    /// The transport was shut down locally
    Shutdown,
}

impl DisconnectReason {
    pub fn description(&self) -> &'static str {
        match self {
            DisconnectReason::HandshakeTimeout => "connection request timed out",
            DisconnectReason::KeepaliveExhausted => "remote peer stopped responding",
            DisconnectReason::RemoteReset => "connection reset by remote peer",
            DisconnectReason::RemoteDisconnect => "remote peer closed the connection",
            DisconnectReason::ReassemblyOverflow => "reassembly buffer limit exceeded",
            DisconnectReason::Shutdown => "transport shut down",
        }
    }

    /// Whether the connection re-establishes itself after being killed for this reason
    pub fn reconnects(&self) -> bool {
        matches!(self, DisconnectReason::RemoteReset)
    }
}

impl Display for DisconnectReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

impl std::error::Error for DisconnectReason {}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(DisconnectReason::HandshakeTimeout, "connection request timed out")]
    #[case(DisconnectReason::KeepaliveExhausted, "remote peer stopped responding")]
    #[case(DisconnectReason::RemoteReset, "connection reset by remote peer")]
    #[case(DisconnectReason::RemoteDisconnect, "remote peer closed the connection")]
    fn test_display(#[case] reason: DisconnectReason, #[case] expected: &str) {
        assert_eq!(reason.to_string(), expected);
    }

    #[test]
    fn test_into_anyhow() {
        let e: anyhow::Error = DisconnectReason::Shutdown.into();
        assert_eq!(e.to_string(), "transport shut down");
    }
}
