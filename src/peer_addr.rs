use std::fmt::{Debug, Display, Formatter};
use bytes::Bytes;

/// The address of a peer as provided by the packet substrate. All parts are opaque byte strings
///  that are interpreted by the network implementation identified by `network_type`; the
///  transport only compares them.
///
/// `label` is informational and is *not* part of a peer's identity (see
///  [crate::connection_identity::ConnectionIdentity]).
#[derive(Clone, Eq, PartialEq, Hash, Default)]
pub struct PeerAddress {
    pub application: Bytes,
    pub network_type: Bytes,
    pub network_address: Bytes,
    pub network_port: Bytes,
    pub label: Bytes,
}

impl PeerAddress {
    pub fn new(application: impl Into<Bytes>, network_type: impl Into<Bytes>, network_address: impl Into<Bytes>, network_port: impl Into<Bytes>) -> PeerAddress {
        PeerAddress {
            application: application.into(),
            network_type: network_type.into(),
            network_address: network_address.into(),
            network_port: network_port.into(),
            label: Bytes::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<Bytes>) -> PeerAddress {
        self.label = label.into();
        self
    }
}

impl Display for PeerAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[", String::from_utf8_lossy(&self.network_type))?;
        if !self.application.is_empty() {
            write!(f, "{}://", String::from_utf8_lossy(&self.application))?;
        }
        write!(f, "{}:{}", String::from_utf8_lossy(&self.network_address), String::from_utf8_lossy(&self.network_port))?;
        if !self.label.is_empty() {
            write!(f, "/{}", String::from_utf8_lossy(&self.label))?;
        }
        write!(f, "]")
    }
}

impl Debug for PeerAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::plain(PeerAddress::new("", "IPv4", "10.0.0.1", "3000"), "IPv4[10.0.0.1:3000]")]
    #[case::application(PeerAddress::new("chat", "IPv4", "10.0.0.1", "3000"), "IPv4[chat://10.0.0.1:3000]")]
    #[case::label(PeerAddress::new("chat", "IPv4", "10.0.0.1", "3000").with_label("alice"), "IPv4[chat://10.0.0.1:3000/alice]")]
    fn test_display(#[case] addr: PeerAddress, #[case] expected: &str) {
        assert_eq!(addr.to_string(), expected);
        assert_eq!(format!("{:?}", addr), expected);
    }
}
