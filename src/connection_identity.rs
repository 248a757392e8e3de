use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use bytes::Bytes;
use crate::peer_addr::PeerAddress;

/// Key of a connection: there is exactly one connection per (channel, peer) pair. The peer's
///  label is ignored for identity purposes.
#[derive(Clone)]
pub struct ConnectionIdentity {
    channel: Bytes,
    address: PeerAddress,
}

impl ConnectionIdentity {
    pub fn new(channel: Bytes, address: PeerAddress) -> ConnectionIdentity {
        ConnectionIdentity { channel, address }
    }

    pub fn channel(&self) -> &Bytes {
        &self.channel
    }

    pub fn address(&self) -> &PeerAddress {
        &self.address
    }
}

impl PartialEq for ConnectionIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.channel == other.channel
            && self.address.application == other.address.application
            && self.address.network_type == other.address.network_type
            && self.address.network_address == other.address.network_address
            && self.address.network_port == other.address.network_port
    }
}
impl Eq for ConnectionIdentity {}

impl Hash for ConnectionIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.channel.hash(state);
        self.address.application.hash(state);
        self.address.network_type.hash(state);
        self.address.network_address.hash(state);
        self.address.network_port.hash(state);
    }
}

impl Debug for ConnectionIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}#{}", self.address, String::from_utf8_lossy(&self.channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rustc_hash::FxHashSet;

    fn addr(application: &'static str, network_address: &'static str, port: &'static str) -> PeerAddress {
        PeerAddress::new(application, "IPv4", network_address, port)
    }

    #[rstest]
    #[case::identical("chan", addr("app", "1.2.3.4", "5"), "chan", addr("app", "1.2.3.4", "5"), true)]
    #[case::label_ignored("chan", addr("app", "1.2.3.4", "5").with_label("x"), "chan", addr("app", "1.2.3.4", "5"), true)]
    #[case::channel("chan", addr("app", "1.2.3.4", "5"), "other", addr("app", "1.2.3.4", "5"), false)]
    #[case::application("chan", addr("app", "1.2.3.4", "5"), "chan", addr("ppa", "1.2.3.4", "5"), false)]
    #[case::network_address("chan", addr("app", "1.2.3.4", "5"), "chan", addr("app", "1.2.3.5", "5"), false)]
    #[case::port("chan", addr("app", "1.2.3.4", "5"), "chan", addr("app", "1.2.3.4", "6"), false)]
    fn test_eq_hash(#[case] channel_a: &'static str, #[case] addr_a: PeerAddress, #[case] channel_b: &'static str, #[case] addr_b: PeerAddress, #[case] expected_equal: bool) {
        let a = ConnectionIdentity::new(Bytes::from_static(channel_a.as_bytes()), addr_a);
        let b = ConnectionIdentity::new(Bytes::from_static(channel_b.as_bytes()), addr_b);

        assert_eq!(a == b, expected_equal);

        let mut set = FxHashSet::default();
        set.insert(a);
        set.insert(b);
        assert_eq!(set.len(), if expected_equal { 1 } else { 2 });
    }
}
