/// Identifier of an application-layer protocol.
///
/// The members of the DNS family have fixed ids; host-matched subprotocols
/// are open-ended ids registered in the host match table.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct ProtocolId(pub u16);

impl ProtocolId {
    pub const UNKNOWN: ProtocolId = ProtocolId(0);
    pub const DNS: ProtocolId = ProtocolId(5);
    pub const MDNS: ProtocolId = ProtocolId(8);
    pub const LLMNR: ProtocolId = ProtocolId(154);

    #[inline]
    pub fn is_unknown(self) -> bool {
        self == ProtocolId::UNKNOWN
    }

    /// True for DNS, mDNS and LLMNR.
    pub fn is_dns_family(self) -> bool {
        matches!(self, ProtocolId::DNS | ProtocolId::MDNS | ProtocolId::LLMNR)
    }
}

/// How much trust to place in a verdict. Ordered: a flow's confidence only
/// moves up.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Confidence {
    Unknown,
    MatchByPort,
    Dpi,
}

impl Default for Confidence {
    fn default() -> Self {
        Confidence::Unknown
    }
}

/// The (app, master) pair published for a flow.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DetectedProtocol {
    pub app: ProtocolId,
    pub master: ProtocolId,
}

/// Coarse traffic category published next to the verdict.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Category {
    Network,
}
