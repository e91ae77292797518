use crate::engine::DetectionModule;
use crate::flow::Flow;
use crate::packet::{IpInfo, Packet, Transport};
use crate::protocol::ProtocolId;

/// What an extra-dissection continuation reports after seeing a packet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExtraStatus {
    /// Keep feeding packets while budget remains.
    NeedMore,
    /// The continuation extracted what it wanted.
    Done,
}

/// Packet families a dissector is willing to look at.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SelectionMask(u32);

impl SelectionMask {
    pub const V4: SelectionMask = SelectionMask(1);
    pub const V6: SelectionMask = SelectionMask(1 << 1);
    pub const UDP: SelectionMask = SelectionMask(1 << 2);
    pub const TCP: SelectionMask = SelectionMask(1 << 3);
    pub const WITH_PAYLOAD: SelectionMask = SelectionMask(1 << 4);

    /// v4/v6, TCP or UDP, payload-bearing: the common case.
    pub const V4_V6_TCP_UDP_WITH_PAYLOAD: SelectionMask = SelectionMask(
        Self::V4.0 | Self::V6.0 | Self::UDP.0 | Self::TCP.0 | Self::WITH_PAYLOAD.0,
    );

    pub fn matches(self, packet: &Packet) -> bool {
        let ip_ok = match packet.ip {
            IpInfo::V4 { .. } => self.0 & Self::V4.0 != 0,
            IpInfo::V6 { .. } => self.0 & Self::V6.0 != 0,
        };
        let transport_ok = match packet.transport {
            Transport::Udp => self.0 & Self::UDP.0 != 0,
            Transport::Tcp => self.0 & Self::TCP.0 != 0,
        };
        let payload_ok = self.0 & Self::WITH_PAYLOAD.0 == 0 || !packet.payload.is_empty();
        ip_ok && transport_ok && payload_ok
    }
}

/// Per-packet dissector callback.
pub type DissectFn = fn(&DetectionModule, &mut Flow, &Packet);

/// Post-verdict continuation callback.
pub type ExtraDissectFn = fn(&DetectionModule, &mut Flow, &Packet) -> ExtraStatus;

/// End-of-capture fallback for flows without a verdict.
pub type GiveUpFn = fn(&DetectionModule, &mut Flow);

/// One registered protocol dissector.
///
/// Plain function pointers keep the registry `Copy` and let dissectors run
/// against a shared borrow of the module while the flow is held mutably.
#[derive(Copy, Clone)]
pub struct DissectorEntry {
    pub name: &'static str,
    /// The master protocol this dissector detects; exclusion is keyed on it.
    pub protocol: ProtocolId,
    pub selection: SelectionMask,
    pub dissect: DissectFn,
    pub extra: Option<ExtraDissectFn>,
    pub give_up: Option<GiveUpFn>,
}

/// Dissectors compiled into this crate.
pub fn builtin_dissectors() -> Vec<DissectorEntry> {
    vec![crate::dns::dns_dissector()]
}
