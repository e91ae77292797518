use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::flow::FlowKey;

/// mDNS group address (IPv4/IPv6).
pub const MDNS_MULTICAST_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
pub const MDNS_MULTICAST_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);

/// LLMNR group address (IPv4/IPv6).
pub const LLMNR_MULTICAST_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 252);
pub const LLMNR_MULTICAST_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 1, 3);

/// IPv6 fragment extension header id.
const IPV6_NEXT_HEADER_FRAGMENT: u8 = 44;

/// Transport protocol of a packet.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Transport {
    Udp,
    Tcp,
}

/// Network-layer view of a packet, reduced to what dissection needs.
#[derive(Copy, Clone, Debug)]
pub enum IpInfo {
    V4 {
        src: Ipv4Addr,
        dst: Ipv4Addr,
        /// The MF bit of the fragment field.
        more_fragments: bool,
        /// Cleared by the datalink decoder when the header failed its
        /// length/checksum sanity checks.
        header_valid: bool,
    },
    V6 {
        src: Ipv6Addr,
        dst: Ipv6Addr,
        next_header: u8,
    },
}

impl IpInfo {
    pub fn src(&self) -> IpAddr {
        match *self {
            IpInfo::V4 { src, .. } => IpAddr::V4(src),
            IpInfo::V6 { src, .. } => IpAddr::V6(src),
        }
    }

    pub fn dst(&self) -> IpAddr {
        match *self {
            IpInfo::V4 { dst, .. } => IpAddr::V4(dst),
            IpInfo::V6 { dst, .. } => IpAddr::V6(dst),
        }
    }

    pub fn is_ipv6(&self) -> bool {
        matches!(self, IpInfo::V6 { .. })
    }

    /// True when the packet is an IP fragment, or the v4 header itself is
    /// not trustworthy.
    pub fn is_fragmented(&self) -> bool {
        match *self {
            IpInfo::V4 {
                more_fragments,
                header_valid,
                ..
            } => more_fragments || !header_valid,
            IpInfo::V6 { next_header, .. } => next_header == IPV6_NEXT_HEADER_FRAGMENT,
        }
    }
}

/// One captured packet, normalized by the (external) datalink decoder.
///
/// The payload is borrowed for the duration of a single dispatch call and
/// must not be retained by dissectors.
#[derive(Copy, Clone, Debug)]
pub struct Packet<'a> {
    pub timestamp_ms: u64,
    pub ip: IpInfo,
    pub transport: Transport,
    pub src_port: u16,
    pub dst_port: u16,
    pub vlan_id: u16,
    pub payload: &'a [u8],
}

impl<'a> Packet<'a> {
    /// The flow fingerprint of this packet, endpoint order as observed.
    pub fn fingerprint(&self) -> FlowKey {
        FlowKey {
            src_addr: self.ip.src(),
            dst_addr: self.ip.dst(),
            src_port: self.src_port,
            dst_port: self.dst_port,
            transport: self.transport,
            vlan_id: self.vlan_id,
        }
    }

    pub fn dst_is_mdns_multicast(&self) -> bool {
        match self.ip {
            IpInfo::V4 { dst, .. } => dst == MDNS_MULTICAST_V4,
            IpInfo::V6 { dst, .. } => dst == MDNS_MULTICAST_V6,
        }
    }

    pub fn dst_is_llmnr_multicast(&self) -> bool {
        match self.ip {
            IpInfo::V4 { dst, .. } => dst == LLMNR_MULTICAST_V4,
            IpInfo::V6 { dst, .. } => dst == LLMNR_MULTICAST_V6,
        }
    }
}
