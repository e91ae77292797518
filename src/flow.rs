use std::net::IpAddr;

use crate::constants::DNS_MAX_HOSTNAME_LEN;
use crate::packet::{Packet, Transport};
use crate::protocol::{Category, Confidence, DetectedProtocol, ProtocolId};
use crate::reader::is_valid_name_char;
use crate::risk::RiskSet;

/// The 5-tuple (plus VLAN) identifying a flow.
///
/// Endpoint ordering is preserved as first observed; replies are recognized
/// by the symmetric lookup in the flow table, not by canonicalizing the key.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FlowKey {
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub transport: Transport,
    pub vlan_id: u16,
}

impl FlowKey {
    /// The same flow seen from the opposite direction.
    pub fn reversed(&self) -> FlowKey {
        FlowKey {
            src_addr: self.dst_addr,
            dst_addr: self.src_addr,
            src_port: self.dst_port,
            dst_port: self.src_port,
            transport: self.transport,
            vlan_id: self.vlan_id,
        }
    }
}

/// Direction of a packet relative to the flow's first packet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    Original,
    Reply,
}

impl Direction {
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Direction::Original => 0,
            Direction::Reply => 1,
        }
    }
}

/// One recorded answer address.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DnsResponseAddress {
    pub addr: IpAddr,
    pub ttl: u32,
}

impl DnsResponseAddress {
    pub fn is_ipv6(&self) -> bool {
        self.addr.is_ipv6()
    }
}

/// Protocol scratch filled in by the DNS dissector.
#[derive(Clone, Debug, Default)]
pub struct DnsFlowData {
    pub is_query: bool,
    pub query_type: u16,
    pub rsp_type: u16,
    pub reply_code: u8,
    pub num_queries: u8,
    /// Sum of the answer, authority and additional counters of the reply,
    /// stored modulo 256.
    pub num_answers: u8,
    pub edns0_udp_payload_size: u16,
    /// Answer addresses in wire order, at most four.
    pub rsp_addrs: Vec<DnsResponseAddress>,
    pub ptr_domain_name: String,
    pub geolocation_iata_code: String,
}

/// Post-verdict follow-up dissection, modeled as an explicit state machine
/// rather than a stored continuation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExtraDissection {
    /// No continuation requested.
    Probing,
    /// The named dissector wants to see up to `budget` more packets.
    AwaitingResponse { protocol: ProtocolId, budget: u8 },
    Done,
}

impl Default for ExtraDissection {
    fn default() -> Self {
        ExtraDissection::Probing
    }
}

/// Hostname normalization applied when storing `host_server_name`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HostnameNorm {
    /// Lowercase and substitute characters outside the DNS set.
    LowercaseAll,
    /// Lowercase only, keep every byte (mDNS service names).
    LowercaseOnly,
}

/// Per-connection record: identity, counters, verdict, risks and protocol
/// scratch. Exclusively owned by its flow-table node; mutated only by the
/// dissection thread that owns it for the current packet.
#[derive(Clone, Debug)]
pub struct Flow {
    pub key: FlowKey,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
    pub packet_counter: u32,
    pub packets_per_direction: [u32; 2],
    pub bytes: u64,
    detected: DetectedProtocol,
    confidence: Confidence,
    pub risks: RiskSet,
    /// Normalized hostname observed on the flow, at most 255 bytes.
    pub host_server_name: String,
    pub category: Option<Category>,
    pub extra: ExtraDissection,
    excluded: Vec<ProtocolId>,
    /// First payload bytes, kept only when payload tracking is configured.
    pub payload_sample: Option<Vec<u8>>,
    pub dns: DnsFlowData,
}

impl Flow {
    pub fn new(key: FlowKey, now_ms: u64) -> Flow {
        Flow {
            key,
            first_seen_ms: now_ms,
            last_seen_ms: now_ms,
            packet_counter: 0,
            packets_per_direction: [0, 0],
            bytes: 0,
            detected: DetectedProtocol::default(),
            confidence: Confidence::Unknown,
            risks: RiskSet::new(),
            host_server_name: String::new(),
            category: None,
            extra: ExtraDissection::Probing,
            excluded: Vec::new(),
            payload_sample: None,
            dns: DnsFlowData::default(),
        }
    }

    pub fn detected(&self) -> DetectedProtocol {
        self.detected
    }

    #[inline]
    pub fn app_protocol(&self) -> ProtocolId {
        self.detected.app
    }

    #[inline]
    pub fn master_protocol(&self) -> ProtocolId {
        self.detected.master
    }

    pub fn confidence(&self) -> Confidence {
        self.confidence
    }

    /// True once any verdict slot left UNKNOWN.
    pub fn has_verdict(&self) -> bool {
        !self.detected.app.is_unknown() || !self.detected.master.is_unknown()
    }

    /// Publishes a verdict under the upgrade rules: an empty stack accepts
    /// any write; afterwards only refinements naming the already-detected
    /// protocol are applied, and confidence never moves down. An UNKNOWN
    /// app slot is promoted to the master protocol before the write.
    pub fn set_detected_protocol(
        &mut self,
        app: ProtocolId,
        master: ProtocolId,
        confidence: Confidence,
    ) {
        let app = if app.is_unknown() { master } else { app };
        if confidence < self.confidence {
            return;
        }
        if !self.has_verdict() {
            self.detected = DetectedProtocol { app, master };
            self.confidence = confidence;
            return;
        }
        let same_protocol = app == self.detected.app
            || app == self.detected.master
            || (!master.is_unknown()
                && (master == self.detected.master || master == self.detected.app));
        if same_protocol {
            if !app.is_unknown() {
                self.detected.app = app;
            }
            self.confidence = confidence;
        }
    }

    /// Stores the normalized hostname, truncating to the DNS length cap.
    pub fn set_hostname(&mut self, name: &str, norm: HostnameNorm) {
        let mut out = String::with_capacity(name.len().min(DNS_MAX_HOSTNAME_LEN));
        for c in name.chars() {
            if out.len() + c.len_utf8() > DNS_MAX_HOSTNAME_LEN {
                break;
            }
            match norm {
                HostnameNorm::LowercaseOnly => out.push(c.to_ascii_lowercase()),
                HostnameNorm::LowercaseAll => {
                    if c == '.' || (c.is_ascii() && is_valid_name_char(c as u8)) {
                        out.push(c.to_ascii_lowercase());
                    } else if ('\u{20}'..='\u{7e}').contains(&c) {
                        out.push('_');
                    } else {
                        out.push('?');
                    }
                }
            }
        }
        self.host_server_name = out;
    }

    /// Removes a protocol from further consideration on this flow.
    pub fn exclude_protocol(&mut self, protocol: ProtocolId) {
        if !self.is_protocol_excluded(protocol) {
            self.excluded.push(protocol);
        }
    }

    pub fn is_protocol_excluded(&self, protocol: ProtocolId) -> bool {
        self.excluded.contains(&protocol)
    }

    /// Updates the per-flow counters for one packet.
    pub fn account_packet(&mut self, direction: Direction, packet: &Packet) {
        self.packet_counter += 1;
        self.packets_per_direction[direction.index()] += 1;
        self.bytes += packet.payload.len() as u64;
        self.last_seen_ms = packet.timestamp_ms;
    }
}
