//! DNS, multicast DNS and LLMNR dissection.
//!
//! One dissector covers the whole family: the wire format is shared and the
//! three protocols are told apart by port and destination address. The
//! functions here assume an untrusted payload; every load goes through the
//! bounded reader and a failed bound stops the current walk, keeping
//! whatever was extracted so far.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tracing::{debug, trace};

use crate::constants::*;
use crate::dissector::{DissectorEntry, ExtraStatus, SelectionMask};
use crate::engine::DetectionModule;
use crate::flow::{DnsResponseAddress, ExtraDissection, Flow, HostnameNorm};
use crate::packet::{Packet, Transport};
use crate::protocol::{Category, Confidence, ProtocolId};
use crate::reader::PayloadReader;
use crate::risk::Risk;

/// Extra packets requested after a query verdict. More than one because a
/// TCP flow can interleave ACKs before the response arrives.
const MAX_EXTRA_DNS_PACKETS: u8 = 5;

/// Suffixes of services known to encode blobs in long first labels.
const LONG_NAME_EXEMPT_SUFFIXES: [&str; 6] = [
    "multi.surbl.org",
    "spamhaus.org",
    "rackcdn.com",
    "akamaiedge.net",
    "mx-verification.google.com",
    "amazonaws.com",
];

/// Registry entry for the DNS family dissector.
pub fn dns_dissector() -> DissectorEntry {
    DissectorEntry {
        name: "DNS",
        protocol: ProtocolId::DNS,
        selection: SelectionMask::V4_V6_TCP_UDP_WITH_PAYLOAD,
        dissect,
        extra: Some(dissect_again),
        give_up: Some(give_up),
    }
}

/// Fixed-size message header, byteswapped to host order.
#[derive(Copy, Clone, Debug)]
struct DnsHeader {
    tr_id: u16,
    flags: u16,
    num_queries: u16,
    num_answers: u16,
    authority_rrs: u16,
    additional_rrs: u16,
}

impl DnsHeader {
    fn parse(reader: &PayloadReader, offset: usize) -> Option<DnsHeader> {
        Some(DnsHeader {
            tr_id: reader.u16_be(offset).ok()?,
            flags: reader.u16_be(offset + 2).ok()?,
            num_queries: reader.u16_be(offset + 4).ok()?,
            num_answers: reader.u16_be(offset + 6).ok()?,
            authority_rrs: reader.u16_be(offset + 8).ok()?,
            additional_rrs: reader.u16_be(offset + 10).ok()?,
        })
    }

    fn is_query(&self) -> bool {
        self.flags & DNS_FLAG_RESPONSE == 0
    }
}

fn port_protocol(port: u16) -> ProtocolId {
    match port {
        DNS_PORT => ProtocolId::DNS,
        LLMNR_PORT => ProtocolId::LLMNR,
        MDNS_PORT => ProtocolId::MDNS,
        _ => ProtocolId::UNKNOWN,
    }
}

/// Port-derived member of the family, source port taking precedence.
fn port_subprotocol(src_port: u16, dst_port: u16) -> ProtocolId {
    match port_protocol(src_port) {
        ProtocolId::UNKNOWN => port_protocol(dst_port),
        protocol => protocol,
    }
}

/// DNS family dissector body.
fn dissect(module: &DetectionModule, flow: &mut Flow, packet: &Packet) {
    trace!("search DNS");
    let reader = PayloadReader::new(packet.payload);
    let (src_port, dst_port) = (packet.src_port, packet.dst_port);
    let payload_offset = match packet.transport {
        Transport::Udp => 0,
        Transport::Tcp => 2, // length-prefixed stream framing
    };

    if packet.transport == Transport::Udp {
        // mDNS/LLMNR queries must be addressed to their multicast group.
        let gate_failed = (dst_port == MDNS_PORT && !packet.dst_is_mdns_multicast())
            || (dst_port == LLMNR_PORT && !packet.dst_is_llmnr_multicast());
        if gate_failed
            && reader.len() > 5
            && reader.u16_be(2).unwrap_or(0) != 0
            && reader.u16_be(4).unwrap_or(0) != 0
        {
            flow.exclude_protocol(ProtocolId::DNS);
            return;
        }
    }

    let is_mdns = src_port == MDNS_PORT || dst_port == MDNS_PORT;
    let port_match =
        src_port == DNS_PORT || dst_port == DNS_PORT || is_mdns || dst_port == LLMNR_PORT;

    if port_match && reader.len() > DNS_HEADER_SIZE + payload_offset {
        let parsed = parse_message(module, flow, packet, &reader, payload_offset, is_mdns);
        let (header, is_query) = match parsed {
            Some(parsed) => parsed,
            None => {
                flow.exclude_protocol(ProtocolId::DNS);
                return;
            }
        };

        let mut master = ProtocolId::UNKNOWN;
        let mut app = if dst_port == LLMNR_PORT {
            ProtocolId::LLMNR
        } else if dst_port == MDNS_PORT && packet.dst_is_llmnr_multicast() {
            ProtocolId::MDNS
        } else {
            ProtocolId::DNS
        };

        let mut off = payload_offset + DNS_HEADER_SIZE;
        audit_queries(flow, &reader, off, header.num_queries);

        let decoded = reader.decode_name(&mut off, DNS_MAX_HOSTNAME_LEN + 1, is_mdns);
        let norm = if is_mdns {
            HostnameNorm::LowercaseOnly
        } else {
            HostnameNorm::LowercaseAll
        };
        flow.set_hostname(&decoded.name, norm);
        if !decoded.valid {
            flow.risks.set(
                Risk::InvalidCharacters,
                Some("Invalid chars detected in domain name"),
            );
        }
        check_long_hostname(flow, is_mdns);

        if !flow.host_server_name.is_empty() {
            if module.config().dns_subclassification_enabled {
                let host = flow.host_server_name.clone();
                let matched = module.match_host_subprotocol(&host);
                if !matched.is_unknown() {
                    if flow.dns.rsp_type == TYPE_A || flow.dns.rsp_type == TYPE_AAAA {
                        if let Some(first) = flow.dns.rsp_addrs.first() {
                            module.fpc_dns_insert(first.addr, matched, packet.timestamp_ms / 1000);
                        }
                    }
                    app = matched;
                    master = ProtocolId::DNS;
                } else {
                    app = ProtocolId::UNKNOWN;
                    master = port_subprotocol(src_port, dst_port);
                }
                module.check_dga_name(flow, &host);
            } else {
                app = ProtocolId::UNKNOWN;
                master = port_subprotocol(src_port, dst_port);
            }
            // Category does not depend on the subprotocol.
            flow.category = Some(Category::Network);
        }

        flow.dns.is_query = is_query;

        if is_query {
            // Publish the verdict now so callers can carry on; the response
            // only enriches the metadata.
            flow.set_detected_protocol(app, master, Confidence::Dpi);
            if module.config().dns_parse_response_enabled && master != ProtocolId::LLMNR {
                flow.extra = ExtraDissection::AwaitingResponse {
                    protocol: ProtocolId::DNS,
                    budget: MAX_EXTRA_DNS_PACKETS,
                };
            }
            return;
        }

        // Truncating casts: counter sums past 255 wrap modulo 256.
        flow.dns.num_queries = header.num_queries as u8;
        flow.dns.num_answers = header
            .num_answers
            .wrapping_add(header.authority_rrs)
            .wrapping_add(header.additional_rrs) as u8;

        if !flow.has_verdict() {
            debug!(host = %flow.host_server_name, "found DNS");
            flow.set_detected_protocol(app, master, Confidence::Dpi);
        } else if flow.app_protocol() != ProtocolId::DNS
            && flow.master_protocol() != ProtocolId::DNS
        {
            // A subprotocol match already claimed the flow for something
            // else entirely.
            flow.exclude_protocol(ProtocolId::DNS);
        }
    }

    if flow.packet_counter > 3 && !flow.has_verdict() {
        flow.exclude_protocol(ProtocolId::DNS);
    }

    if flow.app_protocol() == ProtocolId::DNS || flow.master_protocol() == ProtocolId::DNS {
        if packet.transport == Transport::Udp
            && reader.len() > PKT_LEN_ALERT
            && reader.len() > flow.dns.edns0_udp_payload_size as usize
        {
            let reason = format!("{} Bytes DNS Packet", reader.len());
            flow.risks.set(Risk::DnsLargePacket, Some(&reason));
        }
        if packet.ip.is_fragmented() {
            flow.risks.set(Risk::DnsFragmented, None);
        }
    }
}

/// Extra-dissection continuation: keep parsing packets of the flow until
/// the response counters have been recorded.
fn dissect_again(module: &DetectionModule, flow: &mut Flow, packet: &Packet) -> ExtraStatus {
    dissect(module, flow, packet);
    if flow.dns.num_answers != 0 {
        ExtraStatus::Done
    } else {
        ExtraStatus::NeedMore
    }
}

/// End-of-capture fallback: flows on DNS-family ports get the port verdict
/// with reduced confidence.
fn give_up(_module: &DetectionModule, flow: &mut Flow) {
    let guess = port_subprotocol(flow.key.src_port, flow.key.dst_port);
    if !guess.is_unknown() {
        flow.set_detected_protocol(ProtocolId::UNKNOWN, guess, Confidence::MatchByPort);
    }
}

/// Validates the header and, for replies, walks every section. Returns the
/// header and the query bit, or `None` when the message cannot be DNS.
fn parse_message(
    module: &DetectionModule,
    flow: &mut Flow,
    packet: &Packet,
    reader: &PayloadReader,
    payload_offset: usize,
    is_mdns: bool,
) -> Option<(DnsHeader, bool)> {
    let header = DnsHeader::parse(reader, payload_offset)?;
    let mut x = payload_offset + DNS_HEADER_SIZE;
    let is_query = header.is_query();
    trace!(tr_id = header.tr_id, flags = header.flags, is_query, "dns header");

    if is_query {
        let good = header.num_queries <= MAX_DNS_REQUESTS
            && ((header.flags & 0x2800) == 0x2800 // dynamic update
                || (header.flags & 0xFCF0) == 0x0000 // standard query
                || (header.flags & 0xFCFF) == 0x0800 // inverse query
                || (header.num_answers == 0 && header.authority_rrs == 0));
        if !good {
            if flow.has_verdict() {
                flow.risks
                    .set(Risk::MalformedPacket, Some("Invalid DNS Header"));
            }
            return None;
        }
        if let Some(query_type) = scan_query_type(reader, x) {
            flow.dns.query_type = query_type;
            trace!(query_type, "dns request");
        }
        return Some((header, true));
    }

    // Reply. Recover the query type when the query packet was missed.
    if flow.dns.query_type == 0 {
        if let Some(query_type) = scan_query_type(reader, x) {
            flow.dns.query_type = query_type;
        }
    }

    flow.dns.reply_code = (header.flags & 0x0F) as u8;
    if flow.dns.reply_code != 0 {
        let reason = format!("DNS Error Code {}", rcode_label(flow.dns.reply_code));
        flow.risks.set(Risk::ErrorCodeDetected, Some(&reason));
    } else if flow.risks.is_set(Risk::SuspiciousDgaDomain) {
        flow.risks
            .set(Risk::RiskyDomain, Some("DGA Name Query with no Error Code"));
    }

    let in_range = |count: u16| count > 0 && count <= MAX_DNS_REQUESTS;
    if in_range(header.num_queries)
        && (in_range(header.num_answers)
            || in_range(header.authority_rrs)
            || in_range(header.additional_rrs))
    {
        walk_sections(module, flow, packet, reader, &header, &mut x, is_mdns);
    }

    Some((header, false))
}

/// Walks to the first label terminator and reads the query type behind it.
fn scan_query_type(reader: &PayloadReader, mut x: usize) -> Option<u16> {
    while x + 2 < reader.len() {
        if reader.u8_at(x).ok()? == 0 {
            return reader.u16_be(x + 1).ok();
        }
        x += 1;
    }
    None
}

/// Walks every section of a reply, harvesting metadata from the first
/// answer record and from an EDNS(0) OPT record in the additional section.
/// Bound violations stop the walk; whatever was recorded stays.
fn walk_sections(
    module: &DetectionModule,
    flow: &mut Flow,
    packet: &Packet,
    reader: &PayloadReader,
    header: &DnsHeader,
    x: &mut usize,
    relaxed: bool,
) {
    // Question section: names are skipped, only the offset matters.
    for _ in 0..header.num_queries {
        if *x + 6 >= reader.len() {
            break;
        }
        let name_len = reader.name_length(*x);
        if name_len == 0 {
            break;
        }
        *x += name_len;
        if *x + 8 >= reader.len() {
            break;
        }
        *x += 4; // type + class
    }

    let mut found = false;
    for _ in 0..header.num_answers {
        if *x + 6 >= reader.len() {
            break;
        }
        let name_len = reader.name_length(*x);
        if name_len == 0 {
            break;
        }
        *x += name_len;
        if *x + 8 >= reader.len() {
            break;
        }
        let rsp_type = match reader.u16_be(*x) {
            Ok(value) => value,
            Err(_) => break,
        };
        *x += 2;
        let rsp_ttl = match reader.u32_be(*x + 2) {
            Ok(value) => value,
            Err(_) => break,
        };
        if rsp_ttl == 0 {
            flow.risks
                .set(Risk::MinorIssues, Some("DNS Record with zero TTL"));
        }
        if !found {
            if is_obsolete_rr_type(rsp_type) {
                flow.risks
                    .set(Risk::DnsSuspiciousTraffic, Some("Obsolete DNS record type"));
            }
            flow.dns.rsp_type = rsp_type;
        }

        // `x` points at the class field here.
        if *x + 12 <= reader.len() {
            *x += 6; // class + ttl
            let data_len = match reader.u16_be(*x) {
                Ok(value) => value as usize,
                Err(_) => break,
            };
            *x += 2;
            if *x + data_len <= reader.len() {
                if rsp_type == TYPE_PTR && !found {
                    let mut ptr_off = *x;
                    let decoded =
                        reader.decode_name(&mut ptr_off, DNS_MAX_HOSTNAME_LEN + 1, relaxed);
                    flow.dns.ptr_domain_name = decoded.name;
                    found = true;
                } else if (rsp_type == TYPE_A && data_len == 4)
                    || (rsp_type == TYPE_AAAA && data_len == 16)
                {
                    if !found {
                        if flow.dns.rsp_addrs.len() < MAX_DNS_RSP_ADDRESSES {
                            if let Some(addr) = read_addr(reader, *x, data_len) {
                                flow.dns.rsp_addrs.push(DnsResponseAddress {
                                    addr,
                                    ttl: rsp_ttl,
                                });
                                module.cache_address(
                                    addr,
                                    &flow.host_server_name,
                                    packet.timestamp_ms / 1000,
                                    rsp_ttl,
                                );
                            }
                        }
                        if flow.dns.rsp_addrs.len() >= MAX_DNS_RSP_ADDRESSES {
                            found = true;
                        }
                    }
                }
                *x += data_len;
            }
        }

        if found && header.additional_rrs == 0 {
            // With additional RRs present the walk must continue so the
            // offset reaches the additional section.
            break;
        }
    }

    if header.additional_rrs == 0 {
        return;
    }

    // Authority section: walked for offset tracking only.
    for _ in 0..header.authority_rrs {
        if *x + 6 >= reader.len() {
            break;
        }
        let name_len = reader.name_length(*x);
        if name_len == 0 {
            break;
        }
        *x += name_len;
        if *x + 8 >= reader.len() {
            break;
        }
        *x += 2; // type
        if *x + 12 <= reader.len() {
            *x += 6; // class + ttl
            let data_len = match reader.u16_be(*x) {
                Ok(value) => value as usize,
                Err(_) => break,
            };
            *x += 2;
            if *x + data_len <= reader.len() {
                *x += data_len;
            }
        }
    }

    for _ in 0..header.additional_rrs {
        if *x + 6 > reader.len() {
            break;
        }
        let name_len = reader.name_length(*x);
        if name_len == 0 {
            break;
        }
        *x += name_len;
        if *x + 10 > reader.len() {
            break;
        }
        let rsp_type = match reader.u16_be(*x) {
            Ok(value) => value,
            Err(_) => break,
        };
        *x += 2;
        let rr_class = match reader.u16_be(*x) {
            Ok(value) => value,
            Err(_) => break,
        };
        let data_len = match reader.u16_be(*x + 6) {
            Ok(value) => value as usize,
            Err(_) => break,
        };
        *x += 8; // class + ttl + rdlength
        if rsp_type == TYPE_OPT {
            // EDNS(0): the class field advertises the UDP reassembly size.
            flow.dns.edns0_udp_payload_size = rr_class;
            trace!(
                edns0_udp_payload_size = rr_class,
                "edns0 pseudo-record"
            );
            parse_nsid(flow, reader, *x, data_len);
        }
        if *x + data_len > reader.len() {
            break;
        }
        *x += data_len;
    }

    if !flow.has_verdict() {
        // The query was missed entirely; the source port decides.
        let app = port_protocol(packet.src_port);
        if !app.is_unknown() {
            flow.set_detected_protocol(app, ProtocolId::UNKNOWN, Confidence::Dpi);
        }
    }
}

/// First-level TLV scan of OPT rdata for the NSID option. A full iterator
/// over the option list is a future extension; NSID is the only option the
/// flow record keeps today.
fn parse_nsid(flow: &mut Flow, reader: &PayloadReader, rdata_start: usize, rdata_len: usize) {
    if rdata_len < 4 {
        return;
    }
    let opt_code = match reader.u16_be(rdata_start) {
        Ok(value) => value,
        Err(_) => return,
    };
    let opt_len = match reader.u16_be(rdata_start + 2) {
        Ok(value) => value as usize,
        Err(_) => return,
    };
    if opt_code != EDNS_OPT_NSID || opt_len <= 6 || 4 + opt_len > rdata_len {
        return;
    }
    let option = match reader.slice(rdata_start + 4, opt_len) {
        Ok(bytes) => bytes,
        Err(_) => return,
    };
    if let Some(code) = option.strip_prefix(b"gpdns-") {
        // Google public DNS publishes the answering site as an IATA code.
        let n = code.len().min(GEO_IATA_CODE_LEN);
        flow.dns.geolocation_iata_code = String::from_utf8_lossy(&code[..n]).into_owned();
    }
}

fn read_addr(reader: &PayloadReader, offset: usize, len: usize) -> Option<IpAddr> {
    let bytes = reader.slice(offset, len).ok()?;
    match len {
        4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(bytes);
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(bytes);
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

/// Re-walks the question section label by label; a query whose type field
/// would read zero, whose name exceeds the hostname limit, or which runs
/// past the payload is reported as malformed.
fn audit_queries(flow: &mut Flow, reader: &PayloadReader, offset: usize, num_queries: u16) {
    let mut idx = offset;
    let mut audited = 0u16;
    while audited < num_queries && idx < reader.len() {
        let mut i = idx;
        let mut total_len = 0usize;
        loop {
            let byte = match reader.u8_at(i) {
                Ok(byte) => byte,
                Err(_) => break,
            };
            if byte == 0 {
                total_len += 1;
                break;
            }
            let (advance, is_ptr) = if byte & 0xC0 == 0xC0 {
                (1, true)
            } else {
                (byte as usize + 1, false)
            };
            i += advance;
            total_len += advance;
            if is_ptr {
                break;
            }
        }

        let type_is_zero = i + 4 <= reader.len()
            && reader.u8_at(i + 1).unwrap_or(1) == 0
            && reader.u8_at(i + 2).unwrap_or(1) == 0;
        if i + 4 > reader.len() || type_is_zero || total_len > 253 {
            flow.risks
                .set(Risk::MalformedPacket, Some("Invalid DNS Query Length"));
            break;
        }
        idx = i + 5; // terminator + type + class
        audited += 1;
    }
}

/// A very long first label outside mDNS smells like tunneling or
/// exfiltration, unless the domain matches a known blocklist/CDN pattern.
fn check_long_hostname(flow: &mut Flow, is_mdns: bool) {
    let suspicious = {
        let host = flow.host_server_name.as_str();
        // Reverse queries legitimately carry long first labels.
        !host.contains(".in-addr.")
            && !is_mdns
            && host.find('.').map_or(false, |first_label_len| first_label_len > 48)
            && !LONG_NAME_EXEMPT_SUFFIXES
                .iter()
                .any(|suffix| host.ends_with(*suffix))
    };
    if suspicious {
        flow.risks
            .set(Risk::DnsSuspiciousTraffic, Some("Long DNS host name"));
    }
}
