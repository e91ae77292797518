use std::borrow::Cow;

/// Size of the fixed DNS message header, flags and section counters included.
pub const DNS_HEADER_SIZE: usize = 12;

/// Maximum length of a dotted host name.
pub const DNS_MAX_HOSTNAME_LEN: usize = 255;

/// Server port for unicast DNS.
pub const DNS_PORT: u16 = 53;

/// Multicast DNS port (both endpoints).
pub const MDNS_PORT: u16 = 5353;

/// Link-local multicast name resolution port.
pub const LLMNR_PORT: u16 = 5355;

/// Response bit of the header flags.
pub const DNS_FLAG_RESPONSE: u16 = 0x8000;

/// Upper bound on per-section record counts we are willing to walk.
pub const MAX_DNS_REQUESTS: u16 = 16;

/// At most this many response addresses are recorded per flow.
pub const MAX_DNS_RSP_ADDRESSES: usize = 4;

/// UDP payloads longer than this are suspicious unless EDNS(0) advertised
/// a matching reassembly size.
pub const PKT_LEN_ALERT: usize = 512;

/// Record types the dissector extracts data from.
pub const TYPE_A: u16 = 1;
pub const TYPE_PTR: u16 = 12;
pub const TYPE_AAAA: u16 = 28;
pub const TYPE_OPT: u16 = 41;

/// EDNS(0) NSID option code.
pub const EDNS_OPT_NSID: u16 = 3;

/// Bytes kept of an NSID geolocation code (IATA airport codes).
pub const GEO_IATA_CODE_LEN: usize = 3;

/// Mnemonic for a DNS reply code, or its decimal form for codes without a
/// well-known name.
pub fn rcode_label(code: u8) -> Cow<'static, str> {
    match code {
        1 => Cow::Borrowed("FORMERR"),
        2 => Cow::Borrowed("SERVFAIL"),
        3 => Cow::Borrowed("NXDOMAIN"),
        4 => Cow::Borrowed("NOTIMP"),
        5 => Cow::Borrowed("REFUSED"),
        6 => Cow::Borrowed("YXDOMAIN"),
        7 => Cow::Borrowed("XRRSET"),
        8 => Cow::Borrowed("NOTAUTH"),
        9 => Cow::Borrowed("NOTZONE"),
        other => Cow::Owned(other.to_string()),
    }
}

/// Record types deprecated or reclassified by the IANA registry.
/// A response carrying one of these is worth a signal.
pub fn is_obsolete_rr_type(rr_type: u16) -> bool {
    matches!(
        rr_type,
        3 | 4
            | 7..=11
            | 13
            | 14
            | 17
            | 19..=27
            | 30..=32
            | 34
            | 38
            | 40
            | 42
            | 56..=58
            | 99..=107
            | 253
            | 254
            | 259
    )
}
