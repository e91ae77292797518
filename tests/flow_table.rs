use std::net::IpAddr;

use flowsector::{
    Config, Confidence, DetectionModule, Direction, DpiError, Engine, FlowKey, FlowTable,
    IpInfo, Packet, ProtocolId, Transport,
};

fn key(src: [u8; 4], src_port: u16, dst: [u8; 4], dst_port: u16) -> FlowKey {
    FlowKey {
        src_addr: IpAddr::V4(src.into()),
        dst_addr: IpAddr::V4(dst.into()),
        src_port,
        dst_port,
        transport: Transport::Udp,
        vlan_id: 0,
    }
}

#[test]
fn reply_joins_existing_flow() {
    let mut table = FlowTable::new(16, 100);
    let k = key([10, 0, 0, 1], 1234, [10, 0, 0, 2], 53);

    let (_, direction) = table.find_or_insert(k, 0).unwrap();
    assert_eq!(direction, Direction::Original);
    let (_, direction) = table.find_or_insert(k, 1).unwrap();
    assert_eq!(direction, Direction::Original);
    let (_, direction) = table.find_or_insert(k.reversed(), 2).unwrap();
    assert_eq!(direction, Direction::Reply);
    assert_eq!(table.len(), 1);
}

#[test]
fn vlan_separates_otherwise_identical_flows() {
    let mut table = FlowTable::new(16, 100);
    let a = key([10, 0, 0, 1], 1234, [10, 0, 0, 2], 53);
    let b = FlowKey { vlan_id: 7, ..a };
    table.find_or_insert(a, 0).unwrap();
    table.find_or_insert(b, 0).unwrap();
    assert_eq!(table.len(), 2);
}

#[test]
fn capacity_is_enforced() {
    let mut table = FlowTable::new(4, 2);
    table.find_or_insert(key([10, 0, 0, 1], 1000, [10, 0, 0, 2], 53), 0).unwrap();
    table.find_or_insert(key([10, 0, 0, 1], 1001, [10, 0, 0, 2], 53), 0).unwrap();
    let overflow = table.find_or_insert(key([10, 0, 0, 1], 1002, [10, 0, 0, 2], 53), 0);
    assert!(matches!(overflow, Err(DpiError::FlowTableFull)));
    assert_eq!(table.len(), 2);

    // Existing flows stay reachable at capacity.
    let (_, direction) = table
        .find_or_insert(key([10, 0, 0, 1], 1000, [10, 0, 0, 2], 53), 1)
        .unwrap();
    assert_eq!(direction, Direction::Original);
}

#[test]
fn walk_visits_each_flow_once_and_drain_empties() {
    let mut table = FlowTable::new(8, 1000);
    for port in 0..50u16 {
        table
            .find_or_insert(key([10, 0, 0, 1], 10_000 + port, [10, 0, 0, 2], 53), 0)
            .unwrap();
    }
    assert_eq!(table.len(), 50);

    let mut walked = 0;
    table.walk(|_| walked += 1);
    assert_eq!(walked, 50);
    assert_eq!(table.len(), 50);

    let mut drained = 0;
    table.drain(|_| drained += 1);
    assert_eq!(drained, 50);
    assert!(table.is_empty());
}

fn v4(src: [u8; 4], dst: [u8; 4]) -> IpInfo {
    IpInfo::V4 {
        src: src.into(),
        dst: dst.into(),
        more_fragments: false,
        header_valid: true,
    }
}

#[test]
fn finalize_applies_port_guess_to_unclassified_flows() {
    let mut engine = Engine::new(DetectionModule::new(Config::default()).unwrap());
    // Too short for a DNS header: no verdict from dissection.
    let payload = [0u8; 8];
    let packet = Packet {
        timestamp_ms: 1_000,
        ip: v4([10, 0, 0, 1], [10, 0, 0, 2]),
        transport: Transport::Udp,
        src_port: 40_000,
        dst_port: 53,
        vlan_id: 0,
        payload: &payload,
    };
    let flow = engine.process_packet(&packet).unwrap();
    assert!(!flow.has_verdict());

    let mut live = 0;
    engine.walk_flows(|_| live += 1);
    assert_eq!(live, 1);

    let mut finalized = 0;
    engine.finalize(|flow| {
        assert_eq!(flow.master_protocol(), ProtocolId::DNS);
        assert_eq!(flow.app_protocol(), ProtocolId::DNS);
        assert_eq!(flow.confidence(), Confidence::MatchByPort);
        finalized += 1;
    });
    assert_eq!(finalized, 1);
    assert_eq!(engine.flow_count(), 0);
}

#[test]
fn packet_budget_forces_port_giveup() {
    let config = Config {
        packets_limit_per_flow: 2,
        ..Config::default()
    };
    let mut engine = Engine::new(DetectionModule::new(config).unwrap());
    let payload = [0u8; 8];
    let packet = Packet {
        timestamp_ms: 1_000,
        ip: v4([10, 0, 0, 1], [10, 0, 0, 2]),
        transport: Transport::Udp,
        src_port: 40_000,
        dst_port: 53,
        vlan_id: 0,
        payload: &payload,
    };
    let flow = engine.process_packet(&packet).unwrap();
    assert!(!flow.has_verdict());
    let flow = engine.process_packet(&packet).unwrap();
    assert!(flow.has_verdict());
    assert_eq!(flow.confidence(), Confidence::MatchByPort);
    assert_eq!(flow.master_protocol(), ProtocolId::DNS);
}

#[test]
fn dropped_packets_are_counted() {
    let config = Config {
        max_flows: 1,
        num_roots: 4,
        ..Config::default()
    };
    let mut engine = Engine::new(DetectionModule::new(config).unwrap());
    let payload = [0u8; 8];
    let first = Packet {
        timestamp_ms: 1_000,
        ip: v4([10, 0, 0, 1], [10, 0, 0, 2]),
        transport: Transport::Udp,
        src_port: 40_000,
        dst_port: 53,
        vlan_id: 0,
        payload: &payload,
    };
    let second = Packet {
        src_port: 40_001,
        ..first
    };
    assert!(engine.process_packet(&first).is_ok());
    assert!(matches!(
        engine.process_packet(&second),
        Err(DpiError::FlowTableFull)
    ));
    assert_eq!(engine.stats().packets_processed, 2);
    assert_eq!(engine.stats().packets_dropped, 1);
    assert_eq!(engine.flow_count(), 1);
}

#[test]
fn payload_sample_is_kept_when_tracking_is_enabled() {
    let config = Config {
        track_payload: true,
        ..Config::default()
    };
    let mut engine = Engine::new(DetectionModule::new(config).unwrap());
    let payload = [7u8; 8];
    let packet = Packet {
        timestamp_ms: 1_000,
        ip: v4([10, 0, 0, 1], [10, 0, 0, 2]),
        transport: Transport::Udp,
        src_port: 40_000,
        dst_port: 53,
        vlan_id: 0,
        payload: &payload,
    };
    let flow = engine.process_packet(&packet).unwrap();
    assert_eq!(flow.payload_sample.as_deref(), Some(&payload[..]));
}

#[test]
fn config_loads_from_toml() {
    let path = std::env::temp_dir().join("flowsector_config_test.toml");
    std::fs::write(
        &path,
        "dns_subclassification_enabled = false\nnum_roots = 64\naddress_cache_size = 32\n",
    )
    .unwrap();
    let config = Config::load_from_path(&path).unwrap();
    assert!(!config.dns_subclassification_enabled);
    assert_eq!(config.num_roots, 64);
    assert_eq!(config.address_cache_size, 32);
    // Untouched options keep their defaults.
    assert!(config.dns_parse_response_enabled);
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn lru_cache_expires_and_evicts() {
    use flowsector::AddressCache;

    let mut cache = AddressCache::new(2);
    let a = IpAddr::V4([1, 1, 1, 1].into());
    let b = IpAddr::V4([2, 2, 2, 2].into());
    let c = IpAddr::V4([3, 3, 3, 3].into());

    cache.put(a, "a.example".into(), 0, 60);
    cache.put(b, "b.example".into(), 0, 60);
    assert_eq!(cache.get(&a, 1).map(String::as_str), Some("a.example"));

    // `b` is now the least recently touched entry and gets evicted.
    cache.put(c, "c.example".into(), 1, 60);
    assert_eq!(cache.len(), 2);
    assert!(cache.get(&b, 1).is_none());
    assert!(cache.get(&a, 1).is_some());

    // Entries disappear once their clamped TTL passes.
    assert!(cache.get(&a, 10_000).is_none());
}

#[test]
fn invalid_configuration_is_rejected() {
    let config = Config {
        num_roots: 3,
        ..Config::default()
    };
    assert!(DetectionModule::new(config).is_err());
    let config = Config {
        max_flows: 0,
        ..Config::default()
    };
    assert!(DetectionModule::new(config).is_err());
}
