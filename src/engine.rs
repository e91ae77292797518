use std::cell::RefCell;
use std::net::IpAddr;

use anyhow::Result;
use tracing::trace;

use crate::cache::{AddressCache, FpcDnsCache};
use crate::config::Config;
use crate::dissector::{builtin_dissectors, DissectorEntry, ExtraStatus};
use crate::errors::DpiError;
use crate::flow::{ExtraDissection, Flow};
use crate::flow_table::FlowTable;
use crate::packet::Packet;
use crate::protocol::ProtocolId;
use crate::risk::Risk;

/// Bytes retained per flow when payload tracking is enabled.
const PAYLOAD_SAMPLE_LEN: usize = 80;

/// Hook deciding whether a name looks machine-generated.
pub type DgaDetector = fn(&str) -> bool;

/// Read-mostly detection state shared by every flow: configuration, the
/// dissector registry, the host match table and the caches.
///
/// The caches take interior mutability so dissectors, which only ever see
/// `&DetectionModule`, can still publish into them; updates are serialized
/// by the single dissection thread that owns the module.
pub struct DetectionModule {
    config: Config,
    dissectors: Vec<DissectorEntry>,
    host_matches: Vec<(String, ProtocolId)>,
    dga_detector: Option<DgaDetector>,
    address_cache: Option<RefCell<AddressCache>>,
    fpc_dns_cache: Option<RefCell<FpcDnsCache>>,
}

impl DetectionModule {
    pub fn new(config: Config) -> Result<DetectionModule> {
        config.validate()?;
        let address_cache = match config.address_cache_size {
            0 => None,
            n => Some(RefCell::new(AddressCache::new(n))),
        };
        let fpc_dns_cache = match config.fpc_dns_cache_size {
            0 => None,
            n => Some(RefCell::new(FpcDnsCache::new(n))),
        };
        Ok(DetectionModule {
            config,
            dissectors: builtin_dissectors(),
            host_matches: Vec::new(),
            dga_detector: None,
            address_cache,
            fpc_dns_cache,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn dissectors(&self) -> &[DissectorEntry] {
        &self.dissectors
    }

    /// Registers a hostname suffix mapping to an app protocol. Matching is
    /// done on label boundaries.
    pub fn register_host_protocol(&mut self, suffix: &str, app: ProtocolId) {
        self.host_matches.push((suffix.to_ascii_lowercase(), app));
    }

    pub fn set_dga_detector(&mut self, detector: DgaDetector) {
        self.dga_detector = Some(detector);
    }

    /// Longest-suffix match of an extracted hostname against the host
    /// protocol table.
    pub fn match_host_subprotocol(&self, host: &str) -> ProtocolId {
        self.host_matches
            .iter()
            .filter(|(suffix, _)| {
                host.len() >= suffix.len()
                    && host.ends_with(suffix.as_str())
                    && (host.len() == suffix.len()
                        || host.as_bytes()[host.len() - suffix.len() - 1] == b'.')
            })
            .max_by_key(|(suffix, _)| suffix.len())
            .map(|(_, app)| *app)
            .unwrap_or(ProtocolId::UNKNOWN)
    }

    /// Runs the injected DGA detector and flags the flow on a hit.
    pub fn check_dga_name(&self, flow: &mut Flow, host: &str) {
        if let Some(detector) = self.dga_detector {
            if detector(host) {
                flow.risks
                    .set(Risk::SuspiciousDgaDomain, Some("DGA pattern"));
            }
        }
    }

    /// Records an answered address so later traffic to it can be tied back
    /// to the hostname that resolved to it.
    pub fn cache_address(&self, addr: IpAddr, host: &str, now_s: u64, ttl_s: u32) {
        if let Some(cache) = &self.address_cache {
            cache
                .borrow_mut()
                .put(addr, host.to_owned(), now_s, ttl_s as u64);
        }
    }

    pub fn cached_hostname(&self, addr: IpAddr, now_s: u64) -> Option<String> {
        self.address_cache
            .as_ref()
            .and_then(|cache| cache.borrow_mut().get(&addr, now_s).cloned())
    }

    pub fn fpc_dns_insert(&self, addr: IpAddr, app: ProtocolId, now_s: u64) {
        if let Some(cache) = &self.fpc_dns_cache {
            cache.borrow_mut().put(addr, app, now_s, MAX_FPC_TTL_S);
        }
    }

    pub fn fpc_dns_lookup(&self, addr: IpAddr, now_s: u64) -> Option<ProtocolId> {
        self.fpc_dns_cache
            .as_ref()
            .and_then(|cache| cache.borrow_mut().get(&addr, now_s).copied())
    }

    /// Runs the registered dissectors over one packet of `flow`.
    ///
    /// A flow awaiting extra dissection goes to its continuation instead;
    /// once a verdict is set and no continuation is pending, the packet is
    /// left alone.
    pub fn dissect_packet(&self, flow: &mut Flow, packet: &Packet) {
        if let ExtraDissection::AwaitingResponse { protocol, budget } = flow.extra {
            if let Some(entry) = self.dissectors.iter().find(|e| e.protocol == protocol) {
                if let Some(extra) = entry.extra {
                    trace!(dissector = entry.name, budget, "extra dissection");
                    let status = extra(self, flow, packet);
                    flow.extra = match (status, budget) {
                        (ExtraStatus::Done, _) | (_, 0..=1) => ExtraDissection::Done,
                        (ExtraStatus::NeedMore, budget) => ExtraDissection::AwaitingResponse {
                            protocol,
                            budget: budget - 1,
                        },
                    };
                    return;
                }
            }
            flow.extra = ExtraDissection::Done;
            return;
        }
        if flow.has_verdict() {
            return;
        }
        for entry in &self.dissectors {
            if flow.has_verdict() {
                break;
            }
            if flow.is_protocol_excluded(entry.protocol) {
                continue;
            }
            if !entry.selection.matches(packet) {
                continue;
            }
            trace!(dissector = entry.name, "dissecting");
            (entry.dissect)(self, flow, packet);
        }
    }
}

/// Lifetime of an FPC-DNS association.
const MAX_FPC_TTL_S: u64 = 3600;

/// Counters published by the engine.
#[derive(Copy, Clone, Debug, Default)]
pub struct EngineStats {
    pub packets_processed: u64,
    /// Packets that could not be attached to a flow (table full).
    pub packets_dropped: u64,
}

/// Packet-to-verdict workflow: fingerprint, flow correlation, dispatch,
/// end-of-capture finalization.
pub struct Engine {
    module: DetectionModule,
    table: FlowTable,
    stats: EngineStats,
}

impl Engine {
    pub fn new(module: DetectionModule) -> Engine {
        let table = FlowTable::new(module.config().num_roots, module.config().max_flows);
        Engine {
            module,
            table,
            stats: EngineStats::default(),
        }
    }

    pub fn module(&self) -> &DetectionModule {
        &self.module
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn flow_count(&self) -> usize {
        self.table.len()
    }

    /// Feeds one captured packet through the pipeline and returns the flow
    /// it was attached to.
    ///
    /// A full table counts the packet and reports
    /// [`DpiError::FlowTableFull`]; the caller is expected to carry on with
    /// the next packet.
    pub fn process_packet(&mut self, packet: &Packet) -> Result<&Flow, DpiError> {
        self.stats.packets_processed += 1;
        let key = packet.fingerprint();
        let (flow, direction) = match self.table.find_or_insert(key, packet.timestamp_ms) {
            Ok(found) => found,
            Err(e) => {
                self.stats.packets_dropped += 1;
                return Err(e);
            }
        };
        flow.account_packet(direction, packet);
        if self.module.config().track_payload
            && flow.payload_sample.is_none()
            && !packet.payload.is_empty()
        {
            let n = packet.payload.len().min(PAYLOAD_SAMPLE_LEN);
            flow.payload_sample = Some(packet.payload[..n].to_vec());
        }
        self.module.dissect_packet(flow, packet);
        if !flow.has_verdict()
            && flow.packet_counter >= self.module.config().packets_limit_per_flow
        {
            Self::give_up_on(&self.module, flow);
        }
        Ok(flow)
    }

    /// Visits every live flow without destroying it.
    pub fn walk_flows<F: FnMut(&mut Flow)>(&mut self, visitor: F) {
        self.table.walk(visitor);
    }

    /// End-of-capture traversal: flows without a verdict get their
    /// dissectors' give-up pass, then every flow is handed to the visitor
    /// and destroyed.
    pub fn finalize<F: FnMut(Flow)>(&mut self, mut visitor: F) {
        let module = &self.module;
        self.table.drain(|mut flow| {
            if !flow.has_verdict() {
                Self::give_up_on(module, &mut flow);
            }
            visitor(flow);
        });
    }

    fn give_up_on(module: &DetectionModule, flow: &mut Flow) {
        for entry in module.dissectors() {
            if flow.has_verdict() {
                break;
            }
            if let Some(give_up) = entry.give_up {
                give_up(module, flow);
            }
        }
    }
}
