use std::collections::BTreeMap;
use std::mem;
use std::net::IpAddr;

use rand::Rng;

use crate::errors::DpiError;
use crate::flow::{Direction, Flow, FlowKey};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

#[inline]
fn fnv1a(h: u64, b: u8) -> u64 {
    (h ^ b as u64).wrapping_mul(FNV_PRIME)
}

/// Hash-bucketed collection of ordered trees keyed by flow fingerprint.
///
/// `num_roots` parallel trees bound per-packet rebalancing cost; a flow's
/// root is chosen by a seeded fingerprint hash. Lookups try the exact key
/// first and then the reversed key, so replies join the flow their request
/// created.
#[derive(Debug)]
pub struct FlowTable {
    roots: Vec<BTreeMap<FlowKey, Flow>>,
    root_mask: u64,
    max_flows: usize,
    len: usize,
    hash_seed: u64,
}

impl FlowTable {
    /// `num_roots` must be a power of two.
    pub fn new(num_roots: usize, max_flows: usize) -> FlowTable {
        debug_assert!(num_roots.is_power_of_two());
        FlowTable {
            roots: (0..num_roots).map(|_| BTreeMap::new()).collect(),
            root_mask: num_roots as u64 - 1,
            max_flows,
            len: 0,
            hash_seed: rand::thread_rng().gen(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn num_roots(&self) -> usize {
        self.roots.len()
    }

    fn endpoint_hash(seed: u64, addr: IpAddr, port: u16) -> u64 {
        let mut h = seed ^ FNV_OFFSET;
        match addr {
            IpAddr::V4(v4) => {
                for &b in &v4.octets() {
                    h = fnv1a(h, b);
                }
            }
            IpAddr::V6(v6) => {
                for &b in &v6.octets() {
                    h = fnv1a(h, b);
                }
            }
        }
        h = fnv1a(h, (port >> 8) as u8);
        fnv1a(h, port as u8)
    }

    /// Seeded FNV-1a over the fingerprint. The two endpoint hashes are
    /// combined with XOR so that a reply, whose endpoints are swapped,
    /// lands in the same root as the request.
    fn fingerprint_hash(&self, key: &FlowKey) -> u64 {
        let a = Self::endpoint_hash(self.hash_seed, key.src_addr, key.src_port);
        let b = Self::endpoint_hash(self.hash_seed, key.dst_addr, key.dst_port);
        (a ^ b)
            .wrapping_mul(FNV_PRIME)
            ^ ((key.transport as u64) << 17)
            ^ ((key.vlan_id as u64) << 1)
    }

    fn root_of(&self, key: &FlowKey) -> usize {
        (self.fingerprint_hash(key) & self.root_mask) as usize
    }

    /// Returns the flow this fingerprint belongs to and the direction the
    /// packet is traveling, creating the flow when the table has room.
    pub fn find_or_insert(
        &mut self,
        key: FlowKey,
        now_ms: u64,
    ) -> Result<(&mut Flow, Direction), DpiError> {
        let root = self.root_of(&key);
        let (slot, direction) = if self.roots[root].contains_key(&key) {
            (key, Direction::Original)
        } else {
            let reversed = key.reversed();
            if self.roots[root].contains_key(&reversed) {
                (reversed, Direction::Reply)
            } else {
                if self.len >= self.max_flows {
                    return Err(DpiError::FlowTableFull);
                }
                self.len += 1;
                self.roots[root].insert(key, Flow::new(key, now_ms));
                (key, Direction::Original)
            }
        };
        let flow = self.roots[root].get_mut(&slot).expect("flow just located");
        Ok((flow, direction))
    }

    /// Visits every flow once, in key order within each root.
    pub fn walk<F: FnMut(&mut Flow)>(&mut self, mut visitor: F) {
        for root in &mut self.roots {
            for flow in root.values_mut() {
                visitor(flow);
            }
        }
    }

    /// Destructive teardown: every flow is handed to the visitor and the
    /// table is left empty.
    pub fn drain<F: FnMut(Flow)>(&mut self, mut visitor: F) {
        for root in &mut self.roots {
            for (_, flow) in mem::take(root) {
                visitor(flow);
            }
        }
        self.len = 0;
    }
}
