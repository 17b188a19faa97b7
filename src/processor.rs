use log::debug;

use crate::bus::Bus;
use crate::cache::Cache;
use crate::commons::{Addr, AtomicOp, BusOp, CoherenceState, CpuOp, SystemSpec, Word};
use crate::stats::CoreStats;

/// A simulated CPU core with its private direct-mapped cache. The core
/// drives the bus for misses, upgrades and write-backs; it never touches
/// memory or other caches directly.
pub struct Processor {
    pub id: usize,
    pub cache: Cache,
    pub stats: CoreStats,
}

impl Processor {
    pub fn new(id: usize, specs: SystemSpec) -> Self {
        Processor {
            id,
            cache: Cache::new(specs),
            stats: CoreStats::default(),
        }
    }

    /// Execute one CPU operation. The caller holds the system-wide
    /// serialization lock for the whole call, which is what makes atomic
    /// read-modify-writes atomic across cores.
    pub fn execute(&mut self, bus: &mut Bus<'_>, op: CpuOp, addr: Addr) {
        match op {
            CpuOp::Read => self.read(bus, addr),
            CpuOp::Write(value) => self.write(bus, addr, value),
            CpuOp::Atomic(op, operand) => self.atomic(bus, addr, op, operand),
        }
    }

    fn read(&mut self, bus: &mut Bus<'_>, addr: Addr) {
        self.stats.loads += 1;
        let (index, hit) = self.cache.lookup(addr);
        let present = self.cache.line(index).state;
        bus.tracer.access(self.id, hit, addr, index, present);

        if hit {
            self.stats.hits += 1;
            let line = self.cache.line(index);
            bus.tracer.done(self.id, line.value, line.state);
            return;
        }

        self.stats.misses += 1;
        self.write_back_if_dirty(bus, index);
        let present = self.cache.line(index).state;

        bus.tracer.bus_request(self.id, &BusOp::BusRd, addr);
        self.stats.bus_ops += 1;
        let resp = bus.broadcast(BusOp::BusRd, addr);

        let line = self.cache.line_mut(index);
        line.tag = Some(addr);
        line.value = resp.data;
        line.state = resp.requester_state;

        bus.tracer.bus_response(self.id, resp.data, &resp.source);
        bus.tracer.transition(self.id, present, resp.requester_state);
        bus.tracer.done(self.id, resp.data, resp.requester_state);
    }

    fn write(&mut self, bus: &mut Bus<'_>, addr: Addr, value: Word) {
        self.stats.stores += 1;
        let (index, hit) = self.cache.lookup(addr);
        let present = self.cache.line(index).state;
        bus.tracer.access(self.id, hit, addr, index, present);

        if !hit {
            self.stats.misses += 1;
            self.write_back_if_dirty(bus, index);
            let present = self.cache.line(index).state;

            bus.tracer.bus_request(self.id, &BusOp::BusRdX, addr);
            self.stats.bus_ops += 1;
            let resp = bus.broadcast(BusOp::BusRdX, addr);

            // the fetched word is immediately overwritten by the store
            let line = self.cache.line_mut(index);
            line.tag = Some(addr);
            line.value = value;
            line.state = resp.requester_state;

            bus.tracer.bus_response(self.id, resp.data, &resp.source);
            bus.tracer.transition(self.id, present, resp.requester_state);
        } else {
            self.stats.hits += 1;
            match present {
                CoherenceState::Shared | CoherenceState::Owned => {
                    bus.tracer.bus_request(self.id, &BusOp::BusUpgr, addr);
                    self.stats.bus_ops += 1;
                    bus.broadcast(BusOp::BusUpgr, addr);
                    bus.tracer.upgrade_complete(self.id);

                    let line = self.cache.line_mut(index);
                    line.value = value;
                    line.state = CoherenceState::Modified;
                    bus.tracer.transition(self.id, present, CoherenceState::Modified);
                }
                CoherenceState::Exclusive => {
                    let line = self.cache.line_mut(index);
                    line.value = value;
                    line.state = CoherenceState::Modified;
                    bus.tracer.transition(self.id, present, CoherenceState::Modified);
                }
                CoherenceState::Modified => {
                    self.cache.line_mut(index).value = value;
                }
                CoherenceState::Invalid => unreachable!("hit on an invalid line"),
            }
        }

        let line = self.cache.line(index);
        bus.tracer.done(self.id, line.value, line.state);
    }

    fn atomic(&mut self, bus: &mut Bus<'_>, addr: Addr, op: AtomicOp, operand: Word) {
        self.stats.atomics += 1;
        let (index, hit) = self.cache.lookup(addr);
        let present = self.cache.line(index).state;
        bus.tracer.access(self.id, hit, addr, index, present);

        // acquire exclusive ownership, same state logic as a store
        if !hit {
            self.stats.misses += 1;
            self.write_back_if_dirty(bus, index);
            let present = self.cache.line(index).state;

            bus.tracer.bus_request(self.id, &BusOp::BusRdX, addr);
            self.stats.bus_ops += 1;
            let resp = bus.broadcast(BusOp::BusRdX, addr);

            let line = self.cache.line_mut(index);
            line.tag = Some(addr);
            line.value = resp.data;
            line.state = resp.requester_state;

            bus.tracer.bus_response(self.id, resp.data, &resp.source);
            bus.tracer.transition(self.id, present, resp.requester_state);
        } else {
            self.stats.hits += 1;
            match present {
                CoherenceState::Shared | CoherenceState::Owned => {
                    bus.tracer.bus_request(self.id, &BusOp::BusUpgr, addr);
                    self.stats.bus_ops += 1;
                    bus.broadcast(BusOp::BusUpgr, addr);
                    bus.tracer.upgrade_complete(self.id);
                    self.cache.line_mut(index).state = CoherenceState::Modified;
                    bus.tracer.transition(self.id, present, CoherenceState::Modified);
                }
                CoherenceState::Exclusive => {
                    self.cache.line_mut(index).state = CoherenceState::Modified;
                    bus.tracer.transition(self.id, present, CoherenceState::Modified);
                }
                CoherenceState::Modified => {}
                CoherenceState::Invalid => unreachable!("hit on an invalid line"),
            }
        }

        // ownership is exclusive now; the primitive runs on the cached word
        let line = self.cache.line_mut(index);
        let old = line.value;
        line.value = op.apply(old, operand);
        let new = line.value;
        debug!(
            "core {}: atomic {} @ {:#x}: {:#x} -> {:#x}",
            self.id,
            op.name(),
            addr,
            old,
            new
        );
        bus.tracer.atomic_apply(self.id, &op, old, operand, new);
        bus.tracer.done(self.id, new, CoherenceState::Modified);
    }

    /// Conflict-miss eviction: a dirty line (M or O) must flush its word to
    /// memory before the slot is reused. Clean lines are simply overwritten.
    fn write_back_if_dirty(&mut self, bus: &mut Bus<'_>, index: usize) {
        let line = self.cache.line(index);
        if !line.is_dirty() {
            return;
        }
        let old_addr = line.tag.expect("dirty line without a tag");
        let value = line.value;

        bus.tracer.eviction(self.id);
        bus.tracer.bus_request(self.id, &BusOp::BusWB(value), old_addr);
        self.stats.bus_ops += 1;
        self.stats.write_backs += 1;
        bus.broadcast(BusOp::BusWB(value), old_addr);

        self.cache.line_mut(index).state = CoherenceState::Invalid;
    }
}
