use log::{debug, trace};

use crate::commons::{Addr, BusOp, BusResponse, CoherenceState, DataSource, SystemSpec};
use crate::memory::Memory;
use crate::processor::Processor;
use crate::trace::Tracer;

/// How a snooper contributes data to a bus transaction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Supply {
    /// Nothing to contribute.
    None,
    /// Supplies its cached word; reported as a cache-to-cache transfer.
    Cache,
    /// Supplies its cached word, but the copy is clean, so the transfer is
    /// reported as coming from memory.
    MemoryEquivalent,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SnoopAction {
    pub next: CoherenceState,
    pub supply: Supply,
}

/// The snooper side of the protocol as a literal table:
/// (bus operation, snooper state) -> (next state, data contribution).
/// Only called for lines that actually hold the broadcast address.
pub fn snoop_transition(op: BusOp, state: CoherenceState) -> SnoopAction {
    use crate::commons::CoherenceState::*;
    let (next, supply) = match (op, state) {
        (BusOp::BusRd, Modified) => (Owned, Supply::Cache),
        (BusOp::BusRd, Owned) => (Owned, Supply::Cache),
        (BusOp::BusRd, Exclusive) => (Shared, Supply::MemoryEquivalent),
        (BusOp::BusRd, Shared) => (Shared, Supply::None),
        (BusOp::BusRdX, Modified | Owned | Exclusive) => (Invalid, Supply::Cache),
        (BusOp::BusRdX, Shared) => (Invalid, Supply::None),
        (BusOp::BusUpgr, _) => (Invalid, Supply::None),
        (BusOp::BusWB(_), s) => (s, Supply::None),
        (_, Invalid) => (Invalid, Supply::None),
    };
    SnoopAction { next, supply }
}

/// Data-source arbitration rank among cache suppliers. Memory is the
/// fallback below all of these; ties cannot occur because M, O and E copies
/// are unique per address.
fn supply_rank(state: CoherenceState) -> u8 {
    match state {
        CoherenceState::Modified => 3,
        CoherenceState::Owned => 2,
        CoherenceState::Exclusive => 1,
        CoherenceState::Shared | CoherenceState::Invalid => 0,
    }
}

/// The broadcast medium, borrowed for the duration of one CPU operation.
/// The initiating core is split out of the core array; `left` and `right`
/// hold the snoopers on either side of it, so iterating `left` then `right`
/// visits every other core in ascending id order.
pub struct Bus<'a> {
    pub(crate) initiator: usize,
    pub(crate) left: &'a mut [Processor],
    pub(crate) right: &'a mut [Processor],
    pub(crate) memory: &'a mut Memory,
    pub(crate) tracer: &'a mut Tracer,
    pub(crate) specs: &'a SystemSpec,
}

impl<'a> Bus<'a> {
    pub fn new(
        initiator: usize,
        left: &'a mut [Processor],
        right: &'a mut [Processor],
        memory: &'a mut Memory,
        tracer: &'a mut Tracer,
        specs: &'a SystemSpec,
    ) -> Self {
        Bus {
            initiator,
            left,
            right,
            memory,
            tracer,
            specs,
        }
    }

    /// Broadcast `op` for `addr` on behalf of the initiator: visit every
    /// other core in ascending id order, apply the snooper-side transitions,
    /// arbitrate the data source, and compute the state the requester must
    /// adopt.
    pub fn broadcast(&mut self, op: BusOp, addr: Addr) -> BusResponse {
        debug!("bus: CPU {} broadcasts {} @ {:#x}", self.initiator, op, addr);

        // Write-back involves no snoopers: the initiator's dirty word goes
        // straight to memory.
        if let BusOp::BusWB(value) = op {
            self.memory.write(addr, value);
            self.tracer.write_back(self.initiator, addr, value);
            return BusResponse {
                data: value,
                source: DataSource::Memory,
                requester_state: CoherenceState::Invalid,
            };
        }

        let index = addr.index(self.specs);
        let mut any_match = false;
        // (arbitration rank, core id, word) of the best cache supplier so far
        let mut cache_supply: Option<(u8, usize, i32)> = None;
        // word offered by a clean Exclusive snooper on BusRd
        let mut clean_supply: Option<i32> = None;

        let tracer = &mut *self.tracer;
        for snooper in self.left.iter_mut().chain(self.right.iter_mut()) {
            let line = snooper.cache.line_mut(index);
            if !line.holds(addr) {
                continue;
            }
            any_match = true;
            let present = line.state;
            let action = snoop_transition(op, present);
            trace!(
                "bus: CPU {} snoops {} @ {:#x} in {} -> {}",
                snooper.id,
                op,
                addr,
                present,
                action.next
            );

            tracer.snoop_hit(snooper.id, addr, index, present);
            if action.next != present {
                tracer.snoop_transition(snooper.id, present, action.next);
            }

            // An upgrade can only be initiated from a Shared or Owned copy,
            // which rules out a Modified copy elsewhere.
            debug_assert!(
                !(matches!(op, BusOp::BusUpgr) && present == CoherenceState::Modified),
                "upgrade for {:#x} raced a modified copy in core {}",
                addr,
                snooper.id
            );

            match action.supply {
                Supply::Cache => {
                    let rank = supply_rank(present);
                    debug_assert!(
                        cache_supply.map_or(true, |(r, _, _)| r != rank),
                        "two snoopers at the same supply rank for {:#x}",
                        addr
                    );
                    if cache_supply.map_or(true, |(r, _, _)| rank > r) {
                        cache_supply = Some((rank, snooper.id, line.value));
                    }
                }
                Supply::MemoryEquivalent => clean_supply = Some(line.value),
                Supply::None => {}
            }

            if action.next == CoherenceState::Invalid {
                snooper.stats.invalidations += 1;
            }
            line.state = action.next;
        }

        match op {
            BusOp::BusRd => {
                let (data, source) = if let Some((_, core, data)) = cache_supply {
                    (data, DataSource::Core(core))
                } else if let Some(data) = clean_supply {
                    // clean copy, equal to memory by definition
                    (data, DataSource::Memory)
                } else {
                    (self.memory.read(addr), DataSource::Memory)
                };
                let requester_state = if any_match {
                    CoherenceState::Shared
                } else {
                    CoherenceState::Exclusive
                };
                BusResponse {
                    data,
                    source,
                    requester_state,
                }
            }
            BusOp::BusRdX => {
                let (data, source) = if let Some((_, core, data)) = cache_supply {
                    (data, DataSource::Core(core))
                } else {
                    (self.memory.read(addr), DataSource::Memory)
                };
                BusResponse {
                    data,
                    source,
                    requester_state: CoherenceState::Modified,
                }
            }
            BusOp::BusUpgr => BusResponse {
                data: 0,
                source: DataSource::Memory,
                requester_state: CoherenceState::Modified,
            },
            BusOp::BusWB(_) => unreachable!("write-back handled above"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commons::CoherenceState::*;

    fn action(op: BusOp, state: CoherenceState) -> (CoherenceState, Supply) {
        let a = snoop_transition(op, state);
        (a.next, a.supply)
    }

    #[test]
    fn bus_rd_table() {
        assert_eq!(action(BusOp::BusRd, Modified), (Owned, Supply::Cache));
        assert_eq!(action(BusOp::BusRd, Owned), (Owned, Supply::Cache));
        assert_eq!(action(BusOp::BusRd, Exclusive), (Shared, Supply::MemoryEquivalent));
        assert_eq!(action(BusOp::BusRd, Shared), (Shared, Supply::None));
    }

    #[test]
    fn bus_rdx_invalidates_everything() {
        for state in [Modified, Owned, Exclusive] {
            assert_eq!(action(BusOp::BusRdX, state), (Invalid, Supply::Cache));
        }
        assert_eq!(action(BusOp::BusRdX, Shared), (Invalid, Supply::None));
    }

    #[test]
    fn bus_upgr_invalidates_without_data() {
        for state in [Owned, Exclusive, Shared] {
            assert_eq!(action(BusOp::BusUpgr, state), (Invalid, Supply::None));
        }
    }

    #[test]
    fn write_back_is_not_snooped() {
        for state in [Modified, Owned, Exclusive, Shared, Invalid] {
            assert_eq!(action(BusOp::BusWB(7), state), (state, Supply::None));
        }
    }

    #[test]
    fn supplier_priority_order() {
        assert!(supply_rank(Modified) > supply_rank(Owned));
        assert!(supply_rank(Owned) > supply_rank(Exclusive));
        assert!(supply_rank(Exclusive) > supply_rank(Shared));
    }
}
