use std::collections::HashMap;
use std::sync::Mutex;

use log::info;
use thiserror::Error;

use crate::bus::Bus;
use crate::cache::CacheLine;
use crate::commons::{Addr, CoherenceState, CpuOp, SystemSpec, Word};
use crate::memory::Memory;
use crate::processor::Processor;
use crate::stats::{summary_table, CoreStats};
use crate::trace::Tracer;

/// A coherence invariant broken by a bus-internal inconsistency. Reaching
/// any of these is a simulator bug, not a recoverable condition; debug
/// builds check after every operation and panic with the violation.
#[derive(Debug, Error)]
pub enum CoherenceViolation {
    #[error("address {addr:#x}: modified copy in core {holder} coexists with a valid copy in core {other}")]
    ModifiedNotSole { addr: Addr, holder: usize, other: usize },
    #[error("address {addr:#x}: exclusive copy in core {holder} coexists with a valid copy in core {other}")]
    ExclusiveNotSole { addr: Addr, holder: usize, other: usize },
    #[error("address {addr:#x}: owned copies in cores {first} and {second}")]
    MultipleOwners { addr: Addr, first: usize, second: usize },
    #[error("address {addr:#x}: core {core} caches {cached:#x} but no dirty owner exists and memory holds {memory:#x}")]
    StaleMemory { addr: Addr, core: usize, cached: Word, memory: Word },
    #[error("core {core}: line {index} is valid but untagged")]
    UntaggedValid { core: usize, index: usize },
    #[error("core {core}: tag {tag:#x} does not map to line {index}")]
    IndexMismatch { core: usize, tag: Addr, index: usize },
    #[error("core {core}: tag {tag:#x} is misaligned or outside memory")]
    TagOutOfRange { core: usize, tag: Addr },
}

struct Shared {
    cores: Vec<Processor>,
    memory: Memory,
    tracer: Tracer,
}

impl Shared {
    fn execute(&mut self, specs: &SystemSpec, core_id: usize, op: CpuOp, addr: Addr) {
        self.tracer.banner(core_id, &op, addr);

        let (left, rest) = self.cores.split_at_mut(core_id);
        let (core, right) = rest.split_first_mut().expect("core id out of range");
        let mut bus = Bus::new(core_id, left, right, &mut self.memory, &mut self.tracer, specs);
        core.execute(&mut bus, op, addr);
    }

    fn verify(&self, specs: &SystemSpec) -> Result<(), CoherenceViolation> {
        // valid copies grouped by address: (core, state, value)
        let mut copies: HashMap<i32, Vec<(usize, CoherenceState, Word)>> = HashMap::new();

        for core in &self.cores {
            for (index, line) in core.cache.lines().iter().enumerate() {
                if line.state == CoherenceState::Invalid {
                    continue;
                }
                let tag = line.tag.ok_or(CoherenceViolation::UntaggedValid {
                    core: core.id,
                    index,
                })?;
                let in_range = tag.0 >= 0 && tag.word_index(specs) < specs.memory_words;
                if !tag.is_aligned(specs) || !in_range {
                    return Err(CoherenceViolation::TagOutOfRange { core: core.id, tag });
                }
                if tag.index(specs) != index {
                    return Err(CoherenceViolation::IndexMismatch {
                        core: core.id,
                        tag,
                        index,
                    });
                }
                copies.entry(tag.0).or_default().push((core.id, line.state, line.value));
            }
        }

        for (&raw, holders) in &copies {
            let addr = Addr(raw);
            let find = |wanted: CoherenceState| {
                holders.iter().find(|(_, s, _)| *s == wanted).map(|(c, _, _)| *c)
            };
            let other_than = |id: usize| {
                holders.iter().find(|(c, _, _)| *c != id).map(|(c, _, _)| *c)
            };

            if let Some(holder) = find(CoherenceState::Modified) {
                if let Some(other) = other_than(holder) {
                    return Err(CoherenceViolation::ModifiedNotSole { addr, holder, other });
                }
            }
            if let Some(holder) = find(CoherenceState::Exclusive) {
                if let Some(other) = other_than(holder) {
                    return Err(CoherenceViolation::ExclusiveNotSole { addr, holder, other });
                }
            }
            let owners: Vec<usize> = holders
                .iter()
                .filter(|(_, s, _)| *s == CoherenceState::Owned)
                .map(|(c, _, _)| *c)
                .collect();
            if owners.len() > 1 {
                return Err(CoherenceViolation::MultipleOwners {
                    addr,
                    first: owners[0],
                    second: owners[1],
                });
            }

            let dirty = holders.iter().any(|(_, s, _)| {
                matches!(s, CoherenceState::Modified | CoherenceState::Owned)
            });
            if !dirty {
                let expected = self.memory.read(addr);
                for &(core, _, cached) in holders {
                    if cached != expected {
                        return Err(CoherenceViolation::StaleMemory {
                            addr,
                            core,
                            cached,
                            memory: expected,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// One memory, one bus, N cores. All CPU operations are funneled through a
/// single serialization lock, so coherence events form a total order and
/// atomic read-modify-writes are uninterruptible, even when callers drive
/// the cores from one host thread each.
pub struct System {
    specs: SystemSpec,
    shared: Mutex<Shared>,
}

impl System {
    pub fn new(specs: SystemSpec) -> Self {
        System::with_tracer(specs, Tracer::stdout())
    }

    pub fn with_tracer(specs: SystemSpec, tracer: Tracer) -> Self {
        assert!(specs.num_cores > 0, "a system needs at least one core");
        info!(
            "system: {} cores, {} lines/cache, {} memory words",
            specs.num_cores, specs.cache_lines, specs.memory_words
        );
        let cores = (0..specs.num_cores).map(|id| Processor::new(id, specs)).collect();
        System {
            specs,
            shared: Mutex::new(Shared {
                cores,
                memory: Memory::new(specs),
                tracer,
            }),
        }
    }

    pub fn specs(&self) -> &SystemSpec {
        &self.specs
    }

    pub fn num_cores(&self) -> usize {
        self.specs.num_cores
    }

    /// Execute one CPU operation on the given core. Blocks until the
    /// system-wide serialization lock is available; the lock spans the whole
    /// operation, bus traffic included.
    pub fn execute(&self, core_id: usize, op: CpuOp, addr: Addr) {
        assert!(core_id < self.specs.num_cores, "no such core: {}", core_id);
        debug_assert!(addr.is_aligned(&self.specs), "misaligned address {:#x}", addr);
        debug_assert!(
            addr.0 >= 0 && addr.word_index(&self.specs) < self.specs.memory_words,
            "address {:#x} outside memory",
            addr
        );

        let mut shared = self.shared.lock().unwrap();
        shared.execute(&self.specs, core_id, op, addr);

        #[cfg(debug_assertions)]
        {
            if let Err(violation) = shared.verify(&self.specs) {
                panic!("coherence violated: {}", violation);
            }
        }
    }

    /// Check every coherence invariant over the current caches and memory.
    pub fn check_coherence(&self) -> Result<(), CoherenceViolation> {
        let shared = self.shared.lock().unwrap();
        shared.verify(&self.specs)
    }

    /// Read a memory word directly, bypassing the caches. Driver- and
    /// test-facing; does not model a CPU operation.
    pub fn peek(&self, addr: Addr) -> Word {
        self.shared.lock().unwrap().memory.read(addr)
    }

    /// Seed a memory word directly, bypassing the caches.
    pub fn poke(&self, addr: Addr, value: Word) {
        self.shared.lock().unwrap().memory.write(addr, value);
    }

    /// Snapshot of the line that would hold `addr` in the given core.
    pub fn line_at(&self, core_id: usize, addr: Addr) -> CacheLine {
        let shared = self.shared.lock().unwrap();
        let index = addr.index(&self.specs);
        *shared.cores[core_id].cache.line(index)
    }

    /// Snapshot of the line holding `addr` in the given core, if cached.
    pub fn line_of(&self, core_id: usize, addr: Addr) -> Option<CacheLine> {
        let shared = self.shared.lock().unwrap();
        shared.cores[core_id].cache.line_of(addr).copied()
    }

    pub fn core_stats(&self, core_id: usize) -> CoreStats {
        self.shared.lock().unwrap().cores[core_id].stats
    }

    pub fn stats_summary(&self) -> String {
        let shared = self.shared.lock().unwrap();
        let stats: Vec<CoreStats> = shared.cores.iter().map(|c| c.stats).collect();
        summary_table(&stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commons::AtomicOp;

    fn quiet_system() -> System {
        System::with_tracer(SystemSpec::default(), Tracer::sink())
    }

    #[test]
    fn fresh_system_is_coherent() {
        let sys = quiet_system();
        sys.check_coherence().unwrap();
    }

    #[test]
    fn verify_catches_double_modified() {
        let sys = quiet_system();
        {
            let mut shared = sys.shared.lock().unwrap();
            for core in 0..2 {
                let line = shared.cores[core].cache.line_mut(1);
                line.tag = Some(Addr(0x4));
                line.value = 1;
                line.state = CoherenceState::Modified;
            }
        }
        assert!(matches!(
            sys.check_coherence(),
            Err(CoherenceViolation::ModifiedNotSole { .. })
        ));
    }

    #[test]
    fn verify_catches_index_mismatch() {
        let sys = quiet_system();
        {
            let mut shared = sys.shared.lock().unwrap();
            let line = shared.cores[0].cache.line_mut(2);
            line.tag = Some(Addr(0x4)); // belongs at index 1
            line.state = CoherenceState::Exclusive;
        }
        assert!(matches!(
            sys.check_coherence(),
            Err(CoherenceViolation::IndexMismatch { .. })
        ));
    }

    #[test]
    fn verify_catches_stale_clean_copy() {
        let sys = quiet_system();
        sys.poke(Addr(0x4), 7);
        {
            let mut shared = sys.shared.lock().unwrap();
            let line = shared.cores[0].cache.line_mut(1);
            line.tag = Some(Addr(0x4));
            line.value = 8; // claims clean but disagrees with memory
            line.state = CoherenceState::Shared;
        }
        assert!(matches!(
            sys.check_coherence(),
            Err(CoherenceViolation::StaleMemory { .. })
        ));
    }

    #[test]
    fn poke_then_read_hits_memory_value() {
        let sys = quiet_system();
        sys.poke(Addr(0x10), 0x4444);
        sys.execute(0, CpuOp::Read, Addr(0x10));
        let line = sys.line_of(0, Addr(0x10)).unwrap();
        assert_eq!(line.value, 0x4444);
        assert_eq!(line.state, CoherenceState::Exclusive);
    }

    #[test]
    fn atomic_on_fresh_line_ends_modified() {
        let sys = quiet_system();
        sys.execute(0, CpuOp::Atomic(AtomicOp::Add, 5), Addr(0x20));
        let line = sys.line_of(0, Addr(0x20)).unwrap();
        assert_eq!(line.value, 5);
        assert_eq!(line.state, CoherenceState::Modified);
    }
}
