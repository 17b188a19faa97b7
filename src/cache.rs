use crate::commons::{Addr, CoherenceState, SystemSpec, Word};

/// One slot of a direct-mapped cache: a word, its full-address tag, and the
/// coherence state. `tag` is `None` until the slot is filled for the first
/// time.
#[derive(Clone, Copy, Debug)]
pub struct CacheLine {
    pub tag: Option<Addr>,
    pub value: Word,
    pub state: CoherenceState,
}

impl Default for CacheLine {
    fn default() -> Self {
        CacheLine {
            tag: None,
            value: 0,
            state: CoherenceState::Invalid,
        }
    }
}

impl CacheLine {
    /// A line holds address `addr` iff it is valid and tagged with it.
    pub fn holds(&self, addr: Addr) -> bool {
        self.state != CoherenceState::Invalid && self.tag == Some(addr)
    }

    pub fn is_dirty(&self) -> bool {
        matches!(self.state, CoherenceState::Modified | CoherenceState::Owned)
    }
}

/// Direct-mapped private L1 data cache. A passive container: all coherence
/// decisions are made by the owning core and the bus.
pub struct Cache {
    specs: SystemSpec,
    lines: Vec<CacheLine>,
}

impl Cache {
    pub fn new(specs: SystemSpec) -> Self {
        Cache {
            lines: vec![CacheLine::default(); specs.cache_lines],
            specs,
        }
    }

    /// Slot index and hit/miss classification for `addr`.
    pub fn lookup(&self, addr: Addr) -> (usize, bool) {
        let index = addr.index(&self.specs);
        (index, self.lines[index].holds(addr))
    }

    pub fn line(&self, index: usize) -> &CacheLine {
        &self.lines[index]
    }

    pub fn line_mut(&mut self, index: usize) -> &mut CacheLine {
        &mut self.lines[index]
    }

    /// The line currently holding `addr`, if any.
    pub fn line_of(&self, addr: Addr) -> Option<&CacheLine> {
        let (index, hit) = self.lookup(addr);
        hit.then(|| &self.lines[index])
    }

    pub fn lines(&self) -> &[CacheLine] {
        &self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cache_misses_everywhere() {
        let cache = Cache::new(SystemSpec::default());
        let (index, hit) = cache.lookup(Addr(0x4));
        assert_eq!(index, 1);
        assert!(!hit);
        assert!(cache.line_of(Addr(0x4)).is_none());
    }

    #[test]
    fn hit_requires_matching_tag_and_valid_state() {
        let mut cache = Cache::new(SystemSpec::default());
        let line = cache.line_mut(1);
        line.tag = Some(Addr(0x4));
        line.value = 42;
        line.state = CoherenceState::Exclusive;

        assert!(cache.lookup(Addr(0x4)).1);
        // same slot, different tag
        assert!(!cache.lookup(Addr(0x104)).1);

        cache.line_mut(1).state = CoherenceState::Invalid;
        assert!(!cache.lookup(Addr(0x4)).1);
    }

    #[test]
    fn dirty_states() {
        let mut line = CacheLine::default();
        assert!(!line.is_dirty());
        line.state = CoherenceState::Modified;
        assert!(line.is_dirty());
        line.state = CoherenceState::Owned;
        assert!(line.is_dirty());
        line.state = CoherenceState::Exclusive;
        assert!(!line.is_dirty());
    }
}
