use std::fmt;

// system specs

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct SystemSpec {
    pub num_cores: usize,    // symmetric cores sharing the bus
    pub cache_lines: usize,  // direct-mapped lines per private cache
    pub memory_words: usize, // words of shared memory
    pub word_size: i32,      // bytes
}

impl Default for SystemSpec {
    fn default() -> Self {
        SystemSpec {
            num_cores: 4,
            cache_lines: 64,
            memory_words: 2048,
            word_size: 4,
        }
    }
}

pub type Word = i32;

// addresses

/// A word-aligned byte address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Addr(pub i32);

impl Addr {
    /// Direct-mapped cache slot of this address: `(addr / word_size) mod lines`.
    pub fn index(&self, specs: &SystemSpec) -> usize {
        (self.0 / specs.word_size) as usize % specs.cache_lines
    }
    /// Slot in the flat word array of memory.
    pub fn word_index(&self, specs: &SystemSpec) -> usize {
        (self.0 / specs.word_size) as usize
    }
    pub fn is_aligned(&self, specs: &SystemSpec) -> bool {
        self.0 % specs.word_size == 0
    }
}

impl fmt::LowerHex for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

// coherence states

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CoherenceState {
    Modified,  // valid, dirty, sole copy
    Owned,     // valid, dirty, other Shared copies may exist
    Exclusive, // valid, clean, sole copy
    Shared,    // valid, clean w.r.t. memory unless an Owned copy exists
    Invalid,
}

impl fmt::Display for CoherenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CoherenceState::Modified => "M",
            CoherenceState::Owned => "O",
            CoherenceState::Exclusive => "E",
            CoherenceState::Shared => "S",
            CoherenceState::Invalid => "I",
        };
        f.write_str(s)
    }
}

// cpu operations

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum AtomicOp {
    Cas { expected: Word },
    Add,
    Sub,
    And,
    Or,
    Xor,
    Nand,
    Nor,
    Xnor,
}

impl AtomicOp {
    /// The read-modify-write primitive applied to the cached word once
    /// exclusive ownership is held. A failed compare leaves the word as is.
    pub fn apply(&self, current: Word, operand: Word) -> Word {
        match self {
            AtomicOp::Cas { expected } => {
                if current == *expected {
                    operand
                } else {
                    current
                }
            }
            AtomicOp::Add => current.wrapping_add(operand),
            AtomicOp::Sub => current.wrapping_sub(operand),
            AtomicOp::And => current & operand,
            AtomicOp::Or => current | operand,
            AtomicOp::Xor => current ^ operand,
            AtomicOp::Nand => !(current & operand),
            AtomicOp::Nor => !(current | operand),
            AtomicOp::Xnor => !(current ^ operand),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AtomicOp::Cas { .. } => "Atomic_CAS",
            AtomicOp::Add => "Atomic_ADD",
            AtomicOp::Sub => "Atomic_SUB",
            AtomicOp::And => "Atomic_AND",
            AtomicOp::Or => "Atomic_OR",
            AtomicOp::Xor => "Atomic_XOR",
            AtomicOp::Nand => "Atomic_NAND",
            AtomicOp::Nor => "Atomic_NOR",
            AtomicOp::Xnor => "Atomic_XNOR",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum CpuOp {
    Read,
    Write(Word),
    /// Atomic read-modify-write; the second field is the operand word.
    Atomic(AtomicOp, Word),
}

impl CpuOp {
    pub fn name(&self) -> &'static str {
        match self {
            CpuOp::Read => "Read",
            CpuOp::Write(_) => "Write",
            CpuOp::Atomic(op, _) => op.name(),
        }
    }
}

// bus operations

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum BusOp {
    /// Request a readable copy (read miss).
    BusRd,
    /// Request an exclusive copy with intent to write; invalidates sharers.
    BusRdX,
    /// Upgrade an existing copy to Modified without data transfer.
    BusUpgr,
    /// Flush a dirty word back to memory; carries the flushed value.
    BusWB(Word),
}

impl fmt::Display for BusOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BusOp::BusRd => "BusRd",
            BusOp::BusRdX => "BusRdX",
            BusOp::BusUpgr => "BusUpgr",
            BusOp::BusWB(_) => "BusWB",
        };
        f.write_str(s)
    }
}

/// Where the data word of a bus response came from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DataSource {
    Memory,
    Core(usize),
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Memory => f.write_str("memory"),
            DataSource::Core(id) => write!(f, "CPU {}", id),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BusResponse {
    pub data: Word,
    pub source: DataSource,
    /// State the requester must adopt for its line.
    pub requester_state: CoherenceState,
}
