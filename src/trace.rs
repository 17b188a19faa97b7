use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use crate::commons::{Addr, AtomicOp, BusOp, CoherenceState, CpuOp, DataSource, Word};

/// Emits the line-per-event protocol transcript. One tracer per system,
/// driven strictly under the serialization lock, so the transcript is a
/// total order of all coherence events.
pub struct Tracer {
    out: Box<dyn Write + Send>,
}

impl Tracer {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Tracer { out }
    }

    pub fn stdout() -> Self {
        Tracer::new(Box::new(io::stdout()))
    }

    /// Discards all events. Used by benchmarks and callers that only want
    /// final state.
    pub fn sink() -> Self {
        Tracer::new(Box::new(io::sink()))
    }

    fn line(&mut self, args: fmt::Arguments<'_>) {
        let _ = writeln!(self.out, "{}", args);
    }

    pub fn banner(&mut self, core: usize, op: &CpuOp, addr: Addr) {
        self.line(format_args!("========================================"));
        match op {
            CpuOp::Read => self.line(format_args!("CPU {}: Read @ {:#x}", core, addr)),
            CpuOp::Write(value) => {
                self.line(format_args!("CPU {}: Write @ {:#x} | data {:#x}", core, addr, value))
            }
            CpuOp::Atomic(AtomicOp::Cas { expected }, operand) => self.line(format_args!(
                "CPU {}: Atomic_CAS @ {:#x} | operand {:#x} | expected {:#x}",
                core, addr, operand, expected
            )),
            CpuOp::Atomic(op, operand) => self.line(format_args!(
                "CPU {}: {} @ {:#x} | operand {:#x}",
                core,
                op.name(),
                addr,
                operand
            )),
        }
        self.line(format_args!("========================================"));
    }

    pub fn access(&mut self, core: usize, hit: bool, addr: Addr, index: usize, state: CoherenceState) {
        let kind = if hit { "cache hit" } else { "cache miss" };
        self.line(format_args!(
            "CPU {}: {} @ {:#x} (index {}) | state {}",
            core, kind, addr, index, state
        ));
    }

    pub fn eviction(&mut self, core: usize) {
        self.line(format_args!(
            "CPU {}: conflict miss on dirty line | write-back required",
            core
        ));
    }

    pub fn bus_request(&mut self, core: usize, op: &BusOp, addr: Addr) {
        self.line(format_args!("CPU {}: bus request | {} @ {:#x}", core, op, addr));
    }

    pub fn write_back(&mut self, core: usize, addr: Addr, value: Word) {
        self.line(format_args!(
            "CPU {}: write-back | mem[{:#x}] <- {:#x}",
            core, addr, value
        ));
    }

    pub fn snoop_hit(&mut self, core: usize, addr: Addr, index: usize, state: CoherenceState) {
        self.line(format_args!(
            "CPU {}: snoop hit @ {:#x} (index {}) | state {}",
            core, addr, index, state
        ));
    }

    pub fn snoop_transition(&mut self, core: usize, from: CoherenceState, to: CoherenceState) {
        self.line(format_args!("CPU {}: snoop transition | [{} -> {}]", core, from, to));
    }

    pub fn bus_response(&mut self, core: usize, data: Word, source: &DataSource) {
        self.line(format_args!(
            "CPU {}: bus response | data {:#x} | from {}",
            core, data, source
        ));
    }

    pub fn upgrade_complete(&mut self, core: usize) {
        self.line(format_args!("CPU {}: bus response | upgrade complete", core));
    }

    pub fn transition(&mut self, core: usize, from: CoherenceState, to: CoherenceState) {
        self.line(format_args!("CPU {}: transition | [{} -> {}]", core, from, to));
    }

    pub fn atomic_apply(&mut self, core: usize, op: &AtomicOp, old: Word, operand: Word, new: Word) {
        self.line(format_args!(
            "CPU {}: {} | old {:#x} | operand {:#x} | new {:#x}",
            core,
            op.name(),
            old,
            operand,
            new
        ));
    }

    pub fn done(&mut self, core: usize, value: Word, state: CoherenceState) {
        self.line(format_args!("CPU {}: done | value {:#x} | state {}", core, value, state));
    }
}

/// An in-memory transcript sink that can be handed to a [`Tracer`] and read
/// back afterwards. Cloning shares the underlying buffer.
#[derive(Clone, Default)]
pub struct TraceBuffer(Arc<Mutex<Vec<u8>>>);

impl TraceBuffer {
    pub fn new() -> Self {
        TraceBuffer::default()
    }

    pub fn contents(&self) -> String {
        let buf = self.0.lock().unwrap();
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl Write for TraceBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
