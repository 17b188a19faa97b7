use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::commons::{Addr, AtomicOp, CpuOp, SystemSpec, Word};

/// One driver event: which core executes which operation at which address.
#[derive(Clone, Copy, Debug)]
pub struct TraceOp {
    pub core: usize,
    pub op: CpuOp,
    pub addr: Addr,
}

#[derive(Debug, Error)]
pub enum TraceFileError {
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn malformed(line: usize, reason: impl Into<String>) -> TraceFileError {
    TraceFileError::Malformed {
        line,
        reason: reason.into(),
    }
}

fn parse_word(line: usize, token: &str) -> Result<Word, TraceFileError> {
    let parsed = if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        i32::from_str_radix(hex, 16)
    } else {
        token.parse()
    };
    parsed.map_err(|_| malformed(line, format!("bad number `{}`", token)))
}

/// Parse a driver trace, one operation per line:
/// `<core> <op> <addr> [value] [expected]`. Blank lines and `#` comments are
/// skipped. A CAS line without an expected field compares against 0.
pub fn parse_trace(src: &str) -> Result<Vec<TraceOp>, TraceFileError> {
    let mut ops = Vec::new();
    for (i, raw) in src.lines().enumerate() {
        let line_no = i + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let core = parts
            .next()
            .ok_or_else(|| malformed(line_no, "missing core id"))?
            .parse::<usize>()
            .map_err(|_| malformed(line_no, "bad core id"))?;
        let op_name = parts.next().ok_or_else(|| malformed(line_no, "missing opcode"))?;
        let addr = Addr(parse_word(
            line_no,
            parts.next().ok_or_else(|| malformed(line_no, "missing address"))?,
        )?);

        let value = |parts: &mut std::str::SplitWhitespace<'_>| -> Result<Word, TraceFileError> {
            parse_word(
                line_no,
                parts
                    .next()
                    .ok_or_else(|| malformed(line_no, format!("{} needs a value", op_name)))?,
            )
        };

        let op = match op_name {
            "Read" => CpuOp::Read,
            "Write" => CpuOp::Write(value(&mut parts)?),
            "Atomic_CAS" => {
                let operand = value(&mut parts)?;
                let expected = match parts.next() {
                    Some(token) => parse_word(line_no, token)?,
                    None => 0,
                };
                CpuOp::Atomic(AtomicOp::Cas { expected }, operand)
            }
            "Atomic_ADD" => CpuOp::Atomic(AtomicOp::Add, value(&mut parts)?),
            "Atomic_SUB" => CpuOp::Atomic(AtomicOp::Sub, value(&mut parts)?),
            "Atomic_AND" => CpuOp::Atomic(AtomicOp::And, value(&mut parts)?),
            "Atomic_OR" => CpuOp::Atomic(AtomicOp::Or, value(&mut parts)?),
            "Atomic_XOR" => CpuOp::Atomic(AtomicOp::Xor, value(&mut parts)?),
            "Atomic_NAND" => CpuOp::Atomic(AtomicOp::Nand, value(&mut parts)?),
            "Atomic_NOR" => CpuOp::Atomic(AtomicOp::Nor, value(&mut parts)?),
            "Atomic_XNOR" => CpuOp::Atomic(AtomicOp::Xnor, value(&mut parts)?),
            other => return Err(malformed(line_no, format!("unknown opcode `{}`", other))),
        };
        ops.push(TraceOp { core, op, addr });
    }
    Ok(ops)
}

pub fn read_trace_file(path: impl AsRef<Path>) -> Result<Vec<TraceOp>, TraceFileError> {
    parse_trace(&fs::read_to_string(path)?)
}

/// Generate a random trace: uniform word-aligned addresses over the memory
/// range, with a read-heavy operation mix.
pub fn random_trace(specs: &SystemSpec, len: usize, seed: u64) -> Vec<TraceOp> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len)
        .map(|_| {
            let core = rng.gen_range(0..specs.num_cores);
            let addr = Addr(rng.gen_range(0..specs.memory_words as i32) * specs.word_size);
            let op = match rng.gen_range(0..8) {
                0..=3 => CpuOp::Read,
                4..=6 => CpuOp::Write(rng.gen_range(0..0x1_0000)),
                _ => CpuOp::Atomic(AtomicOp::Add, 1),
            };
            TraceOp { core, op, addr }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_opcodes() {
        let src = "\
# comment
0 Read 0x4

1 Write 0x8 0xabcd
2 Atomic_CAS 0x64 0x9 0x5
3 Atomic_ADD 1000 1
";
        let ops = parse_trace(src).unwrap();
        assert_eq!(ops.len(), 4);
        assert_eq!(ops[0].core, 0);
        assert_eq!(ops[0].op, CpuOp::Read);
        assert_eq!(ops[1].op, CpuOp::Write(0xabcd));
        assert_eq!(ops[2].op, CpuOp::Atomic(AtomicOp::Cas { expected: 0x5 }, 0x9));
        assert_eq!(ops[3].addr, Addr(1000));
    }

    #[test]
    fn cas_without_expected_defaults_to_zero() {
        let ops = parse_trace("0 Atomic_CAS 0x4 0x9").unwrap();
        assert_eq!(ops[0].op, CpuOp::Atomic(AtomicOp::Cas { expected: 0 }, 0x9));
    }

    #[test]
    fn rejects_unknown_opcode() {
        let err = parse_trace("0 Frobnicate 0x4").unwrap_err();
        assert!(matches!(err, TraceFileError::Malformed { line: 1, .. }));
    }

    #[test]
    fn rejects_missing_store_value() {
        assert!(parse_trace("0 Write 0x4").is_err());
    }

    #[test]
    fn random_traces_are_aligned_and_in_range() {
        let specs = SystemSpec::default();
        for op in random_trace(&specs, 200, 42) {
            assert!(op.core < specs.num_cores);
            assert!(op.addr.is_aligned(&specs));
            assert!(op.addr.word_index(&specs) < specs.memory_words);
        }
    }

    #[test]
    fn random_traces_are_reproducible() {
        let specs = SystemSpec::default();
        let a = random_trace(&specs, 50, 7);
        let b = random_trace(&specs, 50, 7);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.core, y.core);
            assert_eq!(x.addr, y.addr);
        }
    }
}
