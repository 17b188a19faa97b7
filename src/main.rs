use std::path::PathBuf;
use std::process;
use std::thread;

use clap::{Parser, Subcommand};
use env_logger::Env;

use cachesim_moesi::{
    random_trace, read_trace_file, Addr, AtomicOp, CoherenceState, CpuOp, System, SystemSpec,
    TraceOp,
};

#[derive(Parser)]
#[command(
    name = "cachesim-moesi",
    about = "Functional simulator for the MOESI snooping-bus cache coherence protocol"
)]
struct Cli {
    /// Number of cores
    #[arg(long, default_value_t = 4)]
    cores: usize,

    /// Cache lines per core
    #[arg(long, default_value_t = 64)]
    cache_lines: usize,

    /// Memory size in words
    #[arg(long, default_value_t = 2048)]
    memory_words: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scripted walkthrough of the protocol state machine
    Demo,
    /// One host thread per core, all atomically incrementing one shared word
    Atomic,
    /// Execute a trace file: `<core> <op> <addr> [value] [expected]` per line
    Run { file: PathBuf },
    /// Execute a randomly generated trace
    Random {
        /// Number of operations
        #[arg(long, default_value_t = 64)]
        ops: usize,
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

fn main() {
    env_logger::init_from_env(Env::default().filter_or("RUST_LOG", "warn"));

    let cli = Cli::parse();
    let specs = SystemSpec {
        num_cores: cli.cores,
        cache_lines: cli.cache_lines,
        memory_words: cli.memory_words,
        ..Default::default()
    };

    match cli.command {
        Command::Demo => demo(specs),
        Command::Atomic => atomic_counter(specs),
        Command::Run { file } => {
            let ops = match read_trace_file(&file) {
                Ok(ops) => ops,
                Err(e) => {
                    eprintln!("{}: {}", file.display(), e);
                    process::exit(1);
                }
            };
            run_trace(specs, &ops);
        }
        Command::Random { ops, seed } => {
            let ops = random_trace(&specs, ops, seed);
            run_trace(specs, &ops);
        }
    }
}

fn run_trace(specs: SystemSpec, ops: &[TraceOp]) {
    let sys = System::new(specs);
    for op in ops {
        if op.core >= specs.num_cores {
            eprintln!("trace names core {} but the system has {}", op.core, specs.num_cores);
            process::exit(1);
        }
        sys.execute(op.core, op.op, op.addr);
    }
    println!();
    print!("{}", sys.stats_summary());
}

/// The canned read/write scenario: walks every requester and snooper
/// transition of the protocol, including both conflict-miss write-back
/// directions.
fn demo(specs: SystemSpec) {
    assert!(specs.num_cores >= 4, "the demo script uses four cores");
    let sys = System::new(specs);

    for (addr, value) in [
        (4, 0x1111),
        (8, 0x2222),
        (12, 0x3333),
        (16, 0x4444),
        (20, 0x5555),
        (100, 0xABCD),
        (200, 0x1000),
        (204, 0x2000),
        (208, 0x3000),
        (260, 0xAAAA),
        (300, 0xBBBB),
        (400, 0xCCCC),
        (500, 0xDDDD),
        (600, 0xEEEE),
    ] {
        sys.poke(Addr(addr), value);
    }

    println!("=== shared readers ===");
    sys.execute(2, CpuOp::Read, Addr(4));
    sys.execute(3, CpuOp::Read, Addr(4));
    sys.execute(0, CpuOp::Read, Addr(4));

    println!("\n=== write to a shared line (BusUpgr) ===");
    sys.execute(0, CpuOp::Write(0x9999), Addr(4));

    println!("\n=== write miss invalidates sharers (BusRdX) ===");
    sys.execute(1, CpuOp::Write(0xABCD), Addr(8));

    println!("\n=== read back from the writer ===");
    sys.execute(0, CpuOp::Read, Addr(4));

    println!("\n=== lone reader gets Exclusive, then E -> M on write ===");
    sys.execute(2, CpuOp::Read, Addr(16));
    sys.execute(2, CpuOp::Write(0xDDDD), Addr(16));

    println!("\n=== write then cross-core read ===");
    sys.execute(3, CpuOp::Write(0x5678), Addr(12));
    sys.execute(0, CpuOp::Read, Addr(12));

    println!("\n=== reading a modified line elsewhere (M -> O) ===");
    sys.execute(1, CpuOp::Read, Addr(4));
    sys.execute(2, CpuOp::Read, Addr(4));

    println!("\n=== write to an owned line (O -> M), then M -> M ===");
    sys.execute(0, CpuOp::Write(0xEEEE), Addr(4));
    sys.execute(0, CpuOp::Write(0xFFFF), Addr(4));

    println!("\n=== conflict misses with dirty lines (BusWB both ways) ===");
    sys.execute(0, CpuOp::Read, Addr(0x104));
    sys.execute(0, CpuOp::Write(0xBBBB), Addr(0x104));
    sys.execute(0, CpuOp::Write(0xCCCC), Addr(0x4));

    println!("\n=== invalidating an exclusive copy (E -> I) ===");
    sys.execute(1, CpuOp::Read, Addr(20));
    sys.execute(2, CpuOp::Write(0x8888), Addr(20));

    println!("\n=== invalidating an owned copy (O -> I) ===");
    sys.execute(0, CpuOp::Read, Addr(8));
    sys.execute(1, CpuOp::Read, Addr(8));
    sys.execute(2, CpuOp::Write(0x6666), Addr(8));

    println!("\n=== read-modify-write sequence on one core ===");
    sys.execute(0, CpuOp::Read, Addr(100));
    sys.execute(0, CpuOp::Write(0xAAAA), Addr(100));
    sys.execute(0, CpuOp::Read, Addr(100));

    println!("\n=== disjoint addresses stay Exclusive ===");
    sys.execute(1, CpuOp::Read, Addr(200));
    sys.execute(2, CpuOp::Read, Addr(204));
    sys.execute(3, CpuOp::Read, Addr(208));

    println!("\n=== snooped read downgrades Exclusive (E -> S) ===");
    sys.execute(0, CpuOp::Read, Addr(300));
    sys.execute(1, CpuOp::Read, Addr(300));

    println!("\n=== write invalidates a snooped Exclusive copy ===");
    sys.execute(2, CpuOp::Read, Addr(400));
    sys.execute(3, CpuOp::Write(0x5555), Addr(400));

    println!("\n=== multi-core mix on one address ===");
    sys.execute(0, CpuOp::Write(0x6666), Addr(500));
    sys.execute(1, CpuOp::Read, Addr(500));
    sys.execute(2, CpuOp::Read, Addr(500));
    sys.execute(3, CpuOp::Write(0x7777), Addr(500));

    println!("\n=== sequential ping-pong on one address ===");
    sys.execute(0, CpuOp::Read, Addr(600));
    sys.execute(1, CpuOp::Write(0x8888), Addr(600));
    sys.execute(2, CpuOp::Read, Addr(600));
    sys.execute(3, CpuOp::Write(0x9999), Addr(600));
    sys.execute(0, CpuOp::Read, Addr(600));

    println!();
    print!("{}", sys.stats_summary());
}

/// N host threads, one per core, each performing one atomic increment of the
/// same shared word. The serialization lock makes the increments atomic; the
/// final owner must hold the full count.
fn atomic_counter(specs: SystemSpec) {
    const COUNTER: Addr = Addr(1000);
    let sys = System::new(specs);
    sys.poke(COUNTER, 0);

    println!(
        "=== {} threads incrementing the word at {:#x} ===",
        specs.num_cores, COUNTER
    );

    thread::scope(|scope| {
        for core in 0..specs.num_cores {
            let sys = &sys;
            scope.spawn(move || {
                sys.execute(core, CpuOp::Atomic(AtomicOp::Add, 1), COUNTER);
            });
        }
    });

    println!("\n=== cache line states ===");
    let mut final_value = None;
    for core in 0..specs.num_cores {
        let line = sys.line_at(core, COUNTER);
        match line.tag {
            Some(tag) => println!(
                "CPU {}: tag {:#x} | value {:#x} | state {}",
                core, tag, line.value, line.state
            ),
            None => println!("CPU {}: never filled", core),
        }
        if line.holds(COUNTER) && line.state == CoherenceState::Modified {
            final_value = Some(line.value);
        }
    }

    let expected = specs.num_cores as i32;
    match final_value {
        Some(v) => println!(
            "\nfinal count {} (expected {}): {}",
            v,
            expected,
            if v == expected { "PASSED" } else { "FAILED" }
        ),
        None => println!("\nFAILED: no cache holds the counter in M"),
    }
}
