use std::fmt::Display;

/// Per-core event counters, updated as operations execute.
#[derive(Clone, Copy, Default, Debug)]
pub struct CoreStats {
    pub loads: u64,
    pub stores: u64,
    pub atomics: u64,
    pub hits: u64,
    pub misses: u64,
    pub bus_ops: u64,
    pub write_backs: u64,
    /// Snoop-induced invalidations suffered by this core's cache.
    pub invalidations: u64,
}

pub fn format_row<T>(v: impl IntoIterator<Item = T>) -> String
where
    T: Display,
{
    v.into_iter()
        .map(|x| format!("{:<15}", x))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Aligned per-core summary table, one row per counter.
pub fn summary_table(stats: &[CoreStats]) -> String {
    let n = stats.len();
    let mut out = String::new();
    out.push_str(&format!(
        "{:<15} | {}\n",
        "",
        format_row((0..n).map(|i| format!("core {}", i)))
    ));
    let mut row = |label: &str, values: Vec<u64>| {
        out.push_str(&format!("{:<15} | {}\n", label, format_row(values)));
    };
    row("loads", stats.iter().map(|s| s.loads).collect());
    row("stores", stats.iter().map(|s| s.stores).collect());
    row("atomics", stats.iter().map(|s| s.atomics).collect());
    row("hits", stats.iter().map(|s| s.hits).collect());
    row("misses", stats.iter().map(|s| s.misses).collect());
    row("bus ops", stats.iter().map(|s| s.bus_ops).collect());
    row("write-backs", stats.iter().map(|s| s.write_backs).collect());
    row("invalidations", stats.iter().map(|s| s.invalidations).collect());
    out
}
