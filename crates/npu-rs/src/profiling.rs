//! Named counters recording planner decisions.
//!
//! Events are cheap enough to leave on unconditionally; stats dumps and
//! tests read them back through [`snapshot`].

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

static EVENTS: OnceLock<Mutex<HashMap<&'static str, u64>>> = OnceLock::new();

fn events() -> &'static Mutex<HashMap<&'static str, u64>> {
    EVENTS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Records one occurrence of `name`.
pub fn planner_event(name: &'static str) {
    let mut counters = events().lock().expect("profiling counters poisoned");
    *counters.entry(name).or_insert(0) += 1;
}

/// Total occurrences of `name` so far.
pub fn event_count(name: &'static str) -> u64 {
    let counters = events().lock().expect("profiling counters poisoned");
    counters.get(name).copied().unwrap_or(0)
}

/// All counters, sorted by name.
pub fn snapshot() -> Vec<(&'static str, u64)> {
    let counters = events().lock().expect("profiling counters poisoned");
    let mut entries: Vec<_> = counters.iter().map(|(&name, &count)| (name, count)).collect();
    entries.sort_by_key(|&(name, _)| name);
    entries
}

/// Clears every counter.
pub fn reset() {
    let mut counters = events().lock().expect("profiling counters poisoned");
    counters.clear();
}
