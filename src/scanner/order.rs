//! Popular-first port ordering.
//!
//! The scan engine probes a fixed list of well-known, high-value ports
//! first, in that list's own order, then everything else ascending. On
//! large host sets this surfaces the interesting findings almost
//! immediately instead of after one host's whole range completes.

use crate::types::{Port, POPULAR_PORTS};
use std::collections::{HashMap, HashSet};

/// Deduplicate and reorder ports into priority scan order.
///
/// Ports on [`POPULAR_PORTS`] come first, keeping that list's relative
/// order; the remainder follows in ascending numeric order.
pub fn prioritize(ports: impl IntoIterator<Item = Port>) -> Vec<Port> {
    let rank: HashMap<u16, usize> = POPULAR_PORTS
        .iter()
        .enumerate()
        .map(|(i, &p)| (p, i))
        .collect();

    let mut seen = HashSet::new();
    let mut ports: Vec<Port> = ports.into_iter().filter(|p| seen.insert(*p)).collect();
    ports.sort_by_key(|p| match rank.get(&p.as_u16()) {
        Some(&r) => (0u8, r),
        None => (1u8, usize::from(p.as_u16())),
    });
    ports
}
