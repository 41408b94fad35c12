//! Batch Planner
//!
//! Greedy grouping of fragments under item-count and character budgets, plus the
//! halving re-split applied when a transport reports a batch as too long.

use crate::config::BatchLimits;
use crate::types::{Batch, Fragment};
use tracing::debug;

/// Budgets applied to one planning pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub max_items: usize,
    pub max_chars: usize,
    /// Character budget below which batches are not halved further.
    pub min_split_chars: usize,
}

impl From<&BatchLimits> for PlanLimits {
    fn from(limits: &BatchLimits) -> Self {
        Self {
            max_items: limits.max_items.max(1),
            max_chars: limits.max_chars.max(1),
            min_split_chars: limits.min_split_chars.max(1),
        }
    }
}

/// Outcome of re-planning a batch the transport rejected as too long.
#[derive(Debug, Clone, PartialEq)]
pub enum Resplit {
    /// The batch was divided into at least two smaller batches.
    Split {
        batches: Vec<Batch>,
        limits: PlanLimits,
    },
    /// A single fragment that cannot be made smaller.
    Oversize(Fragment),
}

/// Partitions `fragments` in order. A fragment longer than `max_chars` becomes a singleton batch.
pub fn plan(fragments: Vec<Fragment>, limits: &PlanLimits) -> Vec<Batch> {
    let max_items = limits.max_items.max(1);
    let max_chars = limits.max_chars.max(1);

    let mut batches = Vec::new();
    let mut current: Vec<Fragment> = Vec::new();
    let mut current_chars = 0usize;

    for fragment in fragments {
        let len = fragment.char_len();
        let overflows = current.len() + 1 > max_items || current_chars + len > max_chars;
        if !current.is_empty() && overflows {
            batches.extend(Batch::new(std::mem::take(&mut current)));
            current_chars = 0;
        }
        if len > max_chars {
            debug!(
                fragment_id = %fragment.id,
                fragment_chars = len,
                max_chars,
                "Fragment exceeds batch budget; planning as singleton"
            );
            batches.extend(Batch::new(vec![fragment]));
            continue;
        }
        current_chars += len;
        current.push(fragment);
    }
    batches.extend(Batch::new(current));
    batches
}

/// Halves the character budget for `batch` and plans it again.
///
/// The new budget is `max(min_split_chars, min(max_chars, batch chars) / 2)`. When that
/// still yields a single batch, the item budget is halved instead, so every split makes
/// progress.
pub fn resplit(batch: Batch, limits: &PlanLimits) -> Resplit {
    if batch.is_single() {
        let mut fragments = batch.into_fragments();
        return match fragments.pop() {
            Some(fragment) => Resplit::Oversize(fragment),
            None => Resplit::Split {
                batches: Vec::new(),
                limits: *limits,
            },
        };
    }

    let count = batch.len();
    let effective = limits.max_chars.min(batch.char_len());
    let mut next = PlanLimits {
        max_items: limits.max_items.min(count),
        max_chars: (effective / 2).max(limits.min_split_chars).max(1),
        min_split_chars: limits.min_split_chars,
    };

    let fragments = batch.into_fragments();
    let mut batches = plan(fragments.clone(), &next);
    if batches.len() < 2 {
        next.max_items = count.div_ceil(2);
        batches = plan(fragments, &next);
    }

    debug!(
        fragment_count = count,
        max_chars = next.max_chars,
        max_items = next.max_items,
        batches = batches.len(),
        "Re-split batch"
    );
    Resplit::Split {
        batches,
        limits: next,
    }
}
