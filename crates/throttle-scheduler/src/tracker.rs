//! Concurrency state derived from live placeholders.
//!
//! Nothing here is cached. Every count is a scan over the holds, taken
//! while the caller has the placeholder lock.

use std::collections::{BTreeMap, HashSet};
use throttle_core::{JobId, MatchingParameters, NodeRef, RunRef};

use crate::placeholder::PlaceholderTracker;
use crate::resolver::LimitKey;

/// Read-only view over the placeholders.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyState<'a> {
    placeholders: &'a PlaceholderTracker,
}

impl<'a> ConcurrencyState<'a> {
    pub fn new(placeholders: &'a PlaceholderTracker) -> Self {
        Self { placeholders }
    }

    /// Holds on `limit` across all nodes.
    pub fn count_total(&self, limit: &LimitKey) -> u32 {
        self.count_occupants(limit, None)
    }

    /// Holds on `limit` on `node`.
    pub fn count_node(&self, limit: &LimitKey, node: &NodeRef) -> u32 {
        self.count_occupants(limit, Some(node))
    }

    /// Whether a sibling sharing `occupant` already holds `limit`, optionally
    /// on a specific node. Only holds taken on behalf of another run (Combined
    /// matrix children) share an occupant.
    pub fn is_shared_by(
        &self,
        limit: &LimitKey,
        occupant: &RunRef,
        node: Option<&NodeRef>,
    ) -> bool {
        self.placeholders.slots().any(|slot| {
            slot.limit == limit
                && slot.occupant == occupant
                && slot.run != slot.occupant
                && node.is_none_or(|n| slot.node == n)
        })
    }

    /// Node blocks currently open on `node`, throttled or not.
    pub fn count_busy(&self, node: &NodeRef) -> u32 {
        let busy = self
            .placeholders
            .holds()
            .filter(|hold| &hold.node == node)
            .count();
        u32::try_from(busy).unwrap_or(u32::MAX)
    }

    /// Another run of `job` holds a node with matching parameters.
    pub fn has_matching_run(
        &self,
        job: &JobId,
        occupant: &RunRef,
        matching: &MatchingParameters,
        parameters: &BTreeMap<String, String>,
    ) -> bool {
        self.placeholders.holds().any(|hold| {
            &hold.occupant.job == job
                && &hold.occupant != occupant
                && matching.matches(&hold.parameters, parameters)
        })
    }

    // Every hold is one slot, except that siblings sharing an occupant count
    // once between them.
    fn count_occupants(&self, limit: &LimitKey, node: Option<&NodeRef>) -> u32 {
        let mut own = 0usize;
        let mut shared: HashSet<&RunRef> = HashSet::new();
        for slot in self
            .placeholders
            .slots()
            .filter(|slot| slot.limit == limit && node.is_none_or(|n| slot.node == n))
        {
            if slot.run == slot.occupant {
                own += 1;
            } else {
                shared.insert(slot.occupant);
            }
        }
        u32::try_from(own + shared.len()).unwrap_or(u32::MAX)
    }
}
