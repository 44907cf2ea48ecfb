//! Placeholder tracking.
//!
//! A node hold is taken when a run enters a node-scoped block and dropped
//! when it leaves the block. Whatever the run does in between, including
//! suspending for an arbitrarily long time, the hold stays. Each hold
//! carries one placeholder slot per resolved limit.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use throttle_core::{ExecutionUnit, NodeRef, ResourceId, RunRef};
use tracing::debug;

use crate::resolver::{LimitKey, Resolution};

/// One open node block of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeHold {
    pub id: ResourceId,
    pub node: NodeRef,
    pub run: RunRef,
    /// Identity counted against limits.
    pub occupant: RunRef,
    pub limits: Vec<LimitKey>,
    /// Build parameters, compared by matching-parameter limits.
    pub parameters: BTreeMap<String, String>,
    pub acquired_at: DateTime<Utc>,
}

/// A single held slot: one limit of one hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceholderSlot<'a> {
    pub limit: &'a LimitKey,
    pub node: &'a NodeRef,
    pub run: &'a RunRef,
    pub occupant: &'a RunRef,
}

/// Bookkeeping of all open node holds.
///
/// Not synchronized itself; the gate owns it behind its lock.
#[derive(Debug, Default)]
pub struct PlaceholderTracker {
    holds: Vec<NodeHold>,
}

impl PlaceholderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hold on `node` with one slot per resolved limit.
    pub fn acquire(
        &mut self,
        node: &NodeRef,
        resolution: &Resolution,
        unit: &ExecutionUnit,
    ) -> ResourceId {
        let hold = NodeHold {
            id: ResourceId::new(),
            node: node.clone(),
            run: unit.run.clone(),
            occupant: resolution.occupant.clone(),
            limits: resolution.keys(),
            parameters: unit.parameters.clone(),
            acquired_at: Utc::now(),
        };
        let id = hold.id;
        debug!(run = %hold.run, node = %hold.node, slots = hold.limits.len(), "Acquired node hold");
        self.holds.push(hold);
        id
    }

    /// Drop every hold of `run`. Returns how many were removed.
    pub fn release(&mut self, run: &RunRef) -> usize {
        let before = self.holds.len();
        self.holds.retain(|hold| &hold.run != run);
        let released = before - self.holds.len();
        if released > 0 {
            debug!(run = %run, released, "Released node holds");
        }
        released
    }

    /// Drop a single hold.
    pub fn release_hold(&mut self, id: ResourceId) -> Option<NodeHold> {
        let position = self.holds.iter().position(|hold| hold.id == id)?;
        let hold = self.holds.remove(position);
        debug!(run = %hold.run, node = %hold.node, "Released node hold");
        Some(hold)
    }

    /// Runs holding a slot on `node`, in acquisition order.
    pub fn lookup(&self, node: &NodeRef) -> Vec<RunRef> {
        self.holds
            .iter()
            .filter(|hold| &hold.node == node)
            .map(|hold| hold.run.clone())
            .collect()
    }

    pub fn holds(&self) -> impl Iterator<Item = &NodeHold> {
        self.holds.iter()
    }

    pub fn slots(&self) -> impl Iterator<Item = PlaceholderSlot<'_>> {
        self.holds.iter().flat_map(|hold| {
            hold.limits.iter().map(move |limit| PlaceholderSlot {
                limit,
                node: &hold.node,
                run: &hold.run,
                occupant: &hold.occupant,
            })
        })
    }

    pub fn len(&self) -> usize {
        self.holds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holds.is_empty()
    }
}
