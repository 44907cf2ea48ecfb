//! In-memory host queue.
//!
//! A small stand-in for a real build queue: it keeps pending items in
//! arrival order, offers nodes to the gate on every maintenance pass, and
//! tells the gate when node blocks are entered and exited. Submitting a
//! unit whose run has already started requests an additional node block
//! for that run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use throttle_core::{
    Admission, BlockageCause, Error, ExecutionUnit, Node, NodeRef, ResourceId, Result, RunRef,
};
use tracing::{debug, info};

use crate::gate::{AdmissionGate, ThrottleGate};

/// A pending node-block request.
#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub id: ResourceId,
    pub unit: ExecutionUnit,
    pub enqueued_at: DateTime<Utc>,
    /// Why the last pass did not start it. `None` until blocked by the throttle.
    pub cause: Option<BlockageCause>,
}

/// An item started during a maintenance pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartedRun {
    pub item: ResourceId,
    pub run: RunRef,
    pub node: NodeRef,
    pub hold: ResourceId,
}

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub started: Vec<StartedRun>,
    pub blocked: Vec<(ResourceId, BlockageCause)>,
    /// Items left in the queue after the pass.
    pub pending: usize,
}

#[derive(Debug)]
struct ActiveRun {
    unit: ExecutionUnit,
    holds: Vec<ResourceId>,
    suspended: bool,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<QueueItem>,
    active: HashMap<RunRef, ActiveRun>,
}

/// Build queue backed by process memory.
pub struct HostQueue {
    nodes: Vec<Node>,
    gate: Arc<ThrottleGate>,
    state: Mutex<QueueState>,
}

impl HostQueue {
    pub fn new(nodes: Vec<Node>, gate: Arc<ThrottleGate>) -> Self {
        Self {
            nodes,
            gate,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn gate(&self) -> &Arc<ThrottleGate> {
        &self.gate
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Enqueue a node-block request.
    pub fn submit(&self, unit: ExecutionUnit) -> ResourceId {
        let item = QueueItem {
            id: ResourceId::new(),
            unit,
            enqueued_at: Utc::now(),
            cause: None,
        };
        let id = item.id;
        info!(item = %id, run = %item.unit.run, "Queued");
        self.state().pending.push_back(item);
        id
    }

    /// Remove a queued item. Nothing is held on its behalf.
    pub fn cancel(&self, item: ResourceId) -> Result<QueueItem> {
        let mut state = self.state();
        let position = state
            .pending
            .iter()
            .position(|queued| queued.id == item)
            .ok_or_else(|| Error::NotFound(format!("queue item {}", item)))?;
        let removed = state
            .pending
            .remove(position)
            .ok_or_else(|| Error::Internal(format!("queue item {} vanished", item)))?;
        info!(item = %item, run = %removed.unit.run, "Cancelled");
        Ok(removed)
    }

    /// Run one maintenance pass over every pending item, in arrival order.
    pub fn maintain(&self) -> MaintenanceReport {
        let mut state = self.state();
        let mut report = MaintenanceReport::default();
        let mut remaining = VecDeque::with_capacity(state.pending.len());

        while let Some(mut item) = state.pending.pop_front() {
            if let Admission::Block(cause) = self.gate.decide(&item.unit, None) {
                report.blocked.push((item.id, cause.clone()));
                item.cause = Some(cause);
                remaining.push_back(item);
                continue;
            }

            let mut first_cause = None;
            let mut placed = None;
            for node in self.candidates(&item.unit) {
                if self.gate.count_busy(&node.name) >= node.executors {
                    continue;
                }
                match self.gate.try_acquire(&item.unit, node) {
                    Ok(hold) => {
                        placed = Some((node.name.clone(), hold));
                        break;
                    }
                    Err(cause) => {
                        first_cause.get_or_insert(cause);
                    }
                }
            }

            match placed {
                Some((node, hold)) => {
                    let run = item.unit.run.clone();
                    state
                        .active
                        .entry(run.clone())
                        .or_insert_with(|| ActiveRun {
                            unit: item.unit.clone(),
                            holds: Vec::new(),
                            suspended: false,
                            started_at: Utc::now(),
                        })
                        .holds
                        .push(hold);
                    info!(
                        item = %item.id,
                        run = %run,
                        node = %node,
                        waited_ms = (Utc::now() - item.enqueued_at).num_milliseconds(),
                        "Started node block"
                    );
                    report.started.push(StartedRun {
                        item: item.id,
                        run,
                        node,
                        hold,
                    });
                }
                None => {
                    if let Some(cause) = &first_cause {
                        report.blocked.push((item.id, cause.clone()));
                    }
                    item.cause = first_cause;
                    remaining.push_back(item);
                }
            }
        }

        state.pending = remaining;
        report.pending = state.pending.len();
        debug!(
            started = report.started.len(),
            blocked = report.blocked.len(),
            pending = report.pending,
            "Queue maintenance finished"
        );
        report
    }

    /// Leave one node block of a run.
    pub fn exit_node_block(&self, hold: ResourceId) -> Result<()> {
        let mut state = self.state();
        let released = self
            .gate
            .release_hold(hold)
            .ok_or_else(|| Error::NotFound(format!("node hold {}", hold)))?;
        if let Some(active) = state.active.get_mut(&released.run) {
            active.holds.retain(|held| *held != hold);
        }
        info!(run = %released.run, node = %released.node, "Exited node block");
        Ok(())
    }

    /// Mark a run as paused. Its holds are untouched.
    pub fn suspend(&self, run: &RunRef) -> Result<()> {
        self.set_suspended(run, true)
    }

    pub fn resume(&self, run: &RunRef) -> Result<()> {
        self.set_suspended(run, false)
    }

    pub fn is_suspended(&self, run: &RunRef) -> bool {
        self.state()
            .active
            .get(run)
            .is_some_and(|active| active.suspended)
    }

    /// Finish a run: release all its holds and drop its queued requests.
    pub fn complete(&self, run: &RunRef) -> Result<()> {
        let mut state = self.state();
        let active = state
            .active
            .remove(run)
            .ok_or_else(|| Error::NotFound(format!("run {}", run)))?;
        state.pending.retain(|item| &item.unit.run != run);
        let released = self.gate.release(run);
        info!(
            run = %run,
            released,
            elapsed_ms = (Utc::now() - active.started_at).num_milliseconds(),
            "Run completed"
        );
        Ok(())
    }

    /// Throttle cause recorded for a pending item by the last pass.
    pub fn cause_of(&self, item: ResourceId) -> Option<BlockageCause> {
        self.state()
            .pending
            .iter()
            .find(|queued| queued.id == item)
            .and_then(|queued| queued.cause.clone())
    }

    pub fn pending(&self) -> Vec<QueueItem> {
        self.state().pending.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.state().pending.is_empty()
    }

    /// Units of runs that currently hold at least one node block.
    pub fn active_runs(&self) -> Vec<ExecutionUnit> {
        self.state()
            .active
            .values()
            .filter(|active| !active.holds.is_empty())
            .map(|active| active.unit.clone())
            .collect()
    }

    pub fn held_runs(&self, node: &NodeRef) -> Vec<RunRef> {
        self.gate.held_runs(node)
    }

    pub fn count_busy(&self, node: &NodeRef) -> u32 {
        self.gate.count_busy(node)
    }

    /// Nodes the unit may run on, in declaration order.
    fn candidates<'a>(&'a self, unit: &'a ExecutionUnit) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes.iter().filter(move |node| {
            unit.assigned_node
                .as_ref()
                .is_none_or(|label| node.has_label(label.as_str()))
        })
    }

    fn set_suspended(&self, run: &RunRef, suspended: bool) -> Result<()> {
        let mut state = self.state();
        let active = state
            .active
            .get_mut(run)
            .ok_or_else(|| Error::NotFound(format!("run {}", run)))?;
        active.suspended = suspended;
        info!(run = %run, suspended, holds = active.holds.len(), "Run suspension changed");
        Ok(())
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
