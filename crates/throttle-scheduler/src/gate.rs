//! Admission decisions.
//!
//! The host calls [`AdmissionGate::decide`] for each pending item on each
//! maintenance pass. [`ThrottleGate::try_acquire`] is the commit path: it
//! decides and takes the hold under the same lock, so two admissions can
//! never both pass the last free slot of a limit.

use std::sync::{Mutex, MutexGuard};
use throttle_core::{Admission, BlockageCause, ExecutionUnit, Node, NodeRef, ResourceId, RunRef};
use tracing::{debug, error, info};

use crate::placeholder::{NodeHold, PlaceholderTracker};
use crate::registry::{CategoryRegistry, SharedRegistry};
use crate::resolver::{LimitKey, Resolution, resolve};
use crate::tracker::ConcurrencyState;

/// Veto hook invoked by the host scheduler.
///
/// Implementations never fail; any internal problem must resolve to
/// [`Admission::Admit`].
pub trait AdmissionGate: Send + Sync {
    /// Judge `unit`, against `candidate` when the host has proposed a node.
    fn decide(&self, unit: &ExecutionUnit, candidate: Option<&Node>) -> Admission;
}

/// Category-based throttle.
pub struct ThrottleGate {
    registry: SharedRegistry,
    placeholders: Mutex<PlaceholderTracker>,
}

impl ThrottleGate {
    pub fn new(registry: SharedRegistry) -> Self {
        Self {
            registry,
            placeholders: Mutex::new(PlaceholderTracker::new()),
        }
    }

    /// Swap in new category definitions. Decisions in flight keep their snapshot.
    pub fn reload(&self, registry: CategoryRegistry) {
        self.registry.replace(registry);
    }

    /// Decide for `unit` on `node` and take the hold if admitted.
    ///
    /// Called on node-block entry.
    pub fn try_acquire(
        &self,
        unit: &ExecutionUnit,
        node: &Node,
    ) -> Result<ResourceId, BlockageCause> {
        let resolution = resolve(unit, &self.registry.snapshot());
        let (mut placeholders, healthy) = self.lock();

        if healthy {
            let state = ConcurrencyState::new(&placeholders);
            if let Admission::Block(cause) = evaluate(&resolution, unit, Some(node), &state) {
                debug!(run = %unit.run, node = %node.name, cause = %cause, "Blocked by throttle");
                return Err(cause);
            }
        }

        let hold = placeholders.acquire(&node.name, &resolution, unit);
        info!(run = %unit.run, node = %node.name, hold = %hold, "Entered node block");
        Ok(hold)
    }

    /// Drop every hold of `run`.
    ///
    /// Called on node-block exit of the run's last block, or when it finishes.
    pub fn release(&self, run: &RunRef) -> usize {
        self.lock().0.release(run)
    }

    /// Drop one hold.
    pub fn release_hold(&self, hold: ResourceId) -> Option<NodeHold> {
        self.lock().0.release_hold(hold)
    }

    /// Runs holding a slot on `node`.
    pub fn held_runs(&self, node: &NodeRef) -> Vec<RunRef> {
        self.lock().0.lookup(node)
    }

    /// Number of open node blocks on `node`.
    pub fn count_busy(&self, node: &NodeRef) -> u32 {
        ConcurrencyState::new(&self.lock().0).count_busy(node)
    }

    /// Current occupants of `limit` across all nodes.
    pub fn occupancy(&self, limit: &LimitKey) -> u32 {
        ConcurrencyState::new(&self.lock().0).count_total(limit)
    }

    /// Copy of every open hold.
    pub fn holds(&self) -> Vec<NodeHold> {
        self.lock().0.holds().cloned().collect()
    }

    // A poisoned lock still holds consistent bookkeeping: every mutation is
    // a single push or retain. Callers use the flag to fail open.
    fn lock(&self) -> (MutexGuard<'_, PlaceholderTracker>, bool) {
        match self.placeholders.lock() {
            Ok(guard) => (guard, true),
            Err(poisoned) => {
                error!("Throttle placeholder lock poisoned, admitting without checks");
                self.placeholders.clear_poison();
                (poisoned.into_inner(), false)
            }
        }
    }
}

impl AdmissionGate for ThrottleGate {
    fn decide(&self, unit: &ExecutionUnit, candidate: Option<&Node>) -> Admission {
        let resolution = resolve(unit, &self.registry.snapshot());
        if resolution.is_unthrottled() {
            return Admission::Admit;
        }

        let (placeholders, healthy) = self.lock();
        if !healthy {
            return Admission::Admit;
        }

        let admission = evaluate(
            &resolution,
            unit,
            candidate,
            &ConcurrencyState::new(&placeholders),
        );
        if let Admission::Block(cause) = &admission {
            debug!(run = %unit.run, cause = %cause, "Blocked by throttle");
        }
        admission
    }
}

/// Compare current counts against every resolved limit, in declared order.
///
/// The total limit of an entry is checked before its per-node limit; the
/// first violation is reported. Matching parameters are checked last. A
/// Combined matrix child passes a limit its siblings already hold.
fn evaluate(
    resolution: &Resolution,
    unit: &ExecutionUnit,
    candidate: Option<&Node>,
    state: &ConcurrencyState<'_>,
) -> Admission {
    let occupant = &resolution.occupant;
    // Combined matrix children are held on behalf of their parent.
    let is_sibling = &unit.run != occupant;

    for limit in &resolution.limits {
        if let Some(max) = limit.max_total() {
            let shared = is_sibling && state.is_shared_by(&limit.key, occupant, None);
            if !shared && state.count_total(&limit.key) >= max {
                return Admission::Block(BlockageCause::total(
                    limit.scope(),
                    limit.display_name(),
                    max,
                ));
            }
        }

        let Some(node) = candidate else {
            continue;
        };
        if let Some(max) = limit.max_per_node(node) {
            let shared = is_sibling && state.is_shared_by(&limit.key, occupant, Some(&node.name));
            if !shared && state.count_node(&limit.key, &node.name) >= max {
                return Admission::Block(BlockageCause::per_node(
                    limit.scope(),
                    limit.display_name(),
                    max,
                ));
            }
        }
    }

    if let Some(matching) = &resolution.matching {
        if state.has_matching_run(&occupant.job, occupant, matching, &unit.parameters) {
            return Admission::Block(BlockageCause::matching_parameters(occupant.job.as_str()));
        }
    }

    Admission::Admit
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use throttle_core::{BlockageKind, Category, CategoryId, LimitScope, ThrottleConfig};

    fn gate(categories: Vec<Category>) -> ThrottleGate {
        ThrottleGate::new(SharedRegistry::new(
            CategoryRegistry::new(categories).unwrap(),
        ))
    }

    fn unit(job: &str, number: u32, categories: &[&str]) -> ExecutionUnit {
        ExecutionUnit::new(
            RunRef::new(job, number),
            ThrottleConfig::categories(categories.iter().copied()),
        )
    }

    fn key(id: &str) -> LimitKey {
        LimitKey::Category(CategoryId::new(id))
    }

    #[test]
    fn test_total_limit_blocks_next_candidate() {
        let gate = gate(vec![Category::new("TWO_TOTAL").with_max_total(2)]);
        let node_1 = Node::new("node-1", 4);
        let node_2 = Node::new("node-2", 4);

        gate.try_acquire(&unit("a", 1, &["TWO_TOTAL"]), &node_1).unwrap();
        gate.try_acquire(&unit("b", 1, &["TWO_TOTAL"]), &node_2).unwrap();

        let third = unit("c", 1, &["TWO_TOTAL"]);
        let admission = gate.decide(&third, None);
        let cause = admission.cause().unwrap();
        assert_eq!(cause.kind, BlockageKind::TotalLimit);
        assert_eq!(
            cause.to_string(),
            "Max concurrent total throttle limit (2) reached for category 'TWO_TOTAL'"
        );
        assert!(gate.try_acquire(&third, &node_1).is_err());
        assert_eq!(gate.occupancy(&key("TWO_TOTAL")), 2);
    }

    #[test]
    fn test_release_admits_exactly_one() {
        let gate = gate(vec![Category::new("C").with_max_total(1)]);
        let node = Node::new("node-1", 4);

        gate.try_acquire(&unit("a", 1, &["C"]), &node).unwrap();
        assert_eq!(gate.release(&RunRef::new("a", 1)), 1);

        gate.try_acquire(&unit("b", 1, &["C"]), &node).unwrap();
        assert!(gate.try_acquire(&unit("c", 1, &["C"]), &node).is_err());
    }

    #[test]
    fn test_per_node_limit_independent_of_total() {
        let gate = gate(vec![Category::new("ONE_PER_NODE").with_max_per_node(1)]);
        let node_1 = Node::new("node-1", 4);
        let node_2 = Node::new("node-2", 4);

        gate.try_acquire(&unit("a", 1, &["ONE_PER_NODE"]), &node_1).unwrap();

        let second = unit("b", 1, &["ONE_PER_NODE"]);
        assert!(gate.decide(&second, None).is_admitted());
        let cause = gate.try_acquire(&second, &node_1).unwrap_err();
        assert_eq!(cause.kind, BlockageKind::PerNodeLimit);
        assert_eq!(cause.limit, 1);
        gate.try_acquire(&second, &node_2).unwrap();
    }

    #[test]
    fn test_labeled_limit_applies_on_labeled_nodes_only() {
        let gate = gate(vec![
            Category::new("L").with_max_per_node(2).with_node_label("small", 1),
        ]);
        let small = Node::new("small-1", 4).with_label("small");
        let large = Node::new("large-1", 4);

        gate.try_acquire(&unit("a", 1, &["L"]), &small).unwrap();
        assert!(gate.try_acquire(&unit("b", 1, &["L"]), &small).is_err());

        gate.try_acquire(&unit("c", 1, &["L"]), &large).unwrap();
        gate.try_acquire(&unit("d", 1, &["L"]), &large).unwrap();
        assert!(gate.try_acquire(&unit("e", 1, &["L"]), &large).is_err());
    }

    #[test]
    fn test_jobs_share_category_pool() {
        let gate = gate(vec![Category::new("SHARED").with_max_total(1)]);
        let node = Node::new("node-1", 4);

        gate.try_acquire(&unit("first-job", 1, &["SHARED"]), &node).unwrap();
        assert!(!gate.decide(&unit("second-job", 1, &["SHARED"]), None).is_admitted());
    }

    #[test]
    fn test_unlimited_category_never_blocks() {
        let gate = gate(vec![Category::new("FREE")]);
        let node = Node::new("node-1", 100);

        for number in 1..=50 {
            gate.try_acquire(&unit("job", number, &["FREE"]), &node).unwrap();
        }
        assert_eq!(gate.count_busy(&node.name), 50);
    }

    #[test]
    fn test_unknown_category_fails_open() {
        let gate = gate(vec![]);
        let node = Node::new("node-1", 4);

        gate.try_acquire(&unit("a", 1, &["GHOST"]), &node).unwrap();
        assert!(gate.decide(&unit("b", 1, &["GHOST"]), Some(&node)).is_admitted());
    }

    #[test]
    fn test_first_violated_category_is_reported() {
        let gate = gate(vec![
            Category::new("X").with_display_name("Ex").with_max_total(1),
            Category::new("Y").with_display_name("Why").with_max_total(1),
        ]);
        let node = Node::new("node-1", 4);
        gate.try_acquire(&unit("a", 1, &["X", "Y"]), &node).unwrap();

        let cause = gate.try_acquire(&unit("b", 1, &["Y", "X"]), &node).unwrap_err();
        assert_eq!(cause.display_name, "Why");

        let cause = gate.try_acquire(&unit("c", 1, &["X", "Y"]), &node).unwrap_err();
        assert_eq!(cause.display_name, "Ex");
    }

    #[test]
    fn test_self_limited_project() {
        let gate = gate(vec![]);
        let node = Node::new("node-1", 4);
        let config = ThrottleConfig::self_limited(Some(1), Some(2));
        let run = |number| ExecutionUnit::new(RunRef::new("deploy", number), config.clone());

        gate.try_acquire(&run(1), &node).unwrap();
        let cause = gate.try_acquire(&run(2), &node).unwrap_err();
        assert_eq!(cause.scope, LimitScope::Project);
        assert_eq!(cause.kind, BlockageKind::PerNodeLimit);

        gate.try_acquire(&run(2), &Node::new("node-2", 4)).unwrap();
        let cause = gate.decide(&run(3), None).cause().cloned().unwrap();
        assert_eq!(
            cause.to_string(),
            "Max concurrent total throttle limit (2) reached for project 'deploy'"
        );

        // Other jobs are unaffected by this job's self limit.
        let other = ExecutionUnit::new(RunRef::new("build", 1), config.clone());
        assert!(gate.decide(&other, Some(&node)).is_admitted());
    }

    #[test]
    fn test_matching_parameters() {
        let gate = gate(vec![]);
        let node = Node::new("node-1", 4);
        let config =
            ThrottleConfig::categories(Vec::<&str>::new()).with_matching_parameters(["TARGET"]);
        let run = |number, target: &str| {
            ExecutionUnit::new(RunRef::new("deploy", number), config.clone())
                .with_parameter("TARGET", target)
        };

        gate.try_acquire(&run(1, "prod"), &node).unwrap();
        let cause = gate.decide(&run(2, "prod"), None).cause().cloned().unwrap();
        assert_eq!(cause.kind, BlockageKind::MatchingParameters);
        assert!(gate.decide(&run(3, "staging"), None).is_admitted());
    }

    #[test]
    fn test_combined_matrix_children_do_not_block_each_other() {
        let gate = gate(vec![Category::new("M").with_max_total(1)]);
        let node_1 = Node::new("node-1", 4);
        let node_2 = Node::new("node-2", 4);
        let parent = RunRef::new("matrix", 1);
        let child = |axis: &str, aggregation| {
            ExecutionUnit::new(
                RunRef::new(format!("matrix/axis={}", axis), 1),
                ThrottleConfig::categories(["M"]).with_matrix_aggregation(aggregation),
            )
            .as_matrix_child(parent.clone())
        };

        use throttle_core::MatrixAggregation::{Combined, PerChild};
        gate.try_acquire(&child("x", Combined), &node_1).unwrap();
        gate.try_acquire(&child("y", Combined), &node_2).unwrap();
        assert_eq!(gate.occupancy(&key("M")), 1);

        assert!(gate.try_acquire(&child("z", PerChild), &node_1).is_err());
        assert!(!gate.decide(&unit("other", 1, &["M"]), None).is_admitted());
    }

    #[test]
    fn test_node_blocks_of_one_run_each_take_a_slot() {
        let gate = gate(vec![
            Category::new("ONE_TOTAL").with_max_total(1),
            Category::new("ONE_PER_NODE").with_max_per_node(1),
        ]);
        let node_1 = Node::new("node-1", 8);
        let node_2 = Node::new("node-2", 8);

        let total = unit("pipeline", 1, &["ONE_TOTAL"]);
        gate.try_acquire(&total, &node_1).unwrap();
        let cause = gate.try_acquire(&total, &node_2).unwrap_err();
        assert_eq!(cause.kind, BlockageKind::TotalLimit);
        assert!(!gate.decide(&total, None).is_admitted());
        assert_eq!(gate.occupancy(&key("ONE_TOTAL")), 1);

        let per_node = unit("build", 1, &["ONE_PER_NODE"]);
        gate.try_acquire(&per_node, &node_1).unwrap();
        let cause = gate.try_acquire(&per_node, &node_1).unwrap_err();
        assert_eq!(cause.kind, BlockageKind::PerNodeLimit);
        gate.try_acquire(&per_node, &node_2).unwrap();
        assert_eq!(gate.holds().len(), 3);
    }

    #[test]
    fn test_reload_applies_to_next_decision() {
        let gate = gate(vec![Category::new("R").with_max_total(1)]);
        let node = Node::new("node-1", 4);
        gate.try_acquire(&unit("a", 1, &["R"]), &node).unwrap();
        assert!(!gate.decide(&unit("b", 1, &["R"]), None).is_admitted());

        gate.reload(CategoryRegistry::new(vec![Category::new("R").with_max_total(3)]).unwrap());
        assert!(gate.decide(&unit("b", 1, &["R"]), None).is_admitted());
    }

    #[test]
    fn test_poisoned_lock_fails_open() {
        let gate = Arc::new(gate(vec![Category::new("P").with_max_total(1)]));
        let node = Node::new("node-1", 4);
        gate.try_acquire(&unit("a", 1, &["P"]), &node).unwrap();

        let poisoner = Arc::clone(&gate);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.placeholders.lock().unwrap();
            panic!("poison the placeholder lock");
        })
        .join();

        assert!(gate.decide(&unit("b", 1, &["P"]), None).is_admitted());
        // Poison is cleared after recovery; checks resume on the next call.
        assert!(!gate.decide(&unit("c", 1, &["P"]), None).is_admitted());
    }

    #[test]
    fn test_concurrent_admissions_respect_total() {
        let gate = Arc::new(gate(vec![Category::new("RACE").with_max_total(3)]));
        let node = Node::new("node-1", 64);

        let handles: Vec<_> = (1..=32)
            .map(|number| {
                let gate = Arc::clone(&gate);
                let node = node.clone();
                std::thread::spawn(move || {
                    gate.try_acquire(&unit("job", number, &["RACE"]), &node).is_ok()
                })
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(admitted, 3);
        assert_eq!(gate.occupancy(&key("RACE")), 3);
    }
}
