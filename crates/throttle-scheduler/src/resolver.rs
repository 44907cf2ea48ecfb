//! Maps an execution unit to the limits it participates in.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use throttle_core::{
    Category, CategoryId, ExecutionUnit, JobId, LimitScope, MatchingParameters,
    MatrixAggregation, MatrixPosition, Node, RunRef, ThrottleMode,
};
use tracing::warn;

use crate::registry::CategoryRegistry;

/// What a placeholder slot counts against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum LimitKey {
    /// A shared category.
    Category(CategoryId),
    /// The synthetic self-limit of one job.
    Project(JobId),
}

impl fmt::Display for LimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitKey::Category(id) => write!(f, "category:{}", id),
            LimitKey::Project(job) => write!(f, "project:{}", job),
        }
    }
}

/// One limit source with the definition captured from the registry snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedLimit {
    pub key: LimitKey,
    pub definition: Category,
}

impl ResolvedLimit {
    pub fn scope(&self) -> LimitScope {
        match self.key {
            LimitKey::Category(_) => LimitScope::Category,
            LimitKey::Project(_) => LimitScope::Project,
        }
    }

    pub fn display_name(&self) -> &str {
        &self.definition.display_name
    }

    pub fn max_total(&self) -> Option<u32> {
        self.definition.max_total
    }

    pub fn max_per_node(&self, node: &Node) -> Option<u32> {
        self.definition.per_node_limit_for(node)
    }
}

/// Everything the gate needs to judge one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// Identity counted against limits. Combined matrix children share
    /// their parent's identity.
    pub occupant: RunRef,
    /// Limits in evaluation order.
    pub limits: Vec<ResolvedLimit>,
    pub matching: Option<MatchingParameters>,
}

impl Resolution {
    pub fn unthrottled(occupant: RunRef) -> Self {
        Self {
            occupant,
            limits: Vec::new(),
            matching: None,
        }
    }

    pub fn keys(&self) -> Vec<LimitKey> {
        self.limits.iter().map(|limit| limit.key.clone()).collect()
    }

    pub fn is_unthrottled(&self) -> bool {
        self.limits.is_empty() && self.matching.is_none()
    }
}

/// Resolve the limits for `unit` against a registry snapshot.
///
/// Unknown category ids resolve to an unlimited entry instead of an error.
pub fn resolve(unit: &ExecutionUnit, registry: &CategoryRegistry) -> Resolution {
    let config = &unit.throttle;

    let occupant = match (&unit.matrix, config.matrix_aggregation) {
        (MatrixPosition::Child { parent }, MatrixAggregation::Combined) => parent.clone(),
        _ => unit.run.clone(),
    };

    if !config.enabled {
        return Resolution::unthrottled(occupant);
    }
    if unit.matrix == MatrixPosition::Parent && !config.throttle_matrix_parent {
        return Resolution::unthrottled(occupant);
    }

    let limits = match config.mode {
        ThrottleMode::Category => {
            let mut seen = HashSet::new();
            config
                .category_ids
                .iter()
                .filter(|id| seen.insert(*id))
                .map(|id| {
                    let definition = registry.lookup(id).cloned().unwrap_or_else(|| {
                        warn!(
                            run = %unit.run,
                            category = %id,
                            "Unknown throttle category, treating as unlimited"
                        );
                        Category::new(id.clone())
                    });
                    ResolvedLimit {
                        key: LimitKey::Category(id.clone()),
                        definition,
                    }
                })
                .collect()
        }
        ThrottleMode::SelfLimited => {
            let job = occupant.job.clone();
            let mut definition = Category::new(job.as_str());
            definition.max_per_node = config.effective_per_node_self_limit();
            definition.max_total = config.total_self_limit;
            vec![ResolvedLimit {
                key: LimitKey::Project(job),
                definition,
            }]
        }
    };

    Resolution {
        occupant,
        limits,
        matching: config.matching_parameters.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use throttle_core::ThrottleConfig;

    fn registry() -> CategoryRegistry {
        CategoryRegistry::new(vec![
            Category::new("A").with_max_total(2),
            Category::new("B").with_max_per_node(1),
        ])
        .unwrap()
    }

    #[test]
    fn test_resolves_categories_in_order() {
        let unit = ExecutionUnit::new(
            RunRef::new("job", 1),
            ThrottleConfig::categories(["B", "A", "B"]),
        );

        let resolution = resolve(&unit, &registry());
        assert_eq!(
            resolution.keys(),
            vec![
                LimitKey::Category(CategoryId::new("B")),
                LimitKey::Category(CategoryId::new("A")),
            ]
        );
        assert_eq!(resolution.limits[1].max_total(), Some(2));
        assert_eq!(resolution.occupant, RunRef::new("job", 1));
    }

    #[test]
    fn test_unknown_category_is_unlimited() {
        let unit = ExecutionUnit::new(
            RunRef::new("job", 1),
            ThrottleConfig::categories(["missing"]),
        );

        let resolution = resolve(&unit, &registry());
        assert_eq!(resolution.limits.len(), 1);
        assert!(resolution.limits[0].definition.is_unlimited());
    }

    #[test]
    fn test_disabled_is_unthrottled() {
        let mut config = ThrottleConfig::categories(["A"]);
        config.enabled = false;
        let unit = ExecutionUnit::new(RunRef::new("job", 1), config);

        assert!(resolve(&unit, &registry()).is_unthrottled());
    }

    #[test]
    fn test_self_limited_uses_job_config() {
        let mut config = ThrottleConfig::self_limited(Some(3), Some(5));
        config.limit_one_job_per_node = true;
        let unit = ExecutionUnit::new(RunRef::new("deploy", 7), config);

        let resolution = resolve(&unit, &registry());
        assert_eq!(
            resolution.keys(),
            vec![LimitKey::Project(JobId::new("deploy"))]
        );
        let limit = &resolution.limits[0];
        assert_eq!(limit.scope(), LimitScope::Project);
        assert_eq!(limit.max_total(), Some(5));
        assert_eq!(limit.max_per_node(&Node::new("n", 2)), Some(1));
    }

    #[test]
    fn test_matrix_children_share_parent_identity_when_combined() {
        let parent = RunRef::new("matrix", 4);
        let child = ExecutionUnit::new(
            RunRef::new("matrix/axis=a", 4),
            ThrottleConfig::categories(["A"]),
        )
        .as_matrix_child(parent.clone());

        assert_eq!(resolve(&child, &registry()).occupant, parent);

        let per_child = ExecutionUnit {
            throttle: ThrottleConfig::categories(["A"])
                .with_matrix_aggregation(MatrixAggregation::PerChild),
            ..child
        };
        assert_eq!(
            resolve(&per_child, &registry()).occupant,
            RunRef::new("matrix/axis=a", 4)
        );
    }

    #[test]
    fn test_matrix_parent_can_be_exempt() {
        let mut config = ThrottleConfig::categories(["A"]);
        config.throttle_matrix_parent = false;
        let unit = ExecutionUnit::new(RunRef::new("matrix", 1), config).as_matrix_parent();

        assert!(resolve(&unit, &registry()).is_unthrottled());
    }
}
