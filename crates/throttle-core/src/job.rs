//! Job throttle configuration and execution units.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{CategoryId, JobId, NodeRef, RunRef};

/// Where a job's limits come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ThrottleMode {
    /// Limits come from the shared categories the job references.
    #[default]
    Category,
    /// Limits come from the job's own configuration and apply to that job alone.
    SelfLimited,
}

/// How sub-executions of a multi-configuration run are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MatrixAggregation {
    /// All configurations of one run count as a single occupant.
    #[default]
    Combined,
    /// Every configuration counts as its own occupant.
    PerChild,
}

/// Limit a job to one running build per combination of parameter values.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MatchingParameters {
    /// Parameters to compare. Empty compares every parameter.
    pub names: Vec<String>,
}

impl MatchingParameters {
    pub fn matches(&self, a: &BTreeMap<String, String>, b: &BTreeMap<String, String>) -> bool {
        if self.names.is_empty() {
            return a == b;
        }
        self.names.iter().all(|name| a.get(name) == b.get(name))
    }
}

/// Throttle properties attached to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub enabled: bool,
    pub mode: ThrottleMode,
    /// Categories in evaluation order.
    pub category_ids: Vec<CategoryId>,
    pub per_node_self_limit: Option<u32>,
    pub total_self_limit: Option<u32>,
    /// Forces the per-node self limit to one.
    pub limit_one_job_per_node: bool,
    pub matching_parameters: Option<MatchingParameters>,
    pub matrix_aggregation: MatrixAggregation,
    /// Whether the parent of a multi-configuration run is throttled.
    pub throttle_matrix_parent: bool,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: ThrottleMode::Category,
            category_ids: Vec::new(),
            per_node_self_limit: None,
            total_self_limit: None,
            limit_one_job_per_node: false,
            matching_parameters: None,
            matrix_aggregation: MatrixAggregation::Combined,
            throttle_matrix_parent: true,
        }
    }
}

impl ThrottleConfig {
    /// Enabled configuration throttled by shared categories.
    pub fn categories<I, C>(ids: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<CategoryId>,
    {
        Self {
            enabled: true,
            mode: ThrottleMode::Category,
            category_ids: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Enabled configuration limited by the job's own values (`None` = unlimited).
    pub fn self_limited(per_node: Option<u32>, total: Option<u32>) -> Self {
        Self {
            enabled: true,
            mode: ThrottleMode::SelfLimited,
            per_node_self_limit: per_node,
            total_self_limit: total,
            ..Self::default()
        }
    }

    pub fn with_matching_parameters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.matching_parameters = Some(MatchingParameters {
            names: names.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn with_matrix_aggregation(mut self, aggregation: MatrixAggregation) -> Self {
        self.matrix_aggregation = aggregation;
        self
    }

    pub fn effective_per_node_self_limit(&self) -> Option<u32> {
        if self.limit_one_job_per_node {
            Some(1)
        } else {
            self.per_node_self_limit
        }
    }
}

/// Position of a unit within a multi-configuration run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MatrixPosition {
    #[default]
    Standalone,
    Parent,
    Child { parent: RunRef },
}

/// A runnable instance of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionUnit {
    pub run: RunRef,
    /// Node the unit is pinned to, if any.
    pub assigned_node: Option<NodeRef>,
    pub throttle: ThrottleConfig,
    pub parameters: BTreeMap<String, String>,
    pub matrix: MatrixPosition,
}

impl ExecutionUnit {
    pub fn new(run: RunRef, throttle: ThrottleConfig) -> Self {
        Self {
            run,
            assigned_node: None,
            throttle,
            parameters: BTreeMap::new(),
            matrix: MatrixPosition::Standalone,
        }
    }

    pub fn job(&self) -> &JobId {
        &self.run.job
    }

    pub fn on_node(mut self, node: impl Into<NodeRef>) -> Self {
        self.assigned_node = Some(node.into());
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn as_matrix_parent(mut self) -> Self {
        self.matrix = MatrixPosition::Parent;
        self
    }

    pub fn as_matrix_child(mut self, parent: RunRef) -> Self {
        self.matrix = MatrixPosition::Child { parent };
        self
    }
}
