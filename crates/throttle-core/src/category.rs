//! Category definitions.
//!
//! A category is a named concurrency ceiling shared by every job that
//! references it. Limits are optional; `None` means unlimited.

use serde::{Deserialize, Serialize};

use crate::CategoryId;
use crate::node::Node;

/// Normalize a raw configured limit: zero means unlimited.
pub fn limit_from_raw(raw: u32) -> Option<u32> {
    (raw > 0).then_some(raw)
}

/// A shared concurrency ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Unique identifier.
    pub id: CategoryId,
    /// Name shown in blockage messages.
    pub display_name: String,
    /// Maximum concurrent holders on any one node.
    pub max_per_node: Option<u32>,
    /// Maximum concurrent holders across all nodes.
    pub max_total: Option<u32>,
    /// Per-node limits that apply only on nodes carrying a label.
    pub node_labeled_limits: Vec<NodeLabeledLimit>,
}

/// A per-node limit scoped to nodes with a given label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLabeledLimit {
    pub label: String,
    pub max_per_labeled_node: Option<u32>,
}

impl Category {
    /// Create an unlimited category whose display name is its id.
    pub fn new(id: impl Into<CategoryId>) -> Self {
        let id = id.into();
        Self {
            display_name: id.to_string(),
            id,
            max_per_node: None,
            max_total: None,
            node_labeled_limits: Vec::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_max_per_node(mut self, max: u32) -> Self {
        self.max_per_node = limit_from_raw(max);
        self
    }

    pub fn with_max_total(mut self, max: u32) -> Self {
        self.max_total = limit_from_raw(max);
        self
    }

    pub fn with_node_label(mut self, label: impl Into<String>, max: u32) -> Self {
        self.node_labeled_limits.push(NodeLabeledLimit {
            label: label.into(),
            max_per_labeled_node: limit_from_raw(max),
        });
        self
    }

    /// Per-node limit that applies on `node`.
    ///
    /// The first labeled limit whose label the node carries wins over
    /// `max_per_node`.
    pub fn per_node_limit_for(&self, node: &Node) -> Option<u32> {
        self.node_labeled_limits
            .iter()
            .find(|pair| node.has_label(&pair.label))
            .map(|pair| pair.max_per_labeled_node)
            .unwrap_or(self.max_per_node)
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_per_node.is_none()
            && self.max_total.is_none()
            && self
                .node_labeled_limits
                .iter()
                .all(|pair| pair.max_per_labeled_node.is_none())
    }
}
