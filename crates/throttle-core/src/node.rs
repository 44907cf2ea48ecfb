//! Execution nodes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::NodeRef;

/// An execution node offered by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: NodeRef,
    pub labels: BTreeSet<String>,
    /// Number of node blocks the host may run here at once.
    pub executors: u32,
}

impl Node {
    pub fn new(name: impl Into<NodeRef>, executors: u32) -> Self {
        Self {
            name: name.into(),
            labels: BTreeSet::new(),
            executors,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    /// A node matches its own name as well as its labels.
    pub fn has_label(&self, label: &str) -> bool {
        self.name.as_str() == label || self.labels.contains(label)
    }
}
