//! Admission outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which limit stopped an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockageKind {
    PerNodeLimit,
    TotalLimit,
    MatchingParameters,
}

/// Whether the violated limit belongs to a shared category or to the job itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitScope {
    Category,
    Project,
}

/// Reason attached to a queued item that was not admitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockageCause {
    pub kind: BlockageKind,
    pub scope: LimitScope,
    /// Category display name, or the job id for project limits.
    pub display_name: String,
    pub limit: u32,
}

impl BlockageCause {
    pub fn total(scope: LimitScope, display_name: impl Into<String>, limit: u32) -> Self {
        Self {
            kind: BlockageKind::TotalLimit,
            scope,
            display_name: display_name.into(),
            limit,
        }
    }

    pub fn per_node(scope: LimitScope, display_name: impl Into<String>, limit: u32) -> Self {
        Self {
            kind: BlockageKind::PerNodeLimit,
            scope,
            display_name: display_name.into(),
            limit,
        }
    }

    pub fn matching_parameters(job: impl Into<String>) -> Self {
        Self {
            kind: BlockageKind::MatchingParameters,
            scope: LimitScope::Project,
            display_name: job.into(),
            limit: 1,
        }
    }

    /// Short description shown by the host for a blocked item.
    pub fn short_description(&self) -> String {
        let target = match self.scope {
            LimitScope::Category => format!("category '{}'", self.display_name),
            LimitScope::Project => format!("project '{}'", self.display_name),
        };
        match self.kind {
            BlockageKind::TotalLimit => format!(
                "Max concurrent total throttle limit ({}) reached for {}",
                self.limit, target
            ),
            BlockageKind::PerNodeLimit => format!(
                "Max concurrent per node throttle limit ({}) reached for {}",
                self.limit, target
            ),
            BlockageKind::MatchingParameters => format!(
                "A build of '{}' with matching parameters is already running",
                self.display_name
            ),
        }
    }
}

impl fmt::Display for BlockageCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_description())
    }
}

/// Result of one admission decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Admission {
    Admit,
    Block(BlockageCause),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admit)
    }

    pub fn cause(&self) -> Option<&BlockageCause> {
        match self {
            Admission::Admit => None,
            Admission::Block(cause) => Some(cause),
        }
    }
}
