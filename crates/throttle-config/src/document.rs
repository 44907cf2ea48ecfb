//! Top-level throttle document parsing.

use kdl::KdlDocument;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use throttle_core::{Category, JobId, Node, ThrottleConfig};
use tracing::{debug, warn};

use crate::kdl_ext::get_first_string_arg;
use crate::throttle::{parse_category, parse_node, parse_throttle};
use crate::{ConfigError, ConfigResult};

/// A job and its throttle properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: JobId,
    pub throttle: ThrottleConfig,
}

/// Everything declared in one configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThrottleDocument {
    pub categories: Vec<Category>,
    pub jobs: Vec<JobDefinition>,
    pub nodes: Vec<Node>,
}

impl ThrottleDocument {
    pub fn job(&self, id: &JobId) -> Option<&JobDefinition> {
        self.jobs.iter().find(|job| &job.id == id)
    }
}

/// Read and parse a configuration file.
pub fn load_document(path: impl AsRef<Path>) -> ConfigResult<ThrottleDocument> {
    let content = std::fs::read_to_string(path.as_ref())?;
    parse_document(&content)
}

/// Parse a throttle configuration from KDL text.
pub fn parse_document(kdl: &str) -> ConfigResult<ThrottleDocument> {
    let doc: KdlDocument = kdl.parse()?;
    let mut parsed = ThrottleDocument::default();

    for node in doc.nodes() {
        match node.name().value() {
            "category" => parsed.categories.push(parse_category(node)?),
            "job" => {
                let id = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("job name".to_string()))?;
                let throttle = node
                    .children()
                    .and_then(|children| {
                        children
                            .nodes()
                            .iter()
                            .find(|child| child.name().value() == "throttle")
                    })
                    .map(parse_throttle)
                    .transpose()?
                    .unwrap_or_default();
                parsed.jobs.push(JobDefinition {
                    id: JobId::new(id),
                    throttle,
                });
            }
            "node" => parsed.nodes.push(parse_node(node)?),
            other => debug!(node = other, "Ignoring unknown configuration node"),
        }
    }

    check_unique(parsed.categories.iter().map(|c| c.id.as_str()), "category")?;
    check_unique(parsed.jobs.iter().map(|j| j.id.as_str()), "job")?;
    check_unique(parsed.nodes.iter().map(|n| n.name.as_str()), "node")?;

    // Unknown references are not fatal; the resolver treats them as unlimited.
    let known: HashSet<&str> = parsed.categories.iter().map(|c| c.id.as_str()).collect();
    for job in &parsed.jobs {
        for id in &job.throttle.category_ids {
            if !known.contains(id.as_str()) {
                warn!(job = %job.id, category = %id, "Job references an undefined category");
            }
        }
    }

    Ok(parsed)
}

fn check_unique<'a>(names: impl Iterator<Item = &'a str>, kind: &str) -> ConfigResult<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ConfigError::Duplicate(format!("{} '{}'", kind, name)));
        }
    }
    Ok(())
}
