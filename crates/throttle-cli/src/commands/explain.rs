//! Explain a single admission decision.

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use throttle_config::ThrottleDocument;
use throttle_core::{BlockageCause, ExecutionUnit, Node, NodeRef, RunRef};
use throttle_scheduler::{CategoryRegistry, HostQueue, SharedRegistry, ThrottleGate};
use tracing::warn;

/// What to explain.
#[derive(Debug, Clone, Default)]
pub struct ExplainRequest {
    pub job: String,
    pub node: Option<String>,
    /// `<job>@<node>` runs started before the check.
    pub running: Vec<String>,
    /// `NAME=VALUE` parameters of the checked run.
    pub params: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub run: RunRef,
    pub admitted: bool,
    pub node: Option<NodeRef>,
    pub cause: Option<BlockageCause>,
    pub message: String,
}

pub fn run(path: &str, request: &ExplainRequest, json: bool) -> Result<()> {
    let document = throttle_config::load_document(path)
        .with_context(|| format!("failed to load {}", path))?;
    let explanation = explain(&document, request)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&explanation)?);
    } else {
        println!("{}: {}", explanation.run, explanation.message);
    }
    Ok(())
}

pub fn explain(document: &ThrottleDocument, request: &ExplainRequest) -> Result<Explanation> {
    let running = request
        .running
        .iter()
        .map(|spec| {
            spec.split_once('@')
                .filter(|(job, node)| !job.is_empty() && !node.is_empty())
                .ok_or_else(|| anyhow!("expected <job>@<node>, got '{}'", spec))
        })
        .collect::<Result<Vec<_>>>()?;

    let registry = CategoryRegistry::new(document.categories.clone())?;
    let gate = Arc::new(ThrottleGate::new(SharedRegistry::new(registry)));
    let queue = HostQueue::new(nodes_for(document, request, &running), gate);

    let mut next_number: HashMap<String, u32> = HashMap::new();
    let mut next_run = |job: &str| {
        let number = next_number.entry(job.to_string()).or_insert(0);
        *number += 1;
        RunRef::new(job, *number)
    };

    for (job, node) in &running {
        let run = next_run(*job);
        queue.submit(unit_for(document, run.clone()).on_node(*node));
        if queue.maintain().started.is_empty() {
            warn!(
                run = %run,
                node = %node,
                "Running job could not be placed; its limits are already full"
            );
        }
    }

    let mut unit = unit_for(document, next_run(request.job.as_str()));
    if let Some(node) = &request.node {
        unit = unit.on_node(node.as_str());
    }
    for param in &request.params {
        let (name, value) = param
            .split_once('=')
            .ok_or_else(|| anyhow!("expected NAME=VALUE, got '{}'", param))?;
        unit = unit.with_parameter(name, value);
    }
    let run = unit.run.clone();

    let item = queue.submit(unit);
    let report = queue.maintain();

    let explanation = match report.started.iter().find(|started| started.item == item) {
        Some(started) => Explanation {
            run,
            admitted: true,
            message: format!("admitted on {}", started.node),
            node: Some(started.node.clone()),
            cause: None,
        },
        None => {
            let cause = queue.cause_of(item);
            let message = cause
                .as_ref()
                .map(BlockageCause::short_description)
                .unwrap_or_else(|| "waiting for a free executor on a matching node".to_string());
            Explanation {
                run,
                admitted: false,
                node: None,
                cause,
                message,
            }
        }
    };
    Ok(explanation)
}

fn unit_for(document: &ThrottleDocument, run: RunRef) -> ExecutionUnit {
    let throttle = match document.job(&run.job) {
        Some(job) => job.throttle.clone(),
        None => {
            warn!(job = %run.job, "Job not defined in configuration, treating as unthrottled");
            Default::default()
        }
    };
    ExecutionUnit::new(run, throttle)
}

// Without declared nodes every referenced name becomes a node, with no
// executor bound so only the throttle decides.
fn nodes_for(
    document: &ThrottleDocument,
    request: &ExplainRequest,
    running: &[(&str, &str)],
) -> Vec<Node> {
    if !document.nodes.is_empty() {
        return document.nodes.clone();
    }
    let mut names: BTreeSet<&str> = running.iter().map(|(_, node)| *node).collect();
    names.insert(request.node.as_deref().unwrap_or("built-in"));
    names
        .into_iter()
        .map(|name| Node::new(name, u32::MAX))
        .collect()
}
