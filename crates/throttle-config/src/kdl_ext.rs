// Helper functions for extracting values from KDL nodes

use kdl::{KdlNode, KdlValue};
use tracing::warn;

pub(crate) fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    first_arg(node)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

pub(crate) fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_bool_prop(node: &KdlNode, name: &str) -> Option<bool> {
    node.get(name).and_then(|v| v.as_bool())
}

pub(crate) fn get_bool_arg(node: &KdlNode) -> Option<bool> {
    first_arg(node).and_then(|v| v.as_bool())
}

/// First positional argument as a limit. Zero means unlimited.
pub(crate) fn get_limit_arg(node: &KdlNode) -> Option<u32> {
    first_arg(node).and_then(|v| to_limit(node.name().value(), v))
}

/// Named property as a limit. Zero means unlimited.
pub(crate) fn get_limit_prop(node: &KdlNode, name: &str) -> Option<u32> {
    node.get(name).and_then(|v| to_limit(name, v))
}

/// Named property as a plain count, without the zero-means-unlimited rule.
pub(crate) fn get_count_prop(node: &KdlNode, name: &str) -> Option<u32> {
    node.get(name)
        .and_then(|v| v.as_integer())
        .and_then(|i| u32::try_from(i).ok())
}

fn first_arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

// Malformed limits are normalized to unlimited rather than rejected.
fn to_limit(field: &str, value: &KdlValue) -> Option<u32> {
    match value.as_integer().map(u32::try_from) {
        Some(Ok(limit)) => (limit > 0).then_some(limit),
        _ => {
            warn!(field, value = %value, "Ignoring malformed throttle limit, treating as unlimited");
            None
        }
    }
}
