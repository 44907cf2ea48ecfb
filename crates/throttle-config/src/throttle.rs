//! Category, job throttle and node parsing.

use kdl::KdlNode;
use throttle_core::{
    Category, CategoryId, MatchingParameters, MatrixAggregation, Node, NodeLabeledLimit,
    ThrottleConfig, ThrottleMode,
};

use crate::kdl_ext::{
    get_all_string_args, get_bool_arg, get_bool_prop, get_count_prop, get_first_string_arg,
    get_limit_arg, get_limit_prop, get_string_prop,
};
use crate::{ConfigError, ConfigResult};

/// Default executor count for nodes that do not declare one.
const DEFAULT_EXECUTORS: u32 = 1;

/// Parse a `category "<id>" { ... }` node.
pub fn parse_category(node: &KdlNode) -> ConfigResult<Category> {
    let id = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("category id".to_string()))?;

    let mut category = Category::new(id);

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "display-name" => {
                    if let Some(name) = get_first_string_arg(child) {
                        category.display_name = name;
                    }
                }
                "max-per-node" => category.max_per_node = get_limit_arg(child),
                "max-total" => category.max_total = get_limit_arg(child),
                "node-label" => {
                    let label = get_first_string_arg(child).ok_or_else(|| {
                        ConfigError::MissingField(format!(
                            "node-label name in category '{}'",
                            category.id
                        ))
                    })?;
                    category.node_labeled_limits.push(NodeLabeledLimit {
                        label,
                        max_per_labeled_node: get_limit_prop(child, "max-per-node"),
                    });
                }
                _ => {}
            }
        }
    }

    Ok(category)
}

/// Parse the `throttle` child of a job node.
pub fn parse_throttle(node: &KdlNode) -> ConfigResult<ThrottleConfig> {
    let mut config = ThrottleConfig {
        enabled: get_bool_prop(node, "enabled").unwrap_or(true),
        ..ThrottleConfig::default()
    };

    config.mode = match get_string_prop(node, "option").as_deref() {
        None | Some("category") => ThrottleMode::Category,
        Some("project") => ThrottleMode::SelfLimited,
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                field: "throttle option".to_string(),
                message: format!("unknown throttle option: {}", other),
            });
        }
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "categories" | "category" => {
                    config
                        .category_ids
                        .extend(get_all_string_args(child).into_iter().map(CategoryId::from));
                }
                "max-per-node" => config.per_node_self_limit = get_limit_arg(child),
                "max-total" => config.total_self_limit = get_limit_arg(child),
                "limit-one-job-per-node" => {
                    config.limit_one_job_per_node = get_bool_arg(child).unwrap_or(true);
                }
                "matching-params" => {
                    config.matching_parameters = Some(MatchingParameters {
                        names: get_all_string_args(child),
                    });
                }
                "matrix" => {
                    config.throttle_matrix_parent = get_bool_prop(child, "builds").unwrap_or(true);
                    config.matrix_aggregation = if get_bool_prop(child, "configurations")
                        .unwrap_or(false)
                    {
                        MatrixAggregation::PerChild
                    } else {
                        MatrixAggregation::Combined
                    };
                }
                _ => {}
            }
        }
    }

    Ok(config)
}

/// Parse a `node "<name>" executors=N { labels ... }` node.
pub fn parse_node(node: &KdlNode) -> ConfigResult<Node> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("node name".to_string()))?;
    let executors = get_count_prop(node, "executors").unwrap_or(DEFAULT_EXECUTORS);

    let mut parsed = Node::new(name, executors);
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() == "labels" {
                parsed.labels.extend(get_all_string_args(child));
            }
        }
    }

    Ok(parsed)
}
