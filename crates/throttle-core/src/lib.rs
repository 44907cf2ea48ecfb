//! Core domain types for the throttle admission controller.
//!
//! This crate contains:
//! - Identifiers for categories, jobs, runs, nodes and holds
//! - Category definitions and job throttle configuration
//! - Execution units and nodes as seen by the host queue
//! - Admission outcomes and blockage causes

pub mod category;
pub mod cause;
pub mod error;
pub mod id;
pub mod job;
pub mod node;

pub use category::{Category, NodeLabeledLimit, limit_from_raw};
pub use cause::{Admission, BlockageCause, BlockageKind, LimitScope};
pub use error::{Error, Result};
pub use id::{CategoryId, JobId, NodeRef, ResourceId, RunRef};
pub use job::{
    ExecutionUnit, MatchingParameters, MatrixAggregation, MatrixPosition, ThrottleConfig,
    ThrottleMode,
};
pub use node::Node;
