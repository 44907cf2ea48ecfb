//! KDL configuration parsing for the throttle controller.
//!
//! This crate handles parsing of:
//! - Category definitions (shared concurrency ceilings)
//! - Job throttle properties
//! - Node declarations used by the reference host and the CLI

pub mod document;
pub mod error;
mod kdl_ext;
pub mod throttle;

pub use document::{JobDefinition, ThrottleDocument, load_document, parse_document};
pub use error::{ConfigError, ConfigResult};
