//! CLI command implementations.

pub mod explain;

use anyhow::Result;

pub fn validate(path: &str) -> Result<()> {
    match throttle_config::load_document(path) {
        Ok(document) => {
            println!(
                "Configuration is valid: {} categories, {} jobs, {} nodes",
                document.categories.len(),
                document.jobs.len(),
                document.nodes.len()
            );
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
