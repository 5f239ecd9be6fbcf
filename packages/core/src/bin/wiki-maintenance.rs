//! Wiki maintenance tool
//!
//! Offline access to the ordering engine for a WikiFlow database:
//!
//! ```bash
//! # List spaces
//! cargo run --bin wiki-maintenance -- list
//!
//! # Check the sort_order / nested-set invariant (all spaces when omitted)
//! cargo run --bin wiki-maintenance -- verify [space_id]
//!
//! # Re-derive ranges from sort_order (all spaces when omitted)
//! cargo run --bin wiki-maintenance -- rebuild [space_id]
//!
//! # Print the management view as JSON
//! cargo run --bin wiki-maintenance -- tree <space_id>
//! ```
//!
//! The database is located through `WIKIFLOW_DB_PATH` (see `WikiConfig`).
//! Log output is controlled with `RUST_LOG`, defaulting to
//! `wiki_maintenance=info,wikiflow_core=info`.

use anyhow::{anyhow, bail, Context};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use wikiflow_core::services::{StaticRoleAccess, WikiService};
use wikiflow_core::WikiConfig;

const USAGE: &str = "usage: wiki-maintenance <list | verify [space_id] | rebuild [space_id] | tree <space_id>>";

async fn target_spaces(service: &WikiService, space_id: Option<&str>) -> anyhow::Result<Vec<String>> {
    match space_id {
        Some(id) => Ok(vec![service.get_space(id).await?.id]),
        None => Ok(service
            .list_spaces()
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wiki_maintenance=info,wikiflow_core=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().ok_or_else(|| anyhow!(USAGE))?;
    let space_arg = args.get(1).map(String::as_str);

    let config = WikiConfig::from_env();
    tracing::info!("Opening {}", config.database_path.display());
    let service = WikiService::from_config(config, Arc::new(StaticRoleAccess::default()))
        .await
        .context("failed to open wiki database")?;

    match command.as_str() {
        "list" => {
            for space in service.list_spaces().await? {
                println!("{}\t{}\t{}", space.id, space.route, space.name);
            }
        }
        "verify" => {
            let mut failed = 0;
            for space_id in target_spaces(&service, space_arg).await? {
                let violations = service.verify_tree(&space_id).await?;
                if violations.is_empty() {
                    println!("{}: ok", space_id);
                } else {
                    failed += 1;
                    println!("{}: {} violation(s)", space_id, violations.len());
                    for violation in violations {
                        println!("  {}", violation);
                    }
                }
            }
            if failed > 0 {
                bail!("{} space(s) violate the ordering invariant; run `rebuild`", failed);
            }
        }
        "rebuild" => {
            for space_id in target_spaces(&service, space_arg).await? {
                let report = service.rebuild_tree(&space_id).await?;
                println!(
                    "{}: {} documents, {} updated, {} orphaned",
                    report.space_id,
                    report.documents,
                    report.updated,
                    report.orphans.len()
                );
            }
        }
        "tree" => {
            let space_id = space_arg.ok_or_else(|| anyhow!(USAGE))?;
            let tree = service.get_tree(space_id).await?;
            println!("{}", serde_json::to_string_pretty(&tree)?);
        }
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }

    Ok(())
}
