use crate::output::{print_json, print_table};
use anyhow::Context;
use autopilot_core::store::{open_store, AutopilotStore, StateStore};
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum StateSubcommand {
    /// List stored keys, optionally filtered by prefix
    Keys {
        /// Exact, case-sensitive key prefix
        prefix: Option<String>,
    },

    /// Print the JSON value stored at a key
    Get { key: String },

    /// Delete a key (no-op when missing)
    Del { key: String },

    /// Show jobs this agent has already bid on
    Markers,
}

pub fn run(config_path: &Path, subcmd: StateSubcommand, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let store_path = config.store_path(config_path);
    let store = AutopilotStore::new(
        open_store(config.store.backend, &store_path)
            .with_context(|| format!("failed to open store at {}", store_path.display()))?,
    );
    tracing::debug!(path = %store_path.display(), backend = ?config.store.backend, "store opened");

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    rt.block_on(dispatch(&store, subcmd, json))
}

async fn dispatch(store: &AutopilotStore, subcmd: StateSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        StateSubcommand::Keys { prefix } => {
            let keys = store.raw().keys(prefix.as_deref().unwrap_or("")).await?;
            if json {
                return print_json(&keys);
            }
            for key in keys {
                println!("{key}");
            }
            Ok(())
        }
        StateSubcommand::Get { key } => {
            let value = store
                .raw()
                .get(&key)
                .await?
                .with_context(|| format!("key not found: {key}"))?;
            print_json(&value)
        }
        StateSubcommand::Del { key } => {
            store.raw().del(&key).await?;
            if json {
                print_json(&serde_json::json!({ "deleted": key }))
            } else {
                println!("Deleted {key}");
                Ok(())
            }
        }
        StateSubcommand::Markers => {
            let markers = store.bid_markers().await?;
            if json {
                let rows: Vec<_> = markers
                    .iter()
                    .map(|(job_id, at)| serde_json::json!({ "jobId": job_id, "markedAt": at }))
                    .collect();
                return print_json(&rows);
            }
            let rows: Vec<Vec<String>> = markers
                .into_iter()
                .map(|(job_id, at)| vec![job_id, at])
                .collect();
            print_table(&["JOB", "MARKED AT"], &rows, "No bid markers.");
            Ok(())
        }
    }
}
