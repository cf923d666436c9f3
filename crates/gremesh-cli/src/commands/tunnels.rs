use std::path::{Path, PathBuf};

use anyhow::Context;
use gremesh_core::MeshConfig;
use gremesh_state::{TunnelRecord, TunnelState, TunnelStore};
use tracing::debug;

/// Record filter for `tunnels list`.
#[derive(Debug, Default)]
pub struct Filter {
    pub network: Option<u64>,
    pub host: Option<u64>,
    pub state: Option<TunnelState>,
}

impl Filter {
    fn matches(&self, record: &TunnelRecord) -> bool {
        self.network.is_none_or(|n| record.network_id == n)
            && self.host.is_none_or(|h| record.from == h || record.to == h)
            && self.state.is_none_or(|s| record.state == s)
    }
}

/// Resolve the store file from the flags.
pub fn store_path(store: Option<PathBuf>, config: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(path) = store {
        return Ok(path);
    }
    let config = match config {
        Some(path) => MeshConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => MeshConfig::default(),
    };
    Ok(config.store.path)
}

fn open(path: &Path) -> anyhow::Result<TunnelStore> {
    if !path.exists() {
        anyhow::bail!("no tunnel store at {}", path.display());
    }
    debug!(path = %path.display(), "opening tunnel store");
    Ok(TunnelStore::open(path)?)
}

pub fn select(store: &TunnelStore, filter: &Filter) -> anyhow::Result<Vec<TunnelRecord>> {
    let records = match filter.network {
        Some(network) => store.list_by_network(network)?,
        None => store.list_all()?,
    };
    Ok(records.into_iter().filter(|r| filter.matches(r)).collect())
}

pub fn list(path: &Path, filter: &Filter, format: &str) -> anyhow::Result<()> {
    let store = open(path)?;
    let records = select(&store, filter)?;
    print_records(&records, format)
}

pub fn peers(path: &Path, host: u64, network: u64) -> anyhow::Result<()> {
    let store = open(path)?;
    let records = store.list_peers_to(host, network)?;
    print_records(&records, "text")
}

fn print_records(records: &[TunnelRecord], format: &str) -> anyhow::Result<()> {
    match format {
        "json" => {
            for record in records {
                println!("{}", serde_json::to_string(record)?);
            }
        }
        _ => {
            println!(
                "{:>6}  {:>8}  {:>6}  {:>6}  {:>6}  {:<8}  PORT",
                "ID", "NETWORK", "FROM", "TO", "KEY", "STATE"
            );
            for r in records {
                println!(
                    "{:>6}  {:>8}  {:>6}  {:>6}  {:>6}  {:<8}  {}",
                    r.id,
                    r.network_id,
                    r.from,
                    r.to,
                    r.key,
                    r.state.to_string(),
                    r.port_name
                );
            }
        }
    }
    Ok(())
}
