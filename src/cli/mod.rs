//! CLI module for minik8s
//!
//! Subcommands:
//! - `minik8s serve` - Run the API server on the in-memory store
//! - `minik8s scheduler` - Run the pod scheduler against a server
//! - `minik8s watch` - Print decoded watch events for one resource kind

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::resources::Resource;
use crate::watch::{EventType, WatchEvent};

#[derive(Parser, Debug)]
#[command(name = "minik8s")]
#[command(about = "Miniature cluster control plane")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config file (default: ~/.minik8s/config)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the API server
    Serve(ServeArgs),

    /// Run the pod scheduler against an API server
    Scheduler(SchedulerArgs),

    /// Stream watch events for a resource kind
    Watch(WatchArgs),
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Bind address for the server
    #[arg(long)]
    pub bind_addr: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Also run the scheduler inside the server process
    #[arg(long)]
    pub scheduler: bool,
}

#[derive(Parser, Debug)]
pub struct SchedulerArgs {
    /// API server URL (default: client.serverUrl from the config)
    #[arg(long, env = "MINIK8S_SERVER")]
    pub server: Option<String>,

    /// Number of concurrent scheduling workers
    #[arg(long)]
    pub workers: Option<usize>,
}

#[derive(Parser, Debug)]
pub struct WatchArgs {
    /// Resource kind to watch
    #[arg(value_enum)]
    pub kind: ResourceKind,

    /// Watch a single object by uid instead of the whole collection
    #[arg(long)]
    pub uid: Option<String>,

    /// API server URL (default: client.serverUrl from the config)
    #[arg(long, env = "MINIK8S_SERVER")]
    pub server: Option<String>,

    /// Only report events after this resource version
    #[arg(long, value_name = "VERSION")]
    pub from: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResourceKind {
    #[value(alias = "pod")]
    Pods,
    #[value(alias = "node")]
    Nodes,
    #[value(alias = "replicaset", alias = "rs")]
    Replicasets,
}

// ============================================================================
// Pure display logic (no I/O - returns formatted strings)
// ============================================================================

/// One line per watch event: type, name, uid and version
pub fn format_event<K: Resource>(event: &WatchEvent<K>) -> String {
    if let Some(status) = event.error_status() {
        return format!("{:<9} {}", "ERROR", status.message());
    }
    let label = match event.event_type {
        EventType::Added => "ADDED",
        EventType::Modified => "MODIFIED",
        EventType::Deleted => "DELETED",
        EventType::Bookmark => "BOOKMARK",
        EventType::Error => "ERROR",
    };
    match event.resource() {
        Some(obj) => {
            let meta = obj.metadata();
            format!(
                "{:<9} {}/{} uid={} version={}",
                label,
                K::PLURAL,
                meta.name,
                meta.uid,
                event.mod_revision
            )
        }
        None => format!("{:<9} {} version={}", label, event.key, event.mod_revision),
    }
}
