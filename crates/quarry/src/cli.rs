//! CLI argument parsing and command dispatch.
//!
//! # Commands
//!
//! - `graph <dir>`: reconcile a project directory and print every entry with
//!   its parents and children
//! - `check <dir>`: reconcile a project directory and report problems
//!
//! # Global Flags
//!
//! - `--json`: Output in JSON format
//! - `--config <file>`: Runtime configuration (YAML)

use crate::catalog::{CatalogService, MigrationReport};
use crate::config::RuntimeConfig;
use crate::domain::{Instance, ObjectType};
use crate::drivers::file_repo::FileRepo;
use crate::drivers::in_memory::{InMemoryCatalog, InMemoryOlap, InMemoryRegistry};
use crate::runtime::Runtime;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Instance id the CLI registers a project directory under.
const LOCAL_INSTANCE_ID: &str = "local";

/// Quarry - catalog and dependency tooling for analytics projects
#[derive(Parser, Debug)]
#[command(name = "quarry")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output in JSON format for programmatic use
    #[arg(long, global = true)]
    pub json: bool,

    /// Runtime configuration file
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Print the dependency graph of a project
    ///
    /// Entries are listed parents first. Dependencies on names no artifact
    /// defines are shown as missing.
    Graph(ProjectArgs),

    /// Validate a project
    ///
    /// Parses every artifact and checks the dependency graph for cycles.
    /// Exits non-zero if anything is wrong.
    Check(ProjectArgs),
}

/// Arguments for commands that read a project directory
#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    /// Project directory
    #[arg(default_value = ".")]
    pub dir: PathBuf,
}

/// One node of the printed graph.
#[derive(Debug, Serialize)]
struct GraphEntry {
    name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    object_type: Option<ObjectType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<PathBuf>,
    parents: Vec<String>,
    children: Vec<String>,
}

impl Cli {
    /// Parse CLI arguments from the environment
    pub fn parse_args() -> Self {
        <Self as Parser>::parse()
    }

    /// Parse CLI arguments from an iterator (for testing)
    pub fn try_parse_from<I, T>(iter: I) -> std::result::Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(iter)
    }

    /// Execute the CLI command
    pub async fn execute(&self) -> Result<()> {
        let config = match &self.config {
            Some(path) => RuntimeConfig::load(path)
                .await
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => RuntimeConfig::default(),
        };

        match &self.command {
            Commands::Graph(args) => {
                let service = open_project(config, &args.dir).await?;
                let report = service.reconcile().await?;
                let entries = graph_entries(&service).await?;
                if self.json {
                    println!("{}", serde_json::to_string_pretty(&entries)?);
                } else {
                    print_graph(&entries, &report);
                }
                Ok(())
            }
            Commands::Check(args) => {
                let service = open_project(config, &args.dir).await?;
                match service.reconcile().await {
                    Ok(report) => {
                        if self.json {
                            println!("{}", serde_json::to_string_pretty(&report)?);
                        } else {
                            println!(
                                "{} {} entries, no problems found",
                                "✓".green(),
                                report.added.len()
                            );
                        }
                        Ok(())
                    }
                    Err(e) => {
                        if !self.json {
                            eprintln!("{} {e}", "✗".red());
                        }
                        Err(e).with_context(|| format!("{} has problems", args.dir.display()))
                    }
                }
            }
        }
    }
}

async fn open_project(config: RuntimeConfig, dir: &Path) -> Result<CatalogService> {
    if !dir.is_dir() {
        anyhow::bail!("{} is not a directory", dir.display());
    }

    let runtime = Runtime::new(config, Arc::new(InMemoryRegistry::new()))?;
    let service = runtime
        .register_instance(
            Instance::new(LOCAL_INSTANCE_ID, "memory", "file"),
            Arc::new(InMemoryCatalog::new()),
            Arc::new(FileRepo::new(dir)),
            Arc::new(InMemoryOlap::new()),
        )
        .await?;
    Ok(service)
}

async fn graph_entries(service: &CatalogService) -> Result<Vec<GraphEntry>> {
    let snapshot = service.meta().snapshot();
    let graph = snapshot.graph();

    let mut entries = Vec::with_capacity(graph.node_count());
    for name in graph.topological_order() {
        let entry = service.find_entry(&name).await?;
        entries.push(GraphEntry {
            parents: graph.parents(&name),
            children: graph.children(&name),
            object_type: entry.as_ref().map(|e| e.object_type),
            path: entry.map(|e| e.path),
            name,
        });
    }
    Ok(entries)
}

fn print_graph(entries: &[GraphEntry], report: &MigrationReport) {
    for entry in entries {
        let kind = match entry.object_type {
            Some(t) => t.to_string().cyan().to_string(),
            None => "missing".red().to_string(),
        };
        println!("{} [{kind}]", entry.name.bold());
        if let Some(path) = &entry.path {
            println!("  path:     {}", path.display());
        }
        if !entry.parents.is_empty() {
            println!("  parents:  {}", entry.parents.join(", "));
        }
        if !entry.children.is_empty() {
            println!("  children: {}", entry.children.join(", "));
        }
    }
    println!();
    println!(
        "{} entries, migrated at {}",
        entries.len(),
        report.migrated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
}
