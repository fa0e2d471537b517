//! MODB CLI
//!
//! Offline administration of a MODB data directory. Stop the server first:
//! both processes would otherwise append to the same journals.
//!
//! # Commands
//!
//! - `tenants` - List registered tenants
//! - `register` / `unregister` - Manage tenants
//! - `databases` - List a tenant's databases
//! - `describe` - Show database metadata
//! - `clean` - Compact a database

use anyhow::Context;
use clap::{Parser, Subcommand};
use modb_core::{Page, StorageConfig, TenantRegistry};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// MODB command-line administration tools.
#[derive(Parser)]
#[command(name = "modb-cli")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Root data directory
    #[arg(global = true, short, long, env = "MODB_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered tenants
    Tenants,

    /// Register a tenant
    Register {
        /// Tenant name
        name: String,

        /// Access key; generated when omitted
        #[arg(long)]
        access_key: Option<String>,

        /// Tag for the tenant record, repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Remove a tenant and all of its databases
    Unregister {
        /// Access key of the tenant
        access_key: String,
    },

    /// List a tenant's databases
    Databases {
        /// Access key of the tenant
        #[arg(short, long)]
        tenant: String,
    },

    /// Show database metadata
    Describe {
        #[arg(short, long)]
        tenant: String,

        /// Database name
        database: String,
    },

    /// Compact a database
    Clean {
        #[arg(short, long)]
        tenant: String,

        /// Database name
        database: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine readable
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let registry = TenantRegistry::open(StorageConfig::new(&cli.data_dir))
        .with_context(|| format!("opening data directory {}", cli.data_dir.display()))?;

    match cli.command {
        Commands::Tenants => print_json(&registry.list(Page::all())?.items)?,
        Commands::Register {
            name,
            access_key,
            tags,
        } => print_json(&registry.register_tagged(&name, access_key.as_deref(), &tags)?)?,
        Commands::Unregister { access_key } => print_json(&registry.unregister(&access_key)?)?,
        Commands::Databases { tenant } => {
            let collection = registry.resolve(&tenant)?;
            print_json(&collection.list())?
        }
        Commands::Describe { tenant, database } => {
            let collection = registry.resolve(&tenant)?;
            print_json(&collection.describe(&database)?)?
        }
        Commands::Clean { tenant, database } => {
            let collection = registry.resolve(&tenant)?;
            let report = collection
                .clean(&database)
                .with_context(|| format!("cleaning {}", database))?;
            print_json(&report)?
        }
    }

    Ok(())
}
