//! # Blendgraph CLI Module
//!
//! Operator commands over the composition graph.
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `status` - Show record counts
//! - `init` / `import` / `export` - Manage the store and JSON catalogs
//! - `add-ingredient` / `update-ingredient` / `remove-ingredient`
//! - `add-substance` / `update-substance` / `remove-substance`
//! - `flatten` / `tree` / `used-in` - Inspect a formula
//! - `check-cycle` / `verify` - Run the cycle guard
//! - `compact` - Compact the redb file

mod commands;

use crate::config::AppConfig;
use crate::error::AppError;
use blendgraph_core::primitives::MAX_DISPLAY_PLACES;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Blendgraph - formula composition graph
///
/// Nest formulas as compounds without cycles and flatten any formula into
/// its raw substances.
#[derive(Parser, Debug)]
#[command(name = "blendgraph")]
#[command(version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress informational output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (default: ./blendgraph.toml if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the graph database (redb file, or JSON catalog for memory)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Storage backend: "redb" or "memory"
    #[arg(short = 'B', long, global = true)]
    pub backend: Option<String>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// A compound edge, `parent` containing `ingredient`.
#[derive(Args, Debug, Clone, Copy)]
pub struct IngredientKey {
    /// Parent formula ID
    #[arg(short, long)]
    pub parent: u64,

    /// Ingredient formula ID
    #[arg(short, long)]
    pub ingredient: u64,
}

/// A substance edge, `formula` containing `substance`.
#[derive(Args, Debug, Clone, Copy)]
pub struct SubstanceKey {
    /// Formula ID
    #[arg(short, long)]
    pub formula: u64,

    /// Substance ID
    #[arg(short, long)]
    pub substance: u64,
}

/// Optional commercial details for a substance edge.
#[derive(Args, Debug, Clone, Default)]
pub struct CommercialArgs {
    #[arg(long)]
    pub supplier: Option<String>,

    #[arg(long)]
    pub dilution: Option<String>,

    #[arg(long)]
    pub price: Option<String>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show record counts
    Status,

    /// Initialize a new empty database
    Init {
        /// Overwrite an existing database
        #[arg(short, long)]
        force: bool,
    },

    /// Import formulas, substances and edges from a JSON catalog
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Export the whole graph as a JSON catalog
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Add a formula as a compound ingredient of another
    AddIngredient {
        #[command(flatten)]
        key: IngredientKey,

        /// Parts per 1000 of the parent
        #[arg(short = 'c', long, allow_hyphen_values = true)]
        concentration: String,

        #[arg(short, long)]
        unit: Option<String>,

        /// Display position (default: after the last edge)
        #[arg(short, long)]
        order: Option<u32>,
    },

    /// Change concentration, unit or order of a compound ingredient
    UpdateIngredient {
        #[command(flatten)]
        key: IngredientKey,

        #[arg(short = 'c', long, allow_hyphen_values = true)]
        concentration: Option<String>,

        #[arg(short, long)]
        unit: Option<String>,

        #[arg(short, long)]
        order: Option<u32>,
    },

    /// Remove a compound ingredient
    RemoveIngredient {
        #[command(flatten)]
        key: IngredientKey,
    },

    /// Add a raw substance to a formula
    AddSubstance {
        #[command(flatten)]
        key: SubstanceKey,

        /// Parts per 1000 of the formula
        #[arg(short = 'c', long, allow_hyphen_values = true)]
        concentration: String,

        #[arg(short, long)]
        unit: Option<String>,

        #[arg(short, long)]
        order: Option<u32>,

        #[command(flatten)]
        commercial: CommercialArgs,
    },

    /// Change a raw substance edge
    UpdateSubstance {
        #[command(flatten)]
        key: SubstanceKey,

        #[arg(short = 'c', long, allow_hyphen_values = true)]
        concentration: Option<String>,

        #[arg(short, long)]
        unit: Option<String>,

        #[arg(short, long)]
        order: Option<u32>,

        #[command(flatten)]
        commercial: CommercialArgs,
    },

    /// Remove a raw substance from a formula
    RemoveSubstance {
        #[command(flatten)]
        key: SubstanceKey,
    },

    /// Flatten a formula into raw substances
    Flatten {
        /// Formula ID
        #[arg(short, long)]
        formula: u64,

        /// Round totals to this many decimal places (at most 15)
        #[arg(
            long,
            value_parser = clap::value_parser!(u32).range(0..=i64::from(MAX_DISPLAY_PLACES))
        )]
        places: Option<u32>,
    },

    /// Show the nested structure of a formula
    Tree {
        /// Formula ID
        #[arg(short, long)]
        formula: u64,
    },

    /// List formulas that use a formula as a compound
    UsedIn {
        /// Formula ID
        #[arg(short, long)]
        formula: u64,
    },

    /// Check whether adding an ingredient would create a cycle
    CheckCycle {
        #[command(flatten)]
        key: IngredientKey,
    },

    /// Scan the stored graph for cycles
    Verify,

    /// Compact the redb database file
    Compact,
}

// =============================================================================
// CONFIG RESOLUTION
// =============================================================================

/// Defaults, then the config file, then environment, then global flags.
pub fn resolve_config(cli: &Cli) -> Result<AppConfig, AppError> {
    let mut config = AppConfig::load(cli.config.as_deref())?.with_env()?;
    if let Some(database) = &cli.database {
        config.storage.database = database.clone();
    }
    if let Some(backend) = &cli.backend {
        config.storage.backend = backend.parse()?;
    }
    Ok(config)
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), AppError> {
    let mut config = resolve_config(&cli)?;
    let out = Output {
        json: cli.json_mode,
        quiet: cli.quiet,
    };

    if cli.verbose {
        tracing::debug!(?config, "resolved configuration");
    }

    match cli.command {
        Commands::Server { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            cmd_server(&config, out).await
        }
        Commands::Status => cmd_status(&config, out),
        Commands::Init { force } => cmd_init(&config, out, force),
        Commands::Import { input } => cmd_import(&config, out, &input),
        Commands::Export { output } => cmd_export(&config, out, &output),
        Commands::AddIngredient {
            key,
            concentration,
            unit,
            order,
        } => cmd_add_ingredient(&config, out, key, &concentration, unit, order),
        Commands::UpdateIngredient {
            key,
            concentration,
            unit,
            order,
        } => cmd_update_ingredient(&config, out, key, concentration.as_deref(), unit, order),
        Commands::RemoveIngredient { key } => cmd_remove_ingredient(&config, out, key),
        Commands::AddSubstance {
            key,
            concentration,
            unit,
            order,
            commercial,
        } => cmd_add_substance(&config, out, key, &concentration, unit, order, commercial),
        Commands::UpdateSubstance {
            key,
            concentration,
            unit,
            order,
            commercial,
        } => cmd_update_substance(
            &config,
            out,
            key,
            concentration.as_deref(),
            unit,
            order,
            commercial,
        ),
        Commands::RemoveSubstance { key } => cmd_remove_substance(&config, out, key),
        Commands::Flatten { formula, places } => cmd_flatten(&config, out, formula, places),
        Commands::Tree { formula } => cmd_tree(&config, out, formula),
        Commands::UsedIn { formula } => cmd_used_in(&config, out, formula),
        Commands::CheckCycle { key } => cmd_check_cycle(&config, out, key),
        Commands::Verify => cmd_verify(&config, out),
        Commands::Compact => cmd_compact(&config, out),
    }
}
