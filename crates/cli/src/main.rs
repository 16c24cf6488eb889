//! Make Life Better CLI - Database migrations and order inspection.
//!
//! # Usage
//!
//! ```bash
//! # Run checkout database migrations
//! mlb-cli migrate
//!
//! # Print an order document
//! mlb-cli orders show 3f2c9a1e0b7d4f6e9c1a1234567890ab
//!
//! # List orders still pending after 30 minutes
//! mlb-cli orders stale --minutes 30
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `orders show` - Print one order document
//! - `orders stale` - List pending orders for manual reconciliation

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "mlb-cli")]
#[command(author, version, about = "Make Life Better checkout CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run checkout database migrations
    Migrate,
    /// Inspect orders
    Orders {
        #[command(subcommand)]
        action: OrdersAction,
    },
}

#[derive(Subcommand)]
enum OrdersAction {
    /// Print an order document as JSON
    Show {
        /// Order ID
        id: String,
    },
    /// List pending orders older than the given age
    Stale {
        /// Minimum age in minutes
        #[arg(short, long, default_value_t = 30)]
        minutes: u32,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), commands::CommandError> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CommandError> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Orders { action } => match action {
            OrdersAction::Show { id } => commands::orders::show(&id).await?,
            OrdersAction::Stale { minutes } => commands::orders::stale(minutes).await?,
        },
    }
    Ok(())
}
