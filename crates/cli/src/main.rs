//! Soltan CLI - Browse, seed and operate a Soltan storefront from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # List the catalog (falls back to the local cache when offline)
//! soltan catalog
//!
//! # Follow live catalog changes until Ctrl+C
//! soltan watch
//!
//! # Insert products from a YAML file
//! soltan seed products.yaml -e admin@example.com
//!
//! # Place an order for product 3 (size M) and product 7
//! soltan checkout -n "Jo Doe" -p 555-0100 -a "1 Main St" 3:M 7
//!
//! # List recent orders, then mark one shipped
//! soltan orders -e admin@example.com
//! soltan set-status ORD-1700000000000-ABC12 shipped -e admin@example.com
//! ```
//!
//! # Environment Variables
//!
//! - `SOLTAN_GATEWAY_URL`, `SOLTAN_GATEWAY_KEY` - Remote data service
//! - `SOLTAN_ADMIN_PASSWORD` - Password used when `--password` is omitted
//! - `SENTRY_DSN` - Optional error tracking
//! - `RUST_LOG` - Log filter (logs go to stderr, results to stdout)

#![cfg_attr(not(test), forbid(unsafe_code))]

mod commands;

use clap::{Parser, Subcommand};
use commands::admin::Credentials;
use sentry::integrations::tracing as sentry_tracing;
use soltan_core::OrderStatus;
use soltan_storefront::{Store, StoreConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "soltan")]
#[command(author, version, about = "Soltan storefront CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the product catalog
    Catalog,
    /// Print catalog changes as they arrive, until Ctrl+C
    Watch,
    /// Insert products from a YAML file
    Seed {
        /// YAML file holding a list of products
        file: String,

        #[command(flatten)]
        credentials: Credentials,
    },
    /// Put products in the cart and place an order
    Checkout {
        /// Customer name
        #[arg(short, long)]
        name: String,

        /// Contact number
        #[arg(short, long)]
        phone: String,

        /// Delivery address
        #[arg(short, long)]
        address: String,

        /// Items as `<product id>` or `<product id>:<size>`
        #[arg(required = true)]
        items: Vec<String>,
    },
    /// List the most recent orders (admin only)
    Orders {
        #[command(flatten)]
        credentials: Credentials,
    },
    /// Move an order forward (admin only)
    SetStatus {
        /// Order id
        id: String,

        /// New status (`shipped` or `delivered`)
        status: OrderStatus,

        #[command(flatten)]
        credentials: Credentials,
    },
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &StoreConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "soltan_storefront=info,soltan_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let config = match StoreConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_tracing();
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    // Sentry must be initialized before the tracing subscriber
    let _sentry_guard = init_sentry(&config);
    init_tracing();

    let result = run(cli, &config).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &StoreConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::from_config(config)?;
    store.start().await;

    let result = match cli.command {
        Commands::Catalog => commands::catalog::list(&store),
        Commands::Watch => commands::catalog::watch(&store).await,
        Commands::Seed { file, credentials } => {
            commands::catalog::seed(&store, &file, &credentials).await
        }
        Commands::Checkout {
            name,
            phone,
            address,
            items,
        } => commands::checkout::place(&store, &name, &phone, &address, &items).await,
        Commands::Orders { credentials } => commands::orders::list(&store, &credentials).await,
        Commands::SetStatus {
            id,
            status,
            credentials,
        } => commands::orders::set_status(&store, &id, status, &credentials).await,
    };

    store.shutdown().await;
    result
}
