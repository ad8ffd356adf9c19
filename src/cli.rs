use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::config::{mask_password, Config};
use crate::use_cases::ReverifyInput;
use crate::AppState;

#[derive(Parser)]
#[command(name = "ticketing-payments")]
#[command(about = "Ticketing marketplace payment core", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Operator actions on individual payments
    #[command(subcommand)]
    Payments(PaymentCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum PaymentCommands {
    /// Retry a failed or abandoned booking/subscription reconciliation
    Reconcile {
        #[arg(value_name = "PAYMENT_ID")]
        payment_id: Uuid,
        /// Take over a pending reconciliation without waiting for it to go stale
        #[arg(long)]
        force: bool,
    },

    /// Ask the gateway for the payment status and settle the record
    Reverify {
        #[arg(value_name = "PAYMENT_ID")]
        payment_id: Uuid,
        #[arg(value_name = "GATEWAY_PAYMENT_ID")]
        gateway_payment_id: String,
    },
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;
    println!("✓ Database migrations completed");

    Ok(())
}

pub async fn handle_payment_reconcile(
    state: &AppState,
    payment_id: Uuid,
    force: bool,
) -> anyhow::Result<()> {
    let (record, result) = state.reconciler.retry(payment_id, force).await?;

    tracing::info!(payment_id = %record.id, force, "Reconciliation retried from CLI");
    println!("✓ Payment {} reconciled", record.id);
    println!("  Result: {}", serde_json::to_string(&result)?);

    Ok(())
}

pub async fn handle_payment_reverify(
    state: &AppState,
    payment_id: Uuid,
    gateway_payment_id: String,
) -> anyhow::Result<()> {
    let output = state
        .reverify_payment
        .execute(ReverifyInput {
            payment_id,
            gateway_payment_id,
        })
        .await?;

    println!("Payment {}:", output.payment_id);
    println!("  Status: {}", output.status.as_str());
    println!("  Verification attempts: {}", output.verification_attempts);
    if let Some(gateway_status) = &output.gateway_status {
        println!("  Gateway status: {}", gateway_status);
    }

    Ok(())
}

pub fn handle_config_validate(config: anyhow::Result<Config>) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            println!("✗ Configuration is invalid: {:#}", e);
            return Err(e);
        }
    };

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!(
        "  Redis URL: {}",
        config
            .redis_url
            .as_deref()
            .map(mask_password)
            .unwrap_or_else(|| "(not set, idempotency disabled)".to_string())
    );
    println!("  Gateway URL: {}", config.gateway.base_url);
    println!("  Gateway Key Id: {}", config.gateway.key_id);
    println!("  Currency: {}", config.gateway.currency);
    println!("  Minimum Amount (minor units): {}", config.gateway.min_amount_minor);

    println!("✓ Configuration is valid");

    Ok(())
}
