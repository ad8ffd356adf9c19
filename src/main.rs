use clap::Parser;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ticketing_payments::cli::{self, Cli, Commands, DbCommands, PaymentCommands};
use ticketing_payments::config::{Config, LogFormat};
use ticketing_payments::{create_app, db, AppState, Ports};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let command = Cli::parse().command.unwrap_or(Commands::Serve);
    dotenvy::dotenv().ok();

    // Setup logging
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    match LogFormat::from_env() {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    match command {
        Commands::Config => cli::handle_config_validate(Config::from_env()),
        Commands::Serve => serve(Config::from_env()?).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&Config::from_env()?).await,
        Commands::Payments(command) => {
            let state = build_state(&Config::from_env()?).await?;
            match command {
                PaymentCommands::Reconcile { payment_id, force } => {
                    cli::handle_payment_reconcile(&state, payment_id, force).await
                }
                PaymentCommands::Reverify {
                    payment_id,
                    gateway_payment_id,
                } => cli::handle_payment_reverify(&state, payment_id, gateway_payment_id).await,
            }
        }
    }
}

async fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let pool = db::create_pool(config).await?;
    db::run_migrations(&pool).await?;

    let ports = Ports::from_config(config, pool)?;
    tracing::info!(
        "Razorpay client initialized with URL: {}",
        config.gateway.base_url
    );

    Ok(AppState::new(
        ports,
        &config.gateway,
        config.admin_api_key.clone(),
    ))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let app = create_app(build_state(&config).await?);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
