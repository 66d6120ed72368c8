use banking_core::adapters::PostgresLedgerStore;
use banking_core::cli::{self, Cli, Commands};
use banking_core::clock::SystemClock;
use banking_core::config::{Config, LogFormat};
use banking_core::scorer::HttpFraudScorer;
use banking_core::services::{BankingService, NewBlacklistEntry};
use banking_core::db;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Setup logging
    let json = config.log_format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run);

    let scorer = HttpFraudScorer::with_circuit_breaker(
        config.fraud_api_url.clone(),
        config.fraud_api_timeout(),
        config.fraud_circuit_failures,
        config.fraud_circuit_reset_secs,
    );

    let command = match command {
        Commands::Config => return cli::handle_config_validate(&config),
        Commands::Db(cli::DbCommands::Migrate) => return cli::handle_db_migrate(&config).await,
        Commands::Scorer(cli::ScorerCommands::Health) => return cli::handle_scorer_health(&scorer).await,
        other => other,
    };

    // Database pool
    let pool = db::create_pool(&config).await?;
    tracing::info!(
        max_connections = config.database_max_connections,
        "Database pool ready"
    );

    let service = BankingService::new(
        Arc::new(PostgresLedgerStore::new(pool)),
        Arc::new(scorer),
        Arc::new(SystemClock),
        config.service_settings(),
    );
    tracing::info!(fraud_api_url = %config.fraud_api_url, "Banking service initialized");

    match command {
        Commands::Run => cli::handle_run(service, &config).await,
        Commands::Account(cli::AccountCommands::Open {
            first_name,
            last_name,
            gender,
            account_number,
            balance,
        }) => {
            cli::handle_account_open(&service, &first_name, &last_name, gender, &account_number, balance)
                .await
        }
        Commands::Tx(cli::TxCommands::List { user_id, limit }) => {
            cli::handle_tx_list(&service, user_id, limit).await
        }
        Commands::Tx(cli::TxCommands::Show { tx_id }) => cli::handle_tx_show(&service, tx_id).await,
        Commands::Sessions(cli::SessionCommands::Expire) => cli::handle_sessions_expire(&service).await,
        Commands::Review(cli::ReviewCommands::Approve { tx_id }) => {
            cli::handle_review_approve(&service, tx_id).await
        }
        Commands::Review(cli::ReviewCommands::Reject { tx_id }) => {
            cli::handle_review_reject(&service, tx_id).await
        }
        Commands::RateLimit(cli::RateLimitCommands::Status { user_id }) => {
            cli::handle_rate_limit_status(&service, user_id).await
        }
        Commands::RateLimit(cli::RateLimitCommands::Clear { user_id }) => {
            cli::handle_rate_limit_clear(&service, user_id).await
        }
        Commands::Blacklist(cli::BlacklistCommands::Add {
            domain,
            reason,
            merchant_name,
            risk,
            reported_by,
        }) => {
            let entry = NewBlacklistEntry {
                domain,
                merchant_name,
                reason,
                risk_level: risk,
                reported_by,
            };
            cli::handle_blacklist_add(&service, entry).await
        }
        Commands::Blacklist(cli::BlacklistCommands::Deactivate { domain }) => {
            cli::handle_blacklist_deactivate(&service, &domain).await
        }
        Commands::Blacklist(cli::BlacklistCommands::List) => cli::handle_blacklist_list(&service).await,
        Commands::Config | Commands::Db(_) | Commands::Scorer(_) => Ok(()),
    }
}
