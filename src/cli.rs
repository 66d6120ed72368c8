use bigdecimal::BigDecimal;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::Path;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::{mask_password, Config};
use crate::domain::{BlacklistRisk, Gender, UserProfile};
use crate::scorer::HttpFraudScorer;
use crate::services::{run_session_sweeper, BankingService, NewBlacklistEntry};

#[derive(Parser)]
#[command(name = "banking-core")]
#[command(about = "Banking Core - transactional money-movement engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the payment-session expiry sweeper until Ctrl-C (default)
    Run,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Transaction history commands
    #[command(subcommand)]
    Tx(TxCommands),

    /// Payment session maintenance
    #[command(subcommand)]
    Sessions(SessionCommands),

    /// Resolve transactions held for fraud review
    #[command(subcommand)]
    Review(ReviewCommands),

    /// Inspect or lift a user's rate-limit cooldown
    #[command(subcommand)]
    RateLimit(RateLimitCommands),

    /// Merchant domain blacklist management
    #[command(subcommand)]
    Blacklist(BlacklistCommands),

    /// Fraud scorer commands
    #[command(subcommand)]
    Scorer(ScorerCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Create a user and their primary account
    Open {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        /// M or F
        #[arg(long, default_value = "M")]
        gender: Gender,
        #[arg(long, value_name = "ACCOUNT_NUMBER")]
        account_number: String,
        #[arg(long, default_value = "0")]
        balance: BigDecimal,
    },
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// List a user's transactions, newest first
    List {
        #[arg(value_name = "USER_ID")]
        user_id: Uuid,
        #[arg(short, long)]
        limit: Option<i64>,
    },

    /// Show one transaction
    Show {
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
    },
}

#[derive(Subcommand)]
pub enum SessionCommands {
    /// Expire every pending session past its deadline, once
    Expire,
}

#[derive(Subcommand)]
pub enum ReviewCommands {
    /// Complete a transaction held for review
    Approve {
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
    },

    /// Fail a transaction held for review and return the money
    Reject {
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
    },
}

#[derive(Subcommand)]
pub enum RateLimitCommands {
    /// Show window counts and any active cooldown
    Status {
        #[arg(value_name = "USER_ID")]
        user_id: Uuid,
    },

    /// Lift an active cooldown
    Clear {
        #[arg(value_name = "USER_ID")]
        user_id: Uuid,
    },
}

#[derive(Subcommand)]
pub enum BlacklistCommands {
    /// Add or reactivate a merchant domain
    Add {
        /// Domain or merchant URL
        #[arg(value_name = "DOMAIN")]
        domain: String,
        #[arg(short, long)]
        reason: String,
        #[arg(long, default_value = "")]
        merchant_name: String,
        /// low, medium, high or critical
        #[arg(long, default_value = "high")]
        risk: BlacklistRisk,
        #[arg(long)]
        reported_by: Option<String>,
    },

    /// Stop blocking a merchant domain
    Deactivate {
        #[arg(value_name = "DOMAIN")]
        domain: String,
    },

    /// List entries with their blocked-transaction counters
    List,
}

#[derive(Subcommand)]
pub enum ScorerCommands {
    /// Probe the scorer's health endpoint
    Health,
}

pub async fn handle_run(service: BankingService, config: &Config) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(run_session_sweeper(
        service,
        config.session_sweep_interval(),
        shutdown_rx,
    ));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    shutdown_tx.send(true)?;
    sweeper.await?;

    Ok(())
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool, Path::new(crate::db::MIGRATIONS_DIR)).await?;

    println!("✓ Database migrations completed");
    Ok(())
}

pub async fn handle_account_open(
    service: &BankingService,
    first_name: &str,
    last_name: &str,
    gender: Gender,
    account_number: &str,
    balance: BigDecimal,
) -> anyhow::Result<()> {
    let profile = UserProfile::new(first_name, last_name, gender, None);
    let user_id = profile.id;
    let account = service.open_account(profile, account_number, balance).await?;

    println!("✓ Account {} opened for user {}", account.account_number, user_id);
    Ok(())
}

pub async fn handle_tx_list(service: &BankingService, user_id: Uuid, limit: Option<i64>) -> anyhow::Result<()> {
    let transactions = service.list_transactions(user_id, limit).await?;

    if transactions.is_empty() {
        println!("No transactions found");
        return Ok(());
    }

    println!(
        "{:<38} {:<13} {:>14} {:>14} {:<10} {:<20}",
        "ID", "Kind", "Amount", "Balance", "Status", "Created"
    );
    println!("{}", "-".repeat(114));

    for tx in transactions {
        println!(
            "{:<38} {:<13} {:>14} {:>14} {:<10} {:<20}",
            tx.id,
            tx.kind.as_str(),
            tx.amount.to_string(),
            tx.balance_after.to_string(),
            tx.status.as_str(),
            tx.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }

    Ok(())
}

pub async fn handle_tx_show(service: &BankingService, tx_id: Uuid) -> anyhow::Result<()> {
    let tx = service.get_transaction(tx_id).await?;
    print_json(&tx)
}

pub async fn handle_sessions_expire(service: &BankingService) -> anyhow::Result<()> {
    let expired = service.expire_stale_sessions().await?;
    println!("✓ {} payment session(s) expired", expired);
    Ok(())
}

pub async fn handle_review_approve(service: &BankingService, tx_id: Uuid) -> anyhow::Result<()> {
    let tx = service.approve_review(tx_id).await?;
    println!("✓ Transaction {} approved ({})", tx.id, tx.status);
    Ok(())
}

pub async fn handle_review_reject(service: &BankingService, tx_id: Uuid) -> anyhow::Result<()> {
    let tx = service.reject_review(tx_id).await?;
    println!("✓ Transaction {} rejected, {} returned", tx.id, tx.magnitude());
    Ok(())
}

pub async fn handle_rate_limit_status(service: &BankingService, user_id: Uuid) -> anyhow::Result<()> {
    let status = service.get_rate_limit_status(user_id).await?;
    print_json(&status)
}

pub async fn handle_rate_limit_clear(service: &BankingService, user_id: Uuid) -> anyhow::Result<()> {
    if service.clear_rate_limit_block(user_id).await? {
        println!("✓ Cooldown lifted for user {}", user_id);
    } else {
        println!("User {} had no active cooldown", user_id);
    }
    Ok(())
}

pub async fn handle_blacklist_add(service: &BankingService, entry: NewBlacklistEntry) -> anyhow::Result<()> {
    let stored = service.add_blacklist_entry(entry).await?;
    println!("✓ {} blacklisted ({})", stored.domain, stored.risk_level);
    Ok(())
}

pub async fn handle_blacklist_deactivate(service: &BankingService, domain: &str) -> anyhow::Result<()> {
    if service.deactivate_blacklist_entry(domain).await? {
        println!("✓ {} is no longer blocked", domain);
        Ok(())
    } else {
        anyhow::bail!("No blacklist entry for {}", domain)
    }
}

pub async fn handle_blacklist_list(service: &BankingService) -> anyhow::Result<()> {
    let entries = service.list_blacklist().await?;

    if entries.is_empty() {
        println!("Blacklist is empty");
        return Ok(());
    }

    println!("{:<40} {:<9} {:<7} {:>8}  {}", "Domain", "Risk", "Active", "Blocked", "Reason");
    println!("{}", "-".repeat(90));

    for entry in entries {
        println!(
            "{:<40} {:<9} {:<7} {:>8}  {}",
            entry.domain,
            entry.risk_level.as_str(),
            entry.is_active, entry.blocked_transactions, entry.reason
        );
    }

    Ok(())
}

pub async fn handle_scorer_health(scorer: &HttpFraudScorer) -> anyhow::Result<()> {
    let health = scorer.health().await;
    println!("Circuit: {}", scorer.circuit_state());
    print_json(&health)?;

    if !health.healthy {
        anyhow::bail!("Fraud scorer is unhealthy");
    }
    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Database Max Connections: {}", config.database_max_connections);
    println!("  Fraud API URL: {}", config.fraud_api_url);
    println!("  Fraud API Timeout: {} ms", config.fraud_api_timeout_ms);
    println!(
        "  Fraud Circuit Breaker: {} failures, {} s reset",
        config.fraud_circuit_failures, config.fraud_circuit_reset_secs
    );
    println!("  High Value Threshold: {}", config.high_value_threshold);
    println!("  Session TTL: {} min", config.session_ttl_minutes);
    println!("  Session Sweep Interval: {} s", config.session_sweep_interval_secs);
    println!("  Storage Max Retries: {}", config.storage_max_retries);
    println!("  Log Format: {:?}", config.log_format);

    config.validate()?;

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
