// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # SafePay Operator CLI
//!
//! Entry point for the `safepay` binary. Parses arguments, initializes
//! logging, opens the ledger in the data directory and runs one command.
//!
//! ```text
//! <data-dir>/
//!   db/     sled database: balances, records, logs, notifications
//!   keys/   Paillier, search and audit signing keys
//! ```

mod cli;
mod logging;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use safepay_ledger::config::LedgerConfig;
use safepay_ledger::crypto::CryptoSuite;
use safepay_ledger::fraud::{CardDetails, RuleBasedOracle};
use safepay_ledger::ledger::TransferRequest;
use safepay_ledger::storage::{FileKeyStore, LedgerDb};
use safepay_ledger::Ledger;

use cli::{Commands, GlobalArgs, SafepayCli};
use logging::{LogFormat, DEFAULT_FILTER};

fn main() -> Result<()> {
    let cli = SafepayCli::parse();

    if let Commands::Version = cli.command {
        print_version();
        return Ok(());
    }

    logging::init_logging(DEFAULT_FILTER, LogFormat::from_str_lossy(&cli.global.log_format));

    let config = load_config(&cli.global)?;
    let ledger = open_ledger(&cli.global.data_dir, config)?;

    match cli.command {
        Commands::Init => init(&ledger, &cli.global.data_dir),
        Commands::Seed(args) => {
            if ledger.seed_account(&args.account, args.balance)? {
                println!("Seeded {} with {}", args.account, args.balance);
            } else {
                println!("{} already exists, balance left unchanged", args.account);
            }
            Ok(())
        }
        Commands::Accounts => {
            for account in ledger.accounts()? {
                println!("{:<24} {:>16}", account.id, account.balance);
            }
            Ok(())
        }
        Commands::Transfer(args) => transfer(&ledger, args),
        Commands::Reverse(args) => {
            let outcome = ledger
                .reverse(args.log_id, &args.actor)
                .with_context(|| format!("failed to reverse log {}", args.log_id))?;
            println!("Transfer reversed.");
            println!("  Log              : {}", outcome.log.id);
            println!("  Sender balance   : {}", outcome.sender_balance);
            println!("  Receiver balance : {}", outcome.receiver_balance);
            println!("  Notifications    : {}", outcome.notifications.len());
            Ok(())
        }
        Commands::Logs(args) => print_json(&ledger.logs(args.limit)?),
        Commands::Notifications(args) => {
            print_json(&ledger.notifications_for(&args.user, args.unread)?)
        }
        Commands::MarkRead(args) => {
            print_json(&ledger.mark_notification_read(args.notification_id, &args.user)?)
        }
        Commands::Total(args) => {
            let total = ledger.encrypted_total_sent(&args.user)?;
            let sum = ledger
                .decrypt_total(&total)
                .context("failed to decrypt aggregate")?;
            println!("Sent by {}", args.user);
            println!("  Transfers aggregated : {}", total.aggregated);
            println!("  Transfers skipped    : {}", total.skipped);
            println!("  Total                : {}", sum);
            Ok(())
        }
        Commands::Verify(args) => {
            let record = ledger.transaction(args.transaction_id)?;
            let intact = ledger.verify_transaction(record.id)?;
            println!("Transaction {}", record.id);
            println!("  Hash      : {}", display_or_missing(&record.audit.hash));
            println!("  Signature : {}", display_or_missing(&record.audit.signature_hex));
            println!("  Intact    : {}", intact);
            for degraded in &record.degraded {
                println!("  Degraded  : {} ({})", degraded.step, degraded.reason);
            }
            if !intact {
                anyhow::bail!("audit evidence for {} does not check out", record.id);
            }
            Ok(())
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Config file first, then flag and env overrides.
fn load_config(args: &GlobalArgs) -> Result<LedgerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            LedgerConfig::from_json(&json)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => LedgerConfig::default(),
    };
    if let Some(bits) = args.key_bits {
        config.paillier_key_bits = bits;
    }
    if let Some(attempts) = args.max_attempts {
        config.max_transfer_attempts = attempts;
    }
    Ok(config.normalized())
}

fn open_ledger(data_dir: &Path, config: LedgerConfig) -> Result<Ledger> {
    let db_path = data_dir.join("db");
    fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory {}", db_path.display()))?;
    let db = Arc::new(
        LedgerDb::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?,
    );

    let keys = FileKeyStore::new(data_dir.join("keys"));
    let crypto = CryptoSuite::load_or_generate(&keys, &config)
        .with_context(|| format!("failed to load keys from {}", data_dir.join("keys").display()))?;

    tracing::info!(data_dir = %data_dir.display(), "ledger opened");
    Ok(Ledger::new(
        db.clone(),
        db,
        Arc::new(crypto),
        Arc::new(RuleBasedOracle::default()),
    )
    .with_config(config))
}

fn init(ledger: &Ledger, data_dir: &Path) -> Result<()> {
    let config = ledger.config();
    println!("Ledger initialized.");
    println!("  Data directory : {}", data_dir.display());
    println!(
        "  Paillier key   : {} bits",
        ledger.crypto().paillier.public_key().bits()
    );
    println!("  Retry attempts : {}", config.max_transfer_attempts);
    Ok(())
}

fn transfer(ledger: &Ledger, args: cli::TransferArgs) -> Result<()> {
    let request = TransferRequest::new(&args.from, &args.to, args.amount).with_card(CardDetails {
        customer_age: args.customer_age,
        card_type: args.card_type,
        expiry: args.card_expiry,
    });

    let receipt = if args.retry {
        ledger.transfer_with_retry(&request)
    } else {
        ledger.transfer_request(&request)
    }
    .with_context(|| format!("transfer {} -> {} failed", args.from, args.to))?;

    let record = &receipt.record;
    println!("Transfer committed.");
    println!("  Transaction    : {}", record.id);
    println!("  Log            : {}", receipt.log.id);
    println!("  Amount         : {}", record.amount);
    println!("  Sender balance : {}", record.sender_balance_after);
    println!("  Fraud check    : {}", record.fraud_status);
    for degraded in record.degraded.iter().chain(&receipt.log.degraded) {
        println!("  Degraded       : {} ({})", degraded.step, degraded.reason);
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn display_or_missing(s: &str) -> &str {
    if s.is_empty() {
        "<missing>"
    } else {
        s
    }
}

fn print_version() {
    println!("safepay {}", env!("CARGO_PKG_VERSION"));
}
