//! # CLI Interface
//!
//! Command-line structure for the `safepay` operator binary, built with
//! `clap` derive. Every subcommand opens the same data directory: a sled
//! database under `db/` and the key files under `keys/`.

use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;
use uuid::Uuid;

/// SafePay ledger operator.
///
/// Runs single operations against a local encrypted ledger: seeding
/// accounts, transfers, reversals, audit checks and encrypted aggregates.
#[derive(Parser, Debug)]
#[command(
    name = "safepay",
    about = "SafePay encrypted ledger operator",
    version,
    propagate_version = true
)]
pub struct SafepayCli {
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every subcommand.
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Data directory holding the database and key files.
    #[arg(
        long,
        short = 'd',
        env = "SAFEPAY_DATA_DIR",
        default_value = "./safepay-data",
        global = true
    )]
    pub data_dir: PathBuf,

    /// JSON ledger configuration. Flags below override its values.
    #[arg(long, short = 'c', env = "SAFEPAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Paillier modulus size used when no key exists yet.
    #[arg(long, env = "SAFEPAY_KEY_BITS", global = true)]
    pub key_bits: Option<u64>,

    /// Attempts for transfers run with `--retry`.
    #[arg(long, env = "SAFEPAY_MAX_ATTEMPTS", global = true)]
    pub max_attempts: Option<u32>,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "SAFEPAY_LOG_FORMAT", default_value = "pretty", global = true)]
    pub log_format: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the data directory and generate any missing keys.
    Init,
    /// Create an account with an opening balance.
    Seed(SeedArgs),
    /// List accounts and their balances.
    Accounts,
    /// Move money between two accounts.
    Transfer(TransferArgs),
    /// Undo a completed transfer by its log id.
    Reverse(ReverseArgs),
    /// Show the most recent transaction logs.
    Logs(LogsArgs),
    /// List a user's notifications.
    Notifications(NotificationsArgs),
    /// Mark a notification read.
    MarkRead(MarkReadArgs),
    /// Homomorphically total what a user has sent, then decrypt the sum.
    Total(TotalArgs),
    /// Re-check the audit evidence of a stored transaction.
    Verify(VerifyArgs),
    /// Print version information and exit.
    Version,
}

#[derive(Args, Debug)]
pub struct SeedArgs {
    pub account: String,
    pub balance: Decimal,
}

#[derive(Args, Debug)]
pub struct TransferArgs {
    #[arg(long)]
    pub from: String,

    #[arg(long)]
    pub to: String,

    #[arg(long)]
    pub amount: Decimal,

    /// Card network, e.g. `visa`.
    #[arg(long)]
    pub card_type: Option<String>,

    /// Card expiry as `MM/YY`.
    #[arg(long)]
    pub card_expiry: Option<String>,

    #[arg(long)]
    pub customer_age: Option<u32>,

    /// Retry on concurrent updates.
    #[arg(long)]
    pub retry: bool,
}

#[derive(Args, Debug)]
pub struct ReverseArgs {
    pub log_id: Uuid,

    /// Who is performing the reversal.
    #[arg(long, default_value = "operator")]
    pub actor: String,
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    #[arg(long, short = 'n', default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct NotificationsArgs {
    pub user: String,

    #[arg(long)]
    pub unread: bool,
}

#[derive(Args, Debug)]
pub struct MarkReadArgs {
    pub notification_id: Uuid,

    /// Owner of the notification.
    #[arg(long)]
    pub user: String,
}

#[derive(Args, Debug)]
pub struct TotalArgs {
    pub user: String,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    pub transaction_id: Uuid,
}
