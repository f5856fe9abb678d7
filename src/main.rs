use anyhow::Result;
use clap::{Parser, Subcommand};
use keyquorum::commands;
use keyquorum::config::Config;
use keyquorum::records::RecoveryType;
use keyquorum::CommandResult;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keyquorum")]
#[command(about = "keyquorum - custodial wallet keys with trustee-based social recovery", long_about = None)]
struct Cli {
    /// TOML configuration file (keys, state directory, MFA codes)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt and store a wallet private key (generates one if --secret is omitted)
    StoreKey {
        /// Wallet identifier
        #[arg(long)]
        wallet: String,

        /// Owning user
        #[arg(long)]
        owner: String,

        /// Private key as hex (optional 0x prefix)
        #[arg(long)]
        secret: Option<String>,

        /// Recovery type: social, mfa or cloud
        #[arg(long, default_value = "social")]
        recovery_type: RecoveryType,
    },

    /// Split a wallet key into encrypted shares, one per trustee
    CreateShares {
        /// Wallet identifier
        #[arg(long)]
        wallet: String,

        /// Owning user
        #[arg(long)]
        owner: String,

        /// Comma-separated trustee ids, in share index order
        #[arg(long, value_delimiter = ',')]
        trustees: Vec<String>,

        /// Minimum number of shares needed to recover
        #[arg(long)]
        threshold: usize,

        /// Owner's second-factor code
        #[arg(long)]
        mfa_code: u32,
    },

    /// Reconstruct a wallet key from trustee shares
    Recover {
        /// Wallet identifier
        #[arg(long)]
        wallet: String,

        /// Owning user
        #[arg(long)]
        owner: String,

        /// Owner's second-factor code
        #[arg(long)]
        mfa_code: u32,

        /// JSON array of shares (records from create-shares, or bare encrypted payloads)
        #[arg(long)]
        data: String,
    },

    /// Mark a share as confirmed by its trustee
    VerifyShare {
        /// Share record id
        #[arg(long)]
        id: String,
    },

    /// Show a wallet's current share set
    ListShares {
        /// Wallet identifier
        #[arg(long)]
        wallet: String,
    },

    /// List an owner's wallet key records
    ListKeys {
        /// Owning user
        #[arg(long)]
        owner: String,
    },

    /// Re-encrypt a wallet key under the active key version
    RotateKey {
        /// Wallet identifier
        #[arg(long)]
        wallet: String,
    },
}

fn print_result(cmd_result: &CommandResult) {
    println!("{}", cmd_result.output);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("{}", cmd_result.result);
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let coordinator = commands::open_coordinator(&config)?;

    let cmd_result = match cli.command {
        Commands::StoreKey {
            wallet,
            owner,
            secret,
            recovery_type,
        } => commands::store_key_core(
            &coordinator,
            &wallet,
            &owner,
            secret.as_deref(),
            recovery_type,
        )?,
        Commands::CreateShares {
            wallet,
            owner,
            trustees,
            threshold,
            mfa_code,
        } => commands::create_shares_core(
            &coordinator,
            &wallet,
            &owner,
            &trustees,
            threshold,
            mfa_code,
        )?,
        Commands::Recover {
            wallet,
            owner,
            mfa_code,
            data,
        } => commands::recover_core(&coordinator, &wallet, &owner, mfa_code, &data)?,
        Commands::VerifyShare { id } => commands::verify_share_core(&coordinator, &id)?,
        Commands::ListShares { wallet } => commands::list_shares_core(&coordinator, &wallet)?,
        Commands::ListKeys { owner } => commands::list_keys_core(&coordinator, &owner)?,
        Commands::RotateKey { wallet } => commands::rotate_key_core(&coordinator, &wallet)?,
    };

    print_result(&cmd_result);
    Ok(())
}
