use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use poschain::ledger::DEFAULT_STAKE;
use poschain::miner::MiningScheduler;
use poschain::node::{ChainError, ChainService};
use poschain::store::{LedgerStore, DEFAULT_DATA_DIR};

#[derive(Parser)]
#[command(name = "poschain", version, about = "Single-node proof-of-stake ledger")]
struct Cli {
    /// Directory holding the persisted chain record.
    #[arg(long, default_value = DEFAULT_DATA_DIR, global = true)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load the persisted chain, or bootstrap genesis and the faucet.
    Init,
    /// Print the chain summary.
    Status,
    /// Create a named account; prints the account including its secret
    /// phrase (shown exactly once; store it safely).
    CreateAccount { username: String },
    /// Mint new tokens to an address.
    Mint {
        to: String,
        amount: u64,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Transfer tokens from a named account to an address.
    Transfer {
        from: String,
        to: String,
        amount: u64,
    },
    /// Register an account as an active validator.
    RegisterValidator {
        username: String,
        #[arg(long, default_value_t = DEFAULT_STAKE)]
        stake: u64,
    },
    /// Mine one or more blocks immediately.
    Mine {
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Run the periodic miner until the requested number of blocks landed.
    AutoMine {
        #[arg(long, default_value_t = 10)]
        period_secs: u64,
        #[arg(long, default_value_t = 6)]
        blocks: u64,
    },
    /// Show an account (with balance) by username.
    Account { username: String },
    /// Show the balance of an address.
    Balance { address: String },
    /// Show a block by height.
    Block { height: u64 },
    /// List the most recent blocks, newest first.
    Blocks {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// List all registered validators.
    Validators,
    /// Delete the persisted chain record.
    Clear,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), ChainError> {
    // Clearing must not bootstrap a chain just to delete it.
    if let Command::Clear = cli.command {
        LedgerStore::new(&cli.data_dir).clear()?;
        println!("persisted chain record cleared");
        return Ok(());
    }

    let service = ChainService::open(&cli.data_dir)?;
    match cli.command {
        Command::Init => {
            print_json(&service.status());
        }
        Command::Status => print_json(&service.status()),
        Command::CreateAccount { username } => {
            let account = service.create_account(&username)?;
            print_json(&account);
        }
        Command::Mint { to, amount, reason } => {
            let tx = service.mint(&to, amount, reason)?;
            print_json(&tx);
        }
        Command::Transfer { from, to, amount } => {
            let tx = service.transfer(&from, &to, amount)?;
            print_json(&tx);
        }
        Command::RegisterValidator { username, stake } => {
            let validator = service.register_validator(&username, Some(stake))?;
            print_json(&validator);
        }
        Command::Mine { count } => {
            for _ in 0..count {
                let block = service.mine_block()?;
                print_json(&block);
            }
        }
        Command::AutoMine {
            period_secs,
            blocks,
        } => {
            let service = Arc::new(service);
            let target = service.status().latest_height + blocks;
            let scheduler =
                MiningScheduler::start(Arc::clone(&service), Duration::from_secs(period_secs));
            while service.status().latest_height < target {
                thread::sleep(Duration::from_millis(200));
            }
            scheduler.shutdown();
            print_json(&service.status());
        }
        Command::Account { username } => match service.account(&username) {
            Some(view) => print_json(&view),
            None => not_found(&format!("account {username}")),
        },
        Command::Balance { address } => {
            #[derive(Serialize)]
            struct BalanceView<'a> {
                address: &'a str,
                balance: u64,
            }
            print_json(&BalanceView {
                address: &address,
                balance: service.balance(&address),
            });
        }
        Command::Block { height } => match service.block(height) {
            Some(block) => print_json(&block),
            None => not_found(&format!("block {height}")),
        },
        Command::Blocks { limit } => print_json(&service.recent_blocks(limit)),
        Command::Validators => print_json(&service.validators()),
        Command::Clear => unreachable!("handled above"),
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            eprintln!("error: failed to encode response: {err}");
            process::exit(1);
        }
    }
}

fn not_found(what: &str) -> ! {
    eprintln!("{what} not found");
    process::exit(2)
}
