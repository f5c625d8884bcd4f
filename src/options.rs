use allowance_scanner_lib::err_custom_create;
use allowance_scanner_lib::error::AllowanceError;
use allowance_scanner_lib::utils::{parse_address, parse_chain_ids};
use structopt::StructOpt;
use web3::types::Address;

#[derive(Debug, StructOpt)]
struct WalletOptions {
    #[structopt(long = "wallet", help = "Wallet address to inspect")]
    wallet: String,
}

#[derive(Debug, StructOpt)]
struct ScanOptions {
    #[structopt(long = "wallet", help = "Wallet address to scan")]
    wallet: String,

    #[structopt(
        long = "chains",
        help = "Comma separated list of chain ids, all enabled chains if not set"
    )]
    chains: Option<String>,
}

#[derive(Debug, StructOpt)]
struct ListOptions {
    #[structopt(long = "wallet")]
    wallet: String,

    #[structopt(long = "risk-only", help = "Only unlimited or already scored allowances")]
    risk_only: bool,

    #[structopt(long = "limit")]
    limit: Option<i64>,

    #[structopt(long = "offset")]
    offset: Option<i64>,
}

#[derive(Debug, StructOpt)]
struct LookupOptions {
    #[structopt(long = "chain", help = "Chain id")]
    chain_id: u64,

    #[structopt(long = "address")]
    address: String,
}

#[derive(Debug, StructOpt)]
pub struct ServerOptions {
    #[structopt(long = "http-addr", default_value = "127.0.0.1")]
    pub http_addr: String,

    #[structopt(long = "http-port", default_value = "8080")]
    pub http_port: u16,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Scan the full history of a wallet for permission grants
    #[structopt(name = "scan")]
    Scan(ScanOptions),
    /// Recompute risk flags of every stored allowance of a wallet
    #[structopt(name = "refresh-risk")]
    RefreshRisk(WalletOptions),
    /// List stored allowances of a wallet
    #[structopt(name = "list")]
    List(ListOptions),
    /// Show token metadata
    #[structopt(name = "token")]
    Token(LookupOptions),
    /// Show the label of a spender
    #[structopt(name = "spender")]
    Spender(LookupOptions),
    /// Show how far the last scans of a wallet got
    #[structopt(name = "coverage")]
    Coverage(WalletOptions),
    /// Serve the engine over http
    #[structopt(name = "server")]
    Server(ServerOptions),
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "allowance_scanner",
    about = "Finds token allowances of a wallet across chains and scores their risk"
)]
struct CliOptions {
    #[structopt(long = "config", default_value = "config-allowances.toml")]
    config: String,

    #[structopt(long = "memory-db", help = "Use memory db, default is file db")]
    memory_db: bool,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug)]
pub enum ValidatedCommand {
    Scan {
        wallet: Address,
        chain_ids: Option<Vec<u64>>,
    },
    RefreshRisk {
        wallet: Address,
    },
    List {
        wallet: Address,
        risk_only: bool,
        limit: Option<i64>,
        offset: Option<i64>,
    },
    Token {
        chain_id: u64,
        address: Address,
    },
    Spender {
        chain_id: u64,
        address: Address,
    },
    Coverage {
        wallet: Address,
    },
    Server(ServerOptions),
}

#[derive(Debug)]
pub struct ValidatedOptions {
    pub config: String,
    pub memory_db: bool,
    pub command: ValidatedCommand,
}

fn cli_address(raw: &str) -> Result<Address, AllowanceError> {
    parse_address(raw)
        .map_err(|_| err_custom_create!("Invalid address when parsing input: {}", raw))
}

pub fn validated_cli() -> Result<ValidatedOptions, AllowanceError> {
    let opt: CliOptions = CliOptions::from_args();
    let command = match opt.command {
        Command::Scan(scan_options) => ValidatedCommand::Scan {
            wallet: cli_address(&scan_options.wallet)?,
            chain_ids: match scan_options.chains {
                Some(chains) => Some(parse_chain_ids(&chains)?),
                None => None,
            },
        },
        Command::RefreshRisk(wallet_options) => ValidatedCommand::RefreshRisk {
            wallet: cli_address(&wallet_options.wallet)?,
        },
        Command::List(list_options) => ValidatedCommand::List {
            wallet: cli_address(&list_options.wallet)?,
            risk_only: list_options.risk_only,
            limit: list_options.limit,
            offset: list_options.offset,
        },
        Command::Token(lookup) => ValidatedCommand::Token {
            chain_id: lookup.chain_id,
            address: cli_address(&lookup.address)?,
        },
        Command::Spender(lookup) => ValidatedCommand::Spender {
            chain_id: lookup.chain_id,
            address: cli_address(&lookup.address)?,
        },
        Command::Coverage(wallet_options) => ValidatedCommand::Coverage {
            wallet: cli_address(&wallet_options.wallet)?,
        },
        Command::Server(server_options) => ValidatedCommand::Server(server_options),
    };
    Ok(ValidatedOptions {
        config: opt.config,
        memory_db: opt.memory_db,
        command,
    })
}
