use clap::{Args, Parser, Subcommand};
use shared::{NetworkType, NodeConfig};
use tracing::{info, Level};

mod demo;
mod node;
mod rpc;

use node::Node;

#[derive(Parser)]
#[command(name = "bathron")]
#[command(about = "Bathron - Settlement-Layer Consensus Node")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and run startup reconciliation
    Init(NodeArgs),
    /// Print the settlement state (bp30.state.v2 schema)
    State(NodeArgs),
    /// Quick health check for monitoring
    Health(NodeArgs),
    /// Aggregated explorer data (single call)
    Explorer(NodeArgs),
    /// External SPV chain tip
    SpvTip(NodeArgs),
    /// Run the end-to-end settlement demo on regtest
    Demo(LogArgs),
    /// Display version information
    Version,
}

#[derive(Args)]
struct NodeArgs {
    /// Data directory for the persistent stores
    #[arg(short, long, default_value = "./data")]
    datadir: String,

    /// Network (mainnet, testnet, regtest)
    #[arg(short, long, default_value = "testnet")]
    network: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Args)]
struct LogArgs {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(level: &str) {
    let level = match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn parse_network(name: &str) -> NetworkType {
    match name {
        "mainnet" => NetworkType::Mainnet,
        "regtest" => NetworkType::Regtest,
        _ => NetworkType::Testnet,
    }
}

fn open_node(args: &NodeArgs) -> Result<Node, String> {
    let config = NodeConfig {
        network: parse_network(&args.network),
        data_dir: args.datadir.clone(),
    };
    Node::open(config).map_err(|e| e.to_string())
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("erro de serialização: {e}"),
    }
}

fn main() -> Result<(), String> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Init(args)) => {
            init_tracing(&args.log_level);
            let node = open_node(args)?;
            let state = rpc::getstate(&node).map_err(|e| e.to_string())?;
            info!("node initialized");
            print_json(&state);
            node.shutdown().map_err(|e| e.to_string())?;
            Ok(())
        }
        Some(Commands::State(args)) => {
            init_tracing(&args.log_level);
            let node = open_node(args)?;
            print_json(&rpc::getstate(&node).map_err(|e| e.to_string())?);
            node.shutdown().map_err(|e| e.to_string())?;
            Ok(())
        }
        Some(Commands::Health(args)) => {
            init_tracing(&args.log_level);
            let node = open_node(args)?;
            print_json(&rpc::gethealth(&node).map_err(|e| e.to_string())?);
            node.shutdown().map_err(|e| e.to_string())?;
            Ok(())
        }
        Some(Commands::Explorer(args)) => {
            init_tracing(&args.log_level);
            let node = open_node(args)?;
            print_json(&rpc::getexplorerdata(&node).map_err(|e| e.to_string())?);
            node.shutdown().map_err(|e| e.to_string())?;
            Ok(())
        }
        Some(Commands::SpvTip(args)) => {
            init_tracing(&args.log_level);
            let node = open_node(args)?;
            print_json(&rpc::getspvtip(&node).map_err(|e| e.to_string())?);
            node.shutdown().map_err(|e| e.to_string())?;
            Ok(())
        }
        Some(Commands::Demo(args)) => {
            init_tracing(&args.log_level);
            demo::run().map_err(|e| e.to_string())
        }
        Some(Commands::Version) => {
            show_version();
            Ok(())
        }
        None => {
            init_tracing("info");
            demo::run().map_err(|e| e.to_string())
        }
    }
}

fn show_version() {
    println!("bathron 0.1.0");
    println!("núcleo de consenso da camada de settlement");
    println!("  - motor SPV de cabeçalhos BTC com checkpoints A7");
    println!("  - ledger UTXO tipado M0/M1/Vault (invariantes A5/A6)");
    println!("  - seleção determinística de produtor com fallback por slot");
}
