use crate::core::Amount;
use crate::network::Peer;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "relay-chain")]
pub struct Opt {
    #[arg(long = "config", global = true, help = "Path to a TOML configuration file")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "createwallet", about = "Create a new wallet")]
    Createwallet,
    #[command(name = "listaddresses", about = "Print local wallet addresses")]
    ListAddresses,
    #[command(
        name = "getbalance",
        about = "Get the balance of the target address from the local chain"
    )]
    GetBalance {
        #[arg(help = "The wallet address")]
        address: String,
    },
    #[command(name = "send", about = "Sign a transfer and submit it to a node")]
    Send {
        #[arg(help = "Source wallet address")]
        from: String,
        #[arg(help = "Destination wallet address")]
        to: String,
        #[arg(help = "Amount to send in coins (up to 8 decimals)")]
        amount: Amount,
        #[arg(long = "fee", help = "Fee paid to the miner, in coins")]
        fee: Option<Amount>,
        #[arg(long = "message", help = "Free text carried with the transfer")]
        message: Option<String>,
        #[arg(long = "node", help = "Node to submit to (host:port), defaults to this node")]
        node: Option<Peer>,
    },
    #[command(name = "printchain", about = "Print all blocks in the local chain")]
    Printchain,
    #[command(name = "startnode", about = "Start a node")]
    StartNode {
        #[arg(long = "miner", help = "Enable mining mode and send rewards to ADDRESS")]
        miner: Option<String>,
    },
}
