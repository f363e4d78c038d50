// Entry point for the relay-chain CLI
// Every command works against the data directory of the node named by the config
use clap::Parser;
use log::{error, info, LevelFilter};
use relay_chain::network::{Package, TransactionMessage};
use relay_chain::{
    reindex, validate_address, Blockchain, Command, Config, Opt, PeerNetwork, Peers, RecordLog,
    Server, SledLedger, TcpTransport, Transaction, TransactionPool, Wallets,
};
use std::fs;
use std::process;
use std::sync::Arc;

fn main() {
    // Info level is enough to follow gossip and mining without drowning in detail
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();

    if let Err(e) = run_command(opt) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(opt: Opt) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load(opt.config.as_deref())?;

    match opt.command {
        Command::Createwallet => {
            let mut wallets = Wallets::new(&config.node_data_dir());
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}")
        }
        Command::ListAddresses => {
            let wallets = Wallets::new(&config.node_data_dir());
            for address in wallets.get_addresses() {
                println!("{address}")
            }
        }
        Command::GetBalance { address } => {
            if !validate_address(&address) {
                return Err(format!("Invalid address: {address}").into());
            }
            let blockchain = Blockchain::open(&config.chain_log_path())?;
            let balance = blockchain.get_balance(&address);
            println!("Balance of {address}: {balance}");
        }
        Command::Send {
            from,
            to,
            amount,
            fee,
            message,
            node,
        } => {
            if !validate_address(&from) {
                return Err(format!("Invalid sender address: {from}").into());
            }
            if !validate_address(&to) {
                return Err(format!("Invalid recipient address: {to}").into());
            }

            let wallets = Wallets::new(&config.node_data_dir());
            let wallet = wallets
                .get_wallet(&from)
                .ok_or_else(|| format!("No local wallet for {from}"))?;

            // Signed against the balance this node's chain log knows about
            let blockchain = Blockchain::open(&config.chain_log_path())?;
            let balance = blockchain.get_balance(&from);
            let transaction =
                Transaction::create_transfer(wallet, &to, amount, balance, fee, message)?;

            let self_peer = config.get_self_peer()?;
            let target = node.unwrap_or_else(|| self_peer.clone());
            let pkg = Package::Transaction(TransactionMessage {
                transaction: transaction.clone(),
                sender: self_peer,
                peers: vec![],
            });
            TcpTransport::new(config.get_request_timeout()).send(&target, &pkg)?;
            println!("Submitted transaction {} to {target}", transaction.get_id())
        }
        Command::Printchain => {
            let blockchain = Blockchain::open(&config.chain_log_path())?;
            for block in blockchain.get_blocks().iter().rev() {
                println!("Height: {}", block.get_height());
                println!("Last hash: {}", block.get_last_hash());
                println!("Hash: {}", block.get_hash());
                println!("Hash of all hashes: {}", block.get_hash_of_all_hashes());
                println!("Timestamp: {}", block.get_timestamp());
                println!(
                    "Difficulty: {} Nonce: {} Size: {}",
                    block.get_difficulty(),
                    block.get_nonce(),
                    block.get_block_size()
                );
                println!(
                    "Volume: {} Reward: {} Fees: {}",
                    block.get_transaction_volume(),
                    block.get_block_reward(),
                    block.get_fee_reward()
                );
                for tx in block.get_transactions() {
                    println!(
                        "- Transaction {} from {}",
                        tx.get_id(),
                        tx.get_input().get_address()
                    );
                    if let Some(message) = tx.get_input().get_message() {
                        println!("-- Message: {message}");
                    }
                    if !tx.is_reward() {
                        println!("-- Signature: {}", tx.get_input().get_signature());
                    }
                    for (address, value) in tx.get_output() {
                        println!("-- Output value = {value}, to = {address}");
                    }
                }
                println!()
            }
        }
        Command::StartNode { miner } => {
            if let Some(addr) = miner {
                if !validate_address(&addr) {
                    return Err(format!("Invalid miner address: {addr}").into());
                }
                config.set_mining_addr(addr);
            }
            start_node(&config)?
        }
    }
    Ok(())
}

// Each node keeps its chain log, peers log and ledger under its own directory,
// so several nodes can run side by side on one machine
fn start_node(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(config.node_data_dir())?;
    let self_peer = config.get_self_peer()?;

    let blockchain = Blockchain::open(&config.chain_log_path())?
        .with_max_block_weight(config.get_max_block_weight());

    let ledger = SledLedger::open(&config.ledger_path())?;
    reindex(&ledger, &blockchain.get_blocks())?;

    let peers = Peers::load(RecordLog::new(config.peers_log_path()))?;
    peers.merge(&config.get_bootstrap_peers()?, Some(&self_peer));

    let network = PeerNetwork::new(
        self_peer,
        blockchain,
        Arc::new(TransactionPool::new()),
        Arc::new(peers),
        Arc::new(TcpTransport::new(config.get_request_timeout())),
    )
    .with_ledger(Arc::new(ledger));

    let mut server = Server::bind(Arc::new(network), &config.get_node_addr())?
        .with_sync_interval(config.get_sync_interval());
    if let Some(addr) = config.get_mining_addr() {
        info!("Mining is on. Address to receive rewards: {addr}");
        server = server.with_miner(addr);
    }
    server.run()?;
    Ok(())
}
