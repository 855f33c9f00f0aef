use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::RwLock;

use witnessed_coin::config::NetworkOptions;
use witnessed_coin::error::Result;
use witnessed_coin::events::{ChannelEventSink, EventSink, NetworkEvent};
use witnessed_coin::network::{self, Network};
use witnessed_coin::store::JsonFileStore;

/// Runs an in-process witness network and drives a handful of transfers
/// through it, printing every event the network emits.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of witness agents to populate the network with.
    #[arg(long, default_value = "5")]
    num_agents: usize,
    /// Witnesses required to confirm a transfer.
    #[arg(long, default_value = "3")]
    required_witnesses: usize,
    /// Coins seeded into each agent's wallet at startup.
    #[arg(long, default_value = "3")]
    coins_per_agent: u32,
    /// Directory background sweeps persist agent state to.
    #[arg(long, default_value = "./data")]
    data_dir: String,
    /// Also simulate a rejected double-spend attempt.
    #[arg(long)]
    with_double_spend: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let options = NetworkOptions {
        num_agents: args.num_agents,
        required_witnesses: args.required_witnesses,
        data_dir: args.data_dir.clone(),
        ..NetworkOptions::default()
    };

    let sink = Arc::new(ChannelEventSink::default());
    let events: Arc<dyn EventSink> = sink.clone();
    let store = Arc::new(JsonFileStore::new(args.data_dir));
    let mut network = Network::new(options, events, store)?;
    network.initialize(args.coins_per_agent).await?;

    tokio::spawn(print_events(sink.subscribe()));

    let outcome = network.transfer_coin(0, 1, 0).await?;
    println!(
        "transfer 0 -> 1: success={} reason={:?}",
        outcome.success, outcome.reason
    );

    if args.with_double_spend {
        let outcome = network.simulate_double_spend(2, 3, 0).await?;
        println!(
            "double-spend 2 -> 3: success={} reason={:?}",
            outcome.success, outcome.reason
        );
    }

    let network = Arc::new(RwLock::new(network));
    let loops = network::spawn_background_loops(network.clone());

    tokio::time::sleep(Duration::from_millis(250)).await;
    loops.abort();

    network.write().await.shutdown().await?;
    Ok(())
}

async fn print_events(mut rx: tokio::sync::broadcast::Receiver<NetworkEvent>) {
    while let Ok(event) = rx.recv().await {
        println!("event: {event:?}");
    }
}
