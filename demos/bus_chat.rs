//! Two chat nodes on an in-process shared bus. Node A sends every message given on the command
//!  line to node B, which prints what it receives and replies with the message's length.
//!
//! ```text
//! cargo run --example bus_chat -- "hello" "a message that is longer than a single fragment" -v
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use clap_derive::Parser;
use layerchat::application::{ApplicationLayer, ChannelSink};
use layerchat::chat_layer::ChatLayer;
use layerchat::config::{AckPolicy, ChatConfig, LinkConfig};
use layerchat::layer::{LayerGraph, LayerId, LayerStack, PassiveLayer};
use layerchat::link_layer::LinkLayer;
use layerchat::mac_addr::MacAddr;
use layerchat::medium::PhysicalLayer;
use layerchat::shared_bus::SharedBus;
use tokio::sync::mpsc;
use tracing::{info, Level};

#[derive(Parser)]
struct Args {
    messages: Vec<String>,

    #[clap(long, default_value = "02:00:00:00:00:0a")]
    addr_a: String,

    #[clap(long, default_value = "02:00:00:00:00:0b")]
    addr_b: String,

    #[clap(long, default_value_t = ChatConfig::DEFAULT_FRAGMENT_SIZE)]
    fragment_size: usize,

    /// ACK timeout in milliseconds; waits indefinitely if omitted
    #[clap(long)]
    ack_timeout_ms: Option<u64>,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

struct Node {
    stack: LayerStack,
    app_id: LayerId,
    messages: mpsc::UnboundedReceiver<Vec<u8>>,
}

async fn start_node(bus: &SharedBus, link_config: LinkConfig, chat_config: ChatConfig) -> anyhow::Result<Node> {
    let port = bus.port();
    let (sink, messages) = ChannelSink::new();

    let mut graph = LayerGraph::new();
    let ni = graph.add_layer("NI", Arc::new(PhysicalLayer::new(port.clone())));
    let link = graph.add_layer("Ethernet", Arc::new(LinkLayer::new(Arc::new(link_config))?));
    let chat = graph.add_layer("ChatApp", Arc::new(ChatLayer::new(Arc::new(chat_config))?));
    let file = graph.add_layer("FileApp", Arc::new(PassiveLayer));
    let app_id = graph.add_layer("App", Arc::new(ApplicationLayer::new(Arc::new(sink))));
    graph.connect(ni, link)?;
    graph.connect(link, chat)?;
    graph.connect(link, file)?;
    graph.connect(chat, app_id)?;

    let stack = graph.start().await;
    // the delivery loop ends with the stack
    port.spawn_delivery(&stack, ni)?;

    Ok(Node { stack, app_id, messages })
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let addr_a: MacAddr = args.addr_a.parse()?;
    let addr_b: MacAddr = args.addr_b.parse()?;

    let ack_policy = match args.ack_timeout_ms {
        None => AckPolicy::WaitIndefinitely,
        Some(millis) => AckPolicy::Retransmit { timeout: Duration::from_millis(millis), max_retransmits: 3 },
    };
    let chat_config = ChatConfig {
        fragment_size: args.fragment_size,
        ..ChatConfig::default()
    };

    let bus = SharedBus::new(256);
    let mut node_a = start_node(&bus, LinkConfig { ack_policy, ..LinkConfig::new(addr_a, addr_b) }, chat_config.clone()).await?;
    let mut node_b = start_node(&bus, LinkConfig { ack_policy, ..LinkConfig::new(addr_b, addr_a) }, chat_config).await?;

    for message in &args.messages {
        node_a.stack.send(node_a.app_id, message.as_bytes()).await?;

        let Some(received) = node_b.messages.recv().await else {
            anyhow::bail!("node B stopped receiving");
        };
        info!("B received: {:?}", String::from_utf8_lossy(&received));

        let reply = format!("got {} bytes", received.len());
        node_b.stack.send(node_b.app_id, reply.as_bytes()).await?;

        let Some(received) = node_a.messages.recv().await else {
            anyhow::bail!("node A stopped receiving");
        };
        info!("A received: {:?}", String::from_utf8_lossy(&received));
    }

    node_a.stack.shutdown().await;
    node_b.stack.shutdown().await;
    Ok(())
}
