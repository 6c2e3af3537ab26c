use std::sync::Arc;
use std::time::Duration;

use layerchat::application::{ApplicationLayer, ChannelSink};
use layerchat::chat_layer::ChatLayer;
use layerchat::config::{ChatConfig, LinkConfig};
use layerchat::layer::{LayerGraph, LayerId, LayerStack, PassiveLayer};
use layerchat::link_layer::LinkLayer;
use layerchat::mac_addr::MacAddr;
use layerchat::medium::PhysicalLayer;
use layerchat::shared_bus::SharedBus;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::Level;

const A: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x0a]);
const B: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x0b]);

fn init_logging() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(Level::DEBUG)
        .try_init()
        .ok();
}

struct Node {
    stack: LayerStack,
    app_id: LayerId,
    chat: Arc<ChatLayer>,
    link: Arc<LinkLayer>,
    messages: mpsc::UnboundedReceiver<Vec<u8>>,
    _delivery: JoinHandle<()>,
}

impl Node {
    async fn new(bus: &SharedBus, self_addr: MacAddr, peer_addr: MacAddr) -> Node {
        let port = bus.port();
        let (sink, messages) = ChannelSink::new();

        let link = Arc::new(LinkLayer::new(Arc::new(LinkConfig::new(self_addr, peer_addr))).unwrap());
        let chat = Arc::new(ChatLayer::new(Arc::new(ChatConfig::default())).unwrap());

        let mut graph = LayerGraph::new();
        let ni_id = graph.add_layer("NI", Arc::new(PhysicalLayer::new(port.clone())));
        let link_id = graph.add_layer("Ethernet", link.clone());
        let chat_id = graph.add_layer("ChatApp", chat.clone());
        let file_id = graph.add_layer("FileApp", Arc::new(PassiveLayer));
        let app_id = graph.add_layer("App", Arc::new(ApplicationLayer::new(Arc::new(sink))));
        graph.connect(ni_id, link_id).unwrap();
        graph.connect(link_id, chat_id).unwrap();
        graph.connect(link_id, file_id).unwrap();
        graph.connect(chat_id, app_id).unwrap();

        let stack = graph.start().await;
        let delivery = port.spawn_delivery(&stack, ni_id).unwrap();

        Node { stack, app_id, chat, link, messages, _delivery: delivery }
    }

    async fn next_message(&mut self) -> Vec<u8> {
        time::timeout(Duration::from_secs(5), self.messages.recv()).await
            .expect("timed out waiting for a message")
            .expect("message channel was closed")
    }
}

#[tokio::test]
async fn test_fragmented_message() {
    init_logging();
    let bus = SharedBus::new(64);
    let mut a = Node::new(&bus, A, B).await;
    let mut b = Node::new(&bus, B, A).await;

    let message = b"abcdefghijklmnopqrstuvw".to_vec();
    a.chat.send_confirmed(&message).await.unwrap();
    assert_eq!(b.next_message().await, message);

    let stats = a.link.stats();
    assert_eq!(stats.frames_sent, 3);
    assert_eq!(stats.acks_received, 3);
    assert_eq!(b.link.stats().acks_sent, 3);
    assert_eq!(a.chat.reassembly_errors(), 0);
    assert_eq!(b.chat.reassembly_errors(), 0);
    assert!(a.messages.try_recv().is_err());
}

#[tokio::test]
async fn test_both_directions() {
    init_logging();
    let bus = SharedBus::new(64);
    let mut a = Node::new(&bus, A, B).await;
    let mut b = Node::new(&bus, B, A).await;

    let a_to_b: Vec<Vec<u8>> = vec![
        b"hi".to_vec(),
        (0..100u8).collect(),
        vec![],
        vec![7, 0, 0, 0],
    ];
    let b_to_a: Vec<Vec<u8>> = vec![
        b"hello there, how are you?".to_vec(),
        vec![0; 10],
        vec![1; 11],
    ];

    for message in &a_to_b {
        a.stack.send(a.app_id, message).await.unwrap();
    }
    for message in &b_to_a {
        b.stack.send(b.app_id, message).await.unwrap();
    }

    for expected in &a_to_b {
        assert_eq!(&b.next_message().await, expected);
    }
    for expected in &b_to_a {
        assert_eq!(&a.next_message().await, expected);
    }

    // each node sees its own frames on the bus and drops them
    assert!(a.link.stats().frames_dropped > 0);
    assert!(b.link.stats().frames_dropped > 0);
}

#[tokio::test]
async fn test_third_party_frames_are_ignored() {
    init_logging();
    let bus = SharedBus::new(64);
    let mut a = Node::new(&bus, A, B).await;
    let mut b = Node::new(&bus, B, A).await;

    // a CHAT frame from elsewhere, addressed to some other node
    let mut frame = vec![0x02, 0, 0, 0, 0, 0x0c, 0x02, 0, 0, 0, 0, 0x0d, 0x20, 0x80, 1, 0, 0, 0, 9];
    frame.resize(60, 0);
    layerchat::medium::Medium::transmit(bus.port().as_ref(), &frame).await.unwrap();

    a.chat.send_confirmed(b"after").await.unwrap();
    assert_eq!(b.next_message().await, b"after".to_vec());
    assert!(a.messages.try_recv().is_err());
    assert!(b.messages.try_recv().is_err());
}

#[tokio::test]
async fn test_shutdown() {
    init_logging();
    let bus = SharedBus::new(64);
    let a = Node::new(&bus, A, B).await;
    let mut b = Node::new(&bus, B, A).await;

    a.chat.send_confirmed(b"bye").await.unwrap();
    assert_eq!(b.next_message().await, b"bye".to_vec());

    a.stack.shutdown().await;
    assert!(a.stack.send(a.app_id, b"too late").await.is_err());
}
