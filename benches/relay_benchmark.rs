use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::json;
use tokio::sync::mpsc;

use meshcall::signaling::{
    OutboundMessage, PeerId, RoomId, RoomRegistry, SignalMessage, SignalingRelay,
};

const HOST_CANDIDATE: &str = "candidate:0 1 udp 2122260223 10.0.0.2 50000 typ host";
const OFFER_FRAME: &str = r#"{"type":"offer","to":"peer_0000beef","sdp":{"type":"offer","sdp":"v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n"}}"#;

type Inbox = mpsc::UnboundedReceiver<OutboundMessage>;

/// relay with `n` connected peers sitting in one room
fn populated_relay(n: usize) -> (SignalingRelay, Vec<PeerId>, Vec<Inbox>) {
    let mut relay = SignalingRelay::new();
    let room = RoomId::from("bench");
    let mut peers = Vec::with_capacity(n);
    let mut inboxes = Vec::with_capacity(n);

    for i in 0..n {
        let id = PeerId::from(format!("peer_{:08x}", i));
        let (tx, rx) = mpsc::unbounded_channel();
        relay.connect(id.clone(), tx);
        relay.handle(&id, SignalMessage::JoinRoom { room: room.clone() });
        peers.push(id);
        inboxes.push(rx);
    }
    (relay, peers, inboxes)
}

/// parsing benchmark
fn bench_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Parsing");
    group.throughput(Throughput::Elements(1));

    group.bench_function("SignalMessage", |b| {
        b.iter(|| {
            let msg: SignalMessage = serde_json::from_str(black_box(OFFER_FRAME)).unwrap();
            black_box(msg)
        })
    });

    group.finish();
}

/// room membership benchmark
fn bench_registry(c: &mut Criterion) {
    let room = RoomId::from("bench");
    let members: Vec<PeerId> = (0..16).map(|i| PeerId::from(format!("peer_{:08x}", i))).collect();

    let mut group = c.benchmark_group("Registry");
    group.throughput(Throughput::Elements(members.len() as u64));

    group.bench_function("join_then_leave_16", |b| {
        b.iter(|| {
            let mut registry = RoomRegistry::new();
            for peer in &members {
                black_box(registry.join(&room, peer));
            }
            for peer in &members {
                black_box(registry.leave(peer));
            }
        })
    });

    group.finish();
}

/// directed message routing benchmark
fn bench_routing(c: &mut Criterion) {
    let (mut relay, peers, mut inboxes) = populated_relay(8);
    let sender = peers[0].clone();
    let target = peers[7].clone();

    let mut group = c.benchmark_group("Routing");
    group.throughput(Throughput::Elements(1));

    group.bench_function("candidate", |b| {
        b.iter(|| {
            relay.handle(
                &sender,
                SignalMessage::NetworkCandidate {
                    to: target.clone(),
                    from: None,
                    candidate: json!({ "candidate": HOST_CANDIDATE }),
                },
            );
            black_box(inboxes[7].try_recv().ok())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_parsing, bench_registry, bench_routing);
criterion_main!(benches);
