// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! Digest handling end to end: control stream, synchronizer, register writes, acks

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use psfp::config::HyperperiodConfig;
use psfp::controller::HyperperiodSynchronizer;
use psfp::p4runtime::proto::p4runtime::{
    entity, p4_data, stream_message_request, stream_message_response, DigestList, P4Data,
    P4StructLike, StreamMessageResponse,
};
use psfp::p4runtime::{
    codec, ControlStreamConfig, DeviceSession, DigestHandler, ElectionId, MemoryTransport,
    SchemaIndex, SessionConfig, StreamPeer,
};

fn schema() -> Arc<SchemaIndex> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/sdn-psfp.p4info.json");
    Arc::new(SchemaIndex::load(&path).unwrap())
}

fn session(transport: &MemoryTransport) -> DeviceSession {
    let config = SessionConfig {
        name: "s1".to_string(),
        address: "memory".to_string(),
        device_id: 0,
        election_id: ElectionId::new(0, 1),
        connect_timeout: Duration::from_secs(1),
    };
    DeviceSession::with_transport(&config, Arc::new(transport.clone()))
}

fn digest(gate: u128, ingress: u128, duration: u128, last: u128) -> P4Data {
    let member = |value: u128, width: u32| P4Data::bitstring(codec::encode(value, width).unwrap().into_bytes());
    P4Data {
        data: Some(p4_data::Data::Struct(P4StructLike {
            members: vec![member(gate, 8), member(ingress, 48), member(duration, 48), member(last, 48)],
        })),
    }
}

fn digest_message(digest_id: u32, list_id: u64, data: Vec<P4Data>) -> StreamMessageResponse {
    StreamMessageResponse {
        update: Some(stream_message_response::Update::Digest(DigestList {
            digest_id,
            list_id,
            data,
            timestamp: 0,
        })),
    }
}

/// (register name, index, value) of every register write, in send order
fn register_writes(transport: &MemoryTransport, schema: &SchemaIndex) -> Vec<(String, i64, u128)> {
    let names = [
        "IngressImpl.psfp_c.last_hyperperiod_reg",
        "IngressImpl.psfp_c.period_count",
        "IngressImpl.psfp_c.hyperperiod_done_reg",
    ];
    let ids: Vec<(u32, &str)> = names
        .iter()
        .map(|n| (schema.register(n, None).unwrap().id, *n))
        .collect();

    let mut writes = Vec::new();
    for request in transport.writes() {
        for update in request.updates {
            let Some(entity::Entity::RegisterEntry(entry)) = update.entity.and_then(|e| e.entity) else {
                continue;
            };
            let name = ids.iter().find(|(id, _)| *id == entry.register_id).unwrap().1;
            let Some(p4_data::Data::Bitstring(bytes)) = entry.data.and_then(|d| d.data) else {
                panic!("register write without bitstring");
            };
            writes.push((
                name.to_string(),
                entry.index.unwrap().index,
                codec::decode(&bytes, 128).unwrap(),
            ));
        }
    }
    writes
}

async fn next_ack(peer: &mut StreamPeer) -> (u32, u64) {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), peer.recv_non_keepalive())
            .await
            .expect("ack in time")
            .expect("stream open");
        if let Some(stream_message_request::Update::DigestAck(ack)) = message.update {
            return (ack.digest_id, ack.list_id);
        }
    }
}

struct Harness {
    transport: MemoryTransport,
    peer: StreamPeer,
    schema: Arc<SchemaIndex>,
    digest_id: u32,
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<psfp::p4runtime::Result<psfp::p4runtime::StreamStats>>,
}

async fn start<H, F>(transport: MemoryTransport, wrap: F) -> Harness
where
    H: DigestHandler + 'static,
    F: FnOnce(HyperperiodSynchronizer) -> H,
{
    let schema = schema();
    let session = session(&transport);
    let peer = transport.stream_peer().unwrap();
    let synchronizer =
        HyperperiodSynchronizer::new(session.clone(), Arc::clone(&schema), &HyperperiodConfig::default())
            .unwrap();
    let digest_id = synchronizer.digest_id();
    let handler = wrap(synchronizer);

    let stream = session
        .send_mastership_arbitration(&ControlStreamConfig::default())
        .await
        .unwrap();
    let (shutdown, rx) = watch::channel(false);
    let task = tokio::spawn(async move { stream.run(&handler, rx).await });

    Harness {
        transport,
        peer,
        schema,
        digest_id,
        shutdown,
        task,
    }
}

#[tokio::test]
async fn test_digest_scenario_writes_registers_and_acks() {
    let mut h = start(MemoryTransport::new(), |s| s).await;

    h.peer.send(digest_message(
        h.digest_id,
        7,
        vec![digest(2, 123_456, 16_000_000, 9_000_000_000)],
    ));
    assert_eq!(next_ack(&mut h.peer).await, (h.digest_id, 7));

    assert_eq!(
        register_writes(&h.transport, &h.schema),
        vec![
            ("IngressImpl.psfp_c.last_hyperperiod_reg".to_string(), 2, 9_016_000_000),
            ("IngressImpl.psfp_c.period_count".to_string(), 2, 0),
            ("IngressImpl.psfp_c.hyperperiod_done_reg".to_string(), 2, 0),
        ]
    );

    h.shutdown.send(true).unwrap();
    let stats = h.task.await.unwrap().unwrap();
    assert_eq!(stats.digests_received, 1);
    assert_eq!(stats.digests_failed, 0);
    assert_eq!(stats.acks_sent, 1);
}

#[tokio::test]
async fn test_ack_sent_when_every_write_fails() {
    let transport = MemoryTransport::new();
    transport.fail_writes_where(|_| true);
    let mut h = start(transport, |s| s).await;

    h.peer.send(digest_message(
        h.digest_id,
        11,
        vec![digest(2, 123_456, 16_000_000, 9_000_000_000)],
    ));
    assert_eq!(next_ack(&mut h.peer).await, (h.digest_id, 11));
    // All three writes were attempted
    assert_eq!(register_writes(&h.transport, &h.schema).len(), 3);

    h.shutdown.send(true).unwrap();
    let stats = h.task.await.unwrap().unwrap();
    assert_eq!(stats.digests_failed, 1);
    assert_eq!(stats.acks_sent, 1);
}

#[tokio::test]
async fn test_undecodable_digest_is_acked_and_stream_continues() {
    let mut h = start(MemoryTransport::new(), |s| s).await;

    h.peer.send(digest_message(h.digest_id, 1, vec![P4Data::bitstring(vec![0xff])]));
    assert_eq!(next_ack(&mut h.peer).await, (h.digest_id, 1));

    h.peer.send(digest_message(h.digest_id, 2, vec![digest(1, 5, 20_000_000, 100)]));
    assert_eq!(next_ack(&mut h.peer).await, (h.digest_id, 2));
    assert_eq!(
        register_writes(&h.transport, &h.schema)[0],
        ("IngressImpl.psfp_c.last_hyperperiod_reg".to_string(), 1, 20_000_100)
    );

    h.shutdown.send(true).unwrap();
    h.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_redelivered_digest_writes_same_values() {
    let mut h = start(MemoryTransport::new(), |s| s).await;
    for _ in 0..2 {
        h.peer.send(digest_message(
            h.digest_id,
            3,
            vec![digest(4, 77, 20_000_000, 1_000_000)],
        ));
        assert_eq!(next_ack(&mut h.peer).await, (h.digest_id, 3));
    }

    let writes = register_writes(&h.transport, &h.schema);
    assert_eq!(writes.len(), 6);
    assert_eq!(writes[..3], writes[3..]);

    h.shutdown.send(true).unwrap();
    h.task.await.unwrap().unwrap();
}

/// Records when each digest list starts and finishes, and what had been acked at start
struct Recording {
    inner: HyperperiodSynchronizer,
    transport: MemoryTransport,
    events: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl DigestHandler for Recording {
    async fn on_digest_list(&self, list: &DigestList) -> psfp::p4runtime::Result<()> {
        // Let the in-memory relay pick up anything already sent
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let acked: Vec<u64> = self
            .transport
            .stream_sent()
            .into_iter()
            .filter_map(|m| match m.update {
                Some(stream_message_request::Update::DigestAck(ack)) => Some(ack.list_id),
                _ => None,
            })
            .collect();
        self.events
            .lock()
            .push(format!("begin {} acked {:?}", list.list_id, acked));
        let result = self.inner.on_digest_list(list).await;
        self.events.lock().push(format!("end {}", list.list_id));
        result
    }
}

#[tokio::test]
async fn test_digests_processed_in_arrival_order() {
    let transport = MemoryTransport::new();
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorder_transport = transport.clone();
    let recorder_events = Arc::clone(&events);
    let mut h = start(transport, move |inner| Recording {
        inner,
        transport: recorder_transport,
        events: recorder_events,
    })
    .await;

    // Both queued before the stream task sees either
    h.peer.send(digest_message(h.digest_id, 1, vec![digest(2, 10, 16_000_000, 0)]));
    h.peer.send(digest_message(h.digest_id, 2, vec![digest(2, 20, 16_000_000, 16_000_000)]));
    assert_eq!(next_ack(&mut h.peer).await, (h.digest_id, 1));
    assert_eq!(next_ack(&mut h.peer).await, (h.digest_id, 2));

    // The ack of list 1 is out before list 2 starts
    assert_eq!(
        *events.lock(),
        vec![
            "begin 1 acked []".to_string(),
            "end 1".to_string(),
            "begin 2 acked [1]".to_string(),
            "end 2".to_string(),
        ]
    );

    let last_writes: Vec<u128> = register_writes(&h.transport, &h.schema)
        .into_iter()
        .filter(|(name, _, _)| name.ends_with("last_hyperperiod_reg"))
        .map(|(_, _, value)| value)
        .collect();
    assert_eq!(last_writes, vec![16_000_000, 32_000_000]);

    h.shutdown.send(true).unwrap();
    h.task.await.unwrap().unwrap();
}
