//! Test harness: a bridge on ephemeral ports with the in-memory store, a
//! recording event sink, and a scriptable fake judge speaking the real
//! framed protocol.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use common::codec::{CodecError, DEFAULT_MAX_FRAME_BYTES, FrameReader, FrameWriter};
use common::event::GenericEvent;
use common::packet::{
    AdminReply, AdminRequest, BridgePacket, ExecutorVersion, JudgePacket, ProblemEntry, TestCase,
};

use bridge::config::{ProtocolConfig, UpdateLimitConfig};
use bridge::dispatch::DispatchGateway;
use bridge::event::EventSink;
use bridge::ratelimit::UpdateRateLimiter;
use bridge::registry::JudgeRegistry;
use bridge::server::{run_admin_listener, run_judge_listener};
use bridge::session::SessionContext;
use bridge::store::{MemoryStore, SubmissionRecord, SubmissionStore};

pub const JUDGE_NAME: &str = "judge-1";
pub const JUDGE_KEY: &str = "sekrit";
pub const SECOND_JUDGE_NAME: &str = "judge-2";
pub const SECOND_JUDGE_KEY: &str = "sekrit2";

/// Sink that records every posted event for assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<GenericEvent>>,
}

impl RecordingSink {
    pub fn count(&self, topic: &str, submission_id: i64) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.topic == topic && e.payload["submission-id"] == submission_id)
            .count()
    }

    pub fn topics(&self, submission_id: i64) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.payload["submission-id"] == submission_id)
            .map(|e| e.topic.clone())
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn post(&self, event: GenericEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct TestBridge {
    pub store: Arc<MemoryStore>,
    pub registry: Arc<JudgeRegistry>,
    pub gateway: Arc<DispatchGateway>,
    pub events: Arc<RecordingSink>,
    pub judge_addr: SocketAddr,
    pub admin_addr: SocketAddr,
}

impl TestBridge {
    pub async fn spawn() -> Self {
        Self::spawn_with(ProtocolConfig::default()).await
    }

    pub async fn spawn_with(protocol: ProtocolConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(RecordingSink::default());
        let registry = JudgeRegistry::new();
        let updates = UpdateLimitConfig::default();
        let limiter = Arc::new(UpdateRateLimiter::new(updates.max_updates, updates.window()));

        let mut secrets = HashMap::new();
        secrets.insert(JUDGE_NAME.to_string(), JUDGE_KEY.to_string());
        secrets.insert(SECOND_JUDGE_NAME.to_string(), SECOND_JUDGE_KEY.to_string());

        let ctx = Arc::new(SessionContext {
            store: Arc::clone(&store) as Arc<dyn SubmissionStore>,
            events: Arc::clone(&events) as Arc<dyn EventSink>,
            registry: Arc::clone(&registry),
            secrets,
            protocol: protocol.clone(),
            limiter,
        });
        let gateway = Arc::new(DispatchGateway::new(
            Arc::clone(&registry),
            Arc::clone(&store) as Arc<dyn SubmissionStore>,
        ));

        let judge_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let admin_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let judge_addr = judge_listener.local_addr().unwrap();
        let admin_addr = admin_listener.local_addr().unwrap();

        tokio::spawn(run_judge_listener(ctx, judge_listener));
        tokio::spawn(run_admin_listener(
            Arc::clone(&gateway),
            Arc::clone(&registry),
            admin_listener,
            protocol.max_frame_bytes,
        ));

        Self {
            store,
            registry,
            gateway,
            events,
            judge_addr,
            admin_addr,
        }
    }

    /// Seed a gradeable submission.
    pub fn seed_submission(&self, id: i64) -> SubmissionRecord {
        let record = SubmissionRecord::new(id, "aplusb", "CPP17");
        self.store.insert(record.clone());
        record
    }

    /// Poll the store until the submission satisfies `predicate`.
    pub async fn wait_for_submission<F>(&self, id: i64, what: &str, predicate: F)
    where
        F: Fn(&SubmissionRecord) -> bool,
    {
        for _ in 0..500 {
            if self.store.snapshot(id).as_ref().is_some_and(&predicate) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "timed out waiting for submission {id} to be {what}; current: {:?}",
            self.store.snapshot(id)
        );
    }

    pub async fn wait_until<F>(&self, what: &str, predicate: F)
    where
        F: Fn() -> bool,
    {
        for _ in 0..500 {
            if predicate() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }
}

/// A scripted judge on the other end of the wire.
pub struct FakeJudge {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
}

impl FakeJudge {
    pub async fn connect(bridge: &TestBridge, problems: &[&str]) -> Self {
        Self::connect_as(bridge, JUDGE_NAME, JUDGE_KEY, problems)
            .await
            .expect("handshake should succeed")
    }

    pub async fn connect_as(
        bridge: &TestBridge,
        name: &str,
        key: &str,
        problems: &[&str],
    ) -> Result<Self, CodecError> {
        let socket = TcpStream::connect(bridge.judge_addr).await?;
        let (read_half, write_half) = socket.into_split();
        let mut judge = Self {
            reader: FrameReader::new(read_half, DEFAULT_MAX_FRAME_BYTES),
            writer: FrameWriter::new(write_half),
        };

        let mut executors = HashMap::new();
        executors.insert(
            "CPP17".to_string(),
            vec![ExecutorVersion("g++".to_string(), vec![13, 2, 0])],
        );
        judge
            .send(&JudgePacket::Handshake {
                id: name.to_string(),
                key: key.to_string(),
                problems: problems
                    .iter()
                    .map(|code| ProblemEntry(code.to_string(), 1_700_000_000.0))
                    .collect(),
                executors,
            })
            .await?;

        match judge.recv().await? {
            BridgePacket::HandshakeSuccess => Ok(judge),
            other => panic!("expected handshake-success, got {other:?}"),
        }
    }

    pub async fn send(&mut self, packet: &JudgePacket) -> Result<(), CodecError> {
        self.writer.write_packet(packet).await
    }

    /// Read the next packet, with a test-level timeout.
    pub async fn recv(&mut self) -> Result<BridgePacket, CodecError> {
        tokio::time::timeout(Duration::from_secs(10), self.reader.read_packet())
            .await
            .expect("timed out waiting for a bridge packet")
    }

    /// Read the next non-ping packet, replying to pings on the way.
    pub async fn recv_non_ping(&mut self) -> Result<BridgePacket, CodecError> {
        loop {
            match self.recv().await? {
                BridgePacket::Ping { when } => {
                    self.send(&JudgePacket::PingResponse {
                        when,
                        time: when,
                        load: 0.25,
                    })
                    .await?;
                }
                other => return Ok(other),
            }
        }
    }

    /// Convenience: a passing (or failing) case row.
    pub fn case(position: u32, status: u32, points: f64, total: f64) -> TestCase {
        TestCase {
            position,
            status,
            time: 0.05,
            memory: 1024.0,
            points,
            total_points: total,
            feedback: None,
            extended_feedback: None,
            output: None,
        }
    }
}

/// A control-plane client speaking the framed admin protocol.
pub struct AdminClient {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
}

impl AdminClient {
    pub async fn connect(bridge: &TestBridge) -> Self {
        let socket = TcpStream::connect(bridge.admin_addr).await.unwrap();
        let (read_half, write_half) = socket.into_split();
        Self {
            reader: FrameReader::new(read_half, DEFAULT_MAX_FRAME_BYTES),
            writer: FrameWriter::new(write_half),
        }
    }

    pub async fn request(&mut self, request: &AdminRequest) -> AdminReply {
        self.writer.write_packet(request).await.unwrap();
        tokio::time::timeout(Duration::from_secs(10), self.reader.read_packet())
            .await
            .expect("timed out waiting for an admin reply")
            .unwrap()
    }
}
