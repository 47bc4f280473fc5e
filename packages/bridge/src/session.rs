//! Per-judge connection session.
//!
//! Each accepted connection authenticates, registers a [`JudgeSession`] and
//! then runs two tasks: the receive loop, which processes packets strictly
//! in arrival order, and the liveness-probe loop. Grading packets mutate
//! the submission store through conditional updates and post best-effort
//! events; a transport failure from any direction funnels into one
//! teardown path that unregisters the session and finalizes an orphaned
//! assignment as an internal error.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use common::Verdict;
use common::codec::{CodecError, FrameReader, FrameWriter};
use common::event::GenericEvent;
use common::packet::{BridgePacket, JudgePacket, TestCase};

use common::projection;

use crate::config::ProtocolConfig;
use crate::event::EventSink;
use crate::ratelimit::UpdateRateLimiter;
use crate::registry::JudgeRegistry;
use crate::store::{CaseRow, SubmissionStore};

/// Samples kept for the smoothed latency and clock-offset estimates.
const PING_WINDOW: usize = 6;

/// Shared dependencies handed to every judge connection.
pub struct SessionContext {
    pub store: Arc<dyn SubmissionStore>,
    pub events: Arc<dyn EventSink>,
    pub registry: Arc<JudgeRegistry>,
    /// Per-judge shared secrets, name -> key.
    pub secrets: HashMap<String, String>,
    pub protocol: ProtocolConfig,
    pub limiter: Arc<UpdateRateLimiter>,
}

/// Compare a supplied key against the stored one without leaking timing.
/// Comparing digests keeps the comparison length-independent of the
/// secret and data-independent of the prefix that matches.
fn keys_match(supplied: &str, expected: &str) -> bool {
    Sha256::digest(supplied.as_bytes()) == Sha256::digest(expected.as_bytes())
}

fn key_fingerprint(key: &str) -> String {
    hex::encode(&Sha256::digest(key.as_bytes())[..8])
}

fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

/// Session lifecycle. The unauthenticated phase is the connection before a
/// session object exists, so it has no variant here.
#[derive(Debug)]
enum SessionState {
    Idle,
    /// A submission-request was sent; the ack timer for `generation` races
    /// the receive loop.
    AwaitingAck { submission: i64, generation: u64 },
    /// Grading in flight. Batch fields group incoming case rows.
    Busy {
        submission: i64,
        in_batch: bool,
        batch_no: i32,
    },
    /// Torn down, or claimed for teardown by the ack timer. An assignment
    /// not yet finalized is kept for the teardown path to orphan.
    Closed { orphaned: Option<i64> },
}

struct Guarded {
    state: SessionState,
    ack_generation: u64,
}

#[derive(Default)]
struct PingStats {
    rtt: VecDeque<f64>,
    offset: VecDeque<f64>,
    load: f64,
}

impl PingStats {
    fn record(&mut self, rtt: f64, offset: f64, load: f64) {
        if self.rtt.len() == PING_WINDOW {
            self.rtt.pop_front();
        }
        if self.offset.len() == PING_WINDOW {
            self.offset.pop_front();
        }
        self.rtt.push_back(rtt);
        self.offset.push_back(offset);
        self.load = load;
    }

    fn smoothed_rtt(&self) -> Option<f64> {
        if self.rtt.is_empty() {
            return None;
        }
        Some(self.rtt.iter().sum::<f64>() / self.rtt.len() as f64)
    }

    fn smoothed_offset(&self) -> Option<f64> {
        if self.offset.is_empty() {
            return None;
        }
        Some(self.offset.iter().sum::<f64>() / self.offset.len() as f64)
    }
}

/// One authenticated judge connection.
pub struct JudgeSession {
    name: String,
    store: Arc<dyn SubmissionStore>,
    events: Arc<dyn EventSink>,
    registry: Arc<JudgeRegistry>,
    limiter: Arc<UpdateRateLimiter>,
    protocol: ProtocolConfig,
    cancel: CancellationToken,
    /// Send lock: the probe loop, the packet handlers and cross-task
    /// control sends all write through here.
    writer: Mutex<FrameWriter<OwnedWriteHalf>>,
    guarded: StdMutex<Guarded>,
    stats: StdMutex<PingStats>,
    problems: StdMutex<HashSet<String>>,
    /// Language keys declared at handshake; fixed for the session.
    executors: HashSet<String>,
    torn_down: AtomicBool,
}

impl JudgeSession {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Most recent load the judge reported.
    pub fn load(&self) -> f64 {
        self.stats.lock().unwrap().load
    }

    pub fn smoothed_rtt(&self) -> Option<f64> {
        self.stats.lock().unwrap().smoothed_rtt()
    }

    pub fn smoothed_clock_offset(&self) -> Option<f64> {
        self.stats.lock().unwrap().smoothed_offset()
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.guarded.lock().unwrap().state, SessionState::Idle)
    }

    /// The submission this session is grading or waiting on, if any.
    pub fn current_submission(&self) -> Option<i64> {
        match self.guarded.lock().unwrap().state {
            SessionState::AwaitingAck { submission, .. }
            | SessionState::Busy { submission, .. } => Some(submission),
            SessionState::Idle | SessionState::Closed { .. } => None,
        }
    }

    pub fn has_capability(&self, problem: &str, language: &str) -> bool {
        self.executors.contains(language) && self.problems.lock().unwrap().contains(problem)
    }

    pub fn problem_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.problems.lock().unwrap().iter().cloned().collect();
        codes.sort();
        codes
    }

    /// Reserve this session for a submission: Idle -> AwaitingAck.
    /// Returns the ack generation to arm the timer with, or None if the
    /// session is not Idle. The compare-and-swap under the state mutex is
    /// what keeps concurrent dispatch from double-assigning.
    pub fn try_assign(&self, submission_id: i64) -> Option<u64> {
        let mut guarded = self.guarded.lock().unwrap();
        if !matches!(guarded.state, SessionState::Idle) {
            return None;
        }
        guarded.ack_generation += 1;
        guarded.state = SessionState::AwaitingAck {
            submission: submission_id,
            generation: guarded.ack_generation,
        };
        Some(guarded.ack_generation)
    }

    /// Forward a reserved submission to the judge and arm the ack timer.
    pub async fn request_grading(
        self: &Arc<Self>,
        packet: &BridgePacket,
        generation: u64,
    ) -> Result<(), CodecError> {
        self.send_packet(packet).await?;
        self.spawn_ack_timer(generation);
        Ok(())
    }

    pub async fn send_packet(&self, packet: &BridgePacket) -> Result<(), CodecError> {
        self.writer.lock().await.write_packet(packet).await
    }

    /// Request teardown from any task. The receive loop observes the
    /// cancellation and runs the teardown path.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    fn spawn_ack_timer(self: &Arc<Self>, generation: u64) {
        let session = Arc::clone(self);
        let timeout = self.protocol.ack_timeout();
        tokio::spawn(async move {
            tokio::select! {
                _ = session.cancel.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    // Claim the race: only an untouched AwaitingAck of the
                    // same generation may time out. A processed ack has
                    // already moved the state on, and then this is a no-op.
                    let fired = {
                        let mut guarded = session.guarded.lock().unwrap();
                        match guarded.state {
                            SessionState::AwaitingAck { submission, generation: armed }
                                if armed == generation =>
                            {
                                guarded.state = SessionState::Closed {
                                    orphaned: Some(submission),
                                };
                                Some(submission)
                            }
                            _ => None,
                        }
                    };
                    if let Some(submission_id) = fired {
                        error!(
                            judge = %session.name,
                            submission_id,
                            "No acknowledgement within the timeout, closing session"
                        );
                        session.close();
                    }
                }
            }
        });
    }

    pub fn spawn_ping_loop(self: &Arc<Self>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(session.protocol.ping_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = session.cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let ping = BridgePacket::Ping { when: unix_now() };
                        if session.send_packet(&ping).await.is_err() {
                            warn!(judge = %session.name, "Ping send failed, closing session");
                            session.close();
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Receive loop. Packets are handled inline, one at a time, so a
    /// single judge's packets are never reordered or processed
    /// concurrently.
    pub async fn run(self: Arc<Self>, mut reader: FrameReader<OwnedReadHalf>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = reader.read_packet::<JudgePacket>() => match result {
                    Ok(packet) => {
                        if !self.handle_packet(packet).await {
                            break;
                        }
                    }
                    Err(e) if e.is_recoverable() => {
                        warn!(judge = %self.name, error = %e, "Ignoring malformed packet");
                    }
                    Err(CodecError::ConnectionClosed) => {
                        info!(judge = %self.name, "Connection closed by judge");
                        break;
                    }
                    Err(e) => {
                        error!(judge = %self.name, error = %e, "Unrecoverable transport error");
                        break;
                    }
                }
            }
        }
        self.teardown().await;
    }

    /// Returns false when the connection must close.
    async fn handle_packet(self: &Arc<Self>, packet: JudgePacket) -> bool {
        match packet {
            JudgePacket::Handshake { .. } => {
                error!(judge = %self.name, "Duplicate handshake, closing session");
                false
            }
            JudgePacket::SubmissionAcknowledged { submission_id } => {
                self.on_ack(submission_id).await
            }
            JudgePacket::GradingBegin {
                submission_id,
                pretested,
            } => {
                self.on_grading_begin(submission_id, pretested).await;
                true
            }
            JudgePacket::BatchBegin { submission_id } => {
                self.on_batch_begin(submission_id).await;
                true
            }
            JudgePacket::BatchEnd { submission_id } => {
                self.on_batch_end(submission_id);
                true
            }
            JudgePacket::TestCaseStatus {
                submission_id,
                cases,
            } => {
                self.on_test_cases(submission_id, cases).await;
                true
            }
            JudgePacket::CompileMessage { submission_id, log } => {
                self.on_compile_message(submission_id, &log).await;
                true
            }
            JudgePacket::CompileError { submission_id, log } => {
                self.on_compile_error(submission_id, &log).await;
                true
            }
            JudgePacket::InternalError {
                submission_id,
                message,
            } => {
                self.on_internal_error(submission_id, &message).await;
                true
            }
            JudgePacket::SubmissionTerminated { submission_id } => {
                self.on_terminated(submission_id).await;
                true
            }
            JudgePacket::GradingEnd { submission_id } => {
                self.on_grading_end(submission_id).await;
                true
            }
            JudgePacket::SupportedProblems { problems } => {
                self.on_supported_problems(problems.into_iter().map(|p| p.0).collect())
                    .await;
                true
            }
            JudgePacket::PingResponse { when, time, load } => {
                self.on_ping_response(when, time, load).await;
                true
            }
        }
    }

    async fn on_ack(self: &Arc<Self>, submission_id: i64) -> bool {
        enum Ack {
            Accepted,
            Mismatch { expected: i64 },
            Unexpected,
        }

        let outcome = {
            let mut guarded = self.guarded.lock().unwrap();
            match guarded.state {
                SessionState::AwaitingAck { submission, .. } if submission == submission_id => {
                    guarded.state = SessionState::Busy {
                        submission: submission_id,
                        in_batch: false,
                        batch_no: 0,
                    };
                    Ack::Accepted
                }
                SessionState::AwaitingAck { submission, .. } => {
                    Ack::Mismatch {
                        expected: submission,
                    }
                }
                _ => Ack::Unexpected,
            }
        };

        match outcome {
            Ack::Accepted => {
                debug!(judge = %self.name, submission_id, "Submission acknowledged");
                match self.store.mark_processing(submission_id).await {
                    Ok(true) => {
                        self.events
                            .post(GenericEvent::submission("processing", submission_id));
                    }
                    Ok(false) => {
                        warn!(
                            judge = %self.name,
                            submission_id,
                            "Acknowledged submission is gone or no longer queued"
                        );
                    }
                    Err(e) => {
                        error!(judge = %self.name, submission_id, error = %e, "Store update failed");
                    }
                }
                true
            }
            Ack::Mismatch { expected } => {
                // The judge's bookkeeping cannot be trusted any further.
                error!(
                    judge = %self.name,
                    expected,
                    received = submission_id,
                    "Acknowledgement for the wrong submission, closing session"
                );
                self.mark_internal_error(expected, "judge acknowledged the wrong submission")
                    .await;
                self.mark_internal_error(submission_id, "judge acknowledged the wrong submission")
                    .await;
                false
            }
            Ack::Unexpected => {
                warn!(judge = %self.name, submission_id, "Unexpected acknowledgement, ignoring");
                true
            }
        }
    }

    /// Conditionally mark a submission IE without any session bookkeeping.
    async fn mark_internal_error(&self, submission_id: i64, message: &str) {
        match self.store.set_internal_error(submission_id, message).await {
            Ok(true) => {
                self.events
                    .post(GenericEvent::submission("internal-error", submission_id));
            }
            Ok(false) => {
                debug!(submission_id, "Submission already finalized, not marking IE");
            }
            Err(e) => {
                error!(submission_id, error = %e, "Store update failed");
            }
        }
    }

    /// True when `submission_id` is the one this session is grading.
    fn is_assigned(&self, submission_id: i64) -> bool {
        matches!(
            self.guarded.lock().unwrap().state,
            SessionState::Busy { submission, .. } if submission == submission_id
        )
    }

    async fn on_grading_begin(&self, submission_id: i64, pretested: bool) {
        if !self.is_assigned(submission_id) {
            warn!(judge = %self.name, submission_id, "grading-begin for an unassigned submission");
            return;
        }
        {
            let mut guarded = self.guarded.lock().unwrap();
            if let SessionState::Busy {
                in_batch, batch_no, ..
            } = &mut guarded.state
            {
                *in_batch = false;
                *batch_no = 0;
            }
        }
        match self.store.begin_grading(submission_id, pretested).await {
            Ok(true) => {
                info!(judge = %self.name, submission_id, pretested, "Grading started");
                self.events
                    .post(GenericEvent::submission("grading-begin", submission_id));
            }
            Ok(false) => {
                warn!(judge = %self.name, submission_id, "Submission vanished before grading-begin");
            }
            Err(e) => {
                error!(judge = %self.name, submission_id, error = %e, "Store update failed");
            }
        }
    }

    async fn on_batch_begin(&self, submission_id: i64) {
        if !self.is_assigned(submission_id) {
            warn!(judge = %self.name, submission_id, "batch-begin for an unassigned submission");
            return;
        }
        let first_batch = {
            let mut guarded = self.guarded.lock().unwrap();
            match &mut guarded.state {
                SessionState::Busy {
                    in_batch, batch_no, ..
                } => {
                    *in_batch = true;
                    *batch_no += 1;
                    *batch_no == 1
                }
                _ => false,
            }
        };
        if first_batch
            && let Err(e) = self.store.mark_batch(submission_id).await
        {
            error!(judge = %self.name, submission_id, error = %e, "Store update failed");
        }
    }

    fn on_batch_end(&self, submission_id: i64) {
        let mut guarded = self.guarded.lock().unwrap();
        if let SessionState::Busy {
            submission,
            in_batch,
            ..
        } = &mut guarded.state
            && *submission == submission_id
        {
            *in_batch = false;
        }
    }

    async fn on_test_cases(&self, submission_id: i64, cases: Vec<TestCase>) {
        if cases.is_empty() {
            return;
        }
        let batch = {
            let guarded = self.guarded.lock().unwrap();
            match guarded.state {
                SessionState::Busy {
                    submission,
                    in_batch,
                    batch_no,
                } if submission == submission_id => in_batch.then_some(batch_no),
                _ => {
                    warn!(
                        judge = %self.name,
                        submission_id,
                        "test-case-status for an unassigned submission"
                    );
                    return;
                }
            }
        };

        let current_testcase = cases.iter().map(|c| c.position).max().unwrap_or(0) + 1;
        let rows: Vec<CaseRow> = cases
            .into_iter()
            .map(|case| CaseRow {
                position: case.position,
                verdict: Verdict::from_status_bits(case.status),
                time: case.time,
                memory: case.memory,
                points: case.points,
                total: case.total_points,
                batch,
                feedback: case.feedback,
                extended_feedback: case.extended_feedback,
                output: case.output,
            })
            .collect();

        match self
            .store
            .insert_cases(submission_id, &rows, current_testcase)
            .await
        {
            Ok(true) => {
                if self.limiter.allow(submission_id) {
                    self.events.post(
                        GenericEvent::submission("test-case", submission_id)
                            .with("position", current_testcase - 1),
                    );
                }
            }
            Ok(false) => {
                warn!(judge = %self.name, submission_id, "Submission vanished mid-grade");
            }
            Err(e) => {
                error!(judge = %self.name, submission_id, error = %e, "Store update failed");
            }
        }
    }

    async fn on_compile_message(&self, submission_id: i64, log: &str) {
        if !self.is_assigned(submission_id) {
            warn!(judge = %self.name, submission_id, "compile-message for an unassigned submission");
            return;
        }
        match self.store.set_error_text(submission_id, log).await {
            Ok(true) => {
                self.events
                    .post(GenericEvent::submission("compile-message", submission_id));
            }
            Ok(false) => {
                warn!(judge = %self.name, submission_id, "Submission vanished before compile-message");
            }
            Err(e) => {
                error!(judge = %self.name, submission_id, error = %e, "Store update failed");
            }
        }
    }

    async fn on_compile_error(&self, submission_id: i64, log: &str) {
        let Some(()) = self.finish_assignment(submission_id, "compile-error") else {
            return;
        };
        match self.store.set_compile_error(submission_id, log).await {
            Ok(true) => {
                info!(judge = %self.name, submission_id, "Compilation failed");
                self.events.post(
                    GenericEvent::submission("compile-error", submission_id).with("log", log),
                );
            }
            Ok(false) => {
                warn!(judge = %self.name, submission_id, "Submission already finalized");
            }
            Err(e) => {
                error!(judge = %self.name, submission_id, error = %e, "Store update failed");
            }
        }
    }

    async fn on_internal_error(&self, submission_id: i64, message: &str) {
        let Some(()) = self.finish_assignment(submission_id, "internal-error") else {
            return;
        };
        error!(judge = %self.name, submission_id, message, "Judge reported an internal error");
        self.mark_internal_error(submission_id, message).await;
    }

    async fn on_terminated(&self, submission_id: i64) {
        let Some(()) = self.finish_assignment(submission_id, "submission-terminated") else {
            return;
        };
        match self.store.set_aborted(submission_id).await {
            Ok(true) => {
                info!(judge = %self.name, submission_id, "Submission aborted");
                self.events
                    .post(GenericEvent::submission("aborted-submission", submission_id));
            }
            Ok(false) => {
                warn!(judge = %self.name, submission_id, "Submission already finalized");
            }
            Err(e) => {
                error!(judge = %self.name, submission_id, error = %e, "Store update failed");
            }
        }
    }

    async fn on_grading_end(&self, submission_id: i64) {
        let Some(()) = self.finish_assignment(submission_id, "grading-end") else {
            return;
        };

        let rows = match self.store.case_rows(submission_id).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(judge = %self.name, submission_id, error = %e, "Failed to load case rows");
                return;
            }
        };
        let record = match self.store.get(submission_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(judge = %self.name, submission_id, "Submission vanished before grading-end");
                return;
            }
            Err(e) => {
                error!(judge = %self.name, submission_id, error = %e, "Store read failed");
                return;
            }
        };

        let cases: Vec<_> = rows.iter().map(CaseRow::as_case_result).collect();
        let summary = projection::fold(&cases);
        let points = projection::award_points(
            summary.case_points,
            summary.case_total,
            record.max_points,
            record.partial,
        );

        match self.store.finalize(submission_id, &summary, points).await {
            Ok(true) => {
                info!(
                    judge = %self.name,
                    submission_id,
                    result = %summary.verdict,
                    points,
                    time = summary.time,
                    "Grading completed"
                );
                self.events.post(
                    GenericEvent::submission("grading-end", submission_id)
                        .with("result", summary.verdict.as_str())
                        .with("points", points)
                        .with("total", record.max_points)
                        .with("time", summary.time)
                        .with("memory", summary.memory),
                );
            }
            Ok(false) => {
                warn!(judge = %self.name, submission_id, "Submission already finalized");
            }
            Err(e) => {
                error!(judge = %self.name, submission_id, error = %e, "Store update failed");
            }
        }
    }

    /// Handle a terminal packet's session bookkeeping: Busy -> Idle, free
    /// the registry assignment, drop the rate-limit bucket. Returns None
    /// if the packet does not belong to this session's assignment.
    fn finish_assignment(&self, submission_id: i64, packet: &str) -> Option<()> {
        let freed = {
            let mut guarded = self.guarded.lock().unwrap();
            match guarded.state {
                SessionState::Busy { submission, .. } if submission == submission_id => {
                    guarded.state = SessionState::Idle;
                    true
                }
                _ => false,
            }
        };
        if !freed {
            warn!(
                judge = %self.name,
                submission_id,
                packet,
                "Terminal packet for an unassigned submission, ignoring"
            );
            return None;
        }
        self.limiter.forget(submission_id);
        self.registry.on_judge_free(&self.name, submission_id);
        Some(())
    }

    async fn on_supported_problems(&self, codes: Vec<String>) {
        let count = codes.len();
        {
            let mut problems = self.problems.lock().unwrap();
            *problems = codes.iter().cloned().collect();
        }
        if let Err(e) = self.store.reflect_judge_problems(&self.name, &codes).await {
            error!(judge = %self.name, error = %e, "Failed to reflect problem list");
        }
        if self.is_idle() {
            self.registry.update_problems(&self.name);
        }
        info!(judge = %self.name, problems = count, "Problem list updated");
    }

    async fn on_ping_response(&self, when: f64, time: f64, load: f64) {
        let now = unix_now();
        let rtt = (now - when).max(0.0);
        let offset = time - (when + rtt / 2.0);
        let smoothed = {
            let mut stats = self.stats.lock().unwrap();
            stats.record(rtt, offset, load);
            stats.smoothed_rtt().unwrap_or(rtt)
        };
        if let Err(e) = self.store.reflect_judge_ping(&self.name, smoothed, load).await {
            error!(judge = %self.name, error = %e, "Failed to reflect ping");
        }
    }

    /// Disconnect path, from any state. Runs exactly once.
    async fn teardown(self: &Arc<Self>) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.registry.remove(self);

        let orphaned = {
            let mut guarded = self.guarded.lock().unwrap();
            let orphaned = match guarded.state {
                SessionState::AwaitingAck { submission, .. }
                | SessionState::Busy { submission, .. } => Some(submission),
                SessionState::Closed { orphaned } => orphaned,
                SessionState::Idle => None,
            };
            guarded.state = SessionState::Closed { orphaned: None };
            orphaned
        };

        if let Some(submission_id) = orphaned {
            warn!(
                judge = %self.name,
                submission_id,
                "Judge disconnected mid-grade, marking submission IE"
            );
            self.limiter.forget(submission_id);
            self.registry.on_judge_free(&self.name, submission_id);
            self.mark_internal_error(submission_id, "judge disconnected during grading")
                .await;
        }

        // A displaced session must not clobber its replacement's
        // reflection: only reflect offline while no session owns the name.
        if self.registry.get(&self.name).is_none()
            && let Err(e) = self.store.reflect_judge_offline(&self.name).await
        {
            error!(judge = %self.name, error = %e, "Failed to reflect offline status");
        }
        self.writer.lock().await.shutdown().await;
        info!(judge = %self.name, "Session closed");
    }
}

/// Entry point for an accepted judge connection: authenticate, register,
/// reply, then run the session loops.
pub async fn handle_judge_connection(ctx: Arc<SessionContext>, socket: TcpStream, conn_id: Uuid) {
    let (read_half, write_half) = socket.into_split();
    let mut reader = FrameReader::new(read_half, ctx.protocol.max_frame_bytes);
    let writer = FrameWriter::new(write_half);

    let handshake = tokio::time::timeout(
        ctx.protocol.ack_timeout(),
        reader.read_packet::<JudgePacket>(),
    )
    .await;
    let (id, key, problems, executors) = match handshake {
        Ok(Ok(JudgePacket::Handshake {
            id,
            key,
            problems,
            executors,
        })) => (id, key, problems, executors),
        Ok(Ok(_)) => {
            warn!(%conn_id, "First packet was not a handshake, closing");
            return;
        }
        Ok(Err(e)) => {
            warn!(%conn_id, error = %e, "Failed to read handshake, closing");
            return;
        }
        Err(_) => {
            warn!(%conn_id, "Handshake timed out, closing");
            return;
        }
    };

    // Authentication failures close the transport without a reply; the
    // audit trail lives in the server log only.
    let Some(expected) = ctx.secrets.get(&id) else {
        warn!(%conn_id, judge = %id, "Rejected handshake from unknown judge");
        return;
    };
    if !keys_match(&key, expected) {
        warn!(
            %conn_id,
            judge = %id,
            key_fingerprint = %key_fingerprint(&key),
            "Rejected handshake with invalid key"
        );
        return;
    }

    // A reconnecting judge displaces its old session before registering.
    if let Some(old) = ctx.registry.get(&id) {
        warn!(judge = %id, "Judge reconnected, displacing the previous session");
        old.close();
        ctx.registry.remove(&old);
    }

    let problem_codes: Vec<String> = problems.into_iter().map(|p| p.0).collect();
    let languages: Vec<String> = executors.keys().cloned().collect();

    let session = Arc::new(JudgeSession {
        name: id.clone(),
        store: Arc::clone(&ctx.store),
        events: Arc::clone(&ctx.events),
        registry: Arc::clone(&ctx.registry),
        limiter: Arc::clone(&ctx.limiter),
        protocol: ctx.protocol.clone(),
        cancel: CancellationToken::new(),
        writer: Mutex::new(writer),
        guarded: StdMutex::new(Guarded {
            state: SessionState::Idle,
            ack_generation: 0,
        }),
        stats: StdMutex::new(PingStats::default()),
        problems: StdMutex::new(problem_codes.iter().cloned().collect()),
        executors: languages.iter().cloned().collect(),
        torn_down: AtomicBool::new(false),
    });

    if let Err(e) = ctx.registry.register(Arc::clone(&session)) {
        error!(judge = %id, error = %e, "Registration failed, closing");
        return;
    }

    if let Err(e) = ctx
        .store
        .reflect_judge_online(&id, &problem_codes, &languages)
        .await
    {
        error!(judge = %id, error = %e, "Failed to reflect online status, closing");
        ctx.registry.remove(&session);
        return;
    }

    if session.send_packet(&BridgePacket::HandshakeSuccess).await.is_err() {
        warn!(judge = %id, "Failed to send handshake reply, closing");
        ctx.registry.remove(&session);
        let _ = ctx.store.reflect_judge_offline(&id).await;
        return;
    }

    info!(
        %conn_id,
        judge = %id,
        problems = problem_codes.len(),
        executors = languages.len(),
        "Judge authenticated"
    );

    session.spawn_ping_loop();
    session.run(reader).await;
}

/// Build the wire request for a submission record.
pub fn submission_request(record: &crate::store::SubmissionRecord) -> BridgePacket {
    BridgePacket::SubmissionRequest {
        submission_id: record.id,
        problem_id: record.problem.clone(),
        language: record.language.clone(),
        source: record.source.clone(),
        time_limit: record.time_limit,
        memory_limit: record.memory_limit,
        short_circuit: record.short_circuit,
        meta: common::packet::RequestMeta {
            pretests_only: record.pretests_only,
            in_contest: record.in_contest,
            attempt_no: record.attempt_no,
        },
    }
}
