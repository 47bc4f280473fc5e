//! Wire packets, one closed union per direction.
//!
//! Every packet is a JSON object carrying its type in a `name` field.
//! Unknown names fail to decode and are handled by the receiver as
//! malformed frames (logged and skipped), never passed through untyped.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A problem a judge declares support for: `[code, data-mtime]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemEntry(pub String, pub f64);

/// One runtime available for an executor: `[name, version-tuple]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorVersion(pub String, pub Vec<u32>);

/// Per-case result row inside a `test-case-status` packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// 1-based case position.
    pub position: u32,
    /// Packed status bitmask, decoded via `Verdict::from_status_bits`.
    pub status: u32,
    #[serde(default)]
    pub time: f64,
    #[serde(default)]
    pub memory: f64,
    #[serde(default)]
    pub points: f64,
    #[serde(rename = "total-points", default)]
    pub total_points: f64,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(rename = "extended-feedback", default)]
    pub extended_feedback: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
}

/// Packets sent by a judge to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum JudgePacket {
    /// Authentication exchange. Must be the first packet on a connection.
    Handshake {
        id: String,
        key: String,
        problems: Vec<ProblemEntry>,
        executors: HashMap<String, Vec<ExecutorVersion>>,
    },
    SubmissionAcknowledged {
        #[serde(rename = "submission-id")]
        submission_id: i64,
    },
    GradingBegin {
        #[serde(rename = "submission-id")]
        submission_id: i64,
        pretested: bool,
    },
    GradingEnd {
        #[serde(rename = "submission-id")]
        submission_id: i64,
    },
    CompileError {
        #[serde(rename = "submission-id")]
        submission_id: i64,
        log: String,
    },
    CompileMessage {
        #[serde(rename = "submission-id")]
        submission_id: i64,
        log: String,
    },
    BatchBegin {
        #[serde(rename = "submission-id")]
        submission_id: i64,
    },
    BatchEnd {
        #[serde(rename = "submission-id")]
        submission_id: i64,
    },
    TestCaseStatus {
        #[serde(rename = "submission-id")]
        submission_id: i64,
        cases: Vec<TestCase>,
    },
    InternalError {
        #[serde(rename = "submission-id")]
        submission_id: i64,
        message: String,
    },
    SubmissionTerminated {
        #[serde(rename = "submission-id")]
        submission_id: i64,
    },
    /// Capability update after handshake.
    SupportedProblems { problems: Vec<ProblemEntry> },
    PingResponse { when: f64, time: f64, load: f64 },
}

impl JudgePacket {
    /// The submission this packet refers to, if any.
    pub fn submission_id(&self) -> Option<i64> {
        match self {
            Self::SubmissionAcknowledged { submission_id }
            | Self::GradingBegin { submission_id, .. }
            | Self::GradingEnd { submission_id }
            | Self::CompileError { submission_id, .. }
            | Self::CompileMessage { submission_id, .. }
            | Self::BatchBegin { submission_id }
            | Self::BatchEnd { submission_id }
            | Self::TestCaseStatus { submission_id, .. }
            | Self::InternalError { submission_id, .. }
            | Self::SubmissionTerminated { submission_id } => Some(*submission_id),
            Self::Handshake { .. } | Self::SupportedProblems { .. } | Self::PingResponse { .. } => {
                None
            }
        }
    }
}

/// Contextual metadata attached to a `submission-request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RequestMeta {
    #[serde(rename = "pretests-only")]
    pub pretests_only: bool,
    #[serde(rename = "in-contest")]
    pub in_contest: bool,
    #[serde(rename = "attempt-no")]
    pub attempt_no: u32,
}

/// Packets sent by the bridge to a judge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum BridgePacket {
    HandshakeSuccess,
    SubmissionRequest {
        #[serde(rename = "submission-id")]
        submission_id: i64,
        #[serde(rename = "problem-id")]
        problem_id: String,
        language: String,
        source: String,
        #[serde(rename = "time-limit")]
        time_limit: f64,
        #[serde(rename = "memory-limit")]
        memory_limit: i64,
        #[serde(rename = "short-circuit")]
        short_circuit: bool,
        meta: RequestMeta,
    },
    TerminateSubmission,
    Disconnect,
    Ping { when: f64 },
}

/// Control-plane requests from administrative callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum AdminRequest {
    DisconnectJudge {
        #[serde(rename = "judge-id")]
        judge_id: String,
        #[serde(default)]
        force: bool,
    },
    DisableJudge {
        #[serde(rename = "judge-id")]
        judge_id: String,
        #[serde(rename = "is-disabled")]
        is_disabled: bool,
    },
    SubmissionRequest {
        #[serde(rename = "submission-id")]
        submission_id: i64,
        #[serde(default)]
        rejudge: bool,
        #[serde(rename = "judge-id", default)]
        judge_id: Option<String>,
    },
    BatchSubmissionRequest {
        #[serde(rename = "submission-ids")]
        submission_ids: Vec<i64>,
        #[serde(default)]
        rejudge: bool,
        #[serde(rename = "judge-id", default)]
        judge_id: Option<String>,
    },
    TerminateSubmission {
        #[serde(rename = "submission-id")]
        submission_id: i64,
    },
}

/// Control-plane replies, mirroring the request that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum AdminReply {
    SubmissionReceived {
        #[serde(rename = "submission-id")]
        submission_id: i64,
    },
    BatchSubmissionReceived {
        #[serde(rename = "submission-ids")]
        submission_ids: Vec<i64>,
    },
    TerminateResult {
        #[serde(rename = "judge-aborted")]
        judge_aborted: bool,
    },
    JudgeDisconnected { ok: bool },
    JudgeDisabled { ok: bool },
    Error { message: String },
}
