//! Submission store interface.
//!
//! The bridge never holds an authoritative submission copy; every mutation
//! goes through this trait. Status-setting operations are conditional
//! updates: they report whether the guard matched, and a `false` return is
//! an expected race outcome (stale packet, concurrent finalization, admin
//! deletion), not an error. Multiple uncoordinated paths can try to
//! finalize the same submission; the guards make exactly one win.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use common::projection::{CaseResult, GradingSummary};
use common::{SubmissionResult, SubmissionStatus, Verdict};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Submission {0} not found")]
    NotFound(i64),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// A submission as the bridge sees it: the immutable dispatch view plus the
/// mutable grading fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: i64,
    /// Problem code the judge resolves test data by.
    pub problem: String,
    /// Language key from the judge's executor table.
    pub language: String,
    pub source: String,
    /// Time limit in seconds.
    pub time_limit: f64,
    /// Memory limit in kilobytes.
    pub memory_limit: i64,
    pub max_points: f64,
    pub partial: bool,
    pub short_circuit: bool,
    /// Contest configuration: grade the pretest subset instead of the full set.
    pub pretests_only: bool,
    pub in_contest: bool,
    pub attempt_no: u32,

    pub status: SubmissionStatus,
    pub result: Option<SubmissionResult>,
    /// Total time in seconds, set at finalization.
    pub time: Option<f64>,
    /// Peak memory in kilobytes, set at finalization.
    pub memory: Option<f64>,
    /// Awarded points, set at finalization.
    pub points: Option<f64>,
    /// Compiler or internal-error text.
    pub error: Option<String>,
    pub case_points: f64,
    pub case_total: f64,
    pub current_testcase: u32,
    pub is_batch: bool,
    pub is_pretested: bool,
}

impl SubmissionRecord {
    /// A freshly created submission with grading fields zeroed.
    pub fn new(id: i64, problem: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            id,
            problem: problem.into(),
            language: language.into(),
            source: String::new(),
            time_limit: 2.0,
            memory_limit: 262_144,
            max_points: 100.0,
            partial: true,
            short_circuit: false,
            pretests_only: false,
            in_contest: false,
            attempt_no: 1,
            status: SubmissionStatus::Queued,
            result: None,
            time: None,
            memory: None,
            points: None,
            error: None,
            case_points: 0.0,
            case_total: 0.0,
            current_testcase: 0,
            is_batch: false,
            is_pretested: false,
        }
    }
}

/// Per-test-case child row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRow {
    /// 1-based case position within the submission.
    pub position: u32,
    pub verdict: Verdict,
    pub time: f64,
    pub memory: f64,
    pub points: f64,
    pub total: f64,
    pub batch: Option<i32>,
    pub feedback: Option<String>,
    pub extended_feedback: Option<String>,
    pub output: Option<String>,
}

impl CaseRow {
    pub fn as_case_result(&self) -> CaseResult {
        CaseResult {
            batch: self.batch,
            points: self.points,
            total: self.total,
            time: self.time,
            memory: self.memory,
            verdict: self.verdict,
        }
    }
}

/// Thin reflection of a connected judge, for query/display only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JudgeReflection {
    pub online: bool,
    pub problems: Vec<String>,
    pub languages: Vec<String>,
    pub last_seen: Option<DateTime<Utc>>,
    /// Smoothed round-trip latency in seconds.
    pub ping: Option<f64>,
    pub load: Option<f64>,
}

/// CRUD + atomic conditional updates over submissions and their case rows.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<SubmissionRecord>, StoreError>;

    /// Queue a submission for dispatch, clearing prior results and case
    /// rows. Refused while an attempt is in flight (Processing/Grading).
    async fn queue(&self, id: i64) -> Result<bool, StoreError>;

    /// Bulk [`queue`]: returns the ids actually transitioned.
    async fn queue_many(&self, ids: &[i64]) -> Result<Vec<i64>, StoreError>;

    /// Queued -> Processing, on judge acknowledgement.
    async fn mark_processing(&self, id: i64) -> Result<bool, StoreError>;

    /// -> Grading: reset progress, record the pretest flag, drop prior
    /// case rows. Refused once terminal.
    async fn begin_grading(&self, id: i64, pretested: bool) -> Result<bool, StoreError>;

    /// Mark the submission as batch-scored (first `batch-begin`).
    async fn mark_batch(&self, id: i64) -> Result<bool, StoreError>;

    /// Append case rows and advance the progress counter. Refused once
    /// terminal.
    async fn insert_cases(
        &self,
        id: i64,
        rows: &[CaseRow],
        current_testcase: u32,
    ) -> Result<bool, StoreError>;

    /// Overwrite the compiler log without changing status.
    async fn set_error_text(&self, id: i64, log: &str) -> Result<bool, StoreError>;

    /// Terminal: CompileError with the compiler log.
    async fn set_compile_error(&self, id: i64, log: &str) -> Result<bool, StoreError>;

    /// Terminal: InternalError with a diagnostic message.
    async fn set_internal_error(&self, id: i64, message: &str) -> Result<bool, StoreError>;

    /// Terminal: Aborted.
    async fn set_aborted(&self, id: i64) -> Result<bool, StoreError>;

    /// Terminal: Completed, with folded aggregates and awarded points.
    /// Implementations also recompute dependent aggregates (user score,
    /// problem stats, contest score) when the guard matches.
    async fn finalize(
        &self,
        id: i64,
        summary: &GradingSummary,
        points: f64,
    ) -> Result<bool, StoreError>;

    async fn case_rows(&self, id: i64) -> Result<Vec<CaseRow>, StoreError>;

    async fn reflect_judge_online(
        &self,
        name: &str,
        problems: &[String],
        languages: &[String],
    ) -> Result<(), StoreError>;

    async fn reflect_judge_offline(&self, name: &str) -> Result<(), StoreError>;

    async fn reflect_judge_ping(&self, name: &str, ping: f64, load: f64)
    -> Result<(), StoreError>;

    async fn reflect_judge_problems(
        &self,
        name: &str,
        problems: &[String],
    ) -> Result<(), StoreError>;
}

#[derive(Default)]
struct MemoryInner {
    submissions: HashMap<i64, SubmissionRecord>,
    cases: HashMap<i64, Vec<CaseRow>>,
    judges: HashMap<String, JudgeReflection>,
    /// Submissions whose dependent aggregates were recomputed.
    recomputed: Vec<i64>,
}

/// In-process store backend, used by the standalone binary and the tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: SubmissionRecord) {
        let mut inner = self.inner.lock().unwrap();
        inner.cases.remove(&record.id);
        inner.submissions.insert(record.id, record);
    }

    pub fn snapshot(&self, id: i64) -> Option<SubmissionRecord> {
        self.inner.lock().unwrap().submissions.get(&id).cloned()
    }

    pub fn judge(&self, name: &str) -> Option<JudgeReflection> {
        self.inner.lock().unwrap().judges.get(name).cloned()
    }

    /// Ids passed to dependent recomputation, in finalization order.
    pub fn recomputed_ids(&self) -> Vec<i64> {
        self.inner.lock().unwrap().recomputed.clone()
    }

    /// Apply `mutate` if the record exists and `guard` holds.
    fn update_if<G, M>(&self, id: i64, guard: G, mutate: M) -> bool
    where
        G: FnOnce(&SubmissionRecord) -> bool,
        M: FnOnce(&mut SubmissionRecord, &mut Vec<CaseRow>),
    {
        let mut inner = self.inner.lock().unwrap();
        let inner = &mut *inner;
        let Some(record) = inner.submissions.get_mut(&id) else {
            return false;
        };
        if !guard(record) {
            return false;
        }
        let cases = inner.cases.entry(id).or_default();
        mutate(record, cases);
        true
    }
}

fn clear_results(record: &mut SubmissionRecord) {
    record.result = None;
    record.time = None;
    record.memory = None;
    record.points = None;
    record.error = None;
    record.case_points = 0.0;
    record.case_total = 0.0;
    record.current_testcase = 0;
    record.is_batch = false;
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn get(&self, id: i64) -> Result<Option<SubmissionRecord>, StoreError> {
        Ok(self.snapshot(id))
    }

    async fn queue(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.update_if(
            id,
            |r| {
                !matches!(
                    r.status,
                    SubmissionStatus::Processing | SubmissionStatus::Grading
                )
            },
            |r, cases| {
                r.status = SubmissionStatus::Queued;
                clear_results(r);
                cases.clear();
            },
        ))
    }

    async fn queue_many(&self, ids: &[i64]) -> Result<Vec<i64>, StoreError> {
        let mut queued = Vec::with_capacity(ids.len());
        for &id in ids {
            if self.queue(id).await? {
                queued.push(id);
            }
        }
        Ok(queued)
    }

    async fn mark_processing(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.update_if(
            id,
            |r| r.status == SubmissionStatus::Queued,
            |r, _| r.status = SubmissionStatus::Processing,
        ))
    }

    async fn begin_grading(&self, id: i64, pretested: bool) -> Result<bool, StoreError> {
        Ok(self.update_if(
            id,
            |r| !r.status.is_terminal(),
            |r, cases| {
                r.status = SubmissionStatus::Grading;
                r.is_pretested = pretested;
                r.current_testcase = 1;
                r.is_batch = false;
                cases.clear();
            },
        ))
    }

    async fn mark_batch(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.update_if(
            id,
            |r| !r.status.is_terminal(),
            |r, _| r.is_batch = true,
        ))
    }

    async fn insert_cases(
        &self,
        id: i64,
        rows: &[CaseRow],
        current_testcase: u32,
    ) -> Result<bool, StoreError> {
        Ok(self.update_if(
            id,
            |r| !r.status.is_terminal(),
            |r, cases| {
                r.current_testcase = current_testcase;
                cases.extend_from_slice(rows);
            },
        ))
    }

    async fn set_error_text(&self, id: i64, log: &str) -> Result<bool, StoreError> {
        let log = log.to_string();
        Ok(self.update_if(
            id,
            |r| !r.status.is_terminal(),
            move |r, _| r.error = Some(log),
        ))
    }

    async fn set_compile_error(&self, id: i64, log: &str) -> Result<bool, StoreError> {
        let log = log.to_string();
        Ok(self.update_if(
            id,
            |r| !r.status.is_terminal(),
            move |r, _| {
                r.status = SubmissionStatus::CompileError;
                r.result = Some(SubmissionResult::CompileError);
                r.error = Some(log);
            },
        ))
    }

    async fn set_internal_error(&self, id: i64, message: &str) -> Result<bool, StoreError> {
        let message = message.to_string();
        Ok(self.update_if(
            id,
            |r| !r.status.is_terminal(),
            move |r, _| {
                r.status = SubmissionStatus::InternalError;
                r.result = Some(SubmissionResult::InternalError);
                r.error = Some(message);
            },
        ))
    }

    async fn set_aborted(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.update_if(
            id,
            |r| !r.status.is_terminal(),
            |r, _| {
                r.status = SubmissionStatus::Aborted;
                r.result = Some(SubmissionResult::Aborted);
            },
        ))
    }

    async fn finalize(
        &self,
        id: i64,
        summary: &GradingSummary,
        points: f64,
    ) -> Result<bool, StoreError> {
        let matched = self.update_if(
            id,
            |r| !r.status.is_terminal(),
            |r, _| {
                r.status = SubmissionStatus::Completed;
                r.result = Some(SubmissionResult::Verdict(summary.verdict));
                r.time = Some(summary.time);
                r.memory = Some(summary.memory);
                r.case_points = summary.case_points;
                r.case_total = summary.case_total;
                r.points = Some(points);
            },
        );
        if matched {
            self.inner.lock().unwrap().recomputed.push(id);
        }
        Ok(matched)
    }

    async fn case_rows(&self, id: i64) -> Result<Vec<CaseRow>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .cases
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn reflect_judge_online(
        &self,
        name: &str,
        problems: &[String],
        languages: &[String],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.judges.insert(
            name.to_string(),
            JudgeReflection {
                online: true,
                problems: problems.to_vec(),
                languages: languages.to_vec(),
                last_seen: Some(Utc::now()),
                ping: None,
                load: None,
            },
        );
        Ok(())
    }

    async fn reflect_judge_offline(&self, name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(judge) = inner.judges.get_mut(name) {
            judge.online = false;
            judge.problems.clear();
            judge.languages.clear();
        }
        Ok(())
    }

    async fn reflect_judge_ping(
        &self,
        name: &str,
        ping: f64,
        load: f64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(judge) = inner.judges.get_mut(name) {
            judge.ping = Some(ping);
            judge.load = Some(load);
            judge.last_seen = Some(Utc::now());
        }
        Ok(())
    }

    async fn reflect_judge_problems(
        &self,
        name: &str,
        problems: &[String],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(judge) = inner.judges.get_mut(name) {
            judge.problems = problems.to_vec();
        }
        Ok(())
    }
}
