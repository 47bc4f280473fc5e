use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Verdict;

/// Status of a submission during the grading lifecycle.
///
/// Transitions are monotonic along Queued -> Processing -> Grading ->
/// Completed, with InternalError / CompileError / Aborted reachable at any
/// point after Queued. A status in [`SubmissionStatus::TERMINAL`] ends the
/// current grading attempt; only a fresh queue transition (rejudge) may
/// follow it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SubmissionStatus {
    /// Waiting for a capable judge.
    Queued,
    /// Accepted by a judge, not yet running test cases.
    Processing,
    /// Test cases are being executed.
    Grading,
    /// Grading finished and results were folded.
    Completed,
    /// The judge failed or disconnected mid-grade.
    InternalError,
    /// The submission failed to compile.
    CompileError,
    /// Grading was terminated on request.
    Aborted,
}

impl SubmissionStatus {
    /// Returns true if this status ends the current grading attempt.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued | Self::Processing | Self::Grading)
    }

    /// All possible status values.
    pub const ALL: &'static [SubmissionStatus] = &[
        Self::Queued,
        Self::Processing,
        Self::Grading,
        Self::Completed,
        Self::InternalError,
        Self::CompileError,
        Self::Aborted,
    ];

    /// Statuses that end the current grading attempt.
    pub const TERMINAL: &'static [SubmissionStatus] = &[
        Self::Completed,
        Self::InternalError,
        Self::CompileError,
        Self::Aborted,
    ];

    /// Returns the string representation (PascalCase).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Processing => "Processing",
            Self::Grading => "Grading",
            Self::Completed => "Completed",
            Self::InternalError => "InternalError",
            Self::CompileError => "CompileError",
            Self::Aborted => "Aborted",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for SubmissionStatus {
    fn default() -> Self {
        Self::Queued
    }
}

/// Error when parsing an invalid status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError {
    invalid: String,
}

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid status '{}'. Valid values: {}",
            self.invalid,
            SubmissionStatus::ALL
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for SubmissionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Queued" => Ok(Self::Queued),
            "Processing" => Ok(Self::Processing),
            "Grading" => Ok(Self::Grading),
            "Completed" => Ok(Self::Completed),
            "InternalError" => Ok(Self::InternalError),
            "CompileError" => Ok(Self::CompileError),
            "Aborted" => Ok(Self::Aborted),
            _ => Err(ParseStatusError {
                invalid: s.to_string(),
            }),
        }
    }
}

/// Final result code stored on a submission: a graded verdict, or a mirror
/// of the terminal status for attempts that never produced one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum SubmissionResult {
    Verdict(Verdict),
    CompileError,
    InternalError,
    Aborted,
}

impl SubmissionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verdict(verdict) => verdict.as_str(),
            Self::CompileError => "CE",
            Self::InternalError => "IE",
            Self::Aborted => "AB",
        }
    }
}

impl fmt::Display for SubmissionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Verdict> for SubmissionResult {
    fn from(verdict: Verdict) -> Self {
        Self::Verdict(verdict)
    }
}

impl From<SubmissionResult> for String {
    fn from(result: SubmissionResult) -> Self {
        result.as_str().to_string()
    }
}

impl FromStr for SubmissionResult {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CE" => Ok(Self::CompileError),
            "IE" => Ok(Self::InternalError),
            "AB" => Ok(Self::Aborted),
            other => other
                .parse::<Verdict>()
                .map(Self::Verdict)
                .map_err(|_| ParseStatusError {
                    invalid: s.to_string(),
                }),
        }
    }
}

impl TryFrom<String> for SubmissionResult {
    type Error = ParseStatusError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
