use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Execution verdict for a single test case or a whole submission.
///
/// Variants are declared in severity order, so the derived `Ord` makes the
/// worst verdict across a case set a plain `max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Verdict {
    /// Accepted.
    AC,
    /// Wrong answer.
    WA,
    /// Memory limit exceeded.
    MLE,
    /// Time limit exceeded.
    TLE,
    /// Invalid return (bad exit status).
    IR,
    /// Runtime error.
    RTE,
    /// Output limit exceeded.
    OLE,
    /// Short-circuited: skipped after an earlier failure.
    SC,
}

/// Status bits reported by judges, checked in priority order.
/// The first set bit wins; a zero mask is Accepted.
const STATUS_BITS: &[(u32, Verdict)] = &[
    (1 << 2, Verdict::TLE),
    (1 << 3, Verdict::MLE),
    (1 << 6, Verdict::OLE),
    (1 << 1, Verdict::RTE),
    (1 << 4, Verdict::IR),
    (1 << 0, Verdict::WA),
    (1 << 5, Verdict::SC),
];

impl Verdict {
    /// All verdicts, from least to most severe.
    pub const ALL: &'static [Verdict] = &[
        Self::AC,
        Self::WA,
        Self::MLE,
        Self::TLE,
        Self::IR,
        Self::RTE,
        Self::OLE,
        Self::SC,
    ];

    /// Decode the packed status bitmask from a `test-case-status` packet.
    pub fn from_status_bits(bits: u32) -> Self {
        for (bit, verdict) in STATUS_BITS {
            if bits & bit != 0 {
                return *verdict;
            }
        }
        Self::AC
    }

    /// Returns the short verdict code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AC => "AC",
            Self::WA => "WA",
            Self::MLE => "MLE",
            Self::TLE => "TLE",
            Self::IR => "IR",
            Self::RTE => "RTE",
            Self::OLE => "OLE",
            Self::SC => "SC",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid verdict code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseVerdictError {
    invalid: String,
}

impl fmt::Display for ParseVerdictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid verdict code '{}'", self.invalid)
    }
}

impl std::error::Error for ParseVerdictError {}

impl FromStr for Verdict {
    type Err = ParseVerdictError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AC" => Ok(Self::AC),
            "WA" => Ok(Self::WA),
            "MLE" => Ok(Self::MLE),
            "TLE" => Ok(Self::TLE),
            "IR" => Ok(Self::IR),
            "RTE" => Ok(Self::RTE),
            "OLE" => Ok(Self::OLE),
            "SC" => Ok(Self::SC),
            _ => Err(ParseVerdictError {
                invalid: s.to_string(),
            }),
        }
    }
}
