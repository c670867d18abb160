use std::path::PathBuf;
use std::time::SystemTime;

use serde::Serialize;

/// Benchmark type labels run when none are given on the command line.
pub const DEFAULT_BENCH_TYPES: &[&str] = &[
    "sequential",
    "random",
    "delete",
    "lookup",
    "sequentialstring",
    "randomstring",
    "deletestring",
    "lookupstring",
];

/// Program names benchmarked when the config does not override them.
pub const DEFAULT_PROGRAMS: &[&str] = &[
    "glib_hash_table",
    "stl_unordered_map",
    "boost_unordered_map",
    "google_sparse_hash_map",
    "google_dense_hash_map",
    "qt_qhash",
    "python_dict",
    "ruby_hash",
    "robin_hood",
    "stl_map",
    "custom",
    "sparsepp",
];

/// Ordered list of candidate program names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    names: Vec<String>,
}

impl Registry {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAMS.iter().copied())
    }
}

/// One (benchmark type, key count, program) row of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkUnit {
    pub bench_type: String,
    pub key_count: u64,
    pub program: String,
}

/// A usable reading from one attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub runtime_secs: f64,
    pub resident_bytes: u64,
}

/// Why an attempt produced no usable reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The deadline passed before the program reported.
    TimedOut,
    /// The program closed its output without writing a line.
    NoOutput,
    /// The first line was not a non-negative number of seconds.
    Unparsable(String),
    /// The process table had no resident size for the program.
    NoMemoryReading,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success(Measurement),
    Failure(FailureKind),
}

/// The fastest successful attempt for a unit, if any.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BestResult {
    Best(Measurement),
    AllFailed,
}

/// Whether a registered program should be (re)benchmarked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    MissingBinary,
    Unbenchmarked,
    Stale,
    UpToDate,
}

impl CandidateStatus {
    pub fn is_eligible(self) -> bool {
        matches!(self, CandidateStatus::Unbenchmarked | CandidateStatus::Stale)
    }

    pub fn label(self) -> &'static str {
        match self {
            CandidateStatus::MissingBinary => "missing",
            CandidateStatus::Unbenchmarked => "new",
            CandidateStatus::Stale => "stale",
            CandidateStatus::UpToDate => "up to date",
        }
    }
}

/// Stat-only view of a registered program and its result log.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub program: String,
    pub binary_path: PathBuf,
    pub log_path: PathBuf,
    pub binary_mtime: Option<SystemTime>,
    pub log_mtime: Option<SystemTime>,
    pub status: CandidateStatus,
}

/// Path of a program's result log inside the build directory.
pub fn log_path_for(build_dir: &std::path::Path, program: &str) -> PathBuf {
    build_dir.join(format!("{program}.csv"))
}
