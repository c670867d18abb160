use std::fmt;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Result;
use owo_colors::{OwoColorize, Stream};

use crate::errors::HarnessError;
use crate::types::{BenchmarkUnit, BestResult, Measurement, log_path_for};

/// One persisted line of a program's result log:
/// `bench_type,key_count,program,resident_bytes,runtime` with the runtime
/// printed to 6 decimal places.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub bench_type: String,
    pub key_count: u64,
    pub program: String,
    pub resident_bytes: u64,
    pub runtime_secs: f64,
}

impl ResultRecord {
    pub fn new(unit: &BenchmarkUnit, measurement: Measurement) -> Self {
        Self {
            bench_type: unit.bench_type.clone(),
            key_count: unit.key_count,
            program: unit.program.clone(),
            resident_bytes: measurement.resident_bytes,
            runtime_secs: measurement.runtime_secs,
        }
    }
}

impl fmt::Display for ResultRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{:.6}",
            self.bench_type, self.key_count, self.program, self.resident_bytes, self.runtime_secs
        )
    }
}

impl FromStr for ResultRecord {
    type Err = HarnessError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let malformed = |detail: &str| HarnessError::MalformedRecord {
            line: line.to_string(),
            detail: detail.to_string(),
        };

        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(',').collect();
        let [bench_type, key_count, program, resident_bytes, runtime] = fields[..] else {
            return Err(malformed("expected 5 comma-separated fields"));
        };

        let key_count = key_count
            .parse()
            .map_err(|_| malformed("key count is not an unsigned integer"))?;
        let resident_bytes = resident_bytes
            .parse()
            .map_err(|_| malformed("resident bytes is not an unsigned integer"))?;

        match runtime.split_once('.') {
            Some((whole, frac))
                if !whole.is_empty()
                    && whole.bytes().all(|b| b.is_ascii_digit())
                    && frac.len() == 6
                    && frac.bytes().all(|b| b.is_ascii_digit()) => {}
            _ => return Err(malformed("runtime must have exactly 6 fractional digits")),
        }
        let runtime_secs = runtime
            .parse()
            .map_err(|_| malformed("runtime is not a number"))?;

        Ok(Self {
            bench_type: bench_type.to_string(),
            key_count,
            program: program.to_string(),
            resident_bytes,
            runtime_secs,
        })
    }
}

/// Console line for a unit where every attempt failed.
pub fn format_failure_line(unit: &BenchmarkUnit) -> String {
    format!("{},{},{},FAILED", unit.bench_type, unit.key_count, unit.program)
}

/// Parse every record of a result log. A missing log has no records.
pub fn read_log(path: &Path) -> Result<Vec<ResultRecord>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(source) => {
            return Err(HarnessError::ReadLog {
                path: path.to_path_buf(),
                source,
            }
            .into());
        }
    };

    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| HarnessError::ReadLog {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(line.parse()?);
    }
    Ok(records)
}

/// Writes outcomes to the console and appends successes to
/// `{build_dir}/<program>.csv`.
pub struct ResultRecorder<W> {
    build_dir: PathBuf,
    console: W,
}

impl<W: Write> ResultRecorder<W> {
    pub fn new(build_dir: impl Into<PathBuf>, console: W) -> Self {
        Self {
            build_dir: build_dir.into(),
            console,
        }
    }

    /// Print and persist the unit's outcome. Failures reach the console only.
    pub fn record(&mut self, unit: &BenchmarkUnit, best: &BestResult) -> Result<()> {
        match best {
            BestResult::Best(measurement) => {
                let record = ResultRecord::new(unit, *measurement);
                let line = record.to_string();
                // Only lines that reached the log are echoed.
                self.append(&unit.program, &line)?;
                writeln!(self.console, "{}", line)?;
                self.console.flush()?;
            }
            BestResult::AllFailed => {
                let line = format_failure_line(unit);
                writeln!(
                    self.console,
                    "{}",
                    line.if_supports_color(Stream::Stdout, |s| s.red())
                )?;
                self.console.flush()?;
            }
        }
        Ok(())
    }

    fn append(&self, program: &str, line: &str) -> Result<()> {
        let path = log_path_for(&self.build_dir, program);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| HarnessError::AppendLog {
                path: path.clone(),
                source,
            })?;
        // One write per line so each record lands whole.
        file.write_all(format!("{line}\n").as_bytes())
            .map_err(|source| HarnessError::AppendLog { path, source })?;
        Ok(())
    }

    pub fn into_console(self) -> W {
        self.console
    }
}
