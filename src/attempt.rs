//! Running one benchmark program once under a deadline.
//!
//! The program is expected to print a single line with its elapsed seconds
//! once its data structure is populated and then keep running until it is
//! killed. The harness waits for that line (racing it against the timeout),
//! samples the program's resident memory while it is still alive, and then
//! kills and reaps it unconditionally. On unix the program runs in its own
//! process group and the whole group is killed, so helpers it forked cannot
//! outlive the attempt.

use std::io::{BufRead, BufReader};
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use crate::errors::HarnessError;
use crate::probe::MemoryProbe;
use crate::types::{AttemptOutcome, BenchmarkUnit, FailureKind, Measurement};

/// Something that can execute a unit once.
pub trait Attempt {
    fn attempt(&mut self, unit: &BenchmarkUnit) -> Result<AttemptOutcome>;
}

/// Runs `{build_dir}/<program> <key_count> <bench_type>` as a child process.
pub struct ProcessRunner<P> {
    build_dir: PathBuf,
    timeout: Option<Duration>,
    probe: P,
}

impl<P: MemoryProbe> ProcessRunner<P> {
    /// `timeout: None` waits for the report line indefinitely.
    pub fn new(build_dir: impl Into<PathBuf>, timeout: Option<Duration>, probe: P) -> Self {
        Self {
            build_dir: build_dir.into(),
            timeout,
            probe,
        }
    }
}

/// What came back from the first-line read.
enum Report {
    Line(String),
    Closed,
    TimedOut,
}

impl<P: MemoryProbe> Attempt for ProcessRunner<P> {
    fn attempt(&mut self, unit: &BenchmarkUnit) -> Result<AttemptOutcome> {
        let program = self.build_dir.join(&unit.program);

        let mut command = Command::new(&program);
        command
            .arg(unit.key_count.to_string())
            .arg(&unit.bench_type)
            .stdin(Stdio::null())
            .stdout(Stdio::piped());
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|source| HarnessError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout = match child.stdout.take() {
            Some(s) => s,
            None => {
                terminate(&mut child, &program)?;
                return Ok(AttemptOutcome::Failure(FailureKind::NoOutput));
            }
        };

        let (report, reader) = first_line_within(stdout, self.timeout, || {
            kill_quietly(&mut child, &program)
        });

        // Sampled before the final kill so the program is still resident.
        let resident = self.probe.resident_bytes(child.id());

        terminate(&mut child, &program)?;

        // The reader holds the pipe open until here so later writes from the
        // program cannot hit a closed pipe before memory is sampled. If the
        // stream is still held by a grandchild the thread is left to finish
        // on its own.
        if reader.is_finished() {
            let _ = reader.join();
        } else {
            warn!(program = %program.display(), "output reader still blocked after kill, detaching");
        }

        let outcome = classify(report, resident);
        debug!(
            program = %unit.program,
            bench_type = %unit.bench_type,
            keys = unit.key_count,
            ?outcome,
            "attempt finished"
        );
        Ok(outcome)
    }
}

/// Read one line from `stdout` on a helper thread, racing it against `timeout`.
///
/// `on_deadline` runs at most once, only when the deadline passes first; it
/// must end the stream (normally by killing the child). A fast reply returns
/// as soon as the line arrives. The returned handle owns the reader.
fn first_line_within<F>(
    stdout: ChildStdout,
    timeout: Option<Duration>,
    on_deadline: F,
) -> (Report, JoinHandle<BufReader<ChildStdout>>)
where
    F: FnOnce(),
{
    let (tx, rx) = mpsc::channel();
    let reader = thread::spawn(move || {
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        let report = match reader.read_line(&mut line) {
            Ok(0) | Err(_) => Report::Closed,
            Ok(_) => Report::Line(line),
        };
        let _ = tx.send(report);
        reader
    });

    let report = match timeout {
        Some(limit) => match rx.recv_timeout(limit) {
            Ok(report) => report,
            Err(RecvTimeoutError::Timeout) => {
                on_deadline();
                Report::TimedOut
            }
            Err(RecvTimeoutError::Disconnected) => Report::Closed,
        },
        None => rx.recv().unwrap_or(Report::Closed),
    };

    (report, reader)
}

fn classify(report: Report, resident: Option<u64>) -> AttemptOutcome {
    let runtime_secs = match report {
        Report::TimedOut => return AttemptOutcome::Failure(FailureKind::TimedOut),
        Report::Closed => return AttemptOutcome::Failure(FailureKind::NoOutput),
        Report::Line(line) => match parse_runtime(&line) {
            Some(secs) => secs,
            None => {
                return AttemptOutcome::Failure(FailureKind::Unparsable(line.trim().to_string()));
            }
        },
    };

    match resident {
        Some(bytes) if bytes > 0 => AttemptOutcome::Success(Measurement {
            runtime_secs,
            resident_bytes: bytes,
        }),
        _ => AttemptOutcome::Failure(FailureKind::NoMemoryReading),
    }
}

/// Elapsed seconds as reported by a benchmark program.
pub fn parse_runtime(line: &str) -> Option<f64> {
    let secs: f64 = line.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then_some(secs)
}

/// Kill without reaping; errors mean the child is already gone.
///
/// Must not be called after the child is reaped: its pid doubles as the
/// process group id and is only reserved until then.
fn kill_quietly(child: &mut Child, program: &Path) {
    #[cfg(unix)]
    kill_group(child.id(), program);
    if let Err(err) = child.kill() {
        debug!(program = %program.display(), error = %err, "kill failed, child already exited");
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32, program: &Path) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    let ret = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if ret == -1 {
        debug!(
            program = %program.display(),
            error = %std::io::Error::last_os_error(),
            "group kill failed, group already gone"
        );
    }
}

/// Kill and reap. Safe to call after `kill_quietly`.
fn terminate(child: &mut Child, program: &Path) -> Result<()> {
    kill_quietly(child, program);
    child.wait().map_err(|source| HarnessError::Reap {
        program: program.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(Option<u64>);

    impl MemoryProbe for FixedProbe {
        fn resident_bytes(&self, _pid: u32) -> Option<u64> {
            self.0
        }
    }

    #[test]
    fn parse_runtime_accepts_decimal_seconds() {
        assert_eq!(parse_runtime("0.001234\n"), Some(0.001234));
        assert_eq!(parse_runtime("  2.5  "), Some(2.5));
        assert_eq!(parse_runtime("0"), Some(0.0));
    }

    #[test]
    fn parse_runtime_rejects_garbage() {
        assert_eq!(parse_runtime(""), None);
        assert_eq!(parse_runtime("ready"), None);
        assert_eq!(parse_runtime("-1.0"), None);
        assert_eq!(parse_runtime("NaN"), None);
        assert_eq!(parse_runtime("inf"), None);
    }

    #[test]
    fn classify_requires_memory_reading() {
        let outcome = classify(Report::Line("0.5\n".into()), None);
        assert_eq!(outcome, AttemptOutcome::Failure(FailureKind::NoMemoryReading));

        let outcome = classify(Report::Line("0.5\n".into()), Some(0));
        assert_eq!(outcome, AttemptOutcome::Failure(FailureKind::NoMemoryReading));
    }

    #[test]
    fn classify_success() {
        let outcome = classify(Report::Line("0.5\n".into()), Some(4096));
        assert_eq!(
            outcome,
            AttemptOutcome::Success(Measurement {
                runtime_secs: 0.5,
                resident_bytes: 4096,
            })
        );
    }

    #[test]
    fn classify_timeout_ignores_memory() {
        let outcome = classify(Report::TimedOut, Some(4096));
        assert_eq!(outcome, AttemptOutcome::Failure(FailureKind::TimedOut));
    }

    #[test]
    fn classify_unparsable_line() {
        let outcome = classify(Report::Line("oops\n".into()), Some(4096));
        assert_eq!(
            outcome,
            AttemptOutcome::Failure(FailureKind::Unparsable("oops".into()))
        );
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::time::Instant;

        fn write_program(dir: &Path, name: &str, body: &str) {
            let path = dir.join(name);
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }

        fn unit(program: &str) -> BenchmarkUnit {
            BenchmarkUnit {
                bench_type: "sequential".into(),
                key_count: 128,
                program: program.into(),
            }
        }

        #[test]
        fn reporting_program_succeeds_and_is_killed() {
            let tmp = tempfile::tempdir().unwrap();
            write_program(tmp.path(), "custom", "echo 0.001234\nexec sleep 30");

            let mut runner =
                ProcessRunner::new(tmp.path(), Some(Duration::from_secs(5)), FixedProbe(Some(2048)));
            let start = Instant::now();
            let outcome = runner.attempt(&unit("custom")).unwrap();

            assert_eq!(
                outcome,
                AttemptOutcome::Success(Measurement {
                    runtime_secs: 0.001234,
                    resident_bytes: 2048,
                })
            );
            // Killed rather than waited out.
            assert!(start.elapsed() < Duration::from_secs(10));
        }

        #[test]
        fn program_receives_key_count_and_type() {
            let tmp = tempfile::tempdir().unwrap();
            write_program(
                tmp.path(),
                "custom",
                "if [ \"$1\" = 128 ] && [ \"$2\" = sequential ]; then echo 1.5; else echo bad; fi\nexec sleep 30",
            );

            let mut runner =
                ProcessRunner::new(tmp.path(), Some(Duration::from_secs(5)), FixedProbe(Some(1)));
            let outcome = runner.attempt(&unit("custom")).unwrap();
            assert!(matches!(outcome, AttemptOutcome::Success(m) if m.runtime_secs == 1.5));
        }

        #[test]
        fn hanging_program_times_out() {
            let tmp = tempfile::tempdir().unwrap();
            write_program(tmp.path(), "custom", "exec sleep 30");

            let mut runner = ProcessRunner::new(
                tmp.path(),
                Some(Duration::from_millis(300)),
                FixedProbe(Some(2048)),
            );
            let start = Instant::now();
            let outcome = runner.attempt(&unit("custom")).unwrap();

            assert_eq!(outcome, AttemptOutcome::Failure(FailureKind::TimedOut));
            assert!(start.elapsed() < Duration::from_secs(5));
        }

        #[test]
        fn crashing_program_fails() {
            let tmp = tempfile::tempdir().unwrap();
            write_program(tmp.path(), "custom", "exit 3");

            let mut runner =
                ProcessRunner::new(tmp.path(), Some(Duration::from_secs(5)), FixedProbe(Some(2048)));
            let outcome = runner.attempt(&unit("custom")).unwrap();
            assert_eq!(outcome, AttemptOutcome::Failure(FailureKind::NoOutput));
        }

        #[test]
        fn garbage_output_fails() {
            let tmp = tempfile::tempdir().unwrap();
            write_program(tmp.path(), "custom", "echo ready\nexec sleep 30");

            let mut runner =
                ProcessRunner::new(tmp.path(), Some(Duration::from_secs(5)), FixedProbe(Some(2048)));
            let outcome = runner.attempt(&unit("custom")).unwrap();
            assert_eq!(
                outcome,
                AttemptOutcome::Failure(FailureKind::Unparsable("ready".into()))
            );
        }

        #[test]
        fn no_timeout_waits_for_report() {
            let tmp = tempfile::tempdir().unwrap();
            write_program(tmp.path(), "custom", "sleep 0.2\necho 0.2\nexec sleep 30");

            let mut runner = ProcessRunner::new(tmp.path(), None, FixedProbe(Some(2048)));
            let outcome = runner.attempt(&unit("custom")).unwrap();
            assert!(matches!(outcome, AttemptOutcome::Success(_)));
        }

        #[test]
        fn missing_program_is_an_error() {
            let tmp = tempfile::tempdir().unwrap();
            let mut runner =
                ProcessRunner::new(tmp.path(), Some(Duration::from_secs(1)), FixedProbe(Some(1)));
            let err = runner.attempt(&unit("absent")).unwrap_err();
            assert!(err.to_string().contains("Failed to launch"));
        }

        /// True once `pid` no longer runs (exited or left as a zombie).
        #[cfg(target_os = "linux")]
        fn stopped(pid: i32) -> bool {
            match procfs::process::Process::new(pid).and_then(|p| p.stat()) {
                Ok(stat) => stat.state == 'Z',
                Err(_) => true,
            }
        }

        #[cfg(target_os = "linux")]
        #[test]
        fn timeout_kills_forked_helpers() {
            let tmp = tempfile::tempdir().unwrap();
            let pid_file = tmp.path().join("helper.pid");
            write_program(
                tmp.path(),
                "custom",
                &format!("sleep 7777 &\necho $! > '{}'\nwait", pid_file.display()),
            );

            let mut runner = ProcessRunner::new(
                tmp.path(),
                Some(Duration::from_millis(500)),
                FixedProbe(Some(2048)),
            );
            let outcome = runner.attempt(&unit("custom")).unwrap();
            assert_eq!(outcome, AttemptOutcome::Failure(FailureKind::TimedOut));

            let helper: i32 = fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
            let deadline = Instant::now() + Duration::from_secs(5);
            while !stopped(helper) && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(20));
            }
            assert!(stopped(helper), "helper process {helper} survived the attempt");
        }

        #[cfg(target_os = "linux")]
        #[test]
        fn real_probe_sees_live_program() {
            let tmp = tempfile::tempdir().unwrap();
            write_program(tmp.path(), "custom", "echo 0.1\nexec sleep 30");

            let mut runner = ProcessRunner::new(
                tmp.path(),
                Some(Duration::from_secs(5)),
                crate::probe::ProcfsProbe,
            );
            let outcome = runner.attempt(&unit("custom")).unwrap();
            match outcome {
                AttemptOutcome::Success(m) => assert!(m.resident_bytes > 0),
                other => panic!("expected success, got {other:?}"),
            }
        }
    }
}
