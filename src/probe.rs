//! Resident memory queries against the OS process table.

use std::process::{Command, Stdio};

use tracing::debug;

/// Looks up the resident set size of a live process.
///
/// `None` means the process table had no usable reading (the process already
/// exited, was reaped, or is a zombie).
pub trait MemoryProbe {
    fn resident_bytes(&self, pid: u32) -> Option<u64>;
}

/// Reads `VmRSS` from `/proc/<pid>/status`.
#[cfg(target_os = "linux")]
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcfsProbe;

#[cfg(target_os = "linux")]
impl MemoryProbe for ProcfsProbe {
    fn resident_bytes(&self, pid: u32) -> Option<u64> {
        let pid = i32::try_from(pid).ok()?;
        let status = match procfs::process::Process::new(pid).and_then(|p| p.status()) {
            Ok(status) => status,
            Err(err) => {
                debug!(pid, error = %err, "no procfs status for process");
                return None;
            }
        };
        status.vmrss.map(|kib| kib * 1024)
    }
}

/// Asks `ps` for the resident size in KiB.
#[derive(Debug, Default, Clone, Copy)]
pub struct PsProbe;

impl MemoryProbe for PsProbe {
    fn resident_bytes(&self, pid: u32) -> Option<u64> {
        let output = Command::new("ps")
            .args(["-o", "rss=", "-p", &pid.to_string()])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output();
        let output = match output {
            Ok(o) => o,
            Err(err) => {
                debug!(pid, error = %err, "failed to run ps");
                return None;
            }
        };
        if !output.status.success() {
            return None;
        }
        parse_ps_rss(&String::from_utf8_lossy(&output.stdout))
    }
}

fn parse_ps_rss(stdout: &str) -> Option<u64> {
    let kib: u64 = stdout.split_whitespace().next()?.parse().ok()?;
    Some(kib * 1024)
}

#[cfg(target_os = "linux")]
pub type DefaultProbe = ProcfsProbe;

#[cfg(not(target_os = "linux"))]
pub type DefaultProbe = PsProbe;
