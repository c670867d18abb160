use std::io::ErrorKind;
use std::path::Path;
use std::time::SystemTime;

use anyhow::Result;
use tracing::{debug, info};

use crate::errors::HarnessError;
use crate::types::{Candidate, CandidateStatus, Registry, log_path_for};

/// Classify every registered program against `{build_dir}/<name>` and
/// `{build_dir}/<name>.csv` without modifying anything.
///
/// A log whose mtime is equal to or newer than the binary counts as up to date.
/// Stat failures other than "not found" are errors.
pub fn inspect_candidates(build_dir: &Path, registry: &Registry) -> Result<Vec<Candidate>> {
    if !build_dir.is_dir() {
        return Err(HarnessError::BuildDirNotFound {
            path: build_dir.to_path_buf(),
        }
        .into());
    }

    let mut candidates = Vec::with_capacity(registry.names().len());

    for name in registry.names() {
        let binary_path = build_dir.join(name);
        let log_path = log_path_for(build_dir, name);

        let binary_mtime = file_mtime(&binary_path)?;
        let log_mtime = match binary_mtime {
            Some(_) => file_mtime(&log_path)?,
            None => None,
        };

        let status = match (binary_mtime, log_mtime) {
            (None, _) => CandidateStatus::MissingBinary,
            (Some(_), None) => CandidateStatus::Unbenchmarked,
            (Some(binary), Some(log)) if binary > log => CandidateStatus::Stale,
            (Some(_), Some(_)) => CandidateStatus::UpToDate,
        };

        candidates.push(Candidate {
            program: name.clone(),
            binary_path,
            log_path,
            binary_mtime,
            log_mtime,
            status,
        });
    }

    Ok(candidates)
}

/// Return the programs that should run this session, in registry order.
///
/// Stale logs are deleted so the rerun starts from an empty log.
pub fn select_programs(build_dir: &Path, registry: &Registry) -> Result<Vec<String>> {
    let mut programs = Vec::new();

    for candidate in inspect_candidates(build_dir, registry)? {
        match candidate.status {
            CandidateStatus::MissingBinary => {
                debug!(program = %candidate.program, "binary not built, skipping");
            }
            CandidateStatus::UpToDate => {
                debug!(program = %candidate.program, "result log is current, skipping");
            }
            CandidateStatus::Stale => {
                info!(
                    program = %candidate.program,
                    log = %candidate.log_path.display(),
                    "binary is newer than its result log, removing log"
                );
                std::fs::remove_file(&candidate.log_path).map_err(|source| {
                    HarnessError::RemoveStaleLog {
                        path: candidate.log_path.clone(),
                        source,
                    }
                })?;
                programs.push(candidate.program);
            }
            CandidateStatus::Unbenchmarked => programs.push(candidate.program),
        }
    }

    Ok(programs)
}

/// `Ok(None)` when the path is absent or not a regular file.
fn file_mtime(path: &Path) -> Result<Option<SystemTime>> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(HarnessError::Stat {
                path: path.to_path_buf(),
                source,
            }
            .into());
        }
    };

    if !metadata.is_file() {
        return Ok(None);
    }

    let mtime = metadata.modified().map_err(|source| HarnessError::Stat {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(Some(mtime))
}
