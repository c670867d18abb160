use std::io::Write;

use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, info};

use crate::attempt::Attempt;
use crate::record::ResultRecorder;
use crate::types::{AttemptOutcome, BenchmarkUnit, BestResult};

/// How the key count advances between units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GrowthMode {
    Multiply,
    Add,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    Multiply(u64),
    Add(u64),
}

/// Key counts from `min` up to and including `max`.
///
/// The sequence ends as soon as a step fails to increase the count, so a
/// factor below 2 or a zero step yields only `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySchedule {
    pub min: u64,
    pub max: u64,
    pub growth: Growth,
}

impl KeySchedule {
    pub fn iter(&self) -> impl Iterator<Item = u64> + use<> {
        let max = self.max;
        let growth = self.growth;
        std::iter::successors(Some(self.min), move |&keys| {
            let next = match growth {
                Growth::Multiply(factor) => keys.checked_mul(factor),
                Growth::Add(step) => keys.checked_add(step),
            };
            next.filter(|&next| next > keys)
        })
        .take_while(move |&keys| keys <= max)
    }
}

/// Run `unit` up to `attempts` times, one after another, keeping the fastest success.
///
/// Ties keep the earlier attempt.
pub fn best_of<A: Attempt>(runner: &mut A, unit: &BenchmarkUnit, attempts: u32) -> Result<BestResult> {
    let mut best = BestResult::AllFailed;

    for attempt in 0..attempts {
        match runner.attempt(unit)? {
            AttemptOutcome::Success(measurement) => {
                let faster = match best {
                    BestResult::Best(current) => measurement.runtime_secs < current.runtime_secs,
                    BestResult::AllFailed => true,
                };
                if faster {
                    best = BestResult::Best(measurement);
                }
            }
            AttemptOutcome::Failure(kind) => {
                debug!(attempt, program = %unit.program, ?kind, "attempt failed");
            }
        }
    }

    Ok(best)
}

/// The full set of work for one session.
#[derive(Debug, Clone)]
pub struct SweepPlan {
    pub bench_types: Vec<String>,
    pub programs: Vec<String>,
    pub schedule: KeySchedule,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub recorded: usize,
    pub failed: usize,
    pub attempts: usize,
}

/// Drive every benchmark type, then every program, then increasing key counts.
///
/// The key count loop for a (type, program) pair ends at the first unit where
/// all attempts fail.
pub fn run_sweep<A, W>(
    plan: &SweepPlan,
    runner: &mut A,
    recorder: &mut ResultRecorder<W>,
) -> Result<SweepSummary>
where
    A: Attempt,
    W: Write,
{
    let mut summary = SweepSummary::default();

    for bench_type in &plan.bench_types {
        for program in &plan.programs {
            info!(%bench_type, %program, "sweeping key counts");

            for key_count in plan.schedule.iter() {
                let unit = BenchmarkUnit {
                    bench_type: bench_type.clone(),
                    key_count,
                    program: program.clone(),
                };

                let best = best_of(runner, &unit, plan.attempts)?;
                summary.attempts += plan.attempts as usize;
                recorder.record(&unit, &best)?;

                match best {
                    BestResult::Best(_) => summary.recorded += 1,
                    BestResult::AllFailed => {
                        summary.failed += 1;
                        break;
                    }
                }
            }
        }
    }

    Ok(summary)
}
