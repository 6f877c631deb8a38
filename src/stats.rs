//! Execution statistics of a completed taskset.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::{cpu::SFuncBlock, job::CompletedJob, utils::median};

pub const RELEASE_DELAY: &str = "job:release_delay";
pub const MIGRATIONS: &str = "job:migrations";
pub const PREEMPTIONS: &str = "job:preemptions";

/// Prefix of scheduler function categories.
pub const SFUNC_PREFIX: &str = "sfunc";

/// Summary of a sample of durations or counts.
///
/// An empty sample reports `-1` for every statistic. Samples are signed: a
/// job that never ran counts `-1` preemptions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecData {
    pub name: String,
    pub count: usize,
    pub min: i64,
    pub mean: f64,
    pub median: f64,
    pub max: i64,
    pub samples: Vec<i64>,
}

impl ExecData {
    pub fn new(name: impl Into<String>, samples: Vec<i64>) -> Self {
        let count = samples.len();

        let (min, mean, median, max) = match median(&samples) {
            Some(med) => {
                let sum: i128 = samples.iter().map(|&v| v as i128).sum();
                (
                    samples.iter().copied().min().unwrap_or(-1),
                    sum as f64 / count as f64,
                    med,
                    samples.iter().copied().max().unwrap_or(-1),
                )
            }
            None => (-1, -1.0, -1.0, -1),
        };

        Self {
            name: name.into(),
            count,
            min,
            mean,
            median,
            max,
            samples,
        }
    }

    /// Category of the statistic: the part of the name before the first `:`.
    pub fn category(&self) -> &str {
        self.name.split(':').next().unwrap_or_default()
    }
}

fn sample(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

pub fn sfunc_category(name: &str) -> String {
    format!("{}:{}", SFUNC_PREFIX, name)
}

/// Computes the statistics of a taskset from its finished scheduler function
/// invocations and jobs.
///
/// Results are grouped by category, then ordered by decreasing sample count.
pub fn aggregate(sfunc_blocks: &[SFuncBlock], jobs: &[CompletedJob]) -> Vec<ExecData> {
    let mut sfunc_durations: BTreeMap<&str, Vec<i64>> = BTreeMap::new();

    for (block, duration) in sfunc_blocks
        .iter()
        .filter_map(|b| b.duration().map(|d| (b, d)))
    {
        sfunc_durations
            .entry(block.name.as_str())
            .or_default()
            .push(sample(duration));
    }

    let mut data: Vec<ExecData> = sfunc_durations
        .into_iter()
        .map(|(name, durations)| ExecData::new(sfunc_category(name), durations))
        .collect();

    data.push(ExecData::new(
        RELEASE_DELAY,
        jobs.iter()
            .filter_map(CompletedJob::release_delay)
            .map(sample)
            .collect(),
    ));
    data.push(ExecData::new(
        MIGRATIONS,
        jobs.iter().map(|j| i64::from(j.migrations)).collect(),
    ));
    data.push(ExecData::new(
        PREEMPTIONS,
        jobs.iter().filter_map(CompletedJob::preemptions).collect(),
    ));

    data.sort_by(|a, b| {
        (a.category(), Reverse(a.count), a.name.as_str()).cmp(&(
            b.category(),
            Reverse(b.count),
            b.name.as_str(),
        ))
    });

    data
}
