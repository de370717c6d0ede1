use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationNanoSeconds};
use strum::IntoEnumIterator;

use libqdlock::{LockConfig, LockKind};

use crate::command_parser::{Experiment, GlobalOpts};

use self::bencher::Bencher;

mod bencher;
mod counter_job;
mod helper;

pub fn benchmark(
    num_cpu: usize,
    num_thread: usize,
    config: &LockConfig,
    options: &GlobalOpts,
) -> Result<()> {
    let targets = if options.locks.is_empty() {
        LockKind::iter().collect()
    } else {
        options.locks.clone()
    };
    let experiments = match options.experiment {
        Some(e) => vec![e],
        None => Experiment::iter().collect(),
    };

    let bencher = Bencher::new(
        num_cpu,
        num_thread,
        experiments,
        targets,
        *config,
        options.output_path.clone().into_boxed_path(),
        options.duration,
    );

    bencher.benchmark()
}

/// One row of the output: what a single thread did during one run.
#[serde_as]
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct Record {
    pub id: usize,
    pub cpu_id: usize,
    pub thread_num: usize,
    pub cpu_num: usize,
    pub loop_count: u64,
    pub num_acquire: u64,
    pub num_read: u64,
    #[serde_as(as = "DurationNanoSeconds")]
    pub hold_time: Duration,
    #[serde_as(as = "Option<DurationNanoSeconds>")]
    pub combine_time: Option<Duration>,
    pub served: Option<u64>,
    pub locktype: String,
    pub experiment: String,
}
