use std::{path::Path, sync::Arc};

use anyhow::{anyhow, Result};
use itertools::Itertools;
use libqdlock::{DLock, LockConfig, LockKind};

use crate::{benchmark::counter_job::counter_benchmark, command_parser::Experiment};

pub struct Bencher {
    num_cpu: usize,
    num_thread: usize,
    experiments: Vec<Experiment>,
    targets: Vec<LockKind>,
    config: LockConfig,
    output_path: Box<Path>,
    duration: u64,
}

impl Bencher {
    pub fn new(
        num_cpu: usize,
        num_thread: usize,
        experiments: Vec<Experiment>,
        targets: Vec<LockKind>,
        config: LockConfig,
        output_path: Box<Path>,
        duration: u64,
    ) -> Self {
        Self {
            num_cpu,
            num_thread,
            experiments,
            targets,
            config,
            output_path,
            duration,
        }
    }

    pub fn benchmark(&self) -> Result<()> {
        log::info!(
            "{} threads on {} cpus, locks [{}]",
            self.num_thread,
            self.num_cpu,
            self.targets.iter().join(", ")
        );

        for &experiment in &self.experiments {
            for &kind in &self.targets {
                if experiment == Experiment::ReadMostly && !kind.shares_reads() {
                    log::debug!("{} serializes reads with writes", kind);
                }
                let lock = Arc::new(DLock::initialize(kind, 0u64, &self.config)?);

                counter_benchmark(LockBenchInfo {
                    lock: lock.clone(),
                    kind,
                    num_thread: self.num_thread,
                    num_cpu: self.num_cpu,
                    experiment,
                    duration: self.duration,
                    output_path: &self.output_path,
                })?;

                let lock = Arc::try_unwrap(lock)
                    .map_err(|_| anyhow!("{} lock still shared after the run", kind))?;
                lock.into_inner();
            }
            log::info!("{} finished", experiment);
        }
        Ok(())
    }
}

pub struct LockBenchInfo<'a> {
    pub lock: Arc<DLock<u64>>,
    pub kind: LockKind,
    pub num_thread: usize,
    pub num_cpu: usize,
    pub experiment: Experiment,
    pub duration: u64,
    pub output_path: &'a Path,
}
