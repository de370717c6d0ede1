use std::{path::PathBuf, thread::available_parallelism};

use clap::*;
use libqdlock::LockKind;
use serde::Serialize;
use strum::{Display, EnumIter};

#[derive(Debug, Parser)]
#[clap(name = "delegation lock counter benchmark", version)]
/// Benchmark Utility
pub struct App {
    #[command(flatten)]
    pub global_opts: GlobalOpts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Display, EnumIter, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum Experiment {
    /// Every operation increments the shared counter; even threads hold the
    /// critical section for 1us, odd threads for 3us
    CounterOneThree,
    /// One increment in ten, the rest read the counter
    ReadMostly,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Lock kinds to benchmark, all of them by default
    #[arg(long, short, num_args(0..), value_delimiter = ',')]
    pub locks: Vec<LockKind>,
    #[arg(num_args(0..), value_delimiter = ',', value_terminator("."), long, short, default_values_t = [available_parallelism().map_or(1, |n| n.get())].to_vec())]
    pub threads: Vec<usize>,
    #[arg(num_args(0..), value_delimiter = ',', value_terminator("."), long, short, default_values_t = [available_parallelism().map_or(1, |n| n.get())].to_vec())]
    pub cpus: Vec<usize>,
    #[arg(long, short, default_value = "../visualization/output")]
    pub output_path: PathBuf,
    /// Seconds per lock kind and thread count
    #[arg(long, short, default_value = "5")]
    pub duration: u64,
    #[arg(long, short)]
    pub experiment: Option<Experiment>,
    /// JSON file with a (partial) lock configuration
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Overrides `max_batch` of the configuration
    #[arg(long)]
    pub max_batch: Option<usize>,
    #[arg(long, short)]
    pub verbose: bool,
}
