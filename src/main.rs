use std::{
    fs::{create_dir_all, remove_dir_all, File},
    io::BufReader,
    iter::repeat,
    path::Path,
};

use anyhow::{ensure, Context, Result};
use benchmark::benchmark;
use clap::Parser;
use command_parser::*;
use libqdlock::LockConfig;

mod benchmark;
mod command_parser;

fn main() -> Result<()> {
    let mut app = App::parse();

    let level = if app.global_opts.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if app.global_opts.cpus.len() != 1 {
        ensure!(
            app.global_opts.cpus.len() == app.global_opts.threads.len(),
            "--cpus takes one value or one per --threads value"
        );
    }

    if app.global_opts.cpus.len() == 1 {
        app.global_opts.cpus = repeat(app.global_opts.cpus[0])
            .take(app.global_opts.threads.len())
            .collect();
    }

    let config = load_config(&app.global_opts)?;
    log::info!("lock configuration: {:?}", config);

    let output_path = app.global_opts.output_path.as_path();
    if output_path.is_dir() {
        remove_dir_all(output_path)
            .with_context(|| format!("removing output dir {}", output_path.display()))?;
    }
    create_dir_all(output_path)
        .with_context(|| format!("creating output dir {}", output_path.display()))?;

    for (ncpu, nthread) in app
        .global_opts
        .cpus
        .iter()
        .zip(&app.global_opts.threads)
    {
        benchmark(*ncpu, *nthread, &config, &app.global_opts)?;
    }
    Ok(())
}

fn load_config(options: &GlobalOpts) -> Result<LockConfig> {
    let mut config = match &options.config {
        Some(path) => read_config(path)?,
        None => LockConfig::default(),
    };
    if let Some(max_batch) = options.max_batch {
        config.max_batch = max_batch;
    }
    config.validate()?;
    Ok(config)
}

fn read_config(path: &Path) -> Result<LockConfig> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing lock configuration {}", path.display()))
}
