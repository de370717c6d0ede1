use std::{
    hint::black_box,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::{anyhow, ensure, Context, Result};
use libqdlock::DLock;
use quanta::Clock;

use crate::{
    benchmark::{helper::create_writer, Record},
    command_parser::Experiment,
};

use super::bencher::LockBenchInfo;

pub fn counter_benchmark(info: LockBenchInfo) -> Result<()> {
    let path = info.output_path.join(format!("{}.csv", info.experiment));
    let mut writer =
        create_writer(&path).with_context(|| format!("creating {}", path.display()))?;

    let stop = Arc::new(AtomicBool::new(false));

    let handles = (0..info.num_thread)
        .map(|id| {
            let lock = info.lock.clone();
            let stop = stop.clone();
            let (num_thread, num_cpu, experiment) =
                (info.num_thread, info.num_cpu, info.experiment);
            thread::Builder::new()
                .name(format!("Thread {}", id))
                .spawn(move || thread_job(id, num_thread, num_cpu, experiment, &stop, &lock))
                .context("spawning benchmark thread")
        })
        .collect::<Result<Vec<_>>>()?;

    thread::sleep(Duration::from_secs(info.duration));

    stop.store(true, Ordering::Release);

    let mut results = Vec::with_capacity(handles.len());
    for (i, job) in handles.into_iter().enumerate() {
        results.push(
            job.join()
                .map_err(|_| anyhow!("benchmark thread {} panicked", i))?,
        );
    }

    for result in results.iter() {
        writer.serialize(result)?;
    }
    writer.flush()?;

    let total_count: u64 = results.iter().map(|r| r.loop_count).sum();
    let counter = info.lock.read(|counter| *counter);
    ensure!(
        counter == total_count,
        "{}: lock value {} does not match the thread local loop sum {}",
        info.kind,
        counter,
        total_count
    );

    log::info!(
        "Finish Benchmark for {}: Total Counter {}",
        info.kind,
        total_count
    );
    Ok(())
}

fn thread_job(
    id: usize,
    num_thread: usize,
    num_cpu: usize,
    experiment: Experiment,
    stop: &AtomicBool,
    lock: &DLock<u64>,
) -> Record {
    core_affinity::set_for_current(core_affinity::CoreId { id: id % num_cpu });
    let single_iter_duration = Duration::from_micros(if id % 2 == 0 { 1 } else { 3 });
    let timer = Clock::new();
    let mut rng = fastrand::Rng::with_seed(id as u64);

    let mut loop_count = 0u64;
    let mut num_acquire = 0u64;
    let mut num_read = 0u64;
    let mut hold_time = Duration::ZERO;

    while !stop.load(Ordering::Acquire) {
        if experiment == Experiment::ReadMostly && rng.u8(..10) != 0 {
            black_box(lock.read(|counter| *counter));
            num_read += 1;
            continue;
        }

        num_acquire += 1;
        lock.delegate(|counter| {
            let begin = timer.now();
            while timer.now() - begin < single_iter_duration {
                *counter += 1;
                loop_count += 1;
            }
            hold_time += timer.now().duration_since(begin);
        });
    }
    log::debug!("Thread {} finished with result {}", id, loop_count);

    #[cfg(feature = "combiner_stat")]
    let (combine_time, served) = lock
        .raw()
        .combiner_stat()
        .map_or((None, None), |s| (Some(s.combining_time), Some(s.served)));
    #[cfg(not(feature = "combiner_stat"))]
    let (combine_time, served) = (None, None);

    Record {
        id,
        cpu_id: id % num_cpu,
        thread_num: num_thread,
        cpu_num: num_cpu,
        loop_count,
        num_acquire,
        num_read,
        hold_time,
        combine_time,
        served,
        locktype: lock.raw().to_string(),
        experiment: experiment.to_string(),
    }
}
