use std::error::Error;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use clap::Parser;
use serde_derive::{Deserialize, Serialize};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{info, warn};

use tsqueue::interrupt::Interrupter;
use tsqueue::pauser::{BackoffPauser, PauserConfig};
use tsqueue::store::{LongValue, MappedTableStore, TableStore, TableStoreConfig};
use tsqueue::{LockConfig, QueueLock, WriteLock};

static COUNTER_KEY: &str = "lock_bench.counter";

#[derive(clap::Parser)]
#[clap()]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "tsqueue-bench.toml")]
    config: String,
    #[clap(short = 't', long = "threads", default_value = "4")]
    threads: usize,
    #[clap(short = 'n', long = "iterations", default_value = "100000")]
    iterations: u64,
    /// Contend on the re-entrant queue lock instead of the write lock.
    #[clap(long = "queue-lock")]
    queue_lock: bool,
    /// Remove the shared table store when done.
    #[clap(long = "destroy")]
    destroy: bool,
}

#[derive(Default, Debug, Serialize, Deserialize)]
#[serde(default)]
struct BenchConfig {
    store: TableStoreConfig,
    lock: LockConfig,
    pauser: PauserConfig,
}

enum BenchLock {
    Queue(QueueLock),
    Write(WriteLock),
}

impl BenchLock {
    fn acquire(&self) -> tsqueue::Result<()> {
        match self {
            BenchLock::Queue(lock) => lock.acquire_lock(),
            BenchLock::Write(lock) => lock.lock(),
        }
    }

    fn release(&self) {
        match self {
            BenchLock::Queue(lock) => lock.unlock(),
            BenchLock::Write(lock) => lock.unlock(),
        }
    }
}

#[derive(Default)]
struct WorkerStats {
    ops: u64,
    violations: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().init();

    let opts: Opts = Opts::parse();
    let cfg: BenchConfig = confy::load_path(&opts.config)?;
    info!(?cfg, "loaded config");

    let store = Arc::new(MappedTableStore::open(&cfg.store)?);
    let pauser = BackoffPauser::supplier(cfg.pauser.clone());
    let lock = Arc::new(if opts.queue_lock {
        BenchLock::Queue(QueueLock::new(store.clone(), pauser, cfg.lock.clone())?)
    } else {
        BenchLock::Write(WriteLock::new(store.clone(), pauser, cfg.lock.clone())?)
    });
    let counter = store.acquire_value_for(COUNTER_KEY, 0)?;

    let stats = run(&lock, &counter, &opts)?;

    if stats.violations > 0 {
        warn!(violations = stats.violations, "counter changed while the lock was held");
    }
    drop(lock);
    drop(counter);
    if opts.destroy {
        match Arc::try_unwrap(store) {
            Ok(store) => store.destroy()?,
            Err(_) => warn!("table store still in use, not destroying it"),
        }
    }
    Ok(())
}

fn run(
    lock: &Arc<BenchLock>,
    counter: &Arc<dyn LongValue>,
    opts: &Opts,
) -> Result<WorkerStats, Box<dyn Error>> {
    let start = Instant::now();
    let (handle_tx, handle_rx) = mpsc::channel();

    let workers: Vec<_> = (0..opts.threads)
        .map(|_| {
            let lock = lock.clone();
            let counter = counter.clone();
            let handle_tx = handle_tx.clone();
            let iterations = opts.iterations;
            thread::spawn(move || -> tsqueue::Result<WorkerStats> {
                let interrupter = Interrupter::current();
                let _ = handle_tx.send(interrupter.clone());
                drop(handle_tx);
                let mut stats = WorkerStats::default();
                while stats.ops < iterations && !interrupter.is_interrupted() {
                    lock.acquire()?;
                    let value = counter.get_volatile_value();
                    if !counter.compare_and_swap_value(value, value.wrapping_add(1)) {
                        stats.violations += 1;
                    }
                    lock.release();
                    stats.ops += 1;
                }
                Ok(stats)
            })
        })
        .collect();
    drop(handle_tx);

    let handles: Vec<Interrupter> = handle_rx.iter().collect();
    let mut signals = Signals::new(&[SIGINT, SIGTERM])?;
    thread::spawn(move || {
        for signal in signals.forever() {
            info!(signal, "stopping workers");
            for handle in handles.iter() {
                handle.interrupt();
            }
        }
    });

    let mut total = WorkerStats::default();
    for worker in workers {
        match worker.join() {
            Ok(Ok(stats)) => {
                total.ops += stats.ops;
                total.violations += stats.violations;
            }
            Ok(Err(e)) => warn!(error = %e, "worker stopped"),
            Err(_) => warn!("worker panicked"),
        }
    }

    let duration = start.elapsed();
    let iops = ((total.ops as f64) / (duration.as_millis().max(1) as f64)) * 1_000f64;
    println!(
        "\n{:#?}K lock round trips/s over {} threads. Total time: {:#?}, counter: {}",
        (iops / 1000f64) as u64,
        opts.threads,
        duration,
        counter.get_volatile_value()
    );
    Ok(total)
}
