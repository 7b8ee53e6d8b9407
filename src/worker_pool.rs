//! Worker pool (spec 4.5): for a consumer subcommand, allocate one
//! resolver handle, one governor, N worker threads (each running a
//! source consumer), and one monitor thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::metrics::Counters;
use crate::monitor::{Monitor, MonitorConfig};
use crate::plugins::Governor;
use crate::resolver::ResolverEngine;

/// Per-worker liveness flag, read by the monitor (spec 4.6a).
pub type AliveFlag = Arc<AtomicBool>;

pub struct WorkerPool {
    worker_threads: Vec<JoinHandle<()>>,
    monitor_thread: JoinHandle<()>,
    quit: Arc<AtomicBool>,
}

impl WorkerPool {
    /// `worker_fn` is invoked once per worker index with its own alive
    /// flag and the shared quit flag; it owns that thread's connect ->
    /// loop -> ack lifecycle for whichever backend is in use (spec
    /// 4.3). A configurable delay lets workers warm up before the
    /// monitor starts computing rates (spec 4.5).
    #[allow(clippy::too_many_arguments)]
    pub fn spawn<F>(
        num_workers: usize,
        sleep_before_admin_threads: Duration,
        monitor_config: MonitorConfig,
        engine: Arc<dyn ResolverEngine>,
        governor: Arc<dyn Governor>,
        counters: Arc<Counters>,
        worker_fn: F,
    ) -> WorkerPool
    where
        F: Fn(usize, AliveFlag, Arc<AtomicBool>) + Send + Sync + 'static,
    {
        let quit = Arc::new(AtomicBool::new(false));
        let worker_fn = Arc::new(worker_fn);
        let alive_flags: Vec<AliveFlag> = (0..num_workers).map(|_| Arc::new(AtomicBool::new(true))).collect();

        let worker_threads = alive_flags
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, alive)| {
                let worker_fn = worker_fn.clone();
                let quit = quit.clone();
                std::thread::Builder::new()
                    .name(format!("worker-{index}"))
                    .spawn(move || {
                        worker_fn(index, alive.clone(), quit);
                        alive.store(false, Ordering::SeqCst);
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        let monitor = Monitor::new(monitor_config, alive_flags, engine, governor, counters);
        let quit_for_monitor = quit.clone();
        let monitor_thread = std::thread::Builder::new()
            .name("monitor".to_string())
            .spawn(move || {
                std::thread::sleep(sleep_before_admin_threads);
                monitor.run(quit_for_monitor);
            })
            .expect("failed to spawn monitor thread");

        WorkerPool {
            worker_threads,
            monitor_thread,
            quit,
        }
    }

    /// Sets the process-wide quit intent observed by workers at their
    /// next fetch timeout and by the monitor at its next period (spec
    /// 5 "Cancellation and timeouts").
    pub fn request_shutdown(&self) {
        self.quit.store(true, Ordering::SeqCst);
    }

    pub fn join(self) {
        for handle in self.worker_threads {
            let _ = handle.join();
        }
        let _ = self.monitor_thread.join();
    }
}
