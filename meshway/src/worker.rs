//! Dispatch worker pool.
//!
//! Two bands feed a shared set of worker threads: the priority band is
//! drained before the normal band. Handler panics are caught and logged;
//! the worker returns to its loop.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;

use flume::{Receiver, Sender, TryRecvError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

/// One queued dispatch task.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of dispatch workers with two priority bands.
pub(crate) struct WorkerPool {
    normal_tx: RwLock<Option<Sender<Job>>>,
    priority_tx: RwLock<Option<Sender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `threads` workers (0 = one per CPU core).
    pub fn new(threads: usize) -> Self {
        let threads = if threads == 0 {
            num_cpus::get()
        } else {
            threads
        };

        let (normal_tx, normal_rx) = flume::unbounded::<Job>();
        let (priority_tx, priority_rx) = flume::unbounded::<Job>();

        let handles = (0..threads)
            .map(|index| {
                let normal_rx = normal_rx.clone();
                let priority_rx = priority_rx.clone();
                std::thread::Builder::new()
                    .name(format!("mw-worker-{index}"))
                    .spawn(move || worker_loop(&priority_rx, &normal_rx))
                    .expect("failed to spawn dispatch worker")
            })
            .collect();

        Self {
            normal_tx: RwLock::new(Some(normal_tx)),
            priority_tx: RwLock::new(Some(priority_tx)),
            handles: Mutex::new(handles),
        }
    }

    /// Enqueue a task. Returns `false` after shutdown.
    pub fn spawn(&self, priority: bool, job: Job) -> bool {
        let guard = if priority {
            self.priority_tx.read()
        } else {
            self.normal_tx.read()
        };
        match guard.as_ref() {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        }
    }

    /// Close both bands and wait for the workers to drain and exit.
    pub fn shutdown(&self) {
        *self.normal_tx.write() = None;
        *self.priority_tx.write() = None;
        for handle in self.handles.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(priority_rx: &Receiver<Job>, normal_rx: &Receiver<Job>) {
    loop {
        // Priority band drains first.
        match priority_rx.try_recv() {
            Ok(job) => {
                run_job(job);
                continue;
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => {}
        }

        let next = flume::Selector::new()
            .recv(priority_rx, |r| r)
            .recv(normal_rx, |r| r)
            .wait();

        match next {
            Ok(job) => run_job(job),
            Err(_) => {
                // A band closed; drain leftovers, exit when both are gone.
                while let Ok(job) = priority_rx.try_recv() {
                    run_job(job);
                }
                while let Ok(job) = normal_rx.try_recv() {
                    run_job(job);
                }
                let live = if priority_rx.is_disconnected() {
                    if normal_rx.is_disconnected() {
                        break;
                    }
                    normal_rx
                } else {
                    priority_rx
                };
                // Block on the surviving band so the loop doesn't spin.
                match live.recv() {
                    Ok(job) => run_job(job),
                    Err(_) => continue,
                }
            }
        }
    }
    debug!("dispatch worker exiting");
}

fn run_job(job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("message handler panicked; worker continues");
    }
}
