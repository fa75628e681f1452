//! The per-volume package-loader thread.
//!
//! Activation changes submitted asynchronously are queued here and applied
//! in order by a dedicated thread. The queue is a mutex-and-condvar
//! single-consumer design; shutdown is a sentinel job.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use tracing::{debug, error};

use packagefs_shared::control::ActivationChangeRequest;

use super::Volume;

pub(crate) enum Job {
    ChangeActivation(ActivationChangeRequest),
    Quit,
}

#[derive(Default)]
struct JobQueue {
    jobs: Mutex<VecDeque<Job>>,
    available: Condvar,
}

impl JobQueue {
    fn push(&self, job: Job) {
        self.jobs.lock().push_back(job);
        self.available.notify_one();
    }

    fn pop_blocking(&self) -> Job {
        let mut jobs = self.jobs.lock();
        loop {
            if let Some(job) = jobs.pop_front() {
                return job;
            }
            self.available.wait(&mut jobs);
        }
    }
}

/// Handle to the loader thread; joined on shutdown.
pub(crate) struct PackageLoader {
    queue: Arc<JobQueue>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PackageLoader {
    pub(crate) fn spawn(volume: &Arc<Volume>) -> PackageLoader {
        let queue = Arc::new(JobQueue::default());
        let worker_queue = queue.clone();
        let worker_volume: Weak<Volume> = Arc::downgrade(volume);

        let handle = std::thread::Builder::new()
            .name("packagefs package loader".into())
            .spawn(move || {
                loop {
                    match worker_queue.pop_blocking() {
                        Job::Quit => break,
                        Job::ChangeActivation(request) => {
                            let Some(volume) = worker_volume.upgrade() else {
                                break;
                            };
                            if let Err(err) = volume.change_activation(&request) {
                                error!(error = %err, "queued activation change failed");
                            }
                        }
                    }
                }
                debug!("package loader thread exiting");
            })
            .expect("spawn package loader thread");

        PackageLoader {
            queue,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub(crate) fn post(&self, job: Job) {
        self.queue.push(job);
    }

    pub(crate) fn shutdown(&self) {
        self.queue.push(Job::Quit);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}
