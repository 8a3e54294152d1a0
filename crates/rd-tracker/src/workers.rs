//! Fixed pool of backend worker threads.
//!
//! Jobs wait in a bounded queue; when it is full the job is dropped.

use crate::events::TrackerEvent;
use rd_core::TrackerError;
use rd_core::TrackerResult;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::mpsc;
use std::thread;

type Job<B> = Box<dyn FnOnce(&B) -> TrackerEvent + Send>;

/// Why a job was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    QueueFull,
    Stopped,
}

pub struct WorkerPool<B> {
    jobs: mpsc::SyncSender<Job<B>>,
    size: usize,
}

impl<B: Send + Sync + 'static> WorkerPool<B> {
    /// Spawns `size` named workers that post each job's event onto `results`.
    pub fn start(
        size: usize,
        queue: usize,
        backend: Arc<B>,
        results: mpsc::Sender<TrackerEvent>,
    ) -> TrackerResult<Self> {
        let (jobs, waiting) = mpsc::sync_channel::<Job<B>>(queue);
        let waiting = Arc::new(Mutex::new(waiting));

        for index in 0..size {
            let waiting = Arc::clone(&waiting);
            let backend = Arc::clone(&backend);
            let results = results.clone();
            thread::Builder::new()
                .name(format!("rd-backend-worker-{index}"))
                .spawn(move || run_worker(&waiting, &backend, &results))
                .map_err(|error| {
                    TrackerError::new(
                        "tracker.worker_spawn_failed",
                        format!("failed to spawn backend worker {index}: {error}"),
                    )
                })?;
        }

        Ok(Self { jobs, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn submit<F>(&self, job: F) -> Result<(), SubmitError>
    where
        F: FnOnce(&B) -> TrackerEvent + Send + 'static,
    {
        self.jobs.try_send(Box::new(job)).map_err(|error| match error {
            mpsc::TrySendError::Full(_) => SubmitError::QueueFull,
            mpsc::TrySendError::Disconnected(_) => SubmitError::Stopped,
        })
    }
}

fn run_worker<B>(
    waiting: &Mutex<mpsc::Receiver<Job<B>>>,
    backend: &B,
    results: &mpsc::Sender<TrackerEvent>,
) {
    loop {
        let next = waiting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv();
        let Ok(job) = next else {
            return;
        };
        if results.send(job(backend)).is_err() {
            return;
        }
    }
}
