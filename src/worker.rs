//! Background recompute pool.
//!
//! A fixed set of `std::thread` workers shares one job channel. Each job
//! carries the session generation it was requested for; a worker skips any
//! job that a newer request has already superseded, and the session drops
//! results whose generation is no longer current.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use web_time::Instant;

use crate::annotation::{AnnotationId, DeriveContext, Derived, Target, derive_all};

/// Snapshot of everything a worker needs to recompute derived data.
#[derive(Debug, Clone)]
pub struct RecomputeRequest {
    pub generation: u64,
    pub context: DeriveContext,
    pub targets: Vec<Target>,
}

/// Derived data computed for one request.
#[derive(Debug, Clone)]
pub struct RecomputeResult {
    pub generation: u64,
    pub results: Vec<(AnnotationId, Derived)>,
}

/// Message sent to the worker threads.
enum WorkerMessage {
    Job(RecomputeRequest),
    Shutdown,
}

/// Pool of recompute threads with latest-request-wins semantics.
pub struct RecomputeWorker {
    job_tx: Sender<WorkerMessage>,
    result_rx: Receiver<RecomputeResult>,
    latest: Arc<AtomicU64>,
    handles: Vec<JoinHandle<()>>,
    in_flight: usize,
}

impl RecomputeWorker {
    /// Spawn `threads` workers (at least one).
    pub fn spawn(threads: usize) -> std::io::Result<Self> {
        let threads = threads.max(1);
        let (job_tx, job_rx) = mpsc::channel::<WorkerMessage>();
        let (result_tx, result_rx) = mpsc::channel::<RecomputeResult>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let latest = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::with_capacity(threads);
        for index in 0..threads {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            let latest = Arc::clone(&latest);
            let handle = thread::Builder::new()
                .name(format!("hspec-recompute-{}", index))
                .spawn(move || {
                    log::debug!("Recompute worker {} started", index);
                    Self::thread_loop(&job_rx, &result_tx, &latest);
                    log::debug!("Recompute worker {} exiting", index);
                })?;
            handles.push(handle);
        }

        log::info!("Spawned {} recompute workers", threads);
        Ok(Self {
            job_tx,
            result_rx,
            latest,
            handles,
            in_flight: 0,
        })
    }

    fn thread_loop(
        job_rx: &Mutex<Receiver<WorkerMessage>>,
        result_tx: &Sender<RecomputeResult>,
        latest: &AtomicU64,
    ) {
        loop {
            // Lock only long enough to take one message
            let message = job_rx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .recv();
            let request = match message {
                Ok(WorkerMessage::Job(request)) => request,
                Ok(WorkerMessage::Shutdown) | Err(_) => break,
            };

            let result = Self::run_job(request, latest);
            if result_tx.send(result).is_err() {
                log::warn!("Result channel closed, recompute worker exiting");
                break;
            }
        }
    }

    fn run_job(request: RecomputeRequest, latest: &AtomicU64) -> RecomputeResult {
        let generation = request.generation;
        if generation < latest.load(Ordering::Acquire) {
            log::debug!("Skipping superseded recompute generation {}", generation);
            return RecomputeResult {
                generation,
                results: Vec::new(),
            };
        }

        let start = Instant::now();
        let results = derive_all(&request.context, &request.targets);
        log::debug!(
            "Recompute generation {}: {} annotations in {:.1?}",
            generation,
            results.len(),
            start.elapsed()
        );
        RecomputeResult {
            generation,
            results,
        }
    }

    /// Queue a request. Older queued requests become superseded.
    pub fn submit(&mut self, request: RecomputeRequest) {
        self.latest.fetch_max(request.generation, Ordering::AcqRel);
        if self.job_tx.send(WorkerMessage::Job(request)).is_err() {
            log::error!("Failed to queue recompute: workers are gone");
            return;
        }
        self.in_flight += 1;
    }

    /// Take one finished result without blocking.
    pub fn try_result(&mut self) -> Option<RecomputeResult> {
        match self.result_rx.try_recv() {
            Ok(result) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                log::warn!("Recompute workers disconnected");
                None
            }
        }
    }

    /// Wait up to `timeout` for one finished result.
    pub fn wait_result(&mut self, timeout: Duration) -> Option<RecomputeResult> {
        match self.result_rx.recv_timeout(timeout) {
            Ok(result) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                Some(result)
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                log::warn!("Recompute workers disconnected");
                None
            }
        }
    }

    /// Requests submitted but not yet collected.
    pub fn pending_count(&self) -> usize {
        self.in_flight
    }

    pub fn thread_count(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for RecomputeWorker {
    fn drop(&mut self) {
        log::debug!("Shutting down {} recompute workers", self.handles.len());
        for _ in &self.handles {
            let _ = self.job_tx.send(WorkerMessage::Shutdown);
        }
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.join() {
                log::warn!("Recompute worker panicked: {:?}", e);
            }
        }
    }
}
