// ============================================================================
// ASYNC FILTER WORKER — one background thread, FIFO job queue, future handles
// ============================================================================
//
// `FilterWorker::submit` moves an owned copy of the source buffer onto the
// worker's queue and returns a `FilterHandle`. The handle is a `Future`, so
// it can be awaited, blocked on (`wait`) or polled without blocking
// (`try_take`). A panicking filter resolves its handle with `JobFailed` and
// the worker keeps serving the queue.
// ============================================================================

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::task::{Context, Poll, Waker};
use std::thread::JoinHandle;

use image::RgbaImage;

use crate::error::{EngineError, Result};
use crate::ops::filters::{FilterKind, apply_filter};

#[derive(Default)]
struct JobSlot {
    result: Option<Result<RgbaImage>>,
    waker: Option<Waker>,
}

type SharedSlot = Arc<Mutex<JobSlot>>;

fn lock(slot: &SharedSlot) -> MutexGuard<'_, JobSlot> {
    // a panic never happens while the lock is held, but don't let poison wedge a handle
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn resolve(slot: &SharedSlot, result: Result<RgbaImage>) {
    let waker = {
        let mut guard = lock(slot);
        guard.result = Some(result);
        guard.waker.take()
    };
    if let Some(waker) = waker {
        waker.wake();
    }
}

struct Job {
    id: u64,
    src: RgbaImage,
    kind: FilterKind,
    slot: SharedSlot,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run `work`, turning a panic into `JobFailed`.
fn run_guarded(id: u64, label: &str, work: impl FnOnce() -> RgbaImage) -> Result<RgbaImage> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(work)) {
        Ok(image) => Ok(image),
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            log_err!("Filter job #{} ({}) panicked: {}", id, label, msg);
            Err(EngineError::JobFailed(format!("{}: {}", label, msg)))
        }
    }
}

fn run_job(job: Job) {
    let Job { id, src, kind, slot } = job;
    let result = run_guarded(id, &kind.label(), || apply_filter(&src, &kind));
    resolve(&slot, result);
}

/// Owns one background thread that runs filter jobs in submission order.
pub struct FilterWorker {
    sender: Option<mpsc::Sender<Job>>,
    thread: Option<JoinHandle<()>>,
    next_id: AtomicU64,
}

impl FilterWorker {
    pub fn new() -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let thread = std::thread::Builder::new()
            .name("gb7edit-filter".into())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    run_job(job);
                }
            })?;
        Ok(Self { sender: Some(sender), thread: Some(thread), next_id: AtomicU64::new(1) })
    }

    /// Queue `kind` over an owned copy of `src`.
    pub fn submit(&self, src: RgbaImage, kind: FilterKind) -> FilterHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot: SharedSlot = Arc::new(Mutex::new(JobSlot::default()));
        let job = Job { id, src, kind, slot: Arc::clone(&slot) };

        let sent = match &self.sender {
            Some(sender) => sender.send(job).map_err(|e| e.0),
            None => Err(job),
        };
        if let Err(job) = sent {
            resolve(&job.slot, Err(EngineError::JobFailed("filter worker has shut down".into())));
        }
        FilterHandle { id, slot }
    }
}

impl Drop for FilterWorker {
    fn drop(&mut self) {
        // closing the queue lets the thread finish what is already queued
        self.sender.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Pending result of a submitted filter job.
pub struct FilterHandle {
    id: u64,
    slot: SharedSlot,
}

impl FilterHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_ready(&self) -> bool {
        lock(&self.slot).result.is_some()
    }

    /// Take the result if the job has finished. Returns `None` while running
    /// and after the result was taken once.
    pub fn try_take(&mut self) -> Option<Result<RgbaImage>> {
        lock(&self.slot).result.take()
    }

    /// Block the calling thread until the job finishes.
    pub fn wait(self) -> Result<RgbaImage> {
        pollster::block_on(self)
    }
}

impl Future for FilterHandle {
    type Output = Result<RgbaImage>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut guard = lock(&self.slot);
        match guard.result.take() {
            Some(result) => Poll::Ready(result),
            None => {
                guard.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
