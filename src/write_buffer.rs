//! Coalescing write buffer: absorbs small/concurrent appends into
//! coarse bulk [`Bucket::append`] calls under a self-tuning cooldown.
//!
//! Hot/Cold status is an explicit state machine rather than a boolean
//! flag, background tasks run via `tokio::spawn` under an
//! atomic/mutex-guarded running state, and a background failure is
//! stored and re-surfaced on the next `append`/`sync` rather than
//! logged and swallowed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Notify, RwLock as AsyncRwLock};
use tokio::task::JoinHandle;

use crate::bucket::Bucket;
use crate::common::{Result, StoreError};
use crate::schema::Item;

/// Write-buffer tuning knobs: `write_buffer_max_items`,
/// `write_buffer_cooldown_initial_ms`, `write_buffer_cooldown_max_ms`,
/// and the backlog high-water mark used by the cooldown formula.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct WriteBufferConfig {
    pub max_items: usize,
    pub cooldown_initial_ms: u64,
    pub cooldown_max_ms: u64,
    pub high_water_mark: usize,
}

impl Default for WriteBufferConfig {
    fn default() -> Self {
        Self {
            max_items: 65_536,
            cooldown_initial_ms: 1000,
            cooldown_max_ms: 16_000,
            high_water_mark: 4096,
        }
    }
}

impl WriteBufferConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_items == 0 {
            return Err(StoreError::InvalidConfig {
                message: "write_buffer_max_items must be at least 1".to_string(),
            });
        }
        if self.cooldown_max_ms < self.cooldown_initial_ms {
            return Err(StoreError::InvalidConfig {
                message: "write_buffer_cooldown_max_ms must be >= cooldown_initial_ms".to_string(),
            });
        }
        Ok(())
    }
}

/// Explicit Hot/Cold state machine, rather than a boolean flag plus
/// task handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineStatus {
    Cold,
    Writing,
    CoolingDown,
    WritingQueued,
}

impl EngineStatus {
    fn is_hot(self) -> bool {
        !matches!(self, EngineStatus::Cold)
    }
}

#[derive(Default)]
struct Queues {
    active: Vec<Item>,
    inactive: Vec<Item>,
}

/// The shared, `'static`-safe state a writer/cooldown task needs.
/// `WriteBuffer` is a thin handle around `Arc<Inner>` so background
/// tasks can hold their own clone without borrowing from a caller's
/// stack frame.
struct Inner {
    bucket: Arc<Bucket>,
    config: WriteBufferConfig,
    queues: SyncMutex<Queues>,
    status: SyncMutex<EngineStatus>,
    /// Serializes a swap (exclusive) against reads of the underlying
    /// bucket count (shared).
    swap_gate: AsyncRwLock<()>,
    writer_task: SyncMutex<Option<JoinHandle<()>>>,
    cooldown_task: SyncMutex<Option<JoinHandle<()>>>,
    /// Woken whenever a writer-task iteration completes, so bounded
    /// appenders can re-evaluate.
    writer_done: Notify,
    /// Woken whenever `status` changes, so `sync()` can wait for Cold.
    status_changed: Notify,
    cooldown_events: AtomicU64,
    current_cooldown_ms: AtomicU64,
    poisoned: AtomicBool,
    background_error: SyncMutex<Option<StoreError>>,
}

impl Inner {
    fn check_poisoned(&self) -> Result<()> {
        if self.poisoned.load(Ordering::Acquire) {
            let err = self
                .background_error
                .lock()
                .clone()
                .unwrap_or(StoreError::BackgroundFailure {
                    message: "background writer failed".to_string(),
                });
            return Err(err);
        }
        Ok(())
    }

    fn set_status(&self, new: EngineStatus) {
        *self.status.lock() = new;
        self.status_changed.notify_waiters();
    }

    fn is_hot(&self) -> bool {
        self.status.lock().is_hot()
    }

    fn fail(&self, err: StoreError) {
        log::error!("write buffer background failure: {err}");
        *self.background_error.lock() = Some(err);
        self.poisoned.store(true, Ordering::Release);
        self.set_status(EngineStatus::Cold);
        self.writer_done.notify_waiters();
    }
}

/// Wraps a [`Bucket`], coalescing concurrent small appends into bulk
/// writes.
#[derive(Clone)]
pub struct WriteBuffer {
    inner: Arc<Inner>,
}

impl WriteBuffer {
    pub fn new(bucket: Bucket, config: WriteBufferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                bucket: Arc::new(bucket),
                config,
                queues: SyncMutex::new(Queues::default()),
                status: SyncMutex::new(EngineStatus::Cold),
                swap_gate: AsyncRwLock::new(()),
                writer_task: SyncMutex::new(None),
                cooldown_task: SyncMutex::new(None),
                writer_done: Notify::new(),
                status_changed: Notify::new(),
                cooldown_events: AtomicU64::new(0),
                current_cooldown_ms: AtomicU64::new(config.cooldown_initial_ms),
                poisoned: AtomicBool::new(false),
                background_error: SyncMutex::new(None),
            }),
        })
    }

    pub fn is_hot(&self) -> bool {
        self.inner.is_hot()
    }

    pub fn buffered_count(&self) -> usize {
        self.inner.queues.lock().active.len()
    }

    /// `Bucket.count() + size(active queue)`.
    pub async fn count(&self) -> u64 {
        let _guard = self.inner.swap_gate.read().await;
        self.inner.bucket.count() + self.inner.queues.lock().active.len() as u64
    }

    /// Dispatches to the bucket when `i < Bucket.count()`, otherwise
    /// to the buffered active queue by position.
    pub async fn read(&self, index: u64) -> Result<Item> {
        let _guard = self.inner.swap_gate.read().await;
        let persisted = self.inner.bucket.count();
        if index < persisted {
            return self.inner.bucket.read(index);
        }
        let queues = self.inner.queues.lock();
        let pos = (index - persisted) as usize;
        queues
            .active
            .get(pos)
            .cloned()
            .ok_or(StoreError::OutOfRange {
                index,
                count: persisted + queues.active.len() as u64,
            })
    }

    pub async fn read_bulk(&self, from: u64, take: u64) -> Result<Vec<Item>> {
        let mut out = Vec::with_capacity(take as usize);
        for i in from..from + take {
            out.push(self.read(i).await?);
        }
        Ok(out)
    }

    /// Absorbs `items` into the active queue, starting the writer task
    /// if the buffer was Cold. Blocks only when admitting would push
    /// the active queue past `max_items`.
    pub async fn append(&self, items: Vec<Item>) -> Result<()> {
        self.inner.check_poisoned()?;
        if items.is_empty() {
            return Ok(());
        }

        loop {
            let should_wait = {
                let queues = self.inner.queues.lock();
                queues.active.len() + items.len() > self.inner.config.max_items
                    && self.inner.is_hot()
            };
            if !should_wait {
                break;
            }
            self.inner.writer_done.notified().await;
            self.inner.check_poisoned()?;
        }

        // Extend the active queue and decide whether to wake a Cold
        // engine under the same `queues` lock acquisition, so this can
        // never interleave with `run_writer` reading an empty backlog
        // and transitioning to Cold after we've enqueued here.
        let became_hot = {
            let mut queues = self.inner.queues.lock();
            queues.active.extend(items);
            let mut status = self.inner.status.lock();
            let was_cold = *status == EngineStatus::Cold;
            if was_cold {
                *status = EngineStatus::Writing;
            }
            was_cold
        };

        if became_hot {
            self.inner.status_changed.notify_waiters();
            self.spawn_writer();
        }

        Ok(())
    }

    fn spawn_writer(&self) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(run_writer(inner));
        *self.inner.writer_task.lock() = Some(handle);
    }

    /// Awaits full drain by waiting for `status` to settle at Cold with
    /// both queues empty, robust to tasks continuously replacing each
    /// other's `JoinHandle` while we'd otherwise be awaiting them.
    pub async fn sync(&self) -> Result<()> {
        loop {
            self.inner.check_poisoned()?;
            // Register for the next notification before reading the
            // drained condition: `Notify::notified()` captures any
            // `notify_waiters()` call made between here and the first
            // poll below, so a `set_status(Cold)` landing right after
            // our read can't be missed the way it would if we created
            // the future only after finding the condition unmet.
            let notified = self.inner.status_changed.notified();
            tokio::pin!(notified);
            let drained = {
                let status = *self.inner.status.lock();
                let queues = self.inner.queues.lock();
                status == EngineStatus::Cold
                    && queues.active.is_empty()
                    && queues.inactive.is_empty()
            };
            if drained {
                return Ok(());
            }
            notified.await;
        }
    }

    pub fn delete(self) -> Result<()> {
        if let Some(h) = self.inner.writer_task.lock().take() {
            h.abort();
        }
        if let Some(h) = self.inner.cooldown_task.lock().take() {
            h.abort();
        }
        match Arc::try_unwrap(self.inner) {
            Ok(inner) => match Arc::try_unwrap(inner.bucket) {
                Ok(bucket) => bucket.delete(),
                Err(_) => Err(StoreError::InvalidConfig {
                    message: "bucket still shared at delete time".to_string(),
                }),
            },
            Err(_) => Err(StoreError::InvalidConfig {
                message: "write buffer still shared at delete time".to_string(),
            }),
        }
    }

    pub fn statistics(&self) -> String {
        format!(
            "WriteBuffer:\n  hot: {}\n  buffered: {}\n  cooldown_events: {}\n  current_cooldown_ms: {}\n{}",
            self.is_hot(),
            self.buffered_count(),
            self.inner.cooldown_events.load(Ordering::Relaxed),
            self.inner.current_cooldown_ms.load(Ordering::Relaxed),
            self.inner.bucket.statistics()
        )
    }
}

/// One iteration of the writer task: swap the queues under the swap
/// lock (acquired exclusively, serializing against `count`/`read`),
/// bulk-append the snapshot, then decide whether to go Cold or spawn
/// a cooldown task based on what arrived while writing.
async fn run_writer(inner: Arc<Inner>) {
    inner.set_status(EngineStatus::Writing);
    let snapshot = {
        let _gate = inner.swap_gate.write().await;
        let mut queues = inner.queues.lock();
        std::mem::swap(&mut queues.active, &mut queues.inactive);
        std::mem::take(&mut queues.inactive)
    };

    if !snapshot.is_empty()
        && let Err(e) = inner.bucket.append(&snapshot)
    {
        inner.fail(e);
        return;
    }

    // Read the backlog and commit the resulting status transition
    // under one `queues` lock acquisition, matching `append`'s
    // lock-then-decide ordering so a non-empty active queue can never
    // be left behind by an engine that just went Cold.
    let sleep_ms = {
        let queues = inner.queues.lock();
        let backlog = queues.active.len();
        if backlog > 0 {
            let sleep_ms = cooldown_duration_ms(&inner.config, backlog);
            inner
                .current_cooldown_ms
                .store(sleep_ms, Ordering::Relaxed);
            *inner.status.lock() = EngineStatus::CoolingDown;
            Some(sleep_ms)
        } else {
            inner.cooldown_events.fetch_add(1, Ordering::Relaxed);
            *inner.status.lock() = EngineStatus::Cold;
            None
        }
    };
    inner.status_changed.notify_waiters();
    if let Some(sleep_ms) = sleep_ms {
        schedule_cooldown(&inner, sleep_ms);
    }

    inner.writer_done.notify_waiters();
}

fn schedule_cooldown(inner: &Arc<Inner>, sleep_ms: u64) {
    let handle = tokio::spawn(run_cooldown(inner.clone(), sleep_ms));
    *inner.cooldown_task.lock() = Some(handle);
}

async fn run_cooldown(inner: Arc<Inner>, sleep_ms: u64) {
    tokio::time::sleep(tokio::time::Duration::from_millis(sleep_ms)).await;
    inner.set_status(EngineStatus::WritingQueued);
    let handle = tokio::spawn(run_writer(inner.clone()));
    *inner.writer_task.lock() = Some(handle);
}

/// `sleep = cooldown_max * max(0, 1 - backlog / high_water_mark)`.
fn cooldown_duration_ms(config: &WriteBufferConfig, backlog: usize) -> u64 {
    if config.high_water_mark == 0 {
        return 0;
    }
    let ratio = backlog as f64 / config.high_water_mark as f64;
    let factor = (1.0 - ratio).max(0.0);
    ((config.cooldown_max_ms as f64) * factor) as u64
}
