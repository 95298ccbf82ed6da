//! Single dispatch thread.
//!
//! Everything asynchronous on the bus (transport notifications, exchange
//! timeouts, vehicle pushes) runs here, one job at a time, in posting order.
//!
//! ```text
//!  transport thread ──┐
//!  caller thread ─────┼──▶ DispatchChannel ──▶ ┌───────────────────────────────┐
//!  dispatch thread ───┘    (bounded, FIFO)     │ dispatch thread               │
//!                                              │  futures_lite::block_on       │
//!                                              │   edge_executor::LocalExecutor│
//!                                              │    ├─ job loop (channel)      │
//!                                              │    └─ timer loop (deadlines)  │
//!                                              └───────────────────────────────┘
//! ```
//!
//! Timers live in one deadline table owned by the timer loop, so any number
//! may be pending while only a single `async_io_mini::Timer` is armed.
//! Cancelling flags the entry and wakes the timer loop, which retires it.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_sync::signal::Signal;
use log::{debug, trace, warn};

use crate::error::{Error, Result};

/// Unit of work executed on the dispatch thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

type WakeSignal = Signal<CriticalSectionRawMutex, ()>;

enum DispatchMsg {
    Run(Job),
    Timer {
        after: Duration,
        cancelled: Arc<AtomicBool>,
        job: Job,
    },
    Shutdown,
}

/// Queue depth between posters and the dispatch thread.
pub const QUEUE_DEPTH: usize = 64;

/// How often a blocked poster re-checks that the dispatch thread is alive.
const LIVENESS_POLL: Duration = Duration::from_millis(20);

type DispatchChannel = Channel<CriticalSectionRawMutex, DispatchMsg, QUEUE_DEPTH>;

/// State shared by the thread and every handle.
struct Shared {
    channel: DispatchChannel,
    /// Re-arms the timer loop after a cancel.
    timer_wake: WakeSignal,
    running: AtomicBool,
}

/// Clears `running` when the dispatch thread exits, panics included.
struct RunningGuard<'a>(&'a Shared);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

// ── Dispatcher ────────────────────────────────────────────────

/// Owns the dispatch thread. Dropping it stops and joins the thread.
pub struct Dispatcher {
    handle: DispatchHandle,
    thread: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn spawn(name: &str) -> Result<Self> {
        let shared = Arc::new(Shared {
            channel: Channel::new(),
            timer_wake: Signal::new(),
            running: AtomicBool::new(true),
        });
        let inner = shared.clone();
        let thread = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || run(&inner))
            .map_err(|_| Error::Dispatch("failed to spawn dispatch thread"))?;
        debug!("Dispatch: thread '{}' started", name);
        Ok(Self {
            handle: DispatchHandle {
                shared,
                thread_id: thread.thread().id(),
            },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if self.handle.send(DispatchMsg::Shutdown).is_err() {
            debug!("Dispatch: thread already stopped");
        }
        if self.handle.is_dispatch_thread() {
            // Joining ourselves would deadlock; the loop exits on Shutdown.
            return;
        }
        if thread.join().is_err() {
            warn!("Dispatch: thread panicked");
        }
    }
}

fn run(shared: &Shared) {
    let _running = RunningGuard(shared);
    let timers = Rc::new(RefCell::new(TimerTable::default()));
    let executor: edge_executor::LocalExecutor<'_, 4> = edge_executor::LocalExecutor::new();

    executor.spawn(timer_loop(shared, timers.clone())).detach();
    futures_lite::future::block_on(executor.run(job_loop(shared, &timers)));
    debug!("Dispatch: thread stopped");
}

async fn job_loop(shared: &Shared, timers: &RefCell<TimerTable>) {
    loop {
        match shared.channel.receive().await {
            DispatchMsg::Run(job) => job(),
            DispatchMsg::Timer {
                after,
                cancelled,
                job,
            } => {
                let Some(at) = Instant::now().checked_add(after) else {
                    trace!("Dispatch: timer beyond the clock range never fires");
                    continue;
                };
                timers.borrow_mut().insert(at, PendingTimer { cancelled, job });
                shared.timer_wake.signal(());
            }
            DispatchMsg::Shutdown => break,
        }
    }
}

async fn timer_loop(shared: &Shared, timers: Rc<RefCell<TimerTable>>) {
    loop {
        let next = {
            let mut table = timers.borrow_mut();
            table.retire_cancelled();
            table.next_deadline()
        };
        let rearm = async {
            shared.timer_wake.wait().await;
            false
        };
        let expired = match next {
            Some(at) => {
                futures_lite::future::or(
                    async {
                        async_io_mini::Timer::at(at).await;
                        true
                    },
                    rearm,
                )
                .await
            }
            None => rearm.await,
        };
        if !expired {
            continue;
        }
        let due = timers.borrow_mut().take_due(Instant::now());
        for timer in due {
            if timer.cancelled.load(Ordering::Acquire) {
                trace!("Dispatch: timer cancelled");
                continue;
            }
            (timer.job)();
        }
    }
}

// ── Timer table ───────────────────────────────────────────────

struct PendingTimer {
    cancelled: Arc<AtomicBool>,
    job: Job,
}

/// Pending timers ordered by deadline, ties broken by scheduling order.
#[derive(Default)]
struct TimerTable {
    next_seq: u64,
    entries: BTreeMap<(Instant, u64), PendingTimer>,
}

impl TimerTable {
    fn insert(&mut self, at: Instant, timer: PendingTimer) {
        self.entries.insert((at, self.next_seq), timer);
        self.next_seq += 1;
    }

    fn retire_cancelled(&mut self) {
        self.entries
            .retain(|_, t| !t.cancelled.load(Ordering::Acquire));
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.entries.first_key_value().map(|((at, _), _)| *at)
    }

    fn take_due(&mut self, now: Instant) -> Vec<PendingTimer> {
        let later = self.entries.split_off(&(now, u64::MAX));
        core::mem::replace(&mut self.entries, later)
            .into_values()
            .collect()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

// ── Handle ────────────────────────────────────────────────────

/// Cheap, cloneable poster onto the dispatch thread.
#[derive(Clone)]
pub struct DispatchHandle {
    shared: Arc<Shared>,
    thread_id: ThreadId,
}

impl DispatchHandle {
    pub fn is_dispatch_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Whether the dispatch thread is still accepting work.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Queue `job`. Blocks a foreign thread while the queue is full; never
    /// blocks the dispatch thread itself. Fails once the thread has stopped.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        self.send(DispatchMsg::Run(Box::new(job)))
    }

    /// Run `job` after `after` unless the returned handle is cancelled first.
    pub fn schedule(
        &self,
        after: Duration,
        job: impl FnOnce() + Send + 'static,
    ) -> Result<TimerHandle> {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.send(DispatchMsg::Timer {
            after,
            cancelled: cancelled.clone(),
            job: Box::new(job),
        })?;
        Ok(TimerHandle {
            cancelled,
            shared: self.shared.clone(),
        })
    }

    /// Wait until every job posted before this call has run.
    pub fn sync(&self) -> Result<()> {
        if self.is_dispatch_thread() {
            return Ok(());
        }
        let done = Arc::new(WakeSignal::new());
        let signal = done.clone();
        self.post(move || signal.signal(()))?;
        let finished = futures_lite::future::block_on(futures_lite::future::or(
            async {
                done.wait().await;
                true
            },
            self.stopped(),
        ));
        if finished {
            Ok(())
        } else {
            Err(Error::Dispatch("dispatch thread stopped"))
        }
    }

    fn send(&self, msg: DispatchMsg) -> Result<()> {
        if !self.is_running() {
            warn!("Dispatch: thread stopped, dropping job");
            return Err(Error::Dispatch("dispatch thread stopped"));
        }
        if self.is_dispatch_thread() {
            return match self.shared.channel.try_send(msg) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    warn!("Dispatch: queue full, dropping job posted from dispatch thread");
                    Err(Error::Dispatch("queue full"))
                }
            };
        }
        let sent = futures_lite::future::block_on(futures_lite::future::or(
            async {
                self.shared.channel.send(msg).await;
                true
            },
            self.stopped(),
        ));
        if sent {
            Ok(())
        } else {
            warn!("Dispatch: thread stopped while queue was full, dropping job");
            Err(Error::Dispatch("dispatch thread stopped"))
        }
    }

    /// Resolves to `false` once the dispatch thread has exited.
    async fn stopped(&self) -> bool {
        while self.is_running() {
            async_io_mini::Timer::after(LIVENESS_POLL).await;
        }
        false
    }
}

/// Cancels a scheduled job. Cancelling after the job ran is a no-op.
#[derive(Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.shared.timer_wake.signal(());
        }
    }
}
