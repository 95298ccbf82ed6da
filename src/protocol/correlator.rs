//! Request/response correlation.
//!
//! Each outgoing request gets a fresh positive id and a pending entry; the
//! matching response (or the timeout) removes that entry. Removal is the
//! single point of truth: whichever path removes the entry first delivers
//! the outcome, the other finds nothing and does nothing.
//!
//! ```text
//!  begin ──▶ Created ──set ok──▶ Sent ──response──▶ Responded (OK | WRONG_RESPONSE_SHAPE)
//!              │                   └───timer─────▶ TimedOut
//!              └──set failed────────────────────▶ SendFailed
//!  begin while same kind pending ───────────────▶ RejectedConcurrent
//! ```
//!
//! Only one exchange per response kind may be in flight; a second request
//! of that kind is rejected, not queued.

use core::fmt::Debug;
use core::hash::Hash;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::dispatch::{DispatchHandle, TimerHandle};

/// Terminal outcome of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeStatus {
    Ok,
    SendFailed,
    TimedOut,
    WrongResponseShape,
    RejectedConcurrent,
}

/// Invoked exactly once per exchange with its outcome.
pub type ExchangeCallback<R> = Box<dyn FnOnce(ExchangeStatus, Option<R>) + Send>;

/// An in-flight exchange, removed from the table and ready to be resolved.
#[must_use = "a taken request must be finished"]
pub struct PendingRequest<Q, R, K> {
    request_id: i32,
    kind: K,
    original: Option<Q>,
    callback: ExchangeCallback<R>,
    timer: Option<TimerHandle>,
}

impl<Q, R, K: Copy> PendingRequest<Q, R, K> {
    pub fn request_id(&self) -> i32 {
        self.request_id
    }

    pub fn kind(&self) -> K {
        self.kind
    }

    /// Request kept for validating the response, if any.
    pub fn original(&self) -> Option<&Q> {
        self.original.as_ref()
    }

    pub fn finish(self, status: ExchangeStatus, response: Option<R>) {
        if let Some(timer) = self.timer {
            timer.cancel();
        }
        (self.callback)(status, response);
    }
}

pub struct Correlator<Q, R, K> {
    name: &'static str,
    next_id: AtomicI32,
    pending: Mutex<HashMap<i32, PendingRequest<Q, R, K>>>,
    dispatch: DispatchHandle,
}

impl<Q, R, K> Correlator<Q, R, K>
where
    Q: Send + 'static,
    R: Send + 'static,
    K: Copy + Eq + Hash + Debug + Send + 'static,
{
    pub fn new(name: &'static str, dispatch: DispatchHandle) -> Arc<Self> {
        Arc::new(Self {
            name,
            next_id: AtomicI32::new(1),
            pending: Mutex::new(HashMap::new()),
            dispatch,
        })
    }

    /// Next request id: positive, increasing, wrapping back to 1.
    pub fn next_request_id(&self) -> i32 {
        match self
            .next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| {
                Some(if id == i32::MAX { 1 } else { id + 1 })
            }) {
            Ok(id) | Err(id) => id,
        }
    }

    /// Register a new exchange of `kind` and arm its timeout.
    ///
    /// Returns the request id to send, or `None` if the exchange already
    /// ended (rejected as concurrent, or the timer could not be armed); the
    /// callback has been invoked in that case.
    pub fn begin(
        self: &Arc<Self>,
        kind: K,
        original: Option<Q>,
        timeout: Duration,
        callback: ExchangeCallback<R>,
    ) -> Option<i32> {
        let request_id = {
            let mut pending = self.pending.lock();
            let busy = pending
                .values()
                .find(|p| p.kind == kind)
                .map(|p| p.request_id);
            if let Some(busy) = busy {
                drop(pending);
                warn!(
                    "{}: {:?} request already pending (id {}), rejecting",
                    self.name, kind, busy
                );
                callback(ExchangeStatus::RejectedConcurrent, None);
                return None;
            }
            let request_id = self.next_request_id();
            pending.insert(
                request_id,
                PendingRequest {
                    request_id,
                    kind,
                    original,
                    callback,
                    timer: None,
                },
            );
            request_id
        };

        let weak = Arc::downgrade(self);
        let scheduled = self.dispatch.schedule(timeout, move || {
            if let Some(correlator) = weak.upgrade() {
                correlator.on_timeout(request_id);
            }
        });
        match scheduled {
            Ok(timer) => {
                let mut pending = self.pending.lock();
                match pending.get_mut(&request_id) {
                    Some(p) => p.timer = Some(timer),
                    None => timer.cancel(),
                }
            }
            Err(e) => {
                warn!("{}: could not arm timeout for {}: {}", self.name, request_id, e);
                self.fail_send(request_id);
                return None;
            }
        }
        debug!(
            "{}: {:?} request {} pending ({:?})",
            self.name, kind, request_id, timeout
        );
        Some(request_id)
    }

    /// The set carrying `request_id` failed.
    pub fn fail_send(&self, request_id: i32) {
        if let Some(p) = self.take(request_id) {
            p.finish(ExchangeStatus::SendFailed, None);
        }
    }

    /// Remove the exchange a response belongs to. `None` when it already
    /// ended or never existed.
    pub fn take(&self, request_id: i32) -> Option<PendingRequest<Q, R, K>> {
        self.pending.lock().remove(&request_id)
    }

    fn on_timeout(&self, request_id: i32) {
        match self.take(request_id) {
            Some(p) => {
                warn!("{}: {:?} request {} timed out", self.name, p.kind, request_id);
                p.finish(ExchangeStatus::TimedOut, None);
            }
            None => trace!("{}: timeout for finished request {}", self.name, request_id),
        }
    }

    pub fn has_pending(&self, kind: K) -> bool {
        self.pending.lock().values().any(|p| p.kind == kind)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Resolve everything still in flight as timed out.
    pub fn release(&self) {
        let drained: Vec<PendingRequest<Q, R, K>> =
            self.pending.lock().drain().map(|(_, p)| p).collect();
        if !drained.is_empty() {
            debug!("{}: releasing {} pending requests", self.name, drained.len());
        }
        for p in drained {
            p.finish(ExchangeStatus::TimedOut, None);
        }
    }
}
