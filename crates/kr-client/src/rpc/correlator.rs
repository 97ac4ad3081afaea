//! Pending-call table
//!
//! Every call gets an id, a deadline and a responder. The entry leaves the
//! table exactly once, by whichever of response, timeout, send failure,
//! cancellation or teardown gets to it first; removal is an atomic take on
//! the `DashMap`, so every other path finds nothing and does nothing.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use kr_core::time::is_expired;
use kr_core::CallError;
use kr_protocol::{Request, RequestId, RpcError};

use super::methods::ApiMethod;
use crate::executor::{DeliveryExecutor, Handoff};
use crate::transport::Transport;

type Responder = Box<dyn FnOnce(Result<Value, CallError>) + Send + 'static>;

struct PendingCall {
    method: String,
    issued_at: Instant,
    deadline: Instant,
    // Mutex makes the table `Sync`; it is never locked, only taken apart by `into_inner`
    responder: Mutex<Responder>,
    executor: Arc<dyn DeliveryExecutor>,
}

impl PendingCall {
    fn complete(self, outcome: Result<Value, CallError>) {
        let responder = self
            .responder
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.executor.execute(Box::new(move || responder(outcome)));
    }
}

/// Receiving end of the outbound request queue, drained by [`run_outbound_pump`]
pub struct OutboundQueue {
    rx: mpsc::UnboundedReceiver<Request>,
}

/// Matches inbound responses to pending calls
pub struct CallCorrelator {
    pending: DashMap<u32, PendingCall>,
    next_id: AtomicU32,
    id_limit: u32,
    closing: AtomicBool,
    default_timeout: Duration,
    outbound: mpsc::UnboundedSender<Request>,
}

impl CallCorrelator {
    /// Create a correlator using the full `u32` id space
    pub fn new(default_timeout: Duration) -> (Arc<Self>, OutboundQueue) {
        Self::with_id_limit(default_timeout, u32::MAX)
    }

    /// Create a correlator whose ids wrap after `id_limit`
    pub fn with_id_limit(default_timeout: Duration, id_limit: u32) -> (Arc<Self>, OutboundQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let correlator = Arc::new(Self {
            pending: DashMap::new(),
            next_id: AtomicU32::new(0),
            id_limit: id_limit.max(1),
            closing: AtomicBool::new(false),
            default_timeout,
            outbound: tx,
        });
        (correlator, OutboundQueue { rx })
    }

    /// Timeout applied when the caller gives none
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Number of calls awaiting a response
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether teardown has begun
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Issue a typed call; `callback` runs on `executor`
    pub fn call<M, F>(
        &self,
        params: M::Params,
        timeout: Duration,
        executor: Arc<dyn DeliveryExecutor>,
        callback: F,
    ) -> Option<RequestId>
    where
        M: ApiMethod,
        F: FnOnce(Result<M::Output, CallError>) + Send + 'static,
    {
        let params = match serde_json::to_value(params) {
            Ok(params) => params,
            Err(e) => {
                let err = CallError::Encode(e.to_string());
                executor.execute(Box::new(move || callback(Err(err))));
                return None;
            }
        };

        self.call_raw(M::NAME, params, timeout, executor, move |outcome| {
            callback(outcome.and_then(|value| {
                serde_json::from_value(value).map_err(|e| CallError::Decode(e.to_string()))
            }))
        })
    }

    /// Issue an untyped call.
    ///
    /// Returns the id the call was sent under, or `None` if it failed before
    /// being sent (the callback has then already been scheduled).
    pub fn call_raw<F>(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
        executor: Arc<dyn DeliveryExecutor>,
        callback: F,
    ) -> Option<RequestId>
    where
        F: FnOnce(Result<Value, CallError>) + Send + 'static,
    {
        if self.is_closing() {
            tracing::debug!(method, "Call issued after teardown began");
            executor.execute(Box::new(move || callback(Err(CallError::Cancelled))));
            return None;
        }

        let now = Instant::now();
        let call = PendingCall {
            method: method.to_string(),
            issued_at: now,
            deadline: now + timeout,
            responder: Mutex::new(Box::new(callback)),
            executor,
        };

        let id = match self.insert(call) {
            Ok(id) => id,
            Err(call) => {
                let limit = self.id_limit as usize;
                call.complete(Err(CallError::TooManyPending(limit)));
                return None;
            }
        };

        // Teardown may have drained the table between the check and insert
        if self.is_closing() {
            self.fail(id, CallError::Cancelled);
            return None;
        }

        tracing::debug!(id, method, "Sending call");
        let request = Request::new(RequestId(id), method, params);
        if self.outbound.send(request).is_err() {
            self.fail(id, CallError::Connection(kr_core::ConnectionError::Closed));
            return None;
        }

        Some(RequestId(id))
    }

    /// Typed call awaited in place.
    ///
    /// The awaiting task resumes once `executor` runs the completion, so it
    /// observes everything the executor delivered before the response.
    pub async fn request<M: ApiMethod>(
        &self,
        params: M::Params,
        timeout: Duration,
        executor: Arc<dyn DeliveryExecutor>,
    ) -> Result<M::Output, CallError> {
        let (tx, rx) = oneshot::channel();
        self.call::<M, _>(params, timeout, executor, move |outcome| {
            let _ = tx.send(outcome);
        });
        rx.await.unwrap_or(Err(CallError::Cancelled))
    }

    /// Untyped call awaited in place, completed through `executor`
    pub async fn request_raw(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
        executor: Arc<dyn DeliveryExecutor>,
    ) -> Result<Value, CallError> {
        let (tx, rx) = oneshot::channel();
        self.call_raw(method, params, timeout, executor, move |outcome| {
            let _ = tx.send(outcome);
        });
        rx.await.unwrap_or(Err(CallError::Cancelled))
    }

    fn next_candidate(&self) -> u32 {
        let limit = self.id_limit;
        let advance = |cur: u32| if cur >= limit { 1 } else { cur + 1 };
        let prev = self
            .next_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| Some(advance(cur)))
            .unwrap_or_else(|cur| cur);
        advance(prev)
    }

    /// Insert under a fresh id, skipping ids still pending after wraparound
    fn insert(&self, call: PendingCall) -> Result<u32, PendingCall> {
        for _ in 0..self.id_limit {
            let id = self.next_candidate();
            if let Entry::Vacant(slot) = self.pending.entry(id) {
                slot.insert(call);
                return Ok(id);
            }
            tracing::trace!(id, "Skipping id still in flight");
        }
        Err(call)
    }

    /// Route a response to its pending call
    pub fn handle_response(&self, id: RequestId, outcome: Result<Value, RpcError>) {
        match self.pending.remove(&id.as_u32()) {
            Some((_, call)) => {
                tracing::debug!(
                    id = id.as_u32(),
                    method = %call.method,
                    elapsed = ?call.issued_at.elapsed(),
                    "Response received"
                );
                call.complete(outcome.map_err(CallError::Protocol));
            }
            None => {
                tracing::debug!(id = id.as_u32(), "Dropping response for unknown or expired call");
            }
        }
    }

    /// Fail a pending call. No-op if it already completed.
    pub fn fail(&self, id: u32, error: CallError) -> bool {
        match self.pending.remove(&id) {
            Some((_, call)) => {
                call.complete(Err(error));
                true
            }
            None => false,
        }
    }

    /// Cancel a call in flight; its callback receives `Cancelled`.
    ///
    /// Returns `false` if the call already completed.
    pub fn cancel(&self, id: RequestId) -> bool {
        self.fail(id.as_u32(), CallError::Cancelled)
    }

    /// Expire calls whose deadline has passed and return how many expired.
    ///
    /// Uses the tokio clock so paused-time tests drive expiry.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let expired: Vec<u32> = self
            .pending
            .iter()
            .filter(|entry| is_expired(entry.deadline.into_std(), now.into_std()))
            .map(|entry| *entry.key())
            .collect();

        let mut count = 0;
        for id in expired {
            if let Some((_, call)) = self
                .pending
                .remove_if(&id, |_, call| is_expired(call.deadline.into_std(), now.into_std()))
            {
                let after = call.deadline.saturating_duration_since(call.issued_at);
                tracing::warn!(id, method = %call.method, "Call timed out after {:?}", after);
                let method = call.method.clone();
                call.complete(Err(CallError::Timeout { method, after }));
                count += 1;
            }
        }
        count
    }

    /// Begin teardown: refuse new calls and fail every pending one with `reason`
    pub fn close(&self, reason: CallError) -> usize {
        self.closing.store(true, Ordering::SeqCst);

        let ids: Vec<u32> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut count = 0;
        for id in ids {
            if self.fail(id, reason.clone()) {
                count += 1;
            }
        }

        if count > 0 {
            tracing::debug!("Failed {} pending calls on teardown: {}", count, reason);
        }
        count
    }
}

/// Drain the outbound queue into the transport.
///
/// Push transports are written in submission order. Request-response
/// transports run each request on its own task and feed the reply back
/// through `on_reply`.
pub async fn run_outbound_pump<F>(
    correlator: Arc<CallCorrelator>,
    mut queue: OutboundQueue,
    transport: Arc<dyn Transport>,
    on_reply: F,
    cancel: CancellationToken,
) where
    F: Fn(String) + Clone + Send + Sync + 'static,
{
    let push = transport.mode().supports_push();

    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = queue.rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let id = request.id.as_u32();
        let frame = match request.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                correlator.fail(id, CallError::Encode(e.to_string()));
                continue;
            }
        };

        if push {
            // A host that stops reading must not stall teardown
            let sent = tokio::select! {
                _ = cancel.cancelled() => break,
                sent = transport.send(frame) => sent,
            };
            if let Err(e) = sent {
                tracing::warn!(id, "Failed to send call: {}", e);
                correlator.fail(id, CallError::Connection(e));
            }
            continue;
        }

        let correlator = correlator.clone();
        let transport = transport.clone();
        let on_reply = on_reply.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = transport.send(frame) => match result {
                    Ok(Some(reply)) => on_reply(reply),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(id, "Request failed: {}", e);
                        correlator.fail(id, CallError::Connection(e));
                    }
                },
            }
        });
    }

    tracing::debug!("Outbound pump stopped");
}

/// Periodically expire overdue calls until cancelled
pub async fn run_timeout_sweep(
    correlator: Arc<CallCorrelator>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                correlator.sweep_expired(Instant::now());
            }
            _ = cancel.cancelled() => break,
        }
    }
}
