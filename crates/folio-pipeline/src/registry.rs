//! Correlation and timeout tracking for in-flight submissions.
//!
//! The registry is the only concurrently-mutated structure in the
//! coordinator. It maps each in-flight request id to a pending-completion
//! handle with a deadline, and guarantees that exactly one of
//! {resolve, sweep-timeout} wins per id: both remove the entry under the
//! lock before waking the waiter, so the loser finds nothing and is a no-op.
//!
//! Duplicate completions from the at-least-once bus therefore resolve to
//! `false` and are harmless.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

use folio_core::RequestId;

use crate::envelope::CompletionEnvelope;
use crate::error::{Error, Result};

/// How a pending request finished waiting.
#[derive(Debug)]
pub enum CompletionOutcome {
    /// A completion envelope arrived for the request id.
    Resolved(CompletionEnvelope),
    /// The deadline elapsed before any completion arrived.
    TimedOut,
}

#[derive(Debug)]
struct PendingEntry {
    deadline: DateTime<Utc>,
    tx: oneshot::Sender<CompletionOutcome>,
}

/// Converts a lock poison error to a registry error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::registry("pending registry lock poisoned")
}

/// Removes an entry without waking its waiter. Shared by the registry and
/// by waiter drop-guards.
fn remove_entry(entries: &Mutex<HashMap<RequestId, PendingEntry>>, request_id: &RequestId) -> bool {
    entries
        .lock()
        .ok()
        .and_then(|mut entries| entries.remove(request_id))
        .is_some()
}

/// In-memory map from request id to pending-completion handle.
///
/// State lives behind an inner `Arc` so that waiters can unregister
/// themselves on drop without holding a handle to the registry itself.
#[derive(Debug, Default)]
pub struct PendingRegistry {
    entries: Arc<Mutex<HashMap<RequestId, PendingEntry>>>,
}

impl PendingRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending request and returns its waiter.
    ///
    /// # Errors
    ///
    /// Returns an error if the request id already has a live entry —
    /// request ids are never reused, so this indicates a caller bug.
    pub fn register(&self, request_id: RequestId, deadline: DateTime<Utc>) -> Result<Waiter> {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries.lock().map_err(poison_err)?;
        if entries.contains_key(&request_id) {
            return Err(Error::registry(format!(
                "duplicate pending request: {request_id}"
            )));
        }
        entries.insert(request_id, PendingEntry { deadline, tx });
        drop(entries);

        Ok(Waiter {
            request_id,
            entries: Arc::clone(&self.entries),
            rx: Some(rx),
            on_cancel: None,
        })
    }

    /// Wakes the waiter for `request_id` with a completion.
    ///
    /// Returns `false` if no entry exists — the completion is a duplicate or
    /// arrived after the request was resolved, timed out, or cancelled.
    /// Callers treat `false` as a harmless no-op.
    pub fn resolve(&self, request_id: &RequestId, completion: CompletionEnvelope) -> bool {
        let entry = self
            .entries
            .lock()
            .ok()
            .and_then(|mut entries| entries.remove(request_id));

        match entry {
            Some(entry) => {
                // The waiter may already be gone (caller cancelled); the send
                // failing is fine either way.
                let _ = entry.tx.send(CompletionOutcome::Resolved(completion));
                true
            }
            None => false,
        }
    }

    /// Removes the entry for `request_id` without waking its waiter.
    ///
    /// Returns `false` if no entry exists.
    pub fn remove(&self, request_id: &RequestId) -> bool {
        remove_entry(&self.entries, request_id)
    }

    /// Expires every entry whose deadline is at or before `now`.
    ///
    /// Each expired waiter is woken with [`CompletionOutcome::TimedOut`].
    /// Safe to run concurrently with [`PendingRegistry::resolve`] for the
    /// same id: entries are removed atomically before waking, so exactly one
    /// of the two wins.
    ///
    /// Returns the number of entries expired.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<PendingEntry> = match self.entries.lock() {
            Ok(mut entries) => {
                let ids: Vec<RequestId> = entries
                    .iter()
                    .filter(|(_, entry)| entry.deadline <= now)
                    .map(|(id, _)| *id)
                    .collect();
                ids.iter().filter_map(|id| entries.remove(id)).collect()
            }
            Err(_) => return 0,
        };

        let count = expired.len();
        for entry in expired {
            let _ = entry.tx.send(CompletionOutcome::TimedOut);
        }
        count
    }

    /// Returns the number of in-flight pending requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    /// Returns true if no requests are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every pending entry, waking each waiter with a closed channel.
    ///
    /// Waiters observe this as a coordinator shutdown.
    pub fn close(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

/// Suspension handle for one pending request.
///
/// Dropping a waiter before it completes (caller cancellation) removes the
/// registry entry and runs the configured cancel cleanup; in-flight worker
/// processing is unaffected — the coordinator only stops waiting.
pub struct Waiter {
    request_id: RequestId,
    entries: Arc<Mutex<HashMap<RequestId, PendingEntry>>>,
    rx: Option<oneshot::Receiver<CompletionOutcome>>,
    on_cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Waiter {
    /// Returns the request id this waiter is correlated to.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Installs a cleanup hook that runs if the waiter is dropped while its
    /// entry is still pending.
    #[must_use]
    pub fn with_cancel_cleanup(mut self, cleanup: impl FnOnce() + Send + 'static) -> Self {
        self.on_cancel = Some(Box::new(cleanup));
        self
    }

    /// Suspends until the request resolves, times out, or the registry
    /// closes.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry was closed before an outcome arrived.
    pub async fn wait(mut self) -> Result<CompletionOutcome> {
        let rx = self
            .rx
            .take()
            .ok_or_else(|| Error::registry("waiter polled twice"))?;
        let outcome = rx
            .await
            .map_err(|_| Error::registry("registry closed before completion"));
        // Whatever happened, this is no longer a cancellation.
        self.on_cancel = None;
        outcome
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let was_pending = remove_entry(&self.entries, &self.request_id);
        if was_pending {
            if let Some(cleanup) = self.on_cancel.take() {
                cleanup();
            }
        }
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}
