//! Pending-request table keyed by correlation id.
//!
//! Every registered id is completed exactly once: by the matching reply
//! ([`Correlator::resolve`]), by the socket going away
//! ([`Correlator::fail_all`]), or silently by the caller giving up
//! ([`Correlator::deregister`]).  Replies for ids nobody waits for are
//! dropped.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use nw_protocol::{RequestId, RpcResponse};

use crate::error::RpcError;

type Completion = oneshot::Sender<Result<RpcResponse, RpcError>>;

/// Receiving half handed to the caller on [`Correlator::register`].
pub type PendingReply = oneshot::Receiver<Result<RpcResponse, RpcError>>;

pub struct Correlator {
    inner: Mutex<Inner>,
    max_pending: usize,
}

struct Inner {
    waiters: HashMap<RequestId, Completion>,
    /// Set once by `fail_all`; later registrations fail with it.
    closed: Option<RpcError>,
}

impl Correlator {
    pub fn new(max_pending: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                waiters: HashMap::new(),
                closed: None,
            }),
            max_pending,
        }
    }

    /// Start waiting for the reply to `id`.
    pub fn register(&self, id: RequestId) -> Result<PendingReply, RpcError> {
        let mut inner = self.inner.lock();
        if let Some(err) = &inner.closed {
            return Err(err.clone());
        }
        if inner.waiters.len() >= self.max_pending {
            return Err(RpcError::TooManyPending(self.max_pending));
        }
        if inner.waiters.contains_key(&id) {
            return Err(RpcError::DuplicateId(id));
        }
        let (tx, rx) = oneshot::channel();
        inner.waiters.insert(id, tx);
        Ok(rx)
    }

    /// Hand a reply to its waiter.  Returns `false` when the id is unknown
    /// (never registered, already completed, or the caller gave up).
    pub fn resolve(&self, response: RpcResponse) -> bool {
        let Some(id) = response.id.clone() else {
            return false;
        };
        let waiter = self.inner.lock().waiters.remove(&id);
        match waiter {
            Some(tx) => {
                // The receiver may have been dropped in the meantime; the
                // entry is gone either way.
                let _ = tx.send(Ok(response));
                true
            }
            None => {
                tracing::debug!(%id, "dropping reply with no pending request");
                false
            }
        }
    }

    /// Forget a waiter without completing it.
    pub fn deregister(&self, id: &RequestId) -> bool {
        self.inner.lock().waiters.remove(id).is_some()
    }

    /// Fail every pending request with `error` and refuse new ones.
    /// Returns how many requests were failed.
    pub fn fail_all(&self, error: RpcError) -> usize {
        let drained: Vec<Completion> = {
            let mut inner = self.inner.lock();
            if inner.closed.is_none() {
                inner.closed = Some(error.clone());
            }
            inner.waiters.drain().map(|(_, tx)| tx).collect()
        };
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(error.clone()));
        }
        if count > 0 {
            tracing::debug!(count, error = %error, "failed pending requests");
        }
        count
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed.is_some()
    }

    pub fn pending_ids(&self) -> Vec<RequestId> {
        self.inner.lock().waiters.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
