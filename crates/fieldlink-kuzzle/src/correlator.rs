//! Pending-request table mapping outstanding requestIds to continuations.
//!
//! The table is owned exclusively by the [`DeviceLink`](crate::client::DeviceLink)
//! run loop; there is no interior locking because nothing else may touch it.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::envelope::ResponseEnvelope;
use crate::error::{LinkError, Result};

/// Continuation invoked with the matching response envelope.
pub type Continuation = Box<dyn FnOnce(ResponseEnvelope) + Send>;

/// Maps outstanding request identifiers to pending continuations.
#[derive(Default)]
pub struct RequestCorrelator {
    pending: HashMap<String, Continuation>,
}

impl RequestCorrelator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a pending continuation under `request_id`.
    ///
    /// # Errors
    /// Returns `LinkError::DuplicateRequestId` if that id is already
    /// pending.
    pub fn register(
        &mut self,
        request_id: impl Into<String>,
        continuation: Continuation,
    ) -> Result<()> {
        let request_id = request_id.into();
        if self.pending.contains_key(&request_id) {
            return Err(LinkError::DuplicateRequestId(request_id));
        }
        self.pending.insert(request_id, continuation);
        Ok(())
    }

    /// Remove and invoke the continuation registered under `request_id`.
    ///
    /// Returns whether a match was found. Unmatched responses are not an
    /// error; unsolicited subscription notifications never pass through
    /// this table.
    pub fn resolve(&mut self, request_id: &str, response: ResponseEnvelope) -> bool {
        match self.pending.remove(request_id) {
            Some(continuation) => {
                continuation(response);
                true
            }
            None => false,
        }
    }

    /// Whether `request_id` has a pending continuation.
    #[must_use]
    pub fn is_pending(&self, request_id: &str) -> bool {
        self.pending.contains_key(request_id)
    }

    /// Drop every pending continuation without invoking it.
    ///
    /// Called on disconnect: in-flight correlated requests are lost, by
    /// contract. Returns how many were dropped so the caller can log it.
    pub fn drain_and_drop(&mut self) -> usize {
        let dropped = self.pending.len();
        if dropped > 0 {
            debug!(dropped, "Dropping pending correlated requests");
        }
        self.pending.clear();
        dropped
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl fmt::Debug for RequestCorrelator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCorrelator")
            .field("pending", &self.pending.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn response(status: i64) -> ResponseEnvelope {
        serde_json::from_value(serde_json::json!({ "status": status })).unwrap()
    }

    #[test]
    fn test_resolve_invokes_only_matching_continuation() {
        let mut correlator = RequestCorrelator::new();
        let x_calls = Arc::new(AtomicUsize::new(0));
        let y_calls = Arc::new(AtomicUsize::new(0));

        let x = x_calls.clone();
        correlator
            .register("X", Box::new(move |_| drop(x.fetch_add(1, Ordering::SeqCst))))
            .unwrap();
        let y = y_calls.clone();
        correlator
            .register("Y", Box::new(move |_| drop(y.fetch_add(1, Ordering::SeqCst))))
            .unwrap();

        assert!(correlator.resolve("X", response(200)));
        assert_eq!(x_calls.load(Ordering::SeqCst), 1);
        assert_eq!(y_calls.load(Ordering::SeqCst), 0);
        assert!(correlator.is_pending("Y"));
        assert!(!correlator.is_pending("X"));
    }

    #[test]
    fn test_duplicate_request_id_rejected() {
        let mut correlator = RequestCorrelator::new();
        correlator.register("X", Box::new(|_| {})).unwrap();
        assert!(matches!(
            correlator.register("X", Box::new(|_| {})),
            Err(LinkError::DuplicateRequestId(_))
        ));
    }

    #[test]
    fn test_unmatched_response_is_not_an_error() {
        let mut correlator = RequestCorrelator::new();
        assert!(!correlator.resolve("nobody", response(200)));
    }

    #[test]
    fn test_drain_drops_without_invoking() {
        let mut correlator = RequestCorrelator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        correlator
            .register("X", Box::new(move |_| drop(c.fetch_add(1, Ordering::SeqCst))))
            .unwrap();
        correlator.register("Y", Box::new(|_| {})).unwrap();

        assert_eq!(correlator.drain_and_drop(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(correlator.is_empty());

        // The ids are reusable afterwards
        correlator.register("X", Box::new(|_| {})).unwrap();
    }
}
