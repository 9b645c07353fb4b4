//! Response lifecycle tracking.
//!
//! At most one response is ever in flight. The tracker records the opaque id
//! the remote assigns on `response.created` and clears it on completion,
//! cancellation, or a buffer-clear. Its only consumer-facing question is
//! whether sending a cancel instruction is meaningful right now.

/// Minimal state machine for the in-flight response record.
#[derive(Debug, Default)]
pub struct ResponseLifecycle {
    in_flight: Option<String>,
}

impl ResponseLifecycle {
    /// Create an idle tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record generation start. If a response is already tracked the new id
    /// replaces it - the remote is authoritative, this is a defensive
    /// overwrite rather than a stacking counter.
    pub fn on_started(&mut self, id: impl Into<String>) {
        let id = id.into();
        if let Some(ref previous) = self.in_flight {
            tracing::warn!(previous = %previous, new = %id, "Response started while another was tracked");
        }
        self.in_flight = Some(id);
    }

    /// Record generation end. Idempotent when already idle.
    pub fn on_ended(&mut self) {
        self.in_flight = None;
    }

    /// True iff a response is in flight, i.e. a cancel instruction would be
    /// meaningful on the wire.
    pub fn should_send_cancel(&self) -> bool {
        self.in_flight.is_some()
    }

    /// The tracked response id, if any.
    pub fn current_id(&self) -> Option<&str> {
        self.in_flight.as_deref()
    }
}
