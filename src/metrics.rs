use std::time::Duration;

use uuid::Uuid;

use crate::response::Response;
use crate::result::Error;

/// Observer of client internals, for wiring up metrics.
///
/// All hooks default to no-ops; implement the ones you care about. Hooks run
/// inline on the I/O tasks, so implementations must not block — hand the
/// data off to your metrics pipeline and return.
///
/// The listener is installed once at build time and outlives the client.
pub trait MetricsListener: Send + Sync {
    /// A notification was written to a stream.
    fn notification_sent(&self, apns_id: Option<Uuid>) {
        let _ = apns_id;
    }

    /// A notification could not be written; its send failed with `error`.
    fn write_failed(&self, error: &Error) {
        let _ = error;
    }

    /// The server accepted a notification.
    fn notification_accepted(&self, response: &Response, round_trip: Duration) {
        let _ = (response, round_trip);
    }

    /// The server rejected a notification.
    fn notification_rejected(&self, response: &Response, round_trip: Duration) {
        let _ = (response, round_trip);
    }

    /// A connection finished its handshake and joined the pool.
    fn connection_added(&self) {}

    /// A connection left the pool (drained, failed, or the pool closed).
    fn connection_removed(&self) {}

    /// A connection attempt failed; the next one is subject to back-off.
    fn connection_create_failed(&self, error: &Error) {
        let _ = error;
    }
}

/// Listener used when none is configured.
pub(crate) struct NoopListener;

impl MetricsListener for NoopListener {}
