use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::channel::{Channel, ChannelConfig};
use crate::connector::Connector;
use crate::endpoint::Endpoint;
use crate::metrics::MetricsListener;
use crate::result::{Error, Result};

const BACKOFF_FLOOR_SECS: u64 = 1;
const BACKOFF_CEILING_SECS: u64 = 60;

/// Shared dial back-off.
///
/// The delay reflects endpoint health, so it is shared by every connection
/// attempt of one factory rather than tracked per pool slot. It starts at
/// zero, doubles on failure within `[1s, 60s]`, and resets on success.
pub(crate) struct Backoff {
    delay_secs: AtomicU64,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Self {
            delay_secs: AtomicU64::new(0),
        }
    }

    pub(crate) fn current(&self) -> Duration {
        Duration::from_secs(self.delay_secs.load(Ordering::Acquire))
    }

    pub(crate) fn record_failure(&self) {
        let mut current = self.delay_secs.load(Ordering::Acquire);
        loop {
            let next = (current * 2).clamp(BACKOFF_FLOOR_SECS, BACKOFF_CEILING_SECS);
            match self.delay_secs.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    pub(crate) fn record_success(&self) {
        self.delay_secs.store(0, Ordering::Release);
    }
}

/// Establishes authenticated HTTP/2 connections to one endpoint.
pub(crate) struct ChannelFactory {
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    ping_interval: Duration,
    ping_timeout: Duration,
    idle_timeout: Option<Duration>,
    metrics: Arc<dyn MetricsListener>,
    backoff: Backoff,
    next_id: AtomicU64,
}

impl ChannelFactory {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        endpoint: Endpoint,
        connector: Arc<dyn Connector>,
        connect_timeout: Duration,
        ping_interval: Duration,
        ping_timeout: Duration,
        idle_timeout: Option<Duration>,
        metrics: Arc<dyn MetricsListener>,
    ) -> Self {
        Self {
            endpoint,
            connector,
            connect_timeout,
            ping_interval,
            ping_timeout,
            idle_timeout,
            metrics,
            backoff: Backoff::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Dials, handshakes, and returns a ready channel.
    ///
    /// The dial is scheduled after the current back-off delay; the connect
    /// timeout covers the dial, the TLS handshake, and the HTTP/2 SETTINGS
    /// exchange.
    pub(crate) async fn create(&self) -> Result<Arc<Channel>> {
        let delay = self.backoff.current();
        if !delay.is_zero() {
            trace!(?delay, "delaying connection attempt");
            tokio::time::sleep(delay).await;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(id, endpoint = %self.endpoint, "connecting");

        let result = tokio::time::timeout(self.connect_timeout, self.handshake(id)).await;
        match result {
            Ok(Ok(channel)) => {
                self.backoff.record_success();
                debug!(id, "connection ready");
                Ok(channel)
            }
            Ok(Err(error)) => {
                self.backoff.record_failure();
                debug!(id, %error, "connection failed");
                self.metrics.connection_create_failed(&error);
                Err(error)
            }
            Err(_) => {
                self.backoff.record_failure();
                let error = Error::ConnectTimeout;
                debug!(id, "connection attempt timed out");
                self.metrics.connection_create_failed(&error);
                Err(error)
            }
        }
    }

    async fn handshake(&self, id: u64) -> Result<Arc<Channel>> {
        let io = self.connector.connect(&self.endpoint).await?;
        let (send, connection) = h2::client::handshake(io).await?;

        let config = ChannelConfig {
            authority: self.endpoint.authority(),
            ping_interval: self.ping_interval,
            ping_timeout: self.ping_timeout,
            idle_timeout: self.idle_timeout,
        };

        Ok(Arc::new(Channel::start(
            id,
            send,
            connection,
            config,
            self.metrics.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_saturates() {
        let backoff = Backoff::new();
        assert_eq!(backoff.current(), Duration::ZERO);

        let expected = [1, 2, 4, 8, 16, 32, 60, 60];
        for secs in expected {
            backoff.record_failure();
            assert_eq!(backoff.current(), Duration::from_secs(secs));
        }
    }

    #[test]
    fn backoff_resets_on_success() {
        let backoff = Backoff::new();
        backoff.record_failure();
        backoff.record_failure();
        assert_eq!(backoff.current(), Duration::from_secs(2));

        backoff.record_success();
        assert_eq!(backoff.current(), Duration::ZERO);

        backoff.record_failure();
        assert_eq!(backoff.current(), Duration::from_secs(1));
    }
}
