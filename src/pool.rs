use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::debug;

use crate::channel::Channel;
use crate::factory::ChannelFactory;
use crate::metrics::MetricsListener;
use crate::result::{Error, Result};

/// Fixed-capacity pool of HTTP/2 channels to one endpoint.
///
/// Channels are created lazily, on demand, by the factory. Acquirers are
/// served strictly first-come-first-served; a channel that turns out to be
/// draining or closed is discarded on the next touch and replaced lazily.
pub(crate) struct Pool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    factory: Arc<ChannelFactory>,
    capacity: usize,
    metrics: Arc<dyn MetricsListener>,
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    idle: VecDeque<Arc<Channel>>,
    waiters: VecDeque<oneshot::Sender<Result<Arc<Channel>>>>,
    /// Channels produced by the factory and not yet discarded, whether idle
    /// or held. Never exceeds `capacity` together with `creating`.
    total: usize,
    creating: usize,
    closed: bool,
}

impl Pool {
    pub(crate) fn new(
        factory: ChannelFactory,
        capacity: usize,
        metrics: Arc<dyn MetricsListener>,
    ) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                factory: Arc::new(factory),
                capacity,
                metrics,
                inner: Mutex::new(PoolInner {
                    idle: VecDeque::new(),
                    waiters: VecDeque::new(),
                    total: 0,
                    creating: 0,
                    closed: false,
                }),
            }),
        }
    }

    /// Leases a ready channel, waiting for creation or a release if none is
    /// idle. The lease returns the channel on drop.
    pub(crate) async fn acquire(&self) -> Result<PoolGuard> {
        loop {
            let rx = {
                let mut inner = self.shared.inner.lock().unwrap();
                if inner.closed {
                    return Err(Error::Closed);
                }

                while let Some(channel) = inner.idle.pop_front() {
                    if channel.is_ready() {
                        return Ok(PoolGuard {
                            channel: Some(channel),
                            shared: self.shared.clone(),
                        });
                    }
                    inner.total -= 1;
                    self.shared.metrics.connection_removed();
                    debug!(id = channel.id(), "dropping dead idle connection");
                }

                let (tx, rx) = oneshot::channel();
                inner.waiters.push_back(tx);
                self.shared.maybe_spawn_create(&mut inner);
                rx
            };

            match rx.await {
                Ok(Ok(channel)) => {
                    if channel.is_ready() {
                        return Ok(PoolGuard {
                            channel: Some(channel),
                            shared: self.shared.clone(),
                        });
                    }
                    // Died between release and hand-off; recycle and requeue.
                    self.shared.release(channel);
                }
                Ok(Err(error)) => return Err(error),
                Err(_) => return Err(Error::Closed),
            }
        }
    }

    /// Fails pending acquirers and starts draining idle channels. Channels
    /// currently held finish their in-flight streams and are discarded on
    /// release.
    pub(crate) fn close(&self) {
        let (waiters, idle) = {
            let mut inner = self.shared.inner.lock().unwrap();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.total -= inner.idle.len();
            (
                inner.waiters.drain(..).collect::<Vec<_>>(),
                inner.idle.drain(..).collect::<Vec<_>>(),
            )
        };

        for waiter in waiters {
            let _ = waiter.send(Err(Error::Closed));
        }
        for channel in idle {
            self.shared.metrics.connection_removed();
            channel.begin_drain();
        }
    }
}

impl PoolShared {
    /// Starts a factory task if there is unmet demand and room under the
    /// capacity. Called with the inner lock held.
    fn maybe_spawn_create(self: &Arc<Self>, inner: &mut PoolInner) {
        if inner.closed
            || inner.waiters.is_empty()
            || inner.total + inner.creating >= self.capacity
        {
            return;
        }
        inner.creating += 1;

        let shared = self.clone();
        tokio::spawn(async move {
            let result = shared.factory.create().await;
            shared.finish_create(result);
        });
    }

    fn finish_create(self: &Arc<Self>, result: Result<Arc<Channel>>) {
        let mut inner = self.inner.lock().unwrap();
        inner.creating -= 1;

        match result {
            Ok(channel) => {
                if inner.closed {
                    drop(inner);
                    channel.begin_drain();
                    return;
                }
                inner.total += 1;
                self.metrics.connection_added();
                self.hand_out_or_park(&mut inner, channel);
            }
            Err(_) => {
                // The factory already recorded the failure; waiters stay
                // queued and the next attempt is paced by its back-off.
                self.maybe_spawn_create(&mut inner);
            }
        }
    }

    fn release(self: &Arc<Self>, channel: Arc<Channel>) {
        let mut inner = self.inner.lock().unwrap();

        if inner.closed {
            inner.total -= 1;
            drop(inner);
            self.metrics.connection_removed();
            channel.begin_drain();
            return;
        }

        if !channel.is_ready() {
            inner.total -= 1;
            self.metrics.connection_removed();
            debug!(
                id = channel.id(),
                inflight = channel.inflight(),
                "removing dead connection from pool"
            );
            channel.begin_drain();
            self.maybe_spawn_create(&mut inner);
            return;
        }

        self.hand_out_or_park(&mut inner, channel);
    }

    /// Hands the channel to the oldest live waiter, or parks it idle.
    /// Called with the inner lock held.
    fn hand_out_or_park(&self, inner: &mut PoolInner, mut channel: Arc<Channel>) {
        while let Some(waiter) = inner.waiters.pop_front() {
            match waiter.send(Ok(channel)) {
                Ok(()) => return,
                // The acquirer gave up; try the next one.
                Err(returned) => channel = returned.expect("channel was sent"),
            }
        }
        inner.idle.push_back(channel);
    }
}

/// A leased channel. Dropping the guard returns the channel to the pool.
pub(crate) struct PoolGuard {
    channel: Option<Arc<Channel>>,
    shared: Arc<PoolShared>,
}

impl Deref for PoolGuard {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        self.channel.as_ref().expect("channel present until drop")
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            self.shared.release(channel);
        }
    }
}
