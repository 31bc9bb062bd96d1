use std::collections::HashMap;
use std::future::poll_fn;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use h2::client::{ResponseFuture, SendRequest};
use h2::{Ping, PingPong, RecvStream, SendStream};
use http::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH};
use http::{Method, Request, StatusCode, Uri, Version};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, Notify};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::header::{
    APNS_COLLAPSE_ID, APNS_EXPIRATION, APNS_ID, APNS_PRIORITY, APNS_PUSH_TYPE, APNS_TOPIC,
    COLLAPSE_ID_LIMIT,
};
use crate::metrics::MetricsListener;
use crate::notification::Notification;
use crate::response::{ErrorBody, Response, StreamResponse};
use crate::result::{Error, Result};

/// Upper bound on how much of an error response body is buffered.
const MAX_ERROR_BODY: usize = 4096;

/// Channel lifecycle.
///
/// A channel is born `Ready`; a server `GOAWAY`, an idle timeout, or a local
/// close moves it to `Draining` (no new streams, in-flight ones finish); any
/// fatal condition or a finished drain lands in `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelState {
    Ready = 0,
    Draining = 1,
    Closed = 2,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Ready,
            1 => Self::Draining,
            _ => Self::Closed,
        }
    }
}

/// Why a dispatch did not produce a pending stream.
#[derive(Debug)]
pub(crate) enum DispatchError {
    /// The channel cannot take new streams and nothing was written; the
    /// notification is safe to dispatch elsewhere.
    Unavailable,

    /// The request may be on the wire; the failure must surface to the
    /// caller.
    Fatal(Error),
}

pub(crate) struct ChannelConfig {
    pub authority: String,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

struct StreamEntry {
    apns_id: Option<Uuid>,
    submitted: Instant,
}

/// State shared between the dispatch path, the connection driver, and the
/// keep-alive task. Everything here is touched from multiple tasks and is
/// individually synchronized; no lock is held across an await.
pub(crate) struct ChannelShared {
    id: u64,
    state: AtomicU8,
    registry: Mutex<HashMap<u32, StreamEntry>>,
    drained: Notify,
    last_activity: Mutex<Instant>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl ChannelShared {
    pub(crate) fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: ChannelState, to: ChannelState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn inflight(&self) -> usize {
        self.registry.lock().unwrap().len()
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    fn last_activity(&self) -> Instant {
        *self.last_activity.lock().unwrap()
    }

    fn insert(&self, stream_id: u32, entry: StreamEntry) {
        self.registry.lock().unwrap().insert(stream_id, entry);
    }

    fn remove(&self, stream_id: u32) {
        let mut registry = self.registry.lock().unwrap();
        registry.remove(&stream_id);
        let empty = registry.is_empty();
        drop(registry);

        self.touch();
        if empty {
            self.drained.notify_waiters();
        }
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.inflight() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn shutdown(&self) {
        if let Some(tx) = self.shutdown.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }

    /// Stops new streams and closes once the registry is empty.
    fn begin_drain(self: &Arc<Self>) {
        if !self.transition(ChannelState::Ready, ChannelState::Draining) {
            return;
        }
        debug!(id = self.id, "draining connection");

        let shared = self.clone();
        tokio::spawn(async move {
            shared.wait_drained().await;
            shared.shutdown();
            shared
                .state
                .store(ChannelState::Closed as u8, Ordering::Release);
        });
    }

    /// Tears the connection down immediately. In-flight streams complete
    /// with a transient error through their response futures.
    fn fatal(&self) {
        self.state.store(ChannelState::Closed as u8, Ordering::Release);
        self.shutdown();
    }
}

/// One HTTP/2 connection carrying notifications as client streams.
pub(crate) struct Channel {
    shared: Arc<ChannelShared>,
    send: SendRequest<Bytes>,
    authority: String,
    metrics: Arc<dyn MetricsListener>,
}

impl Channel {
    /// Wraps a finished h2 handshake, spawning the connection driver and
    /// the keep-alive task.
    pub(crate) fn start<T>(
        id: u64,
        send: SendRequest<Bytes>,
        mut connection: h2::client::Connection<T, Bytes>,
        config: ChannelConfig,
        metrics: Arc<dyn MetricsListener>,
    ) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let ping_pong = connection.ping_pong();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let shared = Arc::new(ChannelShared {
            id,
            state: AtomicU8::new(ChannelState::Ready as u8),
            registry: Mutex::new(HashMap::new()),
            drained: Notify::new(),
            last_activity: Mutex::new(Instant::now()),
            shutdown: Mutex::new(Some(shutdown_tx)),
        });

        let driver_shared = shared.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = &mut connection => match result {
                    Ok(()) => debug!(id, "connection closed"),
                    Err(error) => debug!(id, %error, "connection failed"),
                },
                _ = shutdown_rx => trace!(id, "connection shut down"),
            }
            driver_shared
                .state
                .store(ChannelState::Closed as u8, Ordering::Release);
            driver_shared.drained.notify_waiters();
        });

        if let Some(ping_pong) = ping_pong {
            tokio::spawn(keepalive(
                shared.clone(),
                ping_pong,
                config.ping_interval,
                config.ping_timeout,
                config.idle_timeout,
            ));
        }

        Self {
            shared,
            send,
            authority: config.authority,
            metrics,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.shared.id
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.shared.state() == ChannelState::Ready
    }

    pub(crate) fn inflight(&self) -> usize {
        self.shared.inflight()
    }

    /// Stops new streams, lets in-flight ones finish, then closes.
    pub(crate) fn begin_drain(&self) {
        self.shared.begin_drain();
    }

    /// Opens a stream for the notification and writes the request. The
    /// returned [`PendingStream`] resolves to the server's verdict; the
    /// channel itself can be released (and carry other streams) meanwhile.
    pub(crate) async fn dispatch(
        &self,
        notification: &Notification,
        bearer: Option<&HeaderValue>,
    ) -> std::result::Result<PendingStream, DispatchError> {
        if !self.is_ready() {
            return Err(DispatchError::Unavailable);
        }

        let request = self
            .encode_request(notification, bearer)
            .map_err(DispatchError::Fatal)?;

        let send = self.send.clone();
        let mut send = send
            .ready()
            .await
            .map_err(|error| self.connection_gone(error))?;

        let end_of_stream = notification.payload.is_empty();
        let (response, mut stream) = send
            .send_request(request, end_of_stream)
            .map_err(|error| self.connection_gone(error))?;

        let stream_id = u32::from(stream.stream_id());
        trace!(id = self.shared.id, stream_id, "stream opened");

        self.shared.touch();
        self.shared.insert(
            stream_id,
            StreamEntry {
                apns_id: notification.apns_id,
                submitted: Instant::now(),
            },
        );
        let guard = EntryGuard {
            shared: self.shared.clone(),
            stream_id,
        };

        self.metrics.notification_sent(notification.apns_id);

        if !end_of_stream {
            if let Err(error) = write_payload(&mut stream, notification.payload.clone()).await {
                self.metrics.write_failed(&error);
                return Err(DispatchError::Fatal(error));
            }
        }

        Ok(PendingStream {
            response,
            stream_id,
            guard,
            metrics: self.metrics.clone(),
        })
    }

    /// Classifies a connection-level send failure. Nothing was written for
    /// the current notification, so the caller may go back to the pool.
    fn connection_gone(&self, error: h2::Error) -> DispatchError {
        if error.is_go_away() {
            debug!(id = self.shared.id, "server sent GOAWAY");
            self.shared.begin_drain();
        } else {
            debug!(id = self.shared.id, %error, "connection unusable");
            self.shared.fatal();
        }
        DispatchError::Unavailable
    }

    fn encode_request(
        &self,
        notification: &Notification,
        bearer: Option<&HeaderValue>,
    ) -> Result<Request<()>> {
        let uri = Uri::builder()
            .scheme("https")
            .authority(self.authority.as_str())
            .path_and_query(format!("/3/device/{}", notification.device_token))
            .build()
            .map_err(Error::InvalidRequest)?;

        let mut request = Request::builder()
            .method(Method::POST)
            .version(Version::HTTP_2)
            .uri(uri)
            .body(())
            .map_err(Error::InvalidRequest)?;
        *request.headers_mut() = apns_headers(notification, bearer)?;

        Ok(request)
    }
}

/// Builds the APNs header block for one notification.
fn apns_headers(
    notification: &Notification,
    bearer: Option<&HeaderValue>,
) -> Result<HeaderMap<HeaderValue>> {
    let mut headers = HeaderMap::new();

    let topic = notification
        .topic
        .parse()
        .map_err(|err: http::header::InvalidHeaderValue| Error::InvalidRequest(err.into()))?;
    headers.insert(APNS_TOPIC, topic);

    if let Some(push_type) = notification.push_type {
        headers.insert(APNS_PUSH_TYPE, push_type.into());
    }

    if let Some(apns_id) = notification.apns_id {
        let apns_id = apns_id
            .hyphenated()
            .to_string()
            .parse()
            .map_err(|err: http::header::InvalidHeaderValue| Error::InvalidRequest(err.into()))?;
        headers.insert(APNS_ID, apns_id);
    }

    if let Some(expiration) = notification.expiration {
        let expiration = expiration
            .as_header_value()
            .parse()
            .map_err(|err: http::header::InvalidHeaderValue| Error::InvalidRequest(err.into()))?;
        headers.insert(APNS_EXPIRATION, expiration);
    }

    if let Some(priority) = notification.priority {
        headers.insert(APNS_PRIORITY, priority.into());
    }

    if let Some(collapse_id) = &notification.collapse_id {
        if collapse_id.len() > COLLAPSE_ID_LIMIT {
            return Err(Error::CollapseIdTooLong {
                len: collapse_id.len(),
            });
        }
        let collapse_id = collapse_id
            .parse()
            .map_err(|err: http::header::InvalidHeaderValue| Error::InvalidRequest(err.into()))?;
        headers.insert(APNS_COLLAPSE_ID, collapse_id);
    }

    headers.insert(CONTENT_LENGTH, HeaderValue::from(notification.payload.len()));

    if let Some(bearer) = bearer {
        headers.insert(AUTHORIZATION, bearer.clone());
    }

    Ok(headers)
}

/// Writes the payload as DATA, respecting the stream's flow-control window.
async fn write_payload(stream: &mut SendStream<Bytes>, mut payload: Bytes) -> Result<()> {
    stream.reserve_capacity(payload.len());

    while !payload.is_empty() {
        let granted = match poll_fn(|cx| stream.poll_capacity(cx)).await {
            Some(result) => result?,
            None => return Err(Error::ChannelClosed),
        };
        if granted == 0 {
            continue;
        }

        let chunk = payload.split_to(granted.min(payload.len()));
        stream.send_data(chunk, payload.is_empty())?;
    }

    Ok(())
}

/// Removes the registry entry exactly once, on settle or on cancellation.
struct EntryGuard {
    shared: Arc<ChannelShared>,
    stream_id: u32,
}

impl Drop for EntryGuard {
    fn drop(&mut self) {
        self.shared.remove(self.stream_id);
    }
}

/// A notification that is on the wire, waiting for the server's verdict.
///
/// Dropping this resets the stream (`RST_STREAM`, `CANCEL`) best-effort and
/// discards whatever the server eventually answers.
pub(crate) struct PendingStream {
    response: ResponseFuture,
    stream_id: u32,
    guard: EntryGuard,
    metrics: Arc<dyn MetricsListener>,
}

impl PendingStream {
    /// Waits for END_STREAM and pairs the exchange into a [`Response`].
    pub(crate) async fn settle(self) -> Result<Response> {
        let PendingStream {
            response,
            stream_id,
            guard,
            metrics,
        } = self;

        let (request_apns_id, submitted) = {
            let registry = guard.shared.registry.lock().unwrap();
            let entry = registry.get(&stream_id);
            (
                entry.and_then(|entry| entry.apns_id),
                entry.map(|entry| entry.submitted),
            )
        };

        let decoded = decode_response(response, stream_id).await;
        drop(guard);

        let stream_response = decoded?;
        trace!(stream_id = stream_response.stream_id(), "stream settled");

        let response = stream_response.into_response(request_apns_id);
        let round_trip = submitted.map_or(Duration::ZERO, |at| at.elapsed());
        if response.accepted() {
            metrics.notification_accepted(&response, round_trip);
        } else {
            metrics.notification_rejected(&response, round_trip);
        }

        Ok(response)
    }
}

async fn decode_response(
    response: ResponseFuture,
    stream_id: u32,
) -> Result<StreamResponse> {
    let response = response.await?;
    let (parts, mut body) = response.into_parts();

    let apns_id = parts
        .headers
        .get(APNS_ID)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok());

    if parts.status == StatusCode::OK {
        return Ok(StreamResponse::Accept { stream_id, apns_id });
    }

    let body_bytes = read_error_body(&mut body).await;
    let body = serde_json::from_slice::<ErrorBody>(&body_bytes).ok();

    Ok(StreamResponse::Reject {
        stream_id,
        apns_id,
        status: parts.status,
        body,
    })
}

/// Accumulates a rejected request's body, bounded to [`MAX_ERROR_BODY`].
///
/// The HTTP status already carries the verdict, so a broken body degrades to
/// a reason-less rejection instead of an error.
async fn read_error_body(body: &mut RecvStream) -> Vec<u8> {
    let mut buf = Vec::new();

    while let Some(chunk) = body.data().await {
        match chunk {
            Ok(data) => {
                let _ = body.flow_control().release_capacity(data.len());
                let room = MAX_ERROR_BODY - buf.len();
                buf.extend_from_slice(&data[..data.len().min(room)]);
                if buf.len() == MAX_ERROR_BODY {
                    break;
                }
            }
            Err(error) => {
                debug!(%error, "error reading response body");
                break;
            }
        }
    }

    buf
}

async fn keepalive(
    shared: Arc<ChannelShared>,
    mut ping_pong: PingPong,
    ping_interval: Duration,
    ping_timeout: Duration,
    idle_timeout: Option<Duration>,
) {
    loop {
        let idle_for = shared.last_activity().elapsed();

        let mut wait = ping_interval.saturating_sub(idle_for);
        if let Some(idle_timeout) = idle_timeout {
            wait = wait.min(idle_timeout.saturating_sub(idle_for));
        }
        tokio::time::sleep(wait.max(Duration::from_millis(10))).await;

        match shared.state() {
            ChannelState::Ready => {}
            // The drain task owns the rest of the lifecycle.
            ChannelState::Draining | ChannelState::Closed => return,
        }

        let idle_for = shared.last_activity().elapsed();

        if let Some(idle_timeout) = idle_timeout {
            if shared.inflight() == 0 && idle_for >= idle_timeout {
                debug!(id = shared.id, "closing idle connection");
                shared.begin_drain();
                return;
            }
        }

        if idle_for >= ping_interval {
            trace!(id = shared.id, "sending keep-alive ping");
            match tokio::time::timeout(ping_timeout, ping_pong.ping(Ping::opaque())).await {
                Ok(Ok(_pong)) => shared.touch(),
                Ok(Err(error)) => {
                    debug!(id = shared.id, %error, "keep-alive ping failed");
                    shared.fatal();
                    return;
                }
                Err(_) => {
                    warn!(id = shared.id, "keep-alive ping timed out");
                    shared.fatal();
                    return;
                }
            }
        }
    }
}
