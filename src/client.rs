use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::header::HeaderValue;
use rustls::pki_types::CertificateDer;
use tokio::sync::Notify;
use tracing::debug;

use crate::channel::DispatchError;
use crate::connector::{Connector, TlsConnector};
use crate::endpoint::Endpoint;
use crate::factory::ChannelFactory;
use crate::metrics::{MetricsListener, NoopListener};
use crate::notification::Notification;
use crate::pool::Pool;
use crate::response::Response;
use crate::result::{Error, Result};
use crate::token::{TokenFactory, DEFAULT_REFRESH_INTERVAL};

/// Default time allowed for dial + TLS + HTTP/2 handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default keep-alive ping interval.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(60);

/// Default time to wait for a keep-alive ping acknowledgement.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(30);

/// How many times a send is moved to a fresh connection when the previous
/// one went away before the request hit the wire.
const DISPATCH_ATTEMPTS: usize = 3;

/// Authentication options. The two modes are mutually exclusive by
/// construction.
#[derive(Clone)]
pub enum Authentication {
    /// Certificate-based authentication: the provider certificate is
    /// presented during the TLS handshake, and no `authorization` header is
    /// sent. The supplied configuration must carry the client identity;
    /// parsing the PKCS#12 container into one is up to the caller.
    Certificate { tls: Arc<rustls::ClientConfig> },

    /// Token-based authentication: every request carries
    /// `authorization: bearer <jwt>`, signed with the ES256 key Apple
    /// issued for `key_id` under `team_id`.
    Token {
        key_id: String,
        key_pem: Vec<u8>,
        team_id: String,
    },
}

impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Certificate { .. } => f.debug_struct("Certificate").finish_non_exhaustive(),
            Self::Token {
                key_id, team_id, ..
            } => f
                .debug_struct("Token")
                .field("key_id", key_id)
                .field("team_id", team_id)
                .finish_non_exhaustive(),
        }
    }
}

/// [`Client`] builder.
#[derive(Clone)]
pub struct ClientBuilder {
    pub endpoint: Endpoint,

    /// Required; [`build`](Self::build) fails without it.
    pub authentication: Option<Authentication>,

    /// Number of connections the pool may hold.
    pub pool_capacity: usize,

    /// How often the provider token is re-signed. APNs accepts tokens
    /// between 20 and 60 minutes old; stay inside that window.
    pub token_refresh_interval: Duration,

    pub connect_timeout: Duration,

    /// Optional per-notification deadline. On expiry the send fails with
    /// [`Error::Timeout`] and the stream is reset.
    pub request_timeout: Option<Duration>,

    /// Close a connection that has carried no streams for this long.
    pub idle_timeout: Option<Duration>,

    pub ping_interval: Duration,

    pub ping_timeout: Duration,

    /// Verify the server certificate against the endpoint host. Leave this
    /// on outside of tests; it is ignored when `authentication` or
    /// `connector` brings its own TLS configuration.
    pub hostname_verification: bool,

    /// Extra trust anchors, e.g. a private CA for a staging mock.
    pub extra_root_certificates: Vec<CertificateDer<'static>>,

    /// Outbound-connection-establishment hook. Overrides the built-in TCP +
    /// TLS dial; this is where HTTP CONNECT or SOCKS proxying plugs in.
    pub connector: Option<Arc<dyn Connector>>,

    /// Observer for metrics; see [`MetricsListener`].
    pub metrics: Option<Arc<dyn MetricsListener>>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            authentication: None,
            pool_capacity: 1,
            token_refresh_interval: DEFAULT_REFRESH_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: None,
            idle_timeout: None,
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            hostname_verification: true,
            extra_root_certificates: Vec::new(),
            connector: None,
            metrics: None,
        }
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("endpoint", &self.endpoint)
            .field("authentication", &self.authentication)
            .field("pool_capacity", &self.pool_capacity)
            .field("token_refresh_interval", &self.token_refresh_interval)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("ping_interval", &self.ping_interval)
            .field("ping_timeout", &self.ping_timeout)
            .field("hostname_verification", &self.hostname_verification)
            .finish_non_exhaustive()
    }
}

impl ClientBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Default::default()
    }

    /// Builds a [`Client`].
    ///
    /// Token authentication signs a first token here, so an unusable key
    /// fails the build rather than the first send.
    pub fn build(self) -> Result<Client> {
        let authentication = self.authentication.ok_or(Error::MissingAuthentication)?;

        let (tokens, certificate_tls) = match authentication {
            Authentication::Token {
                key_id,
                key_pem,
                team_id,
            } => {
                let factory = TokenFactory::from_ec_pem(
                    &key_id,
                    &key_pem,
                    &team_id,
                    self.token_refresh_interval,
                )?;
                (Some(factory), None)
            }
            Authentication::Certificate { tls } => (None, Some(tls)),
        };

        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => match certificate_tls {
                Some(tls) => Arc::new(TlsConnector::from_config((*tls).clone())),
                None if self.hostname_verification => {
                    Arc::new(TlsConnector::new(self.extra_root_certificates)?)
                }
                None => Arc::new(TlsConnector::danger_without_hostname_verification()),
            },
        };

        let metrics: Arc<dyn MetricsListener> = self
            .metrics
            .unwrap_or_else(|| Arc::new(NoopListener));

        let factory = ChannelFactory::new(
            self.endpoint,
            connector,
            self.connect_timeout,
            self.ping_interval,
            self.ping_timeout,
            self.idle_timeout,
            metrics.clone(),
        );

        Ok(Client {
            pool: Pool::new(factory, self.pool_capacity.max(1), metrics),
            tokens,
            request_timeout: self.request_timeout,
            closed: AtomicBool::new(false),
            outstanding: AtomicUsize::new(0),
            drained: Notify::new(),
        })
    }
}

/// Apple Push Notification service client.
///
/// `send` is safe under arbitrary concurrency; one connection carries many
/// notifications at once, one HTTP/2 stream each. Share the client with
/// [`Arc`] if multiple tasks send.
pub struct Client {
    pool: Pool,
    tokens: Option<TokenFactory>,
    request_timeout: Option<Duration>,
    closed: AtomicBool,
    outstanding: AtomicUsize,
    drained: Notify,
}

impl Client {
    /// Creates a [`ClientBuilder`].
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Delivers one notification and returns the server's verdict.
    ///
    /// `Ok` means the exchange completed — inspect
    /// [`Response::accepted`] for the verdict. `Err` means no verdict was
    /// obtained; [`Error::kind`](crate::Error::kind) says whether retrying
    /// can help. Dropping the returned future resets the stream
    /// best-effort; a late server verdict is discarded.
    pub async fn send(&self, notification: Notification) -> Result<Response> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let _outstanding = OutstandingGuard::enter(self);

        let limit = notification.payload_size_limit();
        if notification.payload.len() > limit {
            return Err(Error::PayloadTooLarge {
                size: notification.payload.len(),
                limit,
            });
        }

        match self.request_timeout {
            Some(deadline) => tokio::time::timeout(deadline, self.dispatch(&notification))
                .await
                .map_err(|_| Error::Timeout)?,
            None => self.dispatch(&notification).await,
        }
    }

    async fn dispatch(&self, notification: &Notification) -> Result<Response> {
        let bearer = self.bearer()?;

        for attempt in 0..DISPATCH_ATTEMPTS {
            let lease = match self.pool.acquire().await {
                Ok(lease) => lease,
                // This send passed the closed check at admission, so a
                // "pool closed" failure here means close() cancelled it
                // while it was waiting for a connection.
                Err(Error::Closed) => return Err(Error::Cancelled),
                Err(error) => return Err(error),
            };

            match lease.dispatch(notification, bearer.as_ref()).await {
                Ok(pending) => {
                    // Return the channel while the stream is in flight; it
                    // can carry other notifications meanwhile.
                    drop(lease);
                    return pending.settle().await;
                }
                Err(DispatchError::Unavailable) => {
                    debug!(attempt, "connection went away before the send; retrying");
                    continue;
                }
                Err(DispatchError::Fatal(error)) => return Err(error),
            }
        }

        Err(Error::ChannelClosed)
    }

    fn bearer(&self) -> Result<Option<HeaderValue>> {
        let Some(tokens) = &self.tokens else {
            return Ok(None);
        };
        let token = tokens.current()?;

        let mut value = HeaderValue::from_str(token.as_bearer())
            .map_err(|err| Error::InvalidRequest(err.into()))?;
        value.set_sensitive(true);

        Ok(Some(value))
    }

    /// Stops accepting notifications and closes the pool, then waits for
    /// outstanding responses. Sends still waiting for a connection fail
    /// with [`Error::Cancelled`]; in-flight streams finish with their real
    /// verdicts before their connections are torn down.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.pool.close();

        loop {
            let notified = self.drained.notified();
            if self.outstanding.load(Ordering::Acquire) == 0 {
                break;
            }
            notified.await;
        }
    }
}

struct OutstandingGuard<'a> {
    client: &'a Client,
}

impl<'a> OutstandingGuard<'a> {
    fn enter(client: &'a Client) -> Self {
        client.outstanding.fetch_add(1, Ordering::AcqRel);
        Self { client }
    }
}

impl Drop for OutstandingGuard<'_> {
    fn drop(&mut self) {
        if self.client.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.client.drained.notify_waiters();
        }
    }
}
