use crate::header::COLLAPSE_ID_LIMIT;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A failure that prevented a server verdict from being obtained.
///
/// Rejections are not errors: an exchange the server completed, accepted or
/// not, yields an [`Ok(Response)`](crate::Response). Every `Error` maps to
/// one of a small set of [`ErrorKind`]s that tell the caller whether a retry
/// can help.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("the collapse identifier is {len} bytes, limit is {COLLAPSE_ID_LIMIT}")]
    CollapseIdTooLong { len: usize },

    #[error("the payload is {size} bytes, limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("no authentication is configured; provide a signing key or a TLS identity")]
    MissingAuthentication,

    #[error("the signing key is not a usable ES256 key")]
    InvalidKey(#[source] jsonwebtoken::errors::Error),

    #[error("invalid endpoint")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("invalid root certificate")]
    InvalidCertificate(#[source] rustls::Error),

    #[error("the notification could not be encoded as an HTTP/2 request")]
    InvalidRequest(#[source] http::Error),

    #[error("the client is closed")]
    Closed,

    #[error("the request was cancelled by close()")]
    Cancelled,

    #[error("the notification deadline elapsed before a server verdict arrived")]
    Timeout,

    #[error("the connection could not be established within the connect timeout")]
    ConnectTimeout,

    #[error("the connection closed before the request could be sent")]
    ChannelClosed,

    #[error("connection error")]
    Connection(#[source] h2::Error),

    #[error("i/o error")]
    Io(#[from] std::io::Error),
}

/// The caller-facing error taxonomy; see [`Error::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No verdict was obtained but the condition is not permanent; the
    /// caller may retry the notification.
    Transient,

    /// The per-notification deadline elapsed. The caller may retry.
    Timeout,

    /// [`Client::close`](crate::Client::close) cancelled a send it had
    /// already admitted, before the request reached the wire. Do not retry.
    /// (Caller-side cancellation is dropping the send future, which by
    /// construction surfaces no value at all.)
    Cancelled,

    /// The client is misconfigured; retrying cannot help.
    Configuration,

    /// The operation was attempted after [`Client::close`](crate::Client::close).
    Closed,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::CollapseIdTooLong { .. }
            | Error::PayloadTooLarge { .. }
            | Error::MissingAuthentication
            | Error::InvalidKey(_)
            | Error::InvalidEndpoint(_)
            | Error::InvalidCertificate(_)
            | Error::InvalidRequest(_) => ErrorKind::Configuration,
            Error::Closed => ErrorKind::Closed,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Timeout => ErrorKind::Timeout,
            Error::ConnectTimeout
            | Error::ChannelClosed
            | Error::Io(_)
            | Error::Connection(_) => ErrorKind::Transient,
        }
    }

    /// Whether retrying the notification may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Timeout)
    }
}

impl From<h2::Error> for Error {
    fn from(source: h2::Error) -> Self {
        Error::Connection(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_not_transient() {
        let err = Error::CollapseIdTooLong { len: 65 };
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!err.is_transient());
    }

    #[test]
    fn io_errors_are_transient() {
        let err = Error::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.is_transient());
    }

    #[test]
    fn closed_is_terminal() {
        assert_eq!(Error::Closed.kind(), ErrorKind::Closed);
        assert!(!Error::Closed.is_transient());
    }

    #[test]
    fn cancelled_is_terminal() {
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancelled);
        assert!(!Error::Cancelled.is_transient());
    }
}
