#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod connector;
pub mod endpoint;
pub mod header;
pub mod metrics;
pub mod notification;
pub mod reason;
pub mod response;
pub mod result;
pub mod token;

mod channel;
mod factory;
mod pool;

pub use client::{Authentication, Client, ClientBuilder};
pub use connector::{BoxedIo, Connector, Io, TlsConnector};
pub use endpoint::Endpoint;
pub use header::{Priority, PushType};
pub use metrics::MetricsListener;
pub use notification::{Expiration, Notification};
pub use reason::Reason;
pub use response::Response;
pub use result::{Error, ErrorKind, Result};
pub use token::{AuthenticationToken, TokenFactory};
