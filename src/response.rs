use http::StatusCode;
use serde::Deserialize;
use serde_with::{serde_as, TimestampMilliSeconds};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::reason::Reason;

/// The server's verdict on a single notification.
///
/// A `Response` exists for every exchange that completed at the HTTP level,
/// accepted or not; transport failures surface as [`Error`](crate::Error)
/// instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// The canonical UUID identifying the notification, from the `apns-id`
    /// response header (server-assigned when the request carried none).
    pub apns_id: Uuid,

    /// The HTTP status of the exchange. `200 OK` means accepted.
    pub status: StatusCode,

    /// The verbatim `reason` string from the error body of a rejected
    /// request.
    pub rejection_reason: Option<String>,

    /// The time at which APNs confirmed the device token was no longer
    /// valid for the topic. Present when the rejection reason is
    /// [`Reason::Unregistered`]; stop sending to the token unless it has
    /// been re-registered since.
    pub token_invalidation_timestamp: Option<OffsetDateTime>,
}

impl Response {
    /// Whether APNs accepted the notification.
    pub fn accepted(&self) -> bool {
        self.status == StatusCode::OK
    }

    /// The rejection reason parsed into the [`Reason`] taxonomy.
    pub fn reason(&self) -> Option<Reason> {
        self.rejection_reason
            .as_deref()
            .map(|reason| reason.parse().unwrap_or(Reason::Unknown))
    }
}

/// The JSON body of a rejected request:
/// `{"reason":"<Reason>"[,"timestamp":<ms-since-epoch>]}`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct ErrorBody {
    pub reason: String,

    #[serde_as(as = "Option<TimestampMilliSeconds>")]
    #[serde(default)]
    pub timestamp: Option<OffsetDateTime>,
}

/// A decoded exchange as seen by the channel layer, tagged by verdict and
/// still carrying the HTTP/2 stream it arrived on.
#[derive(Debug)]
pub(crate) enum StreamResponse {
    Accept {
        stream_id: u32,
        apns_id: Option<Uuid>,
    },
    Reject {
        stream_id: u32,
        apns_id: Option<Uuid>,
        status: StatusCode,
        body: Option<ErrorBody>,
    },
}

impl StreamResponse {
    /// Folds the tagged form into the caller-facing [`Response`],
    /// substituting the request's own id when the server did not echo one.
    pub(crate) fn into_response(self, request_apns_id: Option<Uuid>) -> Response {
        match self {
            Self::Accept { apns_id, .. } => Response {
                apns_id: apns_id.or(request_apns_id).unwrap_or_default(),
                status: StatusCode::OK,
                rejection_reason: None,
                token_invalidation_timestamp: None,
            },
            Self::Reject {
                apns_id,
                status,
                body,
                ..
            } => {
                let (rejection_reason, token_invalidation_timestamp) = match body {
                    Some(body) => (Some(body.reason), body.timestamp),
                    None => (None, None),
                };
                Response {
                    apns_id: apns_id.or(request_apns_id).unwrap_or_default(),
                    status,
                    rejection_reason,
                    token_invalidation_timestamp,
                }
            }
        }
    }

    pub(crate) fn stream_id(&self) -> u32 {
        match self {
            Self::Accept { stream_id, .. } | Self::Reject { stream_id, .. } => *stream_id,
        }
    }
}
