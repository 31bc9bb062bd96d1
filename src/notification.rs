use bytes::Bytes;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::header::{Priority, PushType};

/// The date at which a notification is no longer valid.
///
/// APNs distinguishes an expiration of `0` (attempt delivery once, do not
/// store) from an omitted header (server default); [`Expiration::Immediate`]
/// encodes the former, leaving [`Notification::expiration`] unset encodes the
/// latter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// Deliver once and discard the notification if the device is offline.
    /// Sent on the wire as `apns-expiration: 0`.
    Immediate,

    /// Store and retry delivery until the given instant.
    At(OffsetDateTime),
}

impl Expiration {
    pub(crate) fn as_header_value(&self) -> String {
        match self {
            Self::Immediate => "0".to_owned(),
            Self::At(instant) => instant.unix_timestamp().to_string(),
        }
    }
}

impl From<OffsetDateTime> for Expiration {
    fn from(instant: OffsetDateTime) -> Self {
        Self::At(instant)
    }
}

/// A single push notification request.
///
/// The payload is carried verbatim; this crate does not build or validate
/// the JSON beyond the size limits APNs enforces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Notification {
    /// The hex-encoded device token, used as the request path suffix.
    pub device_token: String,

    /// The topic for the notification. In general, the topic is your app’s
    /// bundle ID/app ID, with a suffix based on the push type.
    pub topic: String,

    /// The already-encoded JSON payload.
    pub payload: Bytes,

    /// The date at which the notification is no longer valid. When unset,
    /// no `apns-expiration` header is sent and the server default applies.
    pub expiration: Option<Expiration>,

    /// The priority of the notification. When unset, APNs assumes 10.
    pub priority: Option<Priority>,

    /// The value for the `apns-push-type` header.
    pub push_type: Option<PushType>,

    /// An identifier for coalescing multiple notifications into one. Must
    /// not exceed 64 bytes.
    pub collapse_id: Option<String>,

    /// A canonical UUID identifying the notification. If unset, APNs
    /// assigns one and returns it in its response.
    pub apns_id: Option<Uuid>,
}

impl Notification {
    /// Creates a notification with the required fields; everything else is
    /// left to server defaults.
    pub fn new(
        device_token: impl Into<String>,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            device_token: device_token.into(),
            topic: topic.into(),
            payload: payload.into(),
            ..Default::default()
        }
    }

    /// The maximum payload size APNs accepts for this notification.
    pub(crate) fn payload_size_limit(&self) -> usize {
        self.push_type.unwrap_or_default().payload_size_limit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_expiration_is_zero() {
        assert_eq!(Expiration::Immediate.as_header_value(), "0");
    }

    #[test]
    fn dated_expiration_is_unix_seconds() {
        let instant = OffsetDateTime::from_unix_timestamp(1_727_740_800).unwrap();
        assert_eq!(Expiration::At(instant).as_header_value(), "1727740800");
    }

    #[test]
    fn voip_notifications_get_the_larger_limit() {
        let mut notification = Notification::new("ab12", "com.example.app", "{}");
        assert_eq!(notification.payload_size_limit(), 4096);

        notification.push_type = Some(PushType::Voip);
        assert_eq!(notification.payload_size_limit(), 5120);
    }
}
