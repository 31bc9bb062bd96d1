use http::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// (Required for watchOS 6 and later; recommended for macOS, iOS, tvOS, and
/// iPadOS) The value of this header must accurately reflect the contents of
/// your notification’s payload. If there’s a mismatch, or if the header is
/// missing on required systems, APNs may return an error, delay the delivery
/// of the notification, or drop it altogether.
pub const APNS_PUSH_TYPE: HeaderName = HeaderName::from_static("apns-push-type");

/// A canonical UUID that is the unique ID for the notification. If you omit
/// this header, APNs creates a UUID for you and returns it in its response.
pub const APNS_ID: HeaderName = HeaderName::from_static("apns-id");

/// The date at which the notification is no longer valid, as a UNIX epoch
/// expressed in seconds (UTC). If the value is nonzero, APNs stores the
/// notification and tries to deliver it at least once, repeating the attempt
/// as needed until the specified date. If the value is 0, APNs attempts to
/// deliver the notification only once and doesn’t store it.
pub const APNS_EXPIRATION: HeaderName = HeaderName::from_static("apns-expiration");

/// The priority of the notification. If you omit this header, APNs sets the
/// notification priority to 10.
pub const APNS_PRIORITY: HeaderName = HeaderName::from_static("apns-priority");

/// The topic for the notification. In general, the topic is your app’s bundle
/// ID/app ID. It can have a suffix based on the type of push notification.
pub const APNS_TOPIC: HeaderName = HeaderName::from_static("apns-topic");

/// An identifier you use to coalesce multiple notifications into a single
/// notification for the user. The value of this key must not exceed 64 bytes.
pub const APNS_COLLAPSE_ID: HeaderName = HeaderName::from_static("apns-collapse-id");

/// Maximum length of an `apns-collapse-id` value, in bytes.
pub const COLLAPSE_ID_LIMIT: usize = 64;

/// Maximum payload size accepted by APNs, in bytes.
pub const PAYLOAD_LIMIT: usize = 4096;

/// Maximum payload size for Voice over IP notifications, in bytes.
pub const PAYLOAD_LIMIT_VOIP: usize = 5120;

/// The `apns-push-type` header field has the following valid values. The
/// descriptions below describe when and how to use these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PushType {
    /// Use the `alert` push type for notifications that trigger a user
    /// interaction, such as an alert, badge, or sound. The `apns-topic`
    /// header field must use your app’s bundle ID as the topic.
    ///
    /// The `alert` push type is required on watchOS 6 and later. It is
    /// recommended on macOS, iOS, tvOS, and iPadOS.
    Alert,

    /// Use the `background` push type for notifications that deliver content
    /// in the background, and don’t trigger any user interactions. Always
    /// use priority 5 with this push type; using priority 10 is an error.
    Background,

    /// Use the `voip` push type for notifications that provide information
    /// about an incoming Voice-over-IP (VoIP) call. The `apns-topic` header
    /// field must use your app’s bundle ID with `.voip` appended to the end.
    Voip,

    /// Use the `complication` push type for notifications that contain
    /// update information for a watchOS app’s complications. The
    /// `apns-topic` header field must use your app’s bundle ID with
    /// `.complication` appended to the end.
    Complication,

    /// Use the `fileprovider` push type to signal changes to a File Provider
    /// extension. The `apns-topic` header field must use your app’s bundle
    /// ID with `.pushkit.fileprovider` appended to the end.
    Fileprovider,

    /// Use the `mdm` push type for notifications that tell managed devices
    /// to contact the MDM server. The topic comes from the UID attribute in
    /// the subject of your MDM push certificate.
    Mdm,

    /// Use the `liveactivity` push type to update or end an ongoing Live
    /// Activity. The `apns-topic` header field must use your app’s bundle ID
    /// with `.push-type.liveactivity` appended to the end.
    #[serde(rename = "liveactivity")]
    LiveActivity,

    /// Use the `location` push type for notifications that request a user’s
    /// location. The `apns-topic` header field must use your app’s bundle ID
    /// with `.location-query` appended to the end.
    ///
    /// The `location` push type supports only token-based authentication.
    Location,

    /// Use the `pushtotalk` push type for notifications that provide
    /// information about an incoming Push to Talk audio transmission. The
    /// `apns-topic` header field must use your app’s bundle ID with
    /// `.voip-ptt` appended to the end.
    #[serde(rename = "pushtotalk")]
    PushToTalk,
}

impl PushType {
    /// The maximum payload size APNs accepts for this push type.
    pub fn payload_size_limit(&self) -> usize {
        match self {
            Self::Voip => PAYLOAD_LIMIT_VOIP,
            _ => PAYLOAD_LIMIT,
        }
    }
}

impl Default for PushType {
    fn default() -> Self {
        Self::Alert
    }
}

serde_plain::derive_display_from_serialize!(PushType);
serde_plain::derive_fromstr_from_deserialize!(PushType);

impl From<PushType> for HeaderValue {
    fn from(push_type: PushType) -> Self {
        match push_type {
            PushType::Alert => HeaderValue::from_static("alert"),
            PushType::Background => HeaderValue::from_static("background"),
            PushType::Voip => HeaderValue::from_static("voip"),
            PushType::Complication => HeaderValue::from_static("complication"),
            PushType::Fileprovider => HeaderValue::from_static("fileprovider"),
            PushType::Mdm => HeaderValue::from_static("mdm"),
            PushType::LiveActivity => HeaderValue::from_static("liveactivity"),
            PushType::Location => HeaderValue::from_static("location"),
            PushType::PushToTalk => HeaderValue::from_static("pushtotalk"),
        }
    }
}

/// The `apns-priority` header field values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize_repr, Serialize_repr)]
#[repr(u8)]
pub enum Priority {
    /// Send the notification immediately.
    Immediate = 10,

    /// Send the notification based on power considerations on the user’s
    /// device.
    ConservePower = 5,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Immediate
    }
}

impl From<Priority> for HeaderValue {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::Immediate => HeaderValue::from_static("10"),
            Priority::ConservePower => HeaderValue::from_static("5"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_type_wire_strings() {
        assert_eq!(PushType::Alert.to_string(), "alert");
        assert_eq!(PushType::LiveActivity.to_string(), "liveactivity");
        assert_eq!(PushType::PushToTalk.to_string(), "pushtotalk");
        assert_eq!(PushType::Location.to_string(), "location");

        assert_eq!("voip".parse::<PushType>().unwrap(), PushType::Voip);
        assert_eq!(
            "liveactivity".parse::<PushType>().unwrap(),
            PushType::LiveActivity
        );
        assert!("carrier-pigeon".parse::<PushType>().is_err());
    }

    #[test]
    fn priority_header_values() {
        assert_eq!(HeaderValue::from(Priority::Immediate), "10");
        assert_eq!(HeaderValue::from(Priority::ConservePower), "5");
    }

    #[test]
    fn voip_payload_limit() {
        assert_eq!(PushType::Voip.payload_size_limit(), PAYLOAD_LIMIT_VOIP);
        assert_eq!(PushType::Alert.payload_size_limit(), PAYLOAD_LIMIT);
    }

    #[test]
    fn push_type_serde_round_trip() {
        for push_type in [
            PushType::Alert,
            PushType::Background,
            PushType::Voip,
            PushType::Complication,
            PushType::Fileprovider,
            PushType::Mdm,
            PushType::LiveActivity,
            PushType::Location,
            PushType::PushToTalk,
        ] {
            let wire = push_type.to_string();
            assert_eq!(wire.parse::<PushType>().unwrap(), push_type);
            assert_eq!(
                HeaderValue::from(push_type).to_str().unwrap(),
                wire.as_str()
            );
        }
    }
}
