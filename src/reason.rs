use http::StatusCode;
use serde::{Deserialize, Serialize};

/// The error string APNs returns in the body of a rejected request.
///
/// [`Response::reason`](crate::Response::reason) parses the verbatim server
/// string into this taxonomy; strings this version does not know about map
/// to [`Reason::Unknown`] and stay available verbatim on the response.
///
/// Variant names are exactly the strings APNs puts on the wire.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Reason {
    #[error("the client certificate was rejected")]
    BadCertificate,

    #[error("the client certificate does not match this environment")]
    BadCertificateEnvironment,

    #[error("the apns-collapse-id value is longer than 64 bytes")]
    BadCollapseId,

    #[error("the device token is malformed or belongs to the other environment")]
    BadDeviceToken,

    #[error("the apns-expiration value could not be parsed")]
    BadExpirationDate,

    #[error("the apns-id value is not a canonical UUID")]
    BadMessageId,

    #[error("the request :path is not /3/device/{{token}}")]
    BadPath,

    #[error("the apns-priority value must be 5 or 10")]
    BadPriority,

    #[error("the apns-topic value could not be parsed")]
    BadTopic,

    #[error("the device token was issued for a different topic")]
    DeviceTokenNotForTopic,

    #[error("a header appeared more than once in the request")]
    DuplicateHeaders,

    #[error("the provider token is older than APNs allows; sign a fresh one")]
    ExpiredProviderToken,

    #[error("the device token has expired")]
    ExpiredToken,

    #[error("the requested action is not permitted for this provider")]
    Forbidden,

    #[error("the server closed an idle connection")]
    IdleTimeout,

    #[error("APNs hit an internal error")]
    InternalServerError,

    #[error("the provider token signature did not verify")]
    InvalidProviderToken,

    #[error("the apns-push-type value is not one APNs recognizes")]
    InvalidPushType,

    #[error("only POST is accepted on the device path")]
    MethodNotAllowed,

    #[error("no device token was present in the request :path")]
    MissingDeviceToken,

    #[error("neither a provider certificate nor an authorization header was presented")]
    MissingProviderToken,

    #[error("the apns-topic header is required for this connection and was not sent")]
    MissingTopic,

    #[error("the request carried no payload")]
    PayloadEmpty,

    #[error("the payload exceeds the size APNs accepts")]
    PayloadTooLarge,

    #[error("APNs is temporarily unavailable; try again later")]
    ServiceUnavailable,

    #[error("the server is shutting down")]
    Shutdown,

    #[error("provider tokens are being re-signed more often than once per 20 minutes")]
    TooManyProviderTokenUpdates,

    #[error("too many requests were sent to this device token in a short window")]
    TooManyRequests,

    #[error("this provider may not push to the requested topic")]
    TopicDisallowed,

    #[error("the device token is no longer active for the topic; stop sending to it")]
    Unregistered,

    #[error("unrecognized reason")]
    #[serde(other)]
    Unknown,
}

serde_plain::derive_fromstr_from_deserialize!(Reason);

/// The HTTP status APNs documents for each reason.
impl From<Reason> for StatusCode {
    fn from(reason: Reason) -> Self {
        use Reason::*;

        match reason {
            BadCollapseId | BadDeviceToken | BadExpirationDate | BadMessageId | BadPriority
            | BadTopic | DeviceTokenNotForTopic | DuplicateHeaders | IdleTimeout
            | InvalidPushType | MissingDeviceToken | MissingTopic | PayloadEmpty
            | TopicDisallowed => StatusCode::BAD_REQUEST,

            BadCertificate | BadCertificateEnvironment | ExpiredProviderToken | Forbidden
            | InvalidProviderToken | MissingProviderToken => StatusCode::FORBIDDEN,

            BadPath => StatusCode::NOT_FOUND,

            MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,

            ExpiredToken | Unregistered => StatusCode::GONE,

            PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,

            TooManyProviderTokenUpdates | TooManyRequests => StatusCode::TOO_MANY_REQUESTS,

            ServiceUnavailable | Shutdown => StatusCode::SERVICE_UNAVAILABLE,

            InternalServerError | Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_verbatim_strings() {
        assert_eq!("Unregistered".parse::<Reason>().unwrap(), Reason::Unregistered);
        assert_eq!(
            "ExpiredProviderToken".parse::<Reason>().unwrap(),
            Reason::ExpiredProviderToken
        );
        assert_eq!(
            "TooManyProviderTokenUpdates".parse::<Reason>().unwrap(),
            Reason::TooManyProviderTokenUpdates
        );
    }

    #[test]
    fn unknown_strings_are_preserved_as_unknown() {
        assert_eq!(
            "SomeFutureReason".parse::<Reason>().unwrap(),
            Reason::Unknown
        );
    }

    #[test]
    fn status_mapping() {
        assert_eq!(StatusCode::from(Reason::Unregistered), StatusCode::GONE);
        assert_eq!(StatusCode::from(Reason::BadTopic), StatusCode::BAD_REQUEST);
        assert_eq!(
            StatusCode::from(Reason::InvalidProviderToken),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            StatusCode::from(Reason::PayloadTooLarge),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            StatusCode::from(Reason::TooManyRequests),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(StatusCode::from(Reason::BadPath), StatusCode::NOT_FOUND);
        assert_eq!(
            StatusCode::from(Reason::Shutdown),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
