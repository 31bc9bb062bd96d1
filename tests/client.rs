mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use time::OffsetDateTime;

use apns_h2::{ErrorKind, Notification, Reason};

use common::{
    client_for, notification, MockApns, MockConfig, Verdict, APNS_ID, DEVICE_TOKEN, PUBLIC_PEM,
    TEAM_ID, TOPIC,
};

#[tokio::test]
async fn accepted_notification() {
    let mock = MockApns::start(MockConfig::accept_all()).await;
    let client = client_for(mock.addr, |_| {});

    let response = client.send(notification()).await.unwrap();

    assert!(response.accepted());
    assert_eq!(response.status, 200);
    assert_eq!(response.apns_id.to_string(), APNS_ID);
    assert_eq!(response.rejection_reason, None);
    assert_eq!(response.token_invalidation_timestamp, None);

    let requests = mock.requests.lock().unwrap();
    let request = &requests[0];
    assert_eq!(request.path, format!("/3/device/{DEVICE_TOKEN}"));
    assert_eq!(request.headers.get("apns-topic").unwrap(), TOPIC);
    assert_eq!(
        request.headers.get("content-length").unwrap().to_str().unwrap(),
        request.body.len().to_string()
    );
    assert_eq!(request.body, br#"{"aps":{"alert":"hi"}}"#);
    assert!(request
        .headers
        .get("authorization")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("bearer "));
}

#[tokio::test]
async fn rejected_notification_with_invalidation_timestamp() {
    let mock = MockApns::start(MockConfig::replying(|_, _| {
        Verdict::reject(
            410,
            APNS_ID,
            r#"{"reason":"Unregistered","timestamp":1727740800000}"#,
        )
    }))
    .await;
    let client = client_for(mock.addr, |_| {});

    let response = client.send(notification()).await.unwrap();

    assert!(!response.accepted());
    assert_eq!(response.status, 410);
    assert_eq!(response.rejection_reason.as_deref(), Some("Unregistered"));
    assert_eq!(response.reason(), Some(Reason::Unregistered));
    assert_eq!(
        response.token_invalidation_timestamp,
        Some(OffsetDateTime::from_unix_timestamp(1_727_740_800).unwrap())
    );
}

#[tokio::test]
async fn rejection_with_unparseable_body_still_carries_the_status() {
    let mock = MockApns::start(MockConfig::replying(|_, _| {
        Verdict::reject(500, APNS_ID, "not json")
    }))
    .await;
    let client = client_for(mock.addr, |_| {});

    let response = client.send(notification()).await.unwrap();

    assert!(!response.accepted());
    assert_eq!(response.status, 500);
    assert_eq!(response.rejection_reason, None);
}

#[derive(Debug, Deserialize)]
struct BearerClaims {
    iss: String,
    iat: u64,
}

fn decode_bearer(header: &str) -> jsonwebtoken::TokenData<BearerClaims> {
    let jwt = header.strip_prefix("bearer ").unwrap();
    let key = DecodingKey::from_ec_pem(PUBLIC_PEM).unwrap();
    let mut validation = Validation::new(Algorithm::ES256);
    validation.required_spec_claims = HashSet::new();
    validation.validate_exp = false;
    decode::<BearerClaims>(jwt, &key, &validation).unwrap()
}

#[tokio::test]
async fn token_is_refreshed_after_the_interval() {
    let mock = MockApns::start(MockConfig::accept_all()).await;
    let client = client_for(mock.addr, |builder| {
        builder.token_refresh_interval = Duration::from_secs(1);
    });

    client.send(notification()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1200)).await;
    client.send(notification()).await.unwrap();

    let bearers = mock.header_values("authorization");
    assert_eq!(bearers.len(), 2);
    assert_ne!(bearers[0], bearers[1]);

    let first = decode_bearer(&bearers[0]);
    let second = decode_bearer(&bearers[1]);
    assert_eq!(second.claims.iss, TEAM_ID);
    assert!(second.claims.iat >= first.claims.iat);
}

#[tokio::test]
async fn token_is_reused_within_the_interval() {
    let mock = MockApns::start(MockConfig::accept_all()).await;
    let client = client_for(mock.addr, |_| {});

    client.send(notification()).await.unwrap();
    client.send(notification()).await.unwrap();

    let bearers = mock.header_values("authorization");
    assert_eq!(bearers[0], bearers[1]);
}

#[tokio::test]
async fn request_timeout_fails_with_timeout_kind() {
    let mock = MockApns::start(MockConfig::replying(|_, _| Verdict::Ignore)).await;
    let client = client_for(mock.addr, |builder| {
        builder.request_timeout = Some(Duration::from_millis(200));
    });

    let error = client.send(notification()).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn oversize_payload_is_refused_locally() {
    let mock = MockApns::start(MockConfig::accept_all()).await;
    let client = client_for(mock.addr, |_| {});

    let huge = Notification::new(DEVICE_TOKEN, TOPIC, vec![b'x'; 4097]);
    let error = client.send(huge).await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Configuration);
    assert_eq!(mock.request_count(), 0);
}

#[tokio::test]
async fn close_rejects_new_sends() {
    let mock = MockApns::start(MockConfig::accept_all()).await;
    let client = client_for(mock.addr, |_| {});

    client.send(notification()).await.unwrap();
    client.close().await;

    let error = client.send(notification()).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Closed);
}

#[tokio::test]
async fn close_cancels_sends_still_waiting_for_a_connection() {
    // A port that refuses connections keeps the send parked in the pool
    // while the factory retries under back-off.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = Arc::new(client_for(addr, |_| {}));

    let parked = tokio::spawn({
        let client = client.clone();
        async move { client.send(notification()).await }
    });

    // Let the send reach the pool's waiter queue before closing.
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.close().await;

    let error = parked.await.unwrap().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Cancelled);
}

#[tokio::test]
async fn concurrent_sends_each_complete_exactly_once() {
    let mock = MockApns::start(MockConfig::accept_all()).await;
    let client = Arc::new(client_for(mock.addr, |_| {}));

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..50 {
        let client = client.clone();
        tasks.spawn(async move { client.send(notification()).await });
    }

    let mut completed = 0;
    while let Some(result) = tasks.join_next().await {
        let response = result.unwrap().unwrap();
        assert!(response.accepted());
        completed += 1;
    }

    assert_eq!(completed, 50);
    assert_eq!(mock.request_count(), 50);
}

#[tokio::test]
async fn missing_authentication_fails_the_build() {
    let result = apns_h2::ClientBuilder::default().build();
    let error = result.err().unwrap();
    assert_eq!(error.kind(), ErrorKind::Configuration);
}

#[derive(Default)]
struct CountingListener {
    sent: std::sync::atomic::AtomicUsize,
    accepted: std::sync::atomic::AtomicUsize,
    rejected: std::sync::atomic::AtomicUsize,
    connections: std::sync::atomic::AtomicUsize,
}

impl apns_h2::MetricsListener for CountingListener {
    fn notification_sent(&self, _apns_id: Option<uuid::Uuid>) {
        self.sent.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    fn notification_accepted(&self, _response: &apns_h2::Response, round_trip: Duration) {
        assert!(round_trip > Duration::ZERO);
        self.accepted
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    fn notification_rejected(&self, _response: &apns_h2::Response, _round_trip: Duration) {
        self.rejected
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    fn connection_added(&self) {
        self.connections
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

#[tokio::test]
async fn metrics_listener_sees_the_notification_lifecycle() {
    use std::sync::atomic::Ordering;

    let mock = MockApns::start(MockConfig::replying(|seq, _| {
        if seq == 0 {
            Verdict::accept(APNS_ID)
        } else {
            Verdict::reject(400, APNS_ID, r#"{"reason":"BadDeviceToken"}"#)
        }
    }))
    .await;

    let listener = Arc::new(CountingListener::default());
    let client = client_for(mock.addr, |builder| {
        builder.metrics = Some(listener.clone() as Arc<dyn apns_h2::MetricsListener>);
    });

    let first = client.send(notification()).await.unwrap();
    assert!(first.accepted());
    let second = client.send(notification()).await.unwrap();
    assert!(!second.accepted());

    assert_eq!(listener.sent.load(Ordering::SeqCst), 2);
    assert_eq!(listener.accepted.load(Ordering::SeqCst), 1);
    assert_eq!(listener.rejected.load(Ordering::SeqCst), 1);
    assert_eq!(listener.connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancelled_sends_do_not_block_close() {
    let mock = MockApns::start(MockConfig::replying(|_, _| Verdict::Ignore)).await;
    let client = client_for(mock.addr, |_| {});

    // Abandon a send mid-flight; the stream is reset and its registry
    // entry cleaned up by the drop path.
    let abandoned =
        tokio::time::timeout(Duration::from_millis(200), client.send(notification())).await;
    assert!(abandoned.is_err());

    tokio::time::timeout(Duration::from_secs(2), client.close())
        .await
        .expect("close must not wait on cancelled sends");
}
