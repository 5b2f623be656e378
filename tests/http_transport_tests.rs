use std::sync::Arc;
use std::time::Duration;

use fleetsync::error::FetchError;
use fleetsync::list_view::{ListViewOptions, ResourceListView};
use fleetsync::query::RequestDescriptor;
use fleetsync::resources;
use fleetsync::transport::{HttpTransport, Transport};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path, query_param},
};

const API_PREFIX: &str = "/api/flightctl/api/v1";

fn transport_for(server: &MockServer) -> HttpTransport {
    let base = Url::parse(&format!("{}/api/flightctl", server.uri())).unwrap();
    HttpTransport::new(&base).unwrap()
}

#[tokio::test]
async fn fetches_list_json() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{API_PREFIX}/fleets")))
        .and(query_param("addDevicesCount", "true"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "metadata": { "name": "east" } }],
            "metadata": {}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let transport = transport_for(&mock_server);
    let body = transport
        .get(
            &RequestDescriptor::from("fleets?addDevicesCount=true"),
            &CancellationToken::new(),
        )
        .await
        .expect("list fetched");

    assert_eq!(body["items"][0]["metadata"]["name"], "east");
}

#[tokio::test]
async fn server_error_carries_body_message() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{API_PREFIX}/devices")))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "code": 500,
            "message": "database unavailable"
        })))
        .mount(&mock_server)
        .await;

    let err = transport_for(&mock_server)
        .get(&"devices".into(), &CancellationToken::new())
        .await
        .expect_err("500 is an error");

    assert_eq!(err.status(), Some(500));
    assert_eq!(
        err.to_string(),
        "Error 500: Internal Server Error - database unavailable"
    );
}

#[tokio::test]
async fn not_found_ignores_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{API_PREFIX}/repositories")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "" })))
        .mount(&mock_server)
        .await;

    let err = transport_for(&mock_server)
        .get(&"repositories".into(), &CancellationToken::new())
        .await
        .expect_err("404 is an error");

    assert_eq!(err.to_string(), "Error 404: Not Found");
}

#[tokio::test]
async fn plain_text_error_body_is_kept() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{API_PREFIX}/events")))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden for user\n"))
        .mount(&mock_server)
        .await;

    let err = transport_for(&mock_server)
        .get(&"events".into(), &CancellationToken::new())
        .await
        .expect_err("403 is an error");

    assert_eq!(err.to_string(), "Error 403: Forbidden - forbidden for user");
}

#[tokio::test]
async fn malformed_json_is_a_decode_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{API_PREFIX}/fleets")))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&mock_server)
        .await;

    let err = transport_for(&mock_server)
        .get(&"fleets".into(), &CancellationToken::new())
        .await
        .expect_err("body is not JSON");

    assert!(matches!(err, FetchError::Decode(_)));
}

#[tokio::test]
async fn cancellation_aborts_slow_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{API_PREFIX}/devices")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "items": [] }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&mock_server)
        .await;

    let transport = transport_for(&mock_server);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = tokio::time::timeout(
        Duration::from_secs(2),
        transport.get(&"devices".into(), &cancel),
    )
    .await
    .expect("cancellation wins the race")
    .expect_err("cancelled request fails");

    assert!(err.is_cancellation());
}

#[tokio::test]
async fn list_view_pages_against_http_server() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{API_PREFIX}/enrollmentrequests")))
        .and(query_param("fieldSelector", "!status.approval.approved"))
        .and(query_param("limit", "2"))
        .and(query_param("continue", "next-page"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "metadata": { "name": "er-3" } }],
            "metadata": {}
        })))
        .with_priority(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{API_PREFIX}/enrollmentrequests")))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                { "metadata": { "name": "er-1" } },
                { "metadata": { "name": "er-2" } }
            ],
            "metadata": { "continue": "next-page", "remainingItemCount": 1 }
        })))
        .mount(&mock_server)
        .await;

    let view = ResourceListView::<Value>::open(
        Arc::new(transport_for(&mock_server)),
        resources::pending_enrollment_requests_query(),
        ListViewOptions {
            page_size: 2,
            poll_interval: Duration::from_secs(60),
            settle_window: Duration::from_millis(100),
        },
    );

    let mut updates = view.subscribe();
    wait_for_data(&mut updates).await;
    let first = view.snapshot();
    assert_eq!(first.items().len(), 2);
    assert_eq!(first.estimated_item_count, 3);

    view.go_to_page(2).unwrap();
    wait_for_data(&mut updates).await;
    let second = view.snapshot();
    assert_eq!(second.current_page, 2);
    assert_eq!(second.items()[0]["metadata"]["name"], "er-3");
    assert!(!second.has_next_page);
}

async fn wait_for_data<T>(
    updates: &mut tokio::sync::watch::Receiver<fleetsync::poller::PollState<T>>,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            updates.changed().await.unwrap();
            let state = updates.borrow_and_update();
            if !state.is_loading && !state.is_refreshing && state.data.is_some() {
                return;
            }
        }
    })
    .await
    .expect("page resolved in time");
}
