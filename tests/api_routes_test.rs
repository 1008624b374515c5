use std::io::Write;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use tower::ServiceExt;

use iptv_relay::config::{Config, FilterSpec, RelayConfig};
use iptv_relay::models::FilterField;
use iptv_relay::proxy::Provider;
use iptv_relay::services::RelayManager;
use iptv_relay::web::{router, AppState};

const PLAYLIST: &str = "#EXTM3U\n\
    #EXTINF:-1 tvg-id=\"id1\",Channel 1\n\
    http://example.com/stream1\n\
    #EXTINF:-1 tvg-id=\"id2\",Channel 2\n\
    http://example.com/stream2\n";

const GUIDE: &str = "<tv date=\"20260807\">\
    <channel id=\"id1\"><display-name>Channel 1</display-name></channel>\
    <channel id=\"unrelated\"><display-name>Unrelated</display-name></channel>\
    <programme start=\"20260807060000 +0000\" channel=\"id1\"><title>Show</title></programme>\
    <programme start=\"20260807060000 +0000\" channel=\"unrelated\"><title>Other</title></programme>\
    </tv>";

struct TestApp {
    app: Router,
    provider: Arc<Provider>,
    // Source files must outlive the provider that refreshes from them.
    _playlist: tempfile::NamedTempFile,
    _guide: tempfile::NamedTempFile,
}

fn write_temp(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn build_app(relay_enabled: bool) -> TestApp {
    let playlist = write_temp(PLAYLIST);
    let guide = write_temp(GUIDE);

    let config = Config {
        log_level: "info".to_string(),
        playlist_url: playlist.path().to_str().unwrap().to_string(),
        guide_url: guide.path().to_str().unwrap().to_string(),
        listen_address: "127.0.0.1:0".to_string(),
        server_address: "test.example:6078".to_string(),
        refresh_interval: "12h".to_string(),
        relay: RelayConfig {
            enabled: relay_enabled,
            ffmpeg_command: "ffmpeg".to_string(),
            max_streams: 1,
        },
        filters: vec![FilterSpec {
            pattern: ".*".to_string(),
            field: FilterField::Id,
        }],
    };

    let rules = config.compile_filters().unwrap();
    let provider = Arc::new(Provider::new(&config, rules));
    let relay = Arc::new(RelayManager::new(&config.relay));
    let state = AppState::new(Arc::new(config), Arc::clone(&provider), relay);

    TestApp {
        app: router(state),
        provider,
        _playlist: playlist,
        _guide: guide,
    }
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    request(app, Method::GET, uri).await
}

async fn request(app: &Router, method: Method, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn ping_responds() {
    let test_app = build_app(false);
    let (status, body) = get(&test_app.app, "/ping").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"PONG");
}

#[tokio::test]
async fn playlist_preserves_original_urls_without_relay() {
    let test_app = build_app(false);
    test_app.provider.refresh().await.unwrap();

    let (status, body) = get(&test_app.app, "/iptv-playlist").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        String::from_utf8(body).unwrap(),
        "#EXTM3U\n\
         #EXTINF:-1 tvg-id=\"id1\",Channel 1\n\
         http://example.com/stream1\n\
         #EXTINF:-1 tvg-id=\"id2\",Channel 2\n\
         http://example.com/stream2\n"
    );
}

#[tokio::test]
async fn playlist_rewrites_urls_when_relay_is_enabled() {
    let test_app = build_app(true);
    test_app.provider.refresh().await.unwrap();

    let (status, body) = get(&test_app.app, "/iptv-playlist").await;
    assert_eq!(status, StatusCode::OK);
    let body = String::from_utf8(body).unwrap();
    assert!(body.contains("http://test.example:6078/channel/0\n"));
    assert!(body.contains("http://test.example:6078/channel/1\n"));
    assert!(!body.contains("http://example.com/stream1"));
}

#[tokio::test]
async fn guide_is_filtered_to_known_channels() {
    let test_app = build_app(false);
    test_app.provider.refresh().await.unwrap();

    let response = test_app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/epg-guide")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/xml"
    );

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = String::from_utf8(body.to_vec()).unwrap();
    assert!(body.starts_with(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><!DOCTYPE tv SYSTEM \"xmltv.dtd\">"
    ));
    assert!(body.contains("<channel id=\"id1\">"));
    assert!(!body.contains("unrelated"));
}

#[tokio::test]
async fn non_integer_channel_index_is_a_bad_request() {
    let test_app = build_app(true);
    let (status, _) = get(&test_app.app, "/channel/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn channel_request_with_relay_disabled_is_not_found() {
    let test_app = build_app(false);
    test_app.provider.refresh().await.unwrap();
    let (status, _) = get(&test_app.app, "/channel/0").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn out_of_range_channel_index_is_not_found() {
    let test_app = build_app(true);
    test_app.provider.refresh().await.unwrap();
    let (status, _) = get(&test_app.app, "/channel/99").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn refresh_succeeds_and_publishes() {
    let test_app = build_app(false);

    let (status, body) = request(&test_app.app, Method::PUT, "/refresh").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"Provider refreshed successfully");

    let (_, playlist) = get(&test_app.app, "/iptv-playlist").await;
    assert!(String::from_utf8(playlist).unwrap().contains("Channel 1"));
}

#[tokio::test]
async fn failed_refresh_reports_500_and_keeps_old_snapshot() {
    let test_app = build_app(false);
    test_app.provider.refresh().await.unwrap();

    // Corrupt the playlist source so the next refresh fails.
    std::fs::write(test_app._playlist.path(), "not a playlist\n").unwrap();

    let (status, _) = request(&test_app.app, Method::PUT, "/refresh").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (_, playlist) = get(&test_app.app, "/iptv-playlist").await;
    assert!(String::from_utf8(playlist).unwrap().contains("Channel 1"));
}

#[tokio::test]
async fn debug_reports_stream_and_refresh_state() {
    let test_app = build_app(false);
    test_app.provider.refresh().await.unwrap();

    let (status, body) = get(&test_app.app, "/debug").await;
    assert_eq!(status, StatusCode::OK);

    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["status"], "ok");
    assert_eq!(value["streams"]["activeCount"], 0);
    assert_eq!(value["streams"]["max"], 1);
    assert_eq!(value["streams"]["total"], 0);
    assert!(value["streams"]["lastRefresh"].is_string());
    assert_eq!(value["channels"], 2);
    assert!(value["system"]["cpus"].as_u64().unwrap() > 0);
}
