use anyhow::Result;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use nutricam::api::{ApiConfig, ApiHandle, ApiServer, AppState};
use nutricam::classify::{ClassifierPipeline, LabelTable, StubClassifier};
use nutricam::{
    CameraManager, InMemoryNutritionStore, NewNutritionRecord, NutritionStore, SourceConfig,
};

fn record(food: &str) -> NewNutritionRecord {
    NewNutritionRecord {
        food: food.to_string(),
        amount_g: 100.0,
        calories: 52.0,
        total_fat_g: 0.2,
        cholesterol_mg: 0.0,
        sodium_mg: 1.0,
        carbohydrates_g: 14.0,
        protein_g: 0.3,
        sugar_g: 10.0,
    }
}

struct TestApi {
    state: Arc<AppState>,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    /// Server over a stub camera and an in-memory store. The stub
    /// classifier is pinned to class 1 = "tomato".
    fn new(device: &str, seed: impl FnOnce(&mut dyn NutritionStore)) -> Result<Self> {
        let camera = CameraManager::new(
            SourceConfig {
                device: device.to_string(),
                target_fps: 50,
                width: 32,
                height: 24,
            },
            std::time::Duration::from_millis(500),
        );
        let mut store = InMemoryNutritionStore::new();
        seed(&mut store);

        let labels = LabelTable::new(vec!["apple".into(), "tomato".into(), "banana".into()]);
        let backend = StubClassifier::new(3).with_fixed_class(1);
        let pipeline = ClassifierPipeline::new(Some(Box::new(backend)), labels, 64);

        let state = Arc::new(AppState {
            camera,
            store: Mutex::new(Box::new(store)),
            pipeline: Mutex::new(pipeline),
            jpeg_quality: 80,
        });

        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
        };
        let api_handle = ApiServer::new(api_config, state.clone()).spawn()?;

        Ok(Self {
            state,
            api_handle: Some(api_handle),
        })
    }

    fn handle(&self) -> &ApiHandle {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
    }

    fn request(&self, raw: &str) -> Result<(String, Vec<u8>)> {
        let mut stream = TcpStream::connect(self.handle().addr)?;
        stream.write_all(raw.as_bytes())?;
        let mut response = Vec::new();
        stream.read_to_end(&mut response)?;
        match response.windows(4).position(|w| w == b"\r\n\r\n") {
            Some(pos) => Ok((
                String::from_utf8_lossy(&response[..pos]).to_string(),
                response[pos + 4..].to_vec(),
            )),
            None => Ok((String::from_utf8_lossy(&response).to_string(), Vec::new())),
        }
    }

    fn get(&self, path: &str) -> Result<(String, String)> {
        let raw = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (headers, body) = self.request(&raw)?;
        Ok((headers, String::from_utf8_lossy(&body).to_string()))
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        let _ = self.state.camera.release();
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

#[test]
fn health_endpoint_is_available() -> Result<()> {
    let api = TestApi::new("stub://cam", |_| {})?;
    let (headers, body) = api.get("/health")?;
    assert!(headers.contains("200 OK"));
    assert!(body.contains(r#""status":"ok""#));
    Ok(())
}

#[test]
fn unknown_route_is_not_found() -> Result<()> {
    let api = TestApi::new("stub://cam", |_| {})?;
    let (headers, body) = api.get("/nope")?;
    assert!(headers.contains("404 Not Found"));
    assert!(body.contains("not_found"));
    Ok(())
}

#[test]
fn search_food_matches_case_insensitively() -> Result<()> {
    let api = TestApi::new("stub://cam", |store| {
        store.create(record("Apple")).unwrap();
        store.create(record("Pineapple")).unwrap();
        store.create(record("Banana")).unwrap();
    })?;

    let (headers, body) = api.get("/search_food?q=app")?;
    assert!(headers.contains("200 OK"));
    let names: Value = serde_json::from_str(&body)?;
    assert_eq!(names, serde_json::json!(["Apple", "Pineapple"]));
    Ok(())
}

#[test]
fn search_food_requires_query() -> Result<()> {
    let api = TestApi::new("stub://cam", |_| {})?;
    let (headers, _body) = api.get("/search_food")?;
    assert!(headers.contains("400 Bad Request"));
    let (headers, _body) = api.get("/search_food?q=")?;
    assert!(headers.contains("400 Bad Request"));
    Ok(())
}

#[test]
fn create_then_search_round_trip() -> Result<()> {
    let api = TestApi::new("stub://cam", |_| {})?;

    let payload = serde_json::to_string(&record("Mango"))?;
    let raw = format!(
        "POST /create_nutritional_info HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        payload.len(),
        payload
    );
    let (headers, body) = api.request(&raw)?;
    assert!(headers.contains("201 Created"));
    let created: Value = serde_json::from_slice(&body)?;
    assert_eq!(created["food"], "Mango");
    assert!(created["id"].as_i64().is_some());

    let (_, body) = api.get("/search_food?q=man")?;
    let names: Value = serde_json::from_str(&body)?;
    assert_eq!(names, serde_json::json!(["Mango"]));
    Ok(())
}

#[test]
fn create_rejects_malformed_body() -> Result<()> {
    let api = TestApi::new("stub://cam", |_| {})?;
    let payload = r#"{"food": 42}"#;
    let raw = format!(
        "POST /create_nutritional_info HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n{}",
        payload.len(),
        payload
    );
    let (headers, body) = api.request(&raw)?;
    assert!(headers.contains("400 Bad Request"));
    assert!(String::from_utf8_lossy(&body).contains("error"));
    Ok(())
}

#[test]
fn classification_returns_matching_record() -> Result<()> {
    let api = TestApi::new("stub://cam", |store| {
        store.create(record("Tomato, raw")).unwrap();
    })?;

    let (headers, body) = api.get("/food_classification")?;
    assert!(headers.contains("200 OK"));
    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["label"], "tomato");
    assert_eq!(value["food_info"]["food"], "Tomato, raw");
    Ok(())
}

#[test]
fn classification_without_match_returns_null_record() -> Result<()> {
    let api = TestApi::new("stub://cam", |_| {})?;

    let (headers, body) = api.get("/food_classification")?;
    assert!(headers.contains("200 OK"));
    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["label"], "tomato");
    assert!(value["food_info"].is_null());
    assert!(value.get("error").is_none());
    Ok(())
}

#[test]
fn classification_with_dead_camera_reports_capture_failure() -> Result<()> {
    let api = TestApi::new("stub://cam?frames=0", |_| {})?;

    let (headers, body) = api.get("/food_classification")?;
    assert!(headers.contains("200 OK"));
    let value: Value = serde_json::from_str(&body)?;
    assert!(value["error"]
        .as_str()
        .expect("error message")
        .contains("capture"));
    Ok(())
}

#[test]
fn stop_video_feed_is_idempotent() -> Result<()> {
    let api = TestApi::new("stub://cam", |_| {})?;
    api.state.camera.acquire()?;

    let stop = "DELETE /stop_video_feed HTTP/1.1\r\nHost: localhost\r\n\r\n";
    let (headers, body) = api.request(stop)?;
    assert!(headers.contains("200 OK"));
    assert_eq!(String::from_utf8_lossy(&body), "Stopped streaming");

    let (headers, body) = api.request(stop)?;
    assert!(headers.contains("200 OK"));
    assert_eq!(
        String::from_utf8_lossy(&body),
        "No camera is currently streaming"
    );
    Ok(())
}

#[test]
fn video_feed_streams_multipart_jpeg() -> Result<()> {
    // A limited source ends the stream on its own, so the response is finite.
    let api = TestApi::new("stub://cam?frames=2", |_| {})?;

    let (headers, body) = api.request("GET /video_feed HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("200 OK"));
    assert!(headers.contains("multipart/x-mixed-replace; boundary=frame"));

    let boundary_count = body
        .windows(b"--frame\r\n".len())
        .filter(|w| w == b"--frame\r\n")
        .count();
    assert_eq!(boundary_count, 2);
    assert!(body.windows(2).any(|w| w == [0xFF, 0xD8]));
    Ok(())
}

#[test]
fn video_feed_rejects_wrong_method() -> Result<()> {
    let api = TestApi::new("stub://cam", |_| {})?;
    let (headers, _body) = api.request("POST /video_feed HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("405 Method Not Allowed"));
    Ok(())
}

#[test]
fn snapshot_during_streaming_serves_both_paths() -> Result<()> {
    let api = TestApi::new("stub://cam", |store| {
        store.create(record("Tomato, raw")).unwrap();
    })?;

    // Start a streaming viewer and leave it connected.
    let mut viewer = TcpStream::connect(api.handle().addr)?;
    viewer.write_all(b"GET /video_feed HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    let mut first_bytes = [0u8; 256];
    let n = viewer.read(&mut first_bytes)?;
    assert!(n > 0, "stream produced no bytes");

    // Snapshot classification must succeed while the stream is live.
    let (headers, body) = api.get("/food_classification")?;
    assert!(headers.contains("200 OK"));
    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["label"], "tomato");

    drop(viewer);
    Ok(())
}
