//! HTTP API.
//!
//! A small hand-rolled HTTP/1.1 server over `TcpListener`: one accept loop
//! on a background thread, one handler thread per connection (streaming
//! responses are long-lived). Endpoints:
//!
//! - `GET /video_feed` — multipart MJPEG stream until disconnect/release
//! - `DELETE /stop_video_feed` — release the camera (idempotent)
//! - `GET /food_classification` — snapshot -> classify -> nutrition lookup
//! - `GET /search_food?q=` — food name search
//! - `POST /create_nutritional_info` — create a nutrition record
//! - `GET /health`

pub mod stream;

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::camera::{CameraManager, ReleaseOutcome};
use crate::classify::ClassifierPipeline;
use crate::store::{NewNutritionRecord, NutritionStore};
use stream::{stream_video, BOUNDARY};

const MAX_REQUEST_BYTES: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8790".to_string(),
        }
    }
}

/// Everything a request handler needs. The camera manager is the shared
/// mutable resource; the store and pipeline are serialized with their own
/// locks.
pub struct AppState {
    pub camera: CameraManager,
    pub store: Mutex<Box<dyn NutritionStore>>,
    pub pipeline: Mutex<ClassifierPipeline>,
    pub jpeg_quality: u8,
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: Arc<AppState>) -> Self {
        Self { cfg, state }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let state = self.state;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, state, shutdown_thread) {
                log::error!("api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, state: Arc<AppState>, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let state = state.clone();
                // Handler threads are detached; a streaming viewer holds its
                // thread until the client disconnects or the camera releases.
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &state) {
                        log::warn!("request failed: {err:#}");
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, state: &AppState) -> Result<()> {
    let request = read_request(&mut stream)?;
    log::debug!("{} {}", request.method, request.path);

    match request.path.as_str() {
        "/health" => {
            require_method(&mut stream, &request, "GET")?;
            write_json_response(&mut stream, 200, r#"{"status":"ok"}"#)
        }
        "/video_feed" => {
            require_method(&mut stream, &request, "GET")?;
            handle_video_feed(stream, state)
        }
        "/stop_video_feed" => {
            require_method(&mut stream, &request, "DELETE")?;
            handle_stop_video_feed(&mut stream, state)
        }
        "/food_classification" => {
            require_method(&mut stream, &request, "GET")?;
            handle_food_classification(&mut stream, state)
        }
        "/search_food" => {
            require_method(&mut stream, &request, "GET")?;
            handle_search_food(&mut stream, state, &request)
        }
        "/create_nutritional_info" => {
            require_method(&mut stream, &request, "POST")?;
            handle_create_record(&mut stream, state, &request)
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

/// Early-exits with a 405 if the method does not match.
fn require_method(stream: &mut TcpStream, request: &HttpRequest, expected: &str) -> Result<()> {
    if request.method != expected {
        write_json_response(stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Err(anyhow!(
            "{} {} expects method {}",
            request.method,
            request.path,
            expected
        ));
    }
    Ok(())
}

fn handle_video_feed(mut stream: TcpStream, state: &AppState) -> Result<()> {
    if let Err(err) = state.camera.acquire() {
        let body = serde_json::to_string(
            &serde_json::json!({ "error": format!("camera unavailable: {err:#}") }),
        )?;
        return write_json_response(&mut stream, 503, &body);
    }

    // The 200 is committed before the first frame; failures from here on
    // can only end the byte stream, never become an HTTP error.
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        BOUNDARY
    );
    stream.write_all(header.as_bytes())?;
    let parts = stream_video(&state.camera, state.jpeg_quality, &mut stream);
    log::info!("video feed session ended after {} frames", parts);
    Ok(())
}

fn handle_stop_video_feed(stream: &mut TcpStream, state: &AppState) -> Result<()> {
    let body = match state.camera.release()? {
        ReleaseOutcome::Released => "Stopped streaming",
        ReleaseOutcome::NotOpen => "No camera is currently streaming",
    };
    write_response(stream, 200, "text/plain", body.as_bytes())
}

fn handle_food_classification(stream: &mut TcpStream, state: &AppState) -> Result<()> {
    let result = {
        let mut pipeline = state
            .pipeline
            .lock()
            .map_err(|_| anyhow!("pipeline lock poisoned"))?;
        let mut store = state
            .store
            .lock()
            .map_err(|_| anyhow!("store lock poisoned"))?;
        pipeline.classify(&state.camera, &mut **store)
    };

    let body = match result {
        Ok(result) => serde_json::to_string(&result)?,
        Err(err) => serde_json::to_string(&serde_json::json!({ "error": err.to_string() }))?,
    };
    write_json_response(stream, 200, &body)
}

fn handle_search_food(stream: &mut TcpStream, state: &AppState, request: &HttpRequest) -> Result<()> {
    let Some(query) = request.query.get("q").filter(|q| !q.is_empty()) else {
        return write_json_response(stream, 400, r#"{"error":"missing query"}"#);
    };
    let names = {
        let mut store = state
            .store
            .lock()
            .map_err(|_| anyhow!("store lock poisoned"))?;
        store.search_names(query)?
    };
    let body = serde_json::to_string(&names)?;
    write_json_response(stream, 200, &body)
}

fn handle_create_record(
    stream: &mut TcpStream,
    state: &AppState,
    request: &HttpRequest,
) -> Result<()> {
    let record: NewNutritionRecord = match serde_json::from_slice(&request.body) {
        Ok(record) => record,
        Err(err) => {
            let body =
                serde_json::to_string(&serde_json::json!({ "error": format!("invalid body: {err}") }))?;
            return write_json_response(stream, 400, &body);
        }
    };
    let created = {
        let mut store = state
            .store
            .lock()
            .map_err(|_| anyhow!("store lock poisoned"))?;
        store.create(record)
    };
    match created {
        Ok(created) => {
            let body = serde_json::to_string(&created)?;
            write_json_response(stream, 201, &body)
        }
        Err(err) => {
            let body = serde_json::to_string(&serde_json::json!({ "error": err.to_string() }))?;
            write_json_response(stream, 400, &body)
        }
    }
}

// ----------------------------------------------------------------------------
// Request parsing and response writing
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: HashMap<String, String>,
    body: Vec<u8>,
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break data
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .ok_or_else(|| anyhow!("connection closed mid-request"))?;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .map(|v| v.parse())
        .transpose()
        .map_err(|_| anyhow!("invalid content-length"))?
        .unwrap_or(0);
    if content_length > MAX_REQUEST_BYTES {
        return Err(anyhow!("request body too large"));
    }

    let mut body = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed mid-body"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let (path, query) = parse_path(raw_path);
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        query,
        body,
    })
}

fn parse_path(raw_path: &str) -> (String, HashMap<String, String>) {
    let mut parts = raw_path.splitn(2, '?');
    let path = parts.next().unwrap_or(raw_path).to_string();
    let mut query = HashMap::new();
    if let Some(raw_query) = parts.next() {
        for pair in raw_query.split('&') {
            if let Some((k, v)) = pair.split_once('=') {
                query.insert(k.to_string(), percent_decode(v));
            }
        }
    }
    (path, query)
}

/// Minimal percent-decoding for query values ('+' and %XX escapes).
fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                if let (Some(&hi), Some(&lo)) = (bytes.get(i + 1), bytes.get(i + 2)) {
                    if let (Some(hi), Some(lo)) =
                        ((hi as char).to_digit(16), (lo as char).to_digit(16))
                    {
                        out.push((hi * 16 + lo) as u8);
                        i += 3;
                        continue;
                    }
                }
                out.push(b'%');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).to_string()
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        201 => "HTTP/1.1 201 Created",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}
