//! HTTP front end for [`PuncherService`], served from a background thread.
//!
//! Routes:
//! - `POST /api/punch[?test=true]` with a JSON body
//!   `{"filename", "midiFile" (base64), "transpose", "autofit"}`. `test=true`
//!   answers with the fitted file, base64 encoded, instead of punching it.
//! - `POST /api/punch/raw?transpose=N&autofit=bool&test=bool&filename=name`
//!   with the MIDI file itself as body. `test=true` answers with the fitted
//!   file as `audio/midi`.
//! - `POST /api/stop`
//! - `GET /api/status`

use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{debug, error, info, warn};
use serde::Deserialize;
use tiny_http::{Header, Method, Request, Response, Server};

use super::{PuncherService, SubmitResult};
use crate::error::PuncherError;
use crate::music::{write_midi, PunchOptions};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Largest request body accepted, enough for a base64 encoded MIDI file of
/// a few megabytes.
pub const MAX_BODY_BYTES: u64 = 8 * 1024 * 1024;

/// Largest transposition accepted, in semitones either way.
const MAX_TRANSPOSE: i64 = 127;

/// A response before it is handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Reply {
    fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.into().into_bytes(),
        }
    }

    fn json(body: String) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body: body.into_bytes(),
        }
    }

    fn midi(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: "audio/midi",
            body,
        }
    }
}

/// Body of `POST /api/punch`, as sent by the web front end.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PunchRequest {
    #[serde(default)]
    filename: Option<String>,
    midi_file: String,
    #[serde(default)]
    transpose: Option<i64>,
    #[serde(default)]
    autofit: bool,
}

/// How a test-mode punch hands back the fitted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Preview {
    Base64,
    Midi,
}

/// Running HTTP server; stops when dropped.
pub struct HttpServer {
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    addr: Option<SocketAddr>,
}

impl HttpServer {
    /// Bind `addr` (e.g. `0.0.0.0:8080`) and start serving.
    pub fn start(addr: &str, service: Arc<PuncherService>) -> io::Result<Self> {
        let server = Server::http(addr).map_err(io::Error::other)?;
        let local = server.server_addr().to_ip();
        info!("control surface listening on {addr}");

        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_clone = stop_flag.clone();
        let thread = thread::Builder::new()
            .name("http".into())
            .spawn(move || {
                while !stop_clone.load(Ordering::Relaxed) {
                    match server.recv_timeout(POLL_INTERVAL) {
                        Ok(Some(request)) => serve(&service, request),
                        Ok(None) => continue,
                        Err(e) => {
                            error!("http server stopped: {e}");
                            break;
                        }
                    }
                }
            })?;

        Ok(Self {
            stop_flag,
            thread: Some(thread),
            addr: local,
        })
    }

    /// Address actually bound, useful when port 0 was requested.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve(service: &PuncherService, mut request: Request) {
    let method = request.method().clone();
    let url = request.url().to_string();
    debug!("{method} {url}");

    let reply = match read_body(request.as_reader(), MAX_BODY_BYTES) {
        Ok(Some(body)) => handle(service, &method, &url, &body),
        Ok(None) => Reply::text(413, format!("request body exceeds {MAX_BODY_BYTES} bytes")),
        Err(e) => {
            warn!("could not read request body: {e}");
            Reply::text(400, "unreadable request body")
        }
    };
    let mut response = Response::from_data(reply.body).with_status_code(reply.status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], reply.content_type.as_bytes()) {
        response = response.with_header(header);
    }
    if let Err(e) = request.respond(response) {
        warn!("could not answer {url}: {e}");
    }
}

/// Read at most `limit` bytes; `None` if the body is longer.
fn read_body(reader: impl Read, limit: u64) -> io::Result<Option<Vec<u8>>> {
    let mut body = Vec::new();
    reader.take(limit + 1).read_to_end(&mut body)?;
    if body.len() as u64 > limit {
        return Ok(None);
    }
    Ok(Some(body))
}

/// Route one request.
pub fn handle(service: &PuncherService, method: &Method, url: &str, body: &[u8]) -> Reply {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    match (method, path) {
        (Method::Post, "/api/punch") => punch_json(service, query, body),
        (Method::Post, "/api/punch/raw") => punch_raw(service, query, body),
        (Method::Post, "/api/stop") => {
            service.stop();
            Reply::text(200, "ok")
        }
        (Method::Get, "/api/status") => match serde_json::to_string(&service.status()) {
            Ok(json) => Reply::json(json),
            Err(e) => Reply::text(500, e.to_string()),
        },
        _ => Reply::text(404, "not found"),
    }
}

fn punch_json(service: &PuncherService, query: &str, body: &[u8]) -> Reply {
    let test = query_pairs(query)
        .iter()
        .any(|(key, value)| key == "test" && value == "true");
    let request: PunchRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => return Reply::text(400, format!("bad punch request: {e}")),
    };
    let transpose = match transposition(request.transpose.unwrap_or(0)) {
        Ok(shift) => shift,
        Err(reply) => return reply,
    };
    let midi = match BASE64.decode(request.midi_file.trim()) {
        Ok(midi) => midi,
        Err(e) => return Reply::text(400, format!("midiFile is not base64: {e}")),
    };
    let options = PunchOptions {
        adjust: None,
        autofit: request.autofit,
        transpose,
    };
    let filename = request.filename.filter(|f| !f.is_empty());
    punch(service, &midi, &options, filename, test.then_some(Preview::Base64))
}

fn punch_raw(service: &PuncherService, query: &str, body: &[u8]) -> Reply {
    let mut options = PunchOptions::default();
    let mut test = false;
    let mut filename = None;
    for (key, value) in query_pairs(query) {
        match key.as_str() {
            "transpose" => {
                let parsed = match value.parse::<i64>() {
                    Ok(shift) => transposition(shift),
                    Err(_) => Err(Reply::text(400, format!("bad transpose value {value:?}"))),
                };
                match parsed {
                    Ok(shift) => options.transpose = shift,
                    Err(reply) => return reply,
                }
            }
            "autofit" => options.autofit = value == "true",
            "test" => test = value == "true",
            "filename" => filename = Some(value).filter(|v| !v.is_empty()),
            _ => {}
        }
    }
    punch(service, body, &options, filename, test.then_some(Preview::Midi))
}

/// Range-checked transposition in semitones.
fn transposition(shift: i64) -> Result<i32, Reply> {
    if shift.abs() > MAX_TRANSPOSE {
        return Err(Reply::text(
            400,
            format!("transpose {shift} is outside -{MAX_TRANSPOSE}..={MAX_TRANSPOSE}"),
        ));
    }
    i32::try_from(shift).map_err(|_| Reply::text(400, format!("bad transpose value {shift}")))
}

fn punch(
    service: &PuncherService,
    midi: &[u8],
    options: &PunchOptions,
    filename: Option<String>,
    preview: Option<Preview>,
) -> Reply {
    if preview.is_none() && service.is_active() {
        return Reply::text(409, "the puncher is still active");
    }

    let timeline = match service.prepare(midi, options) {
        Ok(timeline) => timeline,
        Err(e @ (PuncherError::TranspositionInfeasible { .. } | PuncherError::Midi(_))) => {
            return Reply::text(400, e.to_string())
        }
        Err(e) => return Reply::text(500, e.to_string()),
    };

    if let Some(preview) = preview {
        return match (write_midi(&timeline), preview) {
            (Ok(bytes), Preview::Base64) => Reply::text(200, BASE64.encode(bytes)),
            (Ok(bytes), Preview::Midi) => Reply::midi(bytes),
            (Err(e), _) => Reply::text(500, e.to_string()),
        };
    }

    match service.submit(timeline, filename) {
        Ok(SubmitResult::Accepted) => Reply::text(200, "ok"),
        Ok(SubmitResult::AlreadyActive) => Reply::text(409, "the puncher is still active"),
        Err(e) => Reply::text(500, e.to_string()),
    }
}

/// Split a query string into decoded key/value pairs.
fn query_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (percent_decode(key), percent_decode(value))
        })
        .collect()
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            other => out.push(other),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
