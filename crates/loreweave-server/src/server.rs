//! [`StoryServer`] – HTTP front door for the [`NarrativeEngine`].
//!
//! Listens on `0.0.0.0:5000` (configurable via [`StoryServer::with_port`]).
//! Each connection carries one request and is closed after the response.
//!
//! | Request | Response |
//! |---|---|
//! | `POST /story` | `200` scene JSON, `400` bad input, `500` service failure |
//! | `GET /` | `200` embedded play page |
//! | `GET /health` | `200 {"status":"ok","fragments":N}` |
//! | `OPTIONS *` | `204` CORS preflight |
//! | known path, other method | `405` |
//! | anything else | `404` |

use std::net::SocketAddr;
use std::sync::Arc;

use loreweave_runtime::NarrativeEngine;
use loreweave_types::{LoomError, PlayerTurn};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Default TCP port for the story endpoint.
pub const DEFAULT_PORT: u16 = 5000;

/// The compiled-in play page (HTML + CSS + JS).
const PLAY_HTML: &str = include_str!("play.html");

const MAX_HEAD_BYTES: usize = 16 * 1024;
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Body of every 500 response; details go to the log only.
const SERVICE_UNAVAILABLE: &str = "Story service unavailable";

// ---------------------------------------------------------------------------
// StoryServer
// ---------------------------------------------------------------------------

/// Serves story cycles over HTTP to any number of concurrent players.
pub struct StoryServer {
    engine: Arc<NarrativeEngine>,
    port: u16,
}

impl StoryServer {
    /// Create a server backed by `engine` on the [`DEFAULT_PORT`].
    pub fn new(engine: Arc<NarrativeEngine>) -> Self {
        Self {
            engine,
            port: DEFAULT_PORT,
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind `0.0.0.0:<port>` and serve until the task is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`LoomError::Io`] if the TCP listener cannot bind.
    pub async fn run(self) -> Result<(), LoomError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| LoomError::Io(format!("bind error on {addr}: {e}")))?;
        info!(%addr, "story server listening on http://localhost:{}", self.port);
        self.serve(listener).await
    }

    /// Accept connections on an already-bound listener, one task each.
    pub async fn serve(self, listener: TcpListener) -> Result<(), LoomError> {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let engine = Arc::clone(&self.engine);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, engine).await {
                            warn!(%peer, error = %e, "connection error");
                        }
                    });
                }
                Err(e) => error!(error = %e, "accept error"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    engine: Arc<NarrativeEngine>,
) -> std::io::Result<()> {
    let response = match read_request(&mut stream).await? {
        Incoming::Request(request) => {
            let response = route(&engine, &request).await;
            info!(%peer, method = %request.method, path = %request.path, status = response.status, "request");
            response
        }
        Incoming::Rejected(response) => {
            debug!(%peer, status = response.status, "rejected unreadable request");
            response
        }
        Incoming::Closed => return Ok(()),
    };
    stream.write_all(&response.to_bytes()).await?;
    stream.shutdown().await
}

// ---------------------------------------------------------------------------
// Request reading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpRequest {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct RequestHead {
    pub method: String,
    pub path: String,
    pub content_length: usize,
}

#[derive(Debug)]
pub(crate) enum Incoming {
    Request(HttpRequest),
    /// The bytes could not form a request; answer with this and close.
    Rejected(HttpResponse),
    /// The peer closed before sending anything.
    Closed,
}

/// Parse the request line and headers (everything before the blank line).
///
/// The query string is dropped from the path.  `None` when the request line
/// is malformed or `Content-Length` is not a number.
pub(crate) fn parse_head(head: &str) -> Option<RequestHead> {
    let mut lines = head.lines();
    let mut parts = lines.next()?.split_whitespace();
    let method = parts.next()?.to_ascii_uppercase();
    let target = parts.next()?;
    parts.next().filter(|v| v.starts_with("HTTP/"))?;
    let path = target.split('?').next().unwrap_or(target).to_string();

    let mut content_length = 0;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().ok()?;
            }
        }
    }
    Some(RequestHead {
        method,
        path,
        content_length,
    })
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

pub(crate) async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Incoming> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(end) = find_head_end(&buf) {
            break end;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Ok(Incoming::Rejected(HttpResponse::error(400, "Request headers too large")));
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(if buf.is_empty() {
                Incoming::Closed
            } else {
                Incoming::Rejected(HttpResponse::error(400, "Incomplete request"))
            });
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]);
    let Some(head) = parse_head(&head) else {
        return Ok(Incoming::Rejected(HttpResponse::error(400, "Malformed request")));
    };
    if head.content_length > MAX_BODY_BYTES {
        return Ok(Incoming::Rejected(HttpResponse::error(413, "Request body too large")));
    }

    let mut body = buf.split_off(head_end + 4);
    while body.len() < head.content_length {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(Incoming::Rejected(HttpResponse::error(400, "Incomplete request body")));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(head.content_length);

    Ok(Incoming::Request(HttpRequest {
        method: head.method,
        path: head.path,
        body,
    }))
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl HttpResponse {
    fn json(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "application/json",
            body,
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::json(status, json!({ "error": message }).to_string())
    }

    fn html(body: &str) -> Self {
        Self {
            status: 200,
            content_type: "text/html; charset=utf-8",
            body: body.to_string(),
        }
    }

    fn no_content() -> Self {
        Self {
            status: 204,
            content_type: "text/plain",
            body: String::new(),
        }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            204 => "No Content",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            413 => "Payload Too Large",
            _ => "Internal Server Error",
        }
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        format!(
            "HTTP/1.1 {} {}\r\n\
             Content-Type: {}\r\n\
             Content-Length: {}\r\n\
             Access-Control-Allow-Origin: *\r\n\
             Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
             Access-Control-Allow-Headers: Content-Type\r\n\
             Connection: close\r\n\
             \r\n\
             {}",
            self.status,
            self.reason(),
            self.content_type,
            self.body.len(),
            self.body
        )
        .into_bytes()
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

pub(crate) async fn route(engine: &NarrativeEngine, request: &HttpRequest) -> HttpResponse {
    match (request.method.as_str(), request.path.as_str()) {
        ("OPTIONS", _) => HttpResponse::no_content(),
        ("GET", "/") => HttpResponse::html(PLAY_HTML),
        ("GET", "/health") => health(engine),
        ("POST", "/story") => story(engine, &request.body).await,
        (_, "/" | "/health" | "/story") => HttpResponse::error(405, "Method not allowed"),
        _ => HttpResponse::error(404, "Not found"),
    }
}

fn health(engine: &NarrativeEngine) -> HttpResponse {
    match engine.store().len() {
        Ok(fragments) => {
            HttpResponse::json(200, json!({ "status": "ok", "fragments": fragments }).to_string())
        }
        Err(e) => {
            error!(error = %e, "health check could not read story memory");
            HttpResponse::error(500, SERVICE_UNAVAILABLE)
        }
    }
}

async fn story(engine: &NarrativeEngine, body: &[u8]) -> HttpResponse {
    let turn: PlayerTurn = match serde_json::from_slice(body) {
        Ok(turn) => turn,
        Err(e) => return HttpResponse::error(400, &format!("Invalid JSON body: {e}")),
    };

    match engine.run(&turn).await {
        Ok(scene) => match serde_json::to_string(&scene) {
            Ok(body) => HttpResponse::json(200, body),
            Err(e) => {
                error!(error = %e, "could not encode scene");
                HttpResponse::error(500, SERVICE_UNAVAILABLE)
            }
        },
        Err(e) if e.is_client_error() => HttpResponse::error(400, e.message()),
        Err(e) => {
            error!(error = %e, "story cycle failed");
            HttpResponse::error(500, SERVICE_UNAVAILABLE)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
