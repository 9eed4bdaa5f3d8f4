//! Read-only HTTP service answering manifest lookups from the artifact tree.
//!
//! `GET /description?protocol-version=0.19&name=<owner/repo>&version=<x.y.z>`
//!
//! One request per connection, one thread per connection.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::mirror::MirrorPaths;
use crate::types::PackageName;
use crate::version::Version;

/// The only client protocol version served.
pub const PROTOCOL_VERSION: &str = "0.19";

const MAX_HEADER_LINES: usize = 100;
const MAX_LINE_BYTES: u64 = 8 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A response before it is written to the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Response {
    fn json(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body,
        }
    }

    fn text(status: u16, message: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: message.as_bytes().to_vec(),
        }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            _ => "Internal Server Error",
        }
    }

    fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        write!(
            out,
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
            self.status,
            self.reason(),
            self.content_type,
            self.body.len()
        )?;
        if self.status == 405 {
            out.write_all(b"Allow: GET\r\n")?;
        }
        out.write_all(b"\r\n")?;
        out.write_all(&self.body)?;
        out.flush()
    }
}

/// Route one request.
pub fn handle(paths: &MirrorPaths, method: &str, target: &str) -> Response {
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    if path != "/description" {
        return Response::text(404, "Not found\n");
    }
    if method != "GET" {
        return Response::text(405, "Only GET is supported\n");
    }

    let mut protocol = None;
    let mut name = None;
    let mut version = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "protocol-version" => protocol = Some(value.into_owned()),
            "name" => name = Some(value.into_owned()),
            "version" => version = Some(value.into_owned()),
            _ => {}
        }
    }

    if protocol.as_deref() != Some(PROTOCOL_VERSION) {
        return Response::text(400, "This server only supports protocol version 0.19\n");
    }
    let Some(name) = name.and_then(|n| n.parse::<PackageName>().ok()) else {
        return Response::text(400, "Missing or invalid package name\n");
    };
    let Some(version) = version.filter(|v| Version::parse(v).is_some()) else {
        return Response::text(400, "Missing or invalid version\n");
    };

    let artifact = paths.description(&name, &version);
    let bytes = match std::fs::read(&artifact) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Response::text(404, "No such package version\n");
        }
        Err(e) => {
            log::warn!("Reading {} failed: {}", artifact.display(), e);
            return Response::text(500, "Internal error\n");
        }
    };

    match serde_json::from_slice::<serde_json::Value>(&bytes)
        .and_then(|value| serde_json::to_vec(&value))
    {
        Ok(body) => Response::json(body),
        Err(e) => {
            log::warn!("{} is not valid JSON: {}", artifact.display(), e);
            Response::text(500, "Internal error\n")
        }
    }
}

pub struct ManifestServer {
    listener: TcpListener,
    paths: Arc<MirrorPaths>,
}

impl ManifestServer {
    pub fn bind(addr: &str, paths: MirrorPaths) -> Result<Self, ServeError> {
        let listener = TcpListener::bind(addr).map_err(|source| ServeError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self {
            listener,
            paths: Arc::new(paths),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` is set. A connection is needed to
    /// wake the accept loop after setting it.
    pub fn serve(&self, shutdown: &AtomicBool) -> Result<(), ServeError> {
        log::info!(
            "Serving manifests from {} on {}",
            self.paths.root().display(),
            self.local_addr()?
        );

        for stream in self.listener.incoming() {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }

            match stream {
                Ok(stream) => {
                    let paths = Arc::clone(&self.paths);
                    thread::spawn(move || {
                        if let Err(e) = handle_connection(&paths, stream) {
                            log::debug!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    log::warn!("Failed to accept connection: {}", e);
                }
            }
        }

        log::info!("Manifest server stopped");
        Ok(())
    }
}

/// Wake a blocked [`ManifestServer::serve`] so it notices its shutdown flag.
pub fn wake(addr: SocketAddr) {
    let _ = TcpStream::connect_timeout(&addr, Duration::from_secs(1));
}

fn handle_connection(paths: &MirrorPaths, stream: TcpStream) -> io::Result<()> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut reader = BufReader::new(&stream);
    let mut writer = &stream;

    let Some(request_line) = read_line(&mut reader)? else {
        return Ok(());
    };
    for _ in 0..MAX_HEADER_LINES {
        match read_line(&mut reader)? {
            Some(line) if !line.is_empty() => continue,
            _ => break,
        }
    }

    let mut parts = request_line.split_whitespace();
    let response = match (parts.next(), parts.next()) {
        (Some(method), Some(target)) => {
            let response = handle(paths, method, target);
            log::debug!("{} {} -> {}", method, target, response.status);
            response
        }
        _ => Response::text(400, "Malformed request\n"),
    };
    response.write_to(&mut writer)
}

/// One CRLF-terminated line without its terminator, or None at EOF.
fn read_line(reader: &mut impl BufRead) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    let n = reader.by_ref().take(MAX_LINE_BYTES).read_until(b'\n', &mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}
