//! Minimal HTTP/1.1 origin for integration tests.
//!
//! Serves one static body. HEAD answers the ranged probe with `206` and a
//! `Content-Range` total; GET streams the body in chunks, optionally slowly.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Send a length (Content-Range on HEAD, Content-Length on GET).
    pub send_length: bool,
    /// Stream the GET body chunked even when HEAD announced a length.
    pub chunked_get: bool,
    /// Length to announce instead of the real body length.
    pub declared_length: Option<u64>,
    /// Answer HEAD with `405 Method Not Allowed`.
    pub reject_head: bool,
    /// Status for GET responses.
    pub get_status: u16,
    /// Pause before the GET response head is written.
    pub header_delay: Duration,
    pub chunk_size: usize,
    /// Pause between body chunks.
    pub chunk_delay: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            send_length: true,
            chunked_get: false,
            declared_length: None,
            reject_head: false,
            get_status: 200,
            header_delay: Duration::ZERO,
            chunk_size: 8 * 1024,
            chunk_delay: Duration::ZERO,
        }
    }
}

impl ServerOptions {
    /// A body that takes roughly `chunks * delay` to arrive.
    pub fn trickle(chunk_size: usize, delay: Duration) -> Self {
        Self {
            chunk_size,
            chunk_delay: delay,
            ..Self::default()
        }
    }
}

/// Starts a server in a background thread. Returns the base URL, e.g. `http://127.0.0.1:4242`.
pub fn start(body: Vec<u8>) -> String {
    start_with_options(body, ServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: ServerOptions) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let opts = Arc::new(opts);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let opts = Arc::clone(&opts);
            thread::spawn(move || handle(stream, &body, &opts));
        }
    });
    format!("http://127.0.0.1:{port}")
}

/// A URL nothing listens on.
pub fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}/file.bin")
}

fn handle(mut stream: TcpStream, body: &[u8], opts: &ServerOptions) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let Some(method) = read_method(&mut stream) else {
        return;
    };
    let total = opts.declared_length.unwrap_or(body.len() as u64);

    if method.eq_ignore_ascii_case("HEAD") {
        let response = if opts.reject_head {
            "HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
        } else if opts.send_length {
            format!(
                "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes 0-0/{total}\r\nContent-Length: 1\r\nConnection: close\r\n\r\n"
            )
        } else {
            "HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n".to_string()
        };
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\nContent-Length: 0\r\n\r\n");
        return;
    }

    thread::sleep(opts.header_delay);

    if opts.get_status != 200 {
        let response = format!(
            "HTTP/1.1 {} Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            opts.get_status
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    let head = if opts.chunked_get {
        "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n".to_string()
    } else if opts.send_length {
        format!("HTTP/1.1 200 OK\r\nContent-Length: {total}\r\nConnection: close\r\n\r\n")
    } else {
        "HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n".to_string()
    };
    if stream.write_all(head.as_bytes()).is_err() {
        return;
    }
    for chunk in body.chunks(opts.chunk_size.max(1)) {
        let written = if opts.chunked_get {
            write_chunk(&mut stream, chunk)
        } else {
            stream.write_all(chunk)
        };
        if written.is_err() || stream.flush().is_err() {
            return;
        }
        if !opts.chunk_delay.is_zero() {
            thread::sleep(opts.chunk_delay);
        }
    }
    if opts.chunked_get {
        let _ = stream.write_all(b"0\r\n\r\n");
    }
}

fn write_chunk(stream: &mut TcpStream, chunk: &[u8]) -> std::io::Result<()> {
    write!(stream, "{:x}\r\n", chunk.len())?;
    stream.write_all(chunk)?;
    stream.write_all(b"\r\n")
}

/// Reads the request head and returns its method.
fn read_method(stream: &mut TcpStream) -> Option<String> {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            return None;
        }
        request.extend_from_slice(&buf[..n]);
    }
    let text = String::from_utf8_lossy(&request);
    text.split_whitespace().next().map(str::to_string)
}
