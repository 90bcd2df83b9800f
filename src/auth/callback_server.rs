//! Local HTTP callback server for the authorization code flow.
//!
//! Listens on the loopback port named by the redirect URI, answers the
//! browser with a short page, and hands the full redirect URL back.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};
use url::Url;

use crate::error::AuthError;

/// How long to wait for the browser before giving up.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// Returns the `(port, path)` to listen on if `redirect_uri` points at this
/// machine over plain HTTP.
pub fn loopback_target(redirect_uri: &str) -> Option<(u16, String)> {
    let url = Url::parse(redirect_uri).ok()?;
    if url.scheme() != "http" {
        return None;
    }
    match url.host_str()? {
        "localhost" | "127.0.0.1" | "[::1]" => {}
        _ => return None,
    }
    Some((url.port_or_known_default()?, url.path().to_string()))
}

/// Wait for a single OAuth callback on `127.0.0.1:{port}{path}`.
///
/// Returns the full callback URL (including query parameters). The listener
/// is dropped once a callback arrives or `timeout` elapses.
pub fn wait_for_callback(port: u16, path: &str, timeout: Duration) -> Result<String, AuthError> {
    let addr = format!("127.0.0.1:{}", port);

    let listener = TcpListener::bind(&addr).map_err(|e| {
        error!("Failed to bind callback server to {}: {}", addr, e);
        AuthError::Interaction(format!("failed to start callback server on {}: {}", addr, e))
    })?;

    // Non-blocking so the deadline can be checked between accepts
    listener
        .set_nonblocking(true)
        .map_err(|e| AuthError::Interaction(format!("callback server configuration: {}", e)))?;

    info!("OAuth callback server listening on {}", addr);
    let deadline = Instant::now() + timeout;

    loop {
        if Instant::now() >= deadline {
            return Err(AuthError::CallbackTimeout);
        }

        match listener.accept() {
            Ok((stream, peer_addr)) => {
                debug!("Connection from {}", peer_addr);
                if let Some(target) = handle_connection(stream, path) {
                    info!("OAuth callback received");
                    return Ok(format!("http://localhost:{}{}", port, target));
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
                return Err(AuthError::Interaction(format!("connection error: {}", e)));
            }
        }
    }
}

/// Handle an incoming HTTP connection.
///
/// Returns the request target if this was the OAuth callback, None otherwise.
fn handle_connection(mut stream: TcpStream, expected_path: &str) -> Option<String> {
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));

    let mut buffer = [0; 4096];
    let bytes_read = match stream.read(&mut buffer) {
        Ok(n) => n,
        Err(e) => {
            debug!("Failed to read request: {}", e);
            return None;
        }
    };

    let request = String::from_utf8_lossy(&buffer[..bytes_read]);
    let request_line = request.lines().next()?;
    debug!("Received request: {}", request_line);

    let mut parts = request_line.split_whitespace();
    let (method, target) = match (parts.next(), parts.next()) {
        (Some(m), Some(t)) => (m, t),
        _ => {
            send_response(&mut stream, "400 Bad Request", "Bad Request");
            return None;
        }
    };

    if method != "GET" {
        send_response(&mut stream, "405 Method Not Allowed", "Method Not Allowed");
        return None;
    }

    let target_path = target.split('?').next().unwrap_or(target);
    if target_path != expected_path {
        send_response(&mut stream, "404 Not Found", "Not Found");
        return None;
    }

    if target.contains("error=") {
        send_html(&mut stream, "Sign-in failed", "You can close this tab and check the terminal.");
        // The caller turns the error parameters into an AuthError
        return Some(target.to_string());
    }

    if !target.contains("code=") {
        send_response(&mut stream, "400 Bad Request", "Missing authorization code");
        return None;
    }

    send_html(&mut stream, "Signed in", "You can close this tab and return to the terminal.");
    Some(target.to_string())
}

fn send_html(stream: &mut TcpStream, title: &str, message: &str) {
    let html = format!(
        "<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"UTF-8\"><title>{title}</title></head>\
         <body style=\"font-family: sans-serif; text-align: center; margin-top: 4rem\">\
         <h1>{title}</h1><p>{message}</p></body></html>"
    );
    write_response(stream, "200 OK", "text/html; charset=utf-8", &html);
}

fn send_response(stream: &mut TcpStream, status: &str, message: &str) {
    write_response(stream, status, "text/plain", message);
}

fn write_response(stream: &mut TcpStream, status: &str, content_type: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    );

    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}
