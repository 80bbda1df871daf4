//! HTTP API for session monitoring
//!
//! Provides JSON endpoints for viewing live UDP NAT sessions and server stats.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::nat::NatMap;
use super::counters::METRICS;

/// One entry in the `/sessions` response.
#[derive(Serialize)]
struct SessionInfo {
    client: String,
    target: String,
    age_secs: u64,
    idle_secs: u64,
}

/// API response for /sessions endpoint
#[derive(Serialize)]
struct SessionsResponse {
    count: usize,
    sessions: Vec<SessionInfo>,
}

/// API response for /stats endpoint
#[derive(Serialize)]
struct StatsResponse {
    connections_total: u64,
    connections_active: u64,
    bytes_received: u64,
    bytes_sent: u64,
    nat_sessions_opened: u64,
    nat_sessions_active: u64,
    datagrams_sent: u64,
    datagrams_frag_dropped: u64,
    errors_total: u64,
}

/// Start the diagnostic API server
///
/// This runs a simple HTTP server that responds to:
/// - GET /sessions - List all active UDP NAT sessions
/// - GET /stats - Server statistics
pub fn start_api_server(addr: SocketAddr, nat: Arc<NatMap>) {
    thread::spawn(move || {
        if let Err(e) = run_api_server(addr, nat) {
            error!(error = %e, "API server error");
        }
    });
    info!(%addr, "Diagnostic API server started");
}

fn run_api_server(addr: SocketAddr, nat: Arc<NatMap>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr)?;

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let nat = nat.clone();
                thread::spawn(move || {
                    if let Err(e) = handle_request(stream, &nat) {
                        debug!(error = %e, "request handling error");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "failed to accept connection");
            }
        }
    }

    Ok(())
}

fn handle_request(mut stream: TcpStream, nat: &NatMap) -> std::io::Result<()> {
    let mut buffer = [0u8; 1024];
    let n = stream.read(&mut buffer)?;

    if n == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buffer[..n]);
    let first_line = request.lines().next().unwrap_or("");

    let path = first_line.split_whitespace().nth(1).unwrap_or("/");

    let (status, body) = match path {
        "/sessions" => {
            let sessions = nat
                .snapshot()
                .into_iter()
                .map(|(client, entry)| SessionInfo {
                    client,
                    target: entry.target.to_string(),
                    age_secs: entry.created_at.elapsed().as_secs(),
                    idle_secs: entry.idle_for().as_secs(),
                })
                .collect::<Vec<_>>();
            let response = SessionsResponse {
                count: sessions.len(),
                sessions,
            };
            ("200 OK", serde_json::to_string_pretty(&response).unwrap_or_default())
        }
        "/stats" => {
            let snapshot = METRICS.snapshot();
            let response = StatsResponse {
                connections_total: snapshot.connections_total,
                connections_active: snapshot.connections_active,
                bytes_received: snapshot.bytes_received,
                bytes_sent: snapshot.bytes_sent,
                nat_sessions_opened: snapshot.nat_sessions_opened,
                nat_sessions_active: snapshot.nat_sessions_active,
                datagrams_sent: snapshot.datagrams_sent,
                datagrams_frag_dropped: snapshot.datagrams_frag_dropped,
                errors_total: snapshot.errors_total,
            };
            ("200 OK", serde_json::to_string_pretty(&response).unwrap_or_default())
        }
        "/" => {
            let help = r#"{
  "endpoints": {
    "/sessions": "List all active UDP NAT sessions",
    "/stats": "Server statistics"
  }
}"#;
            ("200 OK", help.to_string())
        }
        _ => ("404 Not Found", r#"{"error": "Not found"}"#.to_string()),
    };

    let response = format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        body.len(),
        body
    );

    stream.write_all(response.as_bytes())?;
    stream.flush()?;

    Ok(())
}
