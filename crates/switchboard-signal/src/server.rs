//! WebSocket signal server implementation

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};
use tracing::{debug, info, warn};

use switchboard_core::{ParticipantId, PARTICIPANT_QUERY_PARAM};

use crate::accounts::AccountDirectory;
use crate::hub::{Connection, SignalHub};

/// Signal server state
pub struct SignalServer {
    hub: Arc<SignalHub>,
}

impl SignalServer {
    pub fn new(directory: Arc<dyn AccountDirectory>, call_timeout: Duration) -> Self {
        Self {
            hub: Arc::new(SignalHub::new(directory, call_timeout)),
        }
    }

    pub fn hub(&self) -> &Arc<SignalHub> {
        &self.hub
    }

    /// Start the signal server
    pub async fn serve(&self, addr: SocketAddr) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_listener(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve_listener(&self, listener: TcpListener) -> Result<(), std::io::Error> {
        info!("Signal server listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let hub = self.hub.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, hub).await {
                    debug!("Connection error from {}: {:?}", peer_addr, e);
                }
            });
        }
    }

    /// Reachable participant count (for monitoring)
    pub fn participant_count(&self) -> usize {
        self.hub.registry().len()
    }

    /// Live call session count (for monitoring)
    pub fn call_count(&self) -> usize {
        self.hub.calls().active_calls()
    }
}

/// Handle a single connection (HTTP or WebSocket)
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    hub: Arc<SignalHub>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Upgrades are GETs too, so only the monitoring paths are diverted
    let mut peek_buf = [0u8; 32];
    let n = stream.peek(&mut peek_buf).await?;
    if is_monitoring_request(&peek_buf[..n]) {
        return handle_http_request(&mut stream, &hub).await;
    }

    let mut participant: Option<ParticipantId> = None;
    let ws_stream = accept_hdr_async(stream, |req: &Request, resp: Response| {
        match participant_from_request(req) {
            Some(id) => {
                participant = Some(id);
                Ok(resp)
            }
            None => Err(refuse("callerId is required")),
        }
    })
    .await;

    let ws_stream = match ws_stream {
        Ok(ws) => ws,
        Err(e) => {
            warn!("Refused connection from {}: {}", peer_addr, e);
            return Ok(());
        }
    };
    let Some(participant) = participant else {
        return Ok(());
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let Connection {
        id: connection,
        mut outbound,
        replies,
        ..
    } = hub.connect(participant.clone());
    debug!("New connection from {} as {} ({})", peer_addr, participant, connection);

    // Replies share the outbound queue but hold it only weakly, so a
    // reconnect that drops the registry's handle ends this writer.
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let json = match msg.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to encode outbound message: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json)).await.is_err() {
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    while let Some(msg) = ws_receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("WebSocket error: {:?}", e);
                break;
            }
        };

        if let Some(reply) = hub.handle_text(&participant, &text) {
            // Superseded by a reconnect; a full queue just drops the reply
            let Some(handle) = replies.upgrade() else {
                break;
            };
            handle.send(reply);
        }
    }

    // Cleanup on disconnect
    hub.disconnect(&participant, connection).await;
    writer.abort();

    debug!("Connection closed: {} ({})", participant, connection);
    Ok(())
}

/// Path of an HTTP request line, without its query string
///
/// `None` unless the path is terminated within `line`.
fn request_path(line: &[u8]) -> Option<&[u8]> {
    let rest = line.strip_prefix(b"GET ")?;
    let end = rest.iter().position(|&b| b == b' ' || b == b'?')?;
    Some(&rest[..end])
}

fn is_monitoring_request(head: &[u8]) -> bool {
    matches!(request_path(head), Some(b"/health" | b"/stats"))
}

/// Participant id from the `callerId` query parameter
fn participant_from_request(req: &Request) -> Option<ParticipantId> {
    let query = req.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == PARTICIPANT_QUERY_PARAM)
        .and_then(|(_, value)| ParticipantId::new(value.into_owned()).ok())
}

fn refuse(reason: &str) -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some(reason.to_string()));
    *resp.status_mut() = StatusCode::BAD_REQUEST;
    resp
}

/// Handle an HTTP request (for health checks)
async fn handle_http_request(
    stream: &mut TcpStream,
    hub: &SignalHub,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Read the HTTP request
    let mut buf = vec![0u8; 1024];
    let n = stream.read(&mut buf).await?;
    let path: &[u8] = request_path(&buf[..n]).unwrap_or(b"/");

    let participants = hub.registry().len();
    let calls = hub.calls().active_calls();

    let (status, body) = match path {
        b"/health" => (
            "200 OK",
            serde_json::json!({ "status": "healthy", "participants": participants, "calls": calls }),
        ),
        b"/stats" => (
            "200 OK",
            serde_json::json!({ "participants": participants, "calls": calls }),
        ),
        _ => ("404 Not Found", serde_json::json!({ "error": "not found" })),
    };
    let body = body.to_string();

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );

    stream.write_all(response.as_bytes()).await?;
    Ok(())
}
