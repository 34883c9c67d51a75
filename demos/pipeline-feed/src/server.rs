//! Pipeline event server.

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

const STAGES: &[&str] = &["queued", "parsing", "extracting", "indexing", "complete"];
const STEPS_PER_STAGE: usize = 4;
const PATH_PREFIX: &str = "/ws/";

pub struct Options {
    pub interval: Duration,
    pub drop_after: Option<u64>,
}

/// `type: processing_event` frame.
#[derive(Debug, Serialize)]
struct ProcessingEvent<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    payload: Progress<'a>,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Progress<'a> {
    file_id: &'a str,
    stage: &'static str,
    progress: u8,
}

/// Steps already emitted per session, so a reconnecting client resumes
/// where it left off.
type Sessions = Arc<RwLock<HashMap<String, usize>>>;

pub async fn run(addr: SocketAddr, options: Options) -> anyhow::Result<()> {
    let options = Arc::new(options);
    let sessions: Sessions = Arc::default();

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on ws://{}{}<session>", addr, PATH_PREFIX);

    loop {
        let (stream, client_addr) = listener.accept().await?;
        let options = options.clone();
        let sessions = sessions.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, client_addr, options, sessions).await {
                tracing::warn!("Connection error from {}: {}", client_addr, e);
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    options: Arc<Options>,
    sessions: Sessions,
) -> anyhow::Result<()> {
    let mut session = None;
    let ws = tokio_tungstenite::accept_hdr_async(stream, |request: &Request, response: Response| {
        match session_from_path(request.uri().path()) {
            Some(id) => {
                session = Some(id.to_string());
                Ok(response)
            }
            None => {
                let mut rejection = ErrorResponse::new(Some("expected /ws/<session>".into()));
                *rejection.status_mut() = StatusCode::NOT_FOUND;
                Err(rejection)
            }
        }
    })
    .await?;
    let session = session.ok_or_else(|| anyhow::anyhow!("handshake accepted without a session"))?;
    let (mut sink, mut stream) = ws.split();
    tracing::info!("{} following session {}", addr, session);

    let mut ticker = tokio::time::interval(options.interval);
    let mut sent = 0u64;
    let total = STAGES.len() * STEPS_PER_STAGE;

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::info!("{} says: {}", session, text.as_str());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!("{} closed: {:?}", session, frame);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }

            _ = ticker.tick() => {
                let step = {
                    let mut s = sessions.write().await;
                    let step = s.entry(session.clone()).or_default();
                    if *step >= total {
                        continue;
                    }
                    *step += 1;
                    *step
                };

                let event = processing_event(&session, step, total);
                sink.send(Message::Text(serde_json::to_string(&event)?.into())).await?;
                sent += 1;

                if step == total {
                    tracing::info!("Session {} complete", session);
                    sink.send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "pipeline complete".to_string().into(),
                    })))
                    .await?;
                    continue;
                }

                if options.drop_after.is_some_and(|n| sent >= n) {
                    tracing::info!("Dropping {} after {} events", session, sent);
                    // No close frame: the client sees an abnormal closure.
                    return Ok(());
                }
            }
        }
    }

    tracing::debug!("Connection closed: {}", addr);
    Ok(())
}

fn session_from_path(path: &str) -> Option<&str> {
    let id = path.strip_prefix(PATH_PREFIX)?;
    (!id.is_empty() && !id.contains('/')).then_some(id)
}

fn processing_event(session: &str, step: usize, total: usize) -> ProcessingEvent<'_> {
    let stage = STAGES[(step - 1) / STEPS_PER_STAGE];
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    ProcessingEvent {
        kind: "processing_event",
        payload: Progress {
            file_id: session,
            stage,
            progress: (step * 100 / total) as u8,
        },
        timestamp,
    }
}
