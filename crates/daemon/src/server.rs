//! Unix socket server
//!
//! Each connection is greeted with the broker version and then served one
//! response line per request line. Waits run alongside the connection's
//! other requests and are answered when they finish; when the peer goes
//! away any wait it left behind is cancelled.

use crate::state::BusState;
use hookbus_common::wire::{BusCommand, BusGreeting, BusRequest, BusResponse};
use hookbus_common::Error;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Bind `socket_path` and serve until the listener fails.
pub async fn serve(socket_path: &Path, state: BusState) -> anyhow::Result<()> {
    if socket_path.exists() {
        warn!("Removing stale socket {}", socket_path.display());
        std::fs::remove_file(socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let listener = UnixListener::bind(socket_path)?;
    info!("Bus listening on {}", socket_path.display());

    loop {
        let (stream, _) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            let id = state.open_connection();
            debug!(connection = %id, "Client connected");
            if let Err(e) = handle_connection(stream, &state, id).await {
                warn!(connection = %id, "Connection ended with error: {}", e);
            }
            if let Some(conn) = state.close_connection(&id) {
                let secs = chrono::Utc::now().timestamp() - conn.connected_at;
                debug!(
                    connection = %id,
                    commands = conn.commands,
                    secs,
                    remaining = state.connection_count(),
                    "Client disconnected"
                );
            }
        });
    }
}

async fn handle_connection(stream: UnixStream, state: &BusState, id: Uuid) -> anyhow::Result<()> {
    let (read_half, mut writer) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let greeting = serde_json::to_string(&BusGreeting::new(state.broker_version()))?;
    write_line(&mut writer, &greeting).await?;

    let (finished, mut responses) = mpsc::unbounded_channel::<BusResponse>();
    // Dropping the set on return cancels every wait still running
    let mut waits = JoinSet::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    if !waits.is_empty() {
                        debug!(connection = %id, pending = waits.len(), "Peer left with waits pending");
                    }
                    return Ok(());
                };
                if line.trim().is_empty() {
                    continue;
                }

                match BusRequest::parse(&line) {
                    Ok(BusRequest { id: request_id, command: command @ BusCommand::Wait { .. } }) => {
                        let state = state.clone();
                        let finished = finished.clone();
                        waits.spawn(async move {
                            let response = respond(&state, &id, command).await.with_id(request_id);
                            let _ = finished.send(response);
                        });
                    }
                    Ok(BusRequest { id: request_id, command }) => {
                        let response = respond(state, &id, command).await.with_id(request_id);
                        write_response(&mut writer, &response).await?;
                    }
                    Err((request_id, e)) => {
                        debug!(connection = %id, "Bad request {:?}: {}", line.trim(), e);
                        let response = BusResponse::err(&Error::Protocol(format!("invalid request: {}", e)))
                            .with_id(request_id);
                        write_response(&mut writer, &response).await?;
                    }
                }
            }
            Some(response) = responses.recv() => write_response(&mut writer, &response).await?,
            Some(_) = waits.join_next(), if !waits.is_empty() => {}
        }
    }
}

async fn respond(state: &BusState, id: &Uuid, command: BusCommand) -> BusResponse {
    match state.execute(id, command).await {
        Ok(value) => BusResponse::ok(value),
        Err(e) => {
            if !matches!(e, Error::MissingKey(_) | Error::Timeout { .. }) {
                error!(connection = %id, "Command failed: {}", e);
            }
            BusResponse::err(&e)
        }
    }
}

async fn write_response(writer: &mut OwnedWriteHalf, response: &BusResponse) -> anyhow::Result<()> {
    write_line(writer, &serde_json::to_string(response)?).await
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> anyhow::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
