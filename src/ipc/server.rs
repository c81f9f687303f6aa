//! Local IPC server for clients, observers and `ensemble-ctl`.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate. Every line is one JSON [`Command`];
//! every command is answered with one JSON line.
//!
//! ## Protocol
//!
//! Request:
//! ```json
//! {"command": "save_project", "project": "Live set"}
//! {"command": "register", "announcement": {"class": "synth", "pid": 4242, "flags": 2}}
//! {"command": "subscribe"}
//! ```
//!
//! Response:
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "not found: project 'Live set' is not loaded"}
//! ```
//!
//! After a successful `register` the connection also carries requests for
//! that client (`{"request": "load", ...}`) and every daemon signal
//! (`{"signal": "save", ...}`). `subscribe` streams signals only. When a
//! registered connection closes, the client is reported lost.

use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::bus::{ClientRequest, Signal};
use crate::orchestrator::command::Command;
use crate::orchestrator::dispatch::{Endpoint, Event};
use crate::{AppError, Result};

/// Outbound IPC response.
#[derive(Debug, Serialize)]
struct IpcResponse {
    /// Whether the command succeeded.
    ok: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl IpcResponse {
    fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// What a connection is currently used for.
#[derive(Default)]
struct Connection {
    client_id: Option<Uuid>,
    requests: Option<mpsc::UnboundedReceiver<ClientRequest>>,
    signals: Option<broadcast::Receiver<Signal>>,
}

/// Spawn the IPC server task.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(
    name: &str,
    events: mpsc::Sender<Event>,
    signals: broadcast::Sender<Signal>,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let listener_name = name
        .to_owned()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "IPC server listening");

    let span = info_span!("ipc_server", name = %name);
    let handle = tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("IPC server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                tokio::spawn(handle_connection(
                                    stream,
                                    events.clone(),
                                    signals.clone(),
                                    ct.clone(),
                                ));
                            }
                            Err(err) => {
                                warn!(%err, "IPC accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(span),
    );

    Ok(handle)
}

/// Serve one connection until EOF, error or shutdown.
async fn handle_connection(
    stream: interprocess::local_socket::tokio::Stream,
    events: mpsc::Sender<Event>,
    signals: broadcast::Sender<Signal>,
    ct: CancellationToken,
) {
    let span = info_span!("ipc_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut lines = BufReader::new(reader).lines();
        let mut conn = Connection::default();

        loop {
            tokio::select! {
                () = ct.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        let response = handle_line(trimmed, &mut conn, &events, &signals).await;
                        if let Err(err) = write_line(&mut writer, &response).await {
                            warn!(%err, "failed to write ipc response");
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!(%err, "ipc read error");
                        break;
                    }
                },
                request = next_request(&mut conn.requests) => match request {
                    Some(request) => {
                        if let Err(err) = write_line(&mut writer, &request).await {
                            warn!(%err, "failed to forward client request");
                            break;
                        }
                    }
                    None => conn.requests = None,
                },
                signal = next_signal(&mut conn.signals) => match signal {
                    Ok(signal) => {
                        if let Err(err) = write_line(&mut writer, &signal).await {
                            warn!(%err, "failed to forward signal");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "ipc subscriber lagging; signals dropped");
                    }
                    Err(RecvError::Closed) => conn.signals = None,
                },
            }
        }

        if let Some(client_id) = conn.client_id {
            info!(%client_id, "client connection closed");
            let command = Command::Disconnect { client_id };
            if let Err(err) = send_command(&events, command, None).await {
                debug!(%client_id, %err, "could not report client loss");
            }
        } else {
            info!("IPC connection closed");
        }
    }
    .instrument(span)
    .await;
}

/// Decode and run one request line.
async fn handle_line(
    line: &str,
    conn: &mut Connection,
    events: &mpsc::Sender<Event>,
    signals: &broadcast::Sender<Signal>,
) -> IpcResponse {
    let raw: Value = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(err) => return IpcResponse::error(format!("invalid json: {err}")),
    };

    if raw.get("command").and_then(Value::as_str) == Some("subscribe") {
        if conn.signals.is_none() {
            conn.signals = Some(signals.subscribe());
        }
        return IpcResponse::success(Value::Null);
    }

    let command: Command = match serde_json::from_value(raw) {
        Ok(command) => command,
        Err(err) => return IpcResponse::error(format!("invalid command: {err}")),
    };

    if !matches!(command, Command::Register { .. }) {
        return match send_command(events, command, None).await {
            Ok(data) => IpcResponse::success(data),
            Err(err) => IpcResponse::error(err.to_string()),
        };
    }

    if conn.client_id.is_some() {
        return IpcResponse::error("connection already registered a client");
    }

    let (mailbox, requests) = mpsc::unbounded_channel();
    let endpoint = Endpoint {
        name: format!("ipc-{}", Uuid::new_v4()),
        mailbox,
    };
    // Subscribe before dispatching so no signal of the registration is missed.
    let subscription = signals.subscribe();

    match send_command(events, command, Some(endpoint)).await {
        Ok(data) => {
            conn.client_id = data
                .get("client_id")
                .and_then(Value::as_str)
                .and_then(|raw| Uuid::parse_str(raw).ok());
            conn.requests = Some(requests);
            if conn.signals.is_none() {
                conn.signals = Some(subscription);
            }
            IpcResponse::success(data)
        }
        Err(err) => IpcResponse::error(err.to_string()),
    }
}

/// Hand `command` to the dispatch loop and wait for its reply.
async fn send_command(
    events: &mpsc::Sender<Event>,
    command: Command,
    endpoint: Option<Endpoint>,
) -> Result<Value> {
    let (reply, outcome) = oneshot::channel();
    events
        .send(Event::Command {
            command,
            endpoint,
            reply,
        })
        .await
        .map_err(|_| AppError::Ipc("daemon is shutting down".into()))?;

    outcome
        .await
        .map_err(|_| AppError::Ipc("daemon dropped the command".into()))?
}

async fn next_request(
    requests: &mut Option<mpsc::UnboundedReceiver<ClientRequest>>,
) -> Option<ClientRequest> {
    match requests {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_signal(
    signals: &mut Option<broadcast::Receiver<Signal>>,
) -> std::result::Result<Signal, RecvError> {
    match signals {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(value)
        .unwrap_or_else(|_| r#"{"ok":false,"error":"serialization failed"}"#.to_owned());
    line.push('\n');
    writer.write_all(line.as_bytes()).await
}
